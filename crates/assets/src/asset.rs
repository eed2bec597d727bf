use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::collateral::Collateral;
use crate::feed::PriceFeed;

/// A registered token that can be valued but never backs the basket
/// (reward tokens, governance tokens).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainAsset {
    pub erc20: Address,
    pub decimals: u8,
    pub uoa_per_tok: PriceFeed,
}

/// Capability object the registry resolves a token to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Asset {
    Plain(PlainAsset),
    Collateral(Collateral),
}

impl Asset {
    pub fn erc20(&self) -> Address {
        match self {
            Asset::Plain(asset) => asset.erc20,
            Asset::Collateral(coll) => coll.erc20(),
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            Asset::Plain(asset) => asset.decimals,
            Asset::Collateral(coll) => coll.decimals(),
        }
    }

    pub fn is_collateral(&self) -> bool {
        matches!(self, Asset::Collateral(_))
    }

    pub fn as_collateral(&self) -> Option<&Collateral> {
        match self {
            Asset::Collateral(coll) => Some(coll),
            Asset::Plain(_) => None,
        }
    }

    pub fn as_collateral_mut(&mut self) -> Option<&mut Collateral> {
        match self {
            Asset::Collateral(coll) => Some(coll),
            Asset::Plain(_) => None,
        }
    }

}

impl From<Collateral> for Asset {
    fn from(coll: Collateral) -> Self {
        Asset::Collateral(coll)
    }
}

impl From<PlainAsset> for Asset {
    fn from(asset: PlainAsset) -> Self {
        Asset::Plain(asset)
    }
}
