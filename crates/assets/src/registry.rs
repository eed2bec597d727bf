//! Asset registry: resolves a token address to its capability object.
//!
//! Entries keep registration order, so every iteration over the registry
//! (and every status refresh) is deterministic.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use basket_common::types::CollateralStatus;
use basket_common::{ProtocolError, ProtocolResult};

use crate::asset::Asset;
use crate::collateral::{Collateral, RefreshOutcome};

/// A collateral whose status moved during a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub erc20: Address,
    pub old: CollateralStatus,
    pub new: CollateralStatus,
}

/// Registry of all assets known to the protocol.
#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    assets: IndexMap<Address, Asset>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new asset.
    ///
    /// Returns `false` if this exact asset is already registered; fails if a
    /// different asset is registered for the same token.
    pub fn register(&mut self, asset: impl Into<Asset>) -> ProtocolResult<bool> {
        let asset = asset.into();
        let erc20 = asset.erc20();
        if let Some(existing) = self.assets.get(&erc20) {
            if *existing == asset {
                return Ok(false);
            }
            return Err(ProtocolError::Validation(format!(
                "Duplicate ERC20 detected: {}",
                erc20
            )));
        }

        self.assets.insert(erc20, asset);
        Ok(true)
    }

    /// Replace the asset registered for the same token, keeping its position.
    pub fn swap_registered(&mut self, asset: impl Into<Asset>) -> ProtocolResult<Asset> {
        let asset = asset.into();
        let erc20 = asset.erc20();
        let slot = self
            .assets
            .get_mut(&erc20)
            .ok_or(ProtocolError::UnknownAsset(erc20))?;
        Ok(std::mem::replace(slot, asset))
    }

    pub fn unregister(&mut self, erc20: Address) -> ProtocolResult<Asset> {
        let removed = self
            .assets
            .shift_remove(&erc20)
            .ok_or(ProtocolError::UnknownAsset(erc20))?;
        Ok(removed)
    }

    pub fn is_registered(&self, erc20: &Address) -> bool {
        self.assets.contains_key(erc20)
    }

    pub fn to_asset(&self, erc20: &Address) -> ProtocolResult<&Asset> {
        self.assets
            .get(erc20)
            .ok_or(ProtocolError::UnknownAsset(*erc20))
    }

    pub fn to_collateral(&self, erc20: &Address) -> ProtocolResult<&Collateral> {
        self.to_asset(erc20)?
            .as_collateral()
            .ok_or(ProtocolError::NotCollateral(*erc20))
    }

    pub fn to_collateral_mut(&mut self, erc20: &Address) -> ProtocolResult<&mut Collateral> {
        self.assets
            .get_mut(erc20)
            .ok_or(ProtocolError::UnknownAsset(*erc20))?
            .as_collateral_mut()
            .ok_or(ProtocolError::NotCollateral(*erc20))
    }

    /// Registered tokens in registration order.
    pub fn erc20s(&self) -> Vec<Address> {
        self.assets.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Refresh every registered collateral.
    pub fn force_updates(&mut self, now: DateTime<Utc>) -> ProtocolResult<Vec<StatusChange>> {
        let erc20s = self.erc20s();
        self.refresh_many(&erc20s, now)
    }

    /// Refresh the listed tokens, skipping any that are unregistered or not collateral.
    ///
    /// All next states are computed before any is committed, so a fatal
    /// valuation failure leaves every collateral untouched.
    pub fn refresh_many(
        &mut self,
        erc20s: &[Address],
        now: DateTime<Utc>,
    ) -> ProtocolResult<Vec<StatusChange>> {
        let mut pending: Vec<(Address, RefreshOutcome)> = Vec::with_capacity(erc20s.len());
        for erc20 in erc20s {
            let Ok(coll) = self.to_collateral(erc20) else {
                continue;
            };
            if pending.iter().any(|(seen, _)| seen == erc20) {
                continue;
            }
            pending.push((*erc20, coll.preview_refresh(now)?));
        }

        let mut changes = Vec::new();
        for (erc20, outcome) in pending {
            let coll = self.to_collateral_mut(&erc20)?;
            let old = coll.status();
            coll.apply(outcome);
            if old != outcome.status() {
                changes.push(StatusChange {
                    erc20,
                    old,
                    new: outcome.status(),
                });
            }
        }
        Ok(changes)
    }

    /// Refresh a single collateral.
    pub fn refresh(&mut self, erc20: &Address, now: DateTime<Utc>) -> ProtocolResult<Option<StatusChange>> {
        self.to_collateral(erc20)?;
        Ok(self.refresh_many(std::slice::from_ref(erc20), now)?.pop())
    }
}
