//! Realized basket snapshots and the candidate builder used by basket switches.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use basket_common::{Fix, ProtocolResult};

/// The basket currently defining one basket unit: reference amounts per
/// token, in insertion order.
///
/// Immutable between commits; a switch replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Basket {
    ref_amts: IndexMap<Address, Fix>,
    nonce: u64,
    timestamp: Option<DateTime<Utc>>,
}

impl Basket {
    /// Reference amount per basket unit, if `erc20` is in the basket.
    pub fn ref_amt(&self, erc20: &Address) -> Option<Fix> {
        self.ref_amts.get(erc20).copied()
    }

    pub fn erc20s(&self) -> Vec<Address> {
        self.ref_amts.keys().copied().collect()
    }

    pub fn ref_amts(&self) -> Vec<Fix> {
        self.ref_amts.values().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Fix)> {
        self.ref_amts.iter()
    }

    pub fn len(&self) -> usize {
        self.ref_amts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ref_amts.is_empty()
    }

    /// Version of this snapshot. Zero until the first commit.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// When this snapshot was committed.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }
}

/// Candidate basket accumulated during a switch.
#[derive(Debug, Default)]
pub(crate) struct BasketBuilder {
    ref_amts: IndexMap<Address, Fix>,
}

impl BasketBuilder {
    /// Add `amount` reference units for `erc20`, accumulating if already present.
    pub(crate) fn add(&mut self, erc20: Address, amount: Fix) -> ProtocolResult<()> {
        let slot = self.ref_amts.entry(erc20).or_insert(Fix::ZERO);
        *slot = slot.checked_add(amount)?;
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ref_amts.is_empty()
    }

    /// Replace `basket` with the candidate and bump its nonce.
    pub(crate) fn commit(self, basket: &mut Basket, timestamp: DateTime<Utc>) {
        basket.ref_amts = self.ref_amts;
        basket.nonce += 1;
        basket.timestamp = Some(timestamp);
    }
}
