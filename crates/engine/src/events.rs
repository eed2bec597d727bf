//! Ordered audit notifications emitted by the engines.
//!
//! Events are written only after the emitting operation has committed its
//! state, so a failed call never leaves a trace in the sink.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use basket_assets::StatusChange;
use basket_common::Fix;
use basket_common::types::{CollateralStatus, TargetName};

/// A structured protocol notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    PrimeBasketSet {
        erc20s: Vec<Address>,
        target_amts: Vec<Fix>,
        target_names: Vec<TargetName>,
    },
    BackupConfigSet {
        target_name: TargetName,
        max: usize,
        erc20s: Vec<Address>,
    },
    BasketSet {
        erc20s: Vec<Address>,
        ref_amts: Vec<Fix>,
        nonce: u64,
    },
    IssuanceStarted {
        issuer: Address,
        index: usize,
        amount: Fix,
        baskets: Fix,
        erc20s: Vec<Address>,
        deposits: Vec<u128>,
        available_at: Fix,
    },
    /// Records `[start, end)` of `account`'s queue were settled.
    IssuancesCompleted { account: Address, start: usize, end: usize },
    /// Records `[start, end)` of `account`'s queue were refunded.
    IssuancesCanceled { account: Address, start: usize, end: usize },
    CollateralStatusChanged {
        erc20: Address,
        old: CollateralStatus,
        new: CollateralStatus,
    },
    AssetRegistered { erc20: Address, collateral: bool },
    AssetUnregistered { erc20: Address },
    Redemption {
        redeemer: Address,
        amount: Fix,
        baskets: Fix,
        erc20s: Vec<Address>,
        quantities: Vec<u128>,
    },
}

impl ProtocolEvent {
    /// Short machine name, used as a tracing field.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::PrimeBasketSet { .. } => "prime_basket_set",
            ProtocolEvent::BackupConfigSet { .. } => "backup_config_set",
            ProtocolEvent::BasketSet { .. } => "basket_set",
            ProtocolEvent::IssuanceStarted { .. } => "issuance_started",
            ProtocolEvent::IssuancesCompleted { .. } => "issuances_completed",
            ProtocolEvent::IssuancesCanceled { .. } => "issuances_canceled",
            ProtocolEvent::CollateralStatusChanged { .. } => "collateral_status_changed",
            ProtocolEvent::AssetRegistered { .. } => "asset_registered",
            ProtocolEvent::AssetUnregistered { .. } => "asset_unregistered",
            ProtocolEvent::Redemption { .. } => "redemption",
        }
    }
}

impl From<StatusChange> for ProtocolEvent {
    fn from(change: StatusChange) -> Self {
        ProtocolEvent::CollateralStatusChanged {
            erc20: change.erc20,
            old: change.old,
            new: change.new,
        }
    }
}

/// Destination for protocol events.
pub trait EventSink {
    fn emit(&mut self, event: ProtocolEvent);
}

/// In-memory, insertion-ordered event log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<ProtocolEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drop everything logged after the first `len` events.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }

    /// Remove and return everything logged so far.
    pub fn drain(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.events)
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: ProtocolEvent) {
        tracing::debug!(event = event.name(), "Protocol event");
        self.events.push(event);
    }
}

impl EventSink for Vec<ProtocolEvent> {
    fn emit(&mut self, event: ProtocolEvent) {
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_with_tag_and_decimal_strings() {
        let event = ProtocolEvent::IssuancesCompleted {
            account: Address::repeat_byte(0xA1),
            start: 0,
            end: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "issuances_completed");
        assert_eq!(json["end"], 2);

        let basket = ProtocolEvent::BasketSet {
            erc20s: vec![Address::repeat_byte(1)],
            ref_amts: vec!["0.5".parse().unwrap()],
            nonce: 3,
        };
        let json = serde_json::to_value(&basket).unwrap();
        assert_eq!(json["ref_amts"][0], "0.5");
        let back: ProtocolEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, basket);
    }

    #[test]
    fn test_event_log_drain_empties_log() {
        let mut log = EventLog::new();
        log.emit(ProtocolEvent::AssetUnregistered {
            erc20: Address::repeat_byte(1),
        });
        assert_eq!(log.len(), 1);
        assert_eq!(log.drain().len(), 1);
        assert!(log.is_empty());
    }
}
