//! Collateral capability: health status, conversion ratios and valuation for
//! one collateral token.
//!
//! Valuation strategies form a closed set of variants ([`CollateralKind`]);
//! every capability query dispatches on the variant tag.
//!
//! # Status state machine
//!
//! `SOUND <-> IFFY -> DISABLED`, with `DISABLED` terminal. On each refresh:
//! - refPerTok strictly below the last observation: straight to `DISABLED`
//! - strict valuation succeeds: `SOUND`
//! - valuation reports a stale price: `IFFY` (and `DISABLED` once the
//!   optional default delay has elapsed while continuously iffy)
//! - any other valuation failure aborts the refresh

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use basket_common::types::{CollateralStatus, RoundingMode, TargetName};
use basket_common::{Fix, ProtocolError, ProtocolResult};

use crate::feed::{FeedError, PriceFeed};

/// Valuation strategy of a collateral token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollateralKind {
    /// Token is its own reference unit and pegs 1:1 to its target (e.g. a USD stablecoin).
    FiatPegged { uoa_per_ref: PriceFeed },
    /// Token tracks a non-fiat target (e.g. a wrapped BTC).
    NonFiat {
        uoa_per_target: PriceFeed,
        target_per_ref: Fix,
    },
    /// Interest-bearing wrapper whose reference balance grows over time.
    YieldWrapped { uoa_per_ref: PriceFeed, ref_per_tok: Fix },
}

/// Computed next state of a collateral, committed separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RefreshOutcome {
    status: CollateralStatus,
    prev_ref_per_tok: Fix,
    iffy_since: Option<DateTime<Utc>>,
}

/// One collateral token and its health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collateral {
    erc20: Address,
    decimals: u8,
    target_name: TargetName,
    kind: CollateralKind,
    status: CollateralStatus,
    prev_ref_per_tok: Fix,
    iffy_since: Option<DateTime<Utc>>,
    /// Seconds of continuous IFFY status after which the collateral defaults.
    default_delay_secs: Option<u64>,
}

impl Collateral {
    pub fn new(erc20: Address, decimals: u8, target_name: TargetName, kind: CollateralKind) -> Self {
        let mut collateral = Self {
            erc20,
            decimals,
            target_name,
            kind,
            status: CollateralStatus::Sound,
            prev_ref_per_tok: Fix::ZERO,
            iffy_since: None,
            default_delay_secs: None,
        };
        collateral.prev_ref_per_tok = collateral.ref_per_tok();
        collateral
    }

    pub fn fiat(erc20: Address, decimals: u8, target_name: impl Into<TargetName>, price: Fix) -> Self {
        Self::new(
            erc20,
            decimals,
            target_name.into(),
            CollateralKind::FiatPegged {
                uoa_per_ref: PriceFeed::new(price),
            },
        )
    }

    pub fn non_fiat(
        erc20: Address,
        decimals: u8,
        target_name: impl Into<TargetName>,
        uoa_per_target: Fix,
        target_per_ref: Fix,
    ) -> Self {
        Self::new(
            erc20,
            decimals,
            target_name.into(),
            CollateralKind::NonFiat {
                uoa_per_target: PriceFeed::new(uoa_per_target),
                target_per_ref,
            },
        )
    }

    pub fn yield_wrapped(
        erc20: Address,
        decimals: u8,
        target_name: impl Into<TargetName>,
        uoa_per_ref: Fix,
        ref_per_tok: Fix,
    ) -> Self {
        Self::new(
            erc20,
            decimals,
            target_name.into(),
            CollateralKind::YieldWrapped {
                uoa_per_ref: PriceFeed::new(uoa_per_ref),
                ref_per_tok,
            },
        )
    }

    /// Default to `DISABLED` after `secs` seconds of continuous `IFFY` status.
    pub fn with_default_delay(mut self, secs: u64) -> Self {
        self.default_delay_secs = Some(secs);
        self
    }

    pub fn erc20(&self) -> Address {
        self.erc20
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn target_name(&self) -> &TargetName {
        &self.target_name
    }

    pub fn status(&self) -> CollateralStatus {
        self.status
    }

    /// Reference units per whole token.
    pub fn ref_per_tok(&self) -> Fix {
        match &self.kind {
            CollateralKind::FiatPegged { .. } | CollateralKind::NonFiat { .. } => Fix::ONE,
            CollateralKind::YieldWrapped { ref_per_tok, .. } => *ref_per_tok,
        }
    }

    /// Target units per reference unit.
    pub fn target_per_ref(&self) -> Fix {
        match &self.kind {
            CollateralKind::FiatPegged { .. } | CollateralKind::YieldWrapped { .. } => Fix::ONE,
            CollateralKind::NonFiat { target_per_ref, .. } => *target_per_ref,
        }
    }

    /// Strict unit price in unit-of-account per whole token.
    ///
    /// A stale oracle yields [`ProtocolError::PriceUnavailable`]; any other
    /// oracle failure yields [`ProtocolError::OracleFault`].
    pub fn price(&self) -> ProtocolResult<Fix> {
        let price = match &self.kind {
            CollateralKind::FiatPegged { uoa_per_ref } => self.read(uoa_per_ref)?,
            CollateralKind::NonFiat {
                uoa_per_target,
                target_per_ref,
            } => self
                .read(uoa_per_target)?
                .mul(*target_per_ref, RoundingMode::Floor)?,
            CollateralKind::YieldWrapped {
                uoa_per_ref,
                ref_per_tok,
            } => self
                .read(uoa_per_ref)?
                .mul(*ref_per_tok, RoundingMode::Floor)?,
        };
        Ok(price)
    }

    fn read(&self, feed: &PriceFeed) -> ProtocolResult<Fix> {
        feed.latest().map_err(|e| match e {
            FeedError::Stale => ProtocolError::PriceUnavailable(self.erc20),
            FeedError::Fault(reason) => ProtocolError::OracleFault {
                token: self.erc20,
                reason,
            },
        })
    }

    /// The oracle driving this collateral's valuation.
    pub fn feed_mut(&mut self) -> &mut PriceFeed {
        match &mut self.kind {
            CollateralKind::FiatPegged { uoa_per_ref } => uoa_per_ref,
            CollateralKind::NonFiat { uoa_per_target, .. } => uoa_per_target,
            CollateralKind::YieldWrapped { uoa_per_ref, .. } => uoa_per_ref,
        }
    }

    /// Record a new exchange rate for a yield-wrapped token.
    ///
    /// The status reaction (if the rate fell) happens on the next refresh.
    pub fn set_ref_per_tok(&mut self, rate: Fix) -> ProtocolResult<()> {
        match &mut self.kind {
            CollateralKind::YieldWrapped { ref_per_tok, .. } => {
                *ref_per_tok = rate;
                Ok(())
            }
            _ => Err(ProtocolError::Validation(format!(
                "{} has a fixed refPerTok",
                self.erc20
            ))),
        }
    }

    /// Raw token units to the ratio domain.
    pub fn to_fix(&self, raw: u128) -> ProtocolResult<Fix> {
        Ok(Fix::from_raw(raw, self.decimals)?)
    }

    /// Ratio-domain amount to raw token units.
    pub fn to_raw(&self, amount: Fix, rounding: RoundingMode) -> ProtocolResult<u128> {
        Ok(amount.to_raw(self.decimals, rounding)?)
    }

    /// Re-evaluate the status and commit it. Returns the status after the refresh.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> ProtocolResult<CollateralStatus> {
        let outcome = self.preview_refresh(now)?;
        self.apply(outcome);
        Ok(self.status)
    }

    pub(crate) fn preview_refresh(&self, now: DateTime<Utc>) -> ProtocolResult<RefreshOutcome> {
        if self.status == CollateralStatus::Disabled {
            return Ok(RefreshOutcome {
                status: self.status,
                prev_ref_per_tok: self.prev_ref_per_tok,
                iffy_since: self.iffy_since,
            });
        }

        let ref_per_tok = self.ref_per_tok();
        if ref_per_tok < self.prev_ref_per_tok {
            return Ok(RefreshOutcome {
                status: CollateralStatus::Disabled,
                prev_ref_per_tok: ref_per_tok,
                iffy_since: None,
            });
        }

        let (status, iffy_since) = match self.price() {
            Ok(_) => (CollateralStatus::Sound, None),
            Err(ProtocolError::PriceUnavailable(_)) => {
                let since = self.iffy_since.unwrap_or(now);
                let elapsed = (now - since).num_seconds();
                let expired = self
                    .default_delay_secs
                    .is_some_and(|delay| i64::try_from(delay).is_ok_and(|delay| elapsed >= delay));
                if expired {
                    (CollateralStatus::Disabled, None)
                } else {
                    (CollateralStatus::Iffy, Some(since))
                }
            }
            Err(e) => return Err(e),
        };

        Ok(RefreshOutcome {
            status,
            prev_ref_per_tok: ref_per_tok,
            iffy_since,
        })
    }

    pub(crate) fn apply(&mut self, outcome: RefreshOutcome) {
        if outcome.status != self.status {
            tracing::info!(
                erc20 = %self.erc20,
                old = %self.status,
                new = %outcome.status,
                "Collateral status changed"
            );
        }
        self.status = outcome.status;
        self.prev_ref_per_tok = outcome.prev_ref_per_tok;
        self.iffy_since = outcome.iffy_since;
    }
}

impl RefreshOutcome {
    pub(crate) fn status(&self) -> CollateralStatus {
        self.status
    }
}
