use alloy_primitives::{Address, address};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Account holding the deposits of not-yet-settled issuance requests.
pub const ISSUANCE_ESCROW: Address = address!("00000000000000000000000000000000000e5c40");

/// Account holding the collateral that backs settled supply.
pub const BACKING_CUSTODY: Address = address!("00000000000000000000000000000000000bac40");

/// Health of a single collateral, or of a whole basket.
///
/// Ordered by severity: `Disabled` dominates `Iffy` dominates `Sound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollateralStatus {
    Sound,
    Iffy,
    Disabled,
}

impl CollateralStatus {
    /// The more severe of two statuses.
    pub fn worse_of(self, other: CollateralStatus) -> CollateralStatus {
        self.max(other)
    }
}

impl std::fmt::Display for CollateralStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollateralStatus::Sound => write!(f, "sound"),
            CollateralStatus::Iffy => write!(f, "iffy"),
            CollateralStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// Rounding applied when a ratio computation is not exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingMode {
    /// Toward zero. Conservative for redemption sizing.
    Floor,
    /// Nearest, halves rounded up.
    Round,
    /// Away from zero. Conservative for deposit sizing.
    Ceil,
}

/// Name of a peg class that several collateral tokens may track (e.g. "USD").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetName(String);

impl TargetName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TargetName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl std::fmt::Display for TargetName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The height and wall-clock time an operation executes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub height: u64,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(height: u64, timestamp: DateTime<Utc>) -> Self {
        Self { height, timestamp }
    }

    /// Context `heights` later, with the clock moved by `seconds_per_height` each.
    pub fn advance(&self, heights: u64, seconds_per_height: i64) -> Self {
        let elapsed = seconds_per_height.saturating_mul(heights as i64);
        Self {
            height: self.height + heights,
            timestamp: self.timestamp + Duration::seconds(elapsed),
        }
    }
}
