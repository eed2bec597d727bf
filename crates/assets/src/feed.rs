use serde::{Deserialize, Serialize};

use basket_common::Fix;

/// Why a feed could not produce a price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum FeedError {
    /// The oracle answer is too old or missing. Recognized: collateral goes IFFY.
    #[error("price feed is stale")]
    Stale,
    /// Anything else. Never absorbed into a collateral status.
    #[error("price feed fault: {0}")]
    Fault(String),
}

/// Latest reading of an external price oracle, in unit-of-account per unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFeed {
    reading: Result<Fix, FeedError>,
}

impl PriceFeed {
    pub fn new(price: Fix) -> Self {
        Self { reading: Ok(price) }
    }

    pub fn latest(&self) -> Result<Fix, FeedError> {
        self.reading.clone()
    }

    pub fn set_price(&mut self, price: Fix) {
        self.reading = Ok(price);
    }

    pub fn mark_stale(&mut self) {
        self.reading = Err(FeedError::Stale);
    }

    pub fn set_fault(&mut self, reason: impl Into<String>) {
        self.reading = Err(FeedError::Fault(reason.into()));
    }
}
