use alloy_primitives::Address;
use thiserror::Error;

use crate::fixed::Fix;
use crate::types::CollateralStatus;

/// Arithmetic domain errors. Always fatal for the call that hit them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Arithmetic underflow")]
    Underflow,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid fixed-point literal: {0}")]
    Parse(String),
}

/// Common error types used across the protocol crates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Math error: {0}")]
    Math(#[from] MathError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Asset not registered: {0}")]
    UnknownAsset(Address),

    #[error("Token is not collateral: {0}")]
    NotCollateral(Address),

    #[error("Price unavailable for {0}")]
    PriceUnavailable(Address),

    #[error("Oracle fault for {token}: {reason}")]
    OracleFault { token: Address, reason: String },

    #[error("Basket is not sound: {0}")]
    BasketUnsound(CollateralStatus),

    #[error("Insufficient {token} balance for {account}: have {have}, need {need}")]
    InsufficientBalance {
        token: Address,
        account: Address,
        have: u128,
        need: u128,
    },

    #[error("Insufficient supply balance for {account}: have {have}, need {need}")]
    InsufficientSupply { account: Address, have: Fix, need: Fix },

    #[error("Index {index} out of range for queue of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
