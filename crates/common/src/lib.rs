//! Shared types, fixed-point math, errors and configuration for the basket
//! protocol crates.

pub mod config;
pub mod error;
pub mod fixed;
pub mod types;

pub use error::{MathError, ProtocolError, ProtocolResult};
pub use fixed::Fix;
