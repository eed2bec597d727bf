//! Basket and issuance engines for a collateral-backed elastic-supply token.

pub mod basket;
pub mod basket_handler;
pub mod events;
pub mod issuance;
pub mod protocol;

pub use basket::Basket;
pub use basket_handler::{BackupConfig, BasketHandler, PrimeEntry, Quote};
pub use events::{EventLog, EventSink, ProtocolEvent};
pub use issuance::{IssuanceEngine, IssuanceEnv, IssuanceRecord, IssueReceipt};
pub use protocol::Protocol;
