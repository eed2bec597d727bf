//! External collaborators of the basket engines: price feeds, collateral
//! capabilities, the asset registry, the issued-token supply ledger and the
//! collateral vault.

pub mod asset;
pub mod collateral;
pub mod feed;
pub mod ledger;
pub mod registry;
pub mod vault;


pub use asset::{Asset, PlainAsset};
pub use collateral::{Collateral, CollateralKind};
pub use feed::{FeedError, PriceFeed};
pub use ledger::SupplyLedger;
pub use registry::{AssetRegistry, StatusChange};
pub use vault::{CollateralVault, Transfer};
