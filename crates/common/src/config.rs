use serde::Deserialize;

use crate::error::{ProtocolError, ProtocolResult};
use crate::fixed::Fix;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Fraction of the current supply that may vest per height (default: 0.00025)
    pub issuance_rate: Fix,

    /// Throughput floor in issued-token units per height (default: 10000)
    pub min_issuance_rate: Fix,

    /// Maximum number of entries in the prime basket configuration (default: 128)
    pub max_basket_size: usize,

    /// Maximum number of candidates in one backup configuration (default: 64)
    pub max_backup_erc20s: usize,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            issuance_rate: std::env::var("ISSUANCE_RATE")
                .unwrap_or_else(|_| "0.00025".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("ISSUANCE_RATE must be a decimal fraction"))?,
            min_issuance_rate: std::env::var("MIN_ISSUANCE_RATE")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MIN_ISSUANCE_RATE must be a decimal amount"))?,
            max_basket_size: std::env::var("MAX_BASKET_SIZE")
                .unwrap_or_else(|_| "128".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_BASKET_SIZE must be a valid usize"))?,
            max_backup_erc20s: std::env::var("MAX_BACKUP_ERC20S")
                .unwrap_or_else(|_| "64".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_BACKUP_ERC20S must be a valid usize"))?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engines cannot run with.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.issuance_rate > Fix::ONE {
            return Err(ProtocolError::Config("ISSUANCE_RATE must not exceed 1".to_string()));
        }
        if self.min_issuance_rate.is_zero() {
            return Err(ProtocolError::Config("MIN_ISSUANCE_RATE must be positive".to_string()));
        }
        if self.max_basket_size == 0 || self.max_backup_erc20s == 0 {
            return Err(ProtocolError::Config("basket size limits must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            issuance_rate: Fix::from_bits(250_000_000_000_000),
            min_issuance_rate: Fix::from_bits(10_000 * crate::fixed::FIX_SCALE),
            max_basket_size: 128,
            max_backup_erc20s: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.issuance_rate, "0.00025".parse().unwrap());
        assert_eq!(config.min_issuance_rate, "10000".parse().unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_floor() {
        let config = EngineConfig {
            min_issuance_rate: Fix::ZERO,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ProtocolError::Config("MIN_ISSUANCE_RATE must be positive".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_rate_above_one() {
        let config = EngineConfig {
            issuance_rate: "1.5".parse().unwrap(),
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ProtocolError::Config(_))));
    }
}
