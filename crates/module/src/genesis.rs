//! Genesis configuration for the auction house.
//!
//! This module defines the owner, fee schedule and lot limits the house starts
//! with. The configuration is loaded from JSON by the CLI and validated before
//! the house is constructed.

use serde::{Deserialize, Serialize};

use empa_types::{Address, ONE_HUNDRED_PERCENT};

/// Genesis configuration for the auction house.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HouseGenesisConfig {
    /// Address allowed to change fees and the protocol address
    pub owner: Address,

    /// Recipient of protocol fees
    pub protocol: Address,

    /// Fee schedule, in basis points
    #[serde(default)]
    pub fees: FeeConfig,

    /// Limits applied when lots are created
    #[serde(default)]
    pub limits: LotLimits,
}

/// Fee schedule in basis points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Share of consumed quote paid to the protocol
    pub protocol_fee: u16,
    /// Share of consumed quote paid to the bid's referrer
    pub referrer_fee: u16,
    /// Upper bound for any curator's fee on sold base
    pub max_curator_fee: u16,
}

/// Limits applied when lots are created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotLimits {
    /// Minimum time from start to conclusion (seconds)
    pub min_auction_duration: u64,
    /// Time after conclusion before anyone may abort the lot (seconds)
    pub settle_period: u64,
    /// Smallest accepted token decimals
    pub min_decimals: u8,
    /// Largest accepted token decimals
    pub max_decimals: u8,
}

impl Default for LotLimits {
    fn default() -> Self {
        Self {
            min_auction_duration: 3600,   // 1 hour
            settle_period: 6 * 7 * 86400, // 6 weeks
            min_decimals: 6,
            max_decimals: 18,
        }
    }
}

impl HouseGenesisConfig {
    /// Create a config with the given owner acting as protocol fee recipient.
    pub fn with_owner(owner: Address) -> Self {
        Self {
            owner,
            protocol: owner,
            ..Default::default()
        }
    }

    /// Validate the genesis configuration.
    pub fn validate(&self) -> Result<(), GenesisValidationError> {
        let fees = &self.fees;
        if u32::from(fees.protocol_fee) + u32::from(fees.referrer_fee)
            > u32::from(ONE_HUNDRED_PERCENT)
        {
            return Err(GenesisValidationError::InvalidFees(
                "Protocol and referrer fees exceed 100%".into(),
            ));
        }
        if fees.max_curator_fee > ONE_HUNDRED_PERCENT {
            return Err(GenesisValidationError::InvalidFees(
                "Maximum curator fee exceeds 100%".into(),
            ));
        }

        let limits = &self.limits;
        if limits.min_decimals > limits.max_decimals {
            return Err(GenesisValidationError::InvalidLimits(
                "Decimal bounds are inverted".into(),
            ));
        }
        // 10^38 is the largest power of ten below u128::MAX
        if limits.max_decimals > 38 {
            return Err(GenesisValidationError::InvalidLimits(
                "Maximum decimals cannot exceed 38".into(),
            ));
        }
        if limits.min_auction_duration == 0 {
            return Err(GenesisValidationError::InvalidLimits(
                "Minimum auction duration cannot be zero".into(),
            ));
        }

        Ok(())
    }
}

/// Errors that can occur during genesis validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenesisValidationError {
    #[error("Invalid fee configuration: {0}")]
    InvalidFees(String),

    #[error("Invalid lot limits: {0}")]
    InvalidLimits(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HouseGenesisConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fees_exceed_hundred_percent() {
        let mut config = HouseGenesisConfig::default();
        config.fees.protocol_fee = 6000;
        config.fees.referrer_fee = 4001;
        assert!(matches!(
            config.validate(),
            Err(GenesisValidationError::InvalidFees(_))
        ));
    }

    #[test]
    fn test_inverted_decimals() {
        let mut config = HouseGenesisConfig::default();
        config.limits.min_decimals = 18;
        config.limits.max_decimals = 6;
        assert!(matches!(
            config.validate(),
            Err(GenesisValidationError::InvalidLimits(_))
        ));
    }

    #[test]
    fn test_json_defaults_fill_missing_sections() {
        let json = format!(
            r#"{{"owner": {:?}, "protocol": {:?}}}"#,
            [1u8; 32], [2u8; 32]
        );
        let config: HouseGenesisConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.limits, LotLimits::default());
        assert_eq!(config.fees, FeeConfig::default());
        assert_eq!(config.protocol, [2u8; 32]);
    }
}
