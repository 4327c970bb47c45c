// marketplace/src/config.rs

use crate::{model::ModelConfig, MarketError, MarketResult};
use market_core::{PoolKind, Timestamp};
use market_crypto::Address;
use serde::{Deserialize, Serialize};
use staking::PoolConfig;

/// Token ledger genesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Account minted the whole supply
    pub genesis_account: Address,
    pub genesis_supply: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            genesis_account: Address::from_name("genesis"),
            genesis_supply: 1_000_000_000,
        }
    }
}

/// Payment escrow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Shortest wall time a payment may be locked for (seconds)
    pub min_wall_time: Timestamp,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self { min_wall_time: 300 }
    }
}

/// Everything a [`crate::Market`] is built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub token: TokenConfig,
    /// Holds staked collateral
    pub custody: Address,
    /// Holds locked payments
    pub escrow_account: Address,
    /// Receives the treasury share of slashed collateral
    pub treasury: Address,
    pub verifiers: PoolConfig,
    pub gossipers: PoolConfig,
    pub model: ModelConfig,
    pub escrow: EscrowConfig,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            token: TokenConfig::default(),
            custody: Address::from_name("stake-custody"),
            escrow_account: Address::from_name("payment-escrow"),
            treasury: Address::from_name("treasury"),
            verifiers: PoolConfig::verifiers(),
            gossipers: PoolConfig::gossipers(),
            model: ModelConfig::default(),
            escrow: EscrowConfig::default(),
        }
    }
}

impl MarketConfig {
    pub fn validate(&self) -> MarketResult<()> {
        if self.verifiers.kind != PoolKind::Verifiers
            || self.gossipers.kind != PoolKind::Gossipers
        {
            return Err(MarketError::InvalidConfig("pool sections have the wrong kind".into()));
        }
        self.verifiers.validate()?;
        self.gossipers.validate()?;

        if self.model.min_model_stake == 0 {
            return Err(MarketError::InvalidConfig("min_model_stake must be positive".into()));
        }
        if self.model.max_committee_attempts == 0 {
            return Err(MarketError::InvalidConfig(
                "max_committee_attempts must be at least 1".into(),
            ));
        }
        if self.escrow.min_wall_time == 0 {
            return Err(MarketError::InvalidConfig("min_wall_time must be positive".into()));
        }

        let accounts = [
            self.token.genesis_account,
            self.custody,
            self.escrow_account,
            self.treasury,
        ];
        for (i, a) in accounts.iter().enumerate() {
            if accounts[i + 1..].contains(a) {
                return Err(MarketError::InvalidConfig(format!("account {} used for two roles", a)));
            }
        }
        Ok(())
    }
}
