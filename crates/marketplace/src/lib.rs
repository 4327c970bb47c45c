// marketplace/src/lib.rs

//! Model marketplace built on the staked committee pools
//!
//! This crate wires the pieces a job needs:
//! - A payment escrow holding the data scientist's price until the verdict
//! - The model lifecycle, from the owner's stake through committee formation
//!   to resolution or cancellation
//! - A `Market` facade owning the token ledger, stake ledger and both pools

pub mod config;
pub mod escrow;
pub mod market;
pub mod model;

pub use config::{EscrowConfig, MarketConfig, TokenConfig};
pub use escrow::{Escrow, Payment, PaymentEscrow, PaymentStatus};
pub use market::Market;
pub use model::{
    MarketContext, Model, ModelConfig, ModelLifecycle, ModelResolution, ModelStatus, ModelVerdict,
};

use market_core::{Amount, CoreError, JobId, Timestamp};
use market_crypto::Address;
use staking::StakingError;

/// Result type for marketplace operations
pub type MarketResult<T> = Result<T, MarketError>;

/// Errors that can occur in marketplace operations
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("Model {0} already exists")]
    DuplicateModel(JobId),

    #[error("Model {0} not found")]
    ModelNotFound(JobId),

    #[error("Model {model_id} is {actual}, expected {expected}")]
    InvalidModelStatus {
        model_id: JobId,
        expected: String,
        actual: ModelStatus,
    },

    #[error("Invalid model parameters: {0}")]
    InvalidModel(String),

    #[error("Caller {caller} is not allowed to {action}")]
    Unauthorized { caller: Address, action: String },

    #[error("Payment for {0} already locked")]
    EscrowExists(JobId),

    #[error("No payment for {0}")]
    EscrowNotFound(JobId),

    #[error("Payment for {job} is {status}, not locked")]
    EscrowNotLocked { job: JobId, status: PaymentStatus },

    #[error("Wall time {provided}s below minimum {min}s")]
    WallTimeTooShort { min: Timestamp, provided: Timestamp },

    #[error("Payment for {job} locked until {expires_at}")]
    EscrowNotExpired { job: JobId, expires_at: Timestamp },

    #[error("Invalid payment amount: {0}")]
    InvalidAmount(Amount),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Staking error: {0}")]
    Staking(#[from] StakingError),

    #[error("Ledger error: {0}")]
    Core(#[from] CoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MarketError::WallTimeTooShort { min: 300, provided: 60 };
        assert_eq!(err.to_string(), "Wall time 60s below minimum 300s");

        let err: MarketError = StakingError::PhaseViolation("late".into()).into();
        assert!(matches!(err, MarketError::Staking(_)));
    }
}
