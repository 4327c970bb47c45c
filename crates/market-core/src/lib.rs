// market-core/src/lib.rs

//! Core data types shared by the committee market
//!
//! This crate provides:
//! - Token amounts, timestamps and identifiers
//! - The fungible-token ledger interface and an in-memory ledger
//! - Audit events emitted by every state-changing operation

pub mod events;
pub mod token;
pub mod types;

pub use events::{EventLog, MarketEvent};
pub use token::{FungibleLedger, TokenLedger};
pub use types::*;

use market_crypto::Address;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the token ledger and shared types
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Insufficient balance: {account} holds {available}, needs {required}")]
    InsufficientBalance {
        account: Address,
        required: Amount,
        available: Amount,
    },

    #[error("Insufficient allowance: {spender} may move {available} from {owner}, needs {required}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        required: Amount,
        available: Amount,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(#[from] market_crypto::CryptoError),
}
