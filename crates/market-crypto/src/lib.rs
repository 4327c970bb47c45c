// market-crypto/src/lib.rs

//! Cryptographic primitives for the staked committee market
//!
//! This crate provides:
//! - Hashing functions (Keccak-256, SHA256, Blake3)
//! - Account addresses
//! - Hash commitments used by the commit-reveal protocol

pub mod address;
pub mod commitment;
pub mod hash;

pub use address::Address;
pub use commitment::{commitment_of, verify_commitment, Salt, Secret, SALT_SIZE};
pub use hash::{Hash, HashAlgorithm, Hashable};

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid hash")]
    InvalidHash,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid salt: {0}")]
    InvalidSalt(String),

    #[error("Invalid secret: {0}")]
    InvalidSecret(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
