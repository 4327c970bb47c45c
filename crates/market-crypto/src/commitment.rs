// market-crypto/src/commitment.rs

//! Hash commitments for the commit-reveal protocol.
//!
//! A participant first publishes `commitment_of(secret, salt)` and later
//! discloses `(secret, salt)`. The salt keeps low-entropy secrets from being
//! brute-forced out of the published commitment.

use crate::{hash::Hashable, CryptoError, CryptoResult, Hash};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Salt size in bytes
pub const SALT_SIZE: usize = 32;

/// Secret size in bytes
pub const SECRET_SIZE: usize = 32;

const COMMITMENT_DOMAIN: &[u8] = b"committee-market/commitment/v1";

/// Random value a participant contributes to a session
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret([u8; SECRET_SIZE]);

impl Secret {
    pub fn new(bytes: [u8; SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; SECRET_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; SECRET_SIZE] = slice.try_into().map_err(|_| {
            CryptoError::InvalidSecret(format!(
                "expected {} bytes, got {}",
                SECRET_SIZE,
                slice.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

/// Blinding salt. Must carry enough entropy, see [`Salt::new`].
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Accept caller-provided salt bytes.
    ///
    /// Rejects salts made of a single repeated byte (including all zeroes),
    /// which is what a forgotten initialisation looks like.
    pub fn new(bytes: [u8; SALT_SIZE]) -> CryptoResult<Self> {
        if bytes.iter().all(|b| *b == bytes[0]) {
            return Err(CryptoError::InvalidSalt("salt has no entropy".into()));
        }
        Ok(Self(bytes))
    }

    pub fn random() -> Self {
        loop {
            let mut bytes = [0u8; SALT_SIZE];
            OsRng.fill_bytes(&mut bytes);
            if let Ok(salt) = Self::new(bytes) {
                return salt;
            }
        }
    }

    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; SALT_SIZE] = slice.try_into().map_err(|_| {
            CryptoError::InvalidSalt(format!("expected {} bytes, got {}", SALT_SIZE, slice.len()))
        })?;
        Self::new(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({}...)", hex::encode(&self.0[..4]))
    }
}

/// Commitment binding `secret` under `salt`
pub fn commitment_of(secret: &Secret, salt: &Salt) -> Hash {
    let mut preimage = Vec::with_capacity(COMMITMENT_DOMAIN.len() + SECRET_SIZE + SALT_SIZE);
    preimage.extend_from_slice(COMMITMENT_DOMAIN);
    preimage.extend_from_slice(secret.as_bytes());
    preimage.extend_from_slice(salt.as_bytes());
    preimage.hash()
}

/// Check a disclosed `(secret, salt)` pair against a stored commitment
pub fn verify_commitment(commitment: &Hash, secret: &Secret, salt: &Salt) -> bool {
    commitment_of(secret, salt) == *commitment
}
