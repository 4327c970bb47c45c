// market-core/src/types.rs

use market_crypto::Hash;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Timestamp in Unix epoch seconds
pub type Timestamp = u64;

/// Number of stake slots
pub type SlotCount = u32;

/// Basis points (0-10000)
pub type BasisPoints = u16;

/// Identifier of a job (the model being trained/verified)
pub type JobId = Hash;

/// Identifier of the data asset a model is trained on
pub type AssetId = Hash;

/// Token amount (using BigUint for arbitrary precision)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(BigUint);

impl Amount {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    pub fn inner(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Lossy view for logs and configs; `None` above `u64::MAX`
    pub fn to_u64(&self) -> Option<u64> {
        self.0.to_u64()
    }

    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        Some(Amount(&self.0 + &other.0))
    }

    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.0 < other.0 {
            None
        } else {
            Some(Amount(&self.0 - &other.0))
        }
    }

    pub fn mul_u64(&self, factor: u64) -> Amount {
        Amount(&self.0 * factor)
    }

    /// Integer division; `None` when dividing by zero
    pub fn checked_div_u64(&self, divisor: u64) -> Option<Amount> {
        if divisor == 0 {
            None
        } else {
            Some(Amount(&self.0 / divisor))
        }
    }

    /// Remainder of division; `None` when dividing by zero
    pub fn checked_rem_u64(&self, divisor: u64) -> Option<Amount> {
        if divisor == 0 {
            None
        } else {
            Some(Amount(&self.0 % divisor))
        }
    }

    /// `self * bps / 10000`, rounded down
    pub fn basis_points(&self, bps: BasisPoints) -> Amount {
        Amount((&self.0 * u64::from(bps.min(10_000))) / 10_000u64)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, other: Amount) -> Amount {
        Amount(self.0 + other.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Amount {
    fn default() -> Self {
        Amount::zero()
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

/// The two actor classes that stake into committee pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// Check correctness of a submitted model
    Verifiers,
    /// Relay and attest availability of results
    Gossipers,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::Verifiers => "verifiers",
            PoolKind::Gossipers => "gossipers",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stake is locked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StakeScope {
    /// Eligibility collateral in an actor pool
    Pool(PoolKind),
    /// A data owner's stake backing one model
    Model(JobId),
}

impl fmt::Display for StakeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StakeScope::Pool(kind) => write!(f, "pool:{}", kind),
            StakeScope::Model(id) => write!(f, "model:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_arithmetic() {
        let a = Amount::from_u64(100);
        let b = Amount::from_u64(50);

        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum, Amount::from_u64(150));

        let diff = sum.checked_sub(&b).unwrap();
        assert_eq!(diff, Amount::from_u64(100));
    }

    #[test]
    fn test_amount_underflow() {
        let a = Amount::from_u64(50);
        let b = Amount::from_u64(100);

        assert!(a.checked_sub(&b).is_none());
    }

    mod prop {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            /// Subtraction never wraps or panics, it refuses
            #[test]
            fn prop_checked_sub_matches_u64(a in any::<u64>(), b in any::<u64>()) {
                let diff = Amount::from_u64(a).checked_sub(&Amount::from_u64(b));
                prop_assert_eq!(diff, a.checked_sub(b).map(Amount::from_u64));
            }
        }
    }

    #[test]
    fn test_division_helpers() {
        let a = Amount::from_u64(250);
        assert_eq!(a.checked_div_u64(100), Some(Amount::from_u64(2)));
        assert_eq!(a.checked_rem_u64(100), Some(Amount::from_u64(50)));
        assert!(a.checked_div_u64(0).is_none());
        assert_eq!(a.mul_u64(2), Amount::from_u64(500));
    }

    #[test]
    fn test_basis_points() {
        let a = Amount::from_u64(1000);
        assert_eq!(a.basis_points(5000), Amount::from_u64(500));
        assert_eq!(a.basis_points(20_000), Amount::from_u64(1000));
        assert_eq!(Amount::from_u64(3).basis_points(5000), Amount::from_u64(1));
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(StakeScope::Pool(PoolKind::Gossipers).to_string(), "pool:gossipers");
    }
}
