// staking/src/selection.rs

use crate::{StakingError, StakingResult};
use market_core::{JobId, PoolKind};
use market_crypto::{hash::hash_parts, Address, Hash};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const INVITE_DOMAIN: &str = "committee-market/invite";

/// Committee selector driven by a session seed.
///
/// Anyone holding the seed and the candidate list can replay the draw.
pub struct CommitteeSelector {
    rng: StdRng,
}

impl CommitteeSelector {
    /// Create a selector from a 32-byte seed
    pub fn from_seed(seed: &Hash) -> Self {
        Self {
            rng: StdRng::from_seed(seed.to_bytes()),
        }
    }

    /// Draw `k` distinct members.
    ///
    /// Candidates are sorted by address first so the outcome depends only on
    /// the set, never on the order it was listed in.
    pub fn select(&mut self, candidates: &[Address], k: usize) -> StakingResult<Vec<Address>> {
        if k == 0 {
            return Err(StakingError::InvalidCommitteeBounds(
                "committee size must be positive".into(),
            ));
        }
        let mut pool = candidates.to_vec();
        pool.sort();
        pool.dedup();
        if pool.len() < k {
            return Err(StakingError::InvalidCommitteeBounds(format!(
                "cannot draw {} members from {} candidates",
                k,
                pool.len()
            )));
        }

        pool.shuffle(&mut self.rng);
        pool.truncate(k);
        Ok(pool)
    }
}

/// Draw a committee of `k` from `candidates` using `seed`
pub fn select_committee(
    candidates: &[Address],
    seed: &Hash,
    k: usize,
) -> StakingResult<Vec<Address>> {
    CommitteeSelector::from_seed(seed).select(candidates, k)
}

/// Who gets invited to a session.
///
/// Everyone eligible when they fit under `cap`. Otherwise a shuffle seeded by
/// the job, the pool and the eligible list picks `cap` of them, returned in
/// registration order.
pub fn invitation_set(
    eligible: &[Address],
    cap: usize,
    job: &JobId,
    pool: PoolKind,
) -> Vec<Address> {
    if eligible.len() <= cap {
        return eligible.to_vec();
    }

    let mut parts: Vec<&[u8]> = Vec::with_capacity(eligible.len() + 2);
    parts.push(job.as_bytes());
    parts.push(pool.as_str().as_bytes());
    parts.extend(eligible.iter().map(|a| a.as_bytes().as_slice()));
    let seed = hash_parts(INVITE_DOMAIN, &parts);

    let mut rng = StdRng::from_seed(seed.to_bytes());
    let mut indices: Vec<usize> = (0..eligible.len()).collect();
    indices.shuffle(&mut rng);
    indices.truncate(cap);
    indices.sort_unstable();

    indices.into_iter().map(|i| eligible[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn candidates(n: usize) -> Vec<Address> {
        (0..n).map(|i| Address::from_name(&format!("gossiper-{}", i))).collect()
    }

    #[test]
    fn test_committee_selection() {
        let seed = Hash::of_label("seed");
        let committee = select_committee(&candidates(10), &seed, 5).unwrap();
        assert_eq!(committee.len(), 5);

        // Check no duplicates
        let unique: HashSet<_> = committee.iter().collect();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_deterministic_selection() {
        let seed = Hash::of_label("seed");
        let a = select_committee(&candidates(8), &seed, 3).unwrap();
        let b = select_committee(&candidates(8), &seed, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_listing_order_irrelevant() {
        let seed = Hash::of_label("seed");
        let mut reversed = candidates(8);
        reversed.reverse();
        assert_eq!(
            select_committee(&candidates(8), &seed, 4).unwrap(),
            select_committee(&reversed, &seed, 4).unwrap()
        );
    }

    #[test]
    fn test_seed_changes_committee() {
        let pool = candidates(20);
        let draws: HashSet<Vec<Address>> = (0..8)
            .map(|i| select_committee(&pool, &Hash::of_label(&format!("seed-{}", i)), 3).unwrap())
            .collect();
        assert!(draws.len() > 1);
    }

    #[test]
    fn test_invalid_sizes() {
        let seed = Hash::of_label("seed");
        assert!(select_committee(&candidates(2), &seed, 3).is_err());
        assert!(select_committee(&candidates(2), &seed, 0).is_err());
    }

    #[test]
    fn test_invitation_under_cap() {
        let eligible = candidates(4);
        let invited = invitation_set(&eligible, 6, &Hash::of_label("job"), PoolKind::Verifiers);
        assert_eq!(invited, eligible);
    }

    #[test]
    fn test_invitation_over_cap() {
        let eligible = candidates(12);
        let job = Hash::of_label("job");
        let invited = invitation_set(&eligible, 5, &job, PoolKind::Verifiers);
        assert_eq!(invited.len(), 5);

        // Registration order preserved
        let positions: Vec<_> = invited
            .iter()
            .map(|a| eligible.iter().position(|e| e == a).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        assert_eq!(invited, invitation_set(&eligible, 5, &job, PoolKind::Verifiers));
    }
}
