// staking/src/slashing.rs

use market_core::{Amount, BasisPoints, JobId, PoolKind, SlotCount};
use market_crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Why collateral was forfeited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlashReason {
    /// Committed to a session but never revealed
    NonResponsive,
    /// Flagged by the job's verdict
    Dishonest,
}

impl SlashReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlashReason::NonResponsive => "non_responsive",
            SlashReason::Dishonest => "dishonest",
        }
    }
}

/// One executed slash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlashRecord {
    pub actor: Address,
    pub pool: PoolKind,
    pub job: JobId,
    pub reason: SlashReason,
    pub amount: Amount,
    pub slots: SlotCount,
    /// Offense count at time of slashing
    pub previous_offenses: u32,
}

/// Where slashed collateral goes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlashingDistribution {
    /// Treasury share, including rounding dust
    pub treasury: Amount,
    /// Equal share per honest member
    pub members: Vec<(Address, Amount)>,
}

impl SlashingDistribution {
    /// Split `amount` between the treasury and the honest members.
    ///
    /// The treasury takes `treasury_share_bps` of it plus whatever does not
    /// divide evenly between members. With no honest member it takes all.
    pub fn split(amount: &Amount, honest: &[Address], treasury_share_bps: BasisPoints) -> Self {
        if honest.is_empty() {
            return Self { treasury: amount.clone(), members: Vec::new() };
        }

        let treasury_share = amount.basis_points(treasury_share_bps);
        let pot = amount.checked_sub(&treasury_share).unwrap_or_else(Amount::zero);
        let count = honest.len() as u64;
        let each = pot.checked_div_u64(count).unwrap_or_else(Amount::zero);
        let dust = pot.checked_sub(&each.mul_u64(count)).unwrap_or_else(Amount::zero);

        Self {
            treasury: treasury_share + dust,
            members: honest.iter().map(|m| (*m, each.clone())).collect(),
        }
    }

    /// Flatten into transfers, treasury first
    pub fn payouts(&self, treasury: &Address) -> Vec<(Address, Amount)> {
        std::iter::once((*treasury, self.treasury.clone()))
            .chain(self.members.iter().cloned())
            .collect()
    }

    pub fn total(&self) -> Amount {
        self.members
            .iter()
            .fold(self.treasury.clone(), |acc, (_, a)| acc + a.clone())
    }
}

/// Slashing bookkeeping for one pool
#[derive(Debug, Clone, Default)]
pub struct SlashingManager {
    /// Slashing events history
    history: Vec<SlashRecord>,
    /// Offense count per actor
    offense_count: HashMap<Address, u32>,
    /// Total slashed amount
    total_slashed: Amount,
    /// Total paid to the treasury
    total_to_treasury: Amount,
}

impl SlashingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an executed slash and its distribution
    pub fn record(
        &mut self,
        actor: Address,
        pool: PoolKind,
        job: JobId,
        reason: SlashReason,
        slots: SlotCount,
        distribution: &SlashingDistribution,
    ) -> SlashRecord {
        let record = SlashRecord {
            actor,
            pool,
            job,
            reason,
            amount: distribution.total(),
            slots,
            previous_offenses: self.offense_count(&actor),
        };

        self.total_slashed = self.total_slashed.clone() + record.amount.clone();
        self.total_to_treasury = self.total_to_treasury.clone() + distribution.treasury.clone();
        *self.offense_count.entry(actor).or_insert(0) += 1;
        self.history.push(record.clone());

        record
    }

    pub fn offense_count(&self, actor: &Address) -> u32 {
        self.offense_count.get(actor).copied().unwrap_or(0)
    }

    pub fn actor_history(&self, actor: &Address) -> Vec<&SlashRecord> {
        self.history.iter().filter(|r| r.actor == *actor).collect()
    }

    pub fn job_history(&self, job: &JobId) -> Vec<&SlashRecord> {
        self.history.iter().filter(|r| r.job == *job).collect()
    }

    pub fn total_slashed(&self) -> &Amount {
        &self.total_slashed
    }

    pub fn total_to_treasury(&self) -> &Amount {
        &self.total_to_treasury
    }

    pub fn all_slashing_events(&self) -> &[SlashRecord] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_crypto::Hash;

    fn members(n: usize) -> Vec<Address> {
        (0..n).map(|i| Address::from_name(&format!("member-{}", i))).collect()
    }

    #[test]
    fn test_distribution() {
        let dist = SlashingDistribution::split(&Amount::from_u64(100), &members(2), 5000);
        assert_eq!(dist.treasury, Amount::from_u64(50));
        assert_eq!(dist.members.len(), 2);
        assert!(dist.members.iter().all(|(_, a)| *a == Amount::from_u64(25)));
        assert_eq!(dist.total(), Amount::from_u64(100));
    }

    #[test]
    fn test_dust_goes_to_treasury() {
        let dist = SlashingDistribution::split(&Amount::from_u64(100), &members(3), 5000);
        // 50 to split three ways: 16 each, 2 left over
        assert_eq!(dist.treasury, Amount::from_u64(52));
        assert!(dist.members.iter().all(|(_, a)| *a == Amount::from_u64(16)));
        assert_eq!(dist.total(), Amount::from_u64(100));
    }

    #[test]
    fn test_no_honest_members() {
        let dist = SlashingDistribution::split(&Amount::from_u64(100), &[], 1000);
        assert_eq!(dist.treasury, Amount::from_u64(100));
        assert!(dist.members.is_empty());
    }

    #[test]
    fn test_payouts_sum() {
        let treasury = Address::from_name("treasury");
        let dist = SlashingDistribution::split(&Amount::from_u64(77), &members(4), 2500);
        let payouts = dist.payouts(&treasury);
        assert_eq!(payouts[0].0, treasury);
        let sum = payouts.iter().fold(Amount::zero(), |acc, (_, a)| acc + a.clone());
        assert_eq!(sum, Amount::from_u64(77));
    }

    #[test]
    fn test_repeat_offender() {
        let mut manager = SlashingManager::new();
        let actor = Address::from_name("offender");
        let dist = SlashingDistribution::split(&Amount::from_u64(100), &members(1), 5000);

        let first = manager.record(actor, PoolKind::Verifiers, Hash::of_label("a"), SlashReason::NonResponsive, 1, &dist);
        let second = manager.record(actor, PoolKind::Verifiers, Hash::of_label("b"), SlashReason::Dishonest, 1, &dist);

        assert_eq!(first.previous_offenses, 0);
        assert_eq!(second.previous_offenses, 1);
        assert_eq!(manager.offense_count(&actor), 2);
        assert_eq!(manager.total_slashed(), &Amount::from_u64(200));
        assert_eq!(manager.total_to_treasury(), &Amount::from_u64(100));
        assert_eq!(manager.actor_history(&actor).len(), 2);
        assert_eq!(manager.job_history(&Hash::of_label("a")).len(), 1);
    }
}
