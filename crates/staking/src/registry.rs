// staking/src/registry.rs

use crate::{ledger::StakeLedger, StakingError, StakingResult};
use market_core::{Amount, FungibleLedger, PoolKind, SlotCount, StakeScope};
use market_crypto::Address;
use serde::{Deserialize, Serialize};

/// Membership of one actor pool.
///
/// Stake itself lives in the [`StakeLedger`]; the registry enforces the
/// pool's admission policy and remembers registration order, which is the
/// canonical order candidates are listed in for selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRegistry {
    pool: PoolKind,
    /// Minimum total stake to be admitted
    min_stake: Amount,
    /// Free slots an actor needs to be invited into a session
    slots_per_member: SlotCount,
    /// Registration order
    members: Vec<Address>,
}

impl ActorRegistry {
    pub fn new(pool: PoolKind, min_stake: Amount, slots_per_member: SlotCount) -> Self {
        Self {
            pool,
            min_stake,
            slots_per_member: slots_per_member.max(1),
            members: Vec::new(),
        }
    }

    pub fn pool(&self) -> PoolKind {
        self.pool
    }

    pub fn scope(&self) -> StakeScope {
        StakeScope::Pool(self.pool)
    }

    pub fn min_stake(&self) -> &Amount {
        &self.min_stake
    }

    /// Members in registration order, including any not yet pruned
    pub fn members(&self) -> &[Address] {
        &self.members
    }

    /// Stake `amount_per_slot * slots` and join the pool.
    ///
    /// The actor approves the ledger's custody address for the total first.
    /// Returns the total locked.
    pub fn register<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        actor: &Address,
        amount_per_slot: &Amount,
        slots: SlotCount,
    ) -> StakingResult<Amount> {
        let total = amount_per_slot.mul_u64(u64::from(slots));
        if slots == 0 || amount_per_slot.is_zero() {
            return Err(StakingError::InvalidSlotConfig { amount: total, slots });
        }
        if total < self.min_stake {
            return Err(StakingError::BelowMinimumStake {
                required: self.min_stake.clone(),
                provided: total,
            });
        }
        if ledger.holds_slots(actor, self.scope()) {
            return Err(StakingError::AlreadyRegistered { actor: *actor, scope: self.scope() });
        }

        ledger.lock(token, actor, self.scope(), &total, slots)?;

        // A member slashed down to nothing may come back
        self.members.retain(|m| m != actor);
        self.members.push(*actor);

        Ok(total)
    }

    /// Leave the pool, returning all collateral
    pub fn deregister<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        actor: &Address,
    ) -> StakingResult<Amount> {
        let refunded = ledger.release(token, actor, self.scope())?;
        self.members.retain(|m| m != actor);
        Ok(refunded)
    }

    /// True iff the actor holds at least one slot, free or committed
    pub fn is_registered(&self, ledger: &StakeLedger, actor: &Address) -> bool {
        ledger.holds_slots(actor, self.scope())
    }

    /// Members with enough free slots to be invited, in registration order
    pub fn eligible_set(&self, ledger: &StakeLedger) -> Vec<Address> {
        self.members
            .iter()
            .filter(|m| ledger.free_slots(m, self.scope()) >= self.slots_per_member)
            .copied()
            .collect()
    }

    /// Forget members whose stake was slashed away entirely
    pub fn prune(&mut self, ledger: &StakeLedger) -> Vec<Address> {
        let scope = self.scope();
        let (kept, gone): (Vec<_>, Vec<_>) = std::mem::take(&mut self.members)
            .into_iter()
            .partition(|m| ledger.holds_slots(m, scope));
        self.members = kept;
        gone
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::TokenLedger;
    use market_crypto::Hash;

    fn setup(actors: &[&str]) -> (TokenLedger, StakeLedger, Vec<Address>) {
        let genesis = Address::from_name("genesis");
        let mut token = TokenLedger::with_genesis(genesis, Amount::from_u64(1_000_000));
        let ledger = StakeLedger::new(Address::from_name("custody"));
        let addrs: Vec<_> = actors.iter().map(|a| Address::from_name(a)).collect();
        for a in &addrs {
            token.transfer(&genesis, a, &Amount::from_u64(1_000)).unwrap();
            token.approve(a, &ledger.custody(), &Amount::from_u64(1_000)).unwrap();
        }
        (token, ledger, addrs)
    }

    #[test]
    fn test_register_and_deregister() {
        let (mut token, mut ledger, actors) = setup(&["g1", "g2", "g3"]);
        let mut registry = ActorRegistry::new(PoolKind::Gossipers, Amount::from_u64(10), 1);

        for a in &actors {
            registry.register(&mut ledger, &mut token, a, &Amount::from_u64(100), 1).unwrap();
            assert!(registry.is_registered(&ledger, a));
        }
        assert_eq!(registry.eligible_set(&ledger), actors);

        for a in &actors {
            registry.deregister(&mut ledger, &mut token, a).unwrap();
            assert!(!registry.is_registered(&ledger, a));
            assert_eq!(token.balance_of(a), Amount::from_u64(1_000));
        }
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_below_minimum_stake() {
        let (mut token, mut ledger, actors) = setup(&["v1"]);
        let mut registry = ActorRegistry::new(PoolKind::Verifiers, Amount::from_u64(500), 1);

        let err = registry
            .register(&mut ledger, &mut token, &actors[0], &Amount::from_u64(100), 4)
            .unwrap_err();
        assert!(matches!(err, StakingError::BelowMinimumStake { .. }));
        assert!(!registry.is_registered(&ledger, &actors[0]));

        registry.register(&mut ledger, &mut token, &actors[0], &Amount::from_u64(100), 5).unwrap();
        assert_eq!(ledger.slot_count(&actors[0], registry.scope()), 5);
    }

    #[test]
    fn test_already_registered() {
        let (mut token, mut ledger, actors) = setup(&["v1"]);
        let mut registry = ActorRegistry::new(PoolKind::Verifiers, Amount::from_u64(10), 1);

        registry.register(&mut ledger, &mut token, &actors[0], &Amount::from_u64(100), 1).unwrap();
        let err = registry
            .register(&mut ledger, &mut token, &actors[0], &Amount::from_u64(100), 1)
            .unwrap_err();
        assert!(matches!(err, StakingError::AlreadyRegistered { .. }));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_deregister_while_committed() {
        let (mut token, mut ledger, actors) = setup(&["v1"]);
        let mut registry = ActorRegistry::new(PoolKind::Verifiers, Amount::from_u64(10), 1);
        let job = Hash::of_label("job");
        registry.register(&mut ledger, &mut token, &actors[0], &Amount::from_u64(100), 1).unwrap();
        ledger.commit(&actors[0], registry.scope(), &job, 1).unwrap();

        let err = registry.deregister(&mut ledger, &mut token, &actors[0]).unwrap_err();
        assert!(matches!(err, StakingError::ActiveCommitment { .. }));
        assert!(registry.is_registered(&ledger, &actors[0]));
        assert!(registry.eligible_set(&ledger).is_empty());
    }

    #[test]
    fn test_prune_after_full_slash() {
        let (mut token, mut ledger, actors) = setup(&["v1", "v2"]);
        let mut registry = ActorRegistry::new(PoolKind::Verifiers, Amount::from_u64(10), 1);
        let job = Hash::of_label("job");
        let treasury = Address::from_name("treasury");
        for a in &actors {
            registry.register(&mut ledger, &mut token, a, &Amount::from_u64(100), 1).unwrap();
        }
        ledger.commit(&actors[0], registry.scope(), &job, 1).unwrap();
        ledger
            .slash(&mut token, &actors[0], registry.scope(), &job, 1, &[(treasury, Amount::from_u64(100))])
            .unwrap();

        assert_eq!(registry.prune(&ledger), vec![actors[0]]);
        assert_eq!(registry.members(), &actors[1..]);
    }
}
