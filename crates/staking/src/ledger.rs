// staking/src/ledger.rs

use crate::{StakingError, StakingResult};
use market_core::{Amount, FungibleLedger, JobId, SlotCount, StakeScope};
use market_crypto::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a slot counts towards eligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Free,
    /// Held for a job until it resolves
    Committed(JobId),
}

/// One indivisible unit of locked collateral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeSlot {
    pub amount: Amount,
    pub state: SlotState,
}

impl StakeSlot {
    pub fn is_free(&self) -> bool {
        matches!(self.state, SlotState::Free)
    }

    pub fn is_committed_to(&self, job: &JobId) -> bool {
        matches!(self.state, SlotState::Committed(j) if j == *job)
    }
}

/// Collateral an actor holds in one scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRecord {
    /// Amount declared per slot
    pub per_slot: Amount,
    /// Total staked, always equal to the sum of slot amounts
    pub staked: Amount,
    pub slots: Vec<StakeSlot>,
}

impl StakeRecord {
    fn new(per_slot: Amount, slots: SlotCount) -> Self {
        let slots: Vec<_> = (0..slots)
            .map(|_| StakeSlot { amount: per_slot.clone(), state: SlotState::Free })
            .collect();
        Self {
            staked: per_slot.mul_u64(slots.len() as u64),
            per_slot,
            slots,
        }
    }

    pub fn slot_count(&self) -> SlotCount {
        self.slots.len() as SlotCount
    }

    pub fn free_slots(&self) -> SlotCount {
        self.slots.iter().filter(|s| s.is_free()).count() as SlotCount
    }

    pub fn committed_slots(&self) -> SlotCount {
        self.slot_count() - self.free_slots()
    }

    pub fn committed_to(&self, job: &JobId) -> SlotCount {
        self.slots.iter().filter(|s| s.is_committed_to(job)).count() as SlotCount
    }

    /// `sum(slot amounts) == staked == per_slot * slots`
    pub fn is_consistent(&self) -> bool {
        let sum = self
            .slots
            .iter()
            .fold(Amount::zero(), |acc, s| acc + s.amount.clone());
        !self.slots.is_empty()
            && sum == self.staked
            && self.per_slot.mul_u64(self.slots.len() as u64) == self.staked
    }
}

/// Custody of all staked collateral, keyed by scope and actor.
///
/// Operations validate everything they depend on before touching the token
/// ledger or the slot store, so a failed call changes nothing.
#[derive(Debug, Clone)]
pub struct StakeLedger {
    custody: Address,
    records: BTreeMap<(StakeScope, Address), StakeRecord>,
    total_custody: Amount,
}

impl StakeLedger {
    /// Create a ledger whose collateral is held by `custody`
    pub fn new(custody: Address) -> Self {
        Self {
            custody,
            records: BTreeMap::new(),
            total_custody: Amount::zero(),
        }
    }

    /// Address actors approve before staking
    pub fn custody(&self) -> Address {
        self.custody
    }

    pub fn total_custody(&self) -> &Amount {
        &self.total_custody
    }

    pub fn record(&self, actor: &Address, scope: StakeScope) -> Option<&StakeRecord> {
        self.records.get(&(scope, *actor))
    }

    pub fn holds_slots(&self, actor: &Address, scope: StakeScope) -> bool {
        self.record(actor, scope).is_some()
    }

    pub fn staked_amount(&self, actor: &Address, scope: StakeScope) -> Amount {
        self.record(actor, scope)
            .map(|r| r.staked.clone())
            .unwrap_or_else(Amount::zero)
    }

    pub fn slot_count(&self, actor: &Address, scope: StakeScope) -> SlotCount {
        self.record(actor, scope).map(|r| r.slot_count()).unwrap_or(0)
    }

    pub fn free_slots(&self, actor: &Address, scope: StakeScope) -> SlotCount {
        self.record(actor, scope).map(|r| r.free_slots()).unwrap_or(0)
    }

    pub fn committed_slots(&self, actor: &Address, scope: StakeScope) -> SlotCount {
        self.record(actor, scope).map(|r| r.committed_slots()).unwrap_or(0)
    }

    pub fn committed_to(&self, actor: &Address, scope: StakeScope, job: &JobId) -> SlotCount {
        self.record(actor, scope).map(|r| r.committed_to(job)).unwrap_or(0)
    }

    /// Actors with a record in `scope`, ordered by address
    pub fn actors_in(&self, scope: StakeScope) -> Vec<Address> {
        self.records
            .keys()
            .filter(|(s, _)| *s == scope)
            .map(|(_, a)| *a)
            .collect()
    }

    /// Lock `amount` from `actor` into `slots` equal free slots.
    ///
    /// The actor must have approved the custody address for at least
    /// `amount` beforehand.
    pub fn lock<L: FungibleLedger>(
        &mut self,
        token: &mut L,
        actor: &Address,
        scope: StakeScope,
        amount: &Amount,
        slots: SlotCount,
    ) -> StakingResult<()> {
        let invalid = || StakingError::InvalidSlotConfig { amount: amount.clone(), slots };
        if slots == 0 || amount.is_zero() {
            return Err(invalid());
        }
        let remainder = amount.checked_rem_u64(u64::from(slots)).ok_or_else(invalid)?;
        if !remainder.is_zero() {
            return Err(invalid());
        }
        if self.records.contains_key(&(scope, *actor)) {
            return Err(StakingError::AlreadyRegistered { actor: *actor, scope });
        }
        let approved = token.allowance(actor, &self.custody);
        if approved < *amount {
            return Err(StakingError::InsufficientApproval {
                actor: *actor,
                required: amount.clone(),
                approved,
            });
        }

        token.transfer_from(&self.custody, actor, &self.custody, amount)?;

        let per_slot = amount.checked_div_u64(u64::from(slots)).ok_or_else(invalid)?;
        self.records.insert((scope, *actor), StakeRecord::new(per_slot, slots));
        self.total_custody = self.total_custody.clone() + amount.clone();

        tracing::debug!(%actor, %scope, %amount, slots, "stake locked");
        Ok(())
    }

    /// Return all of an actor's collateral in `scope`; every slot must be free
    pub fn release<L: FungibleLedger>(
        &mut self,
        token: &mut L,
        actor: &Address,
        scope: StakeScope,
    ) -> StakingResult<Amount> {
        let record = self
            .records
            .get(&(scope, *actor))
            .ok_or(StakingError::NotRegistered { actor: *actor, scope })?;
        let committed = record.committed_slots();
        if committed > 0 {
            return Err(StakingError::ActiveCommitment { actor: *actor, scope, committed });
        }
        let amount = record.staked.clone();

        token.transfer(&self.custody, actor, &amount)?;

        self.records.remove(&(scope, *actor));
        self.total_custody = self
            .total_custody
            .checked_sub(&amount)
            .unwrap_or_else(Amount::zero);

        tracing::debug!(%actor, %scope, %amount, "stake released");
        Ok(amount)
    }

    /// Mark `n` free slots as committed to `job`
    pub fn commit(
        &mut self,
        actor: &Address,
        scope: StakeScope,
        job: &JobId,
        n: SlotCount,
    ) -> StakingResult<()> {
        let record = self
            .records
            .get_mut(&(scope, *actor))
            .ok_or(StakingError::NotRegistered { actor: *actor, scope })?;
        let available = record.free_slots();
        if available < n {
            return Err(StakingError::InsufficientFreeSlots {
                actor: *actor,
                required: n,
                available,
            });
        }

        record
            .slots
            .iter_mut()
            .filter(|s| s.is_free())
            .take(n as usize)
            .for_each(|s| s.state = SlotState::Committed(*job));
        Ok(())
    }

    /// Free `n` slots previously committed to `job`
    pub fn uncommit(
        &mut self,
        actor: &Address,
        scope: StakeScope,
        job: &JobId,
        n: SlotCount,
    ) -> StakingResult<()> {
        let record = self
            .records
            .get_mut(&(scope, *actor))
            .ok_or(StakingError::NotRegistered { actor: *actor, scope })?;
        let held = record.committed_to(job);
        if held < n {
            return Err(StakingError::NotCommitted { actor: *actor, job: *job, required: n, held });
        }

        record
            .slots
            .iter_mut()
            .filter(|s| s.is_committed_to(job))
            .take(n as usize)
            .for_each(|s| s.state = SlotState::Free);
        Ok(())
    }

    /// Collateral `n` of the actor's slots committed to `job` are worth
    pub fn slashable_amount(
        &self,
        actor: &Address,
        scope: StakeScope,
        job: &JobId,
        n: SlotCount,
    ) -> StakingResult<Amount> {
        let record = self
            .record(actor, scope)
            .ok_or(StakingError::NotRegistered { actor: *actor, scope })?;
        let held = record.committed_to(job);
        if held < n {
            return Err(StakingError::NotCommitted { actor: *actor, job: *job, required: n, held });
        }
        Ok(record
            .slots
            .iter()
            .filter(|s| s.is_committed_to(job))
            .take(n as usize)
            .fold(Amount::zero(), |acc, s| acc + s.amount.clone()))
    }

    /// Forfeit `n` slots committed to `job`, paying their collateral out to
    /// `payouts`. The payouts must add up to exactly the slashed amount.
    ///
    /// The record is dropped once its last slot is gone, which ends the
    /// actor's registration in `scope`.
    pub fn slash<L: FungibleLedger>(
        &mut self,
        token: &mut L,
        actor: &Address,
        scope: StakeScope,
        job: &JobId,
        n: SlotCount,
        payouts: &[(Address, Amount)],
    ) -> StakingResult<Amount> {
        let amount = self.slashable_amount(actor, scope, job, n)?;
        let paid = payouts
            .iter()
            .fold(Amount::zero(), |acc, (_, a)| acc + a.clone());
        if paid != amount {
            return Err(StakingError::InvalidConfig(format!(
                "slash payouts total {} but {} is forfeited",
                paid, amount
            )));
        }
        let available = token.balance_of(&self.custody);
        if available < amount {
            return Err(market_core::CoreError::InsufficientBalance {
                account: self.custody,
                required: amount,
                available,
            }
            .into());
        }

        for (recipient, share) in payouts.iter().filter(|(_, a)| !a.is_zero()) {
            token.transfer(&self.custody, recipient, share)?;
        }

        let key = (scope, *actor);
        if let Some(record) = self.records.get_mut(&key) {
            let mut removed = 0;
            record.slots.retain(|s| {
                if removed < n && s.is_committed_to(job) {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
            record.staked = record.per_slot.mul_u64(record.slots.len() as u64);
            if record.slots.is_empty() {
                self.records.remove(&key);
            }
        }
        self.total_custody = self
            .total_custody
            .checked_sub(&amount)
            .unwrap_or_else(Amount::zero);

        tracing::debug!(%actor, %scope, %job, slots = n, %amount, "stake slashed");
        Ok(amount)
    }

    /// Every record is internally consistent and custody matches the sum of stakes
    pub fn check_invariants(&self) -> bool {
        let sum = self
            .records
            .values()
            .fold(Amount::zero(), |acc, r| acc + r.staked.clone());
        self.records.values().all(StakeRecord::is_consistent) && sum == self.total_custody
    }
}
