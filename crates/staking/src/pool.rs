// staking/src/pool.rs

use crate::{
    commit_reveal::{CommitRevealSession, RevealPolicy, SessionConfig, SessionStatus},
    ledger::StakeLedger,
    registry::ActorRegistry,
    selection::{invitation_set, select_committee},
    slashing::{SlashReason, SlashRecord, SlashingDistribution, SlashingManager},
    StakingError, StakingResult,
};
use market_core::{
    Amount, BasisPoints, CoreError, EventLog, FungibleLedger, JobId, MarketEvent, PoolKind,
    SlotCount, StakeScope, Timestamp,
};
use market_crypto::{Address, Hash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Policy of one actor pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub kind: PoolKind,
    /// Minimum total stake to register
    pub min_stake: u64,
    /// Smallest committee a job may ask for
    pub min_k: usize,
    /// Largest committee a job may ask for
    pub max_k: usize,
    /// Seconds from session open to the commit deadline
    pub commit_timeout: Timestamp,
    /// Seconds from the commit deadline to the reveal deadline
    pub reveal_timeout: Timestamp,
    /// Most actors invited into one session
    pub max_invitees: usize,
    /// Slots each invitee commits for the job
    pub slots_per_member: SlotCount,
    pub reveal_policy: RevealPolicy,
    /// Forfeit the committed slots of invitees that commit but never reveal
    pub slash_non_revealers: bool,
    /// Treasury share of slashed collateral (basis points, 5000 = 50%)
    pub treasury_share_bps: BasisPoints,
}

impl PoolConfig {
    pub fn verifiers() -> Self {
        Self {
            kind: PoolKind::Verifiers,
            min_stake: 10,
            min_k: 3,
            max_k: 7,
            commit_timeout: 20,
            reveal_timeout: 20,
            max_invitees: 14,
            slots_per_member: 1,
            reveal_policy: RevealPolicy::WhenAllCommitted,
            slash_non_revealers: true,
            treasury_share_bps: 5000,
        }
    }

    pub fn gossipers() -> Self {
        Self {
            kind: PoolKind::Gossipers,
            min_stake: 10,
            min_k: 1,
            max_k: 3,
            commit_timeout: 20,
            reveal_timeout: 20,
            max_invitees: 6,
            slots_per_member: 1,
            reveal_policy: RevealPolicy::DeadlineOnly,
            slash_non_revealers: true,
            treasury_share_bps: 5000,
        }
    }

    pub fn validate(&self) -> StakingResult<()> {
        let fail = |msg: String| -> StakingResult<()> {
            Err(StakingError::InvalidConfig(format!("{} pool: {}", self.kind, msg)))
        };
        if self.min_stake == 0 {
            return fail("min_stake must be positive".into());
        }
        if self.min_k == 0 || self.min_k > self.max_k {
            return fail(format!("need 1 <= min_k <= max_k, got {}..{}", self.min_k, self.max_k));
        }
        if self.max_invitees < self.max_k {
            return fail(format!("max_invitees {} below max_k {}", self.max_invitees, self.max_k));
        }
        if self.slots_per_member == 0 {
            return fail("slots_per_member must be positive".into());
        }
        if self.commit_timeout == 0 || self.reveal_timeout == 0 {
            return fail("phase timeouts must be positive".into());
        }
        if self.treasury_share_bps > 10_000 {
            return fail(format!("treasury share {} exceeds 10000 bps", self.treasury_share_bps));
        }
        Ok(())
    }

    fn session_config(&self, min_reveals: usize) -> SessionConfig {
        SessionConfig {
            commit_timeout: self.commit_timeout,
            reveal_timeout: self.reveal_timeout,
            min_reveals,
            reveal_policy: self.reveal_policy,
        }
    }
}

/// Committee drawn for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Committee {
    pub job: JobId,
    pub pool: PoolKind,
    /// Members in draw order
    pub members: Vec<Address>,
    pub seed: Hash,
    pub slots_per_member: SlotCount,
    pub formed_at: Timestamp,
}

impl Committee {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, actor: &Address) -> bool {
        self.members.contains(actor)
    }
}

/// Verdict on a committee's work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub dishonest: BTreeSet<Address>,
}

impl JobOutcome {
    /// Everyone behaved
    pub fn honest() -> Self {
        Self::default()
    }

    pub fn with_dishonest<I: IntoIterator<Item = Address>>(dishonest: I) -> Self {
        Self { dishonest: dishonest.into_iter().collect() }
    }
}

/// What resolving a job did to its committee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub job: JobId,
    /// Members whose slots were freed
    pub released: Vec<Address>,
    pub slashed: Vec<SlashRecord>,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    session: CommitRevealSession,
    max_k: usize,
    /// Last status reported through events
    reported: SessionStatus,
    /// Abort rollback or committee settlement applied
    settled: bool,
}

/// One actor pool: registry, per-job sessions and committees
pub struct PoolManager {
    config: PoolConfig,
    /// Receives the treasury share of slashed collateral
    treasury: Address,
    registry: ActorRegistry,
    sessions: HashMap<JobId, SessionEntry>,
    committees: HashMap<JobId, Committee>,
    slashing: SlashingManager,
    events: EventLog,
}

impl PoolManager {
    pub fn new(config: PoolConfig, treasury: Address) -> StakingResult<Self> {
        config.validate()?;
        let registry = ActorRegistry::new(
            config.kind,
            Amount::from_u64(config.min_stake),
            config.slots_per_member,
        );

        Ok(Self {
            config,
            treasury,
            registry,
            sessions: HashMap::new(),
            committees: HashMap::new(),
            slashing: SlashingManager::new(),
            events: EventLog::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn kind(&self) -> PoolKind {
        self.config.kind
    }

    pub fn scope(&self) -> StakeScope {
        StakeScope::Pool(self.config.kind)
    }

    pub fn treasury(&self) -> &Address {
        &self.treasury
    }

    pub fn registry(&self) -> &ActorRegistry {
        &self.registry
    }

    pub fn slashing(&self) -> &SlashingManager {
        &self.slashing
    }

    pub fn events(&self) -> &[MarketEvent] {
        self.events.events()
    }

    pub fn drain_events(&mut self) -> Vec<MarketEvent> {
        self.events.drain()
    }

    // ---- membership ----

    pub fn register<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        actor: &Address,
        amount_per_slot: &Amount,
        slots: SlotCount,
    ) -> StakingResult<Amount> {
        let total = self.registry.register(ledger, token, actor, amount_per_slot, slots)?;

        tracing::info!(
            pool = %self.config.kind, %actor, amount = %total, slots,
            "actor registered"
        );
        self.events.emit(MarketEvent::ActorRegistered {
            pool: self.config.kind,
            actor: *actor,
            amount: total.clone(),
            slots,
        });
        Ok(total)
    }

    pub fn deregister<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        actor: &Address,
    ) -> StakingResult<Amount> {
        let refunded = self.registry.deregister(ledger, token, actor)?;

        tracing::info!(
            pool = %self.config.kind, %actor, refunded = %refunded,
            "actor deregistered"
        );
        self.events.emit(MarketEvent::ActorDeregistered {
            pool: self.config.kind,
            actor: *actor,
            refunded: refunded.clone(),
        });
        Ok(refunded)
    }

    pub fn is_registered(&self, ledger: &StakeLedger, actor: &Address) -> bool {
        self.registry.is_registered(ledger, actor)
    }

    pub fn eligible_set(&self, ledger: &StakeLedger) -> Vec<Address> {
        self.registry.eligible_set(ledger)
    }

    // ---- sessions ----

    /// Invite eligible actors to a commit-reveal session for `job`.
    ///
    /// Each invitee's `slots_per_member` slots are committed to the job up
    /// front. Returns the invitees.
    pub fn request_committee<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        job: &JobId,
        min_k: usize,
        max_k: usize,
        now: Timestamp,
    ) -> StakingResult<Vec<Address>> {
        let pool = self.config.kind;
        if !(self.config.min_k <= min_k && min_k <= max_k && max_k <= self.config.max_k) {
            return Err(StakingError::InvalidCommitteeBounds(format!(
                "{} pool needs {} <= min_k <= max_k <= {}, got {}..{}",
                pool, self.config.min_k, self.config.max_k, min_k, max_k
            )));
        }
        if self.committees.contains_key(job) {
            return Err(StakingError::PhaseViolation(format!(
                "committee for {} already formed",
                job
            )));
        }
        if self.sessions.contains_key(job) {
            match self.sync(ledger, token, job, now)? {
                SessionStatus::Aborted => {
                    self.sessions.remove(job);
                }
                status => {
                    return Err(StakingError::PhaseViolation(format!(
                        "session for {} is {}",
                        job,
                        status.as_str()
                    )));
                }
            }
        }

        let eligible = self.registry.eligible_set(ledger);
        if eligible.len() < min_k {
            return Err(StakingError::InsufficientCandidates {
                pool,
                required: min_k,
                available: eligible.len(),
            });
        }

        let invited = invitation_set(&eligible, self.config.max_invitees.max(max_k), job, pool);
        let session = CommitRevealSession::open(
            *job,
            pool,
            invited.clone(),
            now,
            &self.config.session_config(min_k),
        )?;

        let scope = self.scope();
        let spm = self.config.slots_per_member;
        for (i, actor) in invited.iter().enumerate() {
            if let Err(e) = ledger.commit(actor, scope, job, spm) {
                for done in &invited[..i] {
                    ledger.uncommit(done, scope, job, spm)?;
                }
                return Err(e);
            }
        }

        tracing::info!(
            %pool, %job, invited = invited.len(), eligible = eligible.len(),
            commit_deadline = session.commit_deadline(), "commit-reveal session opened"
        );
        self.events.emit(MarketEvent::SessionOpened {
            pool,
            job: *job,
            participants: invited.clone(),
            commit_deadline: session.commit_deadline(),
            reveal_deadline: session.reveal_deadline(),
        });
        self.sessions.insert(
            *job,
            SessionEntry { session, max_k, reported: SessionStatus::Collecting, settled: false },
        );

        Ok(invited)
    }

    pub fn submit_commitment<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        job: &JobId,
        actor: &Address,
        commitment: Hash,
        now: Timestamp,
    ) -> StakingResult<()> {
        self.sync(ledger, token, job, now)?;
        self.entry_mut(job)?.session.submit_commitment(actor, commitment, now)?;

        tracing::debug!(pool = %self.config.kind, %job, %actor, "commitment accepted");
        self.events.emit(MarketEvent::CommitmentSubmitted {
            pool: self.config.kind,
            job: *job,
            actor: *actor,
        });
        self.sync(ledger, token, job, now)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn submit_reveal<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        job: &JobId,
        actor: &Address,
        secret: market_crypto::Secret,
        salt: market_crypto::Salt,
        now: Timestamp,
    ) -> StakingResult<()> {
        self.sync(ledger, token, job, now)?;
        self.entry_mut(job)?.session.submit_reveal(actor, secret, salt, now)?;

        tracing::debug!(pool = %self.config.kind, %job, %actor, "reveal accepted");
        self.events.emit(MarketEvent::RevealAccepted {
            pool: self.config.kind,
            job: *job,
            actor: *actor,
        });
        self.sync(ledger, token, job, now)?;
        Ok(())
    }

    /// Apply deadline transitions for `job` and any rollback they imply
    pub fn poll<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        job: &JobId,
        now: Timestamp,
    ) -> StakingResult<SessionStatus> {
        self.sync(ledger, token, job, now)
    }

    /// Draw the committee once the session finalized.
    ///
    /// Revealers not drawn and invitees that never committed get their
    /// slots back; non-revealers are slashed. Calling again returns the
    /// stored committee.
    pub fn finalize_committee<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        job: &JobId,
        now: Timestamp,
    ) -> StakingResult<Committee> {
        if let Some(committee) = self.committees.get(job) {
            return Ok(committee.clone());
        }

        self.sync(ledger, token, job, now)?;
        let entry = self.entry_mut(job)?;
        let seed = entry.session.finalize(now)?;
        let session = entry.session.clone();
        let max_k = entry.max_k;

        let revealed = session.revealed();
        let k = max_k.min(revealed.len());
        let members = select_committee(&revealed, &seed, k)?;
        let silent = self.slashable_non_revealers(&session);
        self.ensure_custody_covers(ledger, token, job, &silent)?;

        for actor in revealed.iter().filter(|a| !members.contains(a)) {
            self.release_slots(ledger, actor, job)?;
        }
        for actor in session.absent() {
            self.release_slots(ledger, &actor, job)?;
        }
        for actor in session.non_responsive() {
            if silent.contains(&actor) {
                let reason = SlashReason::NonResponsive;
                self.slash_member(ledger, token, &actor, job, reason, &members)?;
            } else {
                self.release_slots(ledger, &actor, job)?;
            }
        }
        self.registry.prune(ledger);

        if let Some(entry) = self.sessions.get_mut(job) {
            entry.settled = true;
        }

        let committee = Committee {
            job: *job,
            pool: self.config.kind,
            members,
            seed,
            slots_per_member: self.config.slots_per_member,
            formed_at: now,
        };

        tracing::info!(
            pool = %self.config.kind, %job, size = committee.size(), revealed = revealed.len(),
            seed = %seed, "committee finalized"
        );
        self.events.emit(MarketEvent::CommitteeFinalized {
            pool: self.config.kind,
            job: *job,
            members: committee.members.clone(),
            seed,
        });
        self.committees.insert(*job, committee.clone());

        Ok(committee)
    }

    /// Free honest members, slash dishonest ones and drop the committee
    pub fn on_job_resolved<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        job: &JobId,
        outcome: &JobOutcome,
    ) -> StakingResult<ResolutionReport> {
        let committee = self
            .committees
            .get(job)
            .cloned()
            .ok_or(StakingError::CommitteeNotFound { pool: self.config.kind, job: *job })?;

        for stranger in outcome.dishonest.iter().filter(|a| !committee.contains(a)) {
            tracing::warn!(
                pool = %self.config.kind, %job, actor = %stranger,
                "verdict names a non-member, ignored"
            );
        }

        let (dishonest, honest): (Vec<Address>, Vec<Address>) = committee
            .members
            .iter()
            .copied()
            .partition(|m| outcome.dishonest.contains(m));

        self.ensure_custody_covers(ledger, token, job, &dishonest)?;

        for actor in &honest {
            self.release_slots(ledger, actor, job)?;
        }
        let mut slashed = Vec::with_capacity(dishonest.len());
        for actor in &dishonest {
            let reason = SlashReason::Dishonest;
            if let Some(record) = self.slash_member(ledger, token, actor, job, reason, &honest)? {
                slashed.push(record);
            }
        }
        self.registry.prune(ledger);

        self.committees.remove(job);
        self.sessions.remove(job);

        tracing::info!(
            pool = %self.config.kind, %job, released = honest.len(), slashed = slashed.len(),
            "job resolved"
        );
        Ok(ResolutionReport { job: *job, released: honest, slashed })
    }

    /// Drop whatever the pool holds for `job` without penalties
    pub fn abandon(&mut self, ledger: &mut StakeLedger, job: &JobId) -> StakingResult<()> {
        let committee = self.committees.remove(job);
        let entry = self.sessions.remove(job);
        if committee.is_none() && entry.is_none() {
            return Err(StakingError::SessionNotFound { pool: self.config.kind, job: *job });
        }

        let mut holders: Vec<Address> = committee.map(|c| c.members).unwrap_or_default();
        if let Some(entry) = entry.filter(|e| !e.settled) {
            holders.extend_from_slice(entry.session.participants());
        }
        for actor in &holders {
            self.release_slots(ledger, actor, job)?;
        }

        tracing::info!(pool = %self.config.kind, %job, released = holders.len(), "job abandoned");
        Ok(())
    }

    // ---- queries ----

    /// Status as of the last call that touched the session. Deadlines that
    /// passed since then are not applied; use [`PoolManager::poll`] for the
    /// status at a given time.
    pub fn session_status(&self, job: &JobId) -> Option<SessionStatus> {
        self.sessions.get(job).map(|e| e.session.status())
    }

    pub fn session(&self, job: &JobId) -> Option<&CommitRevealSession> {
        self.sessions.get(job).map(|e| &e.session)
    }

    pub fn has_session(&self, job: &JobId) -> bool {
        self.sessions.contains_key(job)
    }

    pub fn committee_of(&self, job: &JobId) -> Option<&Committee> {
        self.committees.get(job)
    }

    // ---- internals ----

    fn entry_mut(&mut self, job: &JobId) -> StakingResult<&mut SessionEntry> {
        let pool = self.config.kind;
        self.sessions
            .get_mut(job)
            .ok_or(StakingError::SessionNotFound { pool, job: *job })
    }

    /// Advance the session to `now`, report closings and roll back an
    /// abort exactly once.
    ///
    /// A transition is only marked reported once its rollback completed, so
    /// a rollback that fails is retried by the next call.
    fn sync<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        job: &JobId,
        now: Timestamp,
    ) -> StakingResult<SessionStatus> {
        let pool = self.config.kind;
        let entry = self.entry_mut(job)?;
        entry.session.advance(now);
        let status = entry.session.status();
        if status == entry.reported {
            return Ok(status);
        }
        let session = entry.session.clone();
        let needs_rollback = status == SessionStatus::Aborted && !entry.settled;

        if needs_rollback {
            self.roll_back(ledger, token, &session)?;
        }
        if let Some(entry) = self.sessions.get_mut(job) {
            entry.reported = status;
        }

        match status {
            SessionStatus::Revealing => {
                let committed = session.commitment_count();
                tracing::debug!(%pool, %job, committed, "reveal phase open");
            }
            SessionStatus::Finalized | SessionStatus::Aborted => {
                self.events.emit(MarketEvent::SessionClosed {
                    pool,
                    job: *job,
                    finalized: status == SessionStatus::Finalized,
                    revealed: session.reveal_count(),
                    non_responsive: session.non_responsive(),
                });
            }
            SessionStatus::Collecting => {}
        }

        Ok(status)
    }

    /// Slash the non-revealers of an aborted session and free everyone
    /// else. Actors already handled hold nothing for the job and are
    /// skipped, so the rollback can resume after a failure.
    fn roll_back<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        session: &CommitRevealSession,
    ) -> StakingResult<()> {
        let (pool, job) = (self.config.kind, *session.job());
        let silent = self.slashable_non_revealers(session);
        self.ensure_custody_covers(ledger, token, &job, &silent)?;

        tracing::warn!(
            %pool, %job, revealed = session.reveal_count(), required = session.min_reveals(),
            "session aborted, rolling back commitments"
        );
        let revealers = session.revealed();
        for actor in session.participants() {
            if silent.contains(actor) {
                let reason = SlashReason::NonResponsive;
                self.slash_member(ledger, token, actor, &job, reason, &revealers)?;
            } else {
                self.release_slots(ledger, actor, &job)?;
            }
        }
        self.registry.prune(ledger);
        if let Some(entry) = self.sessions.get_mut(&job) {
            entry.settled = true;
        }
        Ok(())
    }

    /// Fail before anything moves if custody cannot pay out the stake
    /// `actors` still have committed to `job`
    fn ensure_custody_covers<L: FungibleLedger>(
        &self,
        ledger: &StakeLedger,
        token: &L,
        job: &JobId,
        actors: &[Address],
    ) -> StakingResult<()> {
        let scope = self.scope();
        let mut required = Amount::zero();
        for actor in actors {
            let slots = ledger.committed_to(actor, scope, job);
            if slots > 0 {
                required = required + ledger.slashable_amount(actor, scope, job, slots)?;
            }
        }

        let custody = ledger.custody();
        let available = token.balance_of(&custody);
        if available < required {
            return Err(CoreError::InsufficientBalance {
                account: custody,
                required,
                available,
            }
            .into());
        }
        Ok(())
    }

    fn slashable_non_revealers(&self, session: &CommitRevealSession) -> Vec<Address> {
        if self.config.slash_non_revealers {
            session.non_responsive()
        } else {
            Vec::new()
        }
    }

    /// Uncommit everything `actor` holds for `job`
    fn release_slots(
        &mut self,
        ledger: &mut StakeLedger,
        actor: &Address,
        job: &JobId,
    ) -> StakingResult<()> {
        let scope = self.scope();
        let held = ledger.committed_to(actor, scope, job);
        if held == 0 {
            return Ok(());
        }
        ledger.uncommit(actor, scope, job, held)?;

        tracing::debug!(pool = %self.config.kind, %job, %actor, slots = held, "slots released");
        self.events.emit(MarketEvent::SlotsReleased {
            pool: self.config.kind,
            job: *job,
            actor: *actor,
            slots: held,
        });
        Ok(())
    }

    /// Forfeit everything `actor` committed to `job`, split between the
    /// treasury and `honest`. `None` when nothing is committed.
    fn slash_member<L: FungibleLedger>(
        &mut self,
        ledger: &mut StakeLedger,
        token: &mut L,
        actor: &Address,
        job: &JobId,
        reason: SlashReason,
        honest: &[Address],
    ) -> StakingResult<Option<SlashRecord>> {
        let scope = self.scope();
        let slots = ledger.committed_to(actor, scope, job);
        if slots == 0 {
            return Ok(None);
        }
        let amount = ledger.slashable_amount(actor, scope, job, slots)?;
        let share = self.config.treasury_share_bps;
        let distribution = SlashingDistribution::split(&amount, honest, share);
        ledger.slash(token, actor, scope, job, slots, &distribution.payouts(&self.treasury))?;

        let record = self
            .slashing
            .record(*actor, self.config.kind, *job, reason, slots, &distribution);

        tracing::warn!(
            pool = %self.config.kind, %job, %actor, amount = %record.amount,
            reason = reason.as_str(), offenses = record.previous_offenses + 1, "stake slashed"
        );
        self.events.emit(MarketEvent::SlashExecuted {
            pool: self.config.kind,
            job: *job,
            actor: *actor,
            amount: record.amount.clone(),
            reason: reason.as_str().to_string(),
        });
        Ok(Some(record))
    }
}
