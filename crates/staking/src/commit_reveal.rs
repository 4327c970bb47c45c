// staking/src/commit_reveal.rs

//! Two-phase commit-reveal randomness for committee selection.
//!
//! Invitees first publish a hash commitment to a secret, then disclose the
//! secret and salt. Once the reveal window closes the session either
//! finalizes with a seed derived from every accepted reveal, or aborts when
//! too few participants revealed. Deadlines are checked lazily: each call
//! carries the caller's clock and applies the transitions it implies first.

use crate::{StakingError, StakingResult};
use market_core::{JobId, PoolKind, Timestamp};
use market_crypto::{hash::hash_parts, verify_commitment, Address, Hash, Salt, Secret};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const CONTRIBUTION_DOMAIN: &str = "committee-market/contribution";
const SEED_DOMAIN: &str = "committee-market/seed";

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting commitments
    Collecting,
    /// Accepting reveals
    Revealing,
    /// Seed available
    Finalized,
    /// Too few reveals, no seed
    Aborted,
}

impl SessionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Collecting | SessionStatus::Revealing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Collecting => "collecting",
            SessionStatus::Revealing => "revealing",
            SessionStatus::Finalized => "finalized",
            SessionStatus::Aborted => "aborted",
        }
    }
}

/// When the commit phase may end before its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealPolicy {
    /// Reveals open only at the commit deadline
    DeadlineOnly,
    /// Reveals open as soon as every participant has committed
    WhenAllCommitted,
}

/// Timing and quorum of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub commit_timeout: Timestamp,
    pub reveal_timeout: Timestamp,
    /// Reveals needed to finalize
    pub min_reveals: usize,
    pub reveal_policy: RevealPolicy,
}

/// Commit-reveal state for one job in one pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRevealSession {
    job: JobId,
    pool: PoolKind,
    /// Invitees in registration order
    participants: Vec<Address>,
    commitments: BTreeMap<Address, Hash>,
    reveals: BTreeMap<Address, Secret>,
    opened_at: Timestamp,
    commit_deadline: Timestamp,
    reveal_deadline: Timestamp,
    min_reveals: usize,
    policy: RevealPolicy,
    status: SessionStatus,
    seed: Option<Hash>,
}

impl CommitRevealSession {
    /// Open a session in `Collecting`
    pub fn open(
        job: JobId,
        pool: PoolKind,
        participants: Vec<Address>,
        now: Timestamp,
        config: &SessionConfig,
    ) -> StakingResult<Self> {
        if participants.is_empty() {
            return Err(StakingError::InvalidConfig("session has no participants".into()));
        }
        if config.min_reveals == 0 || config.min_reveals > participants.len() {
            return Err(StakingError::InvalidConfig(format!(
                "min_reveals {} outside 1..={}",
                config.min_reveals,
                participants.len()
            )));
        }
        let mut unique = participants.clone();
        unique.sort();
        unique.dedup();
        if unique.len() != participants.len() {
            return Err(StakingError::InvalidConfig("duplicate participant".into()));
        }

        let commit_deadline = now.saturating_add(config.commit_timeout);
        let reveal_deadline = commit_deadline.saturating_add(config.reveal_timeout);

        Ok(Self {
            job,
            pool,
            participants,
            commitments: BTreeMap::new(),
            reveals: BTreeMap::new(),
            opened_at: now,
            commit_deadline,
            reveal_deadline,
            min_reveals: config.min_reveals,
            policy: config.reveal_policy,
            status: SessionStatus::Collecting,
            seed: None,
        })
    }

    /// Apply every transition implied by `now`. Returns true if the status
    /// changed.
    pub fn advance(&mut self, now: Timestamp) -> bool {
        let before = self.status;

        if self.status == SessionStatus::Collecting {
            let all_committed = self.commitments.len() == self.participants.len();
            let early = self.policy == RevealPolicy::WhenAllCommitted && all_committed;
            if now >= self.commit_deadline || early {
                self.status = SessionStatus::Revealing;
            }
        }

        if self.status == SessionStatus::Revealing {
            let all_revealed = self.reveals.len() == self.commitments.len();
            if now >= self.reveal_deadline || all_revealed {
                self.close();
            }
        }

        self.status != before
    }

    fn close(&mut self) {
        if self.reveals.len() >= self.min_reveals {
            self.seed = Some(self.derive_seed());
            self.status = SessionStatus::Finalized;
        } else {
            self.status = SessionStatus::Aborted;
        }
    }

    /// XOR of `hash(revealer || secret)` over accepted reveals, bound to the
    /// job and pool. Equal secrets from two revealers do not cancel out.
    fn derive_seed(&self) -> Hash {
        let acc = self.reveals.iter().fold(Hash::zero(), |acc, (actor, secret)| {
            acc.xor(&hash_parts(CONTRIBUTION_DOMAIN, &[actor.as_bytes(), secret.as_bytes()]))
        });
        hash_parts(
            SEED_DOMAIN,
            &[self.job.as_bytes(), self.pool.as_str().as_bytes(), acc.as_bytes()],
        )
    }

    /// Record `actor`'s commitment. Write-once.
    pub fn submit_commitment(
        &mut self,
        actor: &Address,
        commitment: Hash,
        now: Timestamp,
    ) -> StakingResult<()> {
        self.advance(now);

        if self.status != SessionStatus::Collecting {
            return Err(StakingError::PhaseViolation(format!(
                "commitment from {} while session is {}",
                actor,
                self.status.as_str()
            )));
        }
        if !self.is_participant(actor) {
            return Err(StakingError::PhaseViolation(format!("{} was not invited", actor)));
        }
        if self.commitments.contains_key(actor) {
            return Err(StakingError::PhaseViolation(format!("{} already committed", actor)));
        }

        self.commitments.insert(*actor, commitment);
        self.advance(now);
        Ok(())
    }

    /// Disclose `actor`'s secret. Only a pair matching the stored
    /// commitment is accepted; a mismatch changes nothing.
    pub fn submit_reveal(
        &mut self,
        actor: &Address,
        secret: Secret,
        salt: Salt,
        now: Timestamp,
    ) -> StakingResult<()> {
        self.advance(now);

        if self.status != SessionStatus::Revealing {
            return Err(StakingError::PhaseViolation(format!(
                "reveal from {} while session is {}",
                actor,
                self.status.as_str()
            )));
        }
        let commitment = self
            .commitments
            .get(actor)
            .ok_or_else(|| StakingError::PhaseViolation(format!("{} has no commitment", actor)))?;
        if self.reveals.contains_key(actor) {
            return Err(StakingError::PhaseViolation(format!("{} already revealed", actor)));
        }
        if !verify_commitment(commitment, &secret, &salt) {
            return Err(StakingError::CommitmentMismatch { actor: *actor });
        }

        self.reveals.insert(*actor, secret);
        self.advance(now);
        Ok(())
    }

    /// Advance, then hand out the seed
    pub fn finalize(&mut self, now: Timestamp) -> StakingResult<Hash> {
        self.advance(now);
        match (self.status, self.seed) {
            (SessionStatus::Finalized, Some(seed)) => Ok(seed),
            (SessionStatus::Aborted, _) => Err(StakingError::InsufficientReveals {
                job: self.job,
                required: self.min_reveals,
                revealed: self.reveals.len(),
            }),
            (status, _) => Err(StakingError::PhaseViolation(format!(
                "session for {} is still {}",
                self.job,
                status.as_str()
            ))),
        }
    }

    pub fn job(&self) -> &JobId {
        &self.job
    }

    pub fn pool(&self) -> PoolKind {
        self.pool
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn seed(&self) -> Option<Hash> {
        self.seed
    }

    pub fn participants(&self) -> &[Address] {
        &self.participants
    }

    pub fn is_participant(&self, actor: &Address) -> bool {
        self.participants.contains(actor)
    }

    pub fn has_committed(&self, actor: &Address) -> bool {
        self.commitments.contains_key(actor)
    }

    pub fn has_revealed(&self, actor: &Address) -> bool {
        self.reveals.contains_key(actor)
    }

    pub fn commitment_count(&self) -> usize {
        self.commitments.len()
    }

    pub fn reveal_count(&self) -> usize {
        self.reveals.len()
    }

    pub fn min_reveals(&self) -> usize {
        self.min_reveals
    }

    pub fn opened_at(&self) -> Timestamp {
        self.opened_at
    }

    pub fn commit_deadline(&self) -> Timestamp {
        self.commit_deadline
    }

    pub fn reveal_deadline(&self) -> Timestamp {
        self.reveal_deadline
    }

    /// Accepted revealers, ordered by address
    pub fn revealed(&self) -> Vec<Address> {
        self.reveals.keys().copied().collect()
    }

    /// Committed but never revealed, in invitation order
    pub fn non_responsive(&self) -> Vec<Address> {
        self.participants
            .iter()
            .filter(|p| self.commitments.contains_key(p) && !self.reveals.contains_key(p))
            .copied()
            .collect()
    }

    /// Invited but never committed, in invitation order
    pub fn absent(&self) -> Vec<Address> {
        self.participants
            .iter()
            .filter(|p| !self.commitments.contains_key(p))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_crypto::commitment_of;

    fn actors(n: usize) -> Vec<Address> {
        (0..n).map(|i| Address::from_name(&format!("verifier-{}", i))).collect()
    }

    fn config(min_reveals: usize, policy: RevealPolicy) -> SessionConfig {
        SessionConfig { commit_timeout: 20, reveal_timeout: 20, min_reveals, reveal_policy: policy }
    }

    fn secret_for(i: usize) -> (Secret, Salt) {
        let mut salt = [i as u8; 32];
        salt[31] = 0xFF ^ (i as u8);
        (Secret::new([i as u8 + 1; 32]), Salt::new(salt).unwrap())
    }

    fn open(
        n: usize,
        min_reveals: usize,
        policy: RevealPolicy,
    ) -> (CommitRevealSession, Vec<Address>) {
        let participants = actors(n);
        let session = CommitRevealSession::open(
            Hash::of_label("job"),
            PoolKind::Verifiers,
            participants.clone(),
            100,
            &config(min_reveals, policy),
        )
        .unwrap();
        (session, participants)
    }

    fn commit_all(session: &mut CommitRevealSession, participants: &[Address], now: Timestamp) {
        for (i, p) in participants.iter().enumerate() {
            let (secret, salt) = secret_for(i);
            session.submit_commitment(p, commitment_of(&secret, &salt), now).unwrap();
        }
    }

    #[test]
    fn test_open_validates_quorum() {
        let job = Hash::of_label("job");
        let cfg = config(4, RevealPolicy::DeadlineOnly);
        assert!(CommitRevealSession::open(job, PoolKind::Gossipers, actors(3), 0, &cfg).is_err());
        assert!(CommitRevealSession::open(job, PoolKind::Gossipers, vec![], 0, &cfg).is_err());

        let dup = vec![Address::from_name("a"), Address::from_name("a")];
        let cfg = config(1, RevealPolicy::DeadlineOnly);
        assert!(CommitRevealSession::open(job, PoolKind::Gossipers, dup, 0, &cfg).is_err());
    }

    #[test]
    fn test_deadlines() {
        let (session, _) = open(3, 3, RevealPolicy::DeadlineOnly);
        assert_eq!(session.commit_deadline(), 120);
        assert_eq!(session.reveal_deadline(), 140);
        assert_eq!(session.status(), SessionStatus::Collecting);
    }

    #[test]
    fn test_full_round_finalizes() {
        let (mut session, participants) = open(3, 3, RevealPolicy::WhenAllCommitted);
        commit_all(&mut session, &participants, 101);
        assert_eq!(session.status(), SessionStatus::Revealing);

        for (i, p) in participants.iter().enumerate() {
            let (secret, salt) = secret_for(i);
            session.submit_reveal(p, secret, salt, 102).unwrap();
        }
        assert_eq!(session.status(), SessionStatus::Finalized);
        assert!(session.finalize(102).is_ok());
        assert!(session.non_responsive().is_empty());
    }

    #[test]
    fn test_deadline_only_waits_for_commit_deadline() {
        let (mut session, participants) = open(2, 1, RevealPolicy::DeadlineOnly);
        commit_all(&mut session, &participants, 101);
        assert_eq!(session.status(), SessionStatus::Collecting);

        let (secret, salt) = secret_for(0);
        let err = session.submit_reveal(&participants[0], secret, salt, 110).unwrap_err();
        assert!(matches!(err, StakingError::PhaseViolation(_)));

        session.submit_reveal(&participants[0], secret, salt, 120).unwrap();
        assert_eq!(session.status(), SessionStatus::Revealing);
    }

    #[test]
    fn test_commit_rejections() {
        let (mut session, participants) = open(2, 1, RevealPolicy::DeadlineOnly);
        let (secret, salt) = secret_for(0);
        let c = commitment_of(&secret, &salt);

        let stranger = Address::from_name("stranger");
        assert!(matches!(
            session.submit_commitment(&stranger, c, 101),
            Err(StakingError::PhaseViolation(_))
        ));
        session.submit_commitment(&participants[0], c, 101).unwrap();
        assert!(matches!(
            session.submit_commitment(&participants[0], c, 102),
            Err(StakingError::PhaseViolation(_))
        ));
        // After the commit deadline
        assert!(matches!(
            session.submit_commitment(&participants[1], c, 120),
            Err(StakingError::PhaseViolation(_))
        ));
        assert_eq!(session.absent(), vec![participants[1]]);
    }

    #[test]
    fn test_mismatched_reveal_changes_nothing() {
        let (mut session, participants) = open(2, 1, RevealPolicy::WhenAllCommitted);
        commit_all(&mut session, &participants, 101);

        let (secret, _) = secret_for(0);
        let (_, wrong_salt) = secret_for(1);
        let err = session.submit_reveal(&participants[0], secret, wrong_salt, 105).unwrap_err();
        assert!(matches!(err, StakingError::CommitmentMismatch { .. }));
        assert_eq!(session.reveal_count(), 0);

        // A matching reveal before the deadline still counts
        let (secret, salt) = secret_for(0);
        session.submit_reveal(&participants[0], secret, salt, 106).unwrap();
        assert!(session.has_revealed(&participants[0]));
    }

    #[test]
    fn test_reveal_without_commitment() {
        let (mut session, participants) = open(3, 1, RevealPolicy::DeadlineOnly);
        let (secret, salt) = secret_for(0);
        session.submit_commitment(&participants[0], commitment_of(&secret, &salt), 101).unwrap();

        let (s1, salt1) = secret_for(1);
        let err = session.submit_reveal(&participants[1], s1, salt1, 121).unwrap_err();
        assert!(matches!(err, StakingError::PhaseViolation(_)));

        session.submit_reveal(&participants[0], secret, salt, 121).unwrap();
        assert!(matches!(
            session.submit_reveal(&participants[0], secret, salt, 122),
            Err(StakingError::PhaseViolation(_))
        ));
    }

    #[test]
    fn test_five_invited_two_silent() {
        // Finalizes when the quorum is three
        let (mut session, participants) = open(5, 3, RevealPolicy::WhenAllCommitted);
        commit_all(&mut session, &participants, 101);
        for (i, p) in participants.iter().enumerate().take(3) {
            let (secret, salt) = secret_for(i);
            session.submit_reveal(p, secret, salt, 105).unwrap();
        }
        assert_eq!(session.status(), SessionStatus::Revealing);
        assert!(session.finalize(140).is_ok());
        assert_eq!(session.non_responsive(), participants[3..].to_vec());

        // Aborts when it is four
        let (mut session, participants) = open(5, 4, RevealPolicy::WhenAllCommitted);
        commit_all(&mut session, &participants, 101);
        for (i, p) in participants.iter().enumerate().take(3) {
            let (secret, salt) = secret_for(i);
            session.submit_reveal(p, secret, salt, 105).unwrap();
        }
        let err = session.finalize(140).unwrap_err();
        assert!(matches!(err, StakingError::InsufficientReveals { required: 4, revealed: 3, .. }));
        assert_eq!(session.status(), SessionStatus::Aborted);
        assert!(session.seed().is_none());
    }

    #[test]
    fn test_finalize_while_open() {
        let (mut session, _) = open(3, 2, RevealPolicy::DeadlineOnly);
        assert!(matches!(session.finalize(105), Err(StakingError::PhaseViolation(_))));
    }

    #[test]
    fn test_nobody_commits_aborts() {
        let (mut session, participants) = open(3, 1, RevealPolicy::DeadlineOnly);
        // Commit deadline passes with no commitments: reveal phase is empty
        assert!(session.advance(120));
        assert_eq!(session.status(), SessionStatus::Aborted);
        assert_eq!(session.absent(), participants);
    }

    #[test]
    fn test_seed_independent_of_reveal_order() {
        let run = |order: &[usize]| {
            let (mut session, participants) = open(4, 4, RevealPolicy::WhenAllCommitted);
            commit_all(&mut session, &participants, 101);
            for &i in order {
                let (secret, salt) = secret_for(i);
                session.submit_reveal(&participants[i], secret, salt, 102).unwrap();
            }
            session.finalize(102).unwrap()
        };
        assert_eq!(run(&[0, 1, 2, 3]), run(&[3, 1, 0, 2]));
    }

    #[test]
    fn test_seed_depends_on_job() {
        let participants = actors(1);
        let (secret, salt) = secret_for(0);
        let seed_for = |label: &str| {
            let mut session = CommitRevealSession::open(
                Hash::of_label(label),
                PoolKind::Gossipers,
                participants.clone(),
                0,
                &config(1, RevealPolicy::WhenAllCommitted),
            )
            .unwrap();
            session.submit_commitment(&participants[0], commitment_of(&secret, &salt), 1).unwrap();
            session.submit_reveal(&participants[0], secret, salt, 2).unwrap();
            session.finalize(2).unwrap()
        };
        assert_ne!(seed_for("job-a"), seed_for("job-b"));
    }
}
