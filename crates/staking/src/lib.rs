// staking/src/lib.rs

//! Staked actor pools with commit-reveal committee selection
//!
//! This crate implements the committee market core where:
//! - Actors lock collateral in discrete slots to become eligible
//! - Per-job committees are drawn from a seed produced by a two-phase
//!   commit-reveal protocol that no single participant controls
//! - Phase deadlines are evaluated lazily against the caller's clock
//! - Non-revealing and dishonest members lose the slots they committed

pub mod commit_reveal;
pub mod ledger;
pub mod pool;
pub mod registry;
pub mod selection;
pub mod slashing;

pub use commit_reveal::{CommitRevealSession, RevealPolicy, SessionConfig, SessionStatus};
pub use ledger::{SlotState, StakeLedger, StakeRecord, StakeSlot};
pub use pool::{Committee, JobOutcome, PoolConfig, PoolManager, ResolutionReport};
pub use registry::ActorRegistry;
pub use selection::{invitation_set, select_committee, CommitteeSelector};
pub use slashing::{SlashReason, SlashRecord, SlashingDistribution, SlashingManager};

use market_core::{Amount, CoreError, JobId, PoolKind, SlotCount, StakeScope};
use market_crypto::Address;

/// Result type for staking operations
pub type StakingResult<T> = Result<T, StakingError>;

/// Errors raised by the stake ledger, registry, sessions and pools.
///
/// Every error rejects a single call; no partial state is left behind.
#[derive(Debug, thiserror::Error)]
pub enum StakingError {
    #[error("Below minimum stake: required {required}, provided {provided}")]
    BelowMinimumStake { required: Amount, provided: Amount },

    #[error("Invalid slot configuration: {amount} over {slots} slots")]
    InvalidSlotConfig { amount: Amount, slots: SlotCount },

    #[error("Actor {actor} already registered in {scope}")]
    AlreadyRegistered { actor: Address, scope: StakeScope },

    #[error("Actor {actor} not registered in {scope}")]
    NotRegistered { actor: Address, scope: StakeScope },

    #[error("Actor {actor} has {committed} slots committed in {scope}")]
    ActiveCommitment {
        actor: Address,
        scope: StakeScope,
        committed: SlotCount,
    },

    #[error("Insufficient free slots for {actor}: required {required}, available {available}")]
    InsufficientFreeSlots {
        actor: Address,
        required: SlotCount,
        available: SlotCount,
    },

    #[error("Actor {actor} holds {held} slots for job {job}, {required} requested")]
    NotCommitted {
        actor: Address,
        job: JobId,
        required: SlotCount,
        held: SlotCount,
    },

    #[error("Insufficient approval from {actor}: required {required}, approved {approved}")]
    InsufficientApproval {
        actor: Address,
        required: Amount,
        approved: Amount,
    },

    #[error("Phase violation: {0}")]
    PhaseViolation(String),

    #[error("Reveal from {actor} does not match its commitment")]
    CommitmentMismatch { actor: Address },

    #[error("Insufficient reveals for job {job}: required {required}, revealed {revealed}")]
    InsufficientReveals {
        job: JobId,
        required: usize,
        revealed: usize,
    },

    #[error("Insufficient candidates in {pool}: required {required}, eligible {available}")]
    InsufficientCandidates {
        pool: PoolKind,
        required: usize,
        available: usize,
    },

    #[error("Invalid committee bounds: {0}")]
    InvalidCommitteeBounds(String),

    #[error("No session for job {job} in {pool}")]
    SessionNotFound { pool: PoolKind, job: JobId },

    #[error("No committee for job {job} in {pool}")]
    CommitteeNotFound { pool: PoolKind, job: JobId },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Ledger error: {0}")]
    Core(#[from] CoreError),
}
