// market-core/src/events.rs

use crate::types::*;
use market_crypto::{Address, Hash};
use serde::{Deserialize, Serialize};

/// Audit events produced by state-changing operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MarketEvent {
    ActorRegistered {
        pool: PoolKind,
        actor: Address,
        amount: Amount,
        slots: SlotCount,
    },
    ActorDeregistered {
        pool: PoolKind,
        actor: Address,
        refunded: Amount,
    },
    SessionOpened {
        pool: PoolKind,
        job: JobId,
        participants: Vec<Address>,
        commit_deadline: Timestamp,
        reveal_deadline: Timestamp,
    },
    CommitmentSubmitted {
        pool: PoolKind,
        job: JobId,
        actor: Address,
    },
    RevealAccepted {
        pool: PoolKind,
        job: JobId,
        actor: Address,
    },
    SessionClosed {
        pool: PoolKind,
        job: JobId,
        finalized: bool,
        revealed: usize,
        non_responsive: Vec<Address>,
    },
    CommitteeFinalized {
        pool: PoolKind,
        job: JobId,
        members: Vec<Address>,
        seed: Hash,
    },
    SlotsReleased {
        pool: PoolKind,
        job: JobId,
        actor: Address,
        slots: SlotCount,
    },
    SlashExecuted {
        pool: PoolKind,
        job: JobId,
        actor: Address,
        amount: Amount,
        reason: String,
    },
    PaymentLocked {
        job: JobId,
        payer: Address,
        payee: Address,
        amount: Amount,
    },
    PaymentReleased {
        job: JobId,
        payee: Address,
        amount: Amount,
    },
    PaymentRefunded {
        job: JobId,
        payer: Address,
        amount: Amount,
    },
    ModelCreated {
        model_id: JobId,
        owner: Address,
        data_asset_id: AssetId,
    },
    ModelStatusChanged {
        model_id: JobId,
        status: String,
    },
}

impl MarketEvent {
    /// Job the event belongs to, if any
    pub fn job(&self) -> Option<&JobId> {
        match self {
            MarketEvent::ActorRegistered { .. } | MarketEvent::ActorDeregistered { .. } => None,
            MarketEvent::SessionOpened { job, .. }
            | MarketEvent::CommitmentSubmitted { job, .. }
            | MarketEvent::RevealAccepted { job, .. }
            | MarketEvent::SessionClosed { job, .. }
            | MarketEvent::CommitteeFinalized { job, .. }
            | MarketEvent::SlotsReleased { job, .. }
            | MarketEvent::SlashExecuted { job, .. }
            | MarketEvent::PaymentLocked { job, .. }
            | MarketEvent::PaymentReleased { job, .. }
            | MarketEvent::PaymentRefunded { job, .. } => Some(job),
            MarketEvent::ModelCreated { model_id, .. }
            | MarketEvent::ModelStatusChanged { model_id, .. } => Some(model_id),
        }
    }
}

/// Append-only buffer of emitted events, drained by the embedding layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<MarketEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: MarketEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[MarketEvent] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<MarketEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_log_drain() {
        let mut log = EventLog::new();
        let job = Hash::of_label("job");
        log.emit(MarketEvent::ModelStatusChanged { model_id: job, status: "created".into() });

        assert_eq!(log.len(), 1);
        assert_eq!(log.events()[0].job(), Some(&job));

        let drained = log.drain();
        assert_eq!(drained.len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = MarketEvent::CommitmentSubmitted {
            pool: PoolKind::Verifiers,
            job: Hash::zero(),
            actor: Address::zero(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "commitment_submitted");
        assert_eq!(json["pool"], "verifiers");
    }
}
