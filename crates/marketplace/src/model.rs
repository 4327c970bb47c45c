// marketplace/src/model.rs

use crate::{escrow::PaymentEscrow, MarketError, MarketResult, PaymentStatus};
use market_core::{
    Amount, AssetId, EventLog, FungibleLedger, JobId, MarketEvent, PoolKind, StakeScope, Timestamp,
};
use market_crypto::Address;
use serde::{Deserialize, Serialize};
use staking::{Committee, JobOutcome, PoolManager, ResolutionReport, StakeLedger, StakingError};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Where a model is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    /// Owner stake locked, no committees requested yet
    Created,
    /// Commit-reveal sessions running
    CommitteeForming,
    /// Both committees formed, work under way
    InProgress,
    Finalized,
    Cancelled,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Created => "created",
            ModelStatus::CommitteeForming => "committee_forming",
            ModelStatus::InProgress => "in_progress",
            ModelStatus::Finalized => "finalized",
            ModelStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ModelStatus::Finalized | ModelStatus::Cancelled)
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Stake the data owner locks per model
    pub min_model_stake: u64,
    /// Commit-reveal rounds tried per pool before the model is cancelled
    pub max_committee_attempts: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            min_model_stake: 100,
            max_committee_attempts: 3,
        }
    }
}

/// A job binding a data owner's asset to a training request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub model_id: JobId,
    pub data_asset_id: AssetId,
    pub owner: Address,
    pub min_k_verifiers: usize,
    pub min_k_gossipers: usize,
    pub status: ModelStatus,
    /// Commit-reveal rounds started in the verifiers pool
    pub verifier_rounds: u32,
    /// Commit-reveal rounds started in the gossipers pool
    pub gossiper_rounds: u32,
    pub stake: Amount,
    pub created_at: Timestamp,
}

impl Model {
    /// Commit-reveal rounds started in `kind`
    pub fn rounds(&self, kind: PoolKind) -> u32 {
        match kind {
            PoolKind::Verifiers => self.verifier_rounds,
            PoolKind::Gossipers => self.gossiper_rounds,
        }
    }
}

/// Verdict consumed when a model resolves
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVerdict {
    /// Pay the data owner if true, refund the data scientist otherwise
    pub accepted: bool,
    pub dishonest_verifiers: BTreeSet<Address>,
    pub dishonest_gossipers: BTreeSet<Address>,
}

impl ModelVerdict {
    pub fn accepted() -> Self {
        Self { accepted: true, ..Self::default() }
    }

    pub fn rejected() -> Self {
        Self::default()
    }
}

/// What resolving a model did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResolution {
    pub model_id: JobId,
    pub verifiers: ResolutionReport,
    pub gossipers: ResolutionReport,
    /// Final state of the model's payment, if one was locked
    pub payment: Option<PaymentStatus>,
    pub owner_refund: Amount,
}

/// Mutable borrows of everything a lifecycle step touches
pub struct MarketContext<'a, L: FungibleLedger, E: PaymentEscrow> {
    pub token: &'a mut L,
    pub ledger: &'a mut StakeLedger,
    pub verifiers: &'a mut PoolManager,
    pub gossipers: &'a mut PoolManager,
    pub escrow: &'a mut E,
}

impl<'a, L: FungibleLedger, E: PaymentEscrow> MarketContext<'a, L, E> {
    fn pool(&mut self, kind: PoolKind) -> &mut PoolManager {
        match kind {
            PoolKind::Verifiers => &mut *self.verifiers,
            PoolKind::Gossipers => &mut *self.gossipers,
        }
    }

    fn request(
        &mut self,
        kind: PoolKind,
        job: &JobId,
        min_k: usize,
        now: Timestamp,
    ) -> MarketResult<Vec<Address>> {
        let max_k = self.pool(kind).config().max_k.max(min_k);
        let (ledger, token) = (&mut *self.ledger, &mut *self.token);
        let pool = match kind {
            PoolKind::Verifiers => &mut *self.verifiers,
            PoolKind::Gossipers => &mut *self.gossipers,
        };
        Ok(pool.request_committee(ledger, token, job, min_k, max_k, now)?)
    }

    fn finalize(
        &mut self,
        kind: PoolKind,
        job: &JobId,
        now: Timestamp,
    ) -> Result<Committee, StakingError> {
        let (ledger, token) = (&mut *self.ledger, &mut *self.token);
        let pool = match kind {
            PoolKind::Verifiers => &mut *self.verifiers,
            PoolKind::Gossipers => &mut *self.gossipers,
        };
        pool.finalize_committee(ledger, token, job, now)
    }

    /// Drop whatever a pool holds for `job`; nothing held is fine
    fn abandon(&mut self, kind: PoolKind, job: &JobId) -> MarketResult<()> {
        let ledger = &mut *self.ledger;
        let pool = match kind {
            PoolKind::Verifiers => &mut *self.verifiers,
            PoolKind::Gossipers => &mut *self.gossipers,
        };
        match pool.abandon(ledger, job) {
            Ok(()) | Err(StakingError::SessionNotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Model registry and state machine
#[derive(Debug, Default)]
pub struct ModelLifecycle {
    config: ModelConfig,
    models: HashMap<JobId, Model>,
    events: EventLog,
}

impl ModelLifecycle {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            models: HashMap::new(),
            events: EventLog::new(),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn model(&self, model_id: &JobId) -> Option<&Model> {
        self.models.get(model_id)
    }

    pub fn models_with_status(&self, status: ModelStatus) -> Vec<&Model> {
        self.models.values().filter(|m| m.status == status).collect()
    }

    pub fn drain_events(&mut self) -> Vec<MarketEvent> {
        self.events.drain()
    }

    /// Register a model and lock the owner's stake on it.
    ///
    /// The owner approves the stake ledger's custody address for
    /// `min_model_stake` first.
    #[allow(clippy::too_many_arguments)]
    pub fn create_model<L: FungibleLedger, E: PaymentEscrow>(
        &mut self,
        ctx: &mut MarketContext<'_, L, E>,
        owner: &Address,
        model_id: JobId,
        data_asset_id: AssetId,
        min_k_verifiers: usize,
        min_k_gossipers: usize,
        now: Timestamp,
    ) -> MarketResult<&Model> {
        if self.models.contains_key(&model_id) {
            return Err(MarketError::DuplicateModel(model_id));
        }
        let bounds = [
            (PoolKind::Verifiers, min_k_verifiers),
            (PoolKind::Gossipers, min_k_gossipers),
        ];
        for (kind, min_k) in bounds {
            let cfg = ctx.pool(kind).config();
            if min_k < cfg.min_k || min_k > cfg.max_k {
                return Err(MarketError::InvalidModel(format!(
                    "{} committee of {} outside {}..={}",
                    kind, min_k, cfg.min_k, cfg.max_k
                )));
            }
        }

        let stake = Amount::from_u64(self.config.min_model_stake);
        ctx.ledger.lock(ctx.token, owner, StakeScope::Model(model_id), &stake, 1)?;

        let model = Model {
            model_id,
            data_asset_id,
            owner: *owner,
            min_k_verifiers,
            min_k_gossipers,
            status: ModelStatus::Created,
            verifier_rounds: 0,
            gossiper_rounds: 0,
            stake,
            created_at: now,
        };

        tracing::info!(%model_id, %owner, asset = %data_asset_id, "model created");
        self.events.emit(MarketEvent::ModelCreated { model_id, owner: *owner, data_asset_id });
        self.events.emit(MarketEvent::ModelStatusChanged {
            model_id,
            status: ModelStatus::Created.as_str().to_string(),
        });

        Ok(self.models.entry(model_id).or_insert(model))
    }

    /// Open commit-reveal sessions in both pools.
    ///
    /// Returns the invited verifiers and gossipers. If the second pool
    /// cannot open its session the first one is rolled back.
    pub fn form_committees<L: FungibleLedger, E: PaymentEscrow>(
        &mut self,
        ctx: &mut MarketContext<'_, L, E>,
        model_id: &JobId,
        now: Timestamp,
    ) -> MarketResult<(Vec<Address>, Vec<Address>)> {
        let model = self.expect_status(model_id, ModelStatus::Created)?.clone();

        let verifiers = ctx.request(PoolKind::Verifiers, model_id, model.min_k_verifiers, now)?;
        let requested = ctx.request(PoolKind::Gossipers, model_id, model.min_k_gossipers, now);
        let gossipers = match requested {
            Ok(invited) => invited,
            Err(e) => {
                ctx.abandon(PoolKind::Verifiers, model_id)?;
                return Err(e);
            }
        };

        if let Some(model) = self.models.get_mut(model_id) {
            model.verifier_rounds += 1;
            model.gossiper_rounds += 1;
        }
        self.set_status(model_id, ModelStatus::CommitteeForming);
        Ok((verifiers, gossipers))
    }

    /// Try to finalize both committees.
    ///
    /// A pool whose session aborted gets a fresh session until it has used
    /// `max_committee_attempts` rounds, at which point the model is
    /// cancelled. Returns the resulting status.
    pub fn try_activate<L: FungibleLedger, E: PaymentEscrow>(
        &mut self,
        ctx: &mut MarketContext<'_, L, E>,
        model_id: &JobId,
        now: Timestamp,
    ) -> MarketResult<ModelStatus> {
        let model = self.expect_status(model_id, ModelStatus::CommitteeForming)?.clone();

        let mut formed = 0;
        for (kind, min_k) in [
            (PoolKind::Verifiers, model.min_k_verifiers),
            (PoolKind::Gossipers, model.min_k_gossipers),
        ] {
            match ctx.finalize(kind, model_id, now) {
                Ok(_) => formed += 1,
                Err(StakingError::PhaseViolation(_)) => {}
                Err(StakingError::InsufficientReveals { required, revealed, .. }) => {
                    let attempts = self.models.get(model_id).map(|m| m.rounds(kind)).unwrap_or(0);
                    if attempts >= self.config.max_committee_attempts {
                        tracing::warn!(
                            %model_id, pool = %kind, attempts,
                            "committee formation failed, cancelling"
                        );
                        self.cancel_unchecked(ctx, model_id)?;
                        return Ok(ModelStatus::Cancelled);
                    }

                    tracing::warn!(
                        %model_id, pool = %kind, required, revealed,
                        "session aborted, retrying"
                    );
                    match ctx.request(kind, model_id, min_k, now) {
                        Ok(_) => {
                            if let Some(model) = self.models.get_mut(model_id) {
                                match kind {
                                    PoolKind::Verifiers => model.verifier_rounds += 1,
                                    PoolKind::Gossipers => model.gossiper_rounds += 1,
                                }
                            }
                        }
                        Err(MarketError::Staking(StakingError::InsufficientCandidates { .. })) => {
                            tracing::warn!(
                                %model_id, pool = %kind,
                                "not enough candidates to retry, cancelling"
                            );
                            self.cancel_unchecked(ctx, model_id)?;
                            return Ok(ModelStatus::Cancelled);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        if formed == 2 {
            self.set_status(model_id, ModelStatus::InProgress);
            return Ok(ModelStatus::InProgress);
        }
        Ok(ModelStatus::CommitteeForming)
    }

    /// Settle a model that was worked on: committees, payment and stake
    pub fn resolve<L: FungibleLedger, E: PaymentEscrow>(
        &mut self,
        ctx: &mut MarketContext<'_, L, E>,
        model_id: &JobId,
        verdict: &ModelVerdict,
    ) -> MarketResult<ModelResolution> {
        let model = self.expect_status(model_id, ModelStatus::InProgress)?.clone();

        let verifiers = ctx.verifiers.on_job_resolved(
            ctx.ledger,
            ctx.token,
            model_id,
            &JobOutcome { dishonest: verdict.dishonest_verifiers.clone() },
        )?;
        let gossipers = ctx.gossipers.on_job_resolved(
            ctx.ledger,
            ctx.token,
            model_id,
            &JobOutcome { dishonest: verdict.dishonest_gossipers.clone() },
        )?;

        let payment = self.settle_payment(ctx, model_id, verdict.accepted)?;
        let scope = StakeScope::Model(*model_id);
        let owner_refund = ctx.ledger.release(ctx.token, &model.owner, scope)?;
        self.set_status(model_id, ModelStatus::Finalized);

        tracing::info!(
            %model_id, accepted = verdict.accepted,
            slashed = verifiers.slashed.len() + gossipers.slashed.len(), "model resolved"
        );
        Ok(ModelResolution { model_id: *model_id, verifiers, gossipers, payment, owner_refund })
    }

    /// Owner-initiated cancellation; nobody is penalized
    pub fn cancel<L: FungibleLedger, E: PaymentEscrow>(
        &mut self,
        ctx: &mut MarketContext<'_, L, E>,
        caller: &Address,
        model_id: &JobId,
    ) -> MarketResult<()> {
        let model = self.models.get(model_id).ok_or(MarketError::ModelNotFound(*model_id))?;
        if model.owner != *caller {
            return Err(MarketError::Unauthorized {
                caller: *caller,
                action: "cancel model".into(),
            });
        }
        if model.status.is_terminal() {
            return Err(MarketError::InvalidModelStatus {
                model_id: *model_id,
                expected: "an active model".into(),
                actual: model.status,
            });
        }
        self.cancel_unchecked(ctx, model_id)
    }

    fn cancel_unchecked<L: FungibleLedger, E: PaymentEscrow>(
        &mut self,
        ctx: &mut MarketContext<'_, L, E>,
        model_id: &JobId,
    ) -> MarketResult<()> {
        let owner = self.models.get(model_id).ok_or(MarketError::ModelNotFound(*model_id))?.owner;

        ctx.abandon(PoolKind::Verifiers, model_id)?;
        ctx.abandon(PoolKind::Gossipers, model_id)?;
        self.settle_payment(ctx, model_id, false)?;
        ctx.ledger.release(ctx.token, &owner, StakeScope::Model(*model_id))?;

        self.set_status(model_id, ModelStatus::Cancelled);
        tracing::info!(%model_id, "model cancelled");
        Ok(())
    }

    /// Release or refund a locked payment, if there is one
    fn settle_payment<L: FungibleLedger, E: PaymentEscrow>(
        &mut self,
        ctx: &mut MarketContext<'_, L, E>,
        model_id: &JobId,
        accepted: bool,
    ) -> MarketResult<Option<PaymentStatus>> {
        let status = match ctx.escrow.payment(model_id) {
            None => return Ok(None),
            Some(p) => p.status,
        };
        if status != PaymentStatus::Locked {
            return Ok(Some(status));
        }
        if accepted {
            ctx.escrow.release(ctx.token, model_id)?;
            Ok(Some(PaymentStatus::Released))
        } else {
            ctx.escrow.refund(ctx.token, model_id)?;
            Ok(Some(PaymentStatus::Refunded))
        }
    }

    fn expect_status(&self, model_id: &JobId, expected: ModelStatus) -> MarketResult<&Model> {
        let model = self.models.get(model_id).ok_or(MarketError::ModelNotFound(*model_id))?;
        if model.status != expected {
            return Err(MarketError::InvalidModelStatus {
                model_id: *model_id,
                expected: expected.as_str().to_string(),
                actual: model.status,
            });
        }
        Ok(model)
    }

    fn set_status(&mut self, model_id: &JobId, status: ModelStatus) {
        if let Some(model) = self.models.get_mut(model_id) {
            model.status = status;
            tracing::debug!(%model_id, status = status.as_str(), "model status changed");
            self.events.emit(MarketEvent::ModelStatusChanged {
                model_id: *model_id,
                status: status.as_str().to_string(),
            });
        }
    }
}
