// marketplace/src/market.rs

use crate::{
    config::MarketConfig,
    escrow::{Escrow, Payment, PaymentEscrow},
    model::{MarketContext, Model, ModelLifecycle, ModelResolution, ModelStatus, ModelVerdict},
    MarketResult,
};
use market_core::{
    Amount, AssetId, EventLog, FungibleLedger, JobId, MarketEvent, PoolKind, SlotCount, Timestamp,
    TokenLedger,
};
use market_crypto::{Address, Hash, Salt, Secret};
use staking::{Committee, PoolManager, SessionStatus, StakeLedger};

/// The whole marketplace behind one handle.
///
/// Every call takes `&mut self` and completes or fails immediately. Calls
/// that can observe a phase deadline take the caller's clock as `now`.
pub struct Market {
    config: MarketConfig,
    token: TokenLedger,
    ledger: StakeLedger,
    verifiers: PoolManager,
    gossipers: PoolManager,
    escrow: Escrow,
    models: ModelLifecycle,
    events: EventLog,
}

impl Market {
    pub fn new(config: MarketConfig) -> MarketResult<Self> {
        config.validate()?;

        let token = TokenLedger::with_genesis(
            config.token.genesis_account,
            Amount::from_u64(config.token.genesis_supply),
        );
        let ledger = StakeLedger::new(config.custody);
        let verifiers = PoolManager::new(config.verifiers.clone(), config.treasury)?;
        let gossipers = PoolManager::new(config.gossipers.clone(), config.treasury)?;
        let escrow = Escrow::new(config.escrow_account, config.escrow.min_wall_time);
        let models = ModelLifecycle::new(config.model.clone());

        tracing::info!(
            custody = %config.custody, escrow = %config.escrow_account, treasury = %config.treasury,
            "market initialized"
        );

        Ok(Self {
            config,
            token,
            ledger,
            verifiers,
            gossipers,
            escrow,
            models,
            events: EventLog::new(),
        })
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    // ---- token ----

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.token.balance_of(account)
    }

    pub fn transfer(&mut self, from: &Address, to: &Address, amount: &Amount) -> MarketResult<()> {
        Ok(self.token.transfer(from, to, amount)?)
    }

    pub fn approve(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: &Amount,
    ) -> MarketResult<()> {
        Ok(self.token.approve(owner, spender, amount)?)
    }

    /// Address stakers approve before registering or creating a model
    pub fn custody_address(&self) -> Address {
        self.ledger.custody()
    }

    /// Address payers approve before locking a payment
    pub fn escrow_address(&self) -> Address {
        self.escrow.address()
    }

    pub fn token(&self) -> &TokenLedger {
        &self.token
    }

    // ---- pools ----

    pub fn register_verifier(
        &mut self,
        actor: &Address,
        amount_per_slot: &Amount,
        slots: SlotCount,
    ) -> MarketResult<Amount> {
        self.register(PoolKind::Verifiers, actor, amount_per_slot, slots)
    }

    pub fn register_gossiper(
        &mut self,
        actor: &Address,
        amount_per_slot: &Amount,
        slots: SlotCount,
    ) -> MarketResult<Amount> {
        self.register(PoolKind::Gossipers, actor, amount_per_slot, slots)
    }

    pub fn deregister_verifier(&mut self, actor: &Address) -> MarketResult<Amount> {
        self.deregister(PoolKind::Verifiers, actor)
    }

    pub fn deregister_gossiper(&mut self, actor: &Address) -> MarketResult<Amount> {
        self.deregister(PoolKind::Gossipers, actor)
    }

    pub fn is_registered_verifier(&self, actor: &Address) -> bool {
        self.verifiers.is_registered(&self.ledger, actor)
    }

    pub fn is_registered_gossiper(&self, actor: &Address) -> bool {
        self.gossipers.is_registered(&self.ledger, actor)
    }

    pub fn register(
        &mut self,
        kind: PoolKind,
        actor: &Address,
        amount_per_slot: &Amount,
        slots: SlotCount,
    ) -> MarketResult<Amount> {
        let (pool, ledger, token) = self.pool_parts(kind);
        let result = pool.register(ledger, token, actor, amount_per_slot, slots);
        self.absorb_events();
        Ok(result?)
    }

    pub fn deregister(&mut self, kind: PoolKind, actor: &Address) -> MarketResult<Amount> {
        let (pool, ledger, token) = self.pool_parts(kind);
        let result = pool.deregister(ledger, token, actor);
        self.absorb_events();
        Ok(result?)
    }

    pub fn eligible_set(&self, kind: PoolKind) -> Vec<Address> {
        self.pool(kind).eligible_set(&self.ledger)
    }

    pub fn submit_commitment(
        &mut self,
        kind: PoolKind,
        model_id: &JobId,
        actor: &Address,
        commitment: Hash,
        now: Timestamp,
    ) -> MarketResult<()> {
        let (pool, ledger, token) = self.pool_parts(kind);
        let result = pool.submit_commitment(ledger, token, model_id, actor, commitment, now);
        self.absorb_events();
        Ok(result?)
    }

    pub fn submit_reveal(
        &mut self,
        kind: PoolKind,
        model_id: &JobId,
        actor: &Address,
        secret: Secret,
        salt: Salt,
        now: Timestamp,
    ) -> MarketResult<()> {
        let (pool, ledger, token) = self.pool_parts(kind);
        let result = pool.submit_reveal(ledger, token, model_id, actor, secret, salt, now);
        self.absorb_events();
        Ok(result?)
    }

    /// Apply deadline transitions for a model's session in one pool
    pub fn poll(
        &mut self,
        kind: PoolKind,
        model_id: &JobId,
        now: Timestamp,
    ) -> MarketResult<SessionStatus> {
        let (pool, ledger, token) = self.pool_parts(kind);
        let result = pool.poll(ledger, token, model_id, now);
        self.absorb_events();
        Ok(result?)
    }

    // ---- payments ----

    #[allow(clippy::too_many_arguments)]
    pub fn lock_payment(
        &mut self,
        payer: &Address,
        model_id: JobId,
        amount: &Amount,
        payee: &Address,
        asset_id: AssetId,
        wall_time: Timestamp,
        now: Timestamp,
    ) -> MarketResult<()> {
        let result = self
            .escrow
            .lock(&mut self.token, model_id, payer, amount, payee, asset_id, wall_time, now);
        self.absorb_events();
        result
    }

    /// Payer reclaims a payment whose wall time ran out
    pub fn refund_expired_payment(
        &mut self,
        model_id: &JobId,
        now: Timestamp,
    ) -> MarketResult<Amount> {
        let result = self.escrow.refund_expired(&mut self.token, model_id, now);
        self.absorb_events();
        result
    }

    pub fn payment(&self, model_id: &JobId) -> Option<&Payment> {
        self.escrow.payment(model_id)
    }

    // ---- models ----

    pub fn create_model(
        &mut self,
        owner: &Address,
        model_id: JobId,
        data_asset_id: AssetId,
        min_k_verifiers: usize,
        min_k_gossipers: usize,
        now: Timestamp,
    ) -> MarketResult<Model> {
        let (models, mut ctx) = self.split();
        let result = models
            .create_model(
                &mut ctx,
                owner,
                model_id,
                data_asset_id,
                min_k_verifiers,
                min_k_gossipers,
                now,
            )
            .map(|m| m.clone());
        self.absorb_events();
        result
    }

    pub fn form_committees(
        &mut self,
        model_id: &JobId,
        now: Timestamp,
    ) -> MarketResult<(Vec<Address>, Vec<Address>)> {
        let (models, mut ctx) = self.split();
        let result = models.form_committees(&mut ctx, model_id, now);
        self.absorb_events();
        result
    }

    pub fn try_activate(&mut self, model_id: &JobId, now: Timestamp) -> MarketResult<ModelStatus> {
        let (models, mut ctx) = self.split();
        let result = models.try_activate(&mut ctx, model_id, now);
        self.absorb_events();
        result
    }

    pub fn resolve_model(
        &mut self,
        model_id: &JobId,
        verdict: &ModelVerdict,
    ) -> MarketResult<ModelResolution> {
        let (models, mut ctx) = self.split();
        let result = models.resolve(&mut ctx, model_id, verdict);
        self.absorb_events();
        result
    }

    pub fn cancel_model(&mut self, caller: &Address, model_id: &JobId) -> MarketResult<()> {
        let (models, mut ctx) = self.split();
        let result = models.cancel(&mut ctx, caller, model_id);
        self.absorb_events();
        result
    }

    pub fn model(&self, model_id: &JobId) -> Option<&Model> {
        self.models.model(model_id)
    }

    // ---- queries ----

    pub fn pool(&self, kind: PoolKind) -> &PoolManager {
        match kind {
            PoolKind::Verifiers => &self.verifiers,
            PoolKind::Gossipers => &self.gossipers,
        }
    }

    pub fn stake_ledger(&self) -> &StakeLedger {
        &self.ledger
    }

    pub fn session_status(&self, kind: PoolKind, model_id: &JobId) -> Option<SessionStatus> {
        self.pool(kind).session_status(model_id)
    }

    pub fn committee_of(&self, kind: PoolKind, model_id: &JobId) -> Option<&Committee> {
        self.pool(kind).committee_of(model_id)
    }

    /// Custody holds exactly the staked collateral and escrow exactly the
    /// locked payments
    pub fn check_invariants(&self) -> bool {
        self.ledger.check_invariants()
            && self.token.balance_of(&self.ledger.custody()) == *self.ledger.total_custody()
            && self.token.balance_of(&self.escrow.address()) == self.escrow.total_locked()
    }

    pub fn events(&self) -> &[MarketEvent] {
        self.events.events()
    }

    pub fn drain_events(&mut self) -> Vec<MarketEvent> {
        self.events.drain()
    }

    // ---- internals ----

    fn pool_parts(
        &mut self,
        kind: PoolKind,
    ) -> (&mut PoolManager, &mut StakeLedger, &mut TokenLedger) {
        let pool = match kind {
            PoolKind::Verifiers => &mut self.verifiers,
            PoolKind::Gossipers => &mut self.gossipers,
        };
        (pool, &mut self.ledger, &mut self.token)
    }

    fn split(&mut self) -> (&mut ModelLifecycle, MarketContext<'_, TokenLedger, Escrow>) {
        (
            &mut self.models,
            MarketContext {
                token: &mut self.token,
                ledger: &mut self.ledger,
                verifiers: &mut self.verifiers,
                gossipers: &mut self.gossipers,
                escrow: &mut self.escrow,
            },
        )
    }

    /// Move component events into the market log in call order
    fn absorb_events(&mut self) {
        for event in self
            .verifiers
            .drain_events()
            .into_iter()
            .chain(self.gossipers.drain_events())
            .chain(self.escrow.drain_events())
            .chain(self.models.drain_events())
        {
            self.events.emit(event);
        }
    }
}
