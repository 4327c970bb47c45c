// node/src/simulation.rs
use crate::{NodeConfig, SimulationConfig};
use market_core::{Amount, JobId, PoolKind, Timestamp};
use market_crypto::{commitment_of, Address, Hash, Salt, Secret};
use marketplace::{Market, ModelStatus, ModelVerdict, PaymentStatus};
use serde::Serialize;
use staking::SessionStatus;
use std::collections::HashMap;

/// Outcome of one committee pool in a simulated run
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    pub rounds: u32,
    pub committee: Vec<Address>,
    pub slashed: usize,
}

/// JSON summary printed by `market-node simulate`
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub model_id: JobId,
    pub status: ModelStatus,
    pub verifiers: PoolSummary,
    pub gossipers: PoolSummary,
    pub payment: Option<PaymentStatus>,
    pub treasury_balance: Amount,
    pub events: usize,
    pub finished_at: Timestamp,
    pub invariants_hold: bool,
}

/// Drives a [`Market`] through one model's life on a logical clock
pub struct Simulation {
    config: SimulationConfig,
    market: Market,
    verifiers: Vec<Address>,
    gossipers: Vec<Address>,
    scientist: Address,
    owner: Address,
    keys: HashMap<(PoolKind, Address), (Secret, Salt)>,
    now: Timestamp,
}

impl Simulation {
    pub fn new(config: &NodeConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let mut market = Market::new(config.market.clone())?;
        let sim = config.simulation.clone();

        let genesis = market.config().token.genesis_account;
        let custody = market.custody_address();
        let stake = Amount::from_u64(sim.stake_per_slot).mul_u64(u64::from(sim.slots));

        let mut enroll = |kind: PoolKind, n: usize| -> anyhow::Result<Vec<Address>> {
            let mut actors = Vec::with_capacity(n);
            for i in 0..n {
                let actor = Address::from_name(&format!("{}-{}", kind, i));
                market.transfer(&genesis, &actor, &Amount::from_u64(sim.actor_funds))?;
                market.approve(&actor, &custody, &stake)?;
                market.register(kind, &actor, &Amount::from_u64(sim.stake_per_slot), sim.slots)?;
                actors.push(actor);
            }
            Ok(actors)
        };
        let verifiers = enroll(PoolKind::Verifiers, sim.verifiers)?;
        let gossipers = enroll(PoolKind::Gossipers, sim.gossipers)?;

        let scientist = Address::from_name("data-scientist");
        let owner = Address::from_name("data-owner");
        let model_stake = market.config().model.min_model_stake;
        market.transfer(&genesis, &scientist, &Amount::from_u64(sim.price))?;
        market.transfer(&genesis, &owner, &Amount::from_u64(model_stake))?;

        tracing::info!(
            verifiers = verifiers.len(),
            gossipers = gossipers.len(),
            "simulation actors registered"
        );

        Ok(Self {
            config: sim,
            market,
            verifiers,
            gossipers,
            scientist,
            owner,
            keys: HashMap::new(),
            now: 0,
        })
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    /// Run the whole scenario for `model_id`
    pub fn run(&mut self, model_id: JobId) -> anyhow::Result<SimulationReport> {
        let asset_id = Hash::of_label("simulated-data-asset");
        let price = Amount::from_u64(self.config.price);

        let escrow = self.market.escrow_address();
        self.market.approve(&self.scientist, &escrow, &price)?;
        self.market.lock_payment(
            &self.scientist,
            model_id,
            &price,
            &self.owner,
            asset_id,
            self.config.wall_time,
            self.now,
        )?;

        let custody = self.market.custody_address();
        let model_stake = Amount::from_u64(self.market.config().model.min_model_stake);
        self.market.approve(&self.owner, &custody, &model_stake)?;
        self.market.create_model(
            &self.owner,
            model_id,
            asset_id,
            self.config.min_k_verifiers,
            self.config.min_k_gossipers,
            self.now,
        )?;

        self.tick(1);
        self.market.form_committees(&model_id, self.now)?;

        let max_rounds = self.market.config().model.max_committee_attempts;
        let mut status = ModelStatus::CommitteeForming;
        let mut played = 0;
        while status == ModelStatus::CommitteeForming {
            anyhow::ensure!(
                played < max_rounds,
                "committees still forming after {} rounds",
                played
            );
            status = self.play_round(&model_id)?;
            played += 1;
        }

        let mut payment = self.market.payment(&model_id).map(|p| p.status);
        let mut slashed = (0, 0);
        let committees = (
            self.committee(PoolKind::Verifiers, &model_id),
            self.committee(PoolKind::Gossipers, &model_id),
        );

        if status == ModelStatus::InProgress {
            let mut verdict = if self.config.accept {
                ModelVerdict::accepted()
            } else {
                ModelVerdict::rejected()
            };
            verdict.dishonest_verifiers =
                committees.0.iter().take(self.config.dishonest_verifiers).copied().collect();

            let resolution = self.market.resolve_model(&model_id, &verdict)?;
            payment = resolution.payment;
            slashed = (resolution.verifiers.slashed.len(), resolution.gossipers.slashed.len());
            status = ModelStatus::Finalized;
        }

        let rounds = self
            .market
            .model(&model_id)
            .map(|m| (m.verifier_rounds, m.gossiper_rounds))
            .unwrap_or_default();
        let treasury = self.market.config().treasury;

        let report = SimulationReport {
            model_id,
            status,
            verifiers: PoolSummary {
                rounds: rounds.0,
                committee: committees.0,
                slashed: slashed.0,
            },
            gossipers: PoolSummary {
                rounds: rounds.1,
                committee: committees.1,
                slashed: slashed.1,
            },
            payment,
            treasury_balance: self.market.balance_of(&treasury),
            events: self.market.events().len(),
            finished_at: self.now,
            invariants_hold: self.market.check_invariants(),
        };

        tracing::info!(
            %model_id,
            status = %report.status,
            finished_at = self.now,
            "simulation finished"
        );
        Ok(report)
    }

    /// Commit, reveal and wait out every open session, then try to activate
    fn play_round(&mut self, model_id: &JobId) -> anyhow::Result<ModelStatus> {
        let opened = self.now;
        let mut wait = 0;

        for kind in [PoolKind::Verifiers, PoolKind::Gossipers] {
            if self.market.committee_of(kind, model_id).is_some() {
                continue;
            }
            let participants = match self.market.pool(kind).session(model_id) {
                Some(session) if session.status() == SessionStatus::Collecting => {
                    session.participants().to_vec()
                }
                _ => continue,
            };
            let cfg = self.market.pool(kind).config().clone();
            let silent = self.silent(kind);

            for actor in &participants {
                let (secret, salt) = (Secret::random(), Salt::random());
                self.keys.insert((kind, *actor), (secret, salt));
                let commitment = commitment_of(&secret, &salt);
                self.market
                    .submit_commitment(kind, model_id, actor, commitment, opened + 1)?;
            }
            let reveal_at = opened + cfg.commit_timeout;
            for actor in participants.iter().filter(|a| !silent.contains(a)) {
                if let Some((secret, salt)) = self.keys.get(&(kind, *actor)).copied() {
                    self.market.submit_reveal(kind, model_id, actor, secret, salt, reveal_at)?;
                }
            }
            wait = wait.max(cfg.commit_timeout + cfg.reveal_timeout);
        }

        self.tick(wait.max(1));
        let status = self.market.try_activate(model_id, self.now)?;
        tracing::debug!(%model_id, now = self.now, %status, "round played");
        Ok(status)
    }

    fn silent(&self, kind: PoolKind) -> Vec<Address> {
        let (actors, n) = match kind {
            PoolKind::Verifiers => (&self.verifiers, self.config.silent_verifiers),
            PoolKind::Gossipers => (&self.gossipers, self.config.silent_gossipers),
        };
        actors.iter().take(n).copied().collect()
    }

    fn committee(&self, kind: PoolKind, model_id: &JobId) -> Vec<Address> {
        self.market
            .committee_of(kind, model_id)
            .map(|c| c.members.clone())
            .unwrap_or_default()
    }

    fn tick(&mut self, seconds: Timestamp) {
        self.now = self.now.saturating_add(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(config: NodeConfig) -> SimulationReport {
        let mut sim = Simulation::new(&config).unwrap();
        sim.run(Hash::of_label("simulated-model")).unwrap()
    }

    #[test]
    fn test_honest_run_finalizes() {
        let report = run(NodeConfig::default());
        assert_eq!(report.status, ModelStatus::Finalized);
        assert_eq!(report.payment, Some(PaymentStatus::Released));
        assert_eq!(report.verifiers.rounds, 1);
        assert_eq!(report.verifiers.committee.len(), 5);
        assert_eq!(report.gossipers.committee.len(), 3);
        assert!(report.treasury_balance.is_zero());
        assert!(report.invariants_hold);
    }

    #[test]
    fn test_silent_verifiers_are_slashed() {
        let mut config = NodeConfig::default();
        config.simulation.silent_verifiers = 2;
        let report = run(config);

        assert_eq!(report.status, ModelStatus::Finalized);
        assert_eq!(report.verifiers.committee.len(), 3);
        assert!(!report.treasury_balance.is_zero());
        assert!(report.invariants_hold);
    }

    #[test]
    fn test_too_many_silent_verifiers_cancel_the_model() {
        let mut config = NodeConfig::default();
        config.simulation.silent_verifiers = 3;
        let report = run(config);

        // the silent verifiers lose their last slot in the second round,
        // leaving too few candidates for a third
        assert_eq!(report.status, ModelStatus::Cancelled);
        assert_eq!(report.verifiers.rounds, 2);
        assert!(report.verifiers.committee.is_empty());
        assert_eq!(report.payment, Some(PaymentStatus::Refunded));
        assert!(report.invariants_hold);
    }

    #[test]
    fn test_dishonest_verdict() {
        let mut config = NodeConfig::default();
        config.simulation.dishonest_verifiers = 1;
        config.simulation.accept = false;
        let report = run(config);

        assert_eq!(report.verifiers.slashed, 1);
        assert_eq!(report.payment, Some(PaymentStatus::Refunded));
        assert!(report.invariants_hold);
    }
}
