// node/src/config.rs
use marketplace::MarketConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub market: MarketConfig,
    pub simulation: SimulationConfig,
}

/// Parameters of the `simulate` scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub verifiers: usize,
    pub gossipers: usize,
    /// Tokens each actor receives from genesis
    pub actor_funds: u64,
    pub stake_per_slot: u64,
    pub slots: u32,
    /// Price the data scientist locks
    pub price: u64,
    pub wall_time: u64,
    pub min_k_verifiers: usize,
    pub min_k_gossipers: usize,
    /// Verifiers that commit but never reveal
    pub silent_verifiers: usize,
    /// Gossipers that commit but never reveal
    pub silent_gossipers: usize,
    /// Committee members the verdict marks dishonest
    pub dishonest_verifiers: usize,
    pub accept: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            verifiers: 5,
            gossipers: 3,
            actor_funds: 1_000,
            stake_per_slot: 50,
            slots: 2,
            price: 100,
            wall_time: 3_600,
            min_k_verifiers: 3,
            min_k_gossipers: 1,
            silent_verifiers: 0,
            silent_gossipers: 0,
            dishonest_verifiers: 0,
            accept: true,
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.market.validate()?;

        let sim = &self.simulation;
        anyhow::ensure!(sim.slots > 0, "simulation.slots must be positive");
        anyhow::ensure!(sim.price > 0, "simulation.price must be positive");
        anyhow::ensure!(
            sim.silent_verifiers <= sim.verifiers,
            "simulation.silent_verifiers exceeds simulation.verifiers"
        );
        anyhow::ensure!(
            sim.silent_gossipers <= sim.gossipers,
            "simulation.silent_gossipers exceeds simulation.gossipers"
        );
        let stake = sim.stake_per_slot.saturating_mul(u64::from(sim.slots));
        anyhow::ensure!(
            stake <= sim.actor_funds,
            "actors cannot afford a stake of {} with {} funds",
            stake,
            sim.actor_funds
        );
        Ok(())
    }
}
