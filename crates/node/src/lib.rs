// node/src/lib.rs
pub mod config;
pub mod simulation;

pub use config::{NodeConfig, SimulationConfig};
pub use simulation::{PoolSummary, Simulation, SimulationReport};
