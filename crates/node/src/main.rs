// node/src/main.rs
use clap::{Parser, Subcommand};
use market_crypto::Hash;
use node::{NodeConfig, Simulation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "market-node")]
#[command(about = "Staked committee marketplace node", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "./market.toml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Run one model through registration, committee formation and resolution
    Simulate {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Label the model id is derived from
        #[arg(short, long, default_value = "simulated-model")]
        model: String,

        /// Override the number of verifiers that never reveal
        #[arg(long)]
        silent_verifiers: Option<usize>,

        /// Override the number of gossipers that never reveal
        #[arg(long)]
        silent_gossipers: Option<usize>,

        /// Override the number of verifiers the verdict marks dishonest
        #[arg(long)]
        dishonest_verifiers: Option<usize>,

        /// Reject the model instead of accepting it
        #[arg(long)]
        reject: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    let default_filter = format!(
        "warn,staking={0},marketplace={0},node={0},market_node={0}",
        log_level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force)?,
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Simulate {
            config,
            model,
            silent_verifiers,
            silent_gossipers,
            dishonest_verifiers,
            reject,
        } => {
            let mut config = load_config(config.as_deref())?;
            let sim = &mut config.simulation;
            if let Some(n) = silent_verifiers {
                sim.silent_verifiers = n;
            }
            if let Some(n) = silent_gossipers {
                sim.silent_gossipers = n;
            }
            if let Some(n) = dishonest_verifiers {
                sim.dishonest_verifiers = n;
            }
            if reject {
                sim.accept = false;
            }
            simulate(&config, &model)?;
        }
    }

    Ok(())
}

fn init_config(output: &str, force: bool) -> anyhow::Result<()> {
    if std::path::Path::new(output).exists() && !force {
        anyhow::bail!("{} already exists, pass --force to overwrite", output);
    }
    NodeConfig::default().to_file(output)?;
    tracing::info!("Default configuration written to {}", output);
    Ok(())
}

fn load_config(path: Option<&str>) -> anyhow::Result<NodeConfig> {
    match path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            NodeConfig::from_file(path)
        }
        None => Ok(NodeConfig::default()),
    }
}

fn simulate(config: &NodeConfig, model: &str) -> anyhow::Result<()> {
    let model_id = Hash::of_label(model);
    tracing::info!(%model_id, label = model, "starting simulation");

    let mut simulation = Simulation::new(config)?;
    let report = simulation.run(model_id)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.invariants_hold {
        anyhow::bail!("ledger invariants violated");
    }
    Ok(())
}
