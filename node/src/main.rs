//! Two-phase commit node binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;
use twopc_core::{CohortFaults, CoordinatorFaults, NodeConfig, TwoPcError};
use twopc_node::{run_cohort, run_coordinator, run_simulation, SimulationPlan};

#[derive(Parser)]
#[command(name = "twopc")]
#[command(about = "Two-phase commit coordinator and cohort over pub/sub")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator
    Coordinator {
        /// Crash instead of broadcasting Prepare
        #[arg(long)]
        skip_prepare: bool,

        /// Crash instead of broadcasting Commit
        #[arg(long)]
        skip_commit: bool,

        /// Number of cohorts (skips the hosts file scan)
        #[arg(long)]
        cohorts: Option<usize>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run a cohort
    Cohort {
        /// Always vote Disagree
        #[arg(long)]
        always_disagree: bool,

        /// Crash instead of sending Ack
        #[arg(long)]
        crash_before_ack: bool,

        /// Peer address to dial (repeatable)
        #[arg(long = "bootstrap")]
        bootstrap: Vec<String>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run a coordinator and its cohorts in this process
    Simulate {
        /// Number of cohorts
        #[arg(long, default_value = "3")]
        cohorts: usize,

        /// Coordinator crashes instead of broadcasting Prepare
        #[arg(long)]
        skip_prepare: bool,

        /// Coordinator crashes instead of broadcasting Commit
        #[arg(long)]
        skip_commit: bool,

        /// Number of cohorts that vote Disagree
        #[arg(long, default_value = "0")]
        disagree: usize,

        /// Number of cohorts that crash before sending Ack
        #[arg(long, default_value = "0")]
        crash_before_ack: usize,

        /// Skip the cohort processing delay
        #[arg(long)]
        no_delay: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Print the default configuration as JSON
    ConfigTemplate,
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// P2P listen address
    #[arg(long)]
    listen: Option<String>,

    /// Log level, overridden by RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

impl CommonArgs {
    fn load(&self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_json_file(path)?,
            None => NodeConfig::default(),
        };

        if let Some(listen) = &self.listen {
            config.network.listen_addr = listen.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }

        Ok(config)
    }
}

/// Log a failed run, telling setup failures apart from failures mid-protocol
fn report_failure(role: &str, err: TwoPcError) -> anyhow::Error {
    if err.is_setup() {
        error!("{} setup failed: {}", role, err);
    } else {
        error!("{} failed during the run: {}", role, err);
    }
    err.into()
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Coordinator {
            skip_prepare,
            skip_commit,
            cohorts,
            common,
        } => {
            let config = common.load()?;
            init_logging(&config.log_level);

            let faults = CoordinatorFaults {
                skip_prepare,
                skip_commit,
            };
            if let Err(e) = run_coordinator(&config, faults, cohorts).await {
                return Err(report_failure("Coordinator", e));
            }
        }

        Commands::Cohort {
            always_disagree,
            crash_before_ack,
            bootstrap,
            common,
        } => {
            let mut config = common.load()?;
            init_logging(&config.log_level);
            config.network.bootstrap_nodes.extend(bootstrap);

            let faults = CohortFaults {
                always_disagree,
                crash_before_ack,
            };
            if let Err(e) = run_cohort(&config, faults).await {
                return Err(report_failure("Cohort", e));
            }
        }

        Commands::Simulate {
            cohorts,
            skip_prepare,
            skip_commit,
            disagree,
            crash_before_ack,
            no_delay,
            json,
            common,
        } => {
            let config = common.load()?;
            init_logging(&config.log_level);

            let mut protocol = config.protocol.clone();
            if no_delay {
                protocol.min_delay_ms = 0;
                protocol.max_delay_ms = 0;
            }

            let plan = SimulationPlan {
                cohorts,
                coordinator_faults: CoordinatorFaults {
                    skip_prepare,
                    skip_commit,
                },
                disagreeing: disagree,
                crashing: crash_before_ack,
                protocol,
                seed: twopc_node::jitter_seed(&config.name),
            };

            let report = run_simulation(&plan).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
        }

        Commands::ConfigTemplate => {
            println!("{}", NodeConfig::default().to_json()?);
        }
    }

    Ok(())
}
