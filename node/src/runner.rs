//! Process runner: setup, one protocol run, exit
//!
//! Setup failures (membership, identity, transport, topology) are returned
//! before any state machine exists. Once the engine runs, only a transport
//! failure can still surface as an error.

use crate::identity::{jitter_seed, local_hostname};
use crate::membership::membership_from_config;
use tracing::{info, warn};
use twopc_core::{
    CohortFaults, CoordinatorFaults, MembershipSource, NodeConfig, Outcome, Role, TwoPcResult,
};
use twopc_p2p::GossipChannel;
use twopc_protocol::{Cohort, CohortSettings, Coordinator, CoordinatorSettings, JitterDelay};

/// Run the coordinator process end to end
pub async fn run_coordinator(
    config: &NodeConfig,
    faults: CoordinatorFaults,
    cohort_override: Option<usize>,
) -> TwoPcResult<Outcome> {
    config.validate()?;

    let cohort_count = membership_from_config(&config.membership, cohort_override).cohort_count()?;
    info!("Cohort count is {}", cohort_count);

    info!("Initializing message transport");
    let mut channel = GossipChannel::connect(Role::Coordinator, &config.network).await?;
    let addr = channel.listen_addr(config.network.startup_timeout()).await?;
    info!("Cohorts can bootstrap from {}/p2p/{}", addr, channel.local_peer_id());
    channel
        .wait_for_subscribers(cohort_count.get(), config.network.startup_timeout())
        .await?;

    let settings = CoordinatorSettings::from_config(cohort_count, &config.protocol, faults);
    let mut coordinator = Coordinator::start(channel, settings).await?;
    let outcome = coordinator.run().await?;

    finish(config, Role::Coordinator, outcome).await;
    Ok(outcome)
}

/// Run a cohort process end to end
pub async fn run_cohort(config: &NodeConfig, faults: CohortFaults) -> TwoPcResult<Outcome> {
    config.validate()?;

    // Cohorts only report the count; the protocol never needs it on this side
    match membership_from_config(&config.membership, None).cohort_count() {
        Ok(count) => info!("Cohort count is {}", count),
        Err(e) => warn!("Cohort count unavailable: {}", e),
    }

    let hostname = local_hostname()?;
    info!("Cohort {} starting", hostname);

    let mut channel = GossipChannel::connect(Role::Cohort, &config.network).await?;
    channel
        .wait_for_subscribers(1, config.network.startup_timeout())
        .await?;

    let delay = JitterDelay::from_config(&config.protocol, jitter_seed(&hostname));
    let settings = CohortSettings::from_config(&config.protocol, faults);
    let mut cohort = Cohort::new(channel, delay, settings);
    let outcome = cohort.run().await?;

    finish(config, Role::Cohort, outcome).await;
    Ok(outcome)
}

/// Give the last publish time to leave before the transport shuts down
async fn finish(config: &NodeConfig, role: Role, outcome: Outcome) {
    info!("{} run {}, exiting", role, outcome);
    tokio::time::sleep(config.protocol.exit_linger()).await;
}
