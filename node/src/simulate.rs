//! In-process simulation of a whole run over the memory hub

use serde::Serialize;
use std::fmt;
use tracing::{info, info_span, Instrument};
use twopc_core::{
    CohortCount, CohortFaults, CoordinatorFaults, Outcome, ProtocolConfig, TwoPcError, TwoPcResult,
};
use twopc_p2p::MemoryHub;
use twopc_protocol::{Cohort, CohortSettings, Coordinator, CoordinatorSettings, JitterDelay};

/// Shape of a simulated run
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub cohorts: usize,
    pub coordinator_faults: CoordinatorFaults,
    /// The first `disagreeing` cohorts vote Disagree
    pub disagreeing: usize,
    /// The next `crashing` cohorts stop before sending Ack
    pub crashing: usize,
    pub protocol: ProtocolConfig,
    pub seed: u64,
}

impl SimulationPlan {
    pub fn new(cohorts: usize) -> Self {
        Self {
            cohorts,
            coordinator_faults: CoordinatorFaults::default(),
            disagreeing: 0,
            crashing: 0,
            protocol: ProtocolConfig::default(),
            seed: 0,
        }
    }

    /// Fault flags for each cohort, in spawn order
    pub fn cohort_faults(&self) -> TwoPcResult<Vec<CohortFaults>> {
        if self.disagreeing + self.crashing > self.cohorts {
            return Err(TwoPcError::Config(format!(
                "{} disagreeing and {} crashing cohorts exceed the {} cohorts",
                self.disagreeing, self.crashing, self.cohorts
            )));
        }

        Ok((0..self.cohorts)
            .map(|i| CohortFaults {
                always_disagree: i < self.disagreeing,
                crash_before_ack: i >= self.disagreeing && i < self.disagreeing + self.crashing,
            })
            .collect())
    }
}

/// How every participant ended
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub coordinator: Outcome,
    pub cohorts: Vec<Outcome>,
}

impl SimulationReport {
    /// Every participant that reached a terminal phase reached the same one.
    /// Heuristic commits after a lost decision can break this.
    pub fn is_consistent(&self) -> bool {
        let mut phases = std::iter::once(&self.coordinator)
            .chain(self.cohorts.iter())
            .filter_map(Outcome::phase);

        match phases.next() {
            Some(first) => phases.all(|phase| phase == first),
            None => true,
        }
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "coordinator: {}", self.coordinator)?;
        for (i, outcome) in self.cohorts.iter().enumerate() {
            writeln!(f, "cohort-{}: {}", i + 1, outcome)?;
        }
        write!(
            f,
            "global state: {}",
            if self.is_consistent() { "consistent" } else { "INCONSISTENT" }
        )
    }
}

/// Run a coordinator and `plan.cohorts` cohorts to completion in this process
pub async fn run_simulation(plan: &SimulationPlan) -> TwoPcResult<SimulationReport> {
    plan.protocol.validate()?;
    let cohort_count = CohortCount::new(plan.cohorts)?;
    let faults = plan.cohort_faults()?;

    let hub = MemoryHub::new();
    let coordinator_endpoint = hub.coordinator()?;

    let mut handles = Vec::with_capacity(faults.len());
    for (i, cohort_faults) in faults.into_iter().enumerate() {
        let endpoint = hub.cohort();
        let delay = JitterDelay::from_config(&plan.protocol, plan.seed.wrapping_add(i as u64));
        let settings = CohortSettings::from_config(&plan.protocol, cohort_faults);
        let span = info_span!("cohort", id = i + 1);

        handles.push(tokio::spawn(
            async move { Cohort::new(endpoint, delay, settings).run().await }.instrument(span),
        ));
    }

    let settings =
        CoordinatorSettings::from_config(cohort_count, &plan.protocol, plan.coordinator_faults);
    let coordinator_outcome = async {
        let mut coordinator = Coordinator::start(coordinator_endpoint, settings).await?;
        coordinator.run().await
    }
    .instrument(info_span!("coordinator"))
    .await?;

    let mut cohorts = Vec::with_capacity(handles.len());
    for handle in handles {
        let outcome = handle
            .await
            .map_err(|e| TwoPcError::Other(anyhow::anyhow!("cohort task failed: {}", e)))??;
        cohorts.push(outcome);
    }

    let report = SimulationReport {
        coordinator: coordinator_outcome,
        cohorts,
    };
    info!("Simulation finished, consistent: {}", report.is_consistent());
    Ok(report)
}
