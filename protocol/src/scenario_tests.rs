//! End-to-end runs of one coordinator and N cohorts over the memory hub.
//!
//! Time is paused, so timeouts fast-forward deterministically.

use crate::{Cohort, CohortSettings, Coordinator, CoordinatorSettings, NoDelay};
use std::time::Duration;
use tokio::task::JoinHandle;
use twopc_core::{
    CohortCount, CohortFaults, CoordinatorFaults, CrashPoint, Outcome, TwoPcResult,
};
use twopc_p2p::{MemoryEndpoint, MemoryHub};

const COORDINATOR_TIMEOUT: Duration = Duration::from_secs(5);
const COHORT_TIMEOUT: Duration = Duration::from_secs(6);

struct Run {
    coordinator: Outcome,
    cohorts: Vec<Outcome>,
}

fn spawn_cohort(
    endpoint: MemoryEndpoint,
    faults: CohortFaults,
) -> JoinHandle<TwoPcResult<Outcome>> {
    tokio::spawn(async move {
        let mut cohort = Cohort::new(
            endpoint,
            NoDelay,
            CohortSettings::new(COHORT_TIMEOUT, faults),
        );
        cohort.run().await
    })
}

async fn run(coordinator_faults: CoordinatorFaults, cohort_faults: Vec<CohortFaults>) -> Run {
    let hub = MemoryHub::new();
    let coordinator_endpoint = hub.coordinator().unwrap();

    let handles: Vec<_> = cohort_faults
        .into_iter()
        .map(|faults| spawn_cohort(hub.cohort(), faults))
        .collect();

    let settings = CoordinatorSettings::new(
        CohortCount::new(handles.len()).unwrap(),
        COORDINATOR_TIMEOUT,
        coordinator_faults,
    );
    let mut coordinator = Coordinator::start(coordinator_endpoint, settings)
        .await
        .unwrap();
    let coordinator_outcome = coordinator.run().await.unwrap();
    // A crashed coordinator is gone; its queue goes with it
    drop(coordinator);

    let mut cohorts = Vec::new();
    for handle in handles {
        cohorts.push(handle.await.unwrap().unwrap());
    }

    Run {
        coordinator: coordinator_outcome,
        cohorts,
    }
}

fn healthy(n: usize) -> Vec<CohortFaults> {
    vec![CohortFaults::default(); n]
}

#[tokio::test(start_paused = true)]
async fn test_all_agree_commits() {
    for n in 1..=5 {
        let run = run(CoordinatorFaults::default(), healthy(n)).await;

        assert_eq!(run.coordinator, Outcome::Committed);
        assert_eq!(run.cohorts, vec![Outcome::Committed; n]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_dissent_aborts() {
    let mut faults = healthy(4);
    faults[2].always_disagree = true;

    let run = run(CoordinatorFaults::default(), faults).await;

    assert_eq!(run.coordinator, Outcome::Aborted);
    assert_eq!(run.cohorts, vec![Outcome::Aborted; 4]);
}

#[tokio::test(start_paused = true)]
async fn test_coordinator_crash_before_prepare() {
    let faults = CoordinatorFaults {
        skip_prepare: true,
        skip_commit: false,
    };

    let run = run(faults, healthy(3)).await;

    assert_eq!(run.coordinator, Outcome::Crashed(CrashPoint::BeforePrepare));
    // Every cohort voted Agree, then timed out in Waiting
    assert_eq!(run.cohorts, vec![Outcome::Aborted; 3]);
}

#[tokio::test(start_paused = true)]
async fn test_coordinator_crash_after_prepare_commits_heuristically() {
    let faults = CoordinatorFaults {
        skip_prepare: false,
        skip_commit: true,
    };

    let run = run(faults, healthy(3)).await;

    assert_eq!(run.coordinator, Outcome::Crashed(CrashPoint::AfterPrepare));
    // Documented heuristic termination: prepared cohorts commit on silence
    // even though no commit decision was ever made.
    assert_eq!(run.cohorts, vec![Outcome::Committed; 3]);
}

#[tokio::test(start_paused = true)]
async fn test_cohort_crash_before_ack_aborts_survivors() {
    let mut faults = healthy(3);
    faults[0].crash_before_ack = true;

    let run = run(CoordinatorFaults::default(), faults).await;

    assert_eq!(run.coordinator, Outcome::Aborted);
    assert_eq!(
        run.cohorts,
        vec![
            Outcome::Crashed(CrashPoint::BeforeAck),
            Outcome::Aborted,
            Outcome::Aborted,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_cohort_times_out_coordinator() {
    let hub = MemoryHub::new();
    let endpoint = hub.coordinator().unwrap();
    let handles: Vec<_> = (0..2)
        .map(|_| spawn_cohort(hub.cohort(), CohortFaults::default()))
        .collect();

    // Expect three cohorts while only two exist
    let settings = CoordinatorSettings::new(
        CohortCount::new(3).unwrap(),
        COORDINATOR_TIMEOUT,
        CoordinatorFaults::default(),
    );
    let mut coordinator = Coordinator::start(endpoint, settings).await.unwrap();

    assert_eq!(coordinator.run().await.unwrap(), Outcome::Aborted);
    assert_eq!(coordinator.tally(), 2);
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Outcome::Aborted);
    }
}
