//! Coordinator state machine
//!
//! Drives a single transaction: broadcasts `CommitRequest`, waits for an
//! `Agree` from every cohort, broadcasts `Prepare`, waits for an `Ack` from
//! every cohort, then broadcasts `Commit`. A `Disagree` or an expired global
//! timer in any non-terminal phase ends the run with a broadcast `Abort`.

use crate::tally::Tally;
use crate::Step;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use twopc_core::{
    CohortCount, CoordinatorFaults, CrashPoint, Inbound, MessageChannel, Outcome, Phase,
    ProtocolConfig, ProtocolMessage, TwoPcResult,
};

/// Everything the coordinator needs, fixed at process start
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub cohort_count: CohortCount,
    pub timeout: Duration,
    pub faults: CoordinatorFaults,
}

impl CoordinatorSettings {
    pub fn new(cohort_count: CohortCount, timeout: Duration, faults: CoordinatorFaults) -> Self {
        Self {
            cohort_count,
            timeout,
            faults,
        }
    }

    pub fn from_config(
        cohort_count: CohortCount,
        config: &ProtocolConfig,
        faults: CoordinatorFaults,
    ) -> Self {
        Self::new(cohort_count, config.coordinator_timeout(), faults)
    }
}

/// Coordinator side of a two-phase commit run
pub struct Coordinator<C> {
    channel: C,
    settings: CoordinatorSettings,
    phase: Phase,
    tally: Tally,
    deadline: Instant,
    crashed: Option<CrashPoint>,
}

impl<C: MessageChannel> Coordinator<C> {
    /// Broadcast `CommitRequest` and enter `Waiting` with the timer armed
    pub async fn start(mut channel: C, settings: CoordinatorSettings) -> TwoPcResult<Self> {
        info!(
            "Initiating commit with {} cohorts - broadcasting CommitRequest",
            settings.cohort_count
        );
        channel.broadcast(ProtocolMessage::CommitRequest).await?;

        let mut coordinator = Self {
            channel,
            settings,
            phase: Phase::NotInitiated,
            tally: Tally::new(),
            deadline: Instant::now() + settings.timeout,
            crashed: None,
        };
        coordinator.enter(Phase::Waiting);

        Ok(coordinator)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Agrees or acks counted in the current phase
    pub fn tally(&self) -> usize {
        self.tally.count()
    }

    /// When the global timer fires, `None` once the run has ended
    pub fn deadline(&self) -> Option<Instant> {
        self.outcome().is_none().then_some(self.deadline)
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// How the run ended, if it has
    pub fn outcome(&self) -> Option<Outcome> {
        if let Some(point) = self.crashed {
            return Some(Outcome::Crashed(point));
        }
        match self.phase {
            Phase::Committed => Some(Outcome::Committed),
            Phase::Aborted => Some(Outcome::Aborted),
            _ => None,
        }
    }

    /// Event loop: one receive per iteration, at most one transition each
    pub async fn run(&mut self) -> TwoPcResult<Outcome> {
        loop {
            if let Some(outcome) = self.outcome() {
                return Ok(outcome);
            }

            let step = match self.channel.receive(self.deadline).await? {
                Inbound::Message(message) => self.handle_message(message).await?,
                Inbound::Unrecognized(raw) => self.handle_unrecognized(&raw),
                Inbound::TimedOut => self.handle_timeout().await?,
            };

            if let Step::Exit(outcome) = step {
                return Ok(outcome);
            }
        }
    }

    /// Apply one inbound message
    pub async fn handle_message(&mut self, message: ProtocolMessage) -> TwoPcResult<Step> {
        if let Some(outcome) = self.outcome() {
            debug!("Run already {}, ignoring {}", outcome, message);
            return Ok(Step::Exit(outcome));
        }

        match (self.phase, message) {
            (Phase::Waiting, ProtocolMessage::Disagree) => {
                info!("Cohort disagrees, transitioning to Aborted state");
                self.abort().await
            }
            (Phase::Waiting, ProtocolMessage::Agree) => {
                let agreed = self.tally.record();
                info!("Cohort agreed, number of cohorts agreeing so far: {}", agreed);

                if self.tally.is_complete(self.settings.cohort_count) {
                    self.prepare().await
                } else {
                    Ok(Step::Continue)
                }
            }
            (Phase::Prepared, ProtocolMessage::Ack) => {
                let acked = self.tally.record();
                info!("Received Ack, Ack count so far: {}", acked);

                if self.tally.is_complete(self.settings.cohort_count) {
                    self.commit().await
                } else {
                    Ok(Step::Continue)
                }
            }
            (phase, message) => {
                warn!("Unexpected message {} in {} state, ignoring", message, phase);
                Ok(Step::Continue)
            }
        }
    }

    /// Payloads that are not protocol tags never change the phase
    pub fn handle_unrecognized(&mut self, raw: &str) -> Step {
        match self.outcome() {
            Some(outcome) => Step::Exit(outcome),
            None => {
                warn!("Unrecognized message {:?} in {} state, ignoring", raw, self.phase);
                Step::Continue
            }
        }
    }

    /// The global timer fired. Any partial tally is discarded.
    pub async fn handle_timeout(&mut self) -> TwoPcResult<Step> {
        if let Some(outcome) = self.outcome() {
            return Ok(Step::Exit(outcome));
        }

        warn!(
            "Timeout occurred in {} state with {} of {} replies, transitioning to Aborted state",
            self.phase,
            self.tally.count(),
            self.settings.cohort_count
        );
        self.abort().await
    }

    async fn prepare(&mut self) -> TwoPcResult<Step> {
        info!("All cohorts agreed, broadcasting Prepare and transitioning to Prepared state");

        if self.settings.faults.skip_prepare {
            return Ok(self.crash(CrashPoint::BeforePrepare));
        }

        self.channel.broadcast(ProtocolMessage::Prepare).await?;

        if self.settings.faults.skip_commit {
            return Ok(self.crash(CrashPoint::AfterPrepare));
        }

        self.tally.reset();
        self.enter(Phase::Prepared);
        Ok(Step::Continue)
    }

    async fn commit(&mut self) -> TwoPcResult<Step> {
        info!("Received Ack from all cohorts, broadcasting Commit and transitioning to Committed state");
        self.enter(Phase::Committed);
        self.channel.broadcast(ProtocolMessage::Commit).await?;
        info!("Transaction successfully committed");
        Ok(Step::Exit(Outcome::Committed))
    }

    async fn abort(&mut self) -> TwoPcResult<Step> {
        self.enter(Phase::Aborted);
        info!("Broadcasting Abort");
        self.channel.broadcast(ProtocolMessage::Abort).await?;
        Ok(Step::Exit(Outcome::Aborted))
    }

    fn crash(&mut self, point: CrashPoint) -> Step {
        warn!("CRASH! Coordinator stops {} (fault injection)", point);
        self.crashed = Some(point);
        Step::Exit(Outcome::Crashed(point))
    }

    fn enter(&mut self, phase: Phase) {
        debug!("Coordinator {} -> {}", self.phase, phase);
        self.phase = phase;
        if !phase.is_terminal() {
            self.deadline = Instant::now() + self.settings.timeout;
        }
    }
}
