//! Cohort state machine
//!
//! A cohort votes once on `CommitRequest`, acknowledges `Prepare` once and
//! then follows the coordinator's decision. Its timer is re-armed on every
//! non-terminal state entry.
//!
//! Timeout policy is asymmetric. Silence before the ack aborts, but silence
//! after the ack commits: a cohort in `Prepared` assumes the coordinator
//! gathered every ack and is merely late. This is heuristic termination, not
//! a safety guarantee. If the coordinator decided `Aborted` while a prepared
//! cohort times out, the cohorts end up disagreeing about the outcome.

use crate::delay::ProcessingDelay;
use crate::Step;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use twopc_core::{
    CohortFaults, CrashPoint, Inbound, MessageChannel, Outcome, Phase, ProtocolConfig,
    ProtocolMessage, TwoPcResult,
};

/// Everything a cohort needs, fixed at process start
#[derive(Debug, Clone, Copy)]
pub struct CohortSettings {
    pub timeout: Duration,
    pub faults: CohortFaults,
}

impl CohortSettings {
    pub fn new(timeout: Duration, faults: CohortFaults) -> Self {
        Self { timeout, faults }
    }

    pub fn from_config(config: &ProtocolConfig, faults: CohortFaults) -> Self {
        Self::new(config.cohort_timeout(), faults)
    }
}

/// Participant side of a two-phase commit run
pub struct Cohort<C, D> {
    channel: C,
    delay: D,
    settings: CohortSettings,
    phase: Phase,
    deadline: Instant,
    crashed: Option<CrashPoint>,
}

impl<C: MessageChannel, D: ProcessingDelay> Cohort<C, D> {
    /// New cohort in `NotInitiated`, timer armed
    pub fn new(channel: C, delay: D, settings: CohortSettings) -> Self {
        Self {
            channel,
            delay,
            phase: Phase::NotInitiated,
            deadline: Instant::now() + settings.timeout,
            settings,
            crashed: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// When the per-state timer fires, `None` once the run has ended
    pub fn deadline(&self) -> Option<Instant> {
        self.outcome().is_none().then_some(self.deadline)
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

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

    pub async fn run(&mut self) -> TwoPcResult<Outcome> {
        info!("Awaiting CommitRequest");

        loop {
            if let Some(outcome) = self.outcome() {
                return Ok(outcome);
            }

            let step = match self.channel.receive(self.deadline).await? {
                Inbound::Message(message) => self.handle_message(message).await?,
                Inbound::Unrecognized(raw) => self.handle_unrecognized(&raw),
                Inbound::TimedOut => self.handle_timeout(),
            };

            if let Step::Exit(outcome) = step {
                return Ok(outcome);
            }
        }
    }

    pub async fn handle_message(&mut self, message: ProtocolMessage) -> TwoPcResult<Step> {
        if let Some(outcome) = self.outcome() {
            debug!("Run already {}, ignoring {}", outcome, message);
            return Ok(Step::Exit(outcome));
        }

        match (self.phase, message) {
            (Phase::NotInitiated, ProtocolMessage::CommitRequest) => self.vote().await,
            (Phase::Waiting, ProtocolMessage::Prepare) => self.acknowledge().await,
            (Phase::Waiting | Phase::Prepared, ProtocolMessage::Abort) => {
                info!("Received Abort, transitioning to Aborted state");
                Ok(self.finish(Phase::Aborted))
            }
            (Phase::Prepared, ProtocolMessage::Commit) => {
                info!("Received Commit, committing transaction and transitioning to Committed state");
                Ok(self.finish(Phase::Committed))
            }
            (phase, message) => {
                warn!("Unexpected message {} in {} state, ignoring", message, phase);
                Ok(Step::Continue)
            }
        }
    }

    pub fn handle_unrecognized(&mut self, raw: &str) -> Step {
        match self.outcome() {
            Some(outcome) => Step::Exit(outcome),
            None => {
                warn!("Unrecognized message {:?} in {} state, ignoring", raw, self.phase);
                Step::Continue
            }
        }
    }

    /// The per-state timer fired
    pub fn handle_timeout(&mut self) -> Step {
        if let Some(outcome) = self.outcome() {
            return Step::Exit(outcome);
        }

        if self.phase == Phase::Prepared {
            warn!("Timeout occurred in Prepared state, transitioning to Committed state without a decision");
            self.finish(Phase::Committed)
        } else {
            warn!("Timeout occurred in {} state, transitioning to Aborted state", self.phase);
            self.finish(Phase::Aborted)
        }
    }

    async fn vote(&mut self) -> TwoPcResult<Step> {
        info!("Received CommitRequest");
        self.process().await;

        if self.settings.faults.always_disagree {
            info!("Replying Disagree and transitioning to Aborted state");
            self.channel.send_direct(ProtocolMessage::Disagree).await?;
            return Ok(self.finish(Phase::Aborted));
        }

        info!("Replying Agree and transitioning to Waiting state");
        self.channel.send_direct(ProtocolMessage::Agree).await?;
        self.enter(Phase::Waiting);
        Ok(Step::Continue)
    }

    async fn acknowledge(&mut self) -> TwoPcResult<Step> {
        info!("Received Prepare");
        self.process().await;

        if self.settings.faults.crash_before_ack {
            warn!("CRASH! Cohort stops before sending Ack (fault injection)");
            self.crashed = Some(CrashPoint::BeforeAck);
            return Ok(Step::Exit(Outcome::Crashed(CrashPoint::BeforeAck)));
        }

        info!("Sending Ack and transitioning to Prepared state");
        self.channel.send_direct(ProtocolMessage::Ack).await?;
        self.enter(Phase::Prepared);
        Ok(Step::Continue)
    }

    async fn process(&mut self) {
        let delay = self.delay.next_delay();
        if !delay.is_zero() {
            debug!("Processing for {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    fn finish(&mut self, phase: Phase) -> Step {
        self.enter(phase);
        match phase {
            Phase::Committed => info!("Transaction committed"),
            _ => info!("Transaction aborted"),
        }
        match self.outcome() {
            Some(outcome) => Step::Exit(outcome),
            None => Step::Continue,
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!("Cohort {} -> {}", self.phase, phase);
        self.phase = phase;
        if !phase.is_terminal() {
            self.deadline = Instant::now() + self.settings.timeout;
        }
    }
}
