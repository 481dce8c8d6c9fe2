//! Core types for TwoPC
//!
//! Defines the phase vocabulary, the wire messages and the fault flags
//! shared by the coordinator and the cohorts.

use crate::error::TwoPcError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transaction phase. The meaning is role-relative: a coordinator starts in
/// `Waiting`, a cohort starts in `NotInitiated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    NotInitiated,
    Waiting,
    Prepared,
    Committed,
    Aborted,
}

impl Phase {
    /// Terminal phases are sticky: nothing moves a process out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Committed | Phase::Aborted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::NotInitiated => "NotInitiated",
            Phase::Waiting => "Waiting",
            Phase::Prepared => "Prepared",
            Phase::Committed => "Committed",
            Phase::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// Messages exchanged between the coordinator and the cohorts.
///
/// On the wire a message is its tag as plain UTF-8, with no envelope. The
/// sender is implied by the topic or queue that carried it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolMessage {
    CommitRequest,
    Agree,
    Disagree,
    Prepare,
    Ack,
    Commit,
    Abort,
}

impl ProtocolMessage {
    pub const ALL: [ProtocolMessage; 7] = [
        ProtocolMessage::CommitRequest,
        ProtocolMessage::Agree,
        ProtocolMessage::Disagree,
        ProtocolMessage::Prepare,
        ProtocolMessage::Ack,
        ProtocolMessage::Commit,
        ProtocolMessage::Abort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolMessage::CommitRequest => "CommitRequest",
            ProtocolMessage::Agree => "Agree",
            ProtocolMessage::Disagree => "Disagree",
            ProtocolMessage::Prepare => "Prepare",
            ProtocolMessage::Ack => "Ack",
            ProtocolMessage::Commit => "Commit",
            ProtocolMessage::Abort => "Abort",
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_str().as_bytes().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TwoPcError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| TwoPcError::UnknownMessage(String::from_utf8_lossy(bytes).into_owned()))?;
        text.parse()
    }

    /// Whether the coordinator sends this message (as opposed to a cohort)
    pub fn is_from_coordinator(&self) -> bool {
        matches!(
            self,
            ProtocolMessage::CommitRequest
                | ProtocolMessage::Prepare
                | ProtocolMessage::Commit
                | ProtocolMessage::Abort
        )
    }
}

impl fmt::Display for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolMessage {
    type Err = TwoPcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProtocolMessage::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| TwoPcError::UnknownMessage(s.to_string()))
    }
}

/// Number of cohorts taking part in the transaction. Always at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct CohortCount(usize);

impl CohortCount {
    pub fn new(count: usize) -> Result<Self, TwoPcError> {
        if count == 0 {
            return Err(TwoPcError::InvalidCohortCount(count));
        }
        Ok(CohortCount(count))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl TryFrom<usize> for CohortCount {
    type Error = TwoPcError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        CohortCount::new(value)
    }
}

impl From<CohortCount> for usize {
    fn from(count: CohortCount) -> usize {
        count.0
    }
}

impl fmt::Display for CohortCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coordinator fault injection, fixed at process start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorFaults {
    /// Stop without broadcasting Prepare once every cohort agreed
    pub skip_prepare: bool,
    /// Stop right after broadcasting Prepare, before tallying acks
    pub skip_commit: bool,
}

/// Cohort fault injection, fixed at process start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortFaults {
    /// Vote Disagree regardless of the request
    pub always_disagree: bool,
    /// Stop instead of sending Ack after receiving Prepare
    pub crash_before_ack: bool,
}

/// Process role in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Coordinator,
    Cohort,
}

impl Role {
    /// Whether a process in this role ever emits `message`
    pub fn sends(self, message: ProtocolMessage) -> bool {
        message.is_from_coordinator() == (self == Role::Coordinator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Coordinator => f.write_str("coordinator"),
            Role::Cohort => f.write_str("cohort"),
        }
    }
}

/// Decision point at which an injected fault stopped a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrashPoint {
    /// Coordinator: all cohorts agreed, Prepare never sent
    BeforePrepare,
    /// Coordinator: Prepare sent, Commit never decided
    AfterPrepare,
    /// Cohort: Prepare received, Ack never sent
    BeforeAck,
}

impl fmt::Display for CrashPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashPoint::BeforePrepare => f.write_str("before Prepare"),
            CrashPoint::AfterPrepare => f.write_str("after Prepare"),
            CrashPoint::BeforeAck => f.write_str("before Ack"),
        }
    }
}

/// How a single run ended for one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Committed,
    Aborted,
    Crashed(CrashPoint),
}

impl Outcome {
    /// Terminal phase reached, if the process did not crash first
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Outcome::Committed => Some(Phase::Committed),
            Outcome::Aborted => Some(Phase::Aborted),
            Outcome::Crashed(_) => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Committed => f.write_str("committed"),
            Outcome::Aborted => f.write_str("aborted"),
            Outcome::Crashed(point) => write!(f, "crashed {}", point),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags() {
        assert_eq!(ProtocolMessage::CommitRequest.to_bytes(), b"CommitRequest".to_vec());
        assert_eq!(
            ProtocolMessage::from_bytes(b"Disagree").unwrap(),
            ProtocolMessage::Disagree
        );
        assert_eq!("Ack".parse::<ProtocolMessage>().unwrap(), ProtocolMessage::Ack);
    }

    #[test]
    fn test_unknown_tags_rejected() {
        assert!(matches!(
            ProtocolMessage::from_bytes(b"Yes"),
            Err(TwoPcError::UnknownMessage(tag)) if tag == "Yes"
        ));
        assert!(ProtocolMessage::from_bytes(b"commit").is_err());
        assert!(ProtocolMessage::from_bytes(b" Commit").is_err());
        assert!(ProtocolMessage::from_bytes(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_message_direction() {
        let from_coordinator: Vec<_> = ProtocolMessage::ALL
            .iter()
            .filter(|m| m.is_from_coordinator())
            .collect();
        assert_eq!(from_coordinator.len(), 4);
        assert!(!ProtocolMessage::Agree.is_from_coordinator());
        assert!(!ProtocolMessage::Ack.is_from_coordinator());

        assert!(Role::Coordinator.sends(ProtocolMessage::Abort));
        assert!(!Role::Coordinator.sends(ProtocolMessage::Agree));
        assert!(Role::Cohort.sends(ProtocolMessage::Disagree));
        assert!(!Role::Cohort.sends(ProtocolMessage::Prepare));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::Committed.is_terminal());
        assert!(Phase::Aborted.is_terminal());
        assert!(!Phase::NotInitiated.is_terminal());
        assert!(!Phase::Waiting.is_terminal());
        assert!(!Phase::Prepared.is_terminal());
    }

    #[test]
    fn test_cohort_count_must_be_positive() {
        assert!(matches!(CohortCount::new(0), Err(TwoPcError::InvalidCohortCount(0))));
        assert_eq!(CohortCount::new(3).unwrap().get(), 3);
        assert!(serde_json::from_str::<CohortCount>("0").is_err());
        assert_eq!(serde_json::from_str::<CohortCount>("2").unwrap().get(), 2);
    }

    #[test]
    fn test_outcome_phase() {
        assert_eq!(Outcome::Committed.phase(), Some(Phase::Committed));
        assert_eq!(Outcome::Aborted.phase(), Some(Phase::Aborted));
        assert_eq!(Outcome::Crashed(CrashPoint::BeforeAck).phase(), None);
    }
}
