//! Core traits defining TwoPC interfaces
//!
//! The protocol engine only talks to the outside world through these
//! contracts: a message channel for the pub/sub transport and a membership
//! source for the cohort count.

use crate::error::TwoPcError;
use crate::types::{CohortCount, ProtocolMessage, Role};
use async_trait::async_trait;
use tokio::time::Instant;

/// Result type for TwoPC operations
pub type TwoPcResult<T> = Result<T, TwoPcError>;

/// What a bounded receive produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A well-formed protocol message
    Message(ProtocolMessage),
    /// A payload that is not one of the protocol tags
    Unrecognized(String),
    /// The deadline passed before anything arrived
    TimedOut,
}

impl Inbound {
    /// Decode a raw transport payload
    pub fn from_payload(payload: &[u8]) -> Self {
        match ProtocolMessage::from_bytes(payload) {
            Ok(message) => Inbound::Message(message),
            Err(_) => Inbound::Unrecognized(String::from_utf8_lossy(payload).into_owned()),
        }
    }
}

/// Transport contract consumed by the state machines.
///
/// Delivery is fire-and-forget and FIFO per link. There are no retries and
/// no acknowledgements beyond what the protocol itself exchanges.
#[async_trait]
pub trait MessageChannel: Send {
    /// Deliver to every current subscriber of the fanout topic.
    /// Only the coordinator broadcasts.
    async fn broadcast(&mut self, message: ProtocolMessage) -> TwoPcResult<()>;

    /// Deliver to the coordinator's inbound queue. Only cohorts send direct.
    async fn send_direct(&mut self, message: ProtocolMessage) -> TwoPcResult<()>;

    /// Wait for the next inbound message until `deadline`
    async fn receive(&mut self, deadline: Instant) -> TwoPcResult<Inbound>;
}

#[async_trait]
impl<C: MessageChannel + ?Sized> MessageChannel for Box<C> {
    async fn broadcast(&mut self, message: ProtocolMessage) -> TwoPcResult<()> {
        (**self).broadcast(message).await
    }

    async fn send_direct(&mut self, message: ProtocolMessage) -> TwoPcResult<()> {
        (**self).send_direct(message).await
    }

    async fn receive(&mut self, deadline: Instant) -> TwoPcResult<Inbound> {
        (**self).receive(deadline).await
    }
}

/// Check an outbound message against the path it takes. `sender` is the
/// only role allowed on that path: broadcasts belong to the coordinator,
/// direct sends to cohorts.
pub fn check_outbound(role: Role, sender: Role, message: ProtocolMessage) -> TwoPcResult<()> {
    if role != sender {
        return Err(TwoPcError::Transport(match sender {
            Role::Coordinator => "only the coordinator broadcasts".into(),
            Role::Cohort => "the coordinator does not send direct messages".into(),
        }));
    }
    if !role.sends(message) {
        return Err(TwoPcError::Transport(format!("a {} never sends {}", role, message)));
    }
    Ok(())
}

/// Source of the number of cohorts, resolved once before a run starts
pub trait MembershipSource: Send + Sync {
    fn cohort_count(&self) -> TwoPcResult<CohortCount>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_from_payload() {
        assert_eq!(
            Inbound::from_payload(b"Prepare"),
            Inbound::Message(ProtocolMessage::Prepare)
        );
        assert_eq!(
            Inbound::from_payload(b"No"),
            Inbound::Unrecognized("No".to_string())
        );
    }

    #[test]
    fn test_check_outbound() {
        assert!(
            check_outbound(Role::Coordinator, Role::Coordinator, ProtocolMessage::Prepare).is_ok()
        );
        assert!(check_outbound(Role::Cohort, Role::Cohort, ProtocolMessage::Ack).is_ok());

        assert!(matches!(
            check_outbound(Role::Cohort, Role::Coordinator, ProtocolMessage::Abort),
            Err(TwoPcError::Transport(_))
        ));
        assert!(matches!(
            check_outbound(Role::Coordinator, Role::Coordinator, ProtocolMessage::Agree),
            Err(TwoPcError::Transport(_))
        ));
        assert!(matches!(
            check_outbound(Role::Cohort, Role::Cohort, ProtocolMessage::Commit),
            Err(TwoPcError::Transport(_))
        ));
    }
}
