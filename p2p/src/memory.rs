//! In-process pub/sub hub

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use twopc_core::{
    check_outbound, Inbound, MessageChannel, ProtocolMessage, Role, TwoPcError, TwoPcResult,
};

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>>;

/// Fanout exchange plus coordinator queue, shared by every endpoint.
///
/// Payloads cross the hub as wire bytes and are decoded by the receiver.
pub struct MemoryHub {
    subscribers: Subscribers,
    queue_tx: mpsc::UnboundedSender<Vec<u8>>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
        }
    }

    /// Consume the coordinator queue. The queue has a single consumer.
    pub fn coordinator(&self) -> TwoPcResult<MemoryEndpoint> {
        let inbox = self.queue_rx.lock().take().ok_or_else(|| {
            TwoPcError::Topology("coordinator queue already has a consumer".into())
        })?;

        Ok(MemoryEndpoint {
            role: Role::Coordinator,
            inbox,
            subscribers: self.subscribers.clone(),
            queue_tx: self.queue_tx.clone(),
        })
    }

    /// Bind a new cohort to the fanout
    pub fn cohort(&self) -> MemoryEndpoint {
        let (tx, inbox) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);

        MemoryEndpoint {
            role: Role::Cohort,
            inbox,
            subscribers: self.subscribers.clone(),
            queue_tx: self.queue_tx.clone(),
        }
    }

    /// Cohorts still bound to the fanout
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One process's view of the hub
pub struct MemoryEndpoint {
    role: Role,
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    subscribers: Subscribers,
    queue_tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl MessageChannel for MemoryEndpoint {
    async fn broadcast(&mut self, message: ProtocolMessage) -> TwoPcResult<()> {
        check_outbound(self.role, Role::Coordinator, message)?;

        let payload = message.to_bytes();
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        debug!("Broadcast {} to {} subscribers", message, subscribers.len());
        Ok(())
    }

    async fn send_direct(&mut self, message: ProtocolMessage) -> TwoPcResult<()> {
        check_outbound(self.role, Role::Cohort, message)?;

        if self.queue_tx.send(message.to_bytes()).is_err() {
            debug!("Coordinator queue gone, {} dropped", message);
        }
        Ok(())
    }

    async fn receive(&mut self, deadline: Instant) -> TwoPcResult<Inbound> {
        match tokio::time::timeout_at(deadline, self.inbox.recv()).await {
            Ok(Some(payload)) => Ok(Inbound::from_payload(&payload)),
            // A vanished peer looks like silence
            Ok(None) => {
                tokio::time::sleep_until(deadline).await;
                Ok(Inbound::TimedOut)
            }
            Err(_) => Ok(Inbound::TimedOut),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(50)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_cohort() {
        let hub = MemoryHub::new();
        let mut coordinator = hub.coordinator().unwrap();
        let mut cohorts: Vec<_> = (0..3).map(|_| hub.cohort()).collect();

        coordinator.broadcast(ProtocolMessage::CommitRequest).await.unwrap();

        for cohort in &mut cohorts {
            assert_eq!(
                cohort.receive(soon()).await.unwrap(),
                Inbound::Message(ProtocolMessage::CommitRequest)
            );
        }
    }

    #[tokio::test]
    async fn test_direct_reaches_coordinator_in_order() {
        let hub = MemoryHub::new();
        let mut coordinator = hub.coordinator().unwrap();
        let mut cohort = hub.cohort();

        cohort.send_direct(ProtocolMessage::Agree).await.unwrap();
        cohort.send_direct(ProtocolMessage::Ack).await.unwrap();

        assert_eq!(
            coordinator.receive(soon()).await.unwrap(),
            Inbound::Message(ProtocolMessage::Agree)
        );
        assert_eq!(
            coordinator.receive(soon()).await.unwrap(),
            Inbound::Message(ProtocolMessage::Ack)
        );
    }

    #[tokio::test]
    async fn test_roles_are_enforced() {
        let hub = MemoryHub::new();
        let mut coordinator = hub.coordinator().unwrap();
        let mut cohort = hub.cohort();

        assert!(cohort.broadcast(ProtocolMessage::Abort).await.is_err());
        assert!(coordinator.send_direct(ProtocolMessage::Agree).await.is_err());
        assert!(matches!(hub.coordinator(), Err(TwoPcError::Topology(_))));
    }

    #[tokio::test]
    async fn test_messages_keep_their_direction() {
        let hub = MemoryHub::new();
        let mut coordinator = hub.coordinator().unwrap();
        let mut cohort = hub.cohort();

        assert!(coordinator.broadcast(ProtocolMessage::Ack).await.is_err());
        assert!(cohort.send_direct(ProtocolMessage::Commit).await.is_err());

        // Nothing leaked through either path
        assert_eq!(cohort.receive(soon()).await.unwrap(), Inbound::TimedOut);
        assert_eq!(coordinator.receive(soon()).await.unwrap(), Inbound::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out() {
        let hub = MemoryHub::new();
        let mut cohort = hub.cohort();
        let deadline = Instant::now() + Duration::from_secs(6);

        assert_eq!(cohort.receive(deadline).await.unwrap(), Inbound::TimedOut);
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test]
    async fn test_dropped_cohorts_are_skipped() {
        let hub = MemoryHub::new();
        let mut coordinator = hub.coordinator().unwrap();
        let mut kept = hub.cohort();
        drop(hub.cohort());

        coordinator.broadcast(ProtocolMessage::Abort).await.unwrap();

        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(
            kept.receive(soon()).await.unwrap(),
            Inbound::Message(ProtocolMessage::Abort)
        );
    }

    #[tokio::test]
    async fn test_send_after_coordinator_crash_is_silent() {
        let hub = MemoryHub::new();
        let coordinator = hub.coordinator().unwrap();
        let mut cohort = hub.cohort();
        drop(coordinator);

        assert!(cohort.send_direct(ProtocolMessage::Ack).await.is_ok());
    }
}
