//! Scripted channel for driving a single state machine in tests

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::time::Instant;
use twopc_core::{Inbound, MessageChannel, ProtocolMessage, TwoPcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sent {
    Broadcast(ProtocolMessage),
    Direct(ProtocolMessage),
}

/// Replays a fixed inbound script and records every outbound message.
/// Once the script runs dry, receives wait out their deadline.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    inbound: VecDeque<Inbound>,
    sent: Vec<Sent>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inbound(inbound: Vec<Inbound>) -> Self {
        Self {
            inbound: inbound.into(),
            sent: Vec::new(),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.clone()
    }

    pub fn broadcasted(&self, message: ProtocolMessage) -> bool {
        self.sent.contains(&Sent::Broadcast(message))
    }

    pub fn replied(&self, message: ProtocolMessage) -> bool {
        self.sent.contains(&Sent::Direct(message))
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn broadcast(&mut self, message: ProtocolMessage) -> TwoPcResult<()> {
        self.sent.push(Sent::Broadcast(message));
        Ok(())
    }

    async fn send_direct(&mut self, message: ProtocolMessage) -> TwoPcResult<()> {
        self.sent.push(Sent::Direct(message));
        Ok(())
    }

    async fn receive(&mut self, deadline: Instant) -> TwoPcResult<Inbound> {
        match self.inbound.pop_front() {
            Some(inbound) => Ok(inbound),
            None => {
                tokio::time::sleep_until(deadline).await;
                Ok(Inbound::TimedOut)
            }
        }
    }
}
