//! Network behaviour for libp2p

use libp2p::{
    gossipsub::{self, IdentTopic, MessageAuthenticity, ValidationMode},
    identity::Keypair,
    mdns,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour},
};
use std::time::Duration;
use twopc_core::{NetworkConfig, Role, TwoPcError, TwoPcResult};

/// Combined network behaviour
#[derive(NetworkBehaviour)]
pub struct TwoPcBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub mdns: Toggle<mdns::tokio::Behaviour>,
}

impl TwoPcBehaviour {
    pub fn new(keypair: &Keypair, enable_mdns: bool) -> TwoPcResult<Self> {
        // Message ids stay source + sequence number: two cohorts sending the
        // same tag must never be deduplicated into one vote.
        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(Duration::from_secs(1))
            .validation_mode(ValidationMode::Strict)
            .build()
            .map_err(|e| TwoPcError::Topology(format!("Failed to build gossipsub config: {}", e)))?;

        let gossipsub = gossipsub::Behaviour::new(
            MessageAuthenticity::Signed(keypair.clone()),
            gossipsub_config,
        )
        .map_err(|e| TwoPcError::Topology(format!("Failed to create gossipsub: {}", e)))?;

        let mdns = if enable_mdns {
            let behaviour =
                mdns::tokio::Behaviour::new(mdns::Config::default(), keypair.public().to_peer_id())
                    .map_err(|e| TwoPcError::Connection(format!("Failed to start mDNS: {}", e)))?;
            Some(behaviour)
        } else {
            None
        };

        Ok(Self {
            gossipsub,
            mdns: Toggle::from(mdns),
        })
    }

    /// Subscribe to a topic
    pub fn subscribe(&mut self, topic: &str) -> TwoPcResult<()> {
        self.gossipsub
            .subscribe(&IdentTopic::new(topic))
            .map_err(|e| TwoPcError::Topology(format!("Failed to subscribe to {}: {}", topic, e)))?;
        Ok(())
    }

    /// Publish a message to a topic
    pub fn publish(
        &mut self,
        topic: &str,
        data: Vec<u8>,
    ) -> Result<gossipsub::MessageId, gossipsub::PublishError> {
        self.gossipsub.publish(IdentTopic::new(topic), data)
    }
}

/// Topic a role consumes from
pub fn inbound_topic<'a>(role: Role, config: &'a NetworkConfig) -> &'a str {
    match role {
        Role::Coordinator => &config.coordinator_topic,
        Role::Cohort => &config.broadcast_topic,
    }
}

/// Topic a role publishes to
pub fn outbound_topic<'a>(role: Role, config: &'a NetworkConfig) -> &'a str {
    match role {
        Role::Coordinator => &config.broadcast_topic,
        Role::Cohort => &config.coordinator_topic,
    }
}
