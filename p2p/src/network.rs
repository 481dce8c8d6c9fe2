//! Gossipsub transport
//!
//! The swarm is polled by a background task. The `GossipChannel` handle
//! talks to it over tokio channels, so the protocol engine can block on a
//! receive while connections, heartbeats and discovery keep running.

use crate::behaviour::{inbound_topic, outbound_topic, TwoPcBehaviour, TwoPcBehaviourEvent};
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    gossipsub, identity::Keypair, mdns, noise, swarm::SwarmEvent, tcp, yamux, Multiaddr, PeerId,
    Swarm,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use twopc_core::{
    check_outbound, Inbound, MessageChannel, NetworkConfig, ProtocolMessage, Role, TwoPcError,
    TwoPcResult,
};

/// Request from the handle to the swarm task
#[derive(Debug)]
enum Command {
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: oneshot::Sender<TwoPcResult<()>>,
    },
}

/// Something the swarm task observed
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// Gossip message on a subscribed topic
    Message { topic: String, data: Vec<u8> },
    /// A peer subscribed to a topic
    Subscribed { peer: PeerId, topic: String },
    /// A peer left a topic
    Unsubscribed { peer: PeerId, topic: String },
    /// The swarm bound a listen address
    Listening { address: Multiaddr },
}

/// Message channel over libp2p gossipsub
pub struct GossipChannel {
    role: Role,
    inbound_topic: String,
    outbound_topic: String,
    local_peer_id: PeerId,
    commands: mpsc::Sender<Command>,
    events: mpsc::Receiver<NetworkEvent>,
    subscriptions: HashMap<String, HashSet<PeerId>>,
    listen_addrs: Vec<Multiaddr>,
    pending: VecDeque<Vec<u8>>,
    driver: JoinHandle<()>,
}

impl GossipChannel {
    /// Build the swarm, declare the topology for `role` and start polling
    pub async fn connect(role: Role, config: &NetworkConfig) -> TwoPcResult<Self> {
        let keypair = Keypair::generate_ed25519();
        let local_peer_id = keypair.public().to_peer_id();

        let mut behaviour = TwoPcBehaviour::new(&keypair, config.enable_mdns)?;
        behaviour.subscribe(inbound_topic(role, config))?;

        let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| {
                TwoPcError::Connection(format!("Failed to set up TCP transport: {}", e))
            })?
            .with_behaviour(|_| behaviour)
            .map_err(|e| TwoPcError::Connection(format!("Failed to attach behaviour: {}", e)))?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();

        let listen_addr: Multiaddr = config.listen_addr.parse().map_err(|e| {
            TwoPcError::Config(format!("Invalid listen address {}: {}", config.listen_addr, e))
        })?;
        swarm
            .listen_on(listen_addr)
            .map_err(|e| TwoPcError::Connection(format!("Failed to listen: {}", e)))?;

        dial_bootstrap(&mut swarm, &config.bootstrap_nodes)?;

        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(1024);
        let driver = tokio::spawn(drive(swarm, command_rx, event_tx));

        info!("{} network started as peer {}", role, local_peer_id);

        Ok(Self {
            role,
            inbound_topic: inbound_topic(role, config).to_string(),
            outbound_topic: outbound_topic(role, config).to_string(),
            local_peer_id,
            commands: command_tx,
            events: event_rx,
            subscriptions: HashMap::new(),
            listen_addrs: Vec::new(),
            pending: VecDeque::new(),
            driver,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Peers currently known to be subscribed to `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions.get(topic).map(HashSet::len).unwrap_or(0)
    }

    /// First address the swarm actually listens on, waiting up to `within`
    /// for the bind to complete
    pub async fn listen_addr(&mut self, within: Duration) -> TwoPcResult<Multiaddr> {
        let deadline = Instant::now() + within;

        while self.listen_addrs.is_empty() {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => self.absorb(event),
                Ok(None) => return Err(TwoPcError::ChannelClosed),
                Err(_) => {
                    return Err(TwoPcError::Connection(format!(
                        "no listen address bound within {:?}",
                        within
                    )))
                }
            }
        }

        Ok(self.listen_addrs[0].clone())
    }

    /// Block until `count` peers subscribe to this role's outbound topic.
    ///
    /// The coordinator uses it to wait for every cohort before it broadcasts
    /// `CommitRequest`; a cohort uses it to wait for the coordinator's queue.
    pub async fn wait_for_subscribers(
        &mut self,
        count: usize,
        within: Duration,
    ) -> TwoPcResult<()> {
        let topic = self.outbound_topic.clone();
        let deadline = Instant::now() + within;

        while self.subscriber_count(&topic) < count {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => self.absorb(event),
                Ok(None) => return Err(TwoPcError::ChannelClosed),
                Err(_) => {
                    return Err(TwoPcError::Topology(format!(
                        "only {} of {} peers subscribed to {} within {:?}",
                        self.subscriber_count(&topic),
                        count,
                        topic,
                        within
                    )))
                }
            }
        }

        info!("{} peers subscribed to {}", self.subscriber_count(&topic), topic);
        Ok(())
    }

    fn absorb(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Message { topic, data } if topic == self.inbound_topic => {
                self.pending.push_back(data);
            }
            NetworkEvent::Message { topic, .. } => {
                debug!("Ignoring message on foreign topic {}", topic);
            }
            NetworkEvent::Subscribed { peer, topic } => {
                debug!("Peer {} subscribed to {}", peer, topic);
                self.subscriptions.entry(topic).or_default().insert(peer);
            }
            NetworkEvent::Unsubscribed { peer, topic } => {
                debug!("Peer {} unsubscribed from {}", peer, topic);
                if let Some(peers) = self.subscriptions.get_mut(&topic) {
                    peers.remove(&peer);
                }
            }
            NetworkEvent::Listening { address } => self.listen_addrs.push(address),
        }
    }

    async fn publish(&mut self, message: ProtocolMessage) -> TwoPcResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Publish {
                topic: self.outbound_topic.clone(),
                data: message.to_bytes(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| TwoPcError::ChannelClosed)?;

        reply_rx.await.map_err(|_| TwoPcError::ChannelClosed)?
    }
}

impl Drop for GossipChannel {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl MessageChannel for GossipChannel {
    async fn broadcast(&mut self, message: ProtocolMessage) -> TwoPcResult<()> {
        check_outbound(self.role, Role::Coordinator, message)?;
        self.publish(message).await
    }

    async fn send_direct(&mut self, message: ProtocolMessage) -> TwoPcResult<()> {
        check_outbound(self.role, Role::Cohort, message)?;
        self.publish(message).await
    }

    async fn receive(&mut self, deadline: Instant) -> TwoPcResult<Inbound> {
        if let Some(data) = self.pending.pop_front() {
            return Ok(Inbound::from_payload(&data));
        }

        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_) => return Ok(Inbound::TimedOut),
                Ok(None) => return Err(TwoPcError::ChannelClosed),
                Ok(Some(NetworkEvent::Message { topic, data })) if topic == self.inbound_topic => {
                    return Ok(Inbound::from_payload(&data));
                }
                Ok(Some(event)) => self.absorb(event),
            }
        }
    }
}

fn dial_bootstrap(swarm: &mut Swarm<TwoPcBehaviour>, nodes: &[String]) -> TwoPcResult<()> {
    for addr_str in nodes {
        let addr: Multiaddr = addr_str.parse().map_err(|e| {
            TwoPcError::Config(format!("Invalid bootstrap address {}: {}", addr_str, e))
        })?;
        info!("Connecting to bootstrap node: {}", addr);
        swarm
            .dial(addr.clone())
            .map_err(|e| TwoPcError::Connection(format!("Failed to dial {}: {}", addr, e)))?;
    }
    Ok(())
}

/// Swarm task: serves publish commands and forwards gossip events
async fn drive(
    mut swarm: Swarm<TwoPcBehaviour>,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<NetworkEvent>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Publish { topic, data, reply }) => {
                    let _ = reply.send(publish(&mut swarm, &topic, data));
                }
                None => break,
            },
            event = swarm.select_next_some() => {
                if let Some(event) = handle_swarm_event(&mut swarm, event) {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
    debug!("Network driver stopped");
}

fn publish(swarm: &mut Swarm<TwoPcBehaviour>, topic: &str, data: Vec<u8>) -> TwoPcResult<()> {
    match swarm.behaviour_mut().publish(topic, data) {
        Ok(_) => {
            debug!("Published on {}", topic);
            Ok(())
        }
        // Fire-and-forget: nobody listening is not a sender-side failure
        Err(gossipsub::PublishError::InsufficientPeers) => {
            warn!("No subscribers on {}, message dropped", topic);
            Ok(())
        }
        Err(e) => Err(TwoPcError::Transport(format!(
            "Failed to publish on {}: {}",
            topic, e
        ))),
    }
}

fn handle_swarm_event(
    swarm: &mut Swarm<TwoPcBehaviour>,
    event: SwarmEvent<TwoPcBehaviourEvent>,
) -> Option<NetworkEvent> {
    match event {
        SwarmEvent::Behaviour(TwoPcBehaviourEvent::Gossipsub(gossipsub::Event::Message {
            message,
            ..
        })) => Some(NetworkEvent::Message {
            topic: message.topic.into_string(),
            data: message.data,
        }),
        SwarmEvent::Behaviour(TwoPcBehaviourEvent::Gossipsub(gossipsub::Event::Subscribed {
            peer_id,
            topic,
        })) => Some(NetworkEvent::Subscribed {
            peer: peer_id,
            topic: topic.into_string(),
        }),
        SwarmEvent::Behaviour(TwoPcBehaviourEvent::Gossipsub(gossipsub::Event::Unsubscribed {
            peer_id,
            topic,
        })) => Some(NetworkEvent::Unsubscribed {
            peer: peer_id,
            topic: topic.into_string(),
        }),
        SwarmEvent::Behaviour(TwoPcBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
            for (peer_id, addr) in peers {
                info!("mDNS discovered peer: {} at {}", peer_id, addr);
                if let Err(e) = swarm.dial(addr) {
                    warn!("Failed to dial discovered peer: {}", e);
                }
            }
            None
        }
        SwarmEvent::Behaviour(TwoPcBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
            for (peer_id, _) in peers {
                debug!("mDNS peer expired: {}", peer_id);
            }
            None
        }
        SwarmEvent::NewListenAddr { address, .. } => {
            info!("Listening on {}", address);
            Some(NetworkEvent::Listening { address })
        }
        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            info!("Peer connected: {}", peer_id);
            None
        }
        SwarmEvent::ConnectionClosed { peer_id, .. } => {
            info!("Peer disconnected: {}", peer_id);
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config(listen_addr: &str, bootstrap: Vec<String>) -> NetworkConfig {
        NetworkConfig {
            listen_addr: listen_addr.to_string(),
            bootstrap_nodes: bootstrap,
            enable_mdns: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_invalid_listen_address() {
        let config = local_config("not-a-multiaddr", vec![]);
        let result = GossipChannel::connect(Role::Coordinator, &config).await;
        assert!(matches!(result, Err(TwoPcError::Config(_))));
    }

    #[tokio::test]
    async fn test_roles_are_enforced() {
        let config = local_config("/ip4/127.0.0.1/tcp/0", vec![]);
        let mut cohort = GossipChannel::connect(Role::Cohort, &config).await.unwrap();

        let result = cohort.broadcast(ProtocolMessage::Abort).await;
        assert!(matches!(result, Err(TwoPcError::Transport(_))));
    }

    #[tokio::test]
    async fn test_wait_for_subscribers_times_out() {
        let config = local_config("/ip4/127.0.0.1/tcp/0", vec![]);
        let mut coordinator = GossipChannel::connect(Role::Coordinator, &config).await.unwrap();

        let result = coordinator
            .wait_for_subscribers(1, Duration::from_millis(200))
            .await;
        assert!(matches!(result, Err(TwoPcError::Topology(_))));
    }

    #[tokio::test]
    async fn test_reports_bound_listen_address() {
        let config = local_config("/ip4/127.0.0.1/tcp/0", vec![]);
        let mut channel = GossipChannel::connect(Role::Cohort, &config).await.unwrap();

        let addr = channel.listen_addr(Duration::from_secs(5)).await.unwrap();

        assert!(addr.to_string().starts_with("/ip4/127.0.0.1/tcp/"));
        assert_ne!(addr.to_string(), "/ip4/127.0.0.1/tcp/0");
    }

    #[tokio::test]
    async fn test_broadcast_and_reply_over_loopback() {
        let startup = Duration::from_secs(10);
        let coordinator_config = local_config("/ip4/127.0.0.1/tcp/0", vec![]);
        let mut coordinator = GossipChannel::connect(Role::Coordinator, &coordinator_config)
            .await
            .unwrap();
        let coordinator_addr = coordinator.listen_addr(startup).await.unwrap();

        let cohort_config =
            local_config("/ip4/127.0.0.1/tcp/0", vec![coordinator_addr.to_string()]);
        let mut cohort = GossipChannel::connect(Role::Cohort, &cohort_config).await.unwrap();

        coordinator.wait_for_subscribers(1, startup).await.unwrap();
        cohort.wait_for_subscribers(1, startup).await.unwrap();

        coordinator.broadcast(ProtocolMessage::CommitRequest).await.unwrap();
        let deadline = Instant::now() + startup;
        assert_eq!(
            cohort.receive(deadline).await.unwrap(),
            Inbound::Message(ProtocolMessage::CommitRequest)
        );

        cohort.send_direct(ProtocolMessage::Agree).await.unwrap();
        assert_eq!(
            coordinator.receive(deadline).await.unwrap(),
            Inbound::Message(ProtocolMessage::Agree)
        );
    }
}
