//! TwoPC Transports
//!
//! Implementations of the message channel contract:
//! - Gossipsub over libp2p (noise + yamux, mDNS discovery) for real runs
//! - An in-process memory hub for simulation and tests
//!
//! Both model the same topology: a fanout topic every cohort subscribes to,
//! and a single inbound queue owned by the coordinator.

pub mod behaviour;
pub mod memory;
pub mod network;

pub use behaviour::*;
pub use memory::*;
pub use network::*;
