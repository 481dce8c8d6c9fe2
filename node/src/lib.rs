//! Two-phase commit node
//!
//! Wires membership discovery, the gossipsub transport and the protocol
//! engine into one coordinator or cohort process, plus an in-process
//! simulation over the memory hub.

pub mod identity;
pub mod membership;
pub mod runner;
pub mod simulate;

pub use identity::*;
pub use membership::*;
pub use runner::*;
pub use simulate::*;
