//! TwoPC Protocol Engine
//!
//! The two state machines of a two-phase commit run:
//! - Coordinator: broadcasts the request, tallies votes and acks, decides
//! - Cohort: votes, acknowledges Prepare, follows the decision
//!
//! Each machine is owned by a single event loop that waits for either an
//! inbound message or its deadline and performs at most one transition per
//! wake-up.

pub mod cohort;
pub mod coordinator;
pub mod delay;
pub mod tally;

pub use cohort::*;
pub use coordinator::*;
pub use delay::*;
pub use tally::*;

/// Result of feeding one event into a state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Still in a non-terminal phase, keep looping
    Continue,
    /// The process is done and should exit
    Exit(twopc_core::Outcome),
}

#[cfg(test)]
mod testing;

#[cfg(test)]
mod scenario_tests;
