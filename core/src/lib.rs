//! TwoPC Core Library
//!
//! Shared vocabulary for the two-phase commit coordinator and its cohorts:
//! phases, wire messages, fault flags, errors, configuration and the
//! transport/membership contracts the protocol engine is written against.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
