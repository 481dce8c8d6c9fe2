//! Error types for TwoPC
//!
//! Only setup and transport failures are errors. Disagreement, timeouts and
//! unexpected messages are protocol transitions and never surface here.

use thiserror::Error;

/// Main error type for TwoPC
#[derive(Error, Debug)]
pub enum TwoPcError {
    // ============ Setup Errors ============
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Topology declaration failed: {0}")]
    Topology(String),

    #[error("Membership discovery failed: {0}")]
    Membership(String),

    #[error("Invalid cohort count: {0} (at least one cohort is required)")]
    InvalidCohortCount(usize),

    #[error("Cannot resolve local identity: {0}")]
    Identity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // ============ Transport Errors ============
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Message channel closed")]
    ChannelClosed,

    // ============ Codec Errors ============
    #[error("Unknown protocol message: {0:?}")]
    UnknownMessage(String),

    // ============ General Errors ============
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for TwoPcError {
    fn from(err: serde_json::Error) -> Self {
        TwoPcError::Config(err.to_string())
    }
}

impl TwoPcError {
    /// Whether the error happened before any protocol state existed
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            TwoPcError::Connection(_)
                | TwoPcError::Topology(_)
                | TwoPcError::Membership(_)
                | TwoPcError::InvalidCohortCount(_)
                | TwoPcError::Identity(_)
                | TwoPcError::Config(_)
        )
    }
}
