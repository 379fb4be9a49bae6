//! Error types for the election state machine

use std::io;

use coordination::CoordinationError;

use crate::config::ConfigError;
use crate::states::StateKind;

/// A resource the factory could not hand out.
///
/// Cached by the factory's memo cells, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// A connection-dependent state was requested before a connection was installed
    #[error("coordination connection not established")]
    NoConnection,

    /// A resource was requested again while it was being constructed
    #[error("dependency cycle while constructing {0}")]
    Cycle(&'static str),

    /// The factory that owns the state machine has been dropped
    #[error("resource factory is gone")]
    FactoryDropped,
}

/// Errors that can occur while running the election
#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    /// Dialing or keeping the coordination session failed
    #[error("connection error: {0}")]
    Connection(#[source] CoordinationError),

    /// A namespace or candidacy operation failed
    #[error("protocol error: {0}")]
    Protocol(#[source] CoordinationError),

    /// A node name did not carry a sequence suffix
    #[error("malformed election node {0}")]
    MalformedNode(String),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Heartbeat marker write, listing or removal failed
    #[error("heartbeat I/O: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A state failed; the runner stops
    #[error("state {state} run: {source}")]
    State {
        state: StateKind,
        #[source]
        source: Box<ElectionError>,
    },
}

/// Result type for election operations
pub type Result<T> = std::result::Result<T, ElectionError>;
