//! Error types for coordination-service operations

use std::time::Duration;

use crate::session::SessionId;

/// Errors reported by a coordination session or connector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    #[error("node {0} does not exist")]
    NoNode(String),

    #[error("node {0} already exists")]
    NodeExists(String),

    #[error("parent of node {0} does not exist")]
    NoParent(String),

    #[error("connection to the coordination service was lost")]
    ConnectionLoss,

    #[error("session {0} expired")]
    SessionExpired(SessionId),

    #[error("session {0} is closed")]
    Closed(SessionId),

    #[error("no coordination server reachable at [{0}]")]
    Unavailable(String),

    #[error("dial timed out after {0:?}")]
    Timeout(Duration),
}

impl CoordinationError {
    /// Returns true if retrying the same request on the same session may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionLoss | Self::Timeout(_))
    }
}

impl From<actix::MailboxError> for CoordinationError {
    fn from(_: actix::MailboxError) -> Self {
        Self::ConnectionLoss
    }
}

/// Result type for coordination operations
pub type Result<T> = std::result::Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(CoordinationError::ConnectionLoss.is_transient());
        assert!(CoordinationError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!CoordinationError::SessionExpired(7).is_transient());
        assert!(!CoordinationError::NoNode("/election".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = CoordinationError::Unavailable("zoo1:2181,zoo2:2181".into());
        assert_eq!(
            err.to_string(),
            "no coordination server reachable at [zoo1:2181,zoo2:2181]"
        );
        assert!(CoordinationError::SessionExpired(3)
            .to_string()
            .contains("session 3"));
    }
}
