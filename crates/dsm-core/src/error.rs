//! Error types for DSM

use thiserror::Error;

/// Core error type for data-source operations
#[derive(Error, Debug)]
pub enum DsmError {
    #[error("Connection creation failed: {0}")]
    ConnectionCreationFailed(String),

    #[error("Pool exhausted: all {max_active} connections are in use")]
    PoolExhausted { max_active: usize },

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Prepare failed: {0}")]
    PrepareFailed(String),

    #[error("Cleanup failed with {} error(s): {}", .0.len(), join_errors(.0))]
    CleanupFailed(Vec<DsmError>),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

fn join_errors(errors: &[DsmError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DsmError {
    /// Whether the failure is a lack of capacity rather than a backing failure.
    ///
    /// Callers can back off and retry on capacity errors; anything else is
    /// fatal to the operation (but not to the pool).
    pub fn is_capacity(&self) -> bool {
        matches!(self, DsmError::PoolExhausted { .. } | DsmError::Timeout(_))
    }

    /// Errors wrapped by a `CleanupFailed`, empty for every other variant.
    pub fn cleanup_errors(&self) -> &[DsmError] {
        match self {
            DsmError::CleanupFailed(errors) => errors,
            _ => &[],
        }
    }

    /// Fold a list of cleanup errors into a single result.
    pub fn from_cleanup(errors: Vec<DsmError>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DsmError::CleanupFailed(errors))
        }
    }
}

/// Result type alias for DSM operations
pub type Result<T> = std::result::Result<T, DsmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_errors() {
        assert!(DsmError::PoolExhausted { max_active: 2 }.is_capacity());
        assert!(DsmError::Timeout("5s".into()).is_capacity());
        assert!(!DsmError::PoolClosed.is_capacity());
        assert!(!DsmError::ConnectionCreationFailed("refused".into()).is_capacity());
    }

    #[test]
    fn test_cleanup_display_lists_inner_errors() {
        let err = DsmError::CleanupFailed(vec![
            DsmError::Query("cursor close".into()),
            DsmError::Query("statement close".into()),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("2 error(s)"));
        assert!(msg.contains("cursor close"));
        assert!(msg.contains("statement close"));
        assert_eq!(err.cleanup_errors().len(), 2);
    }

    #[test]
    fn test_from_cleanup() {
        assert!(DsmError::from_cleanup(Vec::new()).is_ok());
        let err = DsmError::from_cleanup(vec![DsmError::Cancelled]).unwrap_err();
        assert!(matches!(err, DsmError::CleanupFailed(ref v) if v.len() == 1));
    }
}
