//! Unified error type for all observers.

use thiserror::Error;

/// Error type for observer operations.
#[derive(Debug, Error)]
pub enum ObserverError {
    /// Error from the JSON observer.
    #[cfg(feature = "json")]
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend could not be read.
    #[error("read error: {0}")]
    Read(#[from] crate::error::Error),
}

/// Result type for observer operations.
pub type Result<T> = std::result::Result<T, ObserverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_store_error() {
        let err: ObserverError =
            crate::error::Error::StoreUnavailable("leaderboard read failed".into()).into();
        assert_eq!(
            err.to_string(),
            "read error: store unavailable: leaderboard read failed"
        );
    }
}
