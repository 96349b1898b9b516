//! Client error types for the Stratum client

use stratum_core::{CallError, TopologyError};

/// Error type for client construction and calls
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error("invalid topology: {0}")]
    Topology(#[from] TopologyError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    /// The call error behind this error, if it came from a logical call.
    pub fn as_call_error(&self) -> Option<&CallError> {
        match self {
            ClientError::Call(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClientError::Topology(TopologyError::Empty);
        assert_eq!(err.to_string(), "invalid topology: topology has no datacenters");

        let err: ClientError = CallError::Conflict {
            body: "exists".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "conflict: exists");
        assert_eq!(err.as_call_error().and_then(|e| e.status()), Some(409));

        let err = ClientError::Other(anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "boom");
        assert!(err.as_call_error().is_none());
    }
}
