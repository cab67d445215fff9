//! MCP error types.

use rmcp::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to spawn server `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to `{server}`: {message}")]
    Connect { server: String, message: String },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("connection closed")]
    Closed,

    #[error("timeout waiting for response to {0}")]
    Timeout(String),

    #[error("tool arguments must be a JSON object")]
    InvalidArguments,

    #[error("failed to convert message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl Error {
    /// Whether this failure means the connection's session is gone and a
    /// fresh handshake may succeed where a plain retry would not.
    pub fn is_session_error(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Service(ServiceError::TransportClosed) => true,
            Self::Service(ServiceError::McpError(data)) => mentions_session(&data.message),
            Self::Service(other) => mentions_session(&other.to_string()),
            _ => false,
        }
    }
}

fn mentions_session(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("not initialized") || lower.contains("session")
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::ErrorData;

    #[test]
    fn session_class_errors() {
        assert!(Error::Closed.is_session_error());
        assert!(Error::Service(ServiceError::TransportClosed).is_session_error());
        assert!(
            Error::Service(ServiceError::McpError(ErrorData::invalid_request(
                "Bad Request: No valid session ID",
                None
            )))
            .is_session_error()
        );
        assert!(!Error::Timeout("tools/call".into()).is_session_error());
        assert!(
            !Error::Service(ServiceError::McpError(ErrorData::invalid_params(
                "missing argument `a`",
                None
            )))
            .is_session_error()
        );
    }
}
