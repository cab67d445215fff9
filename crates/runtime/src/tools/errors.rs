use thiserror::Error;

/// Errors from tool-provider management and dispatch.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ToolError {
    #[error("invalid tool name `{0}`: expected <provider>__<tool>")]
    InvalidName(String),
    #[error("invalid provider id `{0}`: must be non-empty and must not contain `__`")]
    InvalidProviderId(String),
    #[error("provider \"{0}\" not found")]
    ProviderNotFound(String),
    #[error("provider \"{0}\" already exists")]
    DuplicateProvider(String),
    #[error("invalid resource uri `{0}`: expected <scheme>://<provider>/...")]
    InvalidResourceUri(String),
    #[error("provider \"{id}\" is disconnected and reconnection failed: {message}")]
    ReconnectFailed { id: String, message: String },
    #[error("{0}")]
    Provider(String),
}

impl From<mcp::Error> for ToolError {
    fn from(e: mcp::Error) -> Self {
        Self::Provider(e.to_string())
    }
}
