use thiserror::Error;

/// Errors binding or addressing a bridge session.
///
/// Protocol-level problems inside a bound session are logged, never
/// returned; these cover only the channel lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("unknown bridge session `{0}`")]
    UnknownSession(String),
    #[error("bridge session `{0}` is already bound to a channel")]
    AlreadyBound(String),
    #[error("first frame must be an initialize request carrying params.sessionId")]
    HandshakeRequired,
}
