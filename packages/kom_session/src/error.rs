//! Error taxonomy shared by sessions, the registry and the RPC layer.

use protocol_a::{CodecError, ServerError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum KomError {
    #[error("could not connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("session is not connected")]
    NotConnected,

    #[error("session is not logged in")]
    NotLoggedIn,

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("server error: {0}")]
    Server(ServerError),

    #[error("authentication failed: {0}")]
    Auth(ServerError),

    #[error("request timed out")]
    Timeout,

    #[error("failed to send request: {0}")]
    Send(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("method not exposed: {0}")]
    MethodNotExposed(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("asynchronous message kind {0} is not implemented")]
    UnimplementedAsyncKind(u32),

    #[error("name not found: {0}")]
    NameNotFound(String),

    #[error("ambiguous name: {0}")]
    AmbiguousName(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("rpc failure: {0}")]
    Rpc(String),
}

impl KomError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect_error",
            Self::ConnectionClosed => "connection_closed",
            Self::NotConnected => "not_connected",
            Self::NotLoggedIn => "not_logged_in",
            Self::InvalidState(_) => "invalid_state",
            Self::Server(_) => "server_error",
            Self::Auth(_) => "auth_error",
            Self::Timeout => "timeout",
            Self::Send(_) => "send_failed",
            Self::Protocol(_) => "protocol_error",
            Self::MethodNotExposed(_) => "method_not_exposed",
            Self::UnknownSession(_) => "unknown_session",
            Self::UnimplementedAsyncKind(_) => "unimplemented_async_kind",
            Self::NameNotFound(_) => "name_not_found",
            Self::AmbiguousName(_) => "ambiguous_name",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::Rpc(_) => "rpc_error",
        }
    }

    /// The session behind this error is unusable and should be discarded.
    /// A reply that fails to decode is a per-call failure and does not count.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::NotConnected)
    }

    /// The server error carried by `Server`/`Auth`, if any.
    pub fn server_error(&self) -> Option<ServerError> {
        match self {
            Self::Server(e) | Self::Auth(e) => Some(*e),
            _ => None,
        }
    }

    /// Rust type name of the error kind, as reported across the RPC boundary.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Server(e) | Self::Auth(e) => e.name(),
            Self::Connect { .. } => "ConnectError",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::NotConnected => "SessionNotConnected",
            Self::NotLoggedIn => "NotLoggedIn",
            Self::InvalidState(_) => "InvalidState",
            Self::Timeout => "Timeout",
            Self::Send(_) => "SendError",
            Self::Protocol(_) => "ProtocolError",
            Self::MethodNotExposed(_) => "MethodNotExposed",
            Self::UnknownSession(_) => "UnknownSession",
            Self::UnimplementedAsyncKind(_) => "UnimplementedAsyncKind",
            Self::NameNotFound(_) => "NameNotFound",
            Self::AmbiguousName(_) => "AmbiguousName",
            Self::InvalidArguments(_) => "InvalidArguments",
            Self::Rpc(_) => "RpcError",
        }
    }
}

impl From<CodecError> for KomError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(_) => Self::ConnectionClosed,
            other => Self::Protocol(other.to_string()),
        }
    }
}

pub type KomResult<T> = Result<T, KomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(KomError::ConnectionClosed.is_connection_fatal());
        assert!(KomError::NotConnected.is_connection_fatal());
        assert!(!KomError::Protocol("x".into()).is_connection_fatal());
        assert!(!KomError::Timeout.is_connection_fatal());
        assert!(!KomError::Server(ServerError::new(9, 1)).is_connection_fatal());
    }

    #[test]
    fn codec_io_errors_mean_closed_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(KomError::from(CodecError::Io(io)), KomError::ConnectionClosed);
        assert!(matches!(
            KomError::from(CodecError::UnexpectedEnd),
            KomError::Protocol(_)
        ));
    }

    #[test]
    fn class_name_uses_server_error_name() {
        let e = KomError::Auth(ServerError::new(ServerError::INVALID_PASSWORD, 0));
        assert_eq!(e.class_name(), "InvalidPassword");
        assert_eq!(e.error_code(), "auth_error");
        assert_eq!(e.server_error().map(|s| s.code), Some(4));
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(KomError::UnknownSession("abc".into())).unwrap();
        assert_eq!(json["kind"], "unknown_session");
        assert_eq!(json["detail"], "abc");
        let back: KomError = serde_json::from_value(json).unwrap();
        assert_eq!(back, KomError::UnknownSession("abc".into()));
    }
}
