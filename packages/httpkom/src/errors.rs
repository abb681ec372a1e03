//! HTTP error responses.
//!
//! Bodies follow one shape for both origins: `error_type` is `"protocol-a"`
//! for errors the LysKOM server reported (with its numeric `error_code` and
//! `error_status`) and `"httpkom"` for everything decided by the gateway.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use kom_session::KomError;
use protocol_a::ServerError;

/// Broad error class, attached to responses for the stats middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Server,
    Connection,
    Timeout,
    Rpc,
    Client,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or unknown connection id")]
    NoConnection,

    #[error("request already carries a connection id")]
    ConnectionConflict,

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("not logged in")]
    NotLoggedIn,

    /// The server has no session with the number a client asked about.
    #[error("undefined session: {0}")]
    UndefinedSession(ServerError),

    #[error(transparent)]
    Kom(#[from] KomError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_status: Option<String>,
    error_msg: String,
}

impl ErrorBody {
    fn httpkom(msg: impl Into<String>) -> Self {
        Self {
            error_type: "httpkom",
            error_code: None,
            error_status: None,
            error_msg: msg.into(),
        }
    }

    fn protocol_a(e: ServerError) -> Self {
        Self {
            error_type: "protocol-a",
            error_code: Some(e.code),
            error_status: Some(e.status.to_string()),
            error_msg: e.name().to_string(),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoConnection => StatusCode::FORBIDDEN,
            ApiError::ConnectionConflict => StatusCode::CONFLICT,
            ApiError::UnknownServer(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotLoggedIn => StatusCode::UNAUTHORIZED,
            ApiError::UndefinedSession(_) => StatusCode::NOT_FOUND,
            ApiError::Kom(e) => kom_status(e),
        }
    }

    fn class(&self) -> ErrorClass {
        match self {
            ApiError::Kom(KomError::Server(_) | KomError::Auth(_)) => ErrorClass::Server,
            ApiError::UndefinedSession(_) => ErrorClass::Server,
            ApiError::Kom(KomError::Timeout) => ErrorClass::Timeout,
            ApiError::Kom(KomError::Rpc(_)) => ErrorClass::Rpc,
            ApiError::Kom(e) if e.is_connection_fatal() => ErrorClass::Connection,
            ApiError::Kom(KomError::Connect { .. } | KomError::Send(_) | KomError::Protocol(_)) => {
                ErrorClass::Connection
            }
            _ => ErrorClass::Client,
        }
    }

    /// The session behind this error should be dropped by the caller.
    pub fn discards_session(&self) -> bool {
        matches!(self, ApiError::Kom(e) if e.is_connection_fatal())
    }
}

fn kom_status(e: &KomError) -> StatusCode {
    match e {
        KomError::Server(se) if se.code == ServerError::LOGIN_FIRST => StatusCode::UNAUTHORIZED,
        KomError::Server(_) => StatusCode::BAD_REQUEST,
        KomError::Auth(_) | KomError::NotLoggedIn => StatusCode::UNAUTHORIZED,
        KomError::ConnectionClosed | KomError::NotConnected | KomError::UnknownSession(_) => {
            StatusCode::FORBIDDEN
        }
        KomError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        KomError::Rpc(_) | KomError::Connect { .. } | KomError::Send(_) | KomError::Protocol(_) => {
            StatusCode::BAD_GATEWAY
        }
        KomError::NameNotFound(_) => StatusCode::NOT_FOUND,
        KomError::InvalidState(_)
        | KomError::InvalidArguments(_)
        | KomError::AmbiguousName(_)
        | KomError::UnimplementedAsyncKind(_) => StatusCode::BAD_REQUEST,
        KomError::MethodNotExposed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Kom(e) => match e.server_error() {
                Some(se) => ErrorBody::protocol_a(se),
                None => ErrorBody::httpkom(e.to_string()),
            },
            ApiError::UndefinedSession(se) => ErrorBody::protocol_a(*se),
            other => ErrorBody::httpkom(other.to_string()),
        };
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(self.class());
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_mapping() {
        let server = |code| ApiError::Kom(KomError::Server(ServerError::new(code, 0)));
        assert_eq!(server(ServerError::LOGIN_FIRST).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(server(ServerError::UNDEFINED_CONFERENCE).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Kom(KomError::ConnectionClosed).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Kom(KomError::UnknownSession("x".into())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::Kom(KomError::Timeout).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ApiError::Kom(KomError::Rpc("down".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ApiError::ConnectionConflict.status(), StatusCode::CONFLICT);
        assert!(ApiError::Kom(KomError::NotConnected).discards_session());
        assert!(!ApiError::Kom(KomError::Timeout).discards_session());
        let garbled = ApiError::Kom(KomError::Protocol("expected a number".into()));
        assert_eq!(garbled.status(), StatusCode::BAD_GATEWAY);
        assert!(!garbled.discards_session());
    }

    #[tokio::test]
    async fn protocol_a_body() {
        let err = ApiError::Kom(KomError::Auth(ServerError::new(
            ServerError::INVALID_PASSWORD,
            0,
        )));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.extensions().get::<ErrorClass>(),
            Some(&ErrorClass::Server)
        );
        let json = body_json(response).await;
        assert_eq!(json["error_type"], "protocol-a");
        assert_eq!(json["error_code"], 4);
        assert_eq!(json["error_status"], "0");
        assert_eq!(json["error_msg"], "InvalidPassword");
    }

    #[tokio::test]
    async fn httpkom_body() {
        let json = body_json(ApiError::BadRequest("Missing \"pers_no\".".into()).into_response()).await;
        assert_eq!(json["error_type"], "httpkom");
        assert_eq!(json["error_msg"], "Missing \"pers_no\".");
        assert!(json.get("error_code").is_none());
    }
}
