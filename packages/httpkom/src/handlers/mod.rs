pub mod servers;
pub mod sessions;
pub mod ws;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use std::collections::HashMap;

use crate::HTTPKOM_CONNECTION_HEADER;
use crate::errors::ApiError;

/// The caller's connection id, from the `Httpkom-Connection` header or,
/// failing that, the query parameter of the same name (for `<img>` tags and
/// WebSocket clients that cannot set headers). Missing means 403.
#[derive(Debug, Clone)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn from_parts(parts: &Parts) -> Option<Self> {
        if let Some(value) = parts.headers.get(HTTPKOM_CONNECTION_HEADER) {
            return value.to_str().ok().map(|v| ConnectionId(v.to_string()));
        }
        Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(mut params)| params.remove(HTTPKOM_CONNECTION_HEADER))
            .map(ConnectionId)
    }
}

impl<S> FromRequestParts<S> for ConnectionId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        ConnectionId::from_parts(parts).ok_or(ApiError::NoConnection)
    }
}
