//! Session lifecycle resources under `/{server_id}/sessions/`.
//!
//! A connection id names one LysKOM session on one server. Requests that
//! present an unknown id, an id for another server, or an id whose
//! connection has died get 403, and the client should start over with a
//! new session.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kom_session::{ClientInfo, KomError, KomResult, SessionState};
use protocol_a::ServerError;

use super::ConnectionId;
use crate::backend::SessionRef;
use crate::config::KomServer;
use crate::errors::{ApiError, ApiResult};
use crate::{AppState, HTTPKOM_CONNECTION_HEADER};

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub client: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub pers_no: Option<u32>,
    pub passwd: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkingConferenceBody {
    pub conf_no: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KomPerson {
    pub pers_no: u32,
    pub pers_name: String,
}

pub(crate) fn kom_server<'a>(state: &'a AppState, server_id: &str) -> ApiResult<&'a KomServer> {
    state
        .config
        .kom_server(server_id)
        .ok_or_else(|| ApiError::UnknownServer(server_id.to_string()))
}

/// Resolve the caller's session on `server_id`, evicting it if its
/// connection is gone.
pub(crate) async fn current_session(
    state: &AppState,
    server_id: &str,
    id: &str,
) -> ApiResult<SessionRef> {
    let server = kom_server(state, server_id)?;
    let session = match state.backend.get(id).await {
        Ok(session) => session,
        Err(KomError::UnknownSession(_)) => return Err(ApiError::NoConnection),
        Err(e) => return Err(e.into()),
    };
    let info = checked(state, id, session.info().await).await?;
    if info.host != server.host || info.port != server.port {
        debug!(session_id = %id, server_id, "connection id belongs to another server");
        return Err(ApiError::NoConnection);
    }
    match info.state {
        SessionState::Connected | SessionState::LoggedIn => Ok(session),
        SessionState::Broken => {
            match state.backend.remove_if_broken(id).await {
                Ok(true) => {
                    info!(session_id = %id, "evicted dead session");
                    state.stats.session_evicted();
                }
                Ok(false) => {}
                Err(e) => debug!(session_id = %id, error = %e, "eviction failed"),
            }
            Err(ApiError::NoConnection)
        }
        SessionState::Created | SessionState::Closed => {
            evict(state, id).await;
            Err(ApiError::NoConnection)
        }
    }
}

/// Pass a session call's result through, dropping the session when the
/// error says its connection is unusable.
pub(crate) async fn checked<T>(state: &AppState, id: &str, result: KomResult<T>) -> ApiResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(KomError::UnknownSession(_)) => Err(ApiError::NoConnection),
        Err(e) => {
            let err = ApiError::from(e);
            if err.discards_session() {
                evict(state, id).await;
            }
            Err(err)
        }
    }
}

async fn evict(state: &AppState, id: &str) {
    match state.backend.remove(id).await {
        Ok(true) => {
            info!(session_id = %id, "evicted dead session");
            state.stats.session_evicted();
        }
        Ok(false) => {}
        Err(e) => debug!(session_id = %id, error = %e, "eviction failed"),
    }
}

async fn require_login(state: &AppState, id: &str, session: &SessionRef) -> ApiResult<()> {
    if checked(state, id, session.is_logged_in().await).await? {
        Ok(())
    } else {
        Err(ApiError::NotLoggedIn)
    }
}

async fn kom_person(state: &AppState, id: &str, session: &SessionRef, pers_no: u32) -> ApiResult<KomPerson> {
    let pers_name = checked(state, id, session.get_conf_name(pers_no).await).await?;
    Ok(KomPerson { pers_no, pers_name })
}

fn invalid_body(_: JsonRejection) -> ApiError {
    ApiError::BadRequest("Invalid body.".into())
}

/// `POST /{server_id}/sessions/`: open a connection to the server.
pub async fn create_session(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<CreateSessionBody>, JsonRejection>,
) -> ApiResult<Response> {
    let server = kom_server(&state, &server_id)?;
    if headers.contains_key(HTTPKOM_CONNECTION_HEADER) {
        return Err(ApiError::ConnectionConflict);
    }
    let Json(body) = body.map_err(invalid_body)?;
    let client = body
        .client
        .ok_or_else(|| ApiError::BadRequest("Missing \"client\".".into()))?;

    let id = state.backend.create(&server.host, server.port, client).await?;
    state.stats.session_created();
    let session = checked(&state, &id, state.backend.get(&id).await).await?;
    let session_no = checked(&state, &id, session.who_am_i().await).await?;
    info!(session_id = %id, server_id, session_no, "session created");

    Ok((
        StatusCode::CREATED,
        [(HTTPKOM_CONNECTION_HEADER, id.clone())],
        Json(serde_json::json!({
            "session_no": session_no,
            "connection_id": id,
        })),
    )
        .into_response())
}

/// `GET /{server_id}/sessions/current/who-am-i`
pub async fn who_am_i(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    ConnectionId(id): ConnectionId,
) -> ApiResult<Response> {
    let session = current_session(&state, &server_id, &id).await?;
    let session_no = checked(&state, &id, session.who_am_i().await).await?;
    let person = match checked(&state, &id, session.current_person_no().await).await? {
        Some(pers_no) => Some(kom_person(&state, &id, &session, pers_no).await?),
        None => None,
    };
    Ok(Json(serde_json::json!({
        "person": person,
        "session_no": session_no,
    }))
    .into_response())
}

/// `POST /{server_id}/sessions/current/active`
pub async fn user_is_active(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    ConnectionId(id): ConnectionId,
) -> ApiResult<StatusCode> {
    let session = current_session(&state, &server_id, &id).await?;
    checked(&state, &id, session.user_is_active().await).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /{server_id}/sessions/current/login`
pub async fn login(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    ConnectionId(id): ConnectionId,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> ApiResult<Response> {
    let session = current_session(&state, &server_id, &id).await?;
    let Json(body) = body.map_err(invalid_body)?;
    let pers_no = body
        .pers_no
        .ok_or_else(|| ApiError::BadRequest("Missing \"pers_no\".".into()))?;
    let passwd = body
        .passwd
        .ok_or_else(|| ApiError::BadRequest("Missing \"passwd\".".into()))?;

    checked(&state, &id, session.login(pers_no, &passwd).await).await?;
    let person = kom_person(&state, &id, &session, pers_no).await?;
    info!(session_id = %id, pers_no, "logged in");
    Ok((StatusCode::CREATED, Json(person)).into_response())
}

/// `POST /{server_id}/sessions/current/logout`
pub async fn logout(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    ConnectionId(id): ConnectionId,
) -> ApiResult<StatusCode> {
    let session = current_session(&state, &server_id, &id).await?;
    require_login(&state, &id, &session).await?;
    checked(&state, &id, session.logout().await).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /{server_id}/sessions/{session_no}`: disconnect a session on the
/// server. Session number 0 means the caller's own; disconnecting it also
/// invalidates the connection id.
pub async fn delete_session(
    State(state): State<AppState>,
    Path((server_id, session_no)): Path<(String, u32)>,
    ConnectionId(id): ConnectionId,
) -> ApiResult<StatusCode> {
    let session = current_session(&state, &server_id, &id).await?;
    match session.disconnect(session_no).await {
        Err(KomError::Server(e)) if e.code == ServerError::UNDEFINED_SESSION => {
            return Err(ApiError::UndefinedSession(e));
        }
        other => checked(&state, &id, other).await?,
    }

    if !checked(&state, &id, session.is_connected().await).await? {
        // A session server unregisters a session that disconnected itself,
        // so only a local registry still holds the entry here.
        checked(&state, &id, state.backend.remove(&id).await).await?;
        state.stats.session_deleted();
        info!(session_id = %id, session_no, "own session disconnected");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /{server_id}/sessions/current/working-conference`
pub async fn change_working_conference(
    State(state): State<AppState>,
    Path(server_id): Path<String>,
    ConnectionId(id): ConnectionId,
    body: Result<Json<WorkingConferenceBody>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let session = current_session(&state, &server_id, &id).await?;
    require_login(&state, &id, &session).await?;
    let Json(body) = body.map_err(invalid_body)?;
    let conf_no = body
        .conf_no
        .ok_or_else(|| ApiError::BadRequest("Missing \"conf_no\".".into()))?;
    checked(&state, &id, session.change_conference(conf_no).await).await?;
    Ok(StatusCode::NO_CONTENT)
}
