//! Where sessions live: in this process, or behind a session server.
//!
//! Handlers only see [`SessionBackend`] and [`SessionRef`], so the same
//! routes serve both deployments.

use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::debug;

use kom_session::{
    ClientInfo, KomError, KomResult, KomSession, RemoteSession, RpcClient, SessionInfo,
    SessionRegistry, SessionState,
};
use protocol_a::AsyncMessage;

pub type AsyncStream = BoxStream<'static, AsyncMessage>;

#[derive(Clone)]
pub enum SessionBackend {
    Local(Arc<SessionRegistry>),
    Remote(RpcClient),
}

impl SessionBackend {
    /// Connect a new session. Returns its id.
    pub async fn create(&self, host: &str, port: u16, client: ClientInfo) -> KomResult<String> {
        match self {
            SessionBackend::Local(registry) => registry.create(host, port, client).await,
            SessionBackend::Remote(rpc) => rpc.create_session(host, port, client).await,
        }
    }

    /// Look up a session, failing with `UnknownSession`.
    pub async fn get(&self, id: &str) -> KomResult<SessionRef> {
        match self {
            SessionBackend::Local(registry) => registry.get(id).map(SessionRef::Local),
            SessionBackend::Remote(rpc) => {
                if rpc.has_session(id).await? {
                    Ok(SessionRef::Remote(rpc.session(id)))
                } else {
                    Err(KomError::UnknownSession(id.to_string()))
                }
            }
        }
    }

    /// Unregister and close. Returns whether the id was known.
    pub async fn remove(&self, id: &str) -> KomResult<bool> {
        match self {
            SessionBackend::Local(registry) => Ok(registry.remove(id).await),
            SessionBackend::Remote(rpc) => rpc.delete_session(id).await,
        }
    }

    /// Drop the session if its connection has died. Returns whether it did.
    pub async fn remove_if_broken(&self, id: &str) -> KomResult<bool> {
        match self {
            SessionBackend::Local(registry) => Ok(registry.remove_if_broken(id).await),
            SessionBackend::Remote(rpc) => match rpc.session(id).info().await {
                Ok(info) if info.state == SessionState::Broken => rpc.delete_session(id).await,
                Ok(_) | Err(KomError::UnknownSession(_)) => Ok(false),
                Err(e) => Err(e),
            },
        }
    }

    /// Number of live sessions, when they live in this process.
    pub fn active_sessions(&self) -> Option<usize> {
        match self {
            SessionBackend::Local(registry) => Some(registry.len()),
            SessionBackend::Remote(_) => None,
        }
    }

    /// Unsubscribed async messages for `id` until the session ends.
    pub async fn async_stream(&self, id: &str) -> KomResult<AsyncStream> {
        match self {
            SessionBackend::Local(registry) => {
                let session = registry.get(id)?;
                Ok(futures::stream::unfold(session, |session| async move {
                    match session.next_async_message().await {
                        Ok(msg) => Some((msg, session)),
                        Err(e) => {
                            debug!(session_id = %session.id(), error = %e, "async stream ended");
                            None
                        }
                    }
                })
                .boxed())
            }
            SessionBackend::Remote(rpc) => {
                let stream = rpc.stream_async(id).await?;
                Ok(stream
                    .take_while(|item| futures::future::ready(item.is_ok()))
                    .filter_map(|item| futures::future::ready(item.ok()))
                    .boxed())
            }
        }
    }

    /// Close local sessions at shutdown. Remote sessions belong to the
    /// session server and outlive the gateway.
    pub async fn close_all(&self) {
        if let SessionBackend::Local(registry) = self {
            registry.close_all().await;
        }
    }
}

/// One session, local or remote.
#[derive(Clone)]
pub enum SessionRef {
    Local(Arc<KomSession>),
    Remote(RemoteSession),
}

impl SessionRef {
    pub async fn info(&self) -> KomResult<SessionInfo> {
        match self {
            SessionRef::Local(s) => Ok(s.info()),
            SessionRef::Remote(r) => r.info().await,
        }
    }

    /// Still talking to the server.
    pub async fn is_connected(&self) -> KomResult<bool> {
        let state = match self {
            SessionRef::Local(s) => s.state(),
            SessionRef::Remote(r) => match r.info().await {
                Ok(info) => info.state,
                Err(KomError::UnknownSession(_)) => return Ok(false),
                Err(e) => return Err(e),
            },
        };
        Ok(matches!(
            state,
            SessionState::Connected | SessionState::LoggedIn
        ))
    }

    pub async fn who_am_i(&self) -> KomResult<u32> {
        match self {
            SessionRef::Local(s) => s.who_am_i().await,
            SessionRef::Remote(r) => r.who_am_i().await,
        }
    }

    pub async fn is_logged_in(&self) -> KomResult<bool> {
        match self {
            SessionRef::Local(s) => Ok(s.is_logged_in()),
            SessionRef::Remote(r) => r.is_logged_in().await,
        }
    }

    pub async fn current_person_no(&self) -> KomResult<Option<u32>> {
        match self {
            SessionRef::Local(s) => Ok(s.current_person_no()),
            SessionRef::Remote(r) => r.current_person_no().await,
        }
    }

    pub async fn user_is_active(&self) -> KomResult<()> {
        match self {
            SessionRef::Local(s) => s.user_is_active().await,
            SessionRef::Remote(r) => r.user_is_active().await,
        }
    }

    pub async fn login(&self, person_no: u32, password: &str) -> KomResult<()> {
        match self {
            SessionRef::Local(s) => s.login(person_no, password).await,
            SessionRef::Remote(r) => r.login(person_no, password).await,
        }
    }

    pub async fn logout(&self) -> KomResult<()> {
        match self {
            SessionRef::Local(s) => s.logout().await,
            SessionRef::Remote(r) => r.logout().await,
        }
    }

    pub async fn get_conf_name(&self, conf_no: u32) -> KomResult<String> {
        match self {
            SessionRef::Local(s) => s.get_conf_name(conf_no).await,
            SessionRef::Remote(r) => r.get_conf_name(conf_no).await,
        }
    }

    pub async fn change_conference(&self, conf_no: u32) -> KomResult<()> {
        match self {
            SessionRef::Local(s) => s.change_conference(conf_no).await,
            SessionRef::Remote(r) => r.change_conference(conf_no).await,
        }
    }

    pub async fn disconnect(&self, session_no: u32) -> KomResult<()> {
        match self {
            SessionRef::Local(s) => s.disconnect(session_no).await,
            SessionRef::Remote(r) => r.disconnect(session_no).await,
        }
    }
}
