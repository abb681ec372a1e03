//! A LysKOM session: one connection plus authentication state.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use protocol_a::types::{ConfZInfo, UConference};
use protocol_a::{AsyncKind, AsyncMessage, Request};

use crate::broker::Broker;
use crate::connection::Connection;
use crate::dispatch::{AsyncDispatcher, AsyncHandler};
use crate::error::{KomError, KomResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Connected,
    LoggedIn,
    Closed,
    /// The connection died underneath the session.
    Broken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Tunables applied to every session a registry creates.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// User string sent in the connection greeting.
    pub user: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            user: default_user(),
        }
    }
}

fn default_user() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("httpkom%{host}")
}

/// Point-in-time view of a session, safe to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub state: SessionState,
    pub person_no: Option<u32>,
    pub session_no: Option<u32>,
    pub client: Option<ClientInfo>,
}

struct Inner {
    state: SessionState,
    broker: Option<Broker>,
    person_no: Option<u32>,
    session_no: Option<u32>,
    client: Option<ClientInfo>,
}

pub struct KomSession {
    id: String,
    host: String,
    port: u16,
    options: SessionOptions,
    dispatcher: Arc<AsyncDispatcher>,
    // Short critical sections only; never held across an await.
    inner: Mutex<Inner>,
    // Serializes connect and close against each other.
    lifecycle: tokio::sync::Mutex<()>,
}

impl KomSession {
    pub fn new(id: impl Into<String>, host: &str, port: u16, options: SessionOptions) -> Self {
        Self {
            id: id.into(),
            host: host.to_string(),
            port,
            options,
            dispatcher: Arc::new(AsyncDispatcher::new()),
            inner: Mutex::new(Inner {
                state: SessionState::Created,
                broker: None,
                person_no: None,
                session_no: None,
                client: None,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current state. Notices a dead connection and reports `Broken`.
    pub fn state(&self) -> SessionState {
        let mut inner = self.inner.lock();
        Self::refresh(&mut inner);
        inner.state
    }

    fn refresh(inner: &mut Inner) {
        if matches!(inner.state, SessionState::Connected | SessionState::LoggedIn) {
            let dead = inner
                .broker
                .as_ref()
                .is_none_or(|b| !b.connection().is_open());
            if dead {
                inner.state = SessionState::Broken;
            }
        }
    }

    /// Broker for an operation, or `NotConnected` if the session cannot serve one.
    fn broker(&self) -> KomResult<Broker> {
        let mut inner = self.inner.lock();
        Self::refresh(&mut inner);
        match inner.state {
            SessionState::Connected | SessionState::LoggedIn => {
                inner.broker.clone().ok_or(KomError::NotConnected)
            }
            _ => Err(KomError::NotConnected),
        }
    }

    /// Pass `result` through, recording a dead connection as `Broken`.
    fn observe<T>(&self, result: KomResult<T>) -> KomResult<T> {
        if let Err(e) = &result {
            if e.is_connection_fatal() && self.state() == SessionState::Broken {
                warn!(session_id = %self.id, error = %e, "session broken");
            }
        }
        result
    }

    async fn call_unit(&self, request: Request) -> KomResult<()> {
        let broker = self.broker()?;
        self.observe(broker.call_unit(request).await)
    }

    /// Connect to the server and identify the client. `Created -> Connected`.
    pub async fn connect(&self, client: ClientInfo) -> KomResult<()> {
        let _guard = self.lifecycle.lock().await;
        match self.state() {
            SessionState::Created => {}
            SessionState::Closed | SessionState::Broken => return Err(KomError::NotConnected),
            SessionState::Connected | SessionState::LoggedIn => {
                return Err(KomError::InvalidState("already connected".into()));
            }
        }

        let conn = Connection::open(
            &self.host,
            self.port,
            &self.options.user,
            self.dispatcher.clone(),
            self.options.connect_timeout,
        )
        .await?;
        let broker = Broker::new(Arc::new(conn), Some(self.options.request_timeout));

        let setup = async {
            broker
                .call_unit(Request::SetClientVersion {
                    name: client.name.clone(),
                    version: client.version.clone(),
                })
                .await?;
            broker
                .call_unit(Request::AcceptAsync {
                    msg_nos: AsyncKind::msg_nos(),
                })
                .await?;
            broker.call::<u32>(Request::WhoAmI).await
        };
        let session_no = match setup.await {
            Ok(n) => n,
            Err(e) => {
                broker.connection().close().await;
                return Err(e);
            }
        };

        let mut inner = self.inner.lock();
        inner.state = SessionState::Connected;
        inner.broker = Some(broker);
        inner.session_no = Some(session_no);
        inner.client = Some(client);
        info!(session_id = %self.id, host = %self.host, session_no, "session connected");
        Ok(())
    }

    /// `Connected -> LoggedIn`. Refused credentials give `Auth` and leave the
    /// session connected.
    pub async fn login(&self, person_no: u32, password: &str) -> KomResult<()> {
        let broker = self.broker()?;
        let result = broker
            .call_unit(Request::Login {
                person_no,
                password: password.to_string(),
                invisible: true,
            })
            .await;
        match self.observe(result) {
            Ok(()) => self.record_login(person_no),
            Err(KomError::Server(e)) if e.is_auth_failure() => {
                debug!(session_id = %self.id, person_no, error = %e, "login refused");
                Err(KomError::Auth(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Apply an accepted login, unless the session was closed or broke while
    /// the reply was in flight.
    fn record_login(&self, person_no: u32) -> KomResult<()> {
        let mut inner = self.inner.lock();
        Self::refresh(&mut inner);
        if !matches!(inner.state, SessionState::Connected | SessionState::LoggedIn) {
            return Err(KomError::NotConnected);
        }
        inner.state = SessionState::LoggedIn;
        inner.person_no = Some(person_no);
        info!(session_id = %self.id, person_no, "logged in");
        Ok(())
    }

        /// `LoggedIn -> Connected`.
    pub async fn logout(&self) -> KomResult<()> {
        if !self.is_logged_in() {
            return Err(KomError::NotLoggedIn);
        }
        self.call_unit(Request::Logout).await?;
        let mut inner = self.inner.lock();
        if inner.state == SessionState::LoggedIn {
            inner.state = SessionState::Connected;
        }
        inner.person_no = None;
        info!(session_id = %self.id, "logged out");
        Ok(())
    }

    /// The server's session number for this connection.
    pub async fn who_am_i(&self) -> KomResult<u32> {
        let broker = self.broker()?;
        let session_no = self.observe(broker.call::<u32>(Request::WhoAmI).await)?;
        self.inner.lock().session_no = Some(session_no);
        Ok(session_no)
    }

    pub fn is_logged_in(&self) -> bool {
        self.state() == SessionState::LoggedIn
    }

    pub fn current_person_no(&self) -> Option<u32> {
        let inner = self.inner.lock();
        match inner.state {
            SessionState::LoggedIn => inner.person_no,
            _ => None,
        }
    }

    pub fn session_no(&self) -> Option<u32> {
        self.inner.lock().session_no
    }

    pub fn client(&self) -> Option<ClientInfo> {
        self.inner.lock().client.clone()
    }

    pub async fn user_is_active(&self) -> KomResult<()> {
        self.call_unit(Request::UserActive).await
    }

    pub async fn change_conference(&self, conf_no: u32) -> KomResult<()> {
        self.call_unit(Request::ChangeConference { conf_no }).await
    }

    pub async fn lookup_name(
        &self,
        name: &str,
        want_persons: bool,
        want_confs: bool,
    ) -> KomResult<Vec<ConfZInfo>> {
        let broker = self.broker()?;
        let result = async {
            let mut body = broker
                .request(Request::LookupZName {
                    name: name.to_string(),
                    want_persons,
                    want_confs,
                })
                .await?;
            Ok(body.array(|r| r.decode())?)
        }
        .await;
        self.observe(result)
    }

    /// Resolve `name` to exactly one conference or person number.
    pub async fn lookup_name_exact(
        &self,
        name: &str,
        want_persons: bool,
        want_confs: bool,
    ) -> KomResult<u32> {
        let matches = self.lookup_name(name, want_persons, want_confs).await?;
        match matches.as_slice() {
            [] => Err(KomError::NameNotFound(name.to_string())),
            [only] => Ok(only.conf_no),
            _ => Err(KomError::AmbiguousName(name.to_string())),
        }
    }

    pub async fn get_conf_name(&self, conf_no: u32) -> KomResult<String> {
        let broker = self.broker()?;
        let uconf = self.observe(
            broker
                .call::<UConference>(Request::GetUconfStat { conf_no })
                .await,
        )?;
        Ok(uconf.name)
    }

    /// Send a message to `recipient` (0 broadcasts).
    pub async fn send_message(&self, recipient: u32, message: &str) -> KomResult<()> {
        self.call_unit(Request::SendMessage {
            recipient,
            message: message.to_string(),
        })
        .await
    }

    /// Ask the server to disconnect `session_no`. Session number 0 means this
    /// session; disconnecting this session closes it.
    pub async fn disconnect(&self, session_no: u32) -> KomResult<()> {
        let own = session_no == 0 || self.session_no() == Some(session_no);
        let result = self.call_unit(Request::Disconnect { session_no }).await;
        if own {
            // The server may drop the socket before the reply gets through.
            match result {
                Ok(()) | Err(KomError::ConnectionClosed) | Err(KomError::NotConnected) => {}
                Err(e) => return Err(e),
            }
            self.close().await;
            return Ok(());
        }
        result
    }

    pub fn register_async_handler(&self, msg_no: u32, handler: AsyncHandler) -> KomResult<()> {
        self.dispatcher.register_handler(msg_no, handler)
    }

    pub fn dispatcher(&self) -> &Arc<AsyncDispatcher> {
        &self.dispatcher
    }

    /// Up to `limit` buffered async messages nobody subscribed to.
    pub fn get_async_messages(&self, limit: usize) -> KomResult<Vec<AsyncMessage>> {
        if self.state() == SessionState::Created {
            return Err(KomError::NotConnected);
        }
        Ok(self.dispatcher.drain(limit))
    }

    /// Wait for the next unsubscribed async message.
    pub async fn next_async_message(&self) -> KomResult<AsyncMessage> {
        if self.state() == SessionState::Created {
            return Err(KomError::NotConnected);
        }
        self.dispatcher.next_message().await
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.state();
        let inner = self.inner.lock();
        SessionInfo {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            state,
            person_no: match state {
                SessionState::LoggedIn => inner.person_no,
                _ => None,
            },
            session_no: inner.session_no,
            client: inner.client.clone(),
        }
    }

    /// Release the connection. Any state goes to `Closed`; repeat calls are no-ops.
    pub async fn close(&self) {
        let _guard = self.lifecycle.lock().await;
        let broker = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Closed {
                return;
            }
            inner.state = SessionState::Closed;
            inner.person_no = None;
            inner.broker.take()
        };
        if let Some(broker) = broker {
            broker.connection().close().await;
        }
        self.dispatcher.close();
        debug!(session_id = %self.id, "session closed");
    }
}

impl std::fmt::Debug for KomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KomSession")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("state", &self.state())
            .finish()
    }
}
