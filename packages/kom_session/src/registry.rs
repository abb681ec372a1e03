//! Process-wide table of live sessions keyed by opaque id.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{KomError, KomResult};
use crate::session::{ClientInfo, KomSession, SessionOptions, SessionState};

/// Sessions are inserted only once connected, so a lookup never yields one
/// in `Created`. The map lock is never held across an await.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<KomSession>>>,
    options: SessionOptions,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl SessionRegistry {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            options,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Connect a new session and register it. Returns the session id.
    pub async fn create(&self, host: &str, port: u16, client: ClientInfo) -> KomResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(KomSession::new(&id, host, port, self.options.clone()));
        session.connect(client).await?;
        self.sessions.lock().insert(id.clone(), session);
        info!(session_id = %id, host, port, "session registered");
        Ok(id)
    }

    pub fn has(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    pub fn get(&self, id: &str) -> KomResult<Arc<KomSession>> {
        self.sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| KomError::UnknownSession(id.to_string()))
    }

    /// Unregister and close. Returns whether the id was known.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.lock().remove(id);
        match removed {
            Some(session) => {
                session.close().await;
                debug!(session_id = %id, "session removed");
                true
            }
            None => false,
        }
    }

    /// Drop the session if its connection has died. Returns whether it did.
    pub async fn remove_if_broken(&self, id: &str) -> bool {
        let broken = self
            .sessions
            .lock()
            .get(id)
            .is_some_and(|s| s.state() == SessionState::Broken);
        broken && self.remove(id).await
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Close every session. Used at shutdown.
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        futures::future::join_all(sessions.iter().map(|s| s.close())).await;
        if count > 0 {
            info!(count, "closed all sessions");
        }
    }
}
