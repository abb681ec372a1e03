//! Gateway counters, served at `GET /stats`.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct GatewayStats {
    // HTTP
    pub requests_received: AtomicU64,
    pub responses_2xx: AtomicU64,
    pub responses_4xx: AtomicU64,
    pub responses_5xx: AtomicU64,

    // Sessions
    pub sessions_created: AtomicU64,
    pub sessions_deleted: AtomicU64,
    /// Dropped after their connection died.
    pub sessions_evicted: AtomicU64,

    // Errors by class
    pub server_errors: AtomicU64,
    pub connection_errors: AtomicU64,
    pub timeouts: AtomicU64,
    pub rpc_errors: AtomicU64,

    // WebSocket
    pub websocket_connections: AtomicU64,
    pub async_messages_sent: AtomicU64,

    start_time: Option<Instant>,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_sent(&self, status: StatusCode) {
        let counter = if status.is_server_error() {
            &self.responses_5xx
        } else if status.is_client_error() {
            &self.responses_4xx
        } else {
            &self.responses_2xx
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_deleted(&self) {
        self.sessions_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_evicted(&self) {
        self.sessions_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// `active_sessions` is `None` when sessions live in another process.
    pub fn snapshot(&self, active_sessions: Option<usize>) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            uptime_secs: self.uptime_secs(),
            http: HttpStats {
                requests_received: load(&self.requests_received),
                responses_2xx: load(&self.responses_2xx),
                responses_4xx: load(&self.responses_4xx),
                responses_5xx: load(&self.responses_5xx),
            },
            sessions: SessionStats {
                active: active_sessions,
                created: load(&self.sessions_created),
                deleted: load(&self.sessions_deleted),
                evicted: load(&self.sessions_evicted),
            },
            errors: ErrorStats {
                server: load(&self.server_errors),
                connection: load(&self.connection_errors),
                timeout: load(&self.timeouts),
                rpc: load(&self.rpc_errors),
            },
            websocket: WebSocketStats {
                connections: load(&self.websocket_connections),
                async_messages_sent: load(&self.async_messages_sent),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub http: HttpStats,
    pub sessions: SessionStats,
    pub errors: ErrorStats,
    pub websocket: WebSocketStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpStats {
    pub requests_received: u64,
    pub responses_2xx: u64,
    pub responses_4xx: u64,
    pub responses_5xx: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub active: Option<usize>,
    pub created: u64,
    pub deleted: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStats {
    pub server: u64,
    pub connection: u64,
    pub timeout: u64,
    pub rpc: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketStats {
    pub connections: u64,
    pub async_messages_sent: u64,
}
