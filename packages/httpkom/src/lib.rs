//! HTTP and WebSocket gateway to LysKOM servers.

pub mod backend;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Method, Request, header},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

use crate::backend::SessionBackend;
use crate::config::{CorsSection, HttpkomConfig};
use crate::errors::ErrorClass;
use crate::metrics::GatewayStats;

/// Header (and query parameter) carrying the connection id.
pub const HTTPKOM_CONNECTION_HEADER: &str = "Httpkom-Connection";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HttpkomConfig>,
    pub backend: SessionBackend,
    pub stats: Arc<GatewayStats>,
}

impl AppState {
    pub fn new(config: HttpkomConfig, backend: SessionBackend) -> Self {
        Self {
            config: Arc::new(config),
            backend,
            stats: Arc::new(GatewayStats::new()),
        }
    }
}

/// Span per request, tagged with a fresh request id.
#[derive(Clone)]
pub struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
        )
    }
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors);

    Router::new()
        .route("/", get(handlers::servers::list_servers))
        .route("/stats", get(handlers::servers::stats_handler))
        .route("/{server_id}/sessions/", post(handlers::sessions::create_session))
        .route(
            "/{server_id}/sessions/current/who-am-i",
            get(handlers::sessions::who_am_i),
        )
        .route(
            "/{server_id}/sessions/current/active",
            post(handlers::sessions::user_is_active),
        )
        .route(
            "/{server_id}/sessions/current/login",
            post(handlers::sessions::login),
        )
        .route(
            "/{server_id}/sessions/current/logout",
            post(handlers::sessions::logout),
        )
        .route(
            "/{server_id}/sessions/current/working-conference",
            post(handlers::sessions::change_working_conference),
        )
        .route(
            "/{server_id}/sessions/{session_no}",
            delete(handlers::sessions::delete_session),
        )
        .route("/{server_id}/async", get(handlers::ws::async_websocket))
        .layer(middleware::from_fn_with_state(state.clone(), track_stats))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(cors: &CorsSection) -> CorsLayer {
    // Credentials rule out a literal `*`, so a wildcard mirrors the caller.
    let origins = if cors.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(
            cors.allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    let connection_header = HeaderName::from_static("httpkom-connection");

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_credentials(true)
        .allow_headers([
            header::ORIGIN,
            header::ACCEPT,
            header::COOKIE,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-requested-with"),
            connection_header.clone(),
        ])
        .expose_headers([connection_header])
        .max_age(Duration::from_secs(cors.max_age_secs))
}

async fn track_stats(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    state.stats.request_received();
    let response = next.run(request).await;
    state.stats.response_sent(response.status());

    let stats = &state.stats;
    let counter: Option<&AtomicU64> = match response.extensions().get::<ErrorClass>() {
        Some(ErrorClass::Server) => Some(&stats.server_errors),
        Some(ErrorClass::Connection) => Some(&stats.connection_errors),
        Some(ErrorClass::Timeout) => Some(&stats.timeouts),
        Some(ErrorClass::Rpc) => Some(&stats.rpc_errors),
        Some(ErrorClass::Client) | None => None,
    };
    if let Some(counter) = counter {
        GatewayStats::count(counter);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn request_span_leaves_out_connection_id() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let captured = captured.clone();
                move || captured.clone()
            })
            .with_ansi(false)
            .finish();

        let request = Request::builder()
            .uri("/lyskom/async?Httpkom-Connection=5e3a0c1d-secret")
            .body(())
            .unwrap();
        tracing::subscriber::with_default(subscriber, || {
            let span = RequestIdMakeSpan.make_span(&request);
            let _entered = span.enter();
            tracing::info!("upgrading");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("path=/lyskom/async"), "{output}");
        assert!(!output.contains("5e3a0c1d-secret"), "{output}");
    }
}
