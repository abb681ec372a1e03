//! The HTTP surface, driven through the router against a fake LysKOM server.

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use httpkom::backend::SessionBackend;
use httpkom::config::{HttpkomConfig, KomServer};
use httpkom::{AppState, router};
use kom_session::testing::FakeServer;
use kom_session::{RpcClient, RpcServer, SessionOptions, SessionRegistry};

fn options() -> SessionOptions {
    SessionOptions {
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        user: "test%localhost".into(),
    }
}

fn config_for(kom: &FakeServer) -> HttpkomConfig {
    HttpkomConfig {
        kom_servers: vec![KomServer {
            id: "test".into(),
            name: "Test server".into(),
            host: kom.host(),
            port: kom.port(),
        }],
        ..Default::default()
    }
}

async fn fake_kom() -> FakeServer {
    FakeServer::builder()
        .person(6, "Oskar Skoog", "secret")
        .conference(1, "Inlägg }t mig")
        .start()
        .await
        .unwrap()
}

struct Gateway {
    kom: FakeServer,
    app: Router,
    _shutdown: Option<CancellationToken>,
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Some(shutdown) = &self._shutdown {
            shutdown.cancel();
        }
    }
}

async fn local_gateway() -> Gateway {
    let kom = fake_kom().await;
    let backend = SessionBackend::Local(Arc::new(SessionRegistry::new(options())));
    let app = router(AppState::new(config_for(&kom), backend));
    Gateway {
        kom,
        app,
        _shutdown: None,
    }
}

async fn remote_gateway() -> Gateway {
    let kom = fake_kom().await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = RpcServer::new(Arc::new(SessionRegistry::new(options())));
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { server.serve(listener, shutdown).await }
    });
    let backend = SessionBackend::Remote(RpcClient::new(addr, Duration::from_secs(2)));
    let app = router(AppState::new(config_for(&kom), backend));
    Gateway {
        kom,
        app,
        _shutdown: Some(shutdown),
    }
}

impl Gateway {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        connection: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = connection {
            builder = builder.header("Httpkom-Connection", id);
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, json)
    }

    async fn create_session(&self) -> String {
        let (status, headers, body) = self
            .send(
                Method::POST,
                "/test/sessions/",
                None,
                Some(json!({ "client": { "name": "jskom", "version": "0.6" } })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = headers["Httpkom-Connection"].to_str().unwrap().to_string();
        assert_eq!(body["connection_id"], id.as_str());
        id
    }

    async fn login(&self, id: &str, pers_no: u32, passwd: &str) -> (StatusCode, Value) {
        let (status, _, body) = self
            .send(
                Method::POST,
                "/test/sessions/current/login",
                Some(id),
                Some(json!({ "pers_no": pers_no, "passwd": passwd })),
            )
            .await;
        (status, body)
    }
}

#[tokio::test]
async fn lists_configured_servers() {
    let gw = local_gateway().await;
    let (status, _, body) = gw.send(Method::GET, "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["test"]["name"], "Test server");
    assert_eq!(body["test"]["port"], gw.kom.port());
    assert_eq!(body["test"]["sort_order"], 0);
}

#[tokio::test]
async fn create_session_returns_connection_id() {
    let gw = local_gateway().await;
    let (status, headers, body) = gw
        .send(
            Method::POST,
            "/test/sessions/",
            None,
            Some(json!({ "client": { "name": "jskom", "version": "0.6" } })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(headers.contains_key("Httpkom-Connection"));
    assert_eq!(body["session_no"], 1);
    assert_eq!(gw.kom.connection_count(), 1);
}

#[tokio::test]
async fn create_session_rejections() {
    let gw = local_gateway().await;
    let client = json!({ "client": { "name": "jskom", "version": "0.6" } });

    let (status, _, _) = gw
        .send(Method::POST, "/test/sessions/", Some("existing"), Some(client.clone()))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, _) = gw
        .send(Method::POST, "/nowhere/sessions/", None, Some(client))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = gw
        .send(Method::POST, "/test/sessions/", None, Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "httpkom");
    assert_eq!(body["error_msg"], "Missing \"client\".");
    assert_eq!(gw.kom.connection_count(), 0);
}

#[tokio::test]
async fn missing_or_unknown_connection_is_forbidden() {
    let gw = local_gateway().await;
    let (status, _, _) = gw
        .send(Method::GET, "/test/sessions/current/who-am-i", None, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = gw
        .send(
            Method::GET,
            "/test/sessions/current/who-am-i",
            Some("no-such-connection"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn login_who_am_i_logout() {
    let gw = local_gateway().await;
    let id = gw.create_session().await;

    let (status, _, body) = gw
        .send(Method::GET, "/test/sessions/current/who-am-i", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "person": null, "session_no": 1 }));

    let (status, body) = gw.login(&id, 6, "wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_type"], "protocol-a");
    assert_eq!(body["error_code"], 4);
    assert_eq!(body["error_msg"], "InvalidPassword");

    let (status, body) = gw.login(&id, 6, "secret").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({ "pers_no": 6, "pers_name": "Oskar Skoog" }));

    let (status, _, body) = gw
        .send(Method::GET, "/test/sessions/current/who-am-i", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["person"]["pers_name"], "Oskar Skoog");

    let (status, _, _) = gw
        .send(Method::POST, "/test/sessions/current/active", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = gw
        .send(Method::POST, "/test/sessions/current/logout", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = gw
        .send(Method::POST, "/test/sessions/current/logout", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_requires_fields() {
    let gw = local_gateway().await;
    let id = gw.create_session().await;
    let (status, _, body) = gw
        .send(
            Method::POST,
            "/test/sessions/current/login",
            Some(&id),
            Some(json!({ "passwd": "secret" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_msg"], "Missing \"pers_no\".");
}

#[tokio::test]
async fn working_conference_requires_login() {
    let gw = local_gateway().await;
    let id = gw.create_session().await;
    let uri = "/test/sessions/current/working-conference";

    let (status, _, _) = gw
        .send(Method::POST, uri, Some(&id), Some(json!({ "conf_no": 1 })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    gw.login(&id, 6, "secret").await;
    let (status, _, _) = gw
        .send(Method::POST, uri, Some(&id), Some(json!({ "conf_no": 1 })))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, body) = gw
        .send(Method::POST, uri, Some(&id), Some(json!({ "conf_no": 404 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], 9);
    assert_eq!(body["error_status"], "404");
}

#[tokio::test]
async fn deleting_own_session_invalidates_connection_id() {
    let gw = local_gateway().await;
    let id = gw.create_session().await;

    let (status, _, body) = gw
        .send(Method::DELETE, "/test/sessions/99", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_msg"], "UndefinedSession");

    let (status, _, _) = gw
        .send(Method::DELETE, "/test/sessions/0", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = gw
        .send(Method::GET, "/test/sessions/current/who-am-i", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, _, stats) = gw.send(Method::GET, "/stats", None, None).await;
    assert_eq!(stats["sessions"]["created"], 1);
    assert_eq!(stats["sessions"]["deleted"], 1);
    assert_eq!(stats["sessions"]["active"], 0);
}

#[tokio::test]
async fn dead_connection_is_evicted() {
    let gw = local_gateway().await;
    let id = gw.create_session().await;
    gw.kom.kill_connections();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (status, _, _) = gw
        .send(Method::GET, "/test/sessions/current/who-am-i", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, _, stats) = gw.send(Method::GET, "/stats", None, None).await;
    assert_eq!(stats["sessions"]["evicted"], 1);
    assert_eq!(stats["sessions"]["active"], 0);
}

#[tokio::test]
async fn undecodable_reply_keeps_session() {
    let gw = local_gateway().await;
    let id = gw.create_session().await;

    gw.kom.garble_replies(56, true);
    let (status, _, body) = gw
        .send(Method::GET, "/test/sessions/current/who-am-i", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error_type"], "httpkom");

    gw.kom.garble_replies(56, false);
    let (status, _, body) = gw
        .send(Method::GET, "/test/sessions/current/who-am-i", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_no"], 1);

    let (_, _, stats) = gw.send(Method::GET, "/stats", None, None).await;
    assert_eq!(stats["sessions"]["evicted"], 0);
    assert_eq!(stats["sessions"]["active"], 1);
}

#[tokio::test]
async fn connection_id_from_query_parameter() {
    let gw = local_gateway().await;
    let id = gw.create_session().await;
    let (status, _, body) = gw
        .send(
            Method::GET,
            &format!("/test/sessions/current/who-am-i?Httpkom-Connection={id}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_no"], 1);
}

#[tokio::test]
async fn connection_id_is_bound_to_its_server() {
    let other = fake_kom().await;
    let kom = fake_kom().await;
    let mut config = config_for(&kom);
    config.kom_servers.push(KomServer {
        id: "other".into(),
        name: "Other".into(),
        host: other.host(),
        port: other.port(),
    });
    let backend = SessionBackend::Local(Arc::new(SessionRegistry::new(options())));
    let gw = Gateway {
        kom,
        app: router(AppState::new(config, backend)),
        _shutdown: None,
    };
    let id = gw.create_session().await;

    let (status, _, _) = gw
        .send(Method::GET, "/other/sessions/current/who-am-i", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn stats_count_responses() {
    let gw = local_gateway().await;
    gw.send(Method::GET, "/", None, None).await;
    gw.send(Method::GET, "/test/sessions/current/who-am-i", None, None)
        .await;
    let (status, _, stats) = gw.send(Method::GET, "/stats", None, None).await;
    assert_eq!(status, StatusCode::OK);
    // The stats request itself is counted before its response.
    assert_eq!(stats["http"]["requests_received"], 3);
    assert_eq!(stats["http"]["responses_2xx"], 1);
    assert_eq!(stats["http"]["responses_4xx"], 1);
}

#[tokio::test]
async fn cors_preflight_allows_connection_header() {
    let gw = local_gateway().await;
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/test/sessions/current/login")
        .header("Origin", "http://localhost:5000")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "httpkom-connection")
        .body(Body::empty())
        .unwrap();
    let response = gw.app.clone().oneshot(request).await.unwrap();
    let headers = response.headers();
    assert_eq!(
        headers["access-control-allow-origin"],
        "http://localhost:5000"
    );
    assert_eq!(headers["access-control-allow-credentials"], "true");
    assert!(
        headers["access-control-allow-headers"]
            .to_str()
            .unwrap()
            .contains("httpkom-connection")
    );
}

#[tokio::test]
async fn remote_backend_serves_the_same_api() {
    let gw = remote_gateway().await;
    let id = gw.create_session().await;

    let (status, body) = gw.login(&id, 6, "secret").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["pers_name"], "Oskar Skoog");

    let (status, body) = gw.login(&id, 6, "wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], 4);

    let (status, _, _) = gw
        .send(Method::DELETE, "/test/sessions/0", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = gw
        .send(Method::GET, "/test/sessions/current/who-am-i", Some(&id), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, _, stats) = gw.send(Method::GET, "/stats", None, None).await;
    assert_eq!(stats["sessions"]["active"], Value::Null);
    assert_eq!(stats["sessions"]["deleted"], 1);
}
