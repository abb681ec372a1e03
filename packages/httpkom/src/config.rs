use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use kom_session::SessionOptions;

// =============================================================================
// Gateway config (figment-deserialized from defaults / httpkom.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   httpkom.toml:    [session]
//                    backend = "remote"
//
//   env var:         HTTPKOM_SESSION__BACKEND=remote   (double underscore = nesting)
//
//   (single underscore stays within field names: HTTPKOM_SESSION__RPC_ADDR)

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HttpkomConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default = "default_kom_servers")]
    pub kom_servers: Vec<KomServer>,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub cors: CorsSection,
}

/// Where the HTTP gateway listens (`[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// A LysKOM server clients may connect to (`[[kom_servers]]`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KomServer {
    /// Path prefix, as in `/{id}/sessions/`.
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_kom_port")]
    pub port: u16,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Sessions live in this process.
    #[default]
    Local,
    /// Sessions live in a `session-server` process reached over RPC.
    Remote,
}

/// Session hosting and timeouts (`[session]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_rpc_addr")]
    pub rpc_addr: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            rpc_addr: default_rpc_addr(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

impl SessionSection {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..Default::default()
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn rpc_socket_addr(&self) -> Result<SocketAddr> {
        self.rpc_addr
            .parse()
            .with_context(|| format!("invalid session.rpc_addr {:?}", self.rpc_addr))
    }
}

/// Cross-origin settings (`[cors]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorsSection {
    /// Exact origins, or `"*"` for any.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5001
}
fn default_kom_port() -> u16 {
    4894
}
fn default_kom_servers() -> Vec<KomServer> {
    vec![KomServer {
        id: "lyskom".to_string(),
        name: "LysKOM".to_string(),
        host: "kom.lysator.liu.se".to_string(),
        port: default_kom_port(),
    }]
}
fn default_rpc_addr() -> String {
    "127.0.0.1:12345".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_rpc_timeout_secs() -> u64 {
    30
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5000".to_string()]
}
fn default_max_age_secs() -> u64 {
    21600
}

/// Build a figment that layers: defaults → config file → HTTPKOM_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `HTTPKOM_SERVER__PORT=8080`  →  `server.port = 8080`
///   `HTTPKOM_SESSION__BACKEND=remote`  →  `session.backend = "remote"`
pub fn figment(config_file: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(HttpkomConfig {
        kom_servers: default_kom_servers(),
        ..Default::default()
    }))
    .merge(Toml::file(config_file))
    .merge(Env::prefixed("HTTPKOM_").split("__"))
}

impl HttpkomConfig {
    pub fn load(config_file: &Path) -> Result<Self> {
        let config: Self = figment(config_file)
            .extract()
            .with_context(|| format!("failed to load config from {}", config_file.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.kom_servers.is_empty() {
            anyhow::bail!("at least one [[kom_servers]] entry is required");
        }
        for (i, server) in self.kom_servers.iter().enumerate() {
            if self.kom_servers[..i].iter().any(|s| s.id == server.id) {
                anyhow::bail!("duplicate kom server id {:?}", server.id);
            }
        }
        if self.session.backend == BackendKind::Remote {
            self.session.rpc_socket_addr()?;
        }
        Ok(())
    }

    pub fn kom_server(&self, id: &str) -> Option<&KomServer> {
        self.kom_servers.iter().find(|s| s.id == id)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.server.host, self.server.port))
    }
}
