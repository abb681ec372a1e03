use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::prelude::*;

use httpkom::backend::SessionBackend;
use httpkom::config::{BackendKind, HttpkomConfig};
use httpkom::{AppState, router};
use kom_session::{RpcClient, RpcServer, SessionRegistry};

#[derive(Parser)]
#[command(name = "httpkom")]
#[command(about = "HTTP and WebSocket gateway to LysKOM servers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve(ServeArgs),

    /// Host sessions for gateways configured with the remote backend
    SessionServer(SessionServerArgs),
}

#[derive(Parser)]
struct ServeArgs {
    /// Config file
    #[arg(short, long, default_value = "httpkom.toml")]
    config: PathBuf,

    /// Host to bind to (overrides [server] host)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port to listen on (overrides [server] port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct SessionServerArgs {
    /// Config file
    #[arg(short, long, default_value = "httpkom.toml")]
    config: PathBuf,

    /// Address to listen on (defaults to [session] rpc_addr)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_gateway(args).await,
        Commands::SessionServer(args) => run_session_server(args).await,
    }
}

fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "httpkom=debug,kom_session=debug,tower_http=debug,info"
    } else {
        "httpkom=info,kom_session=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal, cleaning up...");
}

async fn run_gateway(args: ServeArgs) -> Result<()> {
    init_tracing(args.debug);

    let mut config = HttpkomConfig::load(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let backend = match config.session.backend {
        BackendKind::Local => SessionBackend::Local(Arc::new(SessionRegistry::new(
            config.session.session_options(),
        ))),
        BackendKind::Remote => {
            let addr = config.session.rpc_socket_addr()?;
            info!("Using session server at {}", addr);
            SessionBackend::Remote(RpcClient::new(addr, config.session.rpc_timeout()))
        }
    };

    let addr = config.listen_addr()?;
    for server in &config.kom_servers {
        info!("  /{}/ -> {} ({}:{})", server.id, server.name, server.host, server.port);
    }

    let state = AppState::new(config, backend.clone());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("httpkom listening on http://{}", listener.local_addr()?);

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    info!("Closing sessions...");
    backend.close_all().await;
    info!("Shutdown complete");
    server_result
}

async fn run_session_server(args: SessionServerArgs) -> Result<()> {
    init_tracing(args.debug);

    let config = HttpkomConfig::load(&args.config)?;
    let addr = match args.bind {
        Some(addr) => addr,
        None => config.session.rpc_socket_addr()?,
    };

    let registry = Arc::new(SessionRegistry::new(config.session.session_options()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    RpcServer::new(registry)
        .serve(listener, shutdown)
        .await
        .context("Session server error")?;
    info!("Shutdown complete");
    Ok(())
}
