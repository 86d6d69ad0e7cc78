mod files;
mod peer;
mod probe;
mod runner;
mod stats;
mod ws;


use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::Router;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, info};

use crate::args::ServerArgs;
use crate::error::{AppError, AppResult, RunnerError};

use runner::Registry;
use stats::SystemStats;

const SOCKET_BUFFER_BYTES: u32 = 8 * 1024 * 1024;
const LISTEN_BACKLOG: u32 = 1024;

/// Everything an agent shares across connections: its identity, the result
/// file store, the live-test registry and the kernel stats sampler.
pub(crate) struct AgentState {
    bind_address: String,
    real_ip: Option<String>,
    base_path: PathBuf,
    registry: Registry,
    system: Arc<SystemStats>,
}

impl AgentState {
    pub(crate) fn new(
        bind_address: String,
        real_ip: Option<String>,
        base_path: PathBuf,
    ) -> Arc<Self> {
        Arc::new(AgentState {
            bind_address,
            real_ip,
            base_path,
            registry: Registry::default(),
            system: Arc::new(SystemStats::default()),
        })
    }
}

/// Run the agent: one port serves the data endpoints and the control socket.
pub async fn run_agent(args: &ServerArgs) -> AppResult<()> {
    let storage = match args.storage_path.clone() {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let base_path = files::ensure_base_path(&storage).await?;
    debug!("Storage path: {}", base_path.display());

    let state = AgentState::new(args.address.clone(), args.real_ip.clone(), base_path);
    stats::spawn_sampler(Arc::clone(&state.system));

    let listener = bind_listener(&args.address)?;
    info!("Starting hperf agent on {}", args.address);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub(crate) fn router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/ws/{host}", get(control_upgrade))
        .route("/latency", put(latency_handler))
        .route("/bandwidth", put(bandwidth_handler))
        // Probe payloads are operator-sized; the transport imposes no cap.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Listener tuned the way the probes expect: address/port reuse and large
/// socket buffers where the platform allows them.
pub(crate) fn bind_listener(address: &str) -> AppResult<TcpListener> {
    let addr: SocketAddr = address.parse().map_err(|err| {
        AppError::runner(RunnerError::BindAddr {
            addr: address.to_owned(),
            source: err,
        })
    })?;
    let bind_err = |err: std::io::Error| {
        AppError::runner(RunnerError::Bind {
            addr: address.to_owned(),
            source: err,
        })
    };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;
    socket.set_reuseaddr(true).map_err(bind_err)?;
    #[cfg(unix)]
    socket.set_reuseport(true).map_err(bind_err)?;
    socket.set_nodelay(true).map_err(bind_err)?;
    socket.set_keepalive(true).map_err(bind_err)?;
    // Advisory on platforms that clamp or reject large buffers.
    drop(socket.set_send_buffer_size(SOCKET_BUFFER_BYTES));
    drop(socket.set_recv_buffer_size(SOCKET_BUFFER_BYTES));
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)
}

async fn shutdown_signal() {
    drop(tokio::signal::ctrl_c().await);
    info!("Shutdown signal received");
}

async fn control_upgrade(
    upgrade: WebSocketUpgrade,
    Path(host): Path<String>,
    State(state): State<Arc<AgentState>>,
) -> impl IntoResponse {
    debug!("Control connection for {}", host);
    upgrade.on_upgrade(move |socket| ws::handle_control_socket(socket, state))
}

async fn latency_handler(body: axum::body::Bytes) -> StatusCode {
    drop(body);
    StatusCode::OK
}

async fn bandwidth_handler(body: axum::body::Body) -> StatusCode {
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        if chunk.is_err() {
            break;
        }
    }
    StatusCode::OK
}
