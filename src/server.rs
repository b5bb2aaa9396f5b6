//! Server wiring: binds the listener, spawns the session workers and the
//! coordinator, and hands out a [`ServerHandle`] for driving the system.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Coordinator;
use crate::error::MeshResult;
use crate::messages::{CoordinatorMsg, UiEvent};
use crate::session;

/// Capacity of the UI broadcast bus; slow subscribers lag, they never
/// block the coordinator.
const UI_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub temp_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 2048,
            db_path: PathBuf::from("files.db"),
            temp_dir: PathBuf::from("temp"),
        }
    }
}

/// A running server. Dropping the handle does not stop it; send
/// [`CoordinatorMsg::Exit`] or call [`ServerHandle::shutdown`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    coordinator: UnboundedSender<CoordinatorMsg>,
    ui: broadcast::Sender<UiEvent>,
    coordinator_join: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sender for driving the coordinator, e.g. from a front end.
    pub fn sender(&self) -> UnboundedSender<CoordinatorMsg> {
        self.coordinator.clone()
    }

    /// Subscribe to the UI event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.ui.subscribe()
    }

    /// Block until the coordinator loop ends.
    pub async fn wait(self) {
        let _ = self.coordinator_join.await;
    }

    /// Request shutdown and wait for it.
    pub async fn shutdown(self) {
        let _ = self.coordinator.send(CoordinatorMsg::Exit);
        let _ = self.coordinator_join.await;
    }
}

/// Bind the listening socket and start all long-lived workers.
pub async fn start(config: ServerConfig) -> MeshResult<ServerHandle> {
    std::fs::create_dir_all(&config.temp_dir)?;

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    let local_addr = listener.local_addr()?;

    let (coord_tx, coord_rx) = mpsc::unbounded_channel();
    let (session_tx, session_rx) = mpsc::unbounded_channel();
    let (ui_tx, _) = broadcast::channel(UI_BUS_CAPACITY);
    let shutdown = CancellationToken::new();

    tokio::spawn(session::run_sender(session_rx, coord_tx.clone()));
    tokio::spawn(session::run_acceptor(
        listener,
        session_tx.clone(),
        coord_tx.clone(),
        shutdown.clone(),
    ));

    let coordinator = Coordinator::new(
        coord_rx,
        coord_tx.clone(),
        session_tx,
        ui_tx.clone(),
        shutdown,
        config.db_path,
        config.temp_dir,
    );
    let coordinator_join = tokio::spawn(coordinator.run());

    Ok(ServerHandle {
        local_addr,
        coordinator: coord_tx,
        ui: ui_tx,
        coordinator_join,
    })
}
