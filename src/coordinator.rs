//! The coordinator: a single-consumer event loop that owns the peer set,
//! the task table, and the metadata store handle.
//!
//! Every other worker addresses it through typed messages; nothing else
//! writes the authoritative state. Effects leave through two doors only:
//! frames to the session sender and events on the UI broadcast bus.

use std::net::SocketAddr;
use std::path::PathBuf;

use rand::RngCore;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blocks::WILDCARD;
use crate::database::{FileInfo, FileRecord, MetaStore};
use crate::distribute::{self, DistributeParams};
use crate::error::MeshResult;
use crate::messages::{CoordinatorMsg, SendTarget, TaskMsg, UiEvent};
use crate::protocol::{self, KindSel, NumberSel, WireMessage};
use crate::reconstruct::{self, ReconstructParams};
use crate::restore::{self, RestoreParams};
use crate::session::SessionCommand;
use crate::tasks::{TaskEntry, TaskId, TaskKind, TaskTable};

pub struct Coordinator {
    inbox: UnboundedReceiver<CoordinatorMsg>,
    /// Handed to spawned tasks so their events come back through the inbox.
    self_tx: UnboundedSender<CoordinatorMsg>,
    session: UnboundedSender<SessionCommand>,
    ui: broadcast::Sender<UiEvent>,
    shutdown: CancellationToken,
    peers: Vec<SocketAddr>,
    tasks: TaskTable,
    reconstruct_id: Option<TaskId>,
    db_path: PathBuf,
    temp_dir: PathBuf,
    running: bool,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inbox: UnboundedReceiver<CoordinatorMsg>,
        self_tx: UnboundedSender<CoordinatorMsg>,
        session: UnboundedSender<SessionCommand>,
        ui: broadcast::Sender<UiEvent>,
        shutdown: CancellationToken,
        db_path: PathBuf,
        temp_dir: PathBuf,
    ) -> Self {
        Coordinator {
            inbox,
            self_tx,
            session,
            ui,
            shutdown,
            peers: Vec::new(),
            tasks: TaskTable::new(),
            reconstruct_id: None,
            db_path,
            temp_dir,
            running: true,
        }
    }

    /// Event loop. Consumes the coordinator until `Exit`.
    pub async fn run(mut self) {
        info!("coordinator started");
        self.update_client_state();
        while self.running {
            match self.inbox.recv().await {
                Some(message) => self.handle(message),
                None => break,
            }
        }
        info!("coordinator ended");
    }

    fn handle(&mut self, message: CoordinatorMsg) {
        match message {
            CoordinatorMsg::Send { target, payload } => self.forward(target, payload),
            CoordinatorMsg::Connected { peer } => self.connected(peer),
            CoordinatorMsg::Disconnected { peer } => self.disconnected(peer),
            CoordinatorMsg::Received { peer, payload } => self.received(peer, payload),
            CoordinatorMsg::Distribute {
                file_path,
                block_size,
                duplication,
                validation,
            } => self.distribute(file_path, block_size, duplication, validation),
            CoordinatorMsg::Restore { destination, name } => self.restore(destination, name),
            CoordinatorMsg::Reconstruct => self.reconstruct(),
            CoordinatorMsg::Delete { name } => self.delete(name),
            CoordinatorMsg::AskTaskList => self.publish_task_list(),
            CoordinatorMsg::KillTask { name } => self.kill_task(&name),
            CoordinatorMsg::KillPeer { peer } => self.kill_peer(peer),
            CoordinatorMsg::Refresh => self.update_storage_state(),
            CoordinatorMsg::Error { task, message } => {
                let _ = self.ui.send(UiEvent::Error { task, message });
            }
            CoordinatorMsg::TaskExit { id, success } => self.task_exit(id, success),
            CoordinatorMsg::Exit => self.exit(),
        }
    }

    fn store(&self) -> MeshResult<MetaStore> {
        MetaStore::open(&self.db_path)
    }

    fn forward(&self, target: SendTarget, payload: Vec<u8>) {
        let _ = self.session.send(SessionCommand::Send { target, payload });
    }

    /// Encode and send one message, to one peer or to all of them.
    fn send_message(&self, target: SendTarget, message: &WireMessage) {
        match protocol::pack(message) {
            Ok(payload) => self.forward(target, payload),
            Err(e) => warn!("failed to encode outbound message: {}", e),
        }
    }

    fn surface_error(&self, task: Option<TaskId>, message: String) {
        let _ = self.ui.send(UiEvent::Error { task, message });
    }

    fn connected(&mut self, peer: SocketAddr) {
        info!("new peer: {}", peer);
        self.peers.push(peer);
        self.update_client_state();
    }

    fn disconnected(&mut self, peer: SocketAddr) {
        info!("peer disconnected: {}", peer);
        self.peers.retain(|p| *p != peer);

        // running distributions cannot complete safely without the peer
        let mut failed_files = Vec::new();
        for (_, entry) in self.tasks.iter() {
            if entry.kind == TaskKind::Distribute {
                let _ = entry.inbox.send(TaskMsg::Exit);
                failed_files.push(entry.name.clone());
            }
        }
        if !failed_files.is_empty() {
            self.surface_error(
                None,
                format!("failed distributing files: {}", failed_files.join(", ")),
            );
        }

        self.update_client_state();
    }

    fn received(&mut self, peer: SocketAddr, payload: Vec<u8>) {
        let message: WireMessage = match protocol::unpack(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("received malformed message from {}: {}", peer, e);
                return;
            }
        };
        debug!("received message of type {} from {}", message.kind(), peer);

        match message {
            WireMessage::Block {
                block_type,
                name,
                number,
                content,
            } => {
                for (_, entry) in self.tasks.iter() {
                    if entry.kind == TaskKind::Restore && entry.name == name {
                        let _ = entry.inbox.send(TaskMsg::Block {
                            peer,
                            kind: block_type,
                            name: name.clone(),
                            number,
                            content: content.clone().into_vec(),
                        });
                    }
                }
            }
            WireMessage::FileSent { name } => {
                for (_, entry) in self.tasks.iter() {
                    if entry.kind == TaskKind::Restore && entry.name == name {
                        let _ = entry.inbox.send(TaskMsg::FileSent { peer });
                    }
                }
            }
            WireMessage::DiskState { total, free } => {
                let _ = self.ui.send(UiEvent::DiskState { peer, total, free });
            }
            WireMessage::StorageState { blocks } => {
                let _ = self.ui.send(UiEvent::StorageState { peer, blocks });
            }
            other => {
                warn!(
                    "unexpected message type {} from {}, not processed",
                    other.kind(),
                    peer
                );
            }
        }
    }

    fn distribute(&mut self, file_path: PathBuf, block_size: u64, duplication: u64, validation: u64) {
        let name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.display().to_string());

        if self.peers.is_empty() {
            self.surface_error(None, format!("no connected peers, cannot distribute '{}'", name));
            return;
        }
        if block_size == 0 || duplication == 0 || validation == 0 {
            self.surface_error(
                None,
                format!("invalid distribution parameters for '{}'", name),
            );
            return;
        }

        // a name may exist in the storage only once
        match self.store().and_then(|store| store.query(&name)) {
            Ok(None) => {}
            Ok(Some(_)) => {
                self.surface_error(None, format!("file '{}' is already distributed", name));
                return;
            }
            Err(e) => {
                self.surface_error(None, e.to_string());
                return;
            }
        }

        let file_size = std::fs::metadata(&file_path).map(|m| m.len()).unwrap_or(0);
        let block_number = file_size.div_ceil(block_size);

        let mut key = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut key);

        let id = self.tasks.allocate_id();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let params = DistributeParams {
            id,
            file_path,
            block_size,
            duplication,
            validation,
            peers: self.peers.clone(),
            key: key.clone(),
        };
        tokio::spawn(distribute::run(params, task_rx, self.self_tx.clone()));

        self.tasks.insert(
            id,
            TaskEntry {
                kind: TaskKind::Distribute,
                name,
                file_size,
                block_number,
                duplication,
                validation,
                key,
                inbox: task_tx,
            },
        );
        self.publish_task_list();
    }

    fn restore(&mut self, destination: PathBuf, name: String) {
        let record = match self.store().and_then(|store| store.query(&name)) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.surface_error(None, format!("no file '{}' in the storage", name));
                return;
            }
            Err(e) => {
                self.surface_error(None, e.to_string());
                return;
            }
        };

        let id = self.tasks.allocate_id();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let params = RestoreParams {
            id,
            destination,
            name: name.clone(),
            block_number: record.block_number,
            validation: record.validation_level,
            peers: self.peers.clone(),
            key: record.key.clone(),
            staging: self.temp_dir.join(format!("restore-{}", id)),
        };
        tokio::spawn(restore::run(params, task_rx, self.self_tx.clone()));

        self.tasks.insert(
            id,
            TaskEntry {
                kind: TaskKind::Restore,
                name: name.clone(),
                file_size: record.file_size,
                block_number: record.block_number,
                duplication: record.duplication_level,
                validation: record.validation_level,
                key: record.key,
                inbox: task_tx,
            },
        );

        // ask every peer for the blocks of the file
        self.send_message(
            SendTarget::All,
            &WireMessage::AskBlock {
                block_type: KindSel::any(),
                name,
                number: NumberSel::any(),
            },
        );
        self.publish_task_list();
    }

    fn reconstruct(&mut self) {
        if self.reconstruct_id.is_some() {
            self.surface_error(None, "a reconstruction is already running".to_string());
            return;
        }
        let records = match self.store().and_then(|store| store.query_all()) {
            Ok(records) => records,
            Err(e) => {
                self.surface_error(None, e.to_string());
                return;
            }
        };

        let id = self.tasks.allocate_id();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let params = ReconstructParams {
            id,
            records,
            temp: self.temp_dir.clone(),
        };
        tokio::spawn(reconstruct::run(params, task_rx, self.self_tx.clone()));

        self.tasks.insert(
            id,
            TaskEntry {
                kind: TaskKind::Reconstruct,
                name: String::new(),
                file_size: 0,
                block_number: 0,
                duplication: 0,
                validation: 0,
                key: Vec::new(),
                inbox: task_tx,
            },
        );
        self.reconstruct_id = Some(id);

        // keep user-initiated tasks out of the way while rebuilding
        let _ = self.ui.send(UiEvent::LockUi);
        self.publish_task_list();
    }

    fn delete(&mut self, name: Option<String>) {
        let wire_name = name.clone().unwrap_or_else(|| WILDCARD.to_string());
        self.send_message(
            SendTarget::All,
            &WireMessage::DeleteBlock {
                block_type: KindSel::any(),
                name: wire_name,
                number: NumberSel::any(),
            },
        );

        let result = self.store().and_then(|store| match &name {
            Some(name) => store.delete(name),
            None => store.delete_all(),
        });
        if let Err(e) = result {
            self.surface_error(None, e.to_string());
        }

        self.update_storage_state();
    }

    fn task_exit(&mut self, id: TaskId, success: bool) {
        if let Some(entry) = self.tasks.remove(id) {
            if entry.kind == TaskKind::Distribute {
                if success {
                    let record = FileRecord {
                        name: entry.name.clone(),
                        file_size: entry.file_size,
                        block_number: entry.block_number,
                        duplication_level: entry.duplication,
                        validation_level: entry.validation,
                        key: entry.key.clone(),
                    };
                    if let Err(e) = self.store().and_then(|store| store.insert(&record)) {
                        self.surface_error(None, e.to_string());
                    }
                } else {
                    // purge whatever was partially scattered
                    self.delete(Some(entry.name.clone()));
                }
            }
        }

        if self.reconstruct_id == Some(id) {
            self.reconstruct_id = None;
            let _ = self.ui.send(UiEvent::ReleaseUi);
        }

        self.update_storage_state();
        self.publish_task_list();
    }

    fn kill_task(&self, name: &str) {
        for (_, entry) in self.tasks.iter() {
            if entry.name == name {
                let _ = entry.inbox.send(TaskMsg::Exit);
            }
        }
    }

    fn kill_peer(&self, peer: SocketAddr) {
        self.send_message(SendTarget::Peer(peer), &WireMessage::Kill);
    }

    fn exit(&mut self) {
        info!("shutting down the system");
        self.running = false;
        for (_, entry) in self.tasks.iter() {
            let _ = entry.inbox.send(TaskMsg::Exit);
        }
        let _ = self.session.send(SessionCommand::Shutdown);
        self.shutdown.cancel();
    }

    /// Publish the file list and ask every peer to report its storage and
    /// disk state; the answers come back as `Received` messages.
    fn update_storage_state(&self) {
        match self.store().and_then(|store| store.query_all()) {
            Ok(records) => {
                let files: Vec<FileInfo> = records.iter().map(FileInfo::from).collect();
                let _ = self.ui.send(UiEvent::FileList(files));
            }
            Err(e) => warn!("failed to read the metadata store: {}", e),
        }
        self.send_message(SendTarget::All, &WireMessage::AskStorageState);
        self.send_message(SendTarget::All, &WireMessage::AskDiskState);
    }

    fn update_client_state(&self) {
        let _ = self.ui.send(UiEvent::ClientList(self.peers.clone()));
        self.update_storage_state();
    }

    fn publish_task_list(&self) {
        let summaries = self.tasks.summaries();
        if let Some(id) = self.reconstruct_id {
            if let Some(entry) = self.tasks.get(id) {
                let _ = entry.inbox.send(TaskMsg::TaskList(summaries.clone()));
            }
        }
        let _ = self.ui.send(UiEvent::TaskList(summaries));
    }
}
