//! Typed messages on the internal buses.
//!
//! Three channels tie the system together: the coordinator inbox
//! ([`CoordinatorMsg`]), the per-task inboxes ([`TaskMsg`]), and the UI
//! broadcast ([`UiEvent`]). The coordinator is the single consumer of its
//! inbox and the single writer of the authoritative state; everything else
//! talks to it through these messages.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::blocks::BlockKind;
use crate::database::FileInfo;
use crate::protocol::BlockRef;
use crate::tasks::{TaskId, TaskSummary};

/// Destination of an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    /// Every connected peer.
    All,
    Peer(SocketAddr),
}

/// Messages consumed by the coordinator event loop.
#[derive(Debug)]
pub enum CoordinatorMsg {
    /// Forward an encoded frame payload to the session sender.
    Send {
        target: SendTarget,
        payload: Vec<u8>,
    },
    /// A peer completed the TCP handshake.
    Connected { peer: SocketAddr },
    /// A peer socket closed or failed.
    Disconnected { peer: SocketAddr },
    /// A complete frame payload arrived from a peer, not yet decoded.
    Received { peer: SocketAddr, payload: Vec<u8> },
    /// User request: distribute a file across the connected peers.
    Distribute {
        file_path: PathBuf,
        block_size: u64,
        duplication: u64,
        validation: u64,
    },
    /// User request: restore `name` from the peers into `destination`.
    Restore {
        destination: PathBuf,
        name: String,
    },
    /// User request: restore-then-redistribute every known file.
    Reconstruct,
    /// Delete one file (`Some(name)`) or everything (`None`) from the
    /// peers and from the metadata store.
    Delete { name: Option<String> },
    /// Publish the running task list to the UI and the reconstruct task.
    AskTaskList,
    /// Cancel every task working on the named file.
    KillTask { name: String },
    /// Ask a peer to terminate.
    KillPeer { peer: SocketAddr },
    /// Refresh storage and disk state.
    Refresh,
    /// An error surfaced by a task; forwarded to the UI.
    Error {
        task: Option<TaskId>,
        message: String,
    },
    /// A task finished.
    TaskExit { id: TaskId, success: bool },
    /// Shut the whole server down.
    Exit,
}

/// Messages delivered into a task's private inbox.
#[derive(Debug)]
pub enum TaskMsg {
    /// Abort at the next cancellation point.
    Exit,
    /// A block of the task's file arrived from a peer (restore only).
    Block {
        peer: SocketAddr,
        kind: BlockKind,
        name: String,
        number: u64,
        content: Vec<u8>,
    },
    /// A peer reported it has sent every block of the file (restore only).
    FileSent { peer: SocketAddr },
    /// Snapshot of the running tasks (reconstruct only).
    TaskList(Vec<TaskSummary>),
}

/// Events published on the UI broadcast bus. Any front end may subscribe;
/// the core never depends on a subscriber existing.
#[derive(Debug, Clone)]
pub enum UiEvent {
    FileList(Vec<FileInfo>),
    ClientList(Vec<SocketAddr>),
    TaskList(Vec<TaskSummary>),
    DiskState {
        peer: SocketAddr,
        total: u64,
        free: u64,
    },
    StorageState {
        peer: SocketAddr,
        blocks: Vec<BlockRef>,
    },
    Error {
        task: Option<TaskId>,
        message: String,
    },
    LockUi,
    ReleaseUi,
}
