//! The table of running distribute / restore / reconstruct tasks.
//!
//! Owned exclusively by the coordinator. Each entry keeps the task's sizing
//! parameters, its file key, and the sending side of its private inbox.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::messages::TaskMsg;

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Distribute,
    Restore,
    Reconstruct,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Distribute => "distribute",
            TaskKind::Restore => "restore",
            TaskKind::Reconstruct => "reconstruct",
        };
        f.write_str(s)
    }
}

/// The externally visible view of a running task. Carries neither the file
/// key nor the inbox.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub id: TaskId,
    pub kind: TaskKind,
    pub name: String,
    pub file_size: u64,
    pub block_number: u64,
    pub duplication: u64,
    pub validation: u64,
}

/// A running task as tracked by the coordinator.
#[derive(Debug)]
pub struct TaskEntry {
    pub kind: TaskKind,
    pub name: String,
    pub file_size: u64,
    pub block_number: u64,
    pub duplication: u64,
    pub validation: u64,
    pub key: Vec<u8>,
    pub inbox: UnboundedSender<TaskMsg>,
}

impl TaskEntry {
    fn summary(&self, id: TaskId) -> TaskSummary {
        TaskSummary {
            id,
            kind: self.kind,
            name: self.name.clone(),
            file_size: self.file_size,
            block_number: self.block_number,
            duplication: self.duplication,
            validation: self.validation,
        }
    }
}

/// Task table with coordinator-assigned identifiers.
#[derive(Debug, Default)]
pub struct TaskTable {
    next_id: TaskId,
    entries: HashMap<TaskId, TaskEntry>,
}

impl TaskTable {
    pub fn new() -> Self {
        TaskTable::default()
    }

    /// Reserve the identifier for a task about to be spawned.
    pub fn allocate_id(&mut self) -> TaskId {
        self.next_id += 1;
        self.next_id
    }

    pub fn insert(&mut self, id: TaskId, entry: TaskEntry) {
        debug!("registered {} task {} for '{}'", entry.kind, id, entry.name);
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: TaskId) -> Option<TaskEntry> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskEntry> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &TaskEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot for the UI and for a polling reconstruct task.
    pub fn summaries(&self) -> Vec<TaskSummary> {
        let mut list: Vec<TaskSummary> = self
            .entries
            .iter()
            .map(|(id, entry)| entry.summary(*id))
            .collect();
        list.sort_by_key(|summary| summary.id);
        list
    }
}
