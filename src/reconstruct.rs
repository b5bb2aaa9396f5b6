//! The reconstruct engine.
//!
//! Restores every known file into a temporary directory, wipes the storage
//! and the metadata store, and redistributes whatever restored cleanly.
//! Corrupted files leave no restored copy behind and are therefore dropped.
//! The coordinator locks the UI for the duration.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::database::FileRecord;
use crate::error::{MeshError, MeshResult};
use crate::messages::{CoordinatorMsg, TaskMsg};
use crate::tasks::{TaskId, TaskKind};

/// How often the coordinator is polled for the running task list.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parameters of a reconstruct task, fixed at spawn time.
#[derive(Debug)]
pub struct ReconstructParams {
    pub id: TaskId,
    pub records: Vec<FileRecord>,
    pub temp: PathBuf,
}

/// Run the reconstruct engine to completion.
pub async fn run(
    params: ReconstructParams,
    mut inbox: UnboundedReceiver<TaskMsg>,
    coordinator: UnboundedSender<CoordinatorMsg>,
) {
    info!("reconstruct task {} started", params.id);
    let success = match reconstruct(&params, &mut inbox, &coordinator).await {
        Ok(()) => true,
        Err(MeshError::Cancelled) => false,
        Err(e) => {
            error!("reconstruct task {} failed: {}", params.id, e);
            let _ = coordinator.send(CoordinatorMsg::Error {
                task: Some(params.id),
                message: e.to_string(),
            });
            false
        }
    };
    if !success {
        // failed or cancelled runs must not leak restored copies
        let _ = fs::remove_dir_all(params.temp.join("reconstruct"));
    }
    let _ = coordinator.send(CoordinatorMsg::TaskExit {
        id: params.id,
        success,
    });
    info!("reconstruct task {} ended", params.id);
}

async fn reconstruct(
    params: &ReconstructParams,
    inbox: &mut UnboundedReceiver<TaskMsg>,
    coordinator: &UnboundedSender<CoordinatorMsg>,
) -> MeshResult<()> {
    let reconstruct_dir = params.temp.join("reconstruct");
    fs::create_dir_all(&reconstruct_dir)?;

    // restore every known file into the temporary directory
    for record in &params.records {
        let _ = coordinator.send(CoordinatorMsg::Restore {
            destination: reconstruct_dir.join(&record.name),
            name: record.name.clone(),
        });
    }
    info!("started restoring {} files", params.records.len());
    wait_until_done(params.id, inbox, coordinator, TaskKind::Restore).await?;
    info!("all files restored");

    // wipe the storage and the metadata store
    let _ = coordinator.send(CoordinatorMsg::Delete { name: None });
    info!("all files deleted from storage");

    // corrupted restores left no file behind; drop their records
    let survivors: Vec<&FileRecord> = params
        .records
        .iter()
        .filter(|record| reconstruct_dir.join(&record.name).exists())
        .collect();
    if survivors.len() < params.records.len() {
        warn!(
            "{} of {} files could not be restored and are dropped",
            params.records.len() - survivors.len(),
            params.records.len()
        );
    }

    // redistribute the survivors with their original parameters
    for record in &survivors {
        let block_size = if record.block_number == 0 {
            1
        } else {
            record.file_size.div_ceil(record.block_number)
        };
        let _ = coordinator.send(CoordinatorMsg::Distribute {
            file_path: reconstruct_dir.join(&record.name),
            block_size,
            duplication: record.duplication_level,
            validation: record.validation_level,
        });
    }
    info!("started redistributing {} files", survivors.len());
    wait_until_done(params.id, inbox, coordinator, TaskKind::Distribute).await?;
    info!("all files redistributed");

    for record in &survivors {
        if let Err(e) = fs::remove_file(reconstruct_dir.join(&record.name)) {
            warn!("failed to remove restored copy of '{}': {}", record.name, e);
        }
    }
    let _ = fs::remove_dir(&reconstruct_dir);

    Ok(())
}

/// Poll the coordinator until no task of `kind` remains. Cancellation is
/// honored between polls.
async fn wait_until_done(
    id: TaskId,
    inbox: &mut UnboundedReceiver<TaskMsg>,
    coordinator: &UnboundedSender<CoordinatorMsg>,
    kind: TaskKind,
) -> MeshResult<()> {
    loop {
        let _ = coordinator.send(CoordinatorMsg::AskTaskList);
        match timeout(POLL_INTERVAL, inbox.recv()).await {
            Ok(Some(TaskMsg::TaskList(tasks))) => {
                if !tasks.iter().any(|task| task.kind == kind && task.id != id) {
                    return Ok(());
                }
            }
            Ok(Some(TaskMsg::Exit)) => return Err(MeshError::Cancelled),
            Ok(Some(_)) => {}
            Ok(None) => return Err(MeshError::Cancelled),
            Err(_) => {}
        }
    }
}
