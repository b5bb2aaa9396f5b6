//! The restore engine.
//!
//! Collects every block of one file from the peers into a private staging
//! directory, validates the data blocks against the hashes in their parity
//! group's metadata block, rebuilds at most one lost block per group from
//! the XOR parity, and concatenates the validated blocks into the
//! destination file. Groups whose metadata is lost or unreadable fall back
//! to a majority vote across the surviving duplicates.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::blocks::{self, BlockKind};
use crate::crypto;
use crate::error::{MeshError, MeshResult};
use crate::messages::{CoordinatorMsg, TaskMsg};
use crate::protocol::{self, ParityBlock};
use crate::tasks::TaskId;

/// Collection stops after this long without any message from a peer.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Granularity of the inbox poll while collecting.
const POLL_TIMEOUT: Duration = Duration::from_secs(3);

/// Parameters of a restore task, fixed at spawn time.
#[derive(Debug)]
pub struct RestoreParams {
    pub id: TaskId,
    pub destination: PathBuf,
    pub name: String,
    pub block_number: u64,
    pub validation: u64,
    pub peers: Vec<SocketAddr>,
    pub key: Vec<u8>,
    /// Private staging subtree; removed on every exit path.
    pub staging: PathBuf,
}

/// What one parity group looks like after mapping the staged blocks.
#[derive(Debug, Default)]
struct GroupMap {
    metadata_path: Option<PathBuf>,
    blocks: BTreeMap<u64, Vec<PathBuf>>,
}

/// Run the restore engine to completion.
pub async fn run(
    params: RestoreParams,
    mut inbox: UnboundedReceiver<TaskMsg>,
    coordinator: UnboundedSender<CoordinatorMsg>,
) {
    info!("restore task {} started", params.id);
    let success = match restore_file(&params, &mut inbox, &coordinator).await {
        Ok(success) => success,
        Err(MeshError::Cancelled) => false,
        Err(e) => {
            error!("restore task {} failed: {}", params.id, e);
            let _ = coordinator.send(CoordinatorMsg::Error {
                task: Some(params.id),
                message: e.to_string(),
            });
            false
        }
    };
    cleanup(&params.staging);
    let _ = coordinator.send(CoordinatorMsg::TaskExit {
        id: params.id,
        success,
    });
    info!("restore task {} ended", params.id);
}

async fn restore_file(
    params: &RestoreParams,
    inbox: &mut UnboundedReceiver<TaskMsg>,
    coordinator: &UnboundedSender<CoordinatorMsg>,
) -> MeshResult<bool> {
    collect_blocks(params, inbox).await?;
    info!("finished collecting blocks of '{}'", params.name);

    let groups = map_groups(params);
    let validated = validate_groups(params, groups);

    match repair_and_assemble(params, validated) {
        Ok(()) => {
            info!("'{}' restored successfully", params.name);
            Ok(true)
        }
        Err(MeshError::Corrupted(_)) => {
            let message = format!("'{}' is corrupted, could not restore", params.name);
            error!("{}", message);
            let _ = coordinator.send(CoordinatorMsg::Error {
                task: Some(params.id),
                message,
            });
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Phase A: receive blocks until every peer reported `file_sent` or the
/// idle timer runs out. Every message resets the timer.
async fn collect_blocks(
    params: &RestoreParams,
    inbox: &mut UnboundedReceiver<TaskMsg>,
) -> MeshResult<()> {
    let mut pending: HashSet<SocketAddr> = params.peers.iter().copied().collect();
    fs::create_dir_all(&params.staging)?;
    for peer in &params.peers {
        fs::create_dir_all(params.staging.join(peer_dir(peer)))?;
    }

    let mut last_message = Instant::now();
    while !pending.is_empty() && last_message.elapsed() < IDLE_TIMEOUT {
        match timeout(POLL_TIMEOUT, inbox.recv()).await {
            Ok(Some(TaskMsg::Block {
                peer,
                kind,
                name,
                number,
                content,
            })) => {
                last_message = Instant::now();
                debug!(
                    "received {} block {} of '{}' from {}",
                    kind, number, name, peer
                );
                let dir = params.staging.join(peer_dir(&peer));
                let path = dir.join(blocks::block_file_name(&name, number, kind));
                let plain = crypto::decrypt(&params.key, &content);
                if let Err(e) = fs::create_dir_all(&dir).and_then(|_| fs::write(&path, plain)) {
                    warn!("failed to stage block {}: {}", path.display(), e);
                }
            }
            Ok(Some(TaskMsg::FileSent { peer })) => {
                last_message = Instant::now();
                pending.remove(&peer);
            }
            Ok(Some(TaskMsg::Exit)) => return Err(MeshError::Cancelled),
            Ok(Some(other)) => {
                warn!("unexpected message in restore inbox: {:?}", other);
                last_message = Instant::now();
            }
            Ok(None) => return Err(MeshError::Cancelled),
            Err(_) => debug!("waiting for blocks of '{}'...", params.name),
        }
    }
    Ok(())
}

/// Phase B: build the group map, seeding every expected group and data
/// block number even when nothing was received for them.
fn map_groups(params: &RestoreParams) -> BTreeMap<u64, GroupMap> {
    let group_count = params.block_number.div_ceil(params.validation);
    let mut mapping: BTreeMap<u64, GroupMap> = BTreeMap::new();

    for path in staged(params, None, BlockKind::Metadata) {
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        let Some(parsed) = blocks::parse_block_file_name(&file_name) else {
            continue;
        };
        mapping.entry(parsed.number).or_default().metadata_path = Some(path);
    }

    for group in 1..=group_count {
        let entry = mapping.entry(group).or_default();
        let first = (group - 1) * params.validation + 1;
        let last = (group * params.validation).min(params.block_number);
        for number in first..=last {
            entry
                .blocks
                .insert(number, staged(params, Some(number), BlockKind::Data));
        }
    }

    // drop metadata blocks beyond the expected group range
    mapping.retain(|group, _| *group >= 1 && *group <= group_count);
    mapping
}

/// Result of phase C, input of phase D.
struct Validated {
    valid_blocks: BTreeMap<u64, PathBuf>,
    missing_data: BTreeMap<u64, Vec<u64>>,
    missing_metadata: HashSet<u64>,
    groups: BTreeMap<u64, GroupMap>,
}

/// Phase C: check every candidate against the group's hash table, or fall
/// back to a majority vote when the metadata is absent or unreadable.
fn validate_groups(params: &RestoreParams, groups: BTreeMap<u64, GroupMap>) -> Validated {
    let mut valid_blocks: BTreeMap<u64, PathBuf> = BTreeMap::new();
    let mut missing_data: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
    let mut missing_metadata: HashSet<u64> = HashSet::new();
    let mut vote_warning = false;

    for (group, group_map) in &groups {
        let missing = missing_data.entry(*group).or_default();

        let metadata = group_map
            .metadata_path
            .as_deref()
            .and_then(|path| read_parity_block(path).ok());

        match metadata {
            Some(parity) => {
                for (number, candidates) in &group_map.blocks {
                    let expected = parity.hashes.get(number);
                    let matched = candidates.iter().find(|path| {
                        let Some(expected) = expected else {
                            return false;
                        };
                        match fs::read(path) {
                            Ok(content) => {
                                crypto::hash_hex(&content).eq_ignore_ascii_case(expected)
                            }
                            Err(_) => false,
                        }
                    });
                    match matched {
                        Some(path) => {
                            valid_blocks.insert(*number, path.clone());
                        }
                        None => missing.push(*number),
                    }
                }
            }
            None => {
                missing_metadata.insert(*group);
                for (number, candidates) in &group_map.blocks {
                    match majority_candidate(candidates) {
                        Some(path) => {
                            valid_blocks.insert(*number, path);
                        }
                        None => missing.push(*number),
                    }
                }
                if !vote_warning && !group_map.blocks.is_empty() {
                    warn!(
                        "metadata of group {} of '{}' unusable, some blocks accepted without validation",
                        group, params.name
                    );
                    vote_warning = true;
                }
            }
        }
    }

    debug!("valid blocks: {:?}", valid_blocks);
    debug!("missing data: {:?}", missing_data);
    debug!("missing metadata: {:?}", missing_metadata);

    Validated {
        valid_blocks,
        missing_data,
        missing_metadata,
        groups,
    }
}

/// Phases D and E: rebuild single missing blocks from parity, then write
/// the destination file. Any shortfall is reported as `Corrupted`.
fn repair_and_assemble(params: &RestoreParams, mut validated: Validated) -> MeshResult<()> {
    let corrupted = || MeshError::Corrupted(params.name.clone());

    for (group, missing) in &validated.missing_data {
        match missing.len() {
            0 => {}
            1 => {
                if validated.missing_metadata.contains(group) {
                    return Err(corrupted());
                }
                let path = validated.groups[group]
                    .metadata_path
                    .as_deref()
                    .ok_or_else(corrupted)?;
                let parity = read_parity_block(path).map_err(|_| corrupted())?;

                let missing_number = missing[0];
                let first = (group - 1) * params.validation + 1;
                let last = (group * params.validation).min(params.block_number);

                let mut restored = parity.xor.to_vec();
                for number in first..=last {
                    if number == missing_number {
                        continue;
                    }
                    let member = validated.valid_blocks.get(&number).ok_or_else(corrupted)?;
                    let content = fs::read(member).map_err(|_| corrupted())?;
                    restored = crypto::xor_pad(&restored, &content);
                }

                let expected = parity.hashes.get(&missing_number).ok_or_else(corrupted)?;
                if !crypto::hash_hex(&restored).eq_ignore_ascii_case(expected) {
                    return Err(corrupted());
                }

                let path = params.staging.join(blocks::block_file_name(
                    &params.name,
                    missing_number,
                    BlockKind::Data,
                ));
                fs::write(&path, &restored).map_err(|_| corrupted())?;
                debug!(
                    "rebuilt block {} of '{}' from group {} parity",
                    missing_number, params.name, group
                );
                validated.valid_blocks.insert(missing_number, path);
            }
            _ => return Err(corrupted()),
        }
    }

    // assembly; any missing block or I/O failure counts as corruption
    if let Some(parent) = params.destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut output = Vec::new();
    for number in 1..=params.block_number {
        let path = validated.valid_blocks.get(&number).ok_or_else(corrupted)?;
        let content = fs::read(path).map_err(|_| corrupted())?;
        output.extend_from_slice(&content);
    }
    fs::write(&params.destination, output).map_err(|_| corrupted())?;
    Ok(())
}

/// Hash-validated parity block read from a staged metadata file.
fn read_parity_block(path: &Path) -> MeshResult<ParityBlock> {
    let bytes = fs::read(path)?;
    protocol::unpack(&bytes)
}

/// The most frequent candidate content across duplicates; ties resolve to
/// the earliest candidate.
fn majority_candidate(candidates: &[PathBuf]) -> Option<PathBuf> {
    let mut counts: HashMap<Vec<u8>, (usize, usize)> = HashMap::new();
    for (index, path) in candidates.iter().enumerate() {
        let Ok(content) = fs::read(path) else {
            continue;
        };
        counts.entry(content).or_insert((0, index)).0 += 1;
    }
    let (_, index) = counts
        .values()
        .max_by_key(|(count, index)| (*count, std::cmp::Reverse(*index)))
        .copied()?;
    Some(candidates[index].clone())
}

/// All staged block files of this task's file matching the given number
/// and kind, across every peer directory.
fn staged(params: &RestoreParams, number: Option<u64>, kind: BlockKind) -> Vec<PathBuf> {
    let pattern = params
        .staging
        .join("*")
        .join(blocks::block_file_pattern(
            Some(&params.name),
            number,
            Some(kind),
        ))
        .to_string_lossy()
        .to_string();
    match glob::glob(&pattern) {
        Ok(paths) => {
            let mut found: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
            found.sort();
            found
        }
        Err(e) => {
            warn!("bad staging pattern {}: {}", pattern, e);
            Vec::new()
        }
    }
}

fn peer_dir(peer: &SocketAddr) -> String {
    peer.to_string().replace(':', "_")
}

fn cleanup(staging: &Path) {
    if let Err(e) = fs::remove_dir_all(staging) {
        if staging.exists() {
            warn!("failed to remove staging dir {}: {}", staging.display(), e);
        }
    }
}
