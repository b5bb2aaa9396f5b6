//! The distribute engine.
//!
//! Splits a file into fixed-size blocks, encrypts each one, and scatters
//! them round-robin over the connected peers with the requested
//! duplication. Every `validation` data blocks a metadata block is emitted
//! carrying the SHA-256 of each member and the XOR parity of the group, so
//! a restore can detect corruption and rebuild one lost block per group.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde_bytes::ByteBuf;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

use crate::blocks::BlockKind;
use crate::crypto;
use crate::error::MeshResult;
use crate::messages::{CoordinatorMsg, SendTarget, TaskMsg};
use crate::protocol::{self, ParityBlock, WireMessage};
use crate::tasks::TaskId;

/// Accumulates one parity group: the running XOR of the member blocks and
/// the hash of each member.
#[derive(Debug, Default)]
pub struct Parity {
    xor: Vec<u8>,
    hashes: BTreeMap<u64, String>,
}

impl Parity {
    pub fn new() -> Self {
        Parity::default()
    }

    /// Fold a data block into the group.
    pub fn update(&mut self, number: u64, content: &[u8]) {
        self.xor = crypto::xor_pad(&self.xor, content);
        self.hashes.insert(number, crypto::hash_hex(content));
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Serialized metadata block body for the accumulated group.
    pub fn payload(&self) -> MeshResult<Vec<u8>> {
        let block = ParityBlock {
            hashes: self.hashes.clone(),
            xor: ByteBuf::from(self.xor.clone()),
        };
        protocol::pack(&block)
    }

    pub fn reset(&mut self) {
        self.xor.clear();
        self.hashes.clear();
    }
}

/// Parameters of a distribute task, fixed at spawn time.
#[derive(Debug)]
pub struct DistributeParams {
    pub id: TaskId,
    pub file_path: PathBuf,
    pub block_size: u64,
    pub duplication: u64,
    pub validation: u64,
    pub peers: Vec<SocketAddr>,
    pub key: Vec<u8>,
}

/// Run the distribute engine to completion.
///
/// The engine owns no authoritative state: block frames and the final
/// `TaskExit` travel through the coordinator, which persists the file
/// record only on success.
pub async fn run(
    params: DistributeParams,
    mut inbox: UnboundedReceiver<TaskMsg>,
    coordinator: UnboundedSender<CoordinatorMsg>,
) {
    info!("distribute task {} started", params.id);
    let success = match distribute_file(&params, &mut inbox, &coordinator).await {
        Ok(success) => success,
        Err(e) => {
            error!("distribute task {} failed: {}", params.id, e);
            let _ = coordinator.send(CoordinatorMsg::Error {
                task: Some(params.id),
                message: e.to_string(),
            });
            false
        }
    };
    let _ = coordinator.send(CoordinatorMsg::TaskExit {
        id: params.id,
        success,
    });
    info!("distribute task {} ended", params.id);
}

async fn distribute_file(
    params: &DistributeParams,
    inbox: &mut UnboundedReceiver<TaskMsg>,
    coordinator: &UnboundedSender<CoordinatorMsg>,
) -> MeshResult<bool> {
    let name = file_name(&params.file_path);

    if !params.file_path.exists() {
        error!("'{}' does not exist, distribution failed", name);
        let _ = coordinator.send(CoordinatorMsg::Error {
            task: Some(params.id),
            message: format!(
                "file '{}' doesn't exist, distribution failed",
                params.file_path.display()
            ),
        });
        return Ok(false);
    }

    if params.peers.is_empty() {
        let _ = coordinator.send(CoordinatorMsg::Error {
            task: Some(params.id),
            message: format!("no connected peers, cannot distribute '{}'", name),
        });
        return Ok(false);
    }

    let file_size = tokio::fs::metadata(&params.file_path).await?.len();
    let mut file = File::open(&params.file_path).await?;
    info!("distributing '{}' ({} bytes)", name, file_size);

    let peer_count = params.peers.len() as u64;
    let mut data_cursor: u64 = 0;
    let mut meta_cursor: u64 = 0;
    let mut parity = Parity::new();
    let mut number: u64 = 0;
    let mut group: u64 = 0;

    loop {
        // cancellation point, once per block
        match inbox.try_recv() {
            Ok(TaskMsg::Exit) => {
                info!("distribute task {} cancelled", params.id);
                return Ok(false);
            }
            Ok(_) | Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return Ok(false),
        }

        let content = read_chunk(&mut file, params.block_size as usize).await?;
        if content.is_empty() {
            break;
        }
        number += 1;

        debug!("adding block {} to parity group {}", number, group + 1);
        parity.update(number, &content);

        let encrypted = crypto::encrypt(&params.key, &content);
        for _ in 0..params.duplication {
            let peer = params.peers[(data_cursor % peer_count) as usize];
            send_block(coordinator, peer, BlockKind::Data, &name, number, encrypted.clone())?;
            data_cursor += 1;
        }

        if number % params.validation == 0 {
            group += 1;
            let peer = params.peers[(meta_cursor % peer_count) as usize];
            let payload = crypto::encrypt(&params.key, &parity.payload()?);
            send_block(coordinator, peer, BlockKind::Metadata, &name, group, payload)?;
            parity.reset();
            meta_cursor += 1;
        }
    }

    // trailing partial group
    if file_size % params.block_size != 0 {
        group += 1;
        let peer = params.peers[(meta_cursor % peer_count) as usize];
        let payload = crypto::encrypt(&params.key, &parity.payload()?);
        send_block(coordinator, peer, BlockKind::Metadata, &name, group, payload)?;
    }

    info!("'{}' distributed as {} blocks", name, number);
    Ok(true)
}

fn send_block(
    coordinator: &UnboundedSender<CoordinatorMsg>,
    peer: SocketAddr,
    kind: BlockKind,
    name: &str,
    number: u64,
    content: Vec<u8>,
) -> MeshResult<()> {
    debug!("{} block {} of '{}' sent to {}", kind, number, name, peer);
    let message = WireMessage::SendBlock {
        block_type: kind,
        name: name.to_string(),
        number,
        content: ByteBuf::from(content),
    };
    let payload = protocol::pack(&message)?;
    let _ = coordinator.send(CoordinatorMsg::Send {
        target: SendTarget::Peer(peer),
        payload,
    });
    Ok(())
}

/// Read up to `block_size` bytes, short only at end of file.
async fn read_chunk(file: &mut File, block_size: usize) -> std::io::Result<Vec<u8>> {
    let mut chunk = vec![0u8; block_size];
    let mut filled = 0;
    while filled < block_size {
        let n = file.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    chunk.truncate(filled);
    Ok(chunk)
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_accumulator() {
        let mut parity = Parity::new();
        assert!(parity.is_empty());

        parity.update(1, b"abcd");
        parity.update(2, b"xy");
        assert!(!parity.is_empty());

        let payload = parity.payload().unwrap();
        let block: ParityBlock = protocol::unpack(&payload).unwrap();
        assert_eq!(block.hashes.len(), 2);
        assert_eq!(block.hashes[&1], crypto::hash_hex(b"abcd"));
        assert_eq!(block.hashes[&2], crypto::hash_hex(b"xy"));
        assert_eq!(
            block.xor.as_ref(),
            crypto::xor_pad(b"abcd", b"xy").as_slice()
        );

        parity.reset();
        assert!(parity.is_empty());
    }
}
