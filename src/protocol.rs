//! Wire protocol between the server and its storage peers.
//!
//! Every message travels as a frame: a 4-byte big-endian length followed by
//! that many bytes of payload. The payload is a msgpack map carrying a
//! `type` tag, compressed with zlib. Framing is handled by
//! [`tokio_util::codec::LengthDelimitedCodec`]; [`pack`] and [`unpack`]
//! handle the payload layer and are also used for the metadata block body.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use tokio_util::codec::LengthDelimitedCodec;

use crate::blocks::{BlockKind, WILDCARD};
use crate::error::{MeshError, MeshResult};

/// Upper bound on a single frame; a block plus envelope always fits.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Selector for the block number in queries: a concrete number or `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberSel {
    Exact(u64),
    Pattern(String),
}

impl NumberSel {
    pub fn any() -> Self {
        NumberSel::Pattern(WILDCARD.to_string())
    }

    pub fn exact(&self) -> Option<u64> {
        match self {
            NumberSel::Exact(n) => Some(*n),
            NumberSel::Pattern(_) => None,
        }
    }
}

/// Selector for the block kind in queries: a concrete kind or `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KindSel {
    Exact(BlockKind),
    Pattern(String),
}

impl KindSel {
    pub fn any() -> Self {
        KindSel::Pattern(WILDCARD.to_string())
    }

    pub fn exact(&self) -> Option<BlockKind> {
        match self {
            KindSel::Exact(k) => Some(*k),
            KindSel::Pattern(_) => None,
        }
    }
}

/// One entry of a peer's block inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub name: String,
    pub number: u64,
    pub block_type: BlockKind,
}

/// Every message exchanged between server and peer. The serialized form is
/// a map with a string `type` discriminant, so unknown or missing tags fail
/// decoding rather than dispatching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    // server -> peer
    SendBlock {
        block_type: BlockKind,
        name: String,
        number: u64,
        content: ByteBuf,
    },
    AskBlock {
        block_type: KindSel,
        name: String,
        number: NumberSel,
    },
    DeleteBlock {
        block_type: KindSel,
        name: String,
        number: NumberSel,
    },
    AskDiskState,
    AskStorageState,
    Kill,

    // peer -> server
    Block {
        block_type: BlockKind,
        name: String,
        number: u64,
        content: ByteBuf,
    },
    FileSent {
        name: String,
    },
    DiskState {
        total: u64,
        free: u64,
    },
    StorageState {
        blocks: Vec<BlockRef>,
    },
}

impl WireMessage {
    /// The wire `type` tag, for logging without dumping block contents.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::SendBlock { .. } => "send_block",
            WireMessage::AskBlock { .. } => "ask_block",
            WireMessage::DeleteBlock { .. } => "delete_block",
            WireMessage::AskDiskState => "ask_disk_state",
            WireMessage::AskStorageState => "ask_storage_state",
            WireMessage::Kill => "kill",
            WireMessage::Block { .. } => "block",
            WireMessage::FileSent { .. } => "file_sent",
            WireMessage::DiskState { .. } => "disk_state",
            WireMessage::StorageState { .. } => "storage_state",
        }
    }
}

/// Body of a metadata block, stored encrypted on a peer: the hash of every
/// data block in the parity group plus the XOR of their contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParityBlock {
    pub hashes: BTreeMap<u64, String>,
    pub xor: ByteBuf,
}

/// Serialize a value to a compressed msgpack payload.
pub fn pack<T: Serialize>(value: &T) -> MeshResult<Vec<u8>> {
    let raw = rmp_serde::to_vec_named(value)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|e| MeshError::Codec(format!("compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| MeshError::Codec(format!("compression failed: {}", e)))
}

/// Parse a compressed msgpack payload. Any failure, including trailing
/// garbage after the value, is a [`MeshError::MalformedFrame`].
pub fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> MeshResult<T> {
    let mut raw = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut raw)
        .map_err(|e| MeshError::MalformedFrame(format!("decompression failed: {}", e)))?;
    Ok(rmp_serde::from_slice(&raw)?)
}

/// The length-delimited framing shared by both ends of a connection.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}
