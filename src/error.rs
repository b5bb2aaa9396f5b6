use thiserror::Error;

/// Error kinds used across the coordinator, the engines, and the peer
/// daemon. Every cross-component failure is distinguishable by variant so
/// handlers can react by kind instead of by message text.
#[derive(Debug, Error)]
pub enum MeshError {
    /// A frame failed to decompress or parse, or was not a message map.
    /// Frames like this are dropped and logged, never propagated further.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A peer socket failed while sending or receiving.
    #[error("peer disconnected: {0}")]
    PeerDisconnected(String),

    /// A distribute source path does not exist.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A metadata store operation failed.
    #[error("metadata store failure: {0}")]
    StorageFailure(String),

    /// A restore could not validate or reconstruct enough blocks.
    #[error("corrupted: {0}")]
    Corrupted(String),

    /// A task received an `Exit` message before completing.
    #[error("task cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for MeshError {
    fn from(error: std::io::Error) -> Self {
        MeshError::Io(error.to_string())
    }
}

impl From<rusqlite::Error> for MeshError {
    fn from(error: rusqlite::Error) -> Self {
        MeshError::StorageFailure(error.to_string())
    }
}

impl From<rmp_serde::encode::Error> for MeshError {
    fn from(error: rmp_serde::encode::Error) -> Self {
        MeshError::Codec(error.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MeshError {
    fn from(error: rmp_serde::decode::Error) -> Self {
        MeshError::MalformedFrame(error.to_string())
    }
}

impl From<glob::PatternError> for MeshError {
    fn from(error: glob::PatternError) -> Self {
        MeshError::Io(format!("bad glob pattern: {}", error))
    }
}

/// Result type alias for blockmesh operations
pub type MeshResult<T> = Result<T, MeshError>;
