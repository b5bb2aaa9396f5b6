//! Block naming shared by the server engines and the peer daemon.
//!
//! A block is identified by `(file name, number, kind)` and stored on a peer
//! as `{name}_{number}.{kind}`. Parsing splits on the last underscore and the
//! last dot, so file names containing either character survive the round
//! trip.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MeshError, MeshResult};

/// Wildcard component accepted in queries and file-name patterns.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Data,
    Metadata,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Data => "data",
            BlockKind::Metadata => "metadata",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockKind {
    type Err = MeshError;

    fn from_str(s: &str) -> MeshResult<Self> {
        match s {
            "data" => Ok(BlockKind::Data),
            "metadata" => Ok(BlockKind::Metadata),
            other => Err(MeshError::Codec(format!("unknown block type: {}", other))),
        }
    }
}

/// A parsed block file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFileName {
    pub name: String,
    pub number: u64,
    pub kind: BlockKind,
}

/// Build the on-disk file name for a block.
pub fn block_file_name(name: &str, number: u64, kind: BlockKind) -> String {
    format!("{}_{}.{}", name, number, kind)
}

/// Build a glob pattern matching block files. `None` components match
/// anything; the file name is pattern-escaped so names containing glob
/// metacharacters only match themselves.
pub fn block_file_pattern(
    name: Option<&str>,
    number: Option<u64>,
    kind: Option<BlockKind>,
) -> String {
    let name = match name {
        Some(n) => glob::Pattern::escape(n),
        None => WILDCARD.to_string(),
    };
    let number = match number {
        Some(n) => n.to_string(),
        None => WILDCARD.to_string(),
    };
    let kind = match kind {
        Some(k) => k.as_str().to_string(),
        None => WILDCARD.to_string(),
    };
    format!("{}_{}.{}", name, number, kind)
}

/// Parse a block file name back into its parts. Returns `None` for file
/// names that do not follow the block naming scheme.
pub fn parse_block_file_name(file_name: &str) -> Option<BlockFileName> {
    let (name, rest) = file_name.rsplit_once('_')?;
    let (number, kind) = rest.rsplit_once('.')?;
    let number = number.parse::<u64>().ok()?;
    let kind = kind.parse::<BlockKind>().ok()?;
    if name.is_empty() {
        return None;
    }
    Some(BlockFileName {
        name: name.to_string(),
        number,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        let file = block_file_name("report.pdf", 12, BlockKind::Data);
        assert_eq!(file, "report.pdf_12.data");

        let parsed = parse_block_file_name(&file).unwrap();
        assert_eq!(parsed.name, "report.pdf");
        assert_eq!(parsed.number, 12);
        assert_eq!(parsed.kind, BlockKind::Data);
    }

    #[test]
    fn test_name_with_underscores_and_dots() {
        let file = block_file_name("my_archive.tar.gz", 3, BlockKind::Metadata);
        let parsed = parse_block_file_name(&file).unwrap();
        assert_eq!(parsed.name, "my_archive.tar.gz");
        assert_eq!(parsed.number, 3);
        assert_eq!(parsed.kind, BlockKind::Metadata);
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert!(parse_block_file_name("notes.txt").is_none());
        assert!(parse_block_file_name("file_x.data").is_none());
        assert!(parse_block_file_name("file_3.parquet").is_none());
        assert!(parse_block_file_name("_3.data").is_none());
    }

    #[test]
    fn test_pattern_building() {
        assert_eq!(
            block_file_pattern(Some("f"), None, Some(BlockKind::Data)),
            "f_*.data"
        );
        assert_eq!(block_file_pattern(None, None, None), "*_*.*");
        // glob metacharacters in the name are escaped
        assert_eq!(block_file_pattern(Some("a[1]"), Some(2), None), "a[[]1]_2.*");
    }
}
