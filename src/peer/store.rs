//! The peer's on-disk block store.
//!
//! Blocks live flat in the data directory as `{name}_{number}.{kind}`.
//! Single-file failures are reported to the caller, logged there, and never
//! bring the daemon down; a block that cannot be read or written simply
//! surfaces as missing at restore time.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::blocks::{self, BlockKind, WILDCARD};
use crate::error::MeshResult;
use crate::protocol::{BlockRef, KindSel, NumberSel};

#[derive(Debug)]
pub struct BlockStore {
    data_dir: PathBuf,
}

impl BlockStore {
    pub fn new(data_dir: &Path) -> MeshResult<Self> {
        fs::create_dir_all(data_dir)?;
        Ok(BlockStore {
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Write (or overwrite) a block file.
    pub fn write_block(
        &self,
        name: &str,
        number: u64,
        kind: BlockKind,
        content: &[u8],
    ) -> MeshResult<()> {
        let path = self.data_dir.join(blocks::block_file_name(name, number, kind));
        fs::write(&path, content)?;
        debug!("stored {} ({} bytes)", path.display(), content.len());
        Ok(())
    }

    /// Paths of all stored blocks matching the selectors. A `name` of `"*"`
    /// matches every file.
    pub fn matching(&self, name: &str, kind: &KindSel, number: &NumberSel) -> Vec<PathBuf> {
        let name = if name == WILDCARD { None } else { Some(name) };
        let pattern = self
            .data_dir
            .join(blocks::block_file_pattern(name, number.exact(), kind.exact()))
            .to_string_lossy()
            .to_string();
        match glob::glob(&pattern) {
            Ok(paths) => {
                let mut found: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
                found.sort();
                found
            }
            Err(e) => {
                warn!("bad block pattern {}: {}", pattern, e);
                Vec::new()
            }
        }
    }

    /// Delete all blocks matching the selectors, skipping over failures.
    pub fn delete_matching(&self, name: &str, kind: &KindSel, number: &NumberSel) -> usize {
        let mut deleted = 0;
        for path in self.matching(name, kind, number) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("deleted {}", path.display());
                    deleted += 1;
                }
                Err(e) => warn!("failed to delete {}: {}", path.display(), e),
            }
        }
        deleted
    }

    /// Inventory of every stored block; files not following the block
    /// naming scheme are ignored.
    pub fn inventory(&self) -> Vec<BlockRef> {
        let mut refs = Vec::new();
        for path in self.matching(WILDCARD, &KindSel::any(), &NumberSel::any()) {
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string())
            else {
                continue;
            };
            if let Some(parsed) = blocks::parse_block_file_name(&file_name) {
                refs.push(BlockRef {
                    name: parsed.name,
                    number: parsed.number,
                    block_type: parsed.kind,
                });
            }
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, BlockStore) {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_write_and_overwrite() {
        let (_dir, store) = store();
        store
            .write_block("f.txt", 1, BlockKind::Data, b"first")
            .unwrap();
        store
            .write_block("f.txt", 1, BlockKind::Data, b"second")
            .unwrap();

        let found = store.matching("f.txt", &KindSel::any(), &NumberSel::any());
        assert_eq!(found.len(), 1);
        assert_eq!(fs::read(&found[0]).unwrap(), b"second");
    }

    #[test]
    fn test_matching_selectors() {
        let (_dir, store) = store();
        store.write_block("a", 1, BlockKind::Data, b"x").unwrap();
        store.write_block("a", 2, BlockKind::Data, b"x").unwrap();
        store.write_block("a", 1, BlockKind::Metadata, b"x").unwrap();
        store.write_block("b", 1, BlockKind::Data, b"x").unwrap();

        assert_eq!(
            store.matching("a", &KindSel::any(), &NumberSel::any()).len(),
            3
        );
        assert_eq!(
            store
                .matching("a", &KindSel::Exact(BlockKind::Data), &NumberSel::any())
                .len(),
            2
        );
        assert_eq!(
            store
                .matching("a", &KindSel::any(), &NumberSel::Exact(1))
                .len(),
            2
        );
        assert_eq!(
            store.matching(WILDCARD, &KindSel::any(), &NumberSel::any()).len(),
            4
        );
    }

    #[test]
    fn test_delete_matching() {
        let (_dir, store) = store();
        store.write_block("a", 1, BlockKind::Data, b"x").unwrap();
        store.write_block("a", 2, BlockKind::Data, b"x").unwrap();
        store.write_block("b", 1, BlockKind::Data, b"x").unwrap();

        let deleted = store.delete_matching("a", &KindSel::any(), &NumberSel::any());
        assert_eq!(deleted, 2);
        assert_eq!(
            store.matching(WILDCARD, &KindSel::any(), &NumberSel::any()).len(),
            1
        );

        // wildcard delete clears the rest
        assert_eq!(
            store.delete_matching(WILDCARD, &KindSel::any(), &NumberSel::any()),
            1
        );
        assert!(store.inventory().is_empty());
    }

    #[test]
    fn test_inventory_skips_foreign_files() {
        let (dir, store) = store();
        store.write_block("a.bin", 3, BlockKind::Metadata, b"x").unwrap();
        fs::write(dir.path().join("stray.txt"), b"y").unwrap();
        fs::write(dir.path().join("weird_9.txt"), b"y").unwrap();

        let inventory = store.inventory();
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory[0].name, "a.bin");
        assert_eq!(inventory[0].number, 3);
        assert_eq!(inventory[0].block_type, BlockKind::Metadata);
    }
}
