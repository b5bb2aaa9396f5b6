//! Optional TOML configuration file, merged under the command-line flags.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MeshError, MeshResult};

/// Default config file looked up next to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "blockmesh.toml";

/// Everything a config file may set. All fields are optional; flags given
/// on the command line win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Connection port (server and peer).
    pub port: Option<u16>,
    /// Server address (peer only).
    pub server: Option<String>,
    /// Data directory for stored blocks (peer only).
    pub datapath: Option<PathBuf>,
    /// Metadata store path (server only).
    pub db: Option<PathBuf>,
    /// Temporary staging directory (server only).
    pub temp: Option<PathBuf>,
    /// tracing filter, e.g. `blockmesh=debug`.
    pub log_filter: Option<String>,
}

impl FileConfig {
    /// Load a config file. A missing file at the default path is fine; a
    /// missing file named explicitly is an error.
    pub fn load(path: &Path, explicit: bool) -> MeshResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| MeshError::Config(format!("{}: {}", path.display(), e))),
            Err(_) if !explicit => Ok(FileConfig::default()),
            Err(e) => Err(MeshError::Config(format!("{}: {}", path.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_and_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blockmesh.toml");
        std::fs::write(&path, "port = 4096\nlog_filter = \"blockmesh=trace\"\n").unwrap();

        let config = FileConfig::load(&path, true).unwrap();
        assert_eq!(config.port, Some(4096));
        assert_eq!(config.log_filter.as_deref(), Some("blockmesh=trace"));
        assert!(config.db.is_none());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(FileConfig::load(&path, false).unwrap().port.is_none());
        assert!(matches!(
            FileConfig::load(&path, true),
            Err(MeshError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blockmesh.toml");
        std::fs::write(&path, "bogus = 1\n").unwrap();
        assert!(matches!(
            FileConfig::load(&path, true),
            Err(MeshError::Config(_))
        ));
    }
}
