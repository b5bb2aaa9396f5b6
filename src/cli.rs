//! Command-line parsing for the two binaries.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{FileConfig, DEFAULT_CONFIG_PATH};
use crate::error::MeshResult;
use crate::peer::PeerConfig;
use crate::server::ServerConfig;

/// The storage coordinator.
#[derive(Parser, Debug, Clone)]
#[command(name = "blockmesh-server", version)]
pub struct ServerCli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Connection port
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Path of the metadata store
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,
    /// Temporary staging directory
    #[arg(long, value_name = "DIR")]
    pub temp: Option<PathBuf>,
}

impl ServerCli {
    /// Merge flags over the config file; returns the server configuration
    /// and the log filter to install.
    pub fn resolve(self) -> MeshResult<(ServerConfig, Option<String>)> {
        let file = load_file(&self.config)?;
        let defaults = ServerConfig::default();
        let config = ServerConfig {
            port: self.port.or(file.port).unwrap_or(defaults.port),
            db_path: self.db.or(file.db).unwrap_or(defaults.db_path),
            temp_dir: self.temp.or(file.temp).unwrap_or(defaults.temp_dir),
        };
        Ok((config, file.log_filter))
    }
}

/// A storage peer.
#[derive(Parser, Debug, Clone)]
#[command(name = "blockmesh-peer", version)]
pub struct PeerCli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Server IP address
    #[arg(short, long)]
    pub server: Option<String>,
    /// Connection port
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Data directory for stored blocks
    #[arg(short, long, value_name = "DIR")]
    pub datapath: Option<PathBuf>,
}

impl PeerCli {
    /// Merge flags over the config file; returns the peer configuration
    /// and the log filter to install.
    pub fn resolve(self) -> MeshResult<(PeerConfig, Option<String>)> {
        let file = load_file(&self.config)?;
        let defaults = PeerConfig::default();
        let config = PeerConfig {
            server: self.server.or(file.server).unwrap_or(defaults.server),
            port: self.port.or(file.port).unwrap_or(defaults.port),
            data_dir: self.datapath.or(file.datapath).unwrap_or(defaults.data_dir),
        };
        Ok((config, file.log_filter))
    }
}

fn load_file(path: &Option<PathBuf>) -> MeshResult<FileConfig> {
    match path {
        Some(path) => FileConfig::load(path, true),
        None => FileConfig::load(std::path::Path::new(DEFAULT_CONFIG_PATH), false),
    }
}
