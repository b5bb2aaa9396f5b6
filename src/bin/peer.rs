use anyhow::Result;
use clap::Parser;
use tracing::info;

use blockmesh::cli::PeerCli;
use blockmesh::logging;
use blockmesh::peer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = PeerCli::parse();
    let (config, log_filter) = cli.resolve()?;
    logging::init_logging_safe(log_filter.as_deref());

    info!(
        "peer starting, server {}:{}, data at {}",
        config.server,
        config.port,
        config.data_dir.display()
    );
    peer::run(config).await?;
    info!("peer stopped");
    Ok(())
}
