use anyhow::Result;
use clap::Parser;
use tracing::info;

use blockmesh::cli::ServerCli;
use blockmesh::logging;
use blockmesh::messages::CoordinatorMsg;
use blockmesh::server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ServerCli::parse();
    let (config, log_filter) = cli.resolve()?;
    logging::init_logging_safe(log_filter.as_deref());

    let handle = server::start(config).await?;
    info!("server listening on {}", handle.local_addr());

    let coordinator = handle.sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = coordinator.send(CoordinatorMsg::Exit);
        }
    });

    handle.wait().await;
    info!("server stopped");
    Ok(())
}
