//! The storage peer daemon.
//!
//! Connects to the server (retrying every two seconds until it accepts),
//! then applies storage effects for every decoded frame: store, serve, and
//! delete block files, and report disk and storage state. A `kill` frame
//! terminates the daemon cleanly; a dropped connection sends it back to the
//! reconnect loop.

pub mod diskstat;
pub mod store;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_bytes::ByteBuf;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::blocks;
use crate::error::MeshResult;
use crate::protocol::{self, WireMessage};
use store::BlockStore;

/// Delay between connection attempts to the server.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub server: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig {
            server: "127.0.0.1".to_string(),
            port: 2048,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Run the daemon until a `kill` frame arrives.
pub async fn run(config: PeerConfig) -> MeshResult<()> {
    let store = BlockStore::new(&config.data_dir)?;
    let address = format!("{}:{}", config.server, config.port);

    loop {
        let stream = connect(&address).await;
        info!("connected to server at {}", address);
        let (read_half, write_half) = stream.into_split();

        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let sender = tokio::spawn(run_sender(write_half, send_rx));

        let killed = serve(read_half, &store, send_tx).await;
        let _ = sender.await;

        if killed {
            info!("kill received, shutting down");
            return Ok(());
        }
        info!("connection to server lost, reconnecting");
    }
}

async fn connect(address: &str) -> TcpStream {
    loop {
        match TcpStream::connect(address).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return stream;
            }
            Err(_) => {
                info!("waiting for connection to {}", address);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Socket writer; sole owner of the write half for this connection.
async fn run_sender(write_half: OwnedWriteHalf, mut outbox: UnboundedReceiver<Vec<u8>>) {
    let mut frames = tokio_util::codec::FramedWrite::new(write_half, protocol::frame_codec());
    while let Some(payload) = outbox.recv().await {
        debug!("sending message of length {}", payload.len());
        if let Err(e) = frames.send(Bytes::from(payload)).await {
            warn!("send to server failed: {}", e);
            break;
        }
    }
}

/// Receive frames and apply their storage effects until the connection
/// drops or a `kill` arrives. Returns whether the daemon was killed.
async fn serve(
    read_half: OwnedReadHalf,
    store: &BlockStore,
    outbox: UnboundedSender<Vec<u8>>,
) -> bool {
    let mut frames = tokio_util::codec::FramedRead::new(read_half, protocol::frame_codec());
    while let Some(frame) = frames.next().await {
        let payload = match frame {
            Ok(payload) => payload,
            Err(e) => {
                warn!("receive from server failed: {}", e);
                return false;
            }
        };
        let message: WireMessage = match protocol::unpack(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("received malformed message: {}", e);
                continue;
            }
        };
        debug!("received message of type {}", message.kind());

        match message {
            WireMessage::SendBlock {
                block_type,
                name,
                number,
                content,
            } => {
                if let Err(e) = store.write_block(&name, number, block_type, &content) {
                    warn!("failed to store block {} of '{}': {}", number, name, e);
                }
            }
            WireMessage::AskBlock {
                block_type,
                name,
                number,
            } => {
                for path in store.matching(&name, &block_type, &number) {
                    let content = match fs::read(&path) {
                        Ok(content) => content,
                        Err(e) => {
                            warn!("failed to read {}: {}", path.display(), e);
                            continue;
                        }
                    };
                    let Some(file_name) =
                        path.file_name().map(|n| n.to_string_lossy().to_string())
                    else {
                        continue;
                    };
                    let Some(parsed) = blocks::parse_block_file_name(&file_name) else {
                        continue;
                    };
                    send(
                        &outbox,
                        &WireMessage::Block {
                            block_type: parsed.kind,
                            name: parsed.name,
                            number: parsed.number,
                            content: ByteBuf::from(content),
                        },
                    );
                }
                // announce that every matching block went out
                send(&outbox, &WireMessage::FileSent { name });
            }
            WireMessage::DeleteBlock {
                block_type,
                name,
                number,
            } => {
                store.delete_matching(&name, &block_type, &number);
            }
            WireMessage::AskDiskState => match diskstat::disk_state() {
                Ok((total, free)) => send(&outbox, &WireMessage::DiskState { total, free }),
                Err(e) => warn!("failed to read disk state: {}", e),
            },
            WireMessage::AskStorageState => {
                send(
                    &outbox,
                    &WireMessage::StorageState {
                        blocks: store.inventory(),
                    },
                );
            }
            WireMessage::Kill => return true,
            other => warn!("unexpected message type {}, not processed", other.kind()),
        }
    }
    false
}

fn send(outbox: &UnboundedSender<Vec<u8>>, message: &WireMessage) {
    match protocol::pack(message) {
        Ok(payload) => {
            let _ = outbox.send(payload);
        }
        Err(e) => warn!("failed to encode message: {}", e),
    }
}

