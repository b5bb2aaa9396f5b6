//! Server-side peer session layer.
//!
//! Two long-lived workers share the set of connected peers by message
//! passing only. The *sender* owns every socket write half and is the sole
//! writer of the peer table: registrations, removals, and all outbound
//! frames go through its inbox, which also gives per-peer FIFO delivery.
//! The *acceptor* takes new connections and spawns one reader task per
//! peer; readers forward complete frame payloads to the coordinator and
//! report closed sockets back to the sender.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::messages::{CoordinatorMsg, SendTarget};
use crate::protocol;

/// Commands consumed by the session sender.
#[derive(Debug)]
pub enum SessionCommand {
    /// Send an encoded frame payload to one peer or to all of them.
    Send {
        target: SendTarget,
        payload: Vec<u8>,
    },
    /// A freshly accepted connection; the sender takes the write half.
    Register {
        peer: SocketAddr,
        writer: OwnedWriteHalf,
    },
    /// A reader observed the socket closing.
    Deregister { peer: SocketAddr },
    /// Close every socket and stop.
    Shutdown,
}

/// Accept loop. Runs until the shutdown token fires or the sender is gone.
pub async fn run_acceptor(
    listener: TcpListener,
    session: UnboundedSender<SessionCommand>,
    coordinator: UnboundedSender<CoordinatorMsg>,
    shutdown: CancellationToken,
) {
    info!("session acceptor started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {}", peer);
                    let _ = stream.set_nodelay(true);
                    let (read_half, write_half) = stream.into_split();
                    if session
                        .send(SessionCommand::Register { peer, writer: write_half })
                        .is_err()
                    {
                        break;
                    }
                    tokio::spawn(run_reader(
                        peer,
                        read_half,
                        session.clone(),
                        coordinator.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!("accept failed: {}", e),
            },
        }
    }
    info!("session acceptor ended");
}

/// Per-peer reader. Forwards frame payloads to the coordinator undecoded;
/// the coordinator owns parsing so that malformed frames are dropped in one
/// place.
async fn run_reader(
    peer: SocketAddr,
    read_half: OwnedReadHalf,
    session: UnboundedSender<SessionCommand>,
    coordinator: UnboundedSender<CoordinatorMsg>,
    shutdown: CancellationToken,
) {
    let mut frames = FramedRead::new(read_half, protocol::frame_codec());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = frames.next() => match frame {
                Some(Ok(payload)) => {
                    let message = CoordinatorMsg::Received {
                        peer,
                        payload: payload.to_vec(),
                    };
                    if coordinator.send(message).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!("receive from {} failed: {}", peer, e);
                    let _ = session.send(SessionCommand::Deregister { peer });
                    return;
                }
                None => {
                    debug!("{} closed the connection", peer);
                    let _ = session.send(SessionCommand::Deregister { peer });
                    return;
                }
            },
        }
    }
}

/// Sender loop; sole owner of the peer write halves.
pub async fn run_sender(
    mut inbox: UnboundedReceiver<SessionCommand>,
    coordinator: UnboundedSender<CoordinatorMsg>,
) {
    info!("session sender started");
    let mut peers: HashMap<SocketAddr, FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>> =
        HashMap::new();

    while let Some(command) = inbox.recv().await {
        match command {
            SessionCommand::Register { peer, writer } => {
                let framed = FramedWrite::new(writer, protocol::frame_codec());
                peers.insert(peer, framed);
                let _ = coordinator.send(CoordinatorMsg::Connected { peer });
            }
            SessionCommand::Deregister { peer } => {
                if peers.remove(&peer).is_some() {
                    let _ = coordinator.send(CoordinatorMsg::Disconnected { peer });
                }
            }
            SessionCommand::Send { target, payload } => {
                let targets: Vec<SocketAddr> = match target {
                    SendTarget::All => peers.keys().copied().collect(),
                    SendTarget::Peer(peer) => vec![peer],
                };
                for peer in targets {
                    let failed = match peers.get_mut(&peer) {
                        Some(framed) => framed.send(Bytes::from(payload.clone())).await.is_err(),
                        None => {
                            debug!("send to unknown peer {} skipped", peer);
                            false
                        }
                    };
                    if failed {
                        warn!("send to {} failed, dropping peer", peer);
                        peers.remove(&peer);
                        let _ = coordinator.send(CoordinatorMsg::Disconnected { peer });
                    }
                }
            }
            SessionCommand::Shutdown => break,
        }
    }
    // dropping the write halves closes the sockets
    info!("session sender ended");
}
