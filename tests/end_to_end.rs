//! Full-system tests: a real server with real peer daemons over TCP
//! loopback, driven through the coordinator inbox and observed on the UI
//! event bus.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

use blockmesh::messages::{CoordinatorMsg, UiEvent};
use blockmesh::peer::{self, PeerConfig};
use blockmesh::server::{self, ServerConfig, ServerHandle};

const WAIT: Duration = Duration::from_secs(15);

struct Cluster {
    server: ServerHandle,
    ui: broadcast::Receiver<UiEvent>,
    data_dirs: Vec<PathBuf>,
    peers: Vec<std::net::SocketAddr>,
    root: tempfile::TempDir,
}

/// Start a server on an ephemeral port plus `peers` daemons, and wait
/// until every peer is connected.
async fn start_cluster(peers: usize) -> Cluster {
    let root = tempfile::TempDir::new().unwrap();
    let server = server::start(ServerConfig {
        port: 0,
        db_path: root.path().join("files.db"),
        temp_dir: root.path().join("temp"),
    })
    .await
    .unwrap();
    let mut ui = server.subscribe();
    let port = server.local_addr().port();

    let mut data_dirs = Vec::new();
    let mut connected = Vec::new();
    for index in 0..peers {
        let data_dir = root.path().join(format!("peer-{}", index));
        data_dirs.push(data_dir.clone());
        tokio::spawn(peer::run(PeerConfig {
            server: "127.0.0.1".to_string(),
            port,
            data_dir,
        }));
        let event = wait_for(&mut ui, |event| {
            matches!(event, UiEvent::ClientList(list) if list.len() == index + 1)
        })
        .await;
        if let UiEvent::ClientList(list) = event {
            connected = list;
        }
    }

    Cluster {
        server,
        ui,
        data_dirs,
        peers: connected,
        root,
    }
}

/// Wait for a UI event matching the predicate; lagged receivers resubscribe
/// into the stream.
async fn wait_for<F>(ui: &mut broadcast::Receiver<UiEvent>, predicate: F) -> UiEvent
where
    F: Fn(&UiEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            match ui.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("UI bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for UI event")
}

/// Poll until `path` exists with exactly `expected` content.
async fn wait_for_file(path: &Path, expected: &[u8]) {
    let deadline = Instant::now() + WAIT;
    loop {
        if let Ok(content) = std::fs::read(path) {
            if content == expected {
                return;
            }
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {}",
            path.display()
        );
        sleep(Duration::from_millis(100)).await;
    }
}

/// Delete the block file `{name}_{number}.{kind}` from whichever data dir
/// holds a copy; returns how many copies were removed.
fn delete_block_copies(data_dirs: &[PathBuf], file_name: &str) -> usize {
    let mut removed = 0;
    for dir in data_dirs {
        let path = dir.join(file_name);
        if path.exists() {
            std::fs::remove_file(path).unwrap();
            removed += 1;
        }
    }
    removed
}

#[tokio::test]
async fn test_distribute_restore_and_repair() {
    let mut cluster = start_cluster(2).await;
    let content = b"0123456789".to_vec();
    let source = cluster.root.path().join("source.bin");
    std::fs::write(&source, &content).unwrap();

    // distribute: 3 data blocks in 2 parity groups
    let coordinator = cluster.server.sender();
    coordinator
        .send(CoordinatorMsg::Distribute {
            file_path: source,
            block_size: 4,
            duplication: 1,
            validation: 2,
        })
        .unwrap();
    wait_for(&mut cluster.ui, |event| {
        matches!(event, UiEvent::FileList(files) if files.iter().any(|f| f.name == "source.bin"))
    })
    .await;

    // happy-path restore returns the exact bytes
    let dest1 = cluster.root.path().join("restored-1.bin");
    coordinator
        .send(CoordinatorMsg::Restore {
            destination: dest1.clone(),
            name: "source.bin".to_string(),
        })
        .unwrap();
    wait_for_file(&dest1, &content).await;

    // lose data block 2: parity of group 1 rebuilds it
    assert_eq!(delete_block_copies(&cluster.data_dirs, "source.bin_2.data"), 1);
    let dest2 = cluster.root.path().join("restored-2.bin");
    coordinator
        .send(CoordinatorMsg::Restore {
            destination: dest2.clone(),
            name: "source.bin".to_string(),
        })
        .unwrap();
    wait_for_file(&dest2, &content).await;

    // lose data block 1 as well: two losses in group 1 are unrecoverable
    assert_eq!(delete_block_copies(&cluster.data_dirs, "source.bin_1.data"), 1);
    let dest3 = cluster.root.path().join("restored-3.bin");
    coordinator
        .send(CoordinatorMsg::Restore {
            destination: dest3.clone(),
            name: "source.bin".to_string(),
        })
        .unwrap();
    wait_for(&mut cluster.ui, |event| {
        matches!(event, UiEvent::Error { message, .. } if message.contains("corrupted"))
    })
    .await;
    assert!(!dest3.exists());

    cluster.server.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_name_refused() {
    let mut cluster = start_cluster(1).await;
    let source = cluster.root.path().join("twice.bin");
    std::fs::write(&source, b"payload").unwrap();

    let coordinator = cluster.server.sender();
    coordinator
        .send(CoordinatorMsg::Distribute {
            file_path: source.clone(),
            block_size: 4,
            duplication: 1,
            validation: 2,
        })
        .unwrap();
    wait_for(&mut cluster.ui, |event| {
        matches!(event, UiEvent::FileList(files) if files.iter().any(|f| f.name == "twice.bin"))
    })
    .await;

    coordinator
        .send(CoordinatorMsg::Distribute {
            file_path: source,
            block_size: 4,
            duplication: 1,
            validation: 2,
        })
        .unwrap();
    wait_for(&mut cluster.ui, |event| {
        matches!(event, UiEvent::Error { message, .. } if message.contains("already distributed"))
    })
    .await;

    cluster.server.shutdown().await;
}

#[tokio::test]
async fn test_delete_clears_peers_and_store() {
    let mut cluster = start_cluster(2).await;
    let source = cluster.root.path().join("gone.bin");
    std::fs::write(&source, vec![3u8; 64]).unwrap();

    let coordinator = cluster.server.sender();
    coordinator
        .send(CoordinatorMsg::Distribute {
            file_path: source,
            block_size: 16,
            duplication: 2,
            validation: 2,
        })
        .unwrap();
    wait_for(&mut cluster.ui, |event| {
        matches!(event, UiEvent::FileList(files) if files.iter().any(|f| f.name == "gone.bin"))
    })
    .await;

    coordinator
        .send(CoordinatorMsg::Delete {
            name: Some("gone.bin".to_string()),
        })
        .unwrap();
    wait_for(&mut cluster.ui, |event| {
        matches!(event, UiEvent::FileList(files) if files.is_empty())
    })
    .await;

    // the peers eventually hold nothing
    let deadline = Instant::now() + WAIT;
    loop {
        let blocks: usize = cluster
            .data_dirs
            .iter()
            .map(|dir| std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0))
            .sum();
        if blocks == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "peers still hold blocks");
        sleep(Duration::from_millis(100)).await;
    }

    cluster.server.shutdown().await;
}

#[tokio::test]
async fn test_reconstruct_heals_damaged_storage() {
    let mut cluster = start_cluster(2).await;
    let content: Vec<u8> = (0..200u8).collect();
    let source = cluster.root.path().join("healme.bin");
    std::fs::write(&source, &content).unwrap();

    let coordinator = cluster.server.sender();
    coordinator
        .send(CoordinatorMsg::Distribute {
            file_path: source,
            block_size: 32,
            duplication: 1,
            validation: 3,
        })
        .unwrap();
    wait_for(&mut cluster.ui, |event| {
        matches!(event, UiEvent::FileList(files) if files.iter().any(|f| f.name == "healme.bin"))
    })
    .await;

    // damage one block, then reconstruct the whole storage
    assert_eq!(delete_block_copies(&cluster.data_dirs, "healme.bin_3.data"), 1);
    coordinator.send(CoordinatorMsg::Reconstruct).unwrap();
    wait_for(&mut cluster.ui, |event| matches!(event, UiEvent::LockUi)).await;
    wait_for(&mut cluster.ui, |event| matches!(event, UiEvent::ReleaseUi)).await;

    // the file survived the round trip and is restorable again
    let dest = cluster.root.path().join("after.bin");
    coordinator
        .send(CoordinatorMsg::Restore {
            destination: dest.clone(),
            name: "healme.bin".to_string(),
        })
        .unwrap();
    wait_for_file(&dest, &content).await;

    cluster.server.shutdown().await;
}

#[tokio::test]
async fn test_kill_peer_and_client_list() {
    let mut cluster = start_cluster(2).await;
    let coordinator = cluster.server.sender();

    coordinator
        .send(CoordinatorMsg::KillPeer {
            peer: cluster.peers[0],
        })
        .unwrap();
    wait_for(&mut cluster.ui, |event| {
        matches!(event, UiEvent::ClientList(list) if list.len() == 1)
    })
    .await;

    cluster.server.shutdown().await;
}
