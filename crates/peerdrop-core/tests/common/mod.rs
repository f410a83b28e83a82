//! Fixtures shared by the integration tests: scratch files and a live peer
//! answering on loopback.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use peerdrop_core::config::{Config, LocalDevice};
use peerdrop_core::responder::{Incoming, RequestPolicy, Responder};
use peerdrop_core::CancellationToken;

/// Identity of the peer started by [`start_peer`].
pub const PEER_SERIAL: &str = "peer-serial";

/// Nickname of the peer started by [`start_peer`].
pub const PEER_NICKNAME: &str = "Pixel";

/// Identity of the local side.
pub const LOCAL_SERIAL: &str = "laptop-serial";

/// Display name of the local side.
pub const LOCAL_NAME: &str = "Laptop";

/// Scratch directory removed on drop.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("scratch dir")
}

/// Write `content` to `dir/name`, creating intermediate directories.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("parent dirs");
    }
    std::fs::write(&path, content).expect("write fixture");
    path
}

/// `size` bytes of noise, for files whose content does not matter.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Create a test directory structure with three files, one of them nested.
pub fn create_test_directory(base: &Path, name: &str) -> PathBuf {
    let dir = base.join(name);
    std::fs::create_dir_all(&dir).expect("fixture dir");

    create_test_file(&dir, "file1.txt", b"Hello, PeerDrop!");
    create_test_file(&dir, "file2.bin", &random_bytes(2048));
    create_test_file(&dir, "subdir/nested.txt", b"two levels down");

    dir
}

/// A running peer answering on loopback.
pub struct TestPeer {
    /// Where it listens
    pub addr: SocketAddr,
    /// Every request it answered
    pub incoming: mpsc::UnboundedReceiver<Incoming>,
    token: CancellationToken,
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        self.token.request_cancel();
    }
}

/// Start a peer with the given policy on an ephemeral port.
pub async fn start_peer(policy: Arc<dyn RequestPolicy>) -> TestPeer {
    let mut responder = Responder::bind(
        "127.0.0.1:0".parse().unwrap(),
        LocalDevice::new(PEER_SERIAL, PEER_NICKNAME),
        policy,
        Duration::from_secs(5),
    )
    .await
    .expect("Failed to bind responder");
    let addr = responder.local_addr().unwrap();
    let incoming = responder.subscribe();
    let token = CancellationToken::new();
    tokio::spawn(responder.serve(token.clone()));

    TestPeer {
        addr,
        incoming,
        token,
    }
}

/// Configuration for the local side talking to peers on `port`.
pub fn local_config(port: u16) -> Config {
    let mut config = Config::default();
    config.general.device_id = LOCAL_SERIAL.to_string();
    config.general.device_name = LOCAL_NAME.to_string();
    config.network.communication_port = port;
    config.network.connect_timeout = Duration::from_secs(2);
    config.network.response_timeout = Duration::from_secs(5);
    config
}
