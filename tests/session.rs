use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use fay_connector_rs::audio::{CaptureDevice, LoggingRoute, PlaybackDevice, ReaderCapture};
use fay_connector_rs::clip_store::FsClipStore;
use fay_connector_rs::config::Config;
use fay_connector_rs::error::LinkError;
use fay_connector_rs::net_link::NetLink;
use fay_connector_rs::protocol::{END_MARKER_HEX, START_MARKER};
use fay_connector_rs::session::TransferStats;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

struct RecordingPlayer {
    played: Arc<StdMutex<Vec<PathBuf>>>,
    prepared: Option<PathBuf>,
}

#[async_trait]
impl PlaybackDevice for RecordingPlayer {
    async fn prepare(&mut self, clip: &Path) -> anyhow::Result<()> {
        self.prepared = Some(clip.to_path_buf());
        Ok(())
    }

    async fn play(&mut self) -> anyhow::Result<()> {
        if let Some(clip) = self.prepared.clone() {
            self.played.lock().unwrap().push(clip);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.prepared = None;
    }
}

fn test_config(port: u16, clip_dir: &Path) -> Config {
    let mut config = Config::new().unwrap();
    config.host = "127.0.0.1".to_string();
    config.port = port;
    config.connect_timeout = Duration::from_secs(2);
    config.reconnect = false;
    config.chunk_bytes = 1024;
    config.capture_restart_cooldown = Duration::ZERO;
    config.capture_max_restarts = 1;
    config.clip_dir = clip_dir.to_path_buf();
    config.settle_delay = Duration::ZERO;
    config
}

struct Client {
    stats: Arc<TransferStats>,
    played: Arc<StdMutex<Vec<PathBuf>>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<fay_connector_rs::error::Result<()>>,
}

fn start_client(config: Config, capture: Box<dyn CaptureDevice>) -> Client {
    let played = Arc::new(StdMutex::new(Vec::new()));
    let player: Box<dyn PlaybackDevice> = Box::new(RecordingPlayer {
        played: played.clone(),
        prepared: None,
    });
    let (shutdown, shutdown_rx) = watch::channel(false);
    let store = Arc::new(FsClipStore::new(config.clip_dir.clone()));
    let link = NetLink::new(
        config,
        capture,
        Arc::new(Mutex::new(player)),
        Arc::new(LoggingRoute::new()),
        store,
        shutdown_rx,
    );
    let stats = link.stats();
    Client {
        stats,
        played,
        shutdown,
        task: tokio::spawn(link.run()),
    }
}

fn tone() -> Box<dyn CaptureDevice> {
    Box::new(ReaderCapture::new(std::io::repeat(0x5A)))
}

// Reads everything the client uploads until the client closes its side.
fn drain(mut reader: OwnedReadHalf) -> JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
        received
    })
}

fn clip_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| entries.map(|e| e.unwrap().path()).collect())
        .unwrap_or_default()
}

async fn finish(
    task: JoinHandle<fay_connector_rs::error::Result<()>>,
) -> fay_connector_rs::error::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("connector should stop")
        .unwrap()
}

#[tokio::test]
async fn uploads_chunks_and_plays_downloaded_clip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let clip_dir = tempfile::tempdir().unwrap();
    let client = start_client(test_config(port, clip_dir.path()), tone());

    let (server, _) = listener.accept().await.unwrap();
    let (mut reader, mut writer) = server.into_split();

    let mut first = vec![0u8; 3 * 1024];
    reader.read_exact(&mut first).await.unwrap();
    assert!(first.iter().all(|b| *b == 0x5A));
    let uploaded = drain(reader);

    let mut frame = START_MARKER.to_vec();
    frame.extend_from_slice(&[0xAA, 0xBB]);
    frame.extend_from_slice(&fay_connector_rs::hex_codec::decode(END_MARKER_HEX).unwrap());
    writer.write_all(&frame).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while client.played.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clip should be played");

    drop(writer);
    finish(client.task).await.unwrap();
    let uploaded = uploaded.await.unwrap();

    let files = clip_files(clip_dir.path());
    assert_eq!(files.len(), 1);
    assert_eq!(std::fs::read(&files[0]).unwrap(), vec![0xAA, 0xBB]);
    assert_eq!(client.played.lock().unwrap()[0], files[0]);

    assert_eq!(client.stats.received(), 2);
    let sent = client.stats.sent();
    assert!(sent >= 3 * 1024);
    assert_eq!(sent % 1024, 0);
    // a write cut short by the stop is on the wire but not counted
    assert!(uploaded.len() as u64 + 3 * 1024 >= sent);
}

#[tokio::test]
async fn close_mid_frame_ends_session_without_clip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let clip_dir = tempfile::tempdir().unwrap();
    let client = start_client(test_config(port, clip_dir.path()), tone());

    let (server, _) = listener.accept().await.unwrap();
    let (reader, mut writer) = server.into_split();
    let uploaded = drain(reader);

    let mut partial = START_MARKER.to_vec();
    partial.extend_from_slice(&[0x01, 0x02, 0x03]);
    writer.write_all(&partial).await.unwrap();
    drop(writer);

    finish(client.task).await.unwrap();
    // upload stopped too: the client closed its side of the socket
    tokio::time::timeout(Duration::from_secs(5), uploaded)
        .await
        .expect("upload should stop")
        .unwrap();

    assert!(clip_files(clip_dir.path()).is_empty());
    assert!(client.played.lock().unwrap().is_empty());
    assert_eq!(client.stats.received(), 0);
}

#[tokio::test]
async fn shutdown_closes_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let clip_dir = tempfile::tempdir().unwrap();
    let client = start_client(test_config(port, clip_dir.path()), tone());

    let (server, _) = listener.accept().await.unwrap();
    let (reader, _writer) = server.into_split();
    let uploaded = drain(reader);
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.shutdown.send_replace(true);
    finish(client.task).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), uploaded)
        .await
        .expect("socket should be closed")
        .unwrap();
}

#[tokio::test]
async fn unreachable_controller_is_connection_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let clip_dir = tempfile::tempdir().unwrap();
    let client = start_client(test_config(port, clip_dir.path()), tone());
    let err = finish(client.task).await.unwrap_err();
    assert!(matches!(err, LinkError::ConnectionFailure(_)));
}

#[tokio::test]
async fn dead_microphone_is_fatal_after_one_restart() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let clip_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(port, clip_dir.path());
    config.reconnect = true;
    let client = start_client(config, Box::new(ReaderCapture::new(std::io::empty())));

    let (server, _) = listener.accept().await.unwrap();
    let (reader, _writer) = server.into_split();
    let uploaded = drain(reader);

    let err = finish(client.task).await.unwrap_err();
    assert!(matches!(err, LinkError::CaptureFailure(_)));
    assert!(uploaded.await.unwrap().is_empty());
}

#[tokio::test]
async fn reconnects_after_controller_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let clip_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(port, clip_dir.path());
    config.reconnect = true;
    config.max_retry_delay = Duration::from_secs(1);
    let client = start_client(config, tone());

    let (first, _) = listener.accept().await.unwrap();
    drop(first);

    let (second, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client should reconnect")
        .unwrap();
    let (reader, _writer) = second.into_split();
    let uploaded = drain(reader);

    client.shutdown.send_replace(true);
    finish(client.task).await.unwrap();
    uploaded.await.unwrap();
}
