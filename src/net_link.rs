use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;

use crate::audio::{AudioRoute, CaptureDevice};
use crate::clip_store::ClipStore;
use crate::config::Config;
use crate::controller::{PlaybackController, SharedPlayer};
use crate::download::{DownloadLoop, DownloadSettings};
use crate::error::{LinkError, Result};
use crate::session::{SessionState, TransferStats};
use crate::upload::{UploadLoop, UploadSettings};

/// One TCP connection to the controller. Never reused once torn down.
pub struct Connection {
    peer: SocketAddr,
    stream: Option<TcpStream>,
    torn_down: bool,
}

impl Connection {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        log::info!("Connecting to {}...", addr);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| LinkError::ConnectionFailure(format!("connect to {} timed out", addr)))?
            .map_err(|e| LinkError::ConnectionFailure(format!("connect to {}: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| LinkError::ConnectionFailure(format!("set_nodelay: {}", e)))?;
        let peer = stream
            .peer_addr()
            .map_err(|e| LinkError::ConnectionFailure(format!("peer_addr: {}", e)))?;

        log::info!("Connected to {}", peer);
        Ok(Self {
            peer,
            stream: Some(stream),
            torn_down: false,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Hand the two halves to the transfer loops.
    pub fn split(&mut self) -> Option<(OwnedReadHalf, OwnedWriteHalf)> {
        self.stream.take().map(TcpStream::into_split)
    }

    /// Take the halves back from the loops so teardown can shut the socket.
    pub fn rejoin(&mut self, reader: OwnedReadHalf, writer: OwnedWriteHalf) {
        match reader.reunite(writer) {
            Ok(stream) => self.stream = Some(stream),
            Err(e) => log::warn!("Socket halves do not match: {}", e),
        }
    }

    /// Stop the session and close the socket. Only the first call does
    /// anything; it returns whether this call tore the connection down.
    pub async fn teardown(&mut self, session: &SessionState) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;
        session.stop();

        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                log::debug!("Socket shutdown: {}", e);
            }
        }
        log::info!("Connection to {} closed", self.peer);
        true
    }
}

/// How one session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The controller closed the connection or a socket operation failed.
    Closed,
    /// Local shutdown was requested.
    Shutdown,
}

/// Connection supervisor: connects, runs upload and download against one
/// connection, tears it down and, when configured, reconnects.
pub struct NetLink {
    config: Config,
    capture: Option<Box<dyn CaptureDevice>>,
    player: SharedPlayer,
    route: Arc<dyn AudioRoute>,
    store: Arc<dyn ClipStore>,
    stats: Arc<TransferStats>,
    connected: watch::Sender<bool>,
    shutdown: watch::Receiver<bool>,
}

impl NetLink {
    pub fn new(
        config: Config,
        capture: Box<dyn CaptureDevice>,
        player: SharedPlayer,
        route: Arc<dyn AudioRoute>,
        store: Arc<dyn ClipStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            capture: Some(capture),
            player,
            route,
            store,
            stats: Arc::new(TransferStats::default()),
            connected: watch::Sender::new(false),
            shutdown,
        }
    }

    /// Byte counters, cumulative across sessions.
    pub fn stats(&self) -> Arc<TransferStats> {
        self.stats.clone()
    }

    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub async fn run(mut self) -> Result<()> {
        // exponential backoff between attempts
        let mut retry_delay = Duration::from_secs(1);
        loop {
            let result = self.run_session().await;
            self.connected.send_replace(false);

            match result {
                Ok(SessionOutcome::Shutdown) => return Ok(()),
                Ok(SessionOutcome::Closed) => {
                    if !self.config.reconnect {
                        return Ok(());
                    }
                    retry_delay = Duration::from_secs(1);
                    log::info!("Session ended, reconnecting in {}s...", retry_delay.as_secs());
                }
                Err(e) => {
                    if !(self.config.reconnect && e.is_retryable()) {
                        return Err(e);
                    }
                    log::warn!(
                        "Connection error: {}. Retrying in {}s...",
                        e,
                        retry_delay.as_secs()
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(retry_delay) => {}
                Ok(_) = self.shutdown.wait_for(|s| *s) => return Ok(()),
            }
            retry_delay = (retry_delay * 2).min(self.config.max_retry_delay);
        }
    }

    async fn run_session(&mut self) -> Result<SessionOutcome> {
        let connect = Connection::connect(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout,
        );
        let mut connection = tokio::select! {
            c = connect => c?,
            Ok(_) = self.shutdown.wait_for(|s| *s) => return Ok(SessionOutcome::Shutdown),
        };
        let capture = self
            .capture
            .take()
            .ok_or_else(|| LinkError::CaptureFailure("capture device unavailable".to_string()))?;
        let (reader, writer) = connection
            .split()
            .ok_or_else(|| LinkError::ConnectionFailure("connection already in use".to_string()))?;

        let session = Arc::new(SessionState::new(self.stats.clone()));
        let controller = Arc::new(PlaybackController::new(
            session.clone(),
            self.player.clone(),
            self.route.clone(),
            self.config.settle_delay,
        ));
        self.connected.send_replace(true);

        let upload = tokio::spawn(
            UploadLoop::new(
                session.clone(),
                capture,
                writer,
                UploadSettings::from_config(&self.config),
            )
            .run(),
        );
        let download = tokio::spawn(
            DownloadLoop::new(
                session.clone(),
                reader,
                self.store.clone(),
                controller,
                DownloadSettings::from_config(&self.config),
            )
            .run(),
        );

        let mut outcome = SessionOutcome::Closed;
        tokio::select! {
            _ = session.stopped() => {}
            Ok(_) = self.shutdown.wait_for(|s| *s) => {
                log::info!("Shutdown requested, stopping session");
                outcome = SessionOutcome::Shutdown;
                session.stop();
            }
        }

        let (upload, download) = tokio::join!(upload, download);
        let result = match (upload, download) {
            (Ok(upload), Ok(download)) => {
                self.capture = upload.capture;
                connection.rejoin(download.reader, upload.writer);
                upload.result
            }
            (Ok(upload), Err(e)) => {
                self.capture = upload.capture;
                Err(LinkError::ConnectionFailure(format!("download task failed: {}", e)))
            }
            (Err(e), _) => Err(LinkError::CaptureFailure(format!("upload task failed: {}", e))),
        };
        connection.teardown(&session).await;

        log::info!(
            "Session finished, total sent: {} bytes, total received: {} bytes",
            self.stats.sent(),
            self.stats.received()
        );

        match result {
            // the socket failing is how a session normally ends
            Err(e) if e.is_retryable() => log::warn!("Upload ended: {}", e),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => log::warn!("Upload ended: {}", e),
            Ok(()) => {}
        }
        if self.capture.is_none() {
            return Err(LinkError::CaptureFailure("capture device lost".to_string()));
        }
        Ok(outcome)
    }
}
