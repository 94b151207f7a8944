//! Clip download: probe for the start marker, assemble the frame as hex text,
//! decode it, store it as a clip file and hand it to playback.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;

use crate::clip_store::ClipStore;
use crate::config::Config;
use crate::controller::PlaybackController;
use crate::error::Result;
use crate::hex_codec;
use crate::protocol::{Feed, FrameDetector, PROBE_LEN};
use crate::session::SessionState;

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub read_chunk_bytes: usize,
    pub max_payload_bytes: usize,
}

impl DownloadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            read_chunk_bytes: config.read_chunk_bytes,
            max_payload_bytes: config.max_payload_bytes,
        }
    }
}

pub struct DownloadOutcome<R> {
    pub reader: R,
    /// Clips stored during the session.
    pub clips: usize,
}

pub struct DownloadLoop<R> {
    session: Arc<SessionState>,
    reader: R,
    detector: FrameDetector,
    // bytes that followed an end marker, consumed before the socket
    pending: Vec<u8>,
    store: Arc<dyn ClipStore>,
    controller: Arc<PlaybackController>,
    read_chunk_bytes: usize,
    playbacks: JoinSet<()>,
    clips: usize,
}

impl<R: AsyncRead + Unpin + Send> DownloadLoop<R> {
    pub fn new(
        session: Arc<SessionState>,
        reader: R,
        store: Arc<dyn ClipStore>,
        controller: Arc<PlaybackController>,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            session,
            reader,
            detector: FrameDetector::new(settings.max_payload_bytes),
            pending: Vec::new(),
            store,
            controller,
            read_chunk_bytes: settings.read_chunk_bytes.max(1),
            playbacks: JoinSet::new(),
            clips: 0,
        }
    }

    /// Run until the stream ends, a read fails or the session stops.
    ///
    /// End of stream and read errors are the normal way a session ends here;
    /// either way `running` is cleared and clips still playing are waited for.
    pub async fn run(mut self) -> DownloadOutcome<R> {
        let session = self.session.clone();
        tokio::select! {
            r = self.receive() => match r {
                Ok(()) => log::info!("Controller closed the connection"),
                Err(e) => log::warn!("Connection lost: {}", e),
            },
            _ = session.stopped() => log::info!("Download loop stopped"),
        }

        if self.detector.in_frame() {
            log::warn!(
                "Discarding partial frame ({} hex chars buffered)",
                self.detector.buffered_len()
            );
        }
        self.detector.reset();
        session.stop();

        // playback abandons its clip once the session is stopped
        while self.playbacks.join_next().await.is_some() {}

        log::info!(
            "Download loop finished, {} clips, total received: {} bytes",
            self.clips,
            session.stats().received()
        );
        DownloadOutcome {
            reader: self.reader,
            clips: self.clips,
        }
    }

    async fn receive(&mut self) -> io::Result<()> {
        let mut probe = [0u8; PROBE_LEN];
        let mut chunk = vec![0u8; self.read_chunk_bytes];

        loop {
            while self.playbacks.try_join_next().is_some() {}

            if !self.read_probe(&mut probe).await? {
                return Ok(());
            }
            if !self.detector.probe(&probe) {
                // keep-alives and stray bytes between frames
                continue;
            }
            log::info!("Start marker received, assembling clip");

            loop {
                let n = self.next_bytes(&mut chunk).await?;
                if n == 0 {
                    return Ok(());
                }
                match self.detector.feed(&chunk[..n]) {
                    Ok(Feed::Pending) => {}
                    Ok(Feed::Complete(extraction)) => {
                        self.push_back(extraction.trailing);
                        self.deliver(&extraction.payload_hex).await;
                        break;
                    }
                    Ok(Feed::Resynced(trailing)) => {
                        log::info!("End of dropped frame reached");
                        self.push_back(trailing);
                        break;
                    }
                    Err(e) => {
                        log::warn!("Dropping frame: {}", e);
                        // an oversized frame is skipped up to its end marker
                        if !self.detector.in_frame() {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Fill the probe window. `false` means the stream ended first.
    async fn read_probe(&mut self, probe: &mut [u8; PROBE_LEN]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < PROBE_LEN {
            let n = self.next_bytes(&mut probe[filled..]).await?;
            if n == 0 {
                return Ok(false);
            }
            filled += n;
        }
        Ok(true)
    }

    // Bytes read past an end marker go in front of anything still pending.
    fn push_back(&mut self, mut bytes: Vec<u8>) {
        bytes.append(&mut self.pending);
        self.pending = bytes;
    }

    async fn next_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            return self.reader.read(buf).await;
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    async fn deliver(&mut self, payload_hex: &str) {
        let bytes = match hex_codec::decode(payload_hex) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Dropping frame: {}", e);
                return;
            }
        };

        let path = match self.save_clip(&bytes).await {
            Ok(path) => path,
            Err(e) => {
                log::error!("Failed to store clip ({} bytes): {}", bytes.len(), e);
                return;
            }
        };
        self.clips += 1;
        self.session.stats().add_received(bytes.len());
        log::info!("Clip received: {} ({} bytes)", path.display(), bytes.len());

        let controller = self.controller.clone();
        self.playbacks.spawn(async move {
            if let Err(e) = controller.play(&path).await {
                log::warn!("Clip {} not played: {}", path.display(), e);
            }
        });
    }

    async fn save_clip(&self, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.store.create_unique_file().await?;
        if let Err(e) = self.store.write(&path, bytes).await {
            if let Err(rm) = self.store.remove(&path).await {
                log::warn!("Failed to remove incomplete clip {}: {}", path.display(), rm);
            }
            return Err(e);
        }
        Ok(path)
    }
}
