//! Microphone upload: fixed-size PCM chunks written verbatim to the socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::audio::CaptureDevice;
use crate::config::Config;
use crate::error::{LinkError, Result};
use crate::session::{PlaybackState, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Capturing,
    Paused,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub chunk_bytes: usize,
    pub restart_cooldown: Duration,
    /// Capture restarts allowed between two successful reads.
    pub max_restarts: u32,
}

impl UploadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_bytes: config.chunk_bytes,
            restart_cooldown: config.capture_restart_cooldown,
            max_restarts: config.capture_max_restarts,
        }
    }
}

/// What a finished upload loop hands back to the supervisor.
pub struct UploadOutcome<W> {
    pub capture: Option<Box<dyn CaptureDevice>>,
    pub writer: W,
    pub result: Result<()>,
}

pub struct UploadLoop<W> {
    session: Arc<SessionState>,
    capture: Option<Box<dyn CaptureDevice>>,
    writer: W,
    settings: UploadSettings,
    state: UploadState,
}

impl<W: AsyncWrite + Unpin + Send> UploadLoop<W> {
    pub fn new(
        session: Arc<SessionState>,
        capture: Box<dyn CaptureDevice>,
        writer: W,
        settings: UploadSettings,
    ) -> Self {
        Self {
            session,
            capture: Some(capture),
            writer,
            settings,
            state: UploadState::Idle,
        }
    }

    /// Run until the session stops or capture/write fails for good.
    ///
    /// The capture device is stopped on the way out and returned together
    /// with the socket half; the socket itself is left to the supervisor.
    pub async fn run(mut self) -> UploadOutcome<W> {
        let result = self.pump().await;
        match &result {
            Ok(()) => log::info!("Upload loop finished"),
            Err(e) => log::error!("Upload loop stopped: {}", e),
        }

        self.set_state(UploadState::Stopped);
        if let Some(capture) = self.capture.as_mut() {
            capture.stop_capture();
        }
        self.session.stop();

        log::info!("Upload total sent: {} bytes", self.session.stats().sent());
        UploadOutcome {
            capture: self.capture,
            writer: self.writer,
            result,
        }
    }

    fn set_state(&mut self, state: UploadState) {
        if self.state != state {
            log::debug!("Upload {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    async fn pump(&mut self) -> Result<()> {
        let session = self.session.clone();
        self.capture_device()?
            .start_capture()
            .map_err(|e| LinkError::CaptureFailure(format!("{:#}", e)))?;
        self.set_state(UploadState::Capturing);
        log::info!("Streaming microphone audio, chunk={} bytes", self.settings.chunk_bytes);

        let mut buf = vec![0u8; self.settings.chunk_bytes];
        let mut failures = 0u32;

        loop {
            if !session.is_running() {
                return Ok(());
            }

            if session.playback() == PlaybackState::Playing {
                self.set_state(UploadState::Paused);
                tokio::select! {
                    _ = session.wait_idle() => {}
                    _ = session.stopped() => return Ok(()),
                }
                continue;
            }
            self.set_state(UploadState::Capturing);

            // One cycle (read + write) holds the audio device
            let device = session.lock_audio_device().await;
            if session.playback() == PlaybackState::Playing {
                continue;
            }

            let (read, returned) = self.read_chunk(buf).await?;
            buf = returned;

            let n = match read {
                Ok(n) if n > 0 => n,
                Ok(_) => {
                    drop(device);
                    failures += 1;
                    self.recover(failures, "zero-length read".to_string()).await?;
                    continue;
                }
                Err(e) => {
                    drop(device);
                    failures += 1;
                    self.recover(failures, format!("{:#}", e)).await?;
                    continue;
                }
            };
            failures = 0;

            tokio::select! {
                r = self.writer.write_all(&buf[..n]) => {
                    r.map_err(|e| LinkError::ConnectionFailure(format!("socket write: {}", e)))?;
                }
                _ = session.stopped() => return Ok(()),
            }
            drop(device);
            session.stats().add_sent(n);
        }
    }

    fn capture_device(&mut self) -> Result<&mut Box<dyn CaptureDevice>> {
        self.capture
            .as_mut()
            .ok_or_else(|| LinkError::CaptureFailure("capture device lost".to_string()))
    }

    /// Blocking capture read, run on the blocking pool.
    async fn read_chunk(&mut self, mut buf: Vec<u8>) -> Result<(anyhow::Result<usize>, Vec<u8>)> {
        let mut capture = self
            .capture
            .take()
            .ok_or_else(|| LinkError::CaptureFailure("capture device lost".to_string()))?;

        let (capture, buf, read) = tokio::task::spawn_blocking(move || {
            let read = capture.read_chunk(&mut buf);
            (capture, buf, read)
        })
        .await
        .map_err(|e| LinkError::CaptureFailure(format!("capture task failed: {}", e)))?;

        self.capture = Some(capture);
        Ok((read, buf))
    }

    /// Bounded recovery: stop and restart capture after the cooldown.
    async fn recover(&mut self, failures: u32, reason: String) -> Result<()> {
        if failures > self.settings.max_restarts {
            return Err(LinkError::CaptureFailure(format!(
                "{} consecutive failed reads, last: {}",
                failures, reason
            )));
        }

        // 录音异常，等待冷却后重新开始采集
        log::warn!(
            "Capture read failed ({}), restarting capture in {:?}",
            reason,
            self.settings.restart_cooldown
        );
        tokio::select! {
            _ = tokio::time::sleep(self.settings.restart_cooldown) => {}
            _ = self.session.stopped() => return Ok(()),
        }

        let capture = self.capture_device()?;
        capture.stop_capture();
        capture
            .start_capture()
            .map_err(|e| LinkError::CaptureFailure(format!("restart failed: {:#}", e)))?;
        log::info!("Capture restarted");
        Ok(())
    }
}
