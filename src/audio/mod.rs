//! audio - Capture and playback collaborators
//!
//! The connector only sees three capabilities: a capture device producing
//! PCM chunks, a playback device consuming a clip file, and an audio route
//! that is switched between the two.
//!
//! Backends: `ReaderCapture` (PCM from any reader, e.g. stdin) and
//! `CommandPlayer` (external player process) are always available; with the
//! `alsa` feature, `AlsaCapture` and `AlsaPlayer` talk to ALSA directly.

#[cfg(feature = "alsa")]
mod alsa_device;
mod play;
mod record;

#[cfg(feature = "alsa")]
pub use alsa_device::{AlsaCapture, AlsaPlayer};
pub use play::CommandPlayer;
pub use record::ReaderCapture;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

/// Blocking PCM source. Reads are run off the async runtime.
pub trait CaptureDevice: Send {
    fn start_capture(&mut self) -> Result<()>;

    /// Fill `buf` with PCM bytes, returning how many were written.
    /// Zero means the read failed to produce audio.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn stop_capture(&mut self);
}

#[async_trait]
pub trait PlaybackDevice: Send {
    /// Load a clip. Resolves once the device is ready to start.
    async fn prepare(&mut self, clip: &Path) -> Result<()>;

    /// Play the prepared clip. Resolves on completion.
    async fn play(&mut self) -> Result<()>;

    fn release(&mut self);
}

/// Route switches reported to an optional listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEvent {
    Playback,
    Capture,
}

pub trait AudioRoute: Send + Sync {
    /// Leave capture-oriented routing and select playback output.
    fn route_to_playback(&self);

    /// Restore capture-oriented routing.
    fn route_to_capture(&self);
}

/// Route that only logs, forwarding each switch to a listener if one is set.
#[derive(Default)]
pub struct LoggingRoute {
    listener: Option<mpsc::Sender<RouteEvent>>,
}

impl LoggingRoute {
    pub fn new() -> Self {
        Self { listener: None }
    }

    pub fn with_listener(listener: mpsc::Sender<RouteEvent>) -> Self {
        Self {
            listener: Some(listener),
        }
    }

    fn notify(&self, event: RouteEvent) {
        if let Some(tx) = &self.listener {
            if let Err(e) = tx.try_send(event) {
                log::debug!("Route listener dropped {:?}: {}", event, e);
            }
        }
    }
}

impl AudioRoute for LoggingRoute {
    fn route_to_playback(&self) {
        log::info!("Audio route -> playback");
        self.notify(RouteEvent::Playback);
    }

    fn route_to_capture(&self) {
        log::info!("Audio route -> capture");
        self.notify(RouteEvent::Capture);
    }
}
