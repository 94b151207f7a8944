//! State shared by the workers of one connection.
//!
//! `running` and the playback state are watch channels so that workers can
//! block on a transition instead of polling a flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

/// Cumulative byte counters. They outlive a single connection and are only
/// read for status reporting.
#[derive(Debug, Default)]
pub struct TransferStats {
    sent: AtomicU64,
    received: AtomicU64,
}

impl TransferStats {
    pub fn add_sent(&self, bytes: usize) {
        self.sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn add_received(&self, bytes: usize) {
        self.received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

pub struct SessionState {
    running: watch::Sender<bool>,
    playback: watch::Sender<PlaybackState>,
    // held by an upload cycle (capture read + socket write) and by playback
    audio_device: Mutex<()>,
    stats: Arc<TransferStats>,
}

impl SessionState {
    pub fn new(stats: Arc<TransferStats>) -> Self {
        let (running, _) = watch::channel(true);
        let (playback, _) = watch::channel(PlaybackState::Idle);
        Self {
            running,
            playback,
            audio_device: Mutex::new(()),
            stats,
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Clear `running`. Returns `true` only for the call that actually
    /// stopped the session, so repeated calls are harmless.
    pub fn stop(&self) -> bool {
        self.running.send_if_modified(|running| {
            if *running {
                *running = false;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once `running` is false.
    pub async fn stopped(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    pub fn playback(&self) -> PlaybackState {
        *self.playback.borrow()
    }

    pub fn set_playback(&self, state: PlaybackState) {
        let prev = self.playback.send_replace(state);
        if prev != state {
            log::debug!("Playback state {:?} -> {:?}", prev, state);
        }
    }

    /// Resolves once the playback state is `Idle`.
    pub async fn wait_idle(&self) {
        let mut rx = self.playback.subscribe();
        let _ = rx.wait_for(|state| *state == PlaybackState::Idle).await;
    }

    pub fn subscribe_playback(&self) -> watch::Receiver<PlaybackState> {
        self.playback.subscribe()
    }

    pub async fn lock_audio_device(&self) -> MutexGuard<'_, ()> {
        self.audio_device.lock().await
    }

    pub fn stats(&self) -> &Arc<TransferStats> {
        &self.stats
    }
}
