use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::audio::{AudioRoute, PlaybackDevice};
use crate::error::{LinkError, Result};
use crate::session::{PlaybackState, SessionState};

pub type SharedPlayer = Arc<Mutex<Box<dyn PlaybackDevice>>>;

/// Hands the audio device from capture to playback for one clip and back.
pub struct PlaybackController {
    session: Arc<SessionState>,
    player: SharedPlayer,
    route: Arc<dyn AudioRoute>,
    settle_delay: Duration,
    // clips between `play` entry and exit; Idle only when this drops to zero
    in_flight: StdMutex<usize>,
}

// Leaves the in-flight count however `play` ends.
struct IdleOnDrop<'a>(&'a PlaybackController);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

// Player routed for playback; dropping releases it and restores capture routing.
struct Engaged<'a> {
    player: MutexGuard<'a, Box<dyn PlaybackDevice>>,
    route: &'a dyn AudioRoute,
}

impl<'a> Engaged<'a> {
    fn new(player: MutexGuard<'a, Box<dyn PlaybackDevice>>, route: &'a dyn AudioRoute) -> Self {
        route.route_to_playback();
        Self { player, route }
    }
}

impl Drop for Engaged<'_> {
    fn drop(&mut self) {
        self.player.release();
        self.route.route_to_capture();
    }
}

impl PlaybackController {
    pub fn new(
        session: Arc<SessionState>,
        player: SharedPlayer,
        route: Arc<dyn AudioRoute>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            session,
            player,
            route,
            settle_delay,
            in_flight: StdMutex::new(0),
        }
    }

    fn enter(&self) {
        let mut n = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        *n += 1;
        self.session.set_playback(PlaybackState::Playing);
    }

    fn leave(&self) {
        let mut n = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        *n = n.saturating_sub(1);
        if *n == 0 {
            self.session.set_playback(PlaybackState::Idle);
        }
    }

    /// Play one clip while upload is paused.
    ///
    /// `Playing` is set before anything else so that no new capture read
    /// starts; the device is engaged only after the upload cycle in flight
    /// has finished. The state returns to `Idle` on success, on failure and
    /// when the session stops mid-clip, once no other clip is waiting.
    pub async fn play(&self, clip: &Path) -> Result<()> {
        self.enter();
        let _idle = IdleOnDrop(self);

        let outcome = tokio::select! {
            r = self.engage_and_play(clip) => r,
            _ = self.session.stopped() => {
                log::info!("Session stopped, abandoning clip {}", clip.display());
                Ok(())
            }
        };

        outcome.map_err(|e| {
            log::error!("Playback of {} failed: {:#}", clip.display(), e);
            LinkError::PlaybackFailure(format!("{:#}", e))
        })
    }

    async fn engage_and_play(&self, clip: &Path) -> anyhow::Result<()> {
        let _device = self.session.lock_audio_device().await;
        let mut engaged = Engaged::new(self.player.lock().await, self.route.as_ref());

        engaged.player.prepare(clip).await?;
        // let the route settle before audio starts
        tokio::time::sleep(self.settle_delay).await;
        log::info!("Playing clip {}", clip.display());
        engaged.player.play().await?;
        log::info!("Clip finished {}", clip.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{LoggingRoute, RouteEvent};
    use crate::session::TransferStats;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Prepare(PathBuf, PlaybackState),
        Play(PlaybackState),
        Release,
    }

    struct FakePlayer {
        session: Arc<SessionState>,
        calls: Arc<StdMutex<Vec<Call>>>,
        fail_prepare: bool,
        play_time: Duration,
    }

    #[async_trait]
    impl PlaybackDevice for FakePlayer {
        async fn prepare(&mut self, clip: &Path) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Prepare(clip.to_path_buf(), self.session.playback()));
            if self.fail_prepare {
                anyhow::bail!("device busy");
            }
            Ok(())
        }

        async fn play(&mut self) -> anyhow::Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Play(self.session.playback()));
            tokio::time::sleep(self.play_time).await;
            Ok(())
        }

        fn release(&mut self) {
            self.calls.lock().unwrap().push(Call::Release);
        }
    }

    struct Harness {
        session: Arc<SessionState>,
        calls: Arc<StdMutex<Vec<Call>>>,
        routes: mpsc::Receiver<RouteEvent>,
        controller: Arc<PlaybackController>,
    }

    fn harness(fail_prepare: bool, play_time: Duration) -> Harness {
        let session = Arc::new(SessionState::new(Arc::new(TransferStats::default())));
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let player: Box<dyn PlaybackDevice> = Box::new(FakePlayer {
            session: session.clone(),
            calls: calls.clone(),
            fail_prepare,
            play_time,
        });
        let (tx, routes) = mpsc::channel(16);
        let controller = Arc::new(PlaybackController::new(
            session.clone(),
            Arc::new(Mutex::new(player)),
            Arc::new(LoggingRoute::with_listener(tx)),
            Duration::from_millis(5),
        ));
        Harness {
            session,
            calls,
            routes,
            controller,
        }
    }

    #[tokio::test]
    async fn plays_while_gated_then_returns_to_idle() {
        let mut h = harness(false, Duration::from_millis(10));
        h.controller.play(Path::new("clip.wav")).await.unwrap();

        assert_eq!(h.session.playback(), PlaybackState::Idle);
        let calls = h.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                Call::Prepare(PathBuf::from("clip.wav"), PlaybackState::Playing),
                Call::Play(PlaybackState::Playing),
                Call::Release,
            ]
        );
        assert_eq!(h.routes.try_recv().unwrap(), RouteEvent::Playback);
        assert_eq!(h.routes.try_recv().unwrap(), RouteEvent::Capture);
    }

    #[tokio::test]
    async fn prepare_failure_still_returns_to_idle() {
        let mut h = harness(true, Duration::ZERO);
        let err = h.controller.play(Path::new("bad.wav")).await.unwrap_err();
        assert!(matches!(err, LinkError::PlaybackFailure(_)));
        assert!(!err.is_fatal());

        assert_eq!(h.session.playback(), PlaybackState::Idle);
        let calls = h.calls.lock().unwrap().clone();
        assert_eq!(calls.last(), Some(&Call::Release));
        assert!(!calls.iter().any(|c| matches!(c, Call::Play(_))));
        assert_eq!(h.routes.try_recv().unwrap(), RouteEvent::Playback);
        assert_eq!(h.routes.try_recv().unwrap(), RouteEvent::Capture);
    }

    #[tokio::test]
    async fn waits_for_upload_cycle_in_flight() {
        let h = harness(false, Duration::ZERO);
        let cycle = h.session.lock_audio_device().await;

        let task = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.play(Path::new("clip.wav")).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.session.playback(), PlaybackState::Playing);
        assert!(h.calls.lock().unwrap().is_empty());

        drop(cycle);
        task.await.unwrap().unwrap();
        assert_eq!(h.session.playback(), PlaybackState::Idle);
        assert_eq!(h.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn session_stop_abandons_clip_and_releases() {
        let h = harness(false, Duration::from_secs(30));
        let task = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.play(Path::new("long.wav")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.session.playback(), PlaybackState::Playing);

        h.session.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("play should end with the session")
            .unwrap()
            .unwrap();
        assert_eq!(h.session.playback(), PlaybackState::Idle);
        assert_eq!(h.calls.lock().unwrap().last(), Some(&Call::Release));
    }

    #[tokio::test]
    async fn stays_playing_until_last_queued_clip_finishes() {
        let h = harness(false, Duration::from_millis(80));
        let first = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.play(Path::new("a.wav")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = {
            let controller = h.controller.clone();
            tokio::spawn(async move { controller.play(Path::new("b.wav")).await })
        };

        first.await.unwrap().unwrap();
        assert_eq!(h.session.playback(), PlaybackState::Playing);
        second.await.unwrap().unwrap();
        assert_eq!(h.session.playback(), PlaybackState::Idle);

        let calls = h.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 6);
        let while_idle = |c: &Call| {
            matches!(
                c,
                Call::Prepare(_, PlaybackState::Idle) | Call::Play(PlaybackState::Idle)
            )
        };
        assert!(!calls.iter().any(while_idle));
    }
}
