//! Composition root: owns the shared services and hands out players wired to them.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    ops::Deref,
    rc::{Rc, Weak},
};

use tracing::{debug, info, warn};

use crate::{
    bus::{PlaybackBus, PlayerId},
    config::PreviewConfig,
    context::{AudioContextManager, ContextFactory, RodioContextFactory},
    control::{CanvasSlot, PlayButton},
    decode::DecodeCache,
    error::PlayerError,
    gain::{GainMatcher, LoudnessFeed},
    player::{PlayerOptions, PlayerServices, Surfaces, TrackPlayer},
    scheduler::FrameScheduler,
};

pub use crate::player::RetryPolicy;

type Registry = Rc<RefCell<Vec<TrackPlayer>>>;

/// A player handed to the host. Dereferences to the player; `destroy` also unregisters it.
#[derive(Clone)]
pub struct PlayerHandle {
    player: TrackPlayer,
    registry: Weak<RefCell<Vec<TrackPlayer>>>,
}

impl PlayerHandle {
    pub fn player(&self) -> &TrackPlayer {
        &self.player
    }

    pub fn destroy(&self) {
        self.player.destroy();
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().retain(|p| p.id() != self.player.id());
        }
    }
}

impl Deref for PlayerHandle {
    type Target = TrackPlayer;

    fn deref(&self) -> &TrackPlayer {
        &self.player
    }
}

/// Tracks whose assets the remote job has finished, and attaches waiting on the rest
#[derive(Default)]
pub struct ReadinessGate {
    ready: RefCell<HashSet<String>>,
    waiting: RefCell<HashMap<String, Vec<Box<dyn FnOnce()>>>>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self, track: &str) -> bool {
        self.ready.borrow().contains(track)
    }

    /// Run `action` now if `track` is ready, otherwise once it becomes ready.
    pub fn when_ready(&self, track: &str, action: Box<dyn FnOnce()>) {
        if self.is_ready(track) {
            action();
        } else {
            self.waiting
                .borrow_mut()
                .entry(track.to_string())
                .or_default()
                .push(action);
        }
    }

    /// Flag `track` ready and run what was waiting on it, in registration order.
    pub fn mark_ready(&self, track: &str) {
        if !self.ready.borrow_mut().insert(track.to_string()) {
            return;
        }
        let waiting = self.waiting.borrow_mut().remove(track).unwrap_or_default();
        debug!(track, waiting = waiting.len(), "track ready");
        for action in waiting {
            action();
        }
    }
}

pub struct PreviewEngine {
    config: PreviewConfig,
    services: PlayerServices,
    frames: Rc<FrameScheduler>,
    readiness: ReadinessGate,
    players: Registry,
    next_id: Cell<PlayerId>,
}

impl PreviewEngine {
    /// Engine on the default output device, fetching over HTTP or from disk.
    pub fn with_defaults(config: PreviewConfig) -> Self {
        Self::new(
            config,
            Box::new(RodioContextFactory),
            DecodeCache::with_defaults(),
        )
    }

    pub fn new(config: PreviewConfig, contexts: Box<dyn ContextFactory>, cache: DecodeCache) -> Self {
        let gains = GainMatcher::new(config.gain_matching);
        gains.set_feed(LoudnessFeed {
            reference_lufs: config.reference_lufs,
            ..LoudnessFeed::default()
        });
        Self::with_services(
            config,
            Rc::new(AudioContextManager::new(contexts)),
            Rc::new(cache),
            Rc::new(PlaybackBus::new()),
            Rc::new(gains),
            Rc::new(FrameScheduler::new()),
        )
    }

    pub fn with_services(
        config: PreviewConfig,
        contexts: Rc<AudioContextManager>,
        cache: Rc<DecodeCache>,
        bus: Rc<PlaybackBus>,
        gains: Rc<GainMatcher>,
        frames: Rc<FrameScheduler>,
    ) -> Self {
        let services = PlayerServices {
            contexts,
            cache,
            bus,
            gains,
            scheduler: frames.clone(),
        };
        PreviewEngine {
            config,
            services,
            frames,
            readiness: ReadinessGate::new(),
            players: Rc::new(RefCell::new(Vec::new())),
            next_id: Cell::new(1),
        }
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    pub fn bus(&self) -> &PlaybackBus {
        &self.services.bus
    }

    pub fn cache(&self) -> &DecodeCache {
        &self.services.cache
    }

    pub fn contexts(&self) -> &AudioContextManager {
        &self.services.contexts
    }

    pub fn gains(&self) -> &GainMatcher {
        &self.services.gains
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.frames
    }

    fn options(&self, track_id: &str, retry: RetryPolicy) -> PlayerOptions {
        PlayerOptions {
            track_id: track_id.to_string(),
            fallback_url: None,
            retry,
            fft_size: self.config.fft_size,
            smoothing: self.config.smoothing,
            peak_decay: self.config.peak_decay,
            hotspot_threshold_db: Some(self.config.true_peak_threshold_db),
        }
    }

    fn build(&self, surfaces: Surfaces, options: PlayerOptions) -> PlayerHandle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let player = TrackPlayer::new(id, self.services.clone(), surfaces, options);
        self.players.borrow_mut().push(player.clone());
        PlayerHandle {
            player,
            registry: Rc::downgrade(&self.players),
        }
    }

    /// A player for `url` keyed by the URL itself in the loudness feed.
    pub fn attach_player(
        &self,
        button: PlayButton,
        waveform: CanvasSlot,
        spectrum: Option<CanvasSlot>,
        url: &str,
    ) -> PlayerHandle {
        let surfaces = Surfaces {
            button,
            waveform,
            spectrum,
            ribbon: None,
        };
        self.attach_track(url, surfaces, url)
    }

    /// A player for `url`, gain-matched by `track_id`. Decoding starts immediately.
    pub fn attach_track(&self, track_id: &str, surfaces: Surfaces, url: &str) -> PlayerHandle {
        let handle = self.build(surfaces, self.options(track_id, RetryPolicy::default()));
        match handle.attach(url) {
            Ok(()) => info!(id = handle.id(), track_id, url, "player attached"),
            Err(err) => warn!(track_id, error = %err, "attach rejected"),
        }
        handle
    }

    /// Like `attach_track`, but nothing is fetched until `mark_ready(track_id)`. Failed
    /// decodes are retried per the configured policy.
    pub fn attach_when_ready(
        &self,
        track_id: &str,
        surfaces: Surfaces,
        url: &str,
    ) -> PlayerHandle {
        let retry = RetryPolicy {
            attempts: self.config.retry_attempts,
            delay_frames: self.config.retry_delay_frames,
        };
        let handle = self.build(surfaces, self.options(track_id, retry));
        let player = handle.player.clone();
        let url = url.to_string();
        let track = track_id.to_string();
        self.readiness.when_ready(
            track_id,
            Box::new(move || match player.attach(&url) {
                Ok(()) => info!(id = player.id(), track = %track, url = %url, "ready track attached"),
                Err(PlayerError::Destroyed) => debug!(track = %track, "player gone before ready"),
                Err(err) => warn!(track = %track, error = %err, "attach rejected"),
            }),
        );
        handle
    }

    pub fn mark_ready(&self, track_id: &str) {
        self.readiness.mark_ready(track_id);
    }

    pub fn is_ready(&self, track_id: &str) -> bool {
        self.readiness.is_ready(track_id)
    }

    pub fn players(&self) -> Vec<TrackPlayer> {
        self.players.borrow().clone()
    }

    /// New loudness feed: recompute gains and apply them to whatever is sounding.
    pub fn set_loudness_feed(&self, feed: LoudnessFeed) {
        self.services.gains.set_feed(feed);
        self.refresh_gains();
    }

    pub fn set_gain_matching(&self, enabled: bool) {
        self.services.gains.set_enabled(enabled);
        self.refresh_gains();
        info!(enabled, "gain matching");
    }

    pub fn gain_matching(&self) -> bool {
        self.services.gains.is_enabled()
    }

    fn refresh_gains(&self) {
        for player in self.players() {
            player.refresh_gain();
        }
    }

    /// Host hidden or lost focus: silence everything.
    pub fn stop_all(&self) {
        self.services.bus.stop_all();
    }

    /// Deliver finished decodes, then run one scheduler frame. Call once per host frame.
    pub fn frame(&self) -> usize {
        self.services.cache.pump() + self.frames.run_frame()
    }
}

impl Drop for PreviewEngine {
    fn drop(&mut self) {
        for player in self.players.borrow_mut().drain(..) {
            player.destroy();
        }
        self.services.contexts.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_runs_waiters_once_in_order() {
        let gate = ReadinessGate::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let log = Rc::clone(&log);
            gate.when_ready("club", Box::new(move || log.borrow_mut().push(n)));
        }
        assert!(log.borrow().is_empty());
        gate.mark_ready("club");
        gate.mark_ready("club");
        assert_eq!(*log.borrow(), vec![0, 1, 2]);

        let log2 = Rc::clone(&log);
        gate.when_ready("club", Box::new(move || log2.borrow_mut().push(9)));
        assert_eq!(log.borrow().last(), Some(&9));
        assert!(!gate.is_ready("stream"));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut out) = self.0.lock() {
                out.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn attach_logs_one_outcome() {
        use std::sync::Arc;

        use crate::{
            decode::{InlineSpawner, SymphoniaDecoder},
            testing::{ManualContext, ManualContextFactory, StaticFetcher},
        };

        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let factory = ManualContextFactory::new(Rc::new(ManualContext::new()));
            let cache = DecodeCache::new(
                Arc::new(StaticFetcher::new()),
                Arc::new(SymphoniaDecoder),
                Box::new(InlineSpawner),
            );
            let engine = PreviewEngine::new(PreviewConfig::default(), Box::new(factory), cache);
            let surfaces = Surfaces {
                button: PlayButton::new(),
                waveform: CanvasSlot::new(8, 8),
                spectrum: None,
                ribbon: None,
            };
            engine.attach_track("a", surfaces, "a.wav");
        });

        let logged = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logged.matches("player attached").count(), 1);
        assert!(!logged.contains("attach rejected"));
    }
}
