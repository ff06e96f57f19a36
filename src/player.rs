//! One track card: decode its asset, draw it, and play/pause/seek it on the shared device.
//!
//! Everything here runs on the host thread. Decode results arrive from `DecodeCache::pump`,
//! playhead ticks from the `Scheduler`, and exclusivity is arbitrated by the `PlaybackBus`.

use std::{cell::RefCell, rc::Rc, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    analyser::Analyser,
    bus::{BusMember, PlaybackBus, PlayerId},
    canvas::Canvas,
    context::{AudioContext, AudioContextManager, ContextState},
    control::{CanvasSlot, PREVIEW_UNAVAILABLE, PlayButton},
    decode::{AudioAsset, DecodeCache, DecodeResult},
    error::{DecodeError, GraphError, PlayerError, Result},
    fallback,
    gain::GainMatcher,
    playback::{PlaybackCapability, select_capability},
    render::{self, Envelope, PeakHold, Playhead, SpectrumSnapshot},
    scheduler::{CancelToken, Scheduler, after_frames},
};

/// Ticks this close to the end count as the end
const END_EPSILON: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Ready,
    Playing {
        device_start_time: f64,
        offset: f64,
        generation: u64,
    },
    Paused {
        offset: f64,
    },
    Ended,
    Error {
        reason: String,
    },
}

impl PlaybackState {
    pub fn status(&self) -> PlaybackStatus {
        match self {
            PlaybackState::Idle => PlaybackStatus::Idle,
            PlaybackState::Loading => PlaybackStatus::Loading,
            PlaybackState::Ready => PlaybackStatus::Ready,
            PlaybackState::Playing { .. } => PlaybackStatus::Playing,
            PlaybackState::Paused { .. } => PlaybackStatus::Paused,
            PlaybackState::Ended => PlaybackStatus::Ended,
            PlaybackState::Error { .. } => PlaybackStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    Error,
}

/// Read-only view of a player
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub status: PlaybackStatus,
    /// Resume position in seconds
    pub offset_seconds: f64,
    /// Context time the current run started, only while playing
    pub device_start_time: Option<f64>,
    pub duration: f64,
    pub url: Option<String>,
    pub playhead_column: Option<u32>,
    pub error: Option<String>,
}

/// Extra decode attempts after the preview and its fallback both failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_frames: u32,
}

/// Engine services a player is wired to
#[derive(Clone)]
pub struct PlayerServices {
    pub contexts: Rc<AudioContextManager>,
    pub cache: Rc<DecodeCache>,
    pub bus: Rc<PlaybackBus>,
    pub gains: Rc<GainMatcher>,
    pub scheduler: Rc<dyn Scheduler>,
}

/// Host-owned surfaces the player draws into
#[derive(Debug, Clone)]
pub struct Surfaces {
    pub button: PlayButton,
    pub waveform: CanvasSlot,
    pub spectrum: Option<CanvasSlot>,
    pub ribbon: Option<CanvasSlot>,
}

#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Key into the loudness feed
    pub track_id: String,
    /// Tried once when the main URL fails. Preview URLs fall back to their full file even
    /// when this is unset.
    pub fallback_url: Option<String>,
    pub retry: RetryPolicy,
    pub fft_size: usize,
    pub smoothing: f32,
    pub peak_decay: f32,
    /// Mark columns above this level; `None` disables the belt
    pub hotspot_threshold_db: Option<f32>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        PlayerOptions {
            track_id: String::new(),
            fallback_url: None,
            retry: RetryPolicy::default(),
            fft_size: crate::analyser::DEFAULT_FFT_SIZE,
            smoothing: crate::analyser::DEFAULT_SMOOTHING,
            peak_decay: render::DEFAULT_PEAK_DECAY,
            hotspot_threshold_db: Some(-1.5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// User pause: keep the elapsed position
    Pause,
    /// Another player took the bus
    Yield,
    /// Natural end: rewind
    Ended,
    Destroy,
}

enum AfterFailure {
    Fallback(String),
    Retry(String),
    Fail,
}

struct Core {
    state: PlaybackState,
    /// Authoritative resume position, seconds
    offset: f64,
    destroyed: bool,
    observing_resize: bool,
    primary_url: String,
    url: Option<String>,
    tried_fallback: bool,
    retries_left: u32,
    asset: Option<Arc<AudioAsset>>,
    envelope: Option<Envelope>,
    playback: Box<dyn PlaybackCapability>,
    analyser: Option<Analyser>,
    spectrum_bins: Vec<u8>,
    peaks: PeakHold,
    playhead: Playhead,
    generation: u64,
    tick: Option<CancelToken>,
}

impl Core {
    fn duration(&self) -> f64 {
        self.asset.as_ref().map(|a| a.duration()).unwrap_or(0.0)
    }

    fn progress(&self) -> f64 {
        let duration = self.duration();
        if duration > 0.0 {
            self.offset / duration
        } else {
            0.0
        }
    }
}

struct Shared {
    id: PlayerId,
    services: PlayerServices,
    surfaces: Surfaces,
    options: PlayerOptions,
    core: RefCell<Core>,
}

/// Cheap handle to one track player
#[derive(Clone)]
pub struct TrackPlayer {
    shared: Rc<Shared>,
}

impl TrackPlayer {
    pub fn new(
        id: PlayerId,
        services: PlayerServices,
        surfaces: Surfaces,
        options: PlayerOptions,
    ) -> Self {
        let playback = select_capability(services.contexts.supports_buffer_graphs());
        let core = Core {
            state: PlaybackState::Idle,
            offset: 0.0,
            destroyed: false,
            observing_resize: true,
            primary_url: String::new(),
            url: None,
            tried_fallback: false,
            retries_left: 0,
            asset: None,
            envelope: None,
            playback,
            analyser: None,
            spectrum_bins: Vec::new(),
            peaks: PeakHold::new(options.peak_decay),
            playhead: Playhead::default(),
            generation: 0,
            tick: None,
        };
        surfaces.button.set_enabled(false);
        surfaces.button.set_pressed(false);
        TrackPlayer {
            shared: Rc::new(Shared {
                id,
                services,
                surfaces,
                options,
                core: RefCell::new(core),
            }),
        }
    }

    pub fn id(&self) -> PlayerId {
        self.shared.id
    }

    pub fn track_id(&self) -> &str {
        &self.shared.options.track_id
    }

    pub fn surfaces(&self) -> &Surfaces {
        &self.shared.surfaces
    }

    pub fn status(&self) -> PlaybackStatus {
        self.shared.core.borrow().state.status()
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.core.borrow().state.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.core.borrow().destroyed
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let core = self.shared.core.borrow();
        let (device_start_time, offset_seconds) = match core.state {
            PlaybackState::Playing {
                device_start_time,
                offset,
                ..
            } => (Some(device_start_time), offset),
            _ => (None, core.offset),
        };
        PlaybackSnapshot {
            status: core.state.status(),
            offset_seconds,
            device_start_time,
            duration: core.duration(),
            url: core.url.clone(),
            playhead_column: core.playhead.last_x(),
            error: match &core.state {
                PlaybackState::Error { reason } => Some(reason.clone()),
                _ => None,
            },
        }
    }

    /// Live position in seconds, following the device clock while playing.
    pub fn position(&self) -> f64 {
        let core = self.shared.core.borrow();
        match core.state {
            PlaybackState::Playing {
                device_start_time,
                offset,
                ..
            } => match self.shared.services.contexts.existing() {
                Some(ctx) => (ctx.current_time() - device_start_time + offset)
                    .clamp(0.0, core.duration()),
                None => offset,
            },
            _ => core.offset,
        }
    }

    fn guard(&self, op: &'static str, allowed: &[PlaybackStatus]) -> Result<PlaybackStatus> {
        let core = self.shared.core.borrow();
        if core.destroyed {
            return Err(PlayerError::Destroyed);
        }
        let status = core.state.status();
        if allowed.contains(&status) {
            Ok(status)
        } else {
            Err(PlayerError::InvalidTransition { op, status })
        }
    }

    /// Start decoding `url`. Drawing and enabling the control happen once it arrives.
    pub fn attach(&self, url: &str) -> Result<()> {
        self.guard("attach", &[PlaybackStatus::Idle])?;
        {
            let mut core = self.shared.core.borrow_mut();
            core.primary_url = url.to_string();
            core.url = Some(url.to_string());
            core.tried_fallback = false;
            core.retries_left = self.shared.options.retry.attempts;
            core.state = PlaybackState::Loading;
        }
        debug!(id = self.id(), url, "attaching");
        Shared::request_decode(&self.shared, url.to_string());
        Ok(())
    }

    pub fn toggle(&self) -> Result<()> {
        use PlaybackStatus::*;
        match self.guard("toggle", &[Ready, Playing, Paused, Ended])? {
            Playing => self.pause(),
            _ => self.play(),
        }
    }

    pub fn play(&self) -> Result<()> {
        use PlaybackStatus::*;
        if self.guard("play", &[Ready, Playing, Paused, Ended])? == Playing {
            return Ok(());
        }
        let ctx = match self.shared.services.contexts.get() {
            Ok(ctx) => ctx,
            Err(err) => {
                self.shared.graph_failed(err);
                return Ok(());
            }
        };
        if ctx.state() == ContextState::Suspended {
            if let Err(err) = ctx.resume() {
                self.shared.graph_failed(err);
                return Ok(());
            }
        }
        {
            let mut core = self.shared.core.borrow_mut();
            if core.offset >= core.duration() - END_EPSILON {
                core.offset = 0.0;
            }
        }
        let member: Rc<dyn BusMember> = self.shared.clone();
        self.shared.services.bus.claim(&member);
        Shared::start(&self.shared, &*ctx);
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        use PlaybackStatus::*;
        self.guard("pause", &[Ready, Playing, Paused, Ended])?;
        self.shared.stop(Stop::Pause);
        Ok(())
    }

    /// Jump to `fraction` of the track. While playing this restarts from there.
    pub fn seek(&self, fraction: f64) -> Result<()> {
        use PlaybackStatus::*;
        let status = self.guard("seek", &[Ready, Playing, Paused, Ended])?;
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        {
            let mut core = self.shared.core.borrow_mut();
            let core = &mut *core;
            if status == Playing {
                core.playback.pause();
                core.generation += 1;
                if let Some(token) = core.tick.take() {
                    self.shared.services.scheduler.cancel(token);
                }
            }
            core.offset = fraction * core.duration();
            if matches!(core.state, PlaybackState::Playing { .. } | PlaybackState::Paused { .. }) {
                core.state = PlaybackState::Paused {
                    offset: core.offset,
                };
            }
            self.shared.draw_playhead(core, fraction);
        }
        debug!(id = self.id(), fraction, "seek");
        if status == Playing {
            match self.shared.services.contexts.existing() {
                Some(ctx) => Shared::start(&self.shared, &*ctx),
                None => self.shared.graph_failed(GraphError::ContextClosed),
            }
        }
        Ok(())
    }

    /// Resize observer callback: redraw the waveform and ribbon at the new size.
    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        use PlaybackStatus::*;
        self.guard("resize", &[Idle, Loading, Ready, Playing, Paused, Ended])?;
        if !self.shared.core.borrow().observing_resize {
            return Ok(());
        }
        let surfaces = &self.shared.surfaces;
        let changed = surfaces
            .waveform
            .with_canvas(|c| {
                let changed = c.width() != width || c.height() != height;
                if changed {
                    c.resize(width, height);
                }
                changed
            })
            .unwrap_or(false);
        // the ribbon follows the waveform width; the spectrum is sized by its host
        if let Some(ribbon) = &surfaces.ribbon {
            ribbon.with_canvas(|c| {
                if c.width() != width {
                    let h = c.height();
                    c.resize(width, h);
                }
            });
        }
        if changed {
            self.shared.render();
        }
        Ok(())
    }

    /// Re-read the gain matcher, e.g. after the feed or the A/B switch changed.
    pub fn refresh_gain(&self) {
        let gain = self.shared.services.gains.gain(&self.shared.options.track_id) as f32;
        self.shared.core.borrow_mut().playback.set_volume(gain);
    }

    /// Stop, leave the bus and stop reacting to resizes. Idempotent.
    pub fn destroy(&self) {
        if self.shared.core.borrow().destroyed {
            return;
        }
        self.shared.stop(Stop::Destroy);
        {
            let mut core = self.shared.core.borrow_mut();
            core.destroyed = true;
            core.observing_resize = false;
            if let Some(token) = core.tick.take() {
                self.shared.services.scheduler.cancel(token);
            }
        }
        self.shared.services.bus.release(self.shared.id);
        debug!(id = self.id(), "destroyed");
    }
}

impl Shared {
    fn request_decode(this: &Rc<Self>, url: String) {
        let weak = Rc::downgrade(this);
        this.services.cache.decode(&url, move |result| {
            if let Some(shared) = weak.upgrade() {
                Shared::on_decoded(&shared, result);
            }
        });
    }

    fn is_loading(&self) -> bool {
        let core = self.core.borrow();
        !core.destroyed && core.state == PlaybackState::Loading
    }

    fn on_decoded(this: &Rc<Self>, result: DecodeResult) {
        if !this.is_loading() {
            return;
        }
        match result {
            Ok(asset) => this.loaded(asset),
            Err(err) => Self::failed(this, err),
        }
    }

    fn loaded(&self, asset: Arc<AudioAsset>) {
        info!(
            id = self.id,
            url = asset.url(),
            seconds = asset.duration(),
            "preview ready"
        );
        {
            let mut core = self.core.borrow_mut();
            core.url = Some(asset.url().to_string());
            core.playback.load(Arc::clone(&asset));
            core.asset = Some(asset);
            core.offset = 0.0;
            core.state = PlaybackState::Ready;
        }
        self.surfaces.button.set_enabled(true);
        self.surfaces.button.set_pressed(false);
        self.render();
    }

    fn failed(this: &Rc<Self>, err: DecodeError) {
        let next = {
            let mut core = this.core.borrow_mut();
            let core = &mut *core;
            let fallback = if core.tried_fallback {
                None
            } else {
                this.options
                    .fallback_url
                    .clone()
                    .or_else(|| fallback::download_for_preview(&core.primary_url))
                    .filter(|url| *url != err.url)
            };
            if let Some(url) = fallback {
                core.tried_fallback = true;
                core.url = Some(url.clone());
                AfterFailure::Fallback(url)
            } else if core.retries_left > 0 {
                core.retries_left -= 1;
                core.tried_fallback = false;
                core.url = Some(core.primary_url.clone());
                AfterFailure::Retry(core.primary_url.clone())
            } else {
                core.state = PlaybackState::Error {
                    reason: err.to_string(),
                };
                AfterFailure::Fail
            }
        };

        match next {
            AfterFailure::Fallback(url) => {
                warn!(id = this.id, error = %err, fallback = %url, "preview failed, trying full file");
                Self::request_decode(this, url);
            }
            AfterFailure::Retry(url) => {
                let delay = this.options.retry.delay_frames;
                warn!(id = this.id, error = %err, delay_frames = delay, "decode failed, will retry");
                let weak = Rc::downgrade(this);
                after_frames(
                    Rc::clone(&this.services.scheduler),
                    delay,
                    Box::new(move || {
                        if let Some(shared) = weak.upgrade() {
                            if shared.is_loading() {
                                Shared::request_decode(&shared, url);
                            }
                        }
                    }),
                );
            }
            AfterFailure::Fail => {
                warn!(id = this.id, error = %err, "preview unavailable");
                this.show_unavailable();
            }
        }
    }

    fn show_unavailable(&self) {
        self.surfaces.button.set_enabled(false);
        self.surfaces.button.set_pressed(false);
        self.surfaces.waveform.replace_with_text(PREVIEW_UNAVAILABLE);
        for slot in [&self.surfaces.ribbon, &self.surfaces.spectrum]
            .into_iter()
            .flatten()
        {
            slot.replace_with_text("");
        }
    }

    fn wants_spectrum(&self) -> bool {
        self.surfaces
            .spectrum
            .as_ref()
            .is_some_and(CanvasSlot::is_canvas)
    }

    /// Waveform, overlays, playhead and ribbon from scratch at the current sizes.
    fn render(&self) {
        let mut core = self.core.borrow_mut();
        let Some(asset) = core.asset.clone() else {
            return;
        };
        let progress = core.progress();
        let core = &mut *core;
        let playhead = &mut core.playhead;
        let drawn = self.surfaces.waveform.with_canvas(|canvas| {
            let envelope = Envelope::compute(&asset, canvas.width());
            canvas.clear();
            render::render_envelope(canvas, &envelope);
            if let Some(db) = self.options.hotspot_threshold_db {
                render::render_true_peak_hotspots(canvas, &envelope, db);
            }
            canvas.commit_base();
            playhead.reset();
            playhead.draw(canvas, progress);
            envelope
        });
        if drawn.is_some() {
            core.envelope = drawn;
        }

        if let Some(ribbon) = &self.surfaces.ribbon {
            ribbon.with_canvas(|canvas| match &core.envelope {
                Some(env) if env.width() == canvas.width() => {
                    render::render_loudness_ribbon(canvas, env)
                }
                _ => render::render_loudness_ribbon(
                    canvas,
                    &Envelope::compute(&asset, canvas.width()),
                ),
            });
        }
    }

    fn draw_playhead(&self, core: &mut Core, progress: f64) {
        let playhead = &mut core.playhead;
        self.surfaces
            .waveform
            .with_canvas(|canvas| playhead.draw(canvas, progress));
    }

    fn draw_spectrum(&self, core: &mut Core) {
        let Some(slot) = &self.surfaces.spectrum else {
            return;
        };
        let sample_rate = core.asset.as_ref().map(|a| a.sample_rate()).unwrap_or(0);
        let Core {
            analyser,
            spectrum_bins,
            peaks,
            ..
        } = core;
        let Some(analyser) = analyser.as_mut() else {
            return;
        };
        spectrum_bins.resize(analyser.frequency_bin_count(), 0);
        analyser.byte_frequency_data(spectrum_bins);
        slot.with_canvas(|canvas| {
            render::render_spectrum(
                canvas,
                SpectrumSnapshot {
                    bins: spectrum_bins.as_slice(),
                    sample_rate,
                },
                peaks,
            )
        });
    }

    /// Build a graph at the current offset. The bus has already been claimed.
    fn start(this: &Rc<Self>, ctx: &dyn AudioContext) {
        let gain = this.services.gains.gain(&this.options.track_id) as f32;
        let wants_spectrum = this.wants_spectrum();
        let started = {
            let mut core = this.core.borrow_mut();
            let core = &mut *core;
            let offset = core.offset;
            let tap = if wants_spectrum {
                let (fft, smoothing) = (this.options.fft_size, this.options.smoothing);
                Some(
                    core.analyser
                        .get_or_insert_with(|| Analyser::new(fft, smoothing))
                        .tap(),
                )
            } else {
                None
            };
            core.playback.play(ctx, offset, gain, tap).map(|start| {
                core.generation += 1;
                core.state = PlaybackState::Playing {
                    device_start_time: start,
                    offset,
                    generation: core.generation,
                };
                (core.generation, start, offset)
            })
        };
        match started {
            Ok((generation, start, offset)) => {
                debug!(id = this.id, offset, start, gain, "playing");
                this.surfaces.button.set_pressed(true);
                Self::schedule_tick(this, generation);
            }
            Err(err) => this.graph_failed(err),
        }
    }

    fn schedule_tick(this: &Rc<Self>, generation: u64) {
        let weak = Rc::downgrade(this);
        let token = this.services.scheduler.request_tick(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                Shared::tick(&shared, generation);
            }
        }));
        this.core.borrow_mut().tick = Some(token);
    }

    fn tick(this: &Rc<Self>, generation: u64) {
        let Some(ctx) = this.services.contexts.existing() else {
            return;
        };
        let ended = {
            let mut core = this.core.borrow_mut();
            let (start, offset) = match core.state {
                PlaybackState::Playing {
                    device_start_time,
                    offset,
                    generation: current,
                } if current == generation => (device_start_time, offset),
                // stale tick from an earlier run
                _ => return,
            };
            core.tick = None;
            let duration = core.duration();
            let elapsed = ctx.current_time() - start + offset;
            if elapsed >= duration - END_EPSILON {
                true
            } else {
                let progress = if duration > 0.0 { elapsed / duration } else { 0.0 };
                this.draw_playhead(&mut core, progress);
                this.draw_spectrum(&mut core);
                false
            }
        };
        if ended {
            this.stop(Stop::Ended);
        } else {
            Self::schedule_tick(this, generation);
        }
    }

    /// Leave the playing state. Returns false when nothing was playing.
    fn stop(&self, kind: Stop) -> bool {
        {
            let mut core = self.core.borrow_mut();
            let core = &mut *core;
            let (start, offset) = match core.state {
                PlaybackState::Playing {
                    device_start_time,
                    offset,
                    ..
                } => (device_start_time, offset),
                _ => return false,
            };
            let duration = core.duration();
            let now = self
                .services
                .contexts
                .existing()
                .map(|ctx| ctx.current_time())
                .unwrap_or(start);
            core.offset = match kind {
                Stop::Ended => 0.0,
                _ => (now - start + offset).clamp(0.0, duration),
            };
            core.playback.pause();
            core.generation += 1;
            if let Some(token) = core.tick.take() {
                self.services.scheduler.cancel(token);
            }
            core.state = match kind {
                Stop::Ended => PlaybackState::Ended,
                _ => PlaybackState::Paused {
                    offset: core.offset,
                },
            };

            if let Some(analyser) = core.analyser.as_mut() {
                analyser.reset();
            }
            core.peaks.reset();
            if let Some(slot) = &self.surfaces.spectrum {
                slot.with_canvas(|c| c.clear());
            }
            let progress = core.progress();
            self.draw_playhead(core, progress);
            debug!(id = self.id, ?kind, offset = core.offset, "stopped");
        }
        self.surfaces.button.set_pressed(false);
        self.services.bus.release(self.id);
        true
    }

    /// The graph could not be built or started: stay paused where we were.
    fn graph_failed(&self, err: GraphError) {
        warn!(id = self.id, error = %err, "playback graph failed");
        {
            let mut core = self.core.borrow_mut();
            core.playback.pause();
            core.generation += 1;
            if let Some(token) = core.tick.take() {
                self.services.scheduler.cancel(token);
            }
            core.state = PlaybackState::Paused {
                offset: core.offset,
            };
        }
        self.surfaces.button.set_pressed(false);
        self.services.bus.release(self.id);
    }
}

impl BusMember for Shared {
    fn bus_id(&self) -> PlayerId {
        self.id
    }

    fn yield_playback(&self) {
        self.stop(Stop::Yield);
    }
}
