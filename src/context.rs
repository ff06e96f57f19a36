//! The audio device, as seen by the players.
//!
//! `AudioContextManager` hands out one shared `AudioContext`, created on first use through an
//! injected `ContextFactory`. `RodioContext` is the real output; tests use `ManualContext`
//! from the `testing` module.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::Arc,
    time::{Duration, Instant},
};

use rodio::{OutputStream, OutputStreamBuilder, Sink, buffer::SamplesBuffer};
use tracing::{debug, info};

use crate::{analyser::AnalyserTap, decode::AudioAsset, error::GraphError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

/// Everything needed to start one buffer-source graph:
/// source → gain → optional analyser tap → destination.
#[derive(Debug, Clone)]
pub struct GraphRequest {
    pub asset: Arc<AudioAsset>,
    /// Start position inside the asset, seconds
    pub offset: f64,
    pub gain: f32,
    pub tap: Option<AnalyserTap>,
}

/// A started one-shot graph. Dropping it also stops it.
pub trait PlaybackGraph {
    fn set_gain(&self, gain: f32);
    /// Stop and disconnect. Idempotent.
    fn stop(&self);
}

/// A persistent streamed element with its own seek/pause
pub trait MediaElement {
    fn seek(&self, seconds: f64) -> Result<(), GraphError>;
    fn play(&self) -> Result<(), GraphError>;
    fn pause(&self);
    fn set_volume(&self, gain: f32);
}

pub trait AudioContext {
    /// Device clock in seconds. Only advances while running.
    fn current_time(&self) -> f64;
    fn state(&self) -> ContextState;
    fn resume(&self) -> Result<(), GraphError>;
    fn sample_rate(&self) -> u32;
    fn create_graph(&self, request: GraphRequest) -> Result<Box<dyn PlaybackGraph>, GraphError>;
    fn create_element(
        &self,
        asset: Arc<AudioAsset>,
        tap: Option<AnalyserTap>,
    ) -> Result<Box<dyn MediaElement>, GraphError>;
    fn supports_buffer_graphs(&self) -> bool;
    fn close(&self);
}

pub trait ContextFactory {
    fn create(&self) -> Result<Rc<dyn AudioContext>, GraphError>;

    /// Whether contexts from this factory can run one-shot buffer graphs. Answered without
    /// creating a context so players can pick a playback strategy up front.
    fn supports_buffer_graphs(&self) -> bool {
        true
    }
}

/// Lazily created, shared audio context
pub struct AudioContextManager {
    factory: Box<dyn ContextFactory>,
    context: RefCell<Option<Rc<dyn AudioContext>>>,
}

impl AudioContextManager {
    pub fn new(factory: Box<dyn ContextFactory>) -> Self {
        AudioContextManager {
            factory,
            context: RefCell::new(None),
        }
    }

    /// The shared context, created on the first call.
    pub fn get(&self) -> Result<Rc<dyn AudioContext>, GraphError> {
        if let Some(ctx) = self.context.borrow().as_ref() {
            if ctx.state() != ContextState::Closed {
                return Ok(Rc::clone(ctx));
            }
        }
        let ctx = self.factory.create()?;
        debug!(sample_rate = ctx.sample_rate(), "audio context created");
        *self.context.borrow_mut() = Some(Rc::clone(&ctx));
        Ok(ctx)
    }

    /// The context if one exists already; never creates it.
    pub fn existing(&self) -> Option<Rc<dyn AudioContext>> {
        self.context.borrow().clone()
    }

    pub fn is_created(&self) -> bool {
        self.context.borrow().is_some()
    }

    pub fn supports_buffer_graphs(&self) -> bool {
        match self.context.borrow().as_ref() {
            Some(ctx) => ctx.supports_buffer_graphs(),
            None => self.factory.supports_buffer_graphs(),
        }
    }

    pub fn close(&self) {
        if let Some(ctx) = self.context.borrow_mut().take() {
            ctx.close();
        }
    }
}

// ---------- rodio backend ----------

/// Monotonic clock that only runs while the context is running
#[derive(Debug, Default)]
struct DeviceClock {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl DeviceClock {
    fn now(&self) -> Duration {
        self.accumulated + self.running_since.map(|t| t.elapsed()).unwrap_or_default()
    }

    fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn stop(&mut self) {
        if let Some(t) = self.running_since.take() {
            self.accumulated += t.elapsed();
        }
    }
}

/// Default output device via rodio. The stream is opened on the first `resume`.
pub struct RodioContext {
    stream: RefCell<Option<OutputStream>>,
    clock: RefCell<DeviceClock>,
    state: Cell<ContextState>,
}

impl RodioContext {
    pub fn new() -> Self {
        RodioContext {
            stream: RefCell::new(None),
            clock: RefCell::new(DeviceClock::default()),
            state: Cell::new(ContextState::Suspended),
        }
    }

    fn with_stream<R>(&self, f: impl FnOnce(&OutputStream) -> R) -> Result<R, GraphError> {
        if self.state.get() == ContextState::Closed {
            return Err(GraphError::ContextClosed);
        }
        match self.stream.borrow().as_ref() {
            Some(stream) => Ok(f(stream)),
            None => Err(GraphError::Device("output stream not open".into())),
        }
    }
}

impl Default for RodioContext {
    fn default() -> Self {
        Self::new()
    }
}

fn asset_source(asset: &AudioAsset, start_frame: usize) -> SamplesBuffer {
    SamplesBuffer::new(
        asset.channel_count().max(1) as u16,
        asset.sample_rate(),
        asset.interleaved_from(start_frame),
    )
}

struct RodioGraph {
    sink: Sink,
}

impl PlaybackGraph for RodioGraph {
    fn set_gain(&self, gain: f32) {
        self.sink.set_volume(gain);
    }

    fn stop(&self) {
        self.sink.stop();
    }
}

struct RodioElement {
    sink: Sink,
}

impl MediaElement for RodioElement {
    fn seek(&self, seconds: f64) -> Result<(), GraphError> {
        self.sink
            .try_seek(Duration::from_secs_f64(seconds.max(0.0)))
            .map_err(|e| GraphError::Device(e.to_string()))
    }

    fn play(&self) -> Result<(), GraphError> {
        self.sink.play();
        Ok(())
    }

    fn pause(&self) {
        self.sink.pause();
    }

    fn set_volume(&self, gain: f32) {
        self.sink.set_volume(gain);
    }
}

impl AudioContext for RodioContext {
    fn current_time(&self) -> f64 {
        self.clock.borrow().now().as_secs_f64()
    }

    fn state(&self) -> ContextState {
        self.state.get()
    }

    fn resume(&self) -> Result<(), GraphError> {
        match self.state.get() {
            ContextState::Closed => return Err(GraphError::ContextClosed),
            ContextState::Running => return Ok(()),
            ContextState::Suspended => {}
        }
        if self.stream.borrow().is_none() {
            let mut stream = OutputStreamBuilder::from_default_device()?.open_stream_or_fallback()?;
            stream.log_on_drop(false);
            info!(sample_rate = stream.config().sample_rate(), "output stream opened");
            *self.stream.borrow_mut() = Some(stream);
        }
        self.clock.borrow_mut().start();
        self.state.set(ContextState::Running);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.with_stream(|s| s.config().sample_rate()).unwrap_or(44_100)
    }

    fn create_graph(&self, request: GraphRequest) -> Result<Box<dyn PlaybackGraph>, GraphError> {
        let sink = self.with_stream(|s| Sink::connect_new(s.mixer()))?;
        let start_frame = (request.offset.max(0.0) * request.asset.sample_rate() as f64) as usize;
        let source = asset_source(&request.asset, start_frame);
        sink.set_volume(request.gain);
        match request.tap {
            Some(tap) => sink.append(tap.wrap(source)),
            None => sink.append(source),
        }
        Ok(Box::new(RodioGraph { sink }))
    }

    fn create_element(
        &self,
        asset: Arc<AudioAsset>,
        tap: Option<AnalyserTap>,
    ) -> Result<Box<dyn MediaElement>, GraphError> {
        let sink = self.with_stream(|s| Sink::connect_new(s.mixer()))?;
        sink.pause();
        let source = asset_source(&asset, 0);
        match tap {
            Some(tap) => sink.append(tap.wrap(source)),
            None => sink.append(source),
        }
        Ok(Box::new(RodioElement { sink }))
    }

    fn supports_buffer_graphs(&self) -> bool {
        true
    }

    fn close(&self) {
        self.clock.borrow_mut().stop();
        self.stream.borrow_mut().take();
        self.state.set(ContextState::Closed);
    }
}

/// Builds `RodioContext`s
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioContextFactory;

impl ContextFactory for RodioContextFactory {
    fn create(&self) -> Result<Rc<dyn AudioContext>, GraphError> {
        Ok(Rc::new(RodioContext::new()))
    }
}
