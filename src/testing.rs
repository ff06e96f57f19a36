//! Deterministic stand-ins for the device and the network, for driving the engine from tests
//! without audio hardware or sockets.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    sync::{Arc, Mutex},
};

use crate::{
    analyser::AnalyserTap,
    context::{
        AudioContext, ContextFactory, ContextState, GraphRequest, MediaElement, PlaybackGraph,
    },
    decode::AudioAsset,
    error::{FetchError, GraphError},
    fetch::AssetFetcher,
};

#[derive(Debug)]
struct GraphRecord {
    url: String,
    offset: f64,
    gain: f32,
    has_tap: bool,
    stopped: bool,
}

/// A graph created by `ManualContext`; clones observe the same graph.
#[derive(Debug, Clone)]
pub struct ManualGraph(Rc<RefCell<GraphRecord>>);

impl ManualGraph {
    pub fn url(&self) -> String {
        self.0.borrow().url.clone()
    }

    pub fn offset(&self) -> f64 {
        self.0.borrow().offset
    }

    pub fn gain(&self) -> f32 {
        self.0.borrow().gain
    }

    pub fn has_tap(&self) -> bool {
        self.0.borrow().has_tap
    }

    pub fn is_stopped(&self) -> bool {
        self.0.borrow().stopped
    }
}

impl PlaybackGraph for ManualGraph {
    fn set_gain(&self, gain: f32) {
        self.0.borrow_mut().gain = gain;
    }

    fn stop(&self) {
        self.0.borrow_mut().stopped = true;
    }
}

#[derive(Debug)]
struct ElementRecord {
    url: String,
    position: f64,
    volume: f32,
    playing: bool,
    has_tap: bool,
}

#[derive(Debug, Clone)]
pub struct ManualElement(Rc<RefCell<ElementRecord>>);

impl ManualElement {
    pub fn url(&self) -> String {
        self.0.borrow().url.clone()
    }

    pub fn position(&self) -> f64 {
        self.0.borrow().position
    }

    pub fn volume(&self) -> f32 {
        self.0.borrow().volume
    }

    pub fn is_playing(&self) -> bool {
        self.0.borrow().playing
    }

    pub fn has_tap(&self) -> bool {
        self.0.borrow().has_tap
    }
}

impl MediaElement for ManualElement {
    fn seek(&self, seconds: f64) -> Result<(), GraphError> {
        self.0.borrow_mut().position = seconds;
        Ok(())
    }

    fn play(&self) -> Result<(), GraphError> {
        self.0.borrow_mut().playing = true;
        Ok(())
    }

    fn pause(&self) {
        self.0.borrow_mut().playing = false;
    }

    fn set_volume(&self, gain: f32) {
        self.0.borrow_mut().volume = gain;
    }
}

/// Audio context with a hand-driven clock. Starts suspended, like a context created before
/// any user gesture.
pub struct ManualContext {
    time: Cell<f64>,
    state: Cell<ContextState>,
    sample_rate: u32,
    buffer_graphs: bool,
    resumes: Cell<u32>,
    fail_next: RefCell<Option<GraphError>>,
    graphs: RefCell<Vec<ManualGraph>>,
    elements: RefCell<Vec<ManualElement>>,
}

impl ManualContext {
    pub fn new() -> Self {
        Self::build(true)
    }

    /// A context that can only stream through media elements
    pub fn without_buffer_graphs() -> Self {
        Self::build(false)
    }

    fn build(buffer_graphs: bool) -> Self {
        ManualContext {
            time: Cell::new(0.0),
            state: Cell::new(ContextState::Suspended),
            sample_rate: 48_000,
            buffer_graphs,
            resumes: Cell::new(0),
            fail_next: RefCell::new(None),
            graphs: RefCell::new(Vec::new()),
            elements: RefCell::new(Vec::new()),
        }
    }

    pub fn set_time(&self, seconds: f64) {
        self.time.set(seconds);
    }

    /// Move the clock forward; a suspended or closed context does not advance.
    pub fn advance(&self, seconds: f64) {
        if self.state.get() == ContextState::Running {
            self.time.set(self.time.get() + seconds);
        }
    }

    pub fn suspend(&self) {
        if self.state.get() == ContextState::Running {
            self.state.set(ContextState::Suspended);
        }
    }

    pub fn resume_count(&self) -> u32 {
        self.resumes.get()
    }

    /// The next graph or element creation fails with `err`.
    pub fn fail_next(&self, err: GraphError) {
        *self.fail_next.borrow_mut() = Some(err);
    }

    pub fn graphs(&self) -> Vec<ManualGraph> {
        self.graphs.borrow().clone()
    }

    pub fn elements(&self) -> Vec<ManualElement> {
        self.elements.borrow().clone()
    }

    /// Graphs that have not been stopped
    pub fn live_graphs(&self) -> Vec<ManualGraph> {
        self.graphs
            .borrow()
            .iter()
            .filter(|g| !g.is_stopped())
            .cloned()
            .collect()
    }

    fn check(&self) -> Result<(), GraphError> {
        if self.state.get() == ContextState::Closed {
            return Err(GraphError::ContextClosed);
        }
        match self.fail_next.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for ManualContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioContext for ManualContext {
    fn current_time(&self) -> f64 {
        self.time.get()
    }

    fn state(&self) -> ContextState {
        self.state.get()
    }

    fn resume(&self) -> Result<(), GraphError> {
        match self.state.get() {
            ContextState::Closed => Err(GraphError::ContextClosed),
            _ => {
                self.resumes.set(self.resumes.get() + 1);
                self.state.set(ContextState::Running);
                Ok(())
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_graph(&self, request: GraphRequest) -> Result<Box<dyn PlaybackGraph>, GraphError> {
        self.check()?;
        let graph = ManualGraph(Rc::new(RefCell::new(GraphRecord {
            url: request.asset.url().to_string(),
            offset: request.offset,
            gain: request.gain,
            has_tap: request.tap.is_some(),
            stopped: false,
        })));
        self.graphs.borrow_mut().push(graph.clone());
        Ok(Box::new(graph))
    }

    fn create_element(
        &self,
        asset: Arc<AudioAsset>,
        tap: Option<AnalyserTap>,
    ) -> Result<Box<dyn MediaElement>, GraphError> {
        self.check()?;
        let element = ManualElement(Rc::new(RefCell::new(ElementRecord {
            url: asset.url().to_string(),
            position: 0.0,
            volume: 1.0,
            playing: false,
            has_tap: tap.is_some(),
        })));
        self.elements.borrow_mut().push(element.clone());
        Ok(Box::new(element))
    }

    fn supports_buffer_graphs(&self) -> bool {
        self.buffer_graphs
    }

    fn close(&self) {
        self.state.set(ContextState::Closed);
    }
}

/// Hands out one shared `ManualContext` and counts how often it was asked to.
#[derive(Clone)]
pub struct ManualContextFactory {
    context: Rc<ManualContext>,
    created: Rc<Cell<u32>>,
}

impl ManualContextFactory {
    pub fn new(context: Rc<ManualContext>) -> Self {
        ManualContextFactory {
            context,
            created: Rc::new(Cell::new(0)),
        }
    }

    pub fn context(&self) -> Rc<ManualContext> {
        Rc::clone(&self.context)
    }

    pub fn created(&self) -> u32 {
        self.created.get()
    }
}

impl ContextFactory for ManualContextFactory {
    fn create(&self) -> Result<Rc<dyn AudioContext>, GraphError> {
        self.created.set(self.created.get() + 1);
        Ok(self.context.clone())
    }

    fn supports_buffer_graphs(&self) -> bool {
        self.context.buffer_graphs
    }
}

#[derive(Default)]
struct Responses {
    bodies: HashMap<String, Result<Vec<u8>, FetchError>>,
    fetches: HashMap<String, usize>,
}

/// In-memory fetcher. Unknown URLs answer 404.
#[derive(Clone, Default)]
pub struct StaticFetcher {
    inner: Arc<Mutex<Responses>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, bytes: Vec<u8>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.bodies.insert(url.to_string(), Ok(bytes));
        }
    }

    pub fn fail(&self, url: &str, err: FetchError) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.bodies.insert(url.to_string(), Err(err));
        }
    }

    /// How many times `url` was fetched
    pub fn fetches(&self, url: &str) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.fetches.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl AssetFetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| FetchError::Transport("fetcher poisoned".into()))?;
        *inner.fetches.entry(url.to_string()).or_default() += 1;
        inner
            .bodies
            .get(url)
            .cloned()
            .unwrap_or(Err(FetchError::Status(404)))
    }
}
