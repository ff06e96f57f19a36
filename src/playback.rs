//! The two ways a player can make sound.
//!
//! `BufferGraphPlayback` builds a fresh one-shot graph for every play and throws it away on
//! pause. `ElementPlayback` keeps one streamed element alive and seeks/pauses it. Which one a
//! player uses is fixed when the player is built.

use std::sync::Arc;

use tracing::debug;

use crate::{
    analyser::AnalyserTap,
    context::{AudioContext, GraphRequest, MediaElement, PlaybackGraph},
    decode::AudioAsset,
    error::GraphError,
};

pub trait PlaybackCapability {
    /// Make `asset` the thing `play` starts. Stops anything currently sounding.
    fn load(&mut self, asset: Arc<AudioAsset>);

    /// Start at `offset` seconds with the given gain. Returns the context time playback
    /// started at.
    fn play(
        &mut self,
        ctx: &dyn AudioContext,
        offset: f64,
        gain: f32,
        tap: Option<AnalyserTap>,
    ) -> Result<f64, GraphError>;

    /// Stop sounding. Idempotent.
    fn pause(&mut self);

    fn set_volume(&mut self, gain: f32);

    fn is_sounding(&self) -> bool;
}

/// Pick the capability the context supports.
pub fn select_capability(buffer_graphs: bool) -> Box<dyn PlaybackCapability> {
    if buffer_graphs {
        Box::new(BufferGraphPlayback::default())
    } else {
        Box::new(ElementPlayback::default())
    }
}

#[derive(Default)]
pub struct BufferGraphPlayback {
    asset: Option<Arc<AudioAsset>>,
    graph: Option<Box<dyn PlaybackGraph>>,
}

impl PlaybackCapability for BufferGraphPlayback {
    fn load(&mut self, asset: Arc<AudioAsset>) {
        self.pause();
        self.asset = Some(asset);
    }

    fn play(
        &mut self,
        ctx: &dyn AudioContext,
        offset: f64,
        gain: f32,
        tap: Option<AnalyserTap>,
    ) -> Result<f64, GraphError> {
        let asset = self.asset.clone().ok_or(GraphError::NotLoaded)?;
        self.pause();
        let graph = ctx.create_graph(GraphRequest {
            asset,
            offset,
            gain,
            tap,
        })?;
        self.graph = Some(graph);
        Ok(ctx.current_time())
    }

    fn pause(&mut self) {
        if let Some(graph) = self.graph.take() {
            graph.stop();
        }
    }

    fn set_volume(&mut self, gain: f32) {
        if let Some(graph) = &self.graph {
            graph.set_gain(gain);
        }
    }

    fn is_sounding(&self) -> bool {
        self.graph.is_some()
    }
}

#[derive(Default)]
pub struct ElementPlayback {
    asset: Option<Arc<AudioAsset>>,
    element: Option<Box<dyn MediaElement>>,
    playing: bool,
}

impl PlaybackCapability for ElementPlayback {
    fn load(&mut self, asset: Arc<AudioAsset>) {
        self.pause();
        self.element = None;
        self.asset = Some(asset);
    }

    fn play(
        &mut self,
        ctx: &dyn AudioContext,
        offset: f64,
        gain: f32,
        tap: Option<AnalyserTap>,
    ) -> Result<f64, GraphError> {
        let asset = self.asset.clone().ok_or(GraphError::NotLoaded)?;
        if self.element.is_none() {
            debug!(url = asset.url(), "creating media element");
            self.element = Some(ctx.create_element(asset, tap)?);
        }
        let element = self.element.as_ref().ok_or(GraphError::NotLoaded)?;
        element.pause();
        element.seek(offset)?;
        element.set_volume(gain);
        element.play()?;
        self.playing = true;
        Ok(ctx.current_time())
    }

    fn pause(&mut self) {
        if let Some(element) = &self.element {
            element.pause();
        }
        self.playing = false;
    }

    fn set_volume(&mut self, gain: f32) {
        if let Some(element) = &self.element {
            element.set_volume(gain);
        }
    }

    fn is_sounding(&self) -> bool {
        self.playing
    }
}
