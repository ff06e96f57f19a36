//! Waveform preview and gain-matched A/B playback of rendered audio assets.
//!
//! A `PreviewEngine` owns the audio context, the decode cache, the playback bus and the gain
//! matcher. Each attached `TrackPlayer` decodes its asset once, draws it into a canvas slot,
//! and plays it exclusively: starting one player pauses whichever was playing before.

pub mod analyser;
pub mod bus;
pub mod canvas;
pub mod config;
pub mod context;
pub mod control;
pub mod decode;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod fetch;
pub mod gain;
pub mod logging;
pub mod playback;
pub mod player;
pub mod render;
pub mod scheduler;
pub mod testing;

pub use config::PreviewConfig;
pub use control::{CanvasSlot, PlayButton};
pub use engine::{PlayerHandle, PreviewEngine, ReadinessGate, RetryPolicy};
pub use error::{ConfigError, DecodeError, FetchError, GraphError, PlayerError};
pub use gain::{GainMatcher, LoudnessFeed, gain_for};
pub use player::{PlaybackSnapshot, PlaybackState, PlaybackStatus, Surfaces, TrackPlayer};
