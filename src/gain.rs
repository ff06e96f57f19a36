//! Loudness metrics and gain compensation for level-matched A/B.

use std::{cell::RefCell, collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

pub const MIN_GAIN: f64 = 0.1;
pub const MAX_GAIN: f64 = 2.5;
pub const DEFAULT_REFERENCE_LUFS: f64 = -14.0;

/// Linear gain that brings `measured` LUFS to `reference` LUFS, clamped to [0.1, 2.5].
/// Unknown or non-finite inputs leave the track untouched.
pub fn gain_for(measured: Option<f64>, reference: f64) -> f64 {
    match measured {
        Some(m) if m.is_finite() && reference.is_finite() => {
            10f64.powf((reference - m) / 20.0).clamp(MIN_GAIN, MAX_GAIN)
        }
        _ => 1.0,
    }
}

/// One side (input or output) of a track's measurements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoudnessMetrics {
    #[serde(default, alias = "lufs_integrated")]
    pub integrated_loudness_lufs: Option<f64>,
    #[serde(default)]
    pub true_peak_db: Option<f64>,
    #[serde(default, alias = "lra")]
    pub loudness_range_lu: Option<f64>,
    /// Sample peak, reported for unlimited renders instead of loudness
    #[serde(default)]
    pub peak_dbfs: Option<f64>,
}

impl LoudnessMetrics {
    fn has_loudness(&self) -> bool {
        self.integrated_loudness_lufs.is_some()
            || self.true_peak_db.is_some()
            || self.loudness_range_lu.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetrics {
    #[serde(default)]
    pub input: Option<LoudnessMetrics>,
    #[serde(default)]
    pub output: Option<LoudnessMetrics>,
}

impl TrackMetrics {
    /// Loudness the listener hears for this track: the rendered output, or the input for the
    /// unprocessed original.
    pub fn measured_lufs(&self) -> Option<f64> {
        self.output
            .as_ref()
            .and_then(|m| m.integrated_loudness_lufs)
            .or_else(|| self.input.as_ref().and_then(|m| m.integrated_loudness_lufs))
    }
}

/// A row of the metrics table
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub label: &'static str,
    pub input: Option<f64>,
    pub output: Option<f64>,
}

impl MetricRow {
    /// Two decimals, or an em dash placeholder for missing values.
    pub fn format(value: Option<f64>) -> String {
        match value {
            Some(v) => format!("{v:.2}"),
            None => "\u{2014}".to_string(),
        }
    }
}

fn default_reference() -> f64 {
    DEFAULT_REFERENCE_LUFS
}

/// Loudness feed delivered by the mastering job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoudnessFeed {
    #[serde(default = "default_reference")]
    pub reference_lufs: f64,
    #[serde(default)]
    pub tracks: BTreeMap<String, TrackMetrics>,
}

impl Default for LoudnessFeed {
    fn default() -> Self {
        LoudnessFeed {
            reference_lufs: DEFAULT_REFERENCE_LUFS,
            tracks: BTreeMap::new(),
        }
    }
}

impl LoudnessFeed {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }

    pub fn track(&self, id: &str) -> Option<&TrackMetrics> {
        self.tracks.get(id)
    }

    /// `LUFS-I`, `TP (dBTP)`, `LRA (LU)` rows; a single `Peak dBFS` row for tracks that only
    /// report sample peaks.
    pub fn rows(&self, id: &str) -> Vec<MetricRow> {
        let metrics = self.tracks.get(id).cloned().unwrap_or_default();
        let input = metrics.input.unwrap_or_default();
        let output = metrics.output.unwrap_or_default();

        let peak_only = !input.has_loudness()
            && !output.has_loudness()
            && (input.peak_dbfs.is_some() || output.peak_dbfs.is_some());
        if peak_only {
            return vec![MetricRow {
                label: "Peak dBFS",
                input: input.peak_dbfs,
                output: output.peak_dbfs,
            }];
        }

        vec![
            MetricRow {
                label: "LUFS-I",
                input: input.integrated_loudness_lufs,
                output: output.integrated_loudness_lufs,
            },
            MetricRow {
                label: "TP (dBTP)",
                input: input.true_peak_db,
                output: output.true_peak_db,
            },
            MetricRow {
                label: "LRA (LU)",
                input: input.loudness_range_lu,
                output: output.loudness_range_lu,
            },
        ]
    }
}

/// Track id → linear gain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GainMap {
    gains: BTreeMap<String, f64>,
}

impl GainMap {
    pub fn from_feed(feed: &LoudnessFeed) -> Self {
        let gains = feed
            .tracks
            .iter()
            .map(|(id, m)| (id.clone(), gain_for(m.measured_lufs(), feed.reference_lufs)))
            .collect();
        GainMap { gains }
    }

    pub fn get(&self, id: &str) -> Option<f64> {
        self.gains.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.gains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gains.is_empty()
    }
}

struct Inner {
    feed: LoudnessFeed,
    map: GainMap,
    enabled: bool,
}

/// Shared answer to "how loud should this track play", read by players at `play()` time.
pub struct GainMatcher {
    inner: RefCell<Inner>,
}

impl GainMatcher {
    pub fn new(enabled: bool) -> Self {
        GainMatcher {
            inner: RefCell::new(Inner {
                feed: LoudnessFeed::default(),
                map: GainMap::default(),
                enabled,
            }),
        }
    }

    /// Replace the feed and recompute every gain.
    pub fn set_feed(&self, feed: LoudnessFeed) {
        let map = GainMap::from_feed(&feed);
        debug!(tracks = map.len(), reference = feed.reference_lufs, "gain map updated");
        let mut inner = self.inner.borrow_mut();
        inner.map = map;
        inner.feed = feed;
    }

    pub fn feed(&self) -> LoudnessFeed {
        self.inner.borrow().feed.clone()
    }

    pub fn gain_map(&self) -> GainMap {
        self.inner.borrow().map.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.borrow_mut().enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.borrow().enabled
    }

    /// 1.0 when matching is off or the track has no measurement
    pub fn gain(&self, track_id: &str) -> f64 {
        let inner = self.inner.borrow();
        if !inner.enabled {
            return 1.0;
        }
        inner.map.get(track_id).unwrap_or(1.0)
    }
}

impl Default for GainMatcher {
    fn default() -> Self {
        Self::new(true)
    }
}
