//! Waveform, spectrum, playhead and loudness-overlay drawing.
//!
//! Everything here is a pure function of its inputs except the two tiny pieces of frame-to-frame
//! state the visuals need: where the playhead was last drawn and the spectrum peak-hold values.

use image::Rgba;

use crate::{
    canvas::{Canvas, Paint, Point},
    decode::AudioAsset,
};

const RMS_FILL: Paint = Paint::rgba(120, 255, 220, 0.10);
const PEAK_STROKE: Paint = Paint::HorizontalGradient(
    Rgba([80, 180, 255, 250]),
    Rgba([120, 255, 220, 250]),
);
const HEAD_FILL: Paint = Paint::rgba(200, 255, 240, 0.95);
const BAR_FILL: Paint = Paint::rgba(120, 255, 220, 0.85);
const PEAK_CAP_FILL: Paint = Paint::rgba(255, 255, 255, 0.9);
const GRID_STROKE: Paint = Paint::rgba(255, 255, 255, 0.07);
const HOTSPOT_FILL: Paint = Paint::rgba(255, 120, 120, 0.55);

/// Vertical headroom of the RMS underlay relative to the half height
const RMS_SCALE: f32 = 0.92;
const HEAD_WIDTH: f32 = 2.0;
const HOTSPOT_BELT: f32 = 6.0;

pub const MIN_FREQ: f32 = 20.0;
pub const MAX_FREQ: f32 = 20_000.0;
pub const DEFAULT_PEAK_DECAY: f32 = 0.985;

const GRID_DB: [f32; 6] = [0.0, -10.0, -20.0, -30.0, -40.0, -60.0];
const GRID_RANGE_DB: f32 = 80.0;
const GRID_FREQS: [f32; 11] = [
    20.0, 30.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 20000.0,
];

// ---------- envelope ----------

/// Per-pixel-column summary of the signal
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvelopeColumn {
    pub rms: f32,
    pub peak_min: f32,
    pub peak_max: f32,
}

impl EnvelopeColumn {
    pub fn abs_peak(&self) -> f32 {
        self.peak_min.abs().max(self.peak_max.abs())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    columns: Vec<EnvelopeColumn>,
}

impl Envelope {
    /// Downsample `asset` to `width` columns of the stereo-averaged signal.
    pub fn compute(asset: &AudioAsset, width: u32) -> Self {
        let left = asset.channel(0);
        let right = if asset.channel_count() > 1 {
            Some(asset.channel(1))
        } else {
            None
        };
        Self::from_channels(left, right, width)
    }

    pub fn from_channels(left: &[f32], right: Option<&[f32]>, width: u32) -> Self {
        let frames = left.len();
        let cols = width as usize;
        if cols == 0 {
            return Envelope::default();
        }
        let step = frames.div_ceil(cols).max(1);
        let mono = |i: usize| {
            let l = left[i];
            let r = right.and_then(|r| r.get(i).copied()).unwrap_or(l);
            (l + r) * 0.5
        };

        let columns = (0..cols)
            .map(|x| {
                let start = x * step;
                let end = (start + step).min(frames);
                if start >= end {
                    return EnvelopeColumn::default();
                }
                let mut sum = 0.0f64;
                let mut lo = f32::INFINITY;
                let mut hi = f32::NEG_INFINITY;
                for i in start..end {
                    let m = mono(i);
                    sum += (m as f64) * (m as f64);
                    lo = lo.min(m);
                    hi = hi.max(m);
                }
                EnvelopeColumn {
                    rms: (sum / (end - start) as f64).sqrt() as f32,
                    peak_min: lo,
                    peak_max: hi,
                }
            })
            .collect();
        Envelope { columns }
    }

    pub fn columns(&self) -> &[EnvelopeColumn] {
        &self.columns
    }

    pub fn width(&self) -> u32 {
        self.columns.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Draw the RMS underlay and the min/max outline, one path each.
pub fn render_envelope<C: Canvas + ?Sized>(canvas: &mut C, envelope: &Envelope) {
    let cols = envelope.columns();
    if cols.is_empty() {
        return;
    }
    let mid = canvas.height() as f32 / 2.0;

    let mut fill: Vec<Point> = Vec::with_capacity(cols.len() * 2);
    fill.extend(
        cols.iter()
            .enumerate()
            .map(|(x, c)| (x as f32, mid - c.rms * mid * RMS_SCALE)),
    );
    fill.extend(
        cols.iter()
            .enumerate()
            .rev()
            .map(|(x, c)| (x as f32, mid + c.rms * mid * RMS_SCALE)),
    );
    canvas.fill_path(&fill, RMS_FILL);

    let mut outline: Vec<Point> = Vec::with_capacity(cols.len() * 2);
    outline.extend(
        cols.iter()
            .enumerate()
            .map(|(x, c)| (x as f32, mid + c.peak_min * mid)),
    );
    outline.extend(
        cols.iter()
            .enumerate()
            .rev()
            .map(|(x, c)| (x as f32, mid + c.peak_max * mid)),
    );
    canvas.stroke_path(&outline, true, PEAK_STROKE);
}

// ---------- playhead ----------

/// Moving position marker drawn over a committed waveform
#[derive(Debug, Clone, Default)]
pub struct Playhead {
    last_x: Option<u32>,
}

impl Playhead {
    pub fn column(progress: f64, width: u32) -> u32 {
        (progress.clamp(0.0, 1.0) * width as f64).floor() as u32
    }

    /// Erase the previous marker's span and draw the new one. Returns the new column.
    pub fn draw<C: Canvas + ?Sized>(&mut self, canvas: &mut C, progress: f64) -> u32 {
        let h = canvas.height() as f32;
        let x = Self::column(progress, canvas.width());
        if let Some(prev) = self.last_x {
            canvas.restore_rect(prev as f32 - 1.0, 0.0, HEAD_WIDTH + 1.0, h);
        }
        canvas.fill_rect(x as f32, 0.0, HEAD_WIDTH, h, HEAD_FILL);
        self.last_x = Some(x);
        x
    }

    pub fn last_x(&self) -> Option<u32> {
        self.last_x
    }

    /// Forget the previous marker, e.g. after the canvas was re-rendered.
    pub fn reset(&mut self) {
        self.last_x = None;
    }
}

// ---------- spectrum ----------

/// Column for a frequency on the 20 Hz – 20 kHz log axis.
pub fn freq_to_x(freq: f32, width: u32) -> i64 {
    let f = freq.max(MIN_FREQ);
    ((f / MIN_FREQ).log10() / (MAX_FREQ / MIN_FREQ).log10() * width as f32).round() as i64
}

/// Centre frequency of an analyser bin.
pub fn bin_to_freq(bin: usize, bins: usize, sample_rate: u32) -> f32 {
    if bins == 0 {
        return 0.0;
    }
    bin as f32 * sample_rate as f32 / (2 * bins) as f32
}

/// One drawn bar: the first bin to land on a new column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpectrumBar {
    pub bin: usize,
    pub x: i64,
    pub width: i64,
}

/// Bars for a given bin count; bins that fall onto an already drawn column are merged away.
pub fn spectrum_layout(bins: usize, sample_rate: u32, width: u32) -> Vec<SpectrumBar> {
    let mut bars = Vec::new();
    let mut last_x = 0i64;
    for bin in 1..bins {
        let x = freq_to_x(bin_to_freq(bin, bins, sample_rate), width);
        if x <= last_x {
            continue;
        }
        bars.push(SpectrumBar {
            bin,
            x,
            width: (x - last_x).max(1),
        });
        last_x = x;
    }
    bars
}

/// One frame of analyser output
#[derive(Debug, Clone, Copy)]
pub struct SpectrumSnapshot<'a> {
    /// Magnitudes scaled to 0..=255, one per bin
    pub bins: &'a [u8],
    pub sample_rate: u32,
}

/// Decaying per-bin maxima for the peak caps
#[derive(Debug, Clone)]
pub struct PeakHold {
    peaks: Vec<f32>,
    decay: f32,
}

impl PeakHold {
    pub fn new(decay: f32) -> Self {
        PeakHold {
            peaks: Vec::new(),
            decay,
        }
    }

    pub fn update(&mut self, bin: usize, value: f32) -> f32 {
        if self.peaks.len() <= bin {
            self.peaks.resize(bin + 1, 0.0);
        }
        let held = (self.peaks[bin] * self.decay).max(value);
        self.peaks[bin] = held;
        held
    }

    pub fn get(&self, bin: usize) -> f32 {
        self.peaks.get(bin).copied().unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.peaks.clear();
    }
}

impl Default for PeakHold {
    fn default() -> Self {
        Self::new(DEFAULT_PEAK_DECAY)
    }
}

fn draw_spectrum_grid<C: Canvas + ?Sized>(canvas: &mut C) {
    let w = canvas.width();
    let h = canvas.height() as f32;
    for db in GRID_DB {
        let y = ((1.0 - (db + GRID_RANGE_DB) / GRID_RANGE_DB) * h).round();
        canvas.stroke_path(&[(0.0, y), (w as f32, y)], false, GRID_STROKE);
    }
    for f in GRID_FREQS {
        let x = freq_to_x(f, w) as f32;
        canvas.stroke_path(&[(x, 0.0), (x, h)], false, GRID_STROKE);
    }
}

/// Redraw the whole spectrum canvas from one analyser snapshot.
pub fn render_spectrum<C: Canvas + ?Sized>(
    canvas: &mut C,
    snapshot: SpectrumSnapshot<'_>,
    hold: &mut PeakHold,
) {
    canvas.clear();
    draw_spectrum_grid(canvas);
    let h = canvas.height() as f32;
    for bar in spectrum_layout(snapshot.bins.len(), snapshot.sample_rate, canvas.width()) {
        let v = snapshot.bins[bar.bin] as f32 / 255.0;
        let y = h - v.powf(0.8) * h;
        canvas.fill_rect(bar.x as f32, y, bar.width as f32, h - y, BAR_FILL);

        let peak = hold.update(bar.bin, v);
        let y_peak = h - peak.powf(0.8) * h;
        canvas.fill_rect(bar.x as f32, y_peak - 1.0, bar.width as f32, 2.0, PEAK_CAP_FILL);
    }
}

// ---------- loudness overlays ----------

/// Ribbon colour for a column RMS: amber when hot, green near streaming targets, blue below.
pub fn ribbon_paint(rms: f32) -> Paint {
    let level = 20.0 * rms.max(1e-6).log10();
    if level > -9.5 {
        Paint::rgba(255, 200, 120, 0.95)
    } else if level > -14.5 {
        Paint::rgba(120, 255, 180, 0.95)
    } else {
        Paint::rgba(120, 180, 255, 0.95)
    }
}

pub fn render_loudness_ribbon<C: Canvas + ?Sized>(canvas: &mut C, envelope: &Envelope) {
    canvas.clear();
    let cols = envelope.columns();
    if cols.is_empty() {
        return;
    }
    let w = canvas.width() as usize;
    let h = canvas.height() as f32;
    let step = (cols.len() / w.max(1)).max(1);
    for x in 0..w {
        let sum: f32 = (0..step)
            .map(|i| cols[(x * step + i).min(cols.len() - 1)].rms)
            .sum();
        canvas.fill_rect(x as f32, 0.0, 1.0, h, ribbon_paint(sum / step as f32));
    }
}

/// Mark columns whose peak reaches `threshold_db` in a belt along the top edge.
pub fn render_true_peak_hotspots<C: Canvas + ?Sized>(
    canvas: &mut C,
    envelope: &Envelope,
    threshold_db: f32,
) {
    let threshold = 10f32.powf(threshold_db / 20.0);
    for (x, col) in envelope.columns().iter().enumerate() {
        if col.abs_peak() >= threshold {
            canvas.fill_rect(x as f32, 0.0, 1.0, HOTSPOT_BELT, HOTSPOT_FILL);
        }
    }
}
