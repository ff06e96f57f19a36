//! Live frequency analysis of whatever a playback graph is currently sending to the device.
//!
//! The graph carries a `TappedSource` that copies the mono mix of each output frame into a
//! shared ring; `Analyser::byte_frequency_data` turns the latest window of that ring into
//! smoothed, dB-scaled byte magnitudes.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use rodio::Source;
use rustfft::{Fft, FftPlanner, num_complex::Complex};

// Shared ring buffer for audio samples
pub type SampleBuf = Arc<Mutex<VecDeque<f32>>>;

pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const DEFAULT_SMOOTHING: f32 = 0.82;
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

pub struct Analyser {
    samples: SampleBuf,
    fft_size: usize,
    smoothing: f32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl Analyser {
    /// `fft_size` is rounded up to a power of two, minimum 32.
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.next_power_of_two().max(32);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        // Blackman window
        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let x = i as f32 / n;
                0.42 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
                    + 0.08 * (4.0 * std::f32::consts::PI * x).cos()
            })
            .collect();
        Analyser {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(fft_size))),
            fft_size,
            smoothing: smoothing.clamp(0.0, 1.0),
            fft,
            window,
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Handle for the audio side of the graph
    pub fn tap(&self) -> AnalyserTap {
        AnalyserTap {
            samples: Arc::clone(&self.samples),
            capacity: self.fft_size,
        }
    }

    /// Feed mono samples directly, bypassing a graph.
    pub fn push_samples(&self, samples: &[f32]) {
        if let Ok(mut buf) = self.samples.lock() {
            for &s in samples {
                push_bounded(&mut buf, s, self.fft_size);
            }
        }
    }

    /// Forget buffered audio and smoothing history, e.g. when the graph is torn down.
    pub fn reset(&mut self) {
        if let Ok(mut buf) = self.samples.lock() {
            buf.clear();
        }
        self.smoothed.fill(0.0);
    }

    /// Fill `out` with magnitudes mapped from [-100, -30] dB onto 0..=255.
    pub fn byte_frequency_data(&mut self, out: &mut [u8]) {
        let latest: Vec<f32> = match self.samples.lock() {
            Ok(buf) => buf.iter().copied().collect(),
            Err(_) => Vec::new(),
        };

        // Newest samples sit at the end of the window; missing history is silence.
        let pad = self.fft_size - latest.len().min(self.fft_size);
        let tail = &latest[latest.len().saturating_sub(self.fft_size)..];
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let s = if i < pad { 0.0 } else { tail[i - pad] };
            *slot = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let n = self.fft_size as f32;
        let tau = self.smoothing;
        let scale = 255.0 / (MAX_DB - MIN_DB);
        for (k, slot) in out.iter_mut().enumerate().take(self.smoothed.len()) {
            let magnitude = self.scratch[k].norm() / n;
            let smoothed = tau * self.smoothed[k] + (1.0 - tau) * magnitude;
            self.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };
            let db = 20.0 * self.smoothed[k].max(1e-12).log10();
            *slot = (scale * (db - MIN_DB)).clamp(0.0, 255.0) as u8;
        }
    }
}

impl Default for Analyser {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE, DEFAULT_SMOOTHING)
    }
}

fn push_bounded(buf: &mut VecDeque<f32>, sample: f32, cap: usize) {
    if buf.len() >= cap {
        buf.pop_front();
    }
    buf.push_back(sample);
}

/// The writing end of an analyser, carried inside a playback graph
#[derive(Debug, Clone)]
pub struct AnalyserTap {
    samples: SampleBuf,
    capacity: usize,
}

impl AnalyserTap {
    pub fn wrap<S: Source<Item = f32>>(&self, source: S) -> TappedSource<S> {
        TappedSource::new(source, Arc::clone(&self.samples), self.capacity)
    }

    pub fn feeds(&self, analyser: &Analyser) -> bool {
        Arc::ptr_eq(&self.samples, &analyser.samples)
    }
}

// Source wrapper that copies the mono mix of each frame to a shared buffer
pub struct TappedSource<S> {
    inner: S,
    buf: SampleBuf,
    cap: usize,
    frame_sum: f32,
    frame_pos: u16,
}

impl<S> TappedSource<S>
where
    S: Source<Item = f32>,
{
    pub fn new(source: S, buf: SampleBuf, cap: usize) -> Self {
        TappedSource {
            inner: source,
            buf,
            cap,
            frame_sum: 0.0,
            frame_pos: 0,
        }
    }
}

impl<S> Iterator for TappedSource<S>
where
    S: Source<Item = f32>,
{
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self.inner.next()?;
        let channels = self.inner.channels().max(1);
        self.frame_sum += sample;
        self.frame_pos += 1;
        if self.frame_pos >= channels {
            let mono = self.frame_sum / channels as f32;
            self.frame_sum = 0.0;
            self.frame_pos = 0;
            // never block the audio thread on the UI side
            if let Ok(mut buf) = self.buf.try_lock() {
                push_bounded(&mut buf, mono, self.cap);
            }
        }
        Some(sample)
    }
}

impl<S> Source for TappedSource<S>
where
    S: Source<Item = f32>,
{
    fn current_span_len(&self) -> Option<usize> {
        self.inner.current_span_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }

    fn try_seek(&mut self, pos: Duration) -> Result<(), rodio::source::SeekError> {
        let result = self.inner.try_seek(pos);
        if result.is_ok() {
            if let Ok(mut buf) = self.buf.lock() {
                buf.clear();
            }
            self.frame_sum = 0.0;
            self.frame_pos = 0;
        }
        result
    }
}
