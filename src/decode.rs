//! Decoded assets and the single-flight decode cache.
//!
//! A decode is fetch + symphonia decode on a worker; the finished asset crosses back over an
//! `mpsc` channel and is handed to every waiter from `DecodeCache::pump`, which the host calls
//! once per frame on its own thread. Waiters are never called from inside `decode`.

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    io::Cursor,
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    thread,
};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, info, warn};

use crate::{
    error::{DecodeCause, DecodeError},
    fetch::{AssetFetcher, SourceFetcher},
};

/// Immutable decoded audio, shared by every player showing the same URL
#[derive(Debug, Clone, PartialEq)]
pub struct AudioAsset {
    url: String,
    /// Planar samples, one `Vec` per channel, all the same length
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioAsset {
    pub fn new(url: impl Into<String>, channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        AudioAsset {
            url: url.into(),
            channels,
            sample_rate,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Interleave from `start_frame` to the end, the layout output devices want.
    pub fn interleaved_from(&self, start_frame: usize) -> Vec<f32> {
        let frames = self.frames();
        let start = start_frame.min(frames);
        let ch = self.channels.len();
        let mut out = Vec::with_capacity((frames - start) * ch);
        for i in start..frames {
            for c in &self.channels {
                out.push(c[i]);
            }
        }
        out
    }
}

/// Byte payload → samples
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, url: &str, bytes: Vec<u8>) -> Result<AudioAsset, DecodeCause>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

fn extension_of(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.').map(|(_, ext)| ext).filter(|e| !e.is_empty())
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, url: &str, bytes: Vec<u8>) -> Result<AudioAsset, DecodeCause> {
        if bytes.is_empty() {
            return Err(DecodeCause::Empty);
        }
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = extension_of(url) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| DecodeCause::Malformed("no audio track".into()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();
        let mut sample_rate = params.sample_rate.unwrap_or(0);
        let mut decoder =
            symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;

        let mut channels: Vec<Vec<f32>> = Vec::new();
        let mut skipped = 0u32;
        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(err) => return Err(err.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(_)) => {
                    skipped += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            if sample_rate == 0 {
                sample_rate = decoded.spec().rate;
            }
            let count = decoded.spec().channels.count().max(1);
            if channels.is_empty() {
                channels = vec![Vec::new(); count];
            }
            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
            buf.copy_interleaved_ref(decoded);
            for frame in buf.samples().chunks(count) {
                for (c, &v) in frame.iter().enumerate() {
                    if let Some(dst) = channels.get_mut(c) {
                        dst.push(v);
                    }
                }
            }
        }

        if skipped > 0 {
            warn!(url, skipped, "skipped undecodable packets");
        }
        if channels.first().is_none_or(Vec::is_empty) {
            return Err(DecodeCause::Empty);
        }
        if sample_rate == 0 {
            return Err(DecodeCause::Malformed("unknown sample rate".into()));
        }
        Ok(AudioAsset::new(url, channels, sample_rate))
    }
}

/// Where decode jobs run
pub trait DecodeSpawner {
    fn spawn(&self, job: Box<dyn FnOnce() + Send>);
}

/// One worker thread per job
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl DecodeSpawner for ThreadSpawner {
    fn spawn(&self, job: Box<dyn FnOnce() + Send>) {
        thread::spawn(job);
    }
}

/// Runs the job immediately on the calling thread. Results still wait for `pump`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineSpawner;

impl DecodeSpawner for InlineSpawner {
    fn spawn(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}

pub type DecodeResult = Result<Arc<AudioAsset>, DecodeError>;
type Waiter = Box<dyn FnOnce(DecodeResult)>;
type Completion = (String, Result<AudioAsset, DecodeError>);

enum Entry {
    Pending(Vec<Waiter>),
    Ready(Arc<AudioAsset>),
}

pub struct DecodeCache {
    fetcher: Arc<dyn AssetFetcher>,
    decoder: Arc<dyn AudioDecoder>,
    spawner: Box<dyn DecodeSpawner>,
    entries: RefCell<HashMap<String, Entry>>,
    /// Cache hits waiting for the next pump
    hits: RefCell<VecDeque<(Waiter, Arc<AudioAsset>)>>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl DecodeCache {
    pub fn new(
        fetcher: Arc<dyn AssetFetcher>,
        decoder: Arc<dyn AudioDecoder>,
        spawner: Box<dyn DecodeSpawner>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        DecodeCache {
            fetcher,
            decoder,
            spawner,
            entries: RefCell::new(HashMap::new()),
            hits: RefCell::new(VecDeque::new()),
            tx,
            rx,
        }
    }

    /// Network/filesystem fetch, symphonia decode, worker threads.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(SourceFetcher),
            Arc::new(SymphoniaDecoder),
            Box::new(ThreadSpawner),
        )
    }

    /// Request `url`. `on_done` runs from a later `pump`, in request order with any other
    /// waiters of the same URL. Only the first request for a URL starts a job.
    pub fn decode(&self, url: &str, on_done: impl FnOnce(DecodeResult) + 'static) {
        let mut entries = self.entries.borrow_mut();
        match entries.get_mut(url) {
            Some(Entry::Ready(asset)) => {
                self.hits
                    .borrow_mut()
                    .push_back((Box::new(on_done), Arc::clone(asset)));
                return;
            }
            Some(Entry::Pending(waiters)) => {
                debug!(url, waiters = waiters.len() + 1, "joining in-flight decode");
                waiters.push(Box::new(on_done));
                return;
            }
            None => {}
        }
        entries.insert(url.to_string(), Entry::Pending(vec![Box::new(on_done)]));
        drop(entries);
        self.start_job(url);
    }

    fn start_job(&self, url: &str) {
        let url = url.to_string();
        let fetcher = Arc::clone(&self.fetcher);
        let decoder = Arc::clone(&self.decoder);
        let tx = self.tx.clone();
        debug!(url = %url, "starting decode");
        self.spawner.spawn(Box::new(move || {
            let result = fetcher
                .fetch(&url)
                .map_err(|e| DecodeError::new(url.as_str(), e))
                .and_then(|bytes| {
                    decoder
                        .decode(&url, bytes)
                        .map_err(|e| DecodeError::new(url.as_str(), e))
                });
            // Receiver gone means the cache was dropped; nobody is waiting.
            let _ = tx.send((url, result));
        }));
    }

    /// Decoded asset for `url` if it is already cached.
    pub fn get(&self, url: &str) -> Option<Arc<AudioAsset>> {
        match self.entries.borrow().get(url) {
            Some(Entry::Ready(asset)) => Some(Arc::clone(asset)),
            _ => None,
        }
    }

    pub fn is_pending(&self, url: &str) -> bool {
        matches!(self.entries.borrow().get(url), Some(Entry::Pending(_)))
    }

    /// Drop a cached asset so the next request decodes again.
    pub fn evict(&self, url: &str) {
        let mut entries = self.entries.borrow_mut();
        if let Some(Entry::Ready(_)) = entries.get(url) {
            entries.remove(url);
        }
    }

    /// Deliver finished decodes and cache hits. Returns how many callbacks ran.
    pub fn pump(&self) -> usize {
        let mut deliveries: Vec<(Waiter, DecodeResult)> = Vec::new();
        deliveries.extend(
            self.hits
                .borrow_mut()
                .drain(..)
                .map(|(waiter, asset)| (waiter, Ok(asset))),
        );

        {
            let mut entries = self.entries.borrow_mut();
            while let Ok((url, result)) = self.rx.try_recv() {
                let waiters = match entries.remove(&url) {
                    Some(Entry::Pending(w)) => w,
                    Some(ready @ Entry::Ready(_)) => {
                        entries.insert(url, ready);
                        continue;
                    }
                    None => Vec::new(),
                };
                let shared = match result {
                    Ok(asset) => {
                        info!(
                            url = %url,
                            seconds = asset.duration(),
                            channels = asset.channel_count(),
                            "decoded"
                        );
                        let asset = Arc::new(asset);
                        entries.insert(url, Entry::Ready(Arc::clone(&asset)));
                        Ok(asset)
                    }
                    Err(err) => {
                        // failures are not cached so a later attach can try again
                        warn!(error = %err, "decode failed");
                        Err(err)
                    }
                };
                deliveries.extend(waiters.into_iter().map(|w| (w, shared.clone())));
            }
        }

        let count = deliveries.len();
        for (waiter, result) in deliveries {
            waiter(result);
        }
        count
    }
}
