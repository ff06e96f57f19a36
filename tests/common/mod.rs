#![allow(dead_code)]

use std::{f64::consts::TAU, io::Cursor, rc::Rc, sync::Arc, sync::Once};

use ab_preview::{
    CanvasSlot, PlayButton, PreviewConfig, PreviewEngine, Surfaces,
    decode::{DecodeCache, InlineSpawner, SymphoniaDecoder},
    testing::{ManualContext, ManualContextFactory, StaticFetcher},
};

static INIT: Once = Once::new();

pub const SAMPLE_RATE: u32 = 8_000;
pub const WAVE_WIDTH: u32 = 200;

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// 16-bit 440 Hz tone at half scale.
pub fn wav_bytes(seconds: f64, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        let frames = (seconds * SAMPLE_RATE as f64).round() as usize;
        for n in 0..frames {
            let t = n as f64 / SAMPLE_RATE as f64;
            let v = (0.5 * (TAU * 440.0 * t).sin() * i16::MAX as f64) as i16;
            for _ in 0..channels {
                writer.write_sample(v).expect("sample");
            }
        }
        writer.finalize().expect("finalize");
    }
    cursor.into_inner()
}

pub fn surfaces() -> Surfaces {
    Surfaces {
        button: PlayButton::new(),
        waveform: CanvasSlot::new(WAVE_WIDTH, 40),
        spectrum: None,
        ribbon: None,
    }
}

pub fn surfaces_with_spectrum() -> Surfaces {
    Surfaces {
        spectrum: Some(CanvasSlot::new(WAVE_WIDTH, 40)),
        ribbon: Some(CanvasSlot::new(WAVE_WIDTH, 2)),
        ..surfaces()
    }
}

/// An engine on a hand-driven clock and an in-memory network
pub struct Rig {
    pub engine: PreviewEngine,
    pub ctx: Rc<ManualContext>,
    pub factory: ManualContextFactory,
    pub fetcher: StaticFetcher,
}

impl Rig {
    pub fn new() -> Self {
        Self::build(PreviewConfig::default(), ManualContext::new())
    }

    pub fn build(config: PreviewConfig, ctx: ManualContext) -> Self {
        init_tracing();
        let ctx = Rc::new(ctx);
        let factory = ManualContextFactory::new(Rc::clone(&ctx));
        let fetcher = StaticFetcher::new();
        let cache = DecodeCache::new(
            Arc::new(fetcher.clone()),
            Arc::new(SymphoniaDecoder),
            Box::new(InlineSpawner),
        );
        let engine = PreviewEngine::new(config, Box::new(factory.clone()), cache);
        Rig {
            engine,
            ctx,
            factory,
            fetcher,
        }
    }

    pub fn serve(&self, url: &str, seconds: f64) {
        self.fetcher.insert(url, wav_bytes(seconds, 2));
    }

    pub fn frames(&self, n: usize) {
        for _ in 0..n {
            self.engine.frame();
        }
    }
}
