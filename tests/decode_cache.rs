mod common;

use std::{cell::RefCell, rc::Rc, sync::Arc};

use ab_preview::{
    decode::{AudioDecoder, DecodeCache, DecodeResult, InlineSpawner, SymphoniaDecoder},
    error::{DecodeCause, FetchError},
    testing::StaticFetcher,
};
use approx::assert_abs_diff_eq;
use common::{SAMPLE_RATE, init_tracing, wav_bytes};

fn cache(fetcher: &StaticFetcher) -> DecodeCache {
    init_tracing();
    DecodeCache::new(
        Arc::new(fetcher.clone()),
        Arc::new(SymphoniaDecoder),
        Box::new(InlineSpawner),
    )
}

fn collect(results: &Rc<RefCell<Vec<DecodeResult>>>) -> impl FnOnce(DecodeResult) + 'static {
    let results = Rc::clone(results);
    move |r| results.borrow_mut().push(r)
}

#[test]
fn decodes_a_pcm_wav() {
    init_tracing();
    let asset = SymphoniaDecoder
        .decode("tone.wav", wav_bytes(1.5, 2))
        .unwrap();
    assert_eq!(asset.sample_rate(), SAMPLE_RATE);
    assert_eq!(asset.channel_count(), 2);
    assert_eq!(asset.frames(), 12_000);
    assert_abs_diff_eq!(asset.duration(), 1.5, epsilon = 1e-9);

    let peak = asset.channel(0).iter().fold(0f32, |m, v| m.max(v.abs()));
    assert_abs_diff_eq!(peak, 0.5, epsilon = 0.01);
    assert_eq!(asset.channel(0), asset.channel(1));
}

#[test]
fn rejects_empty_and_garbage_payloads() {
    assert_eq!(
        SymphoniaDecoder.decode("x.wav", Vec::new()).unwrap_err(),
        DecodeCause::Empty
    );
    let garbage = SymphoniaDecoder
        .decode("x.bin", b"definitely not audio".repeat(64))
        .unwrap_err();
    assert!(matches!(garbage, DecodeCause::Malformed(_)));
}

#[test]
fn results_arrive_only_on_pump() {
    let fetcher = StaticFetcher::new();
    fetcher.insert("a.wav", wav_bytes(0.5, 1));
    let cache = cache(&fetcher);
    let results = Rc::new(RefCell::new(Vec::new()));

    cache.decode("a.wav", collect(&results));
    cache.decode("a.wav", collect(&results));
    assert!(results.borrow().is_empty());
    assert!(cache.is_pending("a.wav"));
    assert_eq!(fetcher.fetches("a.wav"), 1);

    assert_eq!(cache.pump(), 2);
    assert_eq!(results.borrow().len(), 2);
    assert!(results.borrow().iter().all(|r| r.is_ok()));
    assert!(cache.get("a.wav").is_some());

    // cache hit: no fetch, still delivered on pump
    cache.decode("a.wav", collect(&results));
    assert_eq!(results.borrow().len(), 2);
    assert_eq!(cache.pump(), 1);
    assert_eq!(fetcher.fetches("a.wav"), 1);
}

#[test]
fn waiters_run_in_request_order() {
    let fetcher = StaticFetcher::new();
    fetcher.insert("a.wav", wav_bytes(0.25, 1));
    let cache = cache(&fetcher);
    let order = Rc::new(RefCell::new(Vec::new()));

    for tag in 0..3 {
        let order = Rc::clone(&order);
        cache.decode("a.wav", move |result| {
            assert!(result.is_ok());
            order.borrow_mut().push(tag);
        });
    }
    assert_eq!(cache.pump(), 3);
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
    assert_eq!(fetcher.fetches("a.wav"), 1);
}

#[test]
fn failures_are_not_cached() {
    let fetcher = StaticFetcher::new();
    let cache = cache(&fetcher);
    let results = Rc::new(RefCell::new(Vec::new()));

    cache.decode("late.wav", collect(&results));
    cache.pump();
    let err = results.borrow()[0].clone().unwrap_err();
    assert_eq!(err.url, "late.wav");
    assert_eq!(err.cause, DecodeCause::Fetch(FetchError::Status(404)));
    assert!(err.is_missing());
    assert!(!cache.is_pending("late.wav"));

    fetcher.insert("late.wav", wav_bytes(0.5, 1));
    cache.decode("late.wav", collect(&results));
    cache.pump();
    assert!(results.borrow()[1].is_ok());
    assert_eq!(fetcher.fetches("late.wav"), 2);
}

#[test]
fn evicted_assets_decode_again() {
    let fetcher = StaticFetcher::new();
    fetcher.insert("a.wav", wav_bytes(0.25, 1));
    let cache = cache(&fetcher);
    cache.decode("a.wav", |_| {});
    cache.pump();
    cache.evict("a.wav");
    assert!(cache.get("a.wav").is_none());
    cache.decode("a.wav", |_| {});
    assert_eq!(fetcher.fetches("a.wav"), 2);
}
