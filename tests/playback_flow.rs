mod common;

use ab_preview::{
    LoudnessFeed, PlaybackState, PlaybackStatus, PlayerError, PreviewConfig,
    canvas::Canvas,
    control::PREVIEW_UNAVAILABLE,
    error::GraphError,
    testing::ManualContext,
};
use approx::assert_relative_eq;
use common::{Rig, WAVE_WIDTH, surfaces, surfaces_with_spectrum};

fn paused_offset(state: PlaybackState) -> f64 {
    match state {
        PlaybackState::Paused { offset } => offset,
        other => panic!("expected Paused, got {other:?}"),
    }
}

#[test]
fn decoded_track_becomes_playable_and_draws() {
    let rig = Rig::new();
    rig.serve("a.wav", 2.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    assert_eq!(a.status(), PlaybackStatus::Loading);
    assert!(a.surfaces().button.is_disabled());

    rig.frames(1);
    assert_eq!(a.status(), PlaybackStatus::Ready);
    assert!(!a.surfaces().button.is_disabled());
    assert!(!a.surfaces().button.is_pressed());
    assert_relative_eq!(a.snapshot().duration, 2.0);

    let drawn = a
        .surfaces()
        .waveform
        .with_canvas(|c| c.image().pixels().any(|p| p[3] > 0));
    assert_eq!(drawn, Some(true));
}

#[test]
fn context_is_created_on_first_play_only() {
    let rig = Rig::new();
    rig.serve("a.wav", 2.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(2);
    assert_eq!(rig.factory.created(), 0);
    assert!(!rig.engine.contexts().is_created());

    a.play().unwrap();
    assert_eq!(rig.factory.created(), 1);
    assert_eq!(rig.ctx.resume_count(), 1);
    a.pause().unwrap();
    a.play().unwrap();
    assert_eq!(rig.factory.created(), 1);
}

#[test]
fn starting_b_pauses_a_where_it_was() {
    let rig = Rig::new();
    rig.serve("a.wav", 10.0);
    rig.serve("b.wav", 8.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    let b = rig.engine.attach_track("b", surfaces(), "b.wav");
    rig.frames(1);

    a.play().unwrap();
    assert_eq!(rig.engine.bus().holder(), Some(a.id()));
    rig.ctx.advance(0.1);
    b.play().unwrap();

    assert_relative_eq!(paused_offset(a.state()), 0.1, epsilon = 1e-9);
    assert_eq!(b.status(), PlaybackStatus::Playing);
    assert_eq!(b.snapshot().device_start_time, Some(0.1));
    assert_eq!(rig.engine.bus().holder(), Some(b.id()));
    assert!(!a.surfaces().button.is_pressed());
    assert!(b.surfaces().button.is_pressed());

    let live = rig.ctx.live_graphs();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].url(), "b.wav");
}

#[test]
fn pause_then_play_resumes_from_the_offset() {
    let rig = Rig::new();
    rig.serve("a.wav", 10.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    a.play().unwrap();
    rig.ctx.advance(2.5);
    assert_relative_eq!(a.position(), 2.5, epsilon = 1e-9);
    a.pause().unwrap();
    assert_relative_eq!(paused_offset(a.state()), 2.5, epsilon = 1e-9);
    assert_eq!(rig.engine.bus().holder(), None);

    rig.ctx.advance(3.0);
    assert_relative_eq!(a.position(), 2.5, epsilon = 1e-9);

    a.play().unwrap();
    let graphs = rig.ctx.graphs();
    assert_eq!(graphs.len(), 2);
    assert!(graphs[0].is_stopped());
    assert_relative_eq!(graphs[1].offset(), 2.5, epsilon = 1e-9);
    assert_eq!(a.snapshot().device_start_time, Some(5.5));
}

#[test]
fn toggle_flips_between_playing_and_paused() {
    let rig = Rig::new();
    rig.serve("a.wav", 4.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    a.toggle().unwrap();
    assert_eq!(a.status(), PlaybackStatus::Playing);
    a.toggle().unwrap();
    assert_eq!(a.status(), PlaybackStatus::Paused);

    // redundant calls are accepted
    a.pause().unwrap();
    a.play().unwrap();
    a.play().unwrap();
    assert_eq!(rig.ctx.live_graphs().len(), 1);
}

#[test]
fn seek_moves_the_playhead_column() {
    let rig = Rig::new();
    rig.serve("a.wav", 10.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    a.seek(0.25).unwrap();
    let snap = a.snapshot();
    assert_eq!(snap.status, PlaybackStatus::Ready);
    assert_relative_eq!(snap.offset_seconds, 2.5, epsilon = 1e-9);
    assert_eq!(snap.playhead_column, Some((0.25 * WAVE_WIDTH as f64) as u32));

    a.seek(0.333).unwrap();
    assert_eq!(
        a.snapshot().playhead_column,
        Some((0.333 * WAVE_WIDTH as f64).floor() as u32)
    );

    a.seek(f64::NAN).unwrap();
    assert_eq!(a.snapshot().offset_seconds, 0.0);
    assert_eq!(a.snapshot().playhead_column, Some(0));
}

#[test]
fn seek_while_playing_restarts_at_the_new_offset() {
    let rig = Rig::new();
    rig.serve("a.wav", 10.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    a.play().unwrap();
    rig.ctx.advance(1.0);
    a.seek(0.5).unwrap();

    assert_eq!(a.status(), PlaybackStatus::Playing);
    assert_eq!(rig.engine.bus().holder(), Some(a.id()));
    let graphs = rig.ctx.graphs();
    assert_eq!(graphs.len(), 2);
    assert!(graphs[0].is_stopped());
    assert_relative_eq!(graphs[1].offset(), 5.0, epsilon = 1e-9);
    assert_eq!(a.snapshot().device_start_time, Some(1.0));
}

#[test]
fn seek_to_the_end_while_playing_ends_the_track() {
    let rig = Rig::new();
    rig.serve("a.wav", 10.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    a.play().unwrap();
    rig.ctx.advance(2.0);
    a.seek(1.0).unwrap();

    let graphs = rig.ctx.graphs();
    assert_eq!(graphs.len(), 2);
    assert_relative_eq!(graphs[1].offset(), 10.0, epsilon = 1e-9);
    assert_eq!(a.status(), PlaybackStatus::Playing);

    rig.frames(1);
    assert_eq!(a.status(), PlaybackStatus::Ended);
    assert_eq!(rig.engine.bus().holder(), None);
    assert!(rig.ctx.live_graphs().is_empty());

    a.play().unwrap();
    assert_eq!(rig.ctx.graphs().last().map(|g| g.offset()), Some(0.0));
}

#[test]
fn play_after_seeking_to_the_end_starts_from_the_top() {
    let rig = Rig::new();
    rig.serve("a.wav", 10.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    a.seek(1.0).unwrap();
    a.play().unwrap();
    assert_eq!(rig.ctx.graphs().last().map(|g| g.offset()), Some(0.0));
    assert_eq!(a.status(), PlaybackStatus::Playing);
}

#[test]
fn natural_end_rewinds_and_releases_the_bus() {
    let rig = Rig::new();
    rig.serve("a.wav", 1.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    a.play().unwrap();
    rig.frames(1);
    assert_eq!(a.status(), PlaybackStatus::Playing);

    rig.ctx.advance(1.0);
    rig.frames(1);
    let snap = a.snapshot();
    assert_eq!(snap.status, PlaybackStatus::Ended);
    assert_eq!(snap.offset_seconds, 0.0);
    assert_eq!(snap.playhead_column, Some(0));
    assert_eq!(rig.engine.bus().holder(), None);
    assert!(rig.ctx.live_graphs().is_empty());
    assert!(!a.surfaces().button.is_pressed());

    a.play().unwrap();
    assert_eq!(rig.ctx.graphs().last().map(|g| g.offset()), Some(0.0));
}

#[test]
fn yielded_player_ignores_its_old_tick() {
    let rig = Rig::new();
    rig.serve("a.wav", 10.0);
    rig.serve("b.wav", 30.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    let b = rig.engine.attach_track("b", surfaces(), "b.wav");
    rig.frames(1);

    a.play().unwrap();
    rig.frames(1);
    rig.ctx.advance(0.5);
    b.play().unwrap();

    // far past the end of a; a tick from its old run would end it
    rig.ctx.advance(20.0);
    rig.frames(3);
    assert_relative_eq!(paused_offset(a.state()), 0.5, epsilon = 1e-9);
    assert_eq!(b.status(), PlaybackStatus::Playing);
}

#[test]
fn stop_all_pauses_the_holder() {
    let rig = Rig::new();
    rig.serve("a.wav", 10.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    a.play().unwrap();
    rig.ctx.advance(3.0);
    rig.engine.stop_all();
    assert_relative_eq!(paused_offset(a.state()), 3.0, epsilon = 1e-9);
    assert_eq!(rig.engine.bus().holder(), None);
    assert!(rig.ctx.live_graphs().is_empty());
}

#[test]
fn missing_asset_disables_the_card() {
    let rig = Rig::new();
    let a = rig.engine.attach_track("a", surfaces(), "missing.wav");
    rig.frames(1);

    let snap = a.snapshot();
    assert_eq!(snap.status, PlaybackStatus::Error);
    assert!(snap.error.is_some());
    assert!(a.surfaces().button.is_disabled());
    assert_eq!(
        a.surfaces().waveform.text().as_deref(),
        Some(PREVIEW_UNAVAILABLE)
    );
    assert_eq!(
        a.play(),
        Err(PlayerError::InvalidTransition {
            op: "play",
            status: PlaybackStatus::Error
        })
    );
}

#[test]
fn concurrent_attaches_share_one_fetch() {
    let rig = Rig::new();
    rig.serve("shared.wav", 2.0);
    let a = rig.engine.attach_track("a", surfaces(), "shared.wav");
    let b = rig.engine.attach_track("b", surfaces(), "shared.wav");
    assert_eq!(rig.fetcher.fetches("shared.wav"), 1);

    rig.frames(1);
    assert_eq!(a.status(), PlaybackStatus::Ready);
    assert_eq!(b.status(), PlaybackStatus::Ready);

    let c = rig.engine.attach_track("c", surfaces(), "shared.wav");
    rig.frames(1);
    assert_eq!(c.status(), PlaybackStatus::Ready);
    assert_eq!(rig.fetcher.fetches("shared.wav"), 1);
}

#[test]
fn graph_failure_leaves_the_player_paused() {
    let rig = Rig::new();
    rig.serve("a.wav", 10.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    rig.ctx.fail_next(GraphError::Device("unplugged".into()));
    assert_eq!(a.play(), Ok(()));
    assert_eq!(paused_offset(a.state()), 0.0);
    assert_eq!(rig.engine.bus().holder(), None);
    assert!(!a.surfaces().button.is_pressed());

    a.play().unwrap();
    assert_eq!(a.status(), PlaybackStatus::Playing);
}

#[test]
fn preview_falls_back_to_the_full_file() {
    let rig = Rig::new();
    rig.serve("/download/s1/club.wav", 3.0);
    let a = rig
        .engine
        .attach_track("club", surfaces(), "/stream/s1/club_preview.wav");
    rig.frames(2);

    let snap = a.snapshot();
    assert_eq!(snap.status, PlaybackStatus::Ready);
    assert_eq!(snap.url.as_deref(), Some("/download/s1/club.wav"));
    assert_eq!(rig.fetcher.fetches("/stream/s1/club_preview.wav"), 1);
    assert_eq!(rig.fetcher.fetches("/download/s1/club.wav"), 1);
}

#[test]
fn ready_gate_defers_and_retries_the_decode() {
    let config = PreviewConfig {
        retry_attempts: 1,
        retry_delay_frames: 2,
        ..PreviewConfig::default()
    };
    let rig = Rig::build(config, ManualContext::new());
    let a = rig.engine.attach_when_ready("late", surfaces(), "late.wav");
    rig.frames(2);
    assert_eq!(a.status(), PlaybackStatus::Loading);
    assert_eq!(rig.fetcher.fetches("late.wav"), 0);

    rig.engine.mark_ready("late");
    assert_eq!(rig.fetcher.fetches("late.wav"), 1);
    rig.frames(1);
    assert_eq!(a.status(), PlaybackStatus::Loading);

    rig.serve("late.wav", 2.0);
    rig.frames(6);
    assert_eq!(a.status(), PlaybackStatus::Ready);
    assert_eq!(rig.fetcher.fetches("late.wav"), 2);
}

#[test]
fn retries_run_out_into_error() {
    let config = PreviewConfig {
        retry_attempts: 2,
        retry_delay_frames: 0,
        ..PreviewConfig::default()
    };
    let rig = Rig::build(config, ManualContext::new());
    let a = rig.engine.attach_when_ready("gone", surfaces(), "gone.wav");
    rig.engine.mark_ready("gone");
    rig.frames(12);
    assert_eq!(a.status(), PlaybackStatus::Error);
    assert_eq!(rig.fetcher.fetches("gone.wav"), 3);
}

#[test]
fn element_playback_reuses_one_element() {
    let rig = Rig::build(PreviewConfig::default(), ManualContext::without_buffer_graphs());
    rig.serve("a.wav", 10.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    a.play().unwrap();
    let elements = rig.ctx.elements();
    assert_eq!(elements.len(), 1);
    assert!(elements[0].is_playing());
    assert_eq!(elements[0].position(), 0.0);

    rig.ctx.advance(2.0);
    a.pause().unwrap();
    assert!(!elements[0].is_playing());
    a.seek(0.5).unwrap();
    a.play().unwrap();

    assert_eq!(rig.ctx.elements().len(), 1);
    assert!(rig.ctx.graphs().is_empty());
    assert!(elements[0].is_playing());
    assert_relative_eq!(elements[0].position(), 5.0, epsilon = 1e-9);
}

#[test]
fn gain_follows_the_feed_and_the_switch() {
    let rig = Rig::new();
    rig.serve("club.wav", 4.0);
    rig.engine.set_loudness_feed(
        LoudnessFeed::from_json(
            r#"{"reference_lufs": -14.0,
                "tracks": {"club": {"output": {"integrated_loudness_lufs": -20.0}}}}"#,
        )
        .unwrap(),
    );
    let a = rig.engine.attach_track("club", surfaces(), "club.wav");
    rig.frames(1);

    a.play().unwrap();
    let graph = rig.ctx.graphs()[0].clone();
    assert_relative_eq!(graph.gain(), 1.995_262_3, epsilon = 1e-5);

    rig.engine.set_gain_matching(false);
    assert_eq!(graph.gain(), 1.0);
    rig.engine.set_gain_matching(true);
    assert_relative_eq!(graph.gain(), 1.995_262_3, epsilon = 1e-5);
}

#[test]
fn spectrum_surface_taps_the_graph() {
    let rig = Rig::new();
    rig.serve("a.wav", 4.0);
    let a = rig.engine.attach_track("a", surfaces_with_spectrum(), "a.wav");
    let b = rig.engine.attach_track("b", surfaces(), "a.wav");
    rig.frames(1);

    a.play().unwrap();
    assert!(rig.ctx.graphs()[0].has_tap());
    b.play().unwrap();
    assert!(!rig.ctx.graphs()[1].has_tap());
}

#[test]
fn resize_redraws_at_the_new_width() {
    let rig = Rig::new();
    rig.serve("a.wav", 10.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    a.resize(100, 30).unwrap();
    assert_eq!(a.surfaces().waveform.size(), Some((100, 30)));
    a.seek(0.5).unwrap();
    assert_eq!(a.snapshot().playhead_column, Some(50));
}

#[test]
fn destroyed_player_is_silent_and_inert() {
    let rig = Rig::new();
    rig.serve("a.wav", 10.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    rig.frames(1);

    a.play().unwrap();
    a.destroy();
    a.destroy();
    assert!(a.is_destroyed());
    assert_eq!(rig.engine.bus().holder(), None);
    assert!(rig.ctx.graphs()[0].is_stopped());
    assert!(rig.engine.players().is_empty());
    assert_eq!(a.play(), Err(PlayerError::Destroyed));
    assert_eq!(a.resize(10, 10), Err(PlayerError::Destroyed));
    a.surfaces()
        .waveform
        .with_canvas(|c| assert_eq!(c.width(), WAVE_WIDTH));
}

#[test]
fn decode_outlives_a_destroyed_player() {
    let rig = Rig::new();
    rig.serve("a.wav", 2.0);
    let a = rig.engine.attach_track("a", surfaces(), "a.wav");
    a.destroy();
    assert!(rig.engine.cache().get("a.wav").is_none());

    rig.frames(1);
    assert!(rig.engine.cache().get("a.wav").is_some());
    assert!(a.is_destroyed());
    assert_eq!(a.status(), PlaybackStatus::Idle);
    assert!(a.surfaces().button.is_disabled());
    assert_eq!(a.play(), Err(PlayerError::Destroyed));
    assert_eq!(rig.factory.created(), 0);
    assert!(rig.ctx.graphs().is_empty());
}
