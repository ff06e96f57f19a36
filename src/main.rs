mod ui;

use std::{
    env,
    io::{self, stdout},
    path::PathBuf,
    time::Duration,
};

use ab_preview::{
    CanvasSlot, LoudnessFeed, PlayButton, PlaybackStatus, PlayerHandle, PreviewConfig,
    PreviewEngine, Surfaces, canvas::Canvas, logging,
};
use crossterm::{
    event::{self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEventKind},
    execute,
};
use ratatui::{
    DefaultTerminal, Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::Paragraph,
};
use tracing::{info, warn};

use crate::ui::{GainMeter, panel};

const TRACK_HEIGHT: u16 = 6;
const SEEK_STEP: f64 = 0.05;

struct Track {
    label: String,
    source: String,
    handle: PlayerHandle,
    button: PlayButton,
    waveform: CanvasSlot,
    ribbon: Option<CanvasSlot>,
    spectrum: Option<CanvasSlot>,
}

struct App {
    engine: PreviewEngine,
    tracks: Vec<Track>,
    selected: usize,
    log_path: Option<PathBuf>,
}

struct Areas {
    header: Rect,
    tracks: Vec<(Rect, Rect)>,
    spectrum: Rect,
    metrics: Rect,
    controls: Rect,
}

fn areas(area: Rect, tracks: usize) -> Areas {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(TRACK_HEIGHT * tracks as u16),
        Constraint::Min(6),
        Constraint::Length(3),
    ])
    .split(area);
    let bottom = Layout::horizontal([Constraint::Min(20), Constraint::Length(36)]).split(chunks[2]);

    let rows = Layout::vertical(vec![Constraint::Length(TRACK_HEIGHT); tracks]).split(chunks[1]);
    let tracks = rows
        .iter()
        .map(|row| {
            let inner = panel(String::new()).inner(*row);
            let split = Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).split(inner);
            (split[0], split[1])
        })
        .collect();

    Areas {
        header: chunks[0],
        tracks,
        spectrum: panel(String::new()).inner(bottom[0]),
        metrics: bottom[1],
        controls: chunks[3],
    }
}

/// `label=source` or a bare source, labelled by its file name.
fn parse_source(arg: &str) -> (String, String) {
    if let Some((label, source)) = arg.split_once('=') {
        if !label.is_empty() && !label.contains(['/', ':', '?']) {
            return (label.to_string(), source.to_string());
        }
    }
    let name = arg
        .split(['?', '#'])
        .next()
        .unwrap_or(arg)
        .rsplit('/')
        .next()
        .unwrap_or(arg);
    let label = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    (label.to_string(), arg.to_string())
}

impl App {
    fn new(engine: PreviewEngine, sources: &[(String, String)], log_path: Option<PathBuf>) -> Self {
        let config = engine.config().clone();
        let tracks = sources
            .iter()
            .map(|(label, source)| {
                let button = PlayButton::new();
                let waveform = CanvasSlot::new(1, 1);
                let ribbon = config.show_ribbon.then(|| CanvasSlot::new(1, 2));
                let spectrum = config.show_spectrum.then(|| CanvasSlot::new(1, 1));
                let surfaces = Surfaces {
                    button: button.clone(),
                    waveform: waveform.clone(),
                    spectrum: spectrum.clone(),
                    ribbon: ribbon.clone(),
                };
                let handle = engine.attach_track(label, surfaces, source);
                Track {
                    label: label.clone(),
                    source: source.clone(),
                    handle,
                    button,
                    waveform,
                    ribbon,
                    spectrum,
                }
            })
            .collect();
        App {
            engine,
            tracks,
            selected: 0,
            log_path,
        }
    }

    /// Resize observer: push the current layout's pixel sizes into every player.
    fn layout(&self, area: Rect) {
        let areas = areas(area, self.tracks.len());
        let (spec_w, spec_h) = ui::pixel_size(areas.spectrum);
        for (track, (wave, _)) in self.tracks.iter().zip(&areas.tracks) {
            let (w, h) = ui::pixel_size(*wave);
            if let Some(spectrum) = &track.spectrum {
                spectrum.with_canvas(|c| {
                    if (c.width(), c.height()) != (spec_w, spec_h) {
                        c.resize(spec_w, spec_h);
                    }
                });
            }
            // rejected only for errored or destroyed players, which draw nothing
            let _ = track.handle.resize(w, h);
        }
    }

    fn selected(&self) -> Option<&Track> {
        self.tracks.get(self.selected)
    }

    /// The track whose spectrum is shown: the one playing, else the selection.
    fn focus(&self) -> Option<&Track> {
        self.tracks
            .iter()
            .find(|t| t.handle.status() == PlaybackStatus::Playing)
            .or_else(|| self.selected())
    }

    fn toggle(&self) {
        if let Some(track) = self.selected() {
            if track.button.is_disabled() {
                return;
            }
            if let Err(err) = track.handle.toggle() {
                warn!(track = %track.label, error = %err, "toggle rejected");
            }
        }
    }

    fn seek_by(&self, delta: f64) {
        if let Some(track) = self.selected() {
            let duration = track.handle.snapshot().duration;
            if duration <= 0.0 {
                return;
            }
            let fraction = track.handle.position() / duration + delta;
            Self::seek(track, fraction);
        }
    }

    fn seek_to(&self, fraction: f64) {
        if let Some(track) = self.selected() {
            Self::seek(track, fraction);
        }
    }

    fn seek(track: &Track, fraction: f64) {
        if let Err(err) = track.handle.seek(fraction) {
            warn!(track = %track.label, error = %err, "seek rejected");
        }
    }

    fn toggle_gain_matching(&self) {
        self.engine.set_gain_matching(!self.engine.gain_matching());
    }
}

fn usage() -> ! {
    eprintln!("Usage: ab-preview [--metrics feed.json] [label=]source ...");
    std::process::exit(1);
}

fn main() -> io::Result<()> {
    let mut metrics: Option<PathBuf> = None;
    let mut sources = Vec::new();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--metrics" => match args.next() {
                Some(path) => metrics = Some(PathBuf::from(path)),
                None => usage(),
            },
            "-h" | "--help" => usage(),
            _ => sources.push(parse_source(&arg)),
        }
    }
    if sources.is_empty() {
        usage();
    }
    sources.truncate(9);

    let log_path = logging::init().ok();
    let config = PreviewConfig::load();
    let engine = PreviewEngine::with_defaults(config);
    if let Some(path) = metrics {
        match LoudnessFeed::from_path(&path) {
            Ok(feed) => engine.set_loudness_feed(feed),
            Err(err) => {
                eprintln!("Cannot read {}: {err}", path.display());
                std::process::exit(1);
            }
        }
    }
    info!(tracks = sources.len(), "starting");

    let mut terminal = ratatui::init();
    execute!(stdout(), EnableFocusChange)?;
    let mut app = App::new(engine, &sources, log_path);
    let result = run(&mut terminal, &mut app);
    let _ = execute!(stdout(), DisableFocusChange);
    ratatui::restore();
    result
}

fn run(terminal: &mut DefaultTerminal, app: &mut App) -> io::Result<()> {
    loop {
        let size = terminal.size()?;
        app.layout(Rect::new(0, 0, size.width, size.height));
        app.engine.frame();
        terminal.draw(|f| draw(f, app))?;

        if event::poll(Duration::from_millis(16))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('q') => break,
                    KeyCode::Char(' ') => app.toggle(),
                    KeyCode::Char('g') => app.toggle_gain_matching(),
                    KeyCode::Char('s') => app.engine.stop_all(),
                    KeyCode::Char(c @ '1'..='9') => {
                        let index = c as usize - '1' as usize;
                        if index < app.tracks.len() {
                            app.selected = index;
                        }
                    }
                    KeyCode::Right => app.seek_by(SEEK_STEP),
                    KeyCode::Left => app.seek_by(-SEEK_STEP),
                    KeyCode::Home => app.seek_to(0.0),
                    _ => {}
                },
                // the terminal stand-in for a hidden page
                Event::FocusLost => app.engine.stop_all(),
                _ => {}
            }
        }
    }
    app.engine.stop_all();
    Ok(())
}

fn draw(f: &mut Frame, app: &App) {
    let areas = areas(f.area(), app.tracks.len());

    // Header
    let matching = if app.engine.gain_matching() {
        Span::styled(" Gain match ON ", Style::default().fg(Color::Black).bg(Color::Green))
    } else {
        Span::styled(" Gain match OFF ", Style::default().fg(Color::Black).bg(Color::DarkGray))
    };
    let mut header = vec![matching, Span::raw("  ")];
    if let Some(path) = &app.log_path {
        header.push(Span::styled(
            format!("log: {}", path.display()),
            Style::default().fg(Color::DarkGray),
        ));
    }
    f.render_widget(
        Paragraph::new(Line::from(header)).block(panel(" A/B Preview ".into())),
        areas.header,
    );

    // Tracks
    for (i, (track, (wave, ribbon))) in app.tracks.iter().zip(&areas.tracks).enumerate() {
        let snap = track.handle.snapshot();
        let marker = if i == app.selected { "▶" } else { " " };
        let title = format!(
            " {marker} {} {}  {} / {} ",
            i + 1,
            track.label,
            ui::format_time(track.handle.position()),
            ui::format_time(snap.duration),
        );
        let block = panel(title).title_bottom(Line::from(ui::status_badge(snap.status)));
        let block = if i == app.selected {
            block.border_style(Style::default().fg(Color::Cyan))
        } else {
            block
        };
        f.render_widget(block, outset(*wave, 1, 2));
        ui::render_slot(&track.waveform, *wave, f.buffer_mut());
        match &track.ribbon {
            Some(slot) => ui::render_slot(slot, *ribbon, f.buffer_mut()),
            None => f.render_widget(
                Paragraph::new(track.source.as_str()).style(Style::default().fg(Color::DarkGray)),
                *ribbon,
            ),
        }
    }

    // Spectrum of the focused track
    let focus = app.focus();
    let spec_title = focus
        .map(|t| format!(" Spectrum: {} ", t.label))
        .unwrap_or_else(|| " Spectrum ".into());
    f.render_widget(panel(spec_title), outset(areas.spectrum, 1, 1));
    if let Some(slot) = focus.and_then(|t| t.spectrum.as_ref()) {
        ui::render_slot(slot, areas.spectrum, f.buffer_mut());
    }

    // Metrics and gain of the selected track
    if let Some(track) = app.selected() {
        let block = panel(format!(" {} ", track.label));
        let inner = block.inner(areas.metrics);
        f.render_widget(block, areas.metrics);
        let split = Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).split(inner);
        let rows = app.engine.gains().feed().rows(&track.label);
        f.render_widget(Paragraph::new(ui::metric_lines(&rows)), split[0]);
        let gain = app.engine.gains().gain(&track.label);
        f.render_widget(GainMeter::new(gain, app.engine.gain_matching()), split[1]);
    }

    f.render_widget(
        Paragraph::new(ui::help_line()).block(panel(" Controls ".into())),
        areas.controls,
    );
}

/// The block around an inner area: one cell on each side, `below` rows under it.
fn outset(inner: Rect, above: u16, below: u16) -> Rect {
    Rect {
        x: inner.x.saturating_sub(1),
        y: inner.y.saturating_sub(above),
        width: inner.width + 2,
        height: inner.height + above + below,
    }
}
