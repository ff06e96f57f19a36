use ab_preview::{
    PlaybackStatus,
    control::{CanvasSlot, SlotContent},
    gain::MetricRow,
};
use image::{Rgba, RgbaImage};
use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};

/// Backdrop the translucent canvas pixels are composited over
pub const BACKDROP: (u8, u8, u8) = (10, 12, 16);

pub fn panel(title: String) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .title(title)
}

fn blend(px: u8, bg: u8, opacity: f32) -> u8 {
    (px as f32 * opacity + bg as f32 * (1.0 - opacity)) as u8
}

fn over_backdrop(p: &Rgba<u8>) -> Color {
    let o = p[3] as f32 / 255.0;
    Color::Rgb(
        blend(p[0], BACKDROP.0, o),
        blend(p[1], BACKDROP.1, o),
        blend(p[2], BACKDROP.2, o),
    )
}

/// Draws an RGBA surface with half blocks: two pixel rows per terminal row.
pub struct CanvasWidget<'a> {
    image: &'a RgbaImage,
}

impl<'a> CanvasWidget<'a> {
    pub fn new(image: &'a RgbaImage) -> Self {
        CanvasWidget { image }
    }
}

impl Widget for CanvasWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let rows = (area.height as u32).min(self.image.height().div_ceil(2));
        let cols = (area.width as u32).min(self.image.width());
        for cy in 0..rows {
            let top_y = cy * 2;
            for cx in 0..cols {
                let top = self.image.get_pixel(cx, top_y);
                let bot = if top_y + 1 < self.image.height() {
                    self.image.get_pixel(cx, top_y + 1)
                } else {
                    top
                };
                let x = area.x + cx as u16;
                let y = area.y + cy as u16;
                buf[(x, y)]
                    .set_char('▀')
                    .set_fg(over_backdrop(top))
                    .set_bg(over_backdrop(bot));
            }
        }
    }
}

/// Pixel size a slot needs to fill `area`.
pub fn pixel_size(area: Rect) -> (u32, u32) {
    (area.width as u32, area.height as u32 * 2)
}

/// A canvas slot, or its caption once the canvas was replaced.
pub fn render_slot(slot: &CanvasSlot, area: Rect, buf: &mut Buffer) {
    match slot.snapshot() {
        SlotContent::Canvas(canvas) => CanvasWidget::new(canvas.image()).render(area, buf),
        SlotContent::Text(text) => Paragraph::new(text)
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center)
            .render(area, buf),
    }
}

pub fn status_badge(status: PlaybackStatus) -> Span<'static> {
    let (label, bg) = match status {
        PlaybackStatus::Idle => (" Queued ", Color::DarkGray),
        PlaybackStatus::Loading => (" Loading ", Color::Blue),
        PlaybackStatus::Ready => (" Ready ", Color::Cyan),
        PlaybackStatus::Playing => (" Playing ", Color::Green),
        PlaybackStatus::Paused => (" Paused ", Color::Yellow),
        PlaybackStatus::Ended => (" Ended ", Color::Cyan),
        PlaybackStatus::Error => (" Error ", Color::Red),
    };
    Span::styled(label, Style::default().fg(Color::Black).bg(bg))
}

pub fn format_time(seconds: f64) -> String {
    let secs = seconds.max(0.0) as u64;
    format!("{}:{:02}", secs / 60, secs % 60)
}

pub fn metric_lines(rows: &[MetricRow]) -> Vec<Line<'static>> {
    let head = Style::default().fg(Color::DarkGray);
    let mut lines = vec![Line::from(vec![
        Span::styled(format!("{:<12}", ""), head),
        Span::styled(format!("{:>10}", "Input"), head),
        Span::styled(format!("{:>10}", "Output"), head),
    ])];
    for row in rows {
        lines.push(Line::from(vec![
            Span::styled(format!("{:<12}", row.label), head),
            Span::raw(format!("{:>10}", MetricRow::format(row.input))),
            Span::raw(format!("{:>10}", MetricRow::format(row.output))),
        ]));
    }
    lines
}

/// Single-row meter for the applied gain, 0 dB mark in the middle of the 0.1..2.5 range.
pub struct GainMeter {
    gain: f64,
    enabled: bool,
}

impl GainMeter {
    pub fn new(gain: f64, enabled: bool) -> Self {
        GainMeter { gain, enabled }
    }
}

impl Widget for GainMeter {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.width < 2 || area.height == 0 {
            return;
        }
        let width = area.width as usize;
        let db = 20.0 * self.gain.max(1e-6).log10();
        // -20 dB .. +8 dB across the bar
        let ratio = ((db + 20.0) / 28.0).clamp(0.0, 1.0);
        let filled = (ratio * width as f64).round() as usize;
        let unity = ((20.0 / 28.0) * width as f64) as usize;
        let color = if !self.enabled {
            Color::DarkGray
        } else if db > 0.0 {
            Color::Yellow
        } else {
            Color::Green
        };
        for col in 0..width {
            let x = area.x + col as u16;
            let (ch, fg) = if col == unity {
                ('┃', Color::White)
            } else if col < filled {
                ('━', color)
            } else {
                ('─', Color::DarkGray)
            };
            buf[(x, area.y)].set_char(ch).set_fg(fg);
        }
        let label = if self.enabled {
            format!(" {db:+.1} dB ")
        } else {
            " off ".to_string()
        };
        if label.len() <= width {
            let start = area.x + (width - label.len()) as u16 / 2;
            buf.set_string(start, area.y, label, Style::default().fg(Color::White));
        }
    }
}

pub fn help_line() -> Line<'static> {
    let key = Style::default().fg(Color::Black).bg(Color::Yellow);
    Line::from(vec![
        Span::styled(" 1-9 ", key),
        Span::raw(" Select  "),
        Span::styled(" Space ", key),
        Span::raw(" Play/Pause  "),
        Span::styled(" ←/→ ", key),
        Span::raw(" Seek ±5%  "),
        Span::styled(" Home ", key),
        Span::raw(" Start  "),
        Span::styled(" g ", key),
        Span::raw(" Gain match  "),
        Span::styled(" s ", key),
        Span::raw(" Stop all  "),
        Span::styled(" q ", key),
        Span::raw(" Quit"),
    ])
}
