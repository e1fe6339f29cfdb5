use crate::format;
use crate::settings::Theme;
use crate::state::{Family, MetricKind, MetricUnit, Snapshot};
use image::{Rgba, RgbaImage};
use thiserror::Error;

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 360;
pub const HISTORY_BARS: usize = 20;

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
const BAR_WIDTH: u32 = 8;
const BAR_GAP: u32 = 4;
const BAR_MIN_HEIGHT: u32 = 4;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("недопустимый размер кадра {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
}

/// Everything a frame shows, resolved from the current snapshot and history.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameView {
    pub title: String,
    pub subtitle: String,
    pub value_text: String,
    /// Bar heights normalized to 0..=1, oldest first.
    pub bars: Vec<f64>,
    pub details: Vec<(String, String)>,
}

impl FrameView {
    pub fn build(metric: MetricKind, snapshot: &Snapshot, history: &[f64]) -> Self {
        let recent = &history[history.len().saturating_sub(HISTORY_BARS)..];
        let scale = match metric.unit() {
            MetricUnit::Percent => 100.0,
            MetricUnit::BytesPerSec => recent.iter().copied().fold(0.0_f64, f64::max),
        };
        let bars = recent
            .iter()
            .map(|v| if scale > 0.0 { (v / scale).clamp(0.0, 1.0) } else { 0.0 })
            .collect();

        let details = if metric.family() == Family::Cpu {
            vec![
                ("USER".to_string(), format::percent(snapshot.cpu.user)),
                ("SYSTEM".to_string(), format::percent(snapshot.cpu.system)),
                ("IDLE".to_string(), format::percent(snapshot.cpu.idle)),
            ]
        } else {
            Vec::new()
        };

        Self {
            title: "ACTIVITY MONITOR".to_string(),
            subtitle: metric.display_name().to_uppercase(),
            value_text: format::metric_value(metric, metric.value(snapshot)),
            bars,
            details,
        }
    }
}

/// Turns a [`FrameView`] into a raster image.
pub trait Renderer: Send + Sync {
    fn render(&self, view: &FrameView, theme: Theme) -> Result<RgbaImage, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: Rgba<u8>,
    pub primary: Rgba<u8>,
    pub secondary: Rgba<u8>,
    pub accent: Rgba<u8>,
}

impl Palette {
    pub fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                background: Rgba([18, 18, 18, 255]),
                primary: Rgba([240, 240, 240, 255]),
                secondary: Rgba([160, 160, 160, 255]),
                accent: Rgba([10, 132, 255, 255]),
            },
            Theme::Light | Theme::System => Self {
                background: Rgba([255, 255, 255, 255]),
                primary: Rgba([20, 20, 20, 255]),
                secondary: Rgba([128, 128, 128, 255]),
                accent: Rgba([0, 122, 255, 255]),
            },
        }
    }
}

/// Software renderer with a built-in 5x7 bitmap font.
#[derive(Debug, Clone, Copy)]
pub struct RasterRenderer {
    width: u32,
    height: u32,
}

impl Default for RasterRenderer {
    fn default() -> Self {
        Self {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
        }
    }
}

impl RasterRenderer {
    pub fn with_size(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Renderer for RasterRenderer {
    fn render(&self, view: &FrameView, theme: Theme) -> Result<RgbaImage, RenderError> {
        let (w, h) = (self.width, self.height);
        if w < 64 || h < 64 {
            return Err(RenderError::InvalidSize {
                width: w,
                height: h,
            });
        }
        let palette = Palette::for_theme(theme);
        let mut img = RgbaImage::from_pixel(w, h, palette.background);
        let unit = (h / 120).max(1);
        let margin = (w / 20).max(2);
        let inner = w - 2 * margin;

        let title_scale = fit_scale(&view.title, unit * 3, inner);
        draw_text(&mut img, &view.title, w / 2, h * 4 / 100, title_scale, palette.primary);
        let subtitle_scale = fit_scale(&view.subtitle, unit * 2, inner);
        draw_text(&mut img, &view.subtitle, w / 2, h * 17 / 100, subtitle_scale, palette.secondary);
        let value_scale = fit_scale(&view.value_text, (unit * 8).min(h * 22 / 100 / GLYPH_H), inner);
        draw_text(&mut img, &view.value_text, w / 2, h * 30 / 100, value_scale, palette.accent);

        let bar_top = h * 55 / 100;
        let bar_bottom = h * 80 / 100;
        draw_bars(&mut img, &view.bars, bar_top, bar_bottom, unit, inner, palette.accent);

        if !view.details.is_empty() {
            let columns = view.details.len() as u32;
            let column_w = (w / columns).saturating_sub(margin).max(1);
            let wanted = (unit * 2).min(h * 7 / 100 / GLYPH_H);
            for (i, (label, value)) in view.details.iter().enumerate() {
                let cx = w * (2 * i as u32 + 1) / (2 * columns);
                let label_scale = fit_scale(label, wanted, column_w);
                draw_text(&mut img, label, cx, h * 84 / 100, label_scale, palette.secondary);
                let detail_scale = fit_scale(value, wanted, column_w);
                draw_text(&mut img, value, cx, h * 91 / 100, detail_scale, palette.primary);
            }
        }

        Ok(img)
    }
}

/// Largest scale up to `wanted` at which `text` is no wider than `max_width`.
fn fit_scale(text: &str, wanted: u32, max_width: u32) -> u32 {
    let count = text.chars().count() as u32;
    if count == 0 {
        return wanted.max(1);
    }
    let units = count * (GLYPH_W + 1) - 1;
    wanted.min(max_width / units).max(1)
}

fn text_width(text: &str, scale: u32) -> u32 {
    let count = text.chars().count() as u32;
    if count == 0 {
        return 0;
    }
    (count * (GLYPH_W + 1) - 1) * scale
}

/// Bar width and gap so that `count` bars span at most `max_width`.
fn bar_layout(count: u32, unit: u32, max_width: u32) -> (u32, u32) {
    let wanted = (BAR_WIDTH + BAR_GAP) * unit;
    let pitch = wanted.min(max_width / count.max(1)).max(1);
    let gap = pitch * BAR_GAP / (BAR_WIDTH + BAR_GAP);
    ((pitch - gap).max(1), gap)
}

fn draw_bars(
    img: &mut RgbaImage,
    bars: &[f64],
    top: u32,
    bottom: u32,
    unit: u32,
    max_width: u32,
    color: Rgba<u8>,
) {
    if bars.is_empty() || bottom <= top {
        return;
    }
    let count = bars.len() as u32;
    let (bar_w, gap) = bar_layout(count, unit, max_width);
    let total = count * (bar_w + gap) - gap;
    let max_h = bottom - top;
    let min_h = (BAR_MIN_HEIGHT * unit).min(max_h);
    let mut x = (img.width() / 2).saturating_sub(total / 2);
    for value in bars {
        let bar_h = ((value * f64::from(max_h)) as u32).clamp(min_h, max_h);
        fill_rect(img, x, bottom - bar_h, bar_w, bar_h, color);
        x += bar_w + gap;
    }
}

fn draw_text(img: &mut RgbaImage, text: &str, center_x: u32, top: u32, scale: u32, color: Rgba<u8>) {
    let total = text_width(text, scale);
    if total == 0 {
        return;
    }
    let advance = (GLYPH_W + 1) * scale;
    let mut x = center_x.saturating_sub(total / 2);
    for ch in text.chars() {
        let rows = glyph(ch.to_ascii_uppercase());
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) != 0 {
                    fill_rect(
                        img,
                        x + col * scale,
                        top + row as u32 * scale,
                        scale,
                        scale,
                        color,
                    );
                }
            }
        }
        x += advance;
    }
}

fn fill_rect(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
    let x_end = x.saturating_add(w).min(img.width());
    let y_end = y.saturating_add(h).min(img.height());
    for py in y..y_end {
        for px in x..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

fn glyph(ch: char) -> [u8; GLYPH_H as usize] {
    match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        _ => [0; GLYPH_H as usize],
    }
}
