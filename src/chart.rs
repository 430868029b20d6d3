use std::f64::consts::PI;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_text_mut, text_size};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Category, CategoryTally, DateRange, Report};

pub const CHART_WIDTH: u32 = 800;
pub const CHART_HEIGHT: u32 = 600;
const CENTER: (f64, f64) = (400.0, 320.0);
const RADIUS: f64 = 220.0;
/// Wedges run counter-clockwise from here
const START_ANGLE_DEG: f64 = 140.0;
/// Half width of the white line between wedges
const EDGE_HALF_WIDTH_PX: f64 = 1.5;
const TITLE: &str = "Изменения в сторе";
const SUMMARY_HEADING: &str = "📊 *Статистика изменений:*";

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const TEXT: Rgb<u8> = Rgb([30, 30, 30]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 128, 0]);
const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
const GRAY: Rgb<u8> = Rgb([128, 128, 128]);

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("png encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("font {path} unusable: {reason}")]
    Font { path: PathBuf, reason: String },
}

/// Fixed color per category label, gray for anything unmapped
pub fn color_for(label: &str) -> Rgb<u8> {
    match Category::from_label(label) {
        Some(Category::AppBanned) => RED,
        Some(Category::AppAppearedInStore) => GREEN,
        Some(Category::NewAppUploaded) => BLUE,
        Some(Category::AppReturnedToStore) => YELLOW,
        None => GRAY,
    }
}

/// One pie slice; angles in degrees, counter-clockwise from the x axis
#[derive(Debug, Clone, PartialEq)]
pub struct Wedge {
    pub label: String,
    pub count: u64,
    pub percent: f64,
    pub color: Rgb<u8>,
    pub start_deg: f64,
    pub sweep_deg: f64,
}

impl Wedge {
    fn mid_deg(&self) -> f64 {
        self.start_deg + self.sweep_deg / 2.0
    }
}

/// Wedges for every non-zero slice, in input order
pub fn layout(slices: &[(&str, u64)]) -> Vec<Wedge> {
    let total: u64 = slices.iter().map(|(_, count)| count).sum();
    if total == 0 {
        return Vec::new();
    }

    let mut start_deg = START_ANGLE_DEG;
    slices
        .iter()
        .filter(|(_, count)| *count > 0)
        .map(|(label, count)| {
            let fraction = *count as f64 / total as f64;
            let wedge = Wedge {
                label: label.to_string(),
                count: *count,
                percent: fraction * 100.0,
                color: color_for(label),
                start_deg,
                sweep_deg: fraction * 360.0,
            };
            start_deg += wedge.sweep_deg;
            wedge
        })
        .collect()
}

pub enum RenderOutcome {
    /// Nothing happened in the period, no chart was drawn
    Empty,
    Report(Report),
}

/// Turns a tally into a donut chart PNG and a summary.
/// Pure: nothing touches the filesystem or a display.
pub struct ReportRenderer {
    font: Option<FontVec>,
}

impl ReportRenderer {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    /// Use `configured` if given, otherwise the first usable system font.
    /// Without any font the chart is drawn unlabeled.
    pub fn with_font_search(configured: Option<&Path>) -> Result<Self, RenderError> {
        if let Some(path) = configured {
            let font = load_font(path)?;
            info!(path = %path.display(), "chart font loaded");
            return Ok(Self::new(Some(font)));
        }

        let font = FONT_CANDIDATES.iter().map(Path::new).find_map(|path| {
            let font = load_font(path).ok()?;
            info!(path = %path.display(), "chart font loaded");
            Some(font)
        });
        if font.is_none() {
            warn!("no chart font found, wedges will be drawn without labels");
        }
        Ok(Self::new(font))
    }

    /// Chart plus Markdown summary for `period`, or [`RenderOutcome::Empty`]
    /// when every count is zero
    pub fn render(&self, tally: &CategoryTally, period: &DateRange) -> Result<RenderOutcome, RenderError> {
        if tally.is_empty() {
            return Ok(RenderOutcome::Empty);
        }

        let slices: Vec<(&str, u64)> = tally
            .entries()
            .map(|(category, count)| (category.label(), count))
            .collect();
        let wedges = layout(&slices);
        let subtitle = format!("{} - {}", period.start, period.end);
        let chart = encode_png(self.draw(&wedges, &subtitle))?;

        Ok(RenderOutcome::Report(Report {
            tally: tally.clone(),
            chart,
            summary_text: format!("{SUMMARY_HEADING}\n{}", tally.summary_text()),
        }))
    }

    fn draw(&self, wedges: &[Wedge], subtitle: &str) -> RgbImage {
        let mut img = RgbImage::from_pixel(CHART_WIDTH, CHART_HEIGHT, BACKGROUND);
        paint_wedges(&mut img, wedges);

        draw_filled_circle_mut(
            &mut img,
            (CENTER.0 as i32, CENTER.1 as i32),
            (RADIUS / 2.0) as i32,
            BACKGROUND,
        );

        if let Some(font) = &self.font {
            draw_labels(&mut img, font, wedges, subtitle);
        }
        img
    }
}

fn paint_wedges(img: &mut RgbImage, wedges: &[Wedge]) {
    let (cx, cy) = CENTER;
    let x_range = (cx - RADIUS).floor().max(0.0) as u32..(cx + RADIUS).ceil().min(CHART_WIDTH as f64) as u32;
    let y_range = (cy - RADIUS).floor().max(0.0) as u32..(cy + RADIUS).ceil().min(CHART_HEIGHT as f64) as u32;

    for y in y_range {
        for x in x_range.clone() {
            let dx = x as f64 + 0.5 - cx;
            let dy = cy - (y as f64 + 0.5);
            let distance = dx.hypot(dy);
            if distance > RADIUS {
                continue;
            }
            let angle = dy.atan2(dx).to_degrees().rem_euclid(360.0);
            if let Some(color) = color_at(wedges, angle, distance) {
                img.put_pixel(x, y, color);
            }
        }
    }
}

/// Color of the point at `angle` degrees and `distance` px from the center
fn color_at(wedges: &[Wedge], angle: f64, distance: f64) -> Option<Rgb<u8>> {
    let rel = (angle - START_ANGLE_DEG).rem_euclid(360.0);
    let wedge = wedges.iter().find(|w| {
        let start = w.start_deg - START_ANGLE_DEG;
        rel >= start && rel < start + w.sweep_deg
    })?;

    if wedges.len() > 1 {
        let start = wedge.start_deg - START_ANGLE_DEG;
        let to_boundary = (rel - start).min(start + wedge.sweep_deg - rel);
        let arc_px = to_boundary.to_radians() * distance;
        if arc_px < EDGE_HALF_WIDTH_PX {
            return Some(BACKGROUND);
        }
    }
    Some(wedge.color)
}

fn draw_labels(img: &mut RgbImage, font: &FontVec, wedges: &[Wedge], subtitle: &str) {
    let title_scale = PxScale::from(28.0);
    let (title_w, _) = text_size(title_scale, font, TITLE);
    let title_x = (CHART_WIDTH.saturating_sub(title_w) / 2) as i32;
    draw_text_mut(img, TEXT, title_x, 12, title_scale, font, TITLE);

    let subtitle_scale = PxScale::from(16.0);
    let (subtitle_w, _) = text_size(subtitle_scale, font, subtitle);
    let subtitle_x = (CHART_WIDTH.saturating_sub(subtitle_w) / 2) as i32;
    draw_text_mut(img, TEXT, subtitle_x, 46, subtitle_scale, font, subtitle);

    let label_scale = PxScale::from(18.0);
    let pct_scale = PxScale::from(16.0);
    for wedge in wedges {
        let theta = wedge.mid_deg() * PI / 180.0;
        let (cos, sin) = (theta.cos(), theta.sin());

        let label = format!("{} ({})", wedge.label, wedge.count);
        let (w, h) = text_size(label_scale, font, &label);
        let anchor_x = CENTER.0 + 1.1 * RADIUS * cos;
        let anchor_y = CENTER.1 - 1.1 * RADIUS * sin;
        let x = if cos >= 0.0 { anchor_x } else { anchor_x - w as f64 };
        let x = x.clamp(4.0, (CHART_WIDTH - w.min(CHART_WIDTH - 8)) as f64 - 4.0);
        let y = (anchor_y - h as f64 / 2.0).clamp(4.0, (CHART_HEIGHT - h.min(CHART_HEIGHT - 8)) as f64 - 4.0);
        draw_text_mut(img, TEXT, x as i32, y as i32, label_scale, font, &label);

        let pct = format!("{:.1}%", wedge.percent);
        let (pw, ph) = text_size(pct_scale, font, &pct);
        let px = CENTER.0 + 0.75 * RADIUS * cos - pw as f64 / 2.0;
        let py = CENTER.1 - 0.75 * RADIUS * sin - ph as f64 / 2.0;
        draw_text_mut(img, TEXT, px as i32, py as i32, pct_scale, font, &pct);
    }
}

fn load_font(path: &Path) -> Result<FontVec, RenderError> {
    let font_error = |reason: String| RenderError::Font {
        path: path.to_path_buf(),
        reason,
    };
    let bytes = std::fs::read(path).map_err(|e| font_error(e.to_string()))?;
    FontVec::try_from_vec(bytes).map_err(|e| font_error(e.to_string()))
}

fn encode_png(img: RgbImage) -> Result<Vec<u8>, RenderError> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
