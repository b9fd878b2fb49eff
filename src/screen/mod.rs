//! On-screen UI.
//!
//! A fixed two-widget screen: a status label along the top edge and a live
//! preview image in the middle. Widgets are created once by `Screen::new` and
//! mutated every loop iteration. Mutations only invalidate areas; pixels are
//! produced by `process`, which renders invalidated areas in bands no larger
//! than the draw buffer and hands each band to a `FlushTarget`.

mod area;
pub mod font;

use anyhow::Result;
use image::{GrayImage, Rgb};

pub use area::Area;

use crate::config::DisplaySettings;
use crate::frame::{FrameBuffer, ImageDescriptor};

/// Initial status text.
pub const WAITING_TEXT: &str = "Waiting...";

/// Distance of the status label from the top edge.
const LABEL_TOP_MARGIN: u32 = 10;
/// Preferred font pixel scale for the status label. Text too wide for the
/// screen drops to smaller scales, then wraps.
const LABEL_SCALE: u32 = 2;

const BACKGROUND: Rgb<u8> = Rgb([0xFF, 0xFF, 0xFF]);
const TEXT_COLOR: Rgb<u8> = Rgb([0x20, 0x20, 0x20]);

/// Receives rendered RGB565 regions. The display surface implements this.
pub trait FlushTarget {
    /// Push `pixels` (row-major, little-endian RGB565) covering `area`.
    fn flush(&mut self, area: Area, pixels: &[u8]) -> Result<()>;
}

/// Pack an RGB888 color into little-endian RGB565 bytes.
pub fn rgb565(color: &Rgb<u8>) -> [u8; 2] {
    let [r, g, b] = color.0;
    let packed = (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3);
    packed.to_le_bytes()
}

struct StatusLabel {
    text: String,
    mask: GrayImage,
    area: Area,
}

struct PreviewImage {
    source: Option<ImageDescriptor>,
    area: Option<Area>,
}

pub struct Screen {
    bounds: Area,
    draw_pixels: usize,
    draw_buffer: Vec<u8>,
    label: StatusLabel,
    preview: PreviewImage,
    invalid: Vec<Area>,
    flushes: u64,
}

impl Screen {
    /// Register a screen of the configured resolution with a partial draw
    /// buffer of `width * draw_buffer_lines` pixels.
    pub fn new(settings: &DisplaySettings) -> Self {
        let bounds = Area::with_size(0, 0, settings.width, settings.height);
        let draw_pixels = settings.width as usize * settings.draw_buffer_lines.max(1) as usize;
        let mut screen = Self {
            bounds,
            draw_pixels,
            draw_buffer: Vec::with_capacity(draw_pixels * 2),
            label: StatusLabel {
                text: String::new(),
                mask: GrayImage::new(0, 0),
                area: Area::new(0, 0, 0, 0),
            },
            preview: PreviewImage {
                source: None,
                area: None,
            },
            invalid: vec![bounds],
            flushes: 0,
        };
        screen.layout_label(WAITING_TEXT);
        screen
    }

    pub fn status_text(&self) -> &str {
        &self.label.text
    }

    /// Screen rectangle covered by the status label.
    pub fn label_area(&self) -> Area {
        self.label.area
    }

    /// Screen rectangle covered by the preview image, once it has a source.
    pub fn preview_area(&self) -> Option<Area> {
        self.preview.area
    }

    pub fn preview_source(&self) -> Option<ImageDescriptor> {
        self.preview.source
    }

    /// Total bands handed to flush targets.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn has_pending(&self) -> bool {
        !self.invalid.is_empty()
    }

    /// Replace the status label text.
    pub fn set_text(&mut self, text: &str) {
        if self.label.text == text {
            return;
        }
        let old = self.label.area;
        self.layout_label(text);
        self.invalidate(old);
        self.invalidate(self.label.area);
    }

    /// Point the preview widget at a frame. The widget re-reads the frame
    /// buffer on every `process`, so this invalidates its area every time.
    pub fn set_source(&mut self, source: ImageDescriptor) {
        let width = source.width.min(self.bounds.width());
        let height = source.height.min(self.bounds.height());
        let area = (width > 0 && height > 0).then(|| {
            Area::with_size(
                (self.bounds.width() - width) / 2,
                (self.bounds.height() - height) / 2,
                width,
                height,
            )
        });
        if let Some(old) = self.preview.area.filter(|old| Some(*old) != area) {
            self.invalidate(old);
        }
        self.preview.source = Some(source);
        self.preview.area = area;
        if let Some(area) = area {
            self.invalidate(area);
        }
    }

    /// Render every invalidated area and flush it. Returns the number of
    /// bands flushed.
    pub fn process(&mut self, frame: &FrameBuffer, target: &mut dyn FlushTarget) -> Result<usize> {
        let pending = std::mem::take(&mut self.invalid);
        let mut bands = 0;
        for area in pending {
            let rows_per_band = (self.draw_pixels / area.width() as usize).max(1) as u32;
            let mut y = area.y1;
            while y <= area.y2 {
                let y2 = (y + rows_per_band - 1).min(area.y2);
                let band = Area::new(area.x1, y, area.x2, y2);
                self.render(band, frame);
                target.flush(band, &self.draw_buffer)?;
                bands += 1;
                self.flushes += 1;
                y = y2 + 1;
            }
        }
        Ok(bands)
    }

    fn layout_label(&mut self, text: &str) {
        let mask = fit_text(text, self.bounds.width());
        let width = mask.width().min(self.bounds.width());
        let height = mask.height().min(self.bounds.height());
        let x = (self.bounds.width() - width) / 2;
        let y = LABEL_TOP_MARGIN.min(self.bounds.height() - height);
        self.label = StatusLabel {
            text: text.to_string(),
            mask,
            area: Area::with_size(x, y, width, height),
        };
    }

    fn invalidate(&mut self, area: Area) {
        let Some(mut area) = area.intersection(&self.bounds) else {
            return;
        };
        // Fold overlapping areas together so nothing is flushed twice.
        while let Some(pos) = self.invalid.iter().position(|other| other.intersects(&area)) {
            area = area.union(&self.invalid.swap_remove(pos));
        }
        self.invalid.push(area);
    }

    fn render(&mut self, band: Area, frame: &FrameBuffer) {
        self.draw_buffer.clear();
        for y in band.y1..=band.y2 {
            for x in band.x1..=band.x2 {
                let color = self.color_at(x, y, frame);
                self.draw_buffer.extend_from_slice(&rgb565(&color));
            }
        }
    }

    fn color_at(&self, x: u32, y: u32, frame: &FrameBuffer) -> Rgb<u8> {
        let label = &self.label;
        if label.area.contains(x, y)
            && label.mask.get_pixel(x - label.area.x1, y - label.area.y1)[0] > 0
        {
            return TEXT_COLOR;
        }
        if let Some(area) = self.preview.area.filter(|area| area.contains(x, y)) {
            if let Some(pixel) = frame.pixel(x - area.x1, y - area.y1) {
                return *pixel;
            }
        }
        BACKGROUND
    }
}

/// Rasterize `text` no wider than `max_width`, shrinking before wrapping.
fn fit_text(text: &str, max_width: u32) -> GrayImage {
    for scale in (1..=LABEL_SCALE).rev() {
        let mask = font::rasterize(text, scale);
        if mask.width() <= max_width {
            return mask;
        }
    }
    let max_cells = ((max_width + 1) / font::ADVANCE).max(1) as usize;
    let lines = font::wrap(text, max_cells);
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    font::rasterize_lines(&lines, 1)
}
