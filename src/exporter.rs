use image::codecs::png::PngEncoder;
use image::{imageops, ColorType, ImageEncoder, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut};
use log::{debug, error, info, warn};
use rusttype::{point, Font, Scale};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::composer::{HexColor, Rect, StripLayout, TextLine};
use crate::errors::ExportError;
use crate::frame_store::Frame;

/// How a finished strip reaches the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Save directly, fall back to the viewer when the folder refuses writes
    #[default]
    Auto,
    /// Always save directly into the export folder
    Direct,
    /// Platform blocks direct saves: open the image for manual saving
    Viewer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Saved(PathBuf),
    OpenedInViewer(PathBuf),
}

/// Something that can show an image file to the user.
pub trait Viewer: Send + Sync {
    fn open(&self, path: &Path) -> Result<(), String>;
}

/// Opens files with the desktop's default application.
pub struct SystemViewer;

impl Viewer for SystemViewer {
    fn open(&self, path: &Path) -> Result<(), String> {
        open::that(path).map_err(|e| e.to_string())
    }
}

/// Rasterizes a [`StripLayout`] at an arbitrary scale.
#[derive(Clone)]
pub struct StripRenderer {
    font: Option<Font<'static>>,
}

impl StripRenderer {
    pub fn new(font: Option<Font<'static>>) -> Self {
        Self { font }
    }

    /// Load the caption font. Text is skipped when the font is missing.
    pub fn from_font_path(path: Option<&Path>) -> Self {
        let font = path.and_then(|path| match std::fs::read(path) {
            Ok(bytes) => {
                let font = Font::try_from_vec(bytes);
                if font.is_none() {
                    warn!("Could not parse font {}, strip text disabled", path.display());
                }
                font
            }
            Err(e) => {
                warn!("Could not read font {}: {}, strip text disabled", path.display(), e);
                None
            }
        });
        Self::new(font)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Render the layout at its natural size multiplied by `scale`.
    pub fn render(
        &self,
        layout: &StripLayout,
        frames: &[Frame],
        scale: f32,
    ) -> Result<RgbaImage, ExportError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ExportError::Render(format!("invalid scale factor {}", scale)));
        }
        if frames.is_empty() {
            return Err(ExportError::Render("no frames captured".to_string()));
        }

        let (width, height) = layout.pixel_size(scale);
        let mut canvas = RgbaImage::new(width, height);

        fill_rounded_rect(
            &mut canvas,
            &Rect::new(0.0, 0.0, layout.width, layout.height),
            layout.corner_radius,
            layout.background,
            scale,
        );

        fill_rounded_rect(
            &mut canvas,
            &layout.badge,
            layout.badge.height / 2.0,
            HexColor::WHITE,
            scale,
        );
        self.draw_text(&mut canvas, &layout.brand, scale);

        for cell in &layout.cells {
            let frame = frames.get(cell.frame_index).ok_or_else(|| {
                ExportError::Render(format!("layout refers to missing frame {}", cell.frame_index))
            })?;
            fill_rounded_rect(&mut canvas, &cell.outer, 0.0, HexColor::WHITE, scale);
            draw_cover(&mut canvas, frame.image(), &cell.photo, scale);
        }

        for line in &layout.caption {
            self.draw_text(&mut canvas, line, scale);
        }

        debug!("Rendered strip at {}x{} ({}x)", width, height, scale);
        Ok(canvas)
    }

    fn draw_text(&self, canvas: &mut RgbaImage, line: &TextLine, scale: f32) {
        let Some(font) = self.font.as_ref() else {
            return;
        };
        let px = line.font_size * scale;
        let glyph_scale = Scale::uniform(px);

        let widths: Vec<f32> = line
            .spans
            .iter()
            .map(|span| advance_width(font, glyph_scale, &span.text))
            .collect();
        let total: f32 = widths.iter().sum();

        let mut x = (line.rect.x + line.rect.width / 2.0) * scale - total / 2.0;
        let y = (line.rect.y + line.rect.height / 2.0) * scale - px / 2.0;
        for (span, width) in line.spans.iter().zip(widths) {
            draw_text_mut(
                canvas,
                Rgba(span.color.rgba()),
                x.round() as i32,
                y.round() as i32,
                glyph_scale,
                font,
                &span.text,
            );
            x += width;
        }
    }
}

fn advance_width(font: &Font<'static>, scale: Scale, text: &str) -> f32 {
    font.layout(text, scale, point(0.0, 0.0))
        .last()
        .map(|glyph| glyph.position().x + glyph.unpositioned().h_metrics().advance_width)
        .unwrap_or(0.0)
}

/// Logical rect to whole device pixels, clamped to the canvas.
fn device_rect(canvas: &RgbaImage, rect: &Rect, scale: f32) -> Option<(i32, i32, u32, u32)> {
    let x0 = (rect.x * scale).round().max(0.0);
    let y0 = (rect.y * scale).round().max(0.0);
    let x1 = ((rect.x + rect.width) * scale).round().min(canvas.width() as f32);
    let y1 = ((rect.y + rect.height) * scale).round().min(canvas.height() as f32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32))
}

fn fill_rounded_rect(canvas: &mut RgbaImage, rect: &Rect, radius: f32, color: HexColor, scale: f32) {
    let Some((x, y, w, h)) = device_rect(canvas, rect, scale) else {
        return;
    };
    let color = Rgba(color.rgba());
    let r = ((radius * scale).round() as u32).min(w / 2).min(h / 2);

    if r == 0 {
        draw_filled_rect_mut(canvas, imageproc::rect::Rect::at(x, y).of_size(w, h), color);
        return;
    }

    let ri = r as i32;
    if h > 2 * r {
        draw_filled_rect_mut(
            canvas,
            imageproc::rect::Rect::at(x, y + ri).of_size(w, h - 2 * r),
            color,
        );
    }
    if w > 2 * r {
        draw_filled_rect_mut(
            canvas,
            imageproc::rect::Rect::at(x + ri, y).of_size(w - 2 * r, h),
            color,
        );
    }
    let right = x + w as i32 - 1 - ri;
    let bottom = y + h as i32 - 1 - ri;
    for center in [(x + ri, y + ri), (right, y + ri), (x + ri, bottom), (right, bottom)] {
        draw_filled_circle_mut(canvas, center, ri, color);
    }
}

/// Scale `image` to cover `rect` and crop the overflow evenly.
fn draw_cover(canvas: &mut RgbaImage, image: &RgbaImage, rect: &Rect, scale: f32) {
    let Some((x, y, w, h)) = device_rect(canvas, rect, scale) else {
        return;
    };
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 {
        return;
    }

    let cover = (w as f32 / src_w as f32).max(h as f32 / src_h as f32);
    let scaled_w = ((src_w as f32 * cover).ceil() as u32).max(w);
    let scaled_h = ((src_h as f32 * cover).ceil() as u32).max(h);
    let scaled = imageops::resize(image, scaled_w, scaled_h, imageops::FilterType::Triangle);
    let cropped = imageops::crop_imm(&scaled, (scaled_w - w) / 2, (scaled_h - h) / 2, w, h).to_image();
    imageops::replace(canvas, &cropped, x as i64, y as i64);
}

/// Encode as an RGBA PNG.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ExportError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)
        .map_err(|e| ExportError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Renders strips and hands them to the user.
#[derive(Clone)]
pub struct Exporter {
    renderer: StripRenderer,
    scale: f32,
    file_name: String,
    export_dir: PathBuf,
    viewer_dir: PathBuf,
    mode: SaveMode,
    viewer: Arc<dyn Viewer>,
}

impl Exporter {
    pub fn new(
        renderer: StripRenderer,
        scale: f32,
        file_name: impl Into<String>,
        export_dir: impl Into<PathBuf>,
        mode: SaveMode,
    ) -> Self {
        Self {
            renderer,
            scale,
            file_name: file_name.into(),
            export_dir: export_dir.into(),
            viewer_dir: std::env::temp_dir(),
            mode,
            viewer: Arc::new(SystemViewer),
        }
    }

    #[cfg(test)]
    pub fn with_viewer(mut self, viewer: Arc<dyn Viewer>, viewer_dir: impl Into<PathBuf>) -> Self {
        self.viewer = viewer;
        self.viewer_dir = viewer_dir.into();
        self
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn set_export_dir(&mut self, dir: impl Into<PathBuf>) {
        self.export_dir = dir.into();
        info!("Export folder set to {}", self.export_dir.display());
    }

    pub fn renderer(&self) -> &StripRenderer {
        &self.renderer
    }

    /// Rasterize at the export scale and deliver the PNG.
    pub fn export(&self, layout: &StripLayout, frames: &[Frame]) -> Result<ExportOutcome, ExportError> {
        let image = self.renderer.render(layout, frames, self.scale)?;
        let png = encode_png(&image)?;

        let outcome = match self.mode {
            SaveMode::Direct => self.save_direct(&png).map(ExportOutcome::Saved),
            SaveMode::Viewer => self.open_in_viewer(&png),
            SaveMode::Auto => match self.save_direct(&png) {
                Ok(path) => Ok(ExportOutcome::Saved(path)),
                Err(e) => {
                    warn!("Direct save blocked ({}), opening strip in viewer", e);
                    self.open_in_viewer(&png)
                }
            },
        };

        match &outcome {
            Ok(ExportOutcome::Saved(path)) => info!("Photo strip saved to {}", path.display()),
            Ok(ExportOutcome::OpenedInViewer(path)) => {
                info!("Photo strip opened for manual saving: {}", path.display())
            }
            Err(e) => error!("Export failed: {}", e),
        }
        outcome
    }

    fn save_direct(&self, png: &[u8]) -> Result<PathBuf, ExportError> {
        write_atomically(&self.export_dir, &self.file_name, png)
    }

    fn open_in_viewer(&self, png: &[u8]) -> Result<ExportOutcome, ExportError> {
        let path = write_atomically(&self.viewer_dir, &self.file_name, png)?;
        match self.viewer.open(&path) {
            Ok(()) => Ok(ExportOutcome::OpenedInViewer(path)),
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(ExportError::ViewerUnavailable(e))
            }
        }
    }
}

/// Write through a temporary sibling so a failure never leaves a partial file.
fn write_atomically(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, ExportError> {
    let save_error = |e: std::io::Error| match e.kind() {
        ErrorKind::PermissionDenied => ExportError::Save(format!("{} is not writable", dir.display())),
        _ => ExportError::Save(format!("{}: {}", dir.display(), e)),
    };

    std::fs::create_dir_all(dir).map_err(save_error)?;
    let target = dir.join(file_name);
    let partial = dir.join(format!(".{}.partial", file_name));

    let result = std::fs::write(&partial, bytes).and_then(|_| std::fs::rename(&partial, &target));
    if let Err(e) = result {
        let _ = std::fs::remove_file(&partial);
        return Err(save_error(e));
    }
    Ok(target)
}
