use egui::{Context, TextureHandle, TextureOptions};
use image::{imageops, RgbaImage};

use crate::frame_store::Frame;
use crate::ui::BoothApp;

const THUMBNAIL_WIDTH: u32 = 160;

fn color_image(image: &RgbaImage) -> egui::ColorImage {
    let size = [image.width() as usize, image.height() as usize];
    let pixels = image.as_flat_samples();
    egui::ColorImage::from_rgba_unmultiplied(size, pixels.as_slice())
}

/// Reuse `slot` when it exists, otherwise allocate a new texture.
fn upload(ctx: &Context, slot: &mut Option<TextureHandle>, name: &str, image: &RgbaImage) {
    // Skip invalid frames to prevent a white flash
    if image.width() == 0 || image.height() == 0 {
        return;
    }

    let color_image = color_image(image);
    match slot {
        Some(texture) => texture.set(color_image, TextureOptions::LINEAR),
        None => *slot = Some(ctx.load_texture(name, color_image, TextureOptions::LINEAR)),
    }
}

impl BoothApp {
    pub fn update_preview_texture(&mut self, ctx: &Context, image: &RgbaImage) {
        upload(ctx, &mut self.preview_texture, "camera_preview", image);
    }

    pub fn update_strip_texture(&mut self, ctx: &Context, image: &RgbaImage) {
        upload(ctx, &mut self.strip_texture, "strip_preview", image);
    }

    /// Keep one thumbnail per captured frame.
    pub fn sync_thumbnails(&mut self, ctx: &Context, frames: &[Frame]) {
        if frames.len() < self.thumbnails.len() {
            self.thumbnails.clear();
        }

        for (index, frame) in frames.iter().enumerate().skip(self.thumbnails.len()) {
            let (width, height) = frame.dimensions();
            let thumb_height = (height * THUMBNAIL_WIDTH / width.max(1)).max(1);
            let thumb = imageops::thumbnail(frame.image(), THUMBNAIL_WIDTH, thumb_height);
            let texture = ctx.load_texture(
                format!("thumbnail_{}", index),
                color_image(&thumb),
                TextureOptions::LINEAR,
            );
            self.thumbnails.push(texture);
        }
    }
}
