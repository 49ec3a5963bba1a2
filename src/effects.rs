use image::{imageops, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::device::FacingMode;

/// Visual filter applied to the live preview and frozen into each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    None,
    Grayscale,
    Sepia,
    Invert,
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Effect {
    pub fn all() -> &'static [Effect] {
        &[Effect::None, Effect::Grayscale, Effect::Sepia, Effect::Invert]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Effect::None => "none",
            Effect::Grayscale => "grayscale",
            Effect::Sepia => "sepia",
            Effect::Invert => "invert",
        }
    }

    fn transform(&self, pixel: &Rgba<u8>) -> Rgba<u8> {
        let [r, g, b, a] = pixel.0;
        let (rf, gf, bf) = (r as f32, g as f32, b as f32);

        match self {
            Effect::None => *pixel,
            Effect::Grayscale => {
                // Rec. 709 luma, as in the filter-effects grayscale matrix
                let luma = channel(0.2126 * rf + 0.7152 * gf + 0.0722 * bf);
                Rgba([luma, luma, luma, a])
            }
            Effect::Sepia => Rgba([
                channel(0.393 * rf + 0.769 * gf + 0.189 * bf),
                channel(0.349 * rf + 0.686 * gf + 0.168 * bf),
                channel(0.272 * rf + 0.534 * gf + 0.131 * bf),
                a,
            ]),
            Effect::Invert => Rgba([255 - r, 255 - g, 255 - b, a]),
        }
    }
}

fn channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Which way a snapshot is stored relative to the raw sensor image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// As the sensor delivers it (a viewer reads text correctly)
    True,
    /// Flipped horizontally, matching a mirrored selfie preview
    Mirrored,
}

impl Orientation {
    /// Front previews are mirrored so the user sees a mirror image.
    pub fn for_preview(facing: FacingMode) -> Self {
        match facing {
            FacingMode::Front => Orientation::Mirrored,
            FacingMode::Back => Orientation::True,
        }
    }

    /// Snapshots are un-mirrored unless `mirror_front` keeps them consistent with the preview.
    pub fn for_capture(facing: FacingMode, mirror_front: bool) -> Self {
        match facing {
            FacingMode::Front if mirror_front => Orientation::Mirrored,
            _ => Orientation::True,
        }
    }
}

/// Stateless per-pixel renderer for frames and previews.
pub struct EffectRenderer;

impl EffectRenderer {
    /// Apply `effect` to a copy of `source`.
    pub fn apply(effect: Effect, source: &RgbaImage) -> RgbaImage {
        let mut result = source.clone();
        if effect != Effect::None {
            for pixel in result.pixels_mut() {
                *pixel = effect.transform(pixel);
            }
        }
        result
    }

    /// Freeze a frame: orientation correction, optional resize to `target`, then the effect.
    pub fn render(
        effect: Effect,
        source: &RgbaImage,
        orientation: Orientation,
        target: Option<(u32, u32)>,
    ) -> RgbaImage {
        let oriented = match orientation {
            Orientation::True => source.clone(),
            Orientation::Mirrored => imageops::flip_horizontal(source),
        };

        let sized = match target {
            Some((width, height))
                if width > 0 && height > 0 && (width, height) != oriented.dimensions() =>
            {
                imageops::resize(&oriented, width, height, imageops::FilterType::Triangle)
            }
            _ => oriented,
        };

        Self::apply(effect, &sized)
    }

    /// Downscale-to-fit preview render, keeping aspect ratio.
    pub fn preview(
        effect: Effect,
        source: &RgbaImage,
        facing: FacingMode,
        max_width: u32,
        max_height: u32,
    ) -> RgbaImage {
        let target = fit_within(source.dimensions(), max_width, max_height);
        Self::render(effect, source, Orientation::for_preview(facing), Some(target))
    }
}

fn fit_within((width, height): (u32, u32), max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let scale = (max_width as f32 / width as f32).min(max_height as f32 / height as f32);
    if scale >= 1.0 {
        return (width, height);
    }
    (
        ((width as f32 * scale) as u32).max(1),
        ((height as f32 * scale) as u32).max(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    fn two_pixel_image() -> RgbaImage {
        ImageBuffer::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([200, 100, 50, 255])
            } else {
                Rgba([10, 20, 30, 128])
            }
        })
    }

    #[test]
    fn test_none_is_identity() {
        let image = two_pixel_image();
        assert_eq!(EffectRenderer::apply(Effect::None, &image), image);
    }

    #[test]
    fn test_grayscale_equalizes_channels() {
        let result = EffectRenderer::apply(Effect::Grayscale, &two_pixel_image());
        let pixel = result.get_pixel(0, 0);
        assert_eq!(pixel[0], pixel[1]);
        assert_eq!(pixel[1], pixel[2]);
        // 0.2126*200 + 0.7152*100 + 0.0722*50 = 117.66
        assert_eq!(pixel[0], 118);
        assert_eq!(pixel[3], 255);
    }

    #[test]
    fn test_sepia_matrix_and_clamp() {
        let white = ImageBuffer::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let result = EffectRenderer::apply(Effect::Sepia, &white);
        // Red and green rows sum above 1.0 and clamp, blue row sums to 0.937
        assert_eq!(result.get_pixel(0, 0).0, [255, 255, 239, 255]);
    }

    #[test]
    fn test_invert_preserves_alpha() {
        let result = EffectRenderer::apply(Effect::Invert, &two_pixel_image());
        assert_eq!(result.get_pixel(1, 0).0, [245, 235, 225, 128]);
    }

    #[test]
    fn test_mirrored_render_flips_columns() {
        let image = two_pixel_image();
        let mirrored = EffectRenderer::render(Effect::None, &image, Orientation::Mirrored, None);
        assert_eq!(mirrored.get_pixel(0, 0), image.get_pixel(1, 0));
        assert_eq!(mirrored.get_pixel(1, 0), image.get_pixel(0, 0));
    }

    #[test]
    fn test_render_resizes_to_target() {
        let image = ImageBuffer::from_pixel(64, 48, Rgba([1, 2, 3, 255]));
        let result = EffectRenderer::render(Effect::Invert, &image, Orientation::True, Some((32, 24)));
        assert_eq!(result.dimensions(), (32, 24));
        assert_eq!(result.get_pixel(5, 5).0, [254, 253, 252, 255]);
    }

    #[test]
    fn test_orientation_policy() {
        assert_eq!(Orientation::for_preview(FacingMode::Front), Orientation::Mirrored);
        assert_eq!(Orientation::for_preview(FacingMode::Back), Orientation::True);
        assert_eq!(Orientation::for_capture(FacingMode::Front, false), Orientation::True);
        assert_eq!(Orientation::for_capture(FacingMode::Front, true), Orientation::Mirrored);
        assert_eq!(Orientation::for_capture(FacingMode::Back, true), Orientation::True);
    }

    #[test]
    fn test_preview_keeps_aspect_ratio() {
        let image = ImageBuffer::from_pixel(1600, 1200, Rgba([0, 0, 0, 255]));
        let preview = EffectRenderer::preview(Effect::None, &image, FacingMode::Back, 400, 400);
        assert_eq!(preview.dimensions(), (400, 300));
    }
}
