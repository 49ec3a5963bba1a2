use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::frame_store::Frame;

/// `#rrggbb` colour used for the strip frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HexColor(pub [u8; 3]);

impl HexColor {
    pub const BLACK: HexColor = HexColor([0x00, 0x00, 0x00]);
    pub const WHITE: HexColor = HexColor([0xff, 0xff, 0xff]);
    pub const EMERALD: HexColor = HexColor([0x10, 0xb9, 0x81]);
    pub const SLATE: HexColor = HexColor([0x1f, 0x29, 0x37]);

    pub fn rgba(&self) -> [u8; 4] {
        let [r, g, b] = self.0;
        [r, g, b, 255]
    }
}

impl Default for HexColor {
    fn default() -> Self {
        HexColor::BLACK
    }
}

impl std::fmt::Display for HexColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{:02x}{:02x}{:02x}", r, g, b)
    }
}

impl FromStr for HexColor {
    type Err = String;

    /// Accepts `#rgb` and `#rrggbb`, with or without the leading `#`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return Err(format!("invalid colour: {}", s));
        }
        let expanded: String = match hex.len() {
            3 => hex.chars().flat_map(|c| [c, c]).collect(),
            6 => hex.to_string(),
            _ => return Err(format!("invalid colour: {}", s)),
        };

        let mut channels = [0u8; 3];
        for (i, channel) in channels.iter_mut().enumerate() {
            *channel = u8::from_str_radix(&expanded[i * 2..i * 2 + 2], 16)
                .map_err(|_| format!("invalid colour: {}", s))?;
        }
        Ok(HexColor(channels))
    }
}

impl Serialize for HexColor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HexColor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Corner treatment of the strip frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameShape {
    #[default]
    Classic,
    Round,
}

impl FrameShape {
    pub fn all() -> &'static [FrameShape] {
        &[FrameShape::Classic, FrameShape::Round]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrameShape::Classic => "Classic",
            FrameShape::Round => "Round",
        }
    }

    pub fn corner_radius(&self) -> f32 {
        match self {
            FrameShape::Classic => 6.0,
            FrameShape::Round => 24.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StripStyle {
    pub frame_color: HexColor,
    pub frame_shape: FrameShape,
    pub message: String,
    pub show_message: bool,
    pub show_date: bool,
}

impl StripStyle {
    /// Message to print, if the toggle is on and there is something to say.
    pub fn visible_message(&self) -> Option<&str> {
        let message = self.message.trim();
        (self.show_message && !message.is_empty()).then_some(message)
    }
}

/// Axis-aligned rectangle in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn shrink(&self, amount: f32) -> Rect {
        Rect::new(
            self.x + amount,
            self.y + amount,
            (self.width - amount * 2.0).max(0.0),
            (self.height - amount * 2.0).max(0.0),
        )
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Fixed dimensions of the strip, in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StripGeometry {
    pub border: f32,
    pub padding: f32,
    pub grid_width: f32,
    pub columns: usize,
    pub gap: f32,
    pub photo_border: f32,
    pub photo_max_height: f32,
    pub badge_width: f32,
    pub badge_height: f32,
    pub badge_margin: f32,
    pub badge_font_size: f32,
    pub caption_padding: f32,
    pub caption_min_height: f32,
    pub caption_font_size: f32,
    pub caption_line_height: f32,
}

impl Default for StripGeometry {
    fn default() -> Self {
        Self {
            border: 8.0,
            padding: 16.0,
            grid_width: 300.0,
            columns: 2,
            gap: 8.0,
            photo_border: 2.0,
            photo_max_height: 150.0,
            badge_width: 64.0,
            badge_height: 20.0,
            badge_margin: 16.0,
            badge_font_size: 12.0,
            caption_padding: 12.0,
            caption_min_height: 30.0,
            caption_font_size: 8.0,
            caption_line_height: 12.0,
        }
    }
}

/// One coloured run of text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub color: HexColor,
}

/// Centered text line inside `rect`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub spans: Vec<TextSpan>,
    pub rect: Rect,
    pub font_size: f32,
}

impl TextLine {
    pub fn text(&self) -> String {
        self.spans.iter().map(|span| span.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoCell {
    /// Index into the frame list (insertion order)
    pub frame_index: usize,
    /// Cell including the white photo border
    pub outer: Rect,
    /// Area the photo is cover-fitted into
    pub photo: Rect,
}

/// Renderable strip in logical pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct StripLayout {
    pub width: f32,
    pub height: f32,
    pub corner_radius: f32,
    pub background: HexColor,
    pub badge: Rect,
    pub brand: TextLine,
    pub cells: Vec<PhotoCell>,
    pub caption: Vec<TextLine>,
}

impl StripLayout {
    /// Pixel size when rasterized at `scale`.
    pub fn pixel_size(&self, scale: f32) -> (u32, u32) {
        (
            (self.width * scale).round().max(1.0) as u32,
            (self.height * scale).round().max(1.0) as u32,
        )
    }
}

/// Lays out a strip in logical pixels; the exporter rasterizes the same
/// layout at any scale.
pub struct StripComposer {
    geometry: StripGeometry,
}

impl Default for StripComposer {
    fn default() -> Self {
        Self::new(StripGeometry::default())
    }
}

impl StripComposer {
    pub fn new(geometry: StripGeometry) -> Self {
        Self { geometry }
    }

    /// Lay out `frames` in insertion order. `today` is printed when the style asks for a date.
    pub fn compose(&self, frames: &[Frame], style: &StripStyle, today: NaiveDate) -> StripLayout {
        let g = &self.geometry;
        let width = g.border * 2.0 + g.padding * 2.0 + g.grid_width;
        let content_x = g.border + g.padding;
        let mut y = g.border + g.padding;

        let badge = Rect::new(
            (width - g.badge_width) / 2.0,
            y,
            g.badge_width,
            g.badge_height,
        );
        let brand = TextLine {
            spans: vec![
                TextSpan { text: "P".into(), color: HexColor::EMERALD },
                TextSpan { text: "ik".into(), color: HexColor::SLATE },
                TextSpan { text: "T".into(), color: HexColor::EMERALD },
                TextSpan { text: "à".into(), color: HexColor::SLATE },
            ],
            rect: badge,
            font_size: g.badge_font_size,
        };
        y += g.badge_height + g.badge_margin;

        let (cells, grid_height) = self.layout_grid(frames, content_x, y);
        y += grid_height;

        let mut lines = Vec::new();
        if let Some(message) = style.visible_message() {
            lines.push(message.to_string());
        }
        if style.show_date {
            lines.push(today.format("%-m/%-d/%Y").to_string());
        }

        let mut line_y = y + g.caption_padding;
        let caption = lines
            .into_iter()
            .map(|text| {
                let rect = Rect::new(content_x, line_y, g.grid_width, g.caption_line_height);
                line_y += g.caption_line_height;
                TextLine {
                    spans: vec![TextSpan { text, color: HexColor::WHITE }],
                    rect,
                    font_size: g.caption_font_size,
                }
            })
            .collect::<Vec<_>>();
        let caption_height = (g.caption_padding + caption.len() as f32 * g.caption_line_height)
            .max(g.caption_min_height);
        y += caption_height;

        StripLayout {
            width,
            height: y + g.padding + g.border,
            corner_radius: style.frame_shape.corner_radius(),
            background: style.frame_color,
            badge,
            brand,
            cells,
            caption,
        }
    }

    fn layout_grid(&self, frames: &[Frame], left: f32, top: f32) -> (Vec<PhotoCell>, f32) {
        let g = &self.geometry;
        let columns = g.columns.max(1);
        let cell_width = (g.grid_width - g.gap * (columns - 1) as f32) / columns as f32;
        let photo_width = (cell_width - g.photo_border * 2.0).max(0.0);

        let mut cells = Vec::with_capacity(frames.len());
        let mut y = top;
        for (row, chunk) in frames.chunks(columns).enumerate() {
            if row > 0 {
                y += g.gap;
            }
            let heights: Vec<f32> = chunk
                .iter()
                .map(|frame| {
                    let (w, h) = frame.dimensions();
                    let natural = if w == 0 { 0.0 } else { photo_width * h as f32 / w as f32 };
                    (natural + g.photo_border * 2.0).min(g.photo_max_height)
                })
                .collect();
            let row_height = heights.iter().copied().fold(0.0, f32::max);

            for (column, height) in heights.iter().enumerate() {
                let outer = Rect::new(
                    left + column as f32 * (cell_width + g.gap),
                    y + (row_height - height) / 2.0,
                    cell_width,
                    *height,
                );
                cells.push(PhotoCell {
                    frame_index: row * columns + column,
                    outer,
                    photo: outer.shrink(g.photo_border),
                });
            }
            y += row_height;
        }
        (cells, y - top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::Effect;
    use image::RgbaImage;

    fn frames(count: usize, width: u32, height: u32) -> Vec<Frame> {
        (0..count)
            .map(|_| Frame::new(RgbaImage::new(width, height), Effect::None))
            .collect()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 7).unwrap()
    }

    #[test]
    fn test_hex_color_parsing() {
        assert_eq!("#10b981".parse::<HexColor>(), Ok(HexColor::EMERALD));
        assert_eq!("fff".parse::<HexColor>(), Ok(HexColor::WHITE));
        assert!("#12345".parse::<HexColor>().is_err());
        assert!("#zzzzzz".parse::<HexColor>().is_err());
        assert_eq!(HexColor([0xef, 0x44, 0x44]).to_string(), "#ef4444");
    }

    #[test]
    fn test_two_column_grid_in_insertion_order() {
        let composer = StripComposer::default();
        let layout = composer.compose(&frames(4, 640, 480), &StripStyle::default(), today());

        assert_eq!(layout.width, 348.0);
        assert_eq!(layout.cells.len(), 4);
        let order: Vec<_> = layout.cells.iter().map(|c| c.frame_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);

        // Columns share a row, rows stack downwards
        assert_eq!(layout.cells[0].outer.y, layout.cells[1].outer.y);
        assert!(layout.cells[1].outer.x > layout.cells[0].outer.x);
        assert!(layout.cells[2].outer.y > layout.cells[0].outer.bottom());
        assert_eq!(layout.cells[2].outer.x, layout.cells[0].outer.x);
    }

    #[test]
    fn test_cell_geometry_for_4_3_frames() {
        let composer = StripComposer::default();
        let layout = composer.compose(&frames(2, 640, 480), &StripStyle::default(), today());
        let cell = &layout.cells[0];

        assert_eq!(cell.outer.width, 146.0);
        // 142 px photo width at 4:3 is 106.5 px tall, plus the 2 px border each side
        assert!((cell.outer.height - 110.5).abs() < 1e-3);
        assert_eq!(cell.photo.width, 142.0);
    }

    #[test]
    fn test_tall_frames_are_capped() {
        let composer = StripComposer::default();
        let layout = composer.compose(&frames(1, 480, 1280), &StripStyle::default(), today());
        assert_eq!(layout.cells[0].outer.height, 150.0);
    }

    #[test]
    fn test_caption_lines_follow_style() {
        let composer = StripComposer::default();
        let mut style = StripStyle {
            message: "Happy birthday!".into(),
            ..Default::default()
        };

        let plain = composer.compose(&frames(2, 4, 3), &style, today());
        assert!(plain.caption.is_empty());

        style.show_message = true;
        style.show_date = true;
        let captioned = composer.compose(&frames(2, 4, 3), &style, today());
        let texts: Vec<_> = captioned.caption.iter().map(TextLine::text).collect();
        assert_eq!(texts, vec!["Happy birthday!".to_string(), "3/7/2025".to_string()]);
        assert!(captioned.height >= plain.height);
    }

    #[test]
    fn test_blank_message_is_hidden() {
        let style = StripStyle {
            message: "   ".into(),
            show_message: true,
            ..Default::default()
        };
        assert_eq!(style.visible_message(), None);
    }

    #[test]
    fn test_style_drives_corners_and_background() {
        let composer = StripComposer::default();
        let style = StripStyle {
            frame_color: HexColor::EMERALD,
            frame_shape: FrameShape::Round,
            ..Default::default()
        };
        let layout = composer.compose(&frames(2, 4, 3), &style, today());
        assert_eq!(layout.corner_radius, 24.0);
        assert_eq!(layout.background, HexColor::EMERALD);
        assert_eq!(layout.brand.text(), "PikTà");
    }

    #[test]
    fn test_pixel_size_scales_layout() {
        let composer = StripComposer::default();
        let layout = composer.compose(&frames(4, 640, 480), &StripStyle::default(), today());
        let (w, h) = layout.pixel_size(2.0);
        assert_eq!(w, 696);
        assert_eq!(h, (layout.height * 2.0).round() as u32);
    }
}
