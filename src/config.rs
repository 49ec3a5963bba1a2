use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::composer::{FrameShape, HexColor, StripStyle};
use crate::exporter::SaveMode;

pub const DEFAULT_CONFIG_FILE: &str = "pikta_config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub display: DisplayConfig,
    pub capture: CaptureConfig,
    pub camera: CameraConfig,
    pub strip: StripConfig,
    pub paths: PathConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub preview_width: u32,
    pub preview_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub shot_counts: Vec<usize>,
    pub timer_choices: Vec<u32>,
    pub tick_ms: u64,
    pub auto_capture_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Still-capture command used by the command backend
    pub command: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Keep front-camera captures mirrored like the preview
    pub mirror_front_capture: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripConfig {
    pub default_frame_color: HexColor,
    pub default_frame_shape: FrameShape,
    pub palette: Vec<HexColor>,
    pub export_scale: f32,
    pub export_file_name: String,
    #[serde(default)]
    pub font_path: Option<PathBuf>,
    pub save_mode: SaveMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub export_dir: PathBuf,
    pub config_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display: DisplayConfig {
                width: 1024,
                height: 768,
                fullscreen: false,
                preview_width: 640,
                preview_height: 480,
            },
            capture: CaptureConfig {
                shot_counts: vec![2, 4, 6, 8, 12],
                timer_choices: vec![0, 3, 10, 12],
                tick_ms: 1000,
                auto_capture_delay_ms: 1000,
            },
            camera: CameraConfig {
                command: "rpicam-still".to_string(),
                capture_width: 640,
                capture_height: 480,
                mirror_front_capture: false,
            },
            strip: StripConfig {
                default_frame_color: HexColor::BLACK,
                default_frame_shape: FrameShape::Classic,
                palette: vec![
                    HexColor::BLACK,
                    HexColor::WHITE,
                    HexColor::EMERALD,
                    HexColor([0xef, 0x44, 0x44]),
                    HexColor([0x3b, 0x82, 0xf6]),
                ],
                export_scale: 2.0,
                export_file_name: "PikTà.png".to_string(),
                font_path: None,
                save_mode: SaveMode::Auto,
            },
            paths: PathConfig {
                export_dir: PathBuf::from("output"),
                config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            },
        }
    }
}

impl StripConfig {
    /// Style a freshly finished session starts its review with.
    pub fn default_style(&self) -> StripStyle {
        StripStyle {
            frame_color: self.default_frame_color,
            frame_shape: self.default_frame_shape,
            ..Default::default()
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            log::info!("Config file not found, creating default configuration");
            // PIKTA_PRESET picks the starting point for a fresh install
            let default_config = match std::env::var("PIKTA_PRESET") {
                Ok(name) => Self::preset(&name)
                    .with_context(|| format!("Unknown configuration preset: {}", name))?,
                Err(_) => Self::default(),
            };
            default_config.save()?;
            Ok(default_config)
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| "Failed to parse configuration file")?;
        config.validate()?;

        log::info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_file(&self.paths.config_file)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow::anyhow!("Invalid display dimensions"));
        }

        if self.display.preview_width > self.display.width
            || self.display.preview_height > self.display.height
        {
            return Err(anyhow::anyhow!("Preview area larger than screen"));
        }

        if self.capture.shot_counts.is_empty() || self.capture.shot_counts.contains(&0) {
            return Err(anyhow::anyhow!("Shot counts must be non-empty and positive"));
        }

        if self.capture.timer_choices.is_empty() {
            return Err(anyhow::anyhow!("No timer choices configured"));
        }

        // Zero is the "capture immediately" choice and the only one without auto-capture
        if !self.capture.timer_choices.contains(&0) {
            return Err(anyhow::anyhow!("Timer choices must include 0"));
        }

        if self.capture.tick_ms == 0 {
            return Err(anyhow::anyhow!("Invalid countdown tick period"));
        }

        if self.camera.capture_width == 0 || self.camera.capture_height == 0 {
            return Err(anyhow::anyhow!("Invalid camera capture size"));
        }

        if !self.strip.export_scale.is_finite() || self.strip.export_scale <= 0.0 {
            return Err(anyhow::anyhow!("Invalid export scale: {}", self.strip.export_scale));
        }

        if self.strip.palette.is_empty() {
            return Err(anyhow::anyhow!("Frame color palette is empty"));
        }

        if self.strip.export_file_name.trim().is_empty() {
            return Err(anyhow::anyhow!("Export file name is empty"));
        }

        Ok(())
    }

    pub fn create_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.export_dir)
            .with_context(|| format!("Failed to create export directory: {}",
                self.paths.export_dir.display()))?;

        log::info!("Created necessary directories");
        Ok(())
    }
}

// Configuration builder for easier setup
#[cfg(test)]
pub struct ConfigBuilder {
    config: Config,
}

#[cfg(test)]
impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn display_size(mut self, width: u32, height: u32) -> Self {
        self.config.display.width = width;
        self.config.display.height = height;
        self
    }

    pub fn fullscreen(mut self, enabled: bool) -> Self {
        self.config.display.fullscreen = enabled;
        self
    }

    pub fn mirror_front_capture(mut self, enabled: bool) -> Self {
        self.config.camera.mirror_front_capture = enabled;
        self
    }

    pub fn export_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.paths.export_dir = dir.into();
        self
    }

    pub fn export_scale(mut self, scale: f32) -> Self {
        self.config.strip.export_scale = scale;
        self
    }

    pub fn save_mode(mut self, mode: SaveMode) -> Self {
        self.config.strip.save_mode = mode;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// Environment-specific configuration presets
impl Config {
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "pi" | "raspberry_pi_7inch" => Some(Self::raspberry_pi_7inch()),
            "desktop" | "development_desktop" => Some(Self::development_desktop()),
            "kiosk" | "kiosk_hdmi" => Some(Self::kiosk_hdmi()),
            _ => None,
        }
    }

    pub fn raspberry_pi_7inch() -> Self {
        Config {
            display: DisplayConfig {
                width: 800,
                height: 480,
                fullscreen: true,
                preview_width: 480,
                preview_height: 360,
            },
            ..Default::default()
        }
    }

    pub fn development_desktop() -> Self {
        Config {
            display: DisplayConfig {
                width: 1280,
                height: 800,
                fullscreen: false,
                preview_width: 640,
                preview_height: 480,
            },
            camera: CameraConfig {
                mirror_front_capture: true,
                ..Config::default().camera
            },
            ..Default::default()
        }
    }

    /// Event kiosk: no viewer to fall back to, strips go straight to disk.
    pub fn kiosk_hdmi() -> Self {
        Config {
            display: DisplayConfig {
                width: 1920,
                height: 1080,
                fullscreen: true,
                preview_width: 1024,
                preview_height: 768,
            },
            camera: CameraConfig {
                capture_width: 1280,
                capture_height: 960,
                ..Config::default().camera
            },
            strip: StripConfig {
                save_mode: SaveMode::Direct,
                ..Config::default().strip
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.shot_counts, vec![2, 4, 6, 8, 12]);
        assert_eq!(config.capture.timer_choices, vec![0, 3, 10, 12]);
        assert_eq!(config.strip.palette.len(), 5);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .display_size(1280, 720)
            .fullscreen(true)
            .mirror_front_capture(true)
            .export_scale(3.0)
            .save_mode(SaveMode::Viewer)
            .build()
            .unwrap();

        assert_eq!(config.display.width, 1280);
        assert!(config.display.fullscreen);
        assert!(config.camera.mirror_front_capture);
        assert_eq!(config.strip.export_scale, 3.0);
        assert_eq!(config.strip.save_mode, SaveMode::Viewer);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.strip.export_scale = 0.0;
        assert!(config.validate().is_err());
        config.strip.export_scale = 2.0;

        config.capture.timer_choices = vec![3, 10];
        assert!(config.validate().is_err());
        config.capture.timer_choices = vec![0, 3];

        config.capture.shot_counts.clear();
        assert!(config.validate().is_err());
        config.capture.shot_counts = vec![4];

        config.capture.tick_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_hex_color_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bad.toml");
        let contents = toml::to_string_pretty(&Config::default())
            .unwrap()
            .replace("\"#000000\"", "\"#zz0000\"");
        std::fs::write(&config_path, contents).unwrap();

        assert!(Config::load_from_file(&config_path).is_err());
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let mut original = Config::raspberry_pi_7inch();
        original.strip.default_frame_color = HexColor::EMERALD;
        original.strip.font_path = Some(PathBuf::from("fonts/Inter.ttf"));
        original.save_to_file(&config_path).unwrap();

        let loaded = Config::load_from_file(&config_path).unwrap();

        assert_eq!(original.display.width, loaded.display.width);
        assert_eq!(loaded.strip.default_frame_color, HexColor::EMERALD);
        assert_eq!(loaded.strip.export_file_name, "PikTà.png");
        assert_eq!(loaded.strip.font_path, original.strip.font_path);
        assert_eq!(loaded.strip.default_style().frame_color, HexColor::EMERALD);
    }

    #[test]
    fn test_preset_configs() {
        assert!(Config::raspberry_pi_7inch().validate().is_ok());
        assert!(Config::development_desktop().validate().is_ok());
        assert!(Config::kiosk_hdmi().validate().is_ok());
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(Config::preset("pi").map(|c| c.display.width), Some(800));
        assert_eq!(
            Config::preset("Kiosk").map(|c| c.strip.save_mode),
            Some(SaveMode::Direct)
        );
        assert!(Config::preset("desktop").is_some());
        assert!(Config::preset("toaster").is_none());
    }
}
