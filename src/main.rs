use anyhow::Result;
use eframe::egui;
use log::info;
use std::sync::Arc;

mod booth;
mod camera_controller;
mod composer;
mod config;
mod controller;
mod device;
mod effects;
mod errors;
mod exporter;
mod frame_store;
mod texture;
mod ui;

use crate::booth::Booth;
use crate::camera_controller::TestPatternSource;
use crate::config::Config;
use crate::device::DeviceSource;
use crate::ui::BoothApp;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("📸 Starting PikTà photo booth");

    // Load configuration
    let config = Config::load()?;
    config.create_directories()?;
    info!("Configuration loaded: {}x{} display", config.display.width, config.display.height);

    let source = camera_source(&config);
    let booth = Booth::new(&config, source);
    let app = BoothApp::new(booth, config.clone(), tokio::runtime::Handle::current());

    let mut viewport = egui::ViewportBuilder::default()
        .with_inner_size([config.display.width as f32, config.display.height as f32])
        .with_min_inner_size([640.0, 480.0]);
    if config.display.fullscreen {
        viewport = viewport
            .with_decorations(false)
            .with_fullscreen(true);
    }
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };

    info!("Launching GUI application...");

    eframe::run_native(
        "PikTà",
        options,
        Box::new(|cc| {
            setup_touch_style(&cc.egui_ctx);
            Box::new(app)
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run application: {}", e))?;

    info!("Application shut down gracefully");
    Ok(())
}

#[cfg(feature = "camera")]
fn camera_source(config: &Config) -> Arc<dyn DeviceSource> {
    match camera_controller::CommandCameraSource::detect(&config.camera) {
        Some(source) => Arc::new(source),
        None => {
            log::warn!("No camera backend found. Running with test pattern cameras.");
            test_pattern(config)
        }
    }
}

#[cfg(not(feature = "camera"))]
fn camera_source(config: &Config) -> Arc<dyn DeviceSource> {
    test_pattern(config)
}

fn test_pattern(config: &Config) -> Arc<dyn DeviceSource> {
    Arc::new(TestPatternSource::new(
        config.camera.capture_width,
        config.camera.capture_height,
    ))
}

fn setup_touch_style(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();

    // Larger UI elements for touch interaction
    style.spacing.button_padding = egui::vec2(16.0, 12.0);
    style.spacing.item_spacing = egui::vec2(12.0, 8.0);
    style.spacing.window_margin = egui::Margin::same(16.0);

    style.text_styles.insert(
        egui::TextStyle::Button,
        egui::FontId::new(18.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Body,
        egui::FontId::new(16.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Heading,
        egui::FontId::new(26.0, egui::FontFamily::Proportional),
    );

    ctx.set_style(style);
}
