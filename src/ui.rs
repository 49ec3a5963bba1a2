use eframe::egui;
use log::debug;
use std::time::{Duration, Instant};

use crate::booth::Booth;
use crate::composer::{FrameShape, HexColor, StripStyle};
use crate::config::Config;
use crate::controller::{CaptureOutcome, Event, FeedStatus, Notice, NoticeLevel, Phase};
use crate::effects::{Effect, EffectRenderer};

// ============================================================================
// CONSTANTS FOR UI STYLING - Easy to modify
// ============================================================================
const UI_PADDING: f32 = 20.0; // Padding from screen edges
const CONTROL_PANEL_WIDTH: f32 = 340.0;
const CAPTURE_BUTTON_RADIUS: f32 = 60.0;
const PREVIEW_INTERVAL: Duration = Duration::from_millis(33);
const NOTICE_SECONDS: u64 = 3;

const EMERALD: egui::Color32 = egui::Color32::from_rgb(0x10, 0xb9, 0x81);
const BACKGROUND: egui::Color32 = egui::Color32::from_rgb(40, 40, 40);

// ============================================================================
// MAIN APP STRUCT
// ============================================================================

pub struct BoothApp {
    pub booth: Booth,
    pub config: Config,
    pub runtime: tokio::runtime::Handle,

    // Textures
    pub preview_texture: Option<egui::TextureHandle>,
    pub strip_texture: Option<egui::TextureHandle>,
    pub thumbnails: Vec<egui::TextureHandle>,
    pub last_preview_update: Option<Instant>,
    /// Style and generation the strip texture was rendered for
    pub strip_key: Option<(StripStyle, u64)>,

    // Status popup
    pub status_message: Option<Notice>,
    pub status_message_time: Option<Instant>,

    pub custom_color: [u8; 3],
}

// ============================================================================
// INITIALIZATION
// ============================================================================

impl BoothApp {
    pub fn new(booth: Booth, config: Config, runtime: tokio::runtime::Handle) -> Self {
        let custom_color = config.strip.default_frame_color.0;
        Self {
            booth,
            config,
            runtime,
            preview_texture: None,
            strip_texture: None,
            thumbnails: Vec::new(),
            last_preview_update: None,
            strip_key: None,
            status_message: None,
            status_message_time: None,
            custom_color,
        }
    }

    fn send(&mut self, event: Event) {
        if matches!(event, Event::Retake | Event::Reset) {
            self.thumbnails.clear();
            self.preview_texture = None;
        }
        self.booth.dispatch(event);
    }

    fn show_notice(&mut self, notice: Notice) {
        self.status_message = Some(notice);
        self.status_message_time = Some(Instant::now());
    }
}

// ============================================================================
// MAIN UPDATE LOOP
// ============================================================================

impl eframe::App for BoothApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Timers and camera tasks are spawned from here
        let runtime = self.runtime.clone();
        let _guard = runtime.enter();

        // ESC key to exit (for kiosk mode with keyboard)
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        self.booth.pump();
        while let Some(notice) = self.booth.take_notice() {
            self.show_notice(notice);
        }

        let phase = self.booth.controller().phase();
        if matches!(phase, Phase::Live | Phase::Countdown { .. }) {
            self.update_camera_preview(ctx);
            ctx.request_repaint();
        } else {
            // Keep pumping background completions (exports, late feeds)
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        let frames = self.booth.controller().frames().to_vec();
        self.sync_thumbnails(ctx, &frames);
        if phase == Phase::Reviewing {
            self.update_strip_preview(ctx);
        }

        self.render_ui(ctx);
    }
}

impl BoothApp {
    fn update_camera_preview(&mut self, ctx: &egui::Context) {
        let now = Instant::now();
        let should_update = match self.last_preview_update {
            None => true,
            Some(last) => now.duration_since(last) >= PREVIEW_INTERVAL,
        };
        if !should_update {
            return;
        }

        if let Some(raw) = self.booth.preview_frame() {
            let settings = self.booth.controller().settings();
            let preview = EffectRenderer::preview(
                settings.effect,
                &raw,
                settings.facing,
                self.config.display.preview_width,
                self.config.display.preview_height,
            );
            self.update_preview_texture(ctx, &preview);
            self.last_preview_update = Some(now);
        }
    }

    fn update_strip_preview(&mut self, ctx: &egui::Context) {
        let key = (
            self.booth.controller().style().clone(),
            self.booth.controller().generation(),
        );
        if self.strip_key.as_ref() == Some(&key) {
            return;
        }

        match self.booth.strip_preview() {
            Ok(image) => self.update_strip_texture(ctx, &image),
            Err(e) => debug!("Strip preview unavailable: {}", e),
        }
        self.strip_key = Some(key);
    }

    fn render_ui(&mut self, ctx: &egui::Context) {
        match self.booth.controller().phase() {
            Phase::Consent => self.render_consent(ctx),
            Phase::Configuring => self.render_shot_count(ctx),
            Phase::Live | Phase::Countdown { .. } => self.render_live(ctx),
            Phase::Reviewing => self.render_review(ctx),
        }
        self.render_status_message(ctx);
    }

    fn render_status_message(&mut self, ctx: &egui::Context) {
        // Auto-hide message after 3 seconds
        if let Some(message_time) = self.status_message_time {
            if message_time.elapsed().as_secs() >= NOTICE_SECONDS {
                self.status_message = None;
                self.status_message_time = None;
            }
        }

        if let Some(ref notice) = self.status_message {
            let fill = match notice.level {
                NoticeLevel::Info => egui::Color32::from_rgb(40, 120, 40),
                NoticeLevel::Warning => egui::Color32::from_rgb(180, 120, 30),
                NoticeLevel::Error => egui::Color32::from_rgb(180, 40, 40),
            };

            egui::Area::new("status_message")
                .anchor(egui::Align2::CENTER_TOP, egui::vec2(0.0, UI_PADDING * 3.0))
                .order(egui::Order::Tooltip)
                .show(ctx, |ui| {
                    egui::Frame::none()
                        .fill(fill)
                        .rounding(8.0)
                        .inner_margin(egui::Margin::symmetric(20.0, 15.0))
                        .show(ui, |ui| {
                            ui.label(
                                egui::RichText::new(&notice.message)
                                    .color(egui::Color32::WHITE)
                                    .size(20.0),
                            );
                        });
                });
        }
    }
}

// ============================================================================
// CONSENT AND SESSION SETUP
// ============================================================================

impl BoothApp {
    fn render_consent(&mut self, ctx: &egui::Context) {
        let mut consent = self.booth.controller().consent();
        let mut accepted = false;
        let mut changed = false;

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(UI_PADDING * 4.0);
                brand_heading(ui, 48.0);
                ui.add_space(UI_PADDING);
                ui.label("PikTà uses your camera to take a short series of photos.");
                ui.label("Photos stay on this device and are only saved when you download a strip.");
                ui.add_space(UI_PADDING);
                changed = ui.checkbox(&mut consent, "I agree to let PikTà use my camera").changed();
                ui.add_space(UI_PADDING);
                accepted = ui.add_enabled(consent, egui::Button::new("Continue")).clicked();
            });
        });

        if changed {
            self.send(Event::SetConsent(consent));
        }
        if accepted {
            self.send(Event::AcceptConsent);
        }
    }

    fn render_shot_count(&mut self, ctx: &egui::Context) {
        let mut selected = None;

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(UI_PADDING * 4.0);
                brand_heading(ui, 36.0);
                ui.add_space(UI_PADDING);
                ui.heading("How many photos?");
                ui.add_space(UI_PADDING);
                ui.horizontal_wrapped(|ui| {
                    for &count in &self.config.capture.shot_counts {
                        let button = egui::Button::new(
                            egui::RichText::new(count.to_string()).size(28.0),
                        )
                        .min_size(egui::vec2(80.0, 80.0));
                        if ui.add(button).clicked() {
                            selected = Some(count);
                        }
                    }
                });
            });
        });

        if let Some(count) = selected {
            self.send(Event::SelectShotCount(count));
        }
    }
}

// ============================================================================
// LIVE CAPTURE
// ============================================================================

impl BoothApp {
    fn render_live(&mut self, ctx: &egui::Context) {
        let controller = self.booth.controller();
        let settings = controller.settings();
        let countdown = controller.countdown();
        let captured = controller.frames().len();
        let target = controller.store().capacity();
        let remaining = controller.store().remaining();
        let can_capture = controller.can_capture();
        let auto_capturing = controller.is_auto_capturing();
        let feed = controller.feed();
        let effects: Vec<Effect> = controller.frames().iter().map(|f| f.effect()).collect();
        let device = self.booth.active_device();

        let mut events = Vec::new();
        let mut capture = false;

        egui::SidePanel::right("live_controls")
            .exact_width(CONTROL_PANEL_WIDTH)
            .show(ctx, |ui| {
                ui.add_space(UI_PADDING);
                ui.heading(format!("{} / {}", captured, target));
                if remaining > 0 {
                    ui.label(format!("{} to go", remaining));
                }
                if auto_capturing {
                    ui.label(egui::RichText::new("Auto capturing…").color(EMERALD));
                }
                ui.separator();

                ui.label("Timer");
                ui.horizontal(|ui| {
                    for &seconds in &self.config.capture.timer_choices {
                        let text = if seconds == 0 { "Off".to_string() } else { format!("{}s", seconds) };
                        if ui.selectable_label(settings.timer_seconds == seconds, text).clicked() {
                            events.push(Event::SelectTimer(seconds));
                        }
                    }
                });

                let mut auto = settings.auto_capture;
                let auto_box = egui::Checkbox::new(&mut auto, "Auto capture");
                if ui.add_enabled(settings.timer_seconds > 0, auto_box).changed() {
                    events.push(Event::SetAutoCapture(auto));
                }
                ui.separator();

                ui.label("Effect");
                ui.horizontal_wrapped(|ui| {
                    for &effect in Effect::all() {
                        if ui.selectable_label(settings.effect == effect, effect_label(effect)).clicked() {
                            events.push(Event::SelectEffect(effect));
                        }
                    }
                });
                ui.separator();

                if let Some(device) = &device {
                    ui.label(egui::RichText::new(&device.label).small());
                }
                let flip_enabled = matches!(feed, FeedStatus::Active | FeedStatus::Unavailable);
                if ui.add_enabled(flip_enabled, egui::Button::new("Flip camera")).clicked() {
                    events.push(Event::SwitchFacing);
                }
                ui.add_space(UI_PADDING);

                ui.vertical_centered(|ui| {
                    ui.add_enabled_ui(can_capture, |ui| {
                        capture = capture_button(ui, CAPTURE_BUTTON_RADIUS);
                    });
                });
                ui.add_space(UI_PADDING);

                if ui.button("Start over").clicked() {
                    events.push(Event::Reset);
                }
            });

        egui::TopBottomPanel::bottom("thumbnails")
            .exact_height(150.0)
            .show(ctx, |ui| {
                egui::ScrollArea::horizontal().show(ui, |ui| {
                    ui.horizontal(|ui| {
                        for (texture, effect) in self.thumbnails.iter().zip(&effects) {
                            ui.vertical(|ui| {
                                let size = fit_image_in_rect(texture.size_vec2(), egui::vec2(160.0, 110.0));
                                ui.add(egui::Image::new(texture).fit_to_exact_size(size));
                                ui.label(effect_label(*effect));
                            });
                        }
                    });
                });
            });

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let rect = ui.max_rect();
                ui.painter().rect_filled(rect, 0.0, BACKGROUND);

                match (&self.preview_texture, feed) {
                    (Some(texture), FeedStatus::Active) => {
                        let display_size = fit_image_in_rect(texture.size_vec2(), rect.size());
                        let centered_rect = center_rect_in_rect(display_size, rect);
                        ui.allocate_ui_at_rect(centered_rect, |ui| {
                            ui.add(egui::Image::new(texture).fit_to_exact_size(display_size));
                        });
                    }
                    _ => {
                        let text = match feed {
                            FeedStatus::Unavailable => "No camera available",
                            _ => "Starting camera…",
                        };
                        ui.allocate_ui_at_rect(rect, |ui| {
                            ui.centered_and_justified(|ui| {
                                ui.label(text);
                            });
                        });
                    }
                }

                if let Some(remaining) = countdown {
                    ui.painter().text(
                        rect.center(),
                        egui::Align2::CENTER_CENTER,
                        remaining.to_string(),
                        egui::FontId::proportional(160.0),
                        egui::Color32::from_white_alpha(220),
                    );
                }
            });

        for event in events {
            self.send(event);
        }
        if capture {
            if let CaptureOutcome::Skipped(reason) = self.booth.trigger_capture() {
                debug!("Capture button ignored: {:?}", reason);
            }
        }
    }
}

// ============================================================================
// REVIEW AND EXPORT
// ============================================================================

impl BoothApp {
    fn render_review(&mut self, ctx: &egui::Context) {
        let style = self.booth.controller().style().clone();
        let exporting = self.booth.is_exporting();
        let export_dir = self.booth.export_dir().display().to_string();
        let has_caption_font = self.booth.has_caption_font();

        let mut events = Vec::new();
        let mut pick_folder = false;

        egui::SidePanel::right("review_controls")
            .exact_width(CONTROL_PANEL_WIDTH)
            .show(ctx, |ui| {
                ui.add_space(UI_PADDING);
                ui.heading("Your strip");
                ui.separator();

                ui.label("Frame style");
                ui.horizontal(|ui| {
                    for &shape in FrameShape::all() {
                        if ui.selectable_label(style.frame_shape == shape, shape.name()).clicked() {
                            events.push(Event::SetFrameShape(shape));
                        }
                    }
                });

                ui.label("Frame color");
                ui.horizontal_wrapped(|ui| {
                    for &color in &self.config.strip.palette {
                        if swatch(ui, color, style.frame_color == color).clicked() {
                            events.push(Event::SetFrameColor(color));
                        }
                    }
                    if ui.color_edit_button_srgb(&mut self.custom_color).changed() {
                        events.push(Event::SetFrameColor(HexColor(self.custom_color)));
                    }
                });
                ui.separator();

                let mut show_message = style.show_message;
                if ui.checkbox(&mut show_message, "Add a message").changed() {
                    events.push(Event::SetShowMessage(show_message));
                }
                if show_message {
                    let mut message = style.message.clone();
                    if ui.text_edit_singleline(&mut message).changed() {
                        events.push(Event::SetMessage(message));
                    }
                }

                let mut show_date = style.show_date;
                if ui.checkbox(&mut show_date, "Show date").changed() {
                    events.push(Event::SetShowDate(show_date));
                }
                if (show_message || show_date) && !has_caption_font {
                    ui.label(egui::RichText::new("No caption font configured, text is left off").small().weak());
                }
                ui.separator();

                ui.label(egui::RichText::new(format!("Saving to {}", export_dir)).small());
                if ui.button("Change folder").clicked() {
                    pick_folder = true;
                }
                ui.add_space(UI_PADDING);

                let download = egui::Button::new(
                    egui::RichText::new(if exporting { "Saving…" } else { "Download" }).size(22.0),
                )
                .fill(EMERALD)
                .min_size(egui::vec2(CONTROL_PANEL_WIDTH - UI_PADDING * 2.0, 48.0));
                if ui.add_enabled(!exporting, download).clicked() {
                    events.push(Event::Download);
                }
                ui.horizontal(|ui| {
                    if ui.button("Retake").clicked() {
                        events.push(Event::Retake);
                    }
                    if ui.button("Start over").clicked() {
                        events.push(Event::Reset);
                    }
                });
            });

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let rect = ui.max_rect();
                ui.painter().rect_filled(rect, 0.0, BACKGROUND);

                if let Some(texture) = &self.strip_texture {
                    let area = rect.shrink(UI_PADDING);
                    let image_size = texture.size_vec2();
                    // Never upscale beyond natural size
                    let display_size = fit_image_in_rect(image_size, area.size()).min(image_size);
                    let centered_rect = center_rect_in_rect(display_size, area);
                    ui.allocate_ui_at_rect(centered_rect, |ui| {
                        ui.add(egui::Image::new(texture).fit_to_exact_size(display_size));
                    });
                }
            });

        for event in events {
            self.send(event);
        }
        if pick_folder {
            if let Some(dir) = rfd::FileDialog::new()
                .set_directory(self.booth.export_dir())
                .pick_folder()
            {
                self.booth.set_export_dir(dir);
            }
        }
    }
}

// ============================================================================
// WIDGET HELPERS
// ============================================================================

fn brand_heading(ui: &mut egui::Ui, size: f32) {
    let slate = egui::Color32::from_rgb(0x1f, 0x29, 0x37);
    ui.horizontal(|ui| {
        ui.spacing_mut().item_spacing.x = 0.0;
        let width: f32 = size * 2.6;
        ui.add_space((ui.available_width() - width).max(0.0) / 2.0);
        for (text, color) in [("P", EMERALD), ("ik", slate), ("T", EMERALD), ("à", slate)] {
            ui.label(egui::RichText::new(text).size(size).strong().color(color));
        }
    });
}

fn effect_label(effect: Effect) -> &'static str {
    match effect {
        Effect::None => "Normal",
        Effect::Grayscale => "B&W",
        Effect::Sepia => "Sepia",
        Effect::Invert => "Invert",
    }
}

fn swatch(ui: &mut egui::Ui, color: HexColor, selected: bool) -> egui::Response {
    let [r, g, b] = color.0;
    let stroke = if selected {
        egui::Stroke::new(3.0, EMERALD)
    } else {
        egui::Stroke::new(1.0, egui::Color32::GRAY)
    };
    ui.add(
        egui::Button::new("")
            .fill(egui::Color32::from_rgb(r, g, b))
            .stroke(stroke)
            .min_size(egui::vec2(32.0, 32.0)),
    )
    .on_hover_text(color.to_string())
}

/// Round shutter button.
fn capture_button(ui: &mut egui::Ui, radius: f32) -> bool {
    let size = egui::vec2(radius * 2.0, radius * 2.0);
    let (rect, response) = ui.allocate_exact_size(size, egui::Sense::click());

    if ui.is_rect_visible(rect) {
        let painter = ui.painter();
        let center = rect.center();
        let enabled = ui.is_enabled();

        let fill = if !enabled {
            egui::Color32::from_gray(90)
        } else if response.is_pointer_button_down_on() {
            egui::Color32::from_rgb(200, 200, 200)
        } else if response.hovered() {
            egui::Color32::WHITE
        } else {
            egui::Color32::from_rgb(235, 235, 235)
        };

        // Draw shadow for depth
        painter.circle(
            center + egui::vec2(3.0, 3.0),
            radius,
            egui::Color32::from_black_alpha(80),
            egui::Stroke::NONE,
        );
        painter.circle(center, radius, fill, egui::Stroke::new(6.0, EMERALD));

        if response.hovered() && enabled {
            ui.ctx().set_cursor_icon(egui::CursorIcon::PointingHand);
        }
    }

    response.clicked()
}

// Helper functions for image centering
fn fit_image_in_rect(image_size: egui::Vec2, container_size: egui::Vec2) -> egui::Vec2 {
    let scale = (container_size.x / image_size.x).min(container_size.y / image_size.y);
    image_size * scale
}

fn center_rect_in_rect(content_size: egui::Vec2, container: egui::Rect) -> egui::Rect {
    let offset = (container.size() - content_size) * 0.5;
    egui::Rect::from_min_size(container.min + offset, content_size)
}
