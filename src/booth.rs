use image::RgbaImage;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::composer::{StripComposer, StripLayout};
use crate::config::Config;
use crate::controller::{
    CaptureController, CaptureOutcome, CaptureRules, Event, Intent, Notice, NoticeLevel,
    StripRequest,
};
use crate::device::{DeviceAdapter, DeviceInfo, DeviceSource, FacingMode};
use crate::effects::{Effect, EffectRenderer, Orientation};
use crate::errors::ExportError;
use crate::exporter::{Exporter, StripRenderer};
use crate::frame_store::Frame;

enum DeviceCommand {
    Acquire(FacingMode),
    Switch(FacingMode),
    Release,
    Snapshot {
        generation: u64,
        effect: Effect,
        orientation: Orientation,
    },
}

/// Executes controller intents on tokio. Device work runs on one worker task
/// so requests apply in the order they were issued.
pub struct Booth {
    controller: CaptureController,
    adapter: Arc<Mutex<DeviceAdapter>>,
    devices: mpsc::UnboundedSender<DeviceCommand>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    worker: JoinHandle<()>,
    timers: Vec<JoinHandle<()>>,
    composer: StripComposer,
    exporter: Arc<Exporter>,
    exporting: bool,
    notices: VecDeque<Notice>,
}

impl Booth {
    /// Build the runtime. Must be called from inside a tokio runtime.
    pub fn new(config: &Config, source: Arc<dyn DeviceSource>) -> Self {
        let renderer = StripRenderer::from_font_path(config.strip.font_path.as_deref());
        let exporter = Exporter::new(
            renderer,
            config.strip.export_scale,
            config.strip.export_file_name.clone(),
            config.paths.export_dir.clone(),
            config.strip.save_mode,
        );
        Self::with_exporter(config, source, exporter)
    }

    pub fn with_exporter(config: &Config, source: Arc<dyn DeviceSource>, exporter: Exporter) -> Self {
        let adapter = Arc::new(Mutex::new(DeviceAdapter::new(source)));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (devices, commands) = mpsc::unbounded_channel();

        let worker = tokio::spawn(run_device_worker(
            Arc::clone(&adapter),
            commands,
            events_tx.clone(),
        ));

        Self {
            controller: CaptureController::new(CaptureRules::from_config(config)),
            adapter,
            devices,
            events_tx,
            events_rx,
            worker,
            timers: Vec::new(),
            composer: StripComposer::default(),
            exporter: Arc::new(exporter),
            exporting: false,
            notices: VecDeque::new(),
        }
    }

    pub fn controller(&self) -> &CaptureController {
        &self.controller
    }

    /// Apply an event and run whatever it asks for.
    pub fn dispatch(&mut self, event: Event) {
        if matches!(event, Event::ExportFinished(_)) {
            self.exporting = false;
        }
        let intents = self.controller.handle(event);
        self.execute(intents);
    }

    /// Capture button. Reports why nothing happened when the press is a no-op.
    pub fn trigger_capture(&mut self) -> CaptureOutcome {
        let (outcome, intents) = self.controller.trigger_capture();
        self.execute(intents);
        outcome
    }

    /// Process every event that has already arrived. Returns how many ran.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
            processed += 1;
        }
        processed
    }

    /// Wait for the next completion event and process it.
    pub async fn step(&mut self) {
        if let Some(event) = self.events_rx.recv().await {
            self.dispatch(event);
        }
    }

    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notices.pop_front()
    }

    pub fn is_exporting(&self) -> bool {
        self.exporting
    }

    /// Latest raw frame for the live preview, if the camera is free right now.
    pub fn preview_frame(&self) -> Option<RgbaImage> {
        let mut adapter = self.adapter.try_lock().ok()?;
        if !adapter.is_active() {
            return None;
        }
        adapter.frame().ok()
    }

    pub fn active_device(&self) -> Option<DeviceInfo> {
        self.adapter
            .try_lock()
            .ok()
            .and_then(|adapter| adapter.device().cloned())
    }

    /// Layout of the strip as it would be exported today.
    pub fn strip_layout(&self) -> StripLayout {
        self.composer.compose(
            self.controller.frames(),
            self.controller.style(),
            chrono::Local::now().date_naive(),
        )
    }

    /// Whether message and date can be printed on the strip.
    pub fn has_caption_font(&self) -> bool {
        self.exporter.renderer().has_font()
    }

    /// Natural-size raster of the current strip for on-screen review.
    pub fn strip_preview(&self) -> Result<RgbaImage, ExportError> {
        let layout = self.strip_layout();
        self.exporter
            .renderer()
            .render(&layout, self.controller.frames(), 1.0)
    }

    pub fn export_dir(&self) -> &Path {
        self.exporter.export_dir()
    }

    pub fn set_export_dir(&mut self, dir: PathBuf) {
        Arc::make_mut(&mut self.exporter).set_export_dir(dir);
    }

    /// Number of countdown and chain timers still waiting to fire.
    #[cfg(test)]
    pub fn pending_timers(&mut self) -> usize {
        self.timers.retain(|handle| !handle.is_finished());
        self.timers.len()
    }

    fn execute(&mut self, intents: Vec<Intent>) {
        for intent in intents {
            match intent {
                Intent::AcquireFeed(facing) => self.send_device(DeviceCommand::Acquire(facing)),
                Intent::SwitchFeed(facing) => self.send_device(DeviceCommand::Switch(facing)),
                Intent::ReleaseFeed => self.send_device(DeviceCommand::Release),
                Intent::Snapshot { generation, effect, orientation } => {
                    self.send_device(DeviceCommand::Snapshot { generation, effect, orientation })
                }
                Intent::ScheduleTick { generation, after } => {
                    self.schedule(after, Event::Tick { generation })
                }
                Intent::ScheduleChain { generation, after } => {
                    self.schedule(after, Event::ChainElapsed { generation })
                }
                Intent::CancelTimers => self.cancel_timers(),
                Intent::Export(request) => self.export(request),
                Intent::Notify(notice) => self.notify(notice),
            }
        }
    }

    fn send_device(&self, command: DeviceCommand) {
        if self.devices.send(command).is_err() {
            error!("Camera worker has stopped");
        }
    }

    fn schedule(&mut self, after: Duration, event: Event) {
        self.timers.retain(|handle| !handle.is_finished());
        let tx = self.events_tx.clone();
        self.timers.push(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(event);
        }));
    }

    fn cancel_timers(&mut self) {
        let count = self.timers.len();
        for handle in self.timers.drain(..) {
            handle.abort();
        }
        if count > 0 {
            debug!("Cancelled {} pending timer(s)", count);
        }
    }

    fn export(&mut self, request: StripRequest) {
        if self.exporting {
            debug!("Export already running, ignoring download");
            return;
        }
        self.exporting = true;

        let layout = self
            .composer
            .compose(&request.frames, &request.style, chrono::Local::now().date_naive());
        let exporter = Arc::clone(&self.exporter);
        let tx = self.events_tx.clone();
        info!("Exporting {} frame strip", request.frames.len());

        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || exporter.export(&layout, &request.frames))
                .await
                .unwrap_or_else(|e| Err(ExportError::Render(e.to_string())));
            let _ = tx.send(Event::ExportFinished(result));
        });
    }

    fn notify(&mut self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => info!("{}", notice.message),
            NoticeLevel::Warning => warn!("{}", notice.message),
            NoticeLevel::Error => error!("{}", notice.message),
        }
        self.notices.push_back(notice);
    }
}

impl Drop for Booth {
    fn drop(&mut self) {
        self.cancel_timers();
        self.worker.abort();
    }
}

async fn run_device_worker(
    adapter: Arc<Mutex<DeviceAdapter>>,
    mut commands: mpsc::UnboundedReceiver<DeviceCommand>,
    events: mpsc::UnboundedSender<Event>,
) {
    while let Some(command) = commands.recv().await {
        let mut adapter = adapter.lock().await;
        let event = match command {
            DeviceCommand::Acquire(facing) => Some(match adapter.acquire(facing).await {
                Ok(()) => Event::FeedReady { facing },
                Err(e) => {
                    error!("Camera unavailable: {}", e);
                    Event::FeedFailed(e)
                }
            }),
            DeviceCommand::Switch(facing) => Some(match adapter.switch_facing(facing).await {
                Ok(()) => Event::FeedSwitched { facing },
                Err(e) => match adapter.facing() {
                    Some(_) => Event::FeedSwitchFailed(e),
                    // Could not even restore the previous camera
                    None => Event::FeedFailed(e),
                },
            }),
            DeviceCommand::Release => {
                adapter.release();
                None
            }
            DeviceCommand::Snapshot { generation, effect, orientation } => {
                Some(match adapter.frame() {
                    Ok(raw) => {
                        let image = EffectRenderer::render(effect, &raw, orientation, None);
                        debug!("Snapshot {}x{} with {}", image.width(), image.height(), effect);
                        Event::SnapshotTaken { generation, frame: Frame::new(image, effect) }
                    }
                    Err(error) => Event::SnapshotFailed { generation, error },
                })
            }
        };
        drop(adapter);

        if let Some(event) = event {
            if events.send(event).is_err() {
                break;
            }
        }
    }
    debug!("Camera worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::controller::{FeedStatus, Phase};
    use crate::device::testing::ScriptedSource;
    use crate::exporter::SaveMode;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;
    use tokio::time::Instant;

    async fn live_booth(source: Arc<ScriptedSource>, count: usize) -> Booth {
        let mut booth = Booth::new(&Config::default(), source);
        booth.dispatch(Event::SetConsent(true));
        booth.dispatch(Event::AcceptConsent);
        booth.dispatch(Event::SelectShotCount(count));
        while booth.controller().feed() != FeedStatus::Active {
            booth.step().await;
        }
        booth
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_capture_chains_full_session() {
        let source = Arc::new(ScriptedSource::with_both_cameras());
        let mut booth = live_booth(Arc::clone(&source), 4).await;
        booth.dispatch(Event::SelectTimer(3));
        booth.dispatch(Event::SetAutoCapture(true));

        let start = Instant::now();
        assert_eq!(booth.trigger_capture(), CaptureOutcome::CountdownStarted(3));

        let mut captured_at = Vec::new();
        while booth.controller().phase() != Phase::Reviewing {
            let before = booth.controller().frames().len();
            booth.step().await;
            if booth.controller().frames().len() > before {
                captured_at.push(start.elapsed());
            }
        }

        assert_eq!(captured_at.len(), 4);
        let secs: Vec<u64> = captured_at.iter().map(|d| d.as_secs()).collect();
        // 3 s countdown, then 1 s chain delay + 3 s countdown per frame
        assert_eq!(secs, vec![3, 7, 11, 15]);

        // Let the worker process the release queued on entering review
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.live_feeds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_countdown() {
        let source = Arc::new(ScriptedSource::with_both_cameras());
        let mut booth = live_booth(source, 2).await;
        booth.dispatch(Event::SelectTimer(10));
        booth.trigger_capture();
        booth.step().await;
        assert_eq!(booth.controller().countdown(), Some(9));

        booth.dispatch(Event::Reset);
        assert_eq!(booth.pending_timers(), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(booth.pump(), 0);
        assert_eq!(booth.controller().phase(), Phase::Configuring);
        assert!(booth.controller().frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flip_never_holds_two_feeds() {
        let source = Arc::new(ScriptedSource::with_both_cameras());
        let mut booth = live_booth(Arc::clone(&source), 2).await;

        booth.dispatch(Event::SwitchFacing);
        while booth.controller().feed() != FeedStatus::Active {
            booth.step().await;
        }

        assert_eq!(booth.controller().settings().facing, FacingMode::Back);
        assert_eq!(Orientation::for_preview(booth.controller().settings().facing), Orientation::True);
        assert_eq!(source.live_feeds(), 1);
        assert_eq!(source.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_camera_blocks_capture() {
        let source = Arc::new(ScriptedSource::with_both_cameras());
        *source.deny.lock().unwrap() = true;
        let mut booth = Booth::new(&Config::default(), source);
        booth.dispatch(Event::SetConsent(true));
        booth.dispatch(Event::AcceptConsent);
        booth.dispatch(Event::SelectShotCount(2));
        booth.step().await;

        assert_eq!(booth.controller().feed(), FeedStatus::Unavailable);
        assert_eq!(booth.controller().phase(), Phase::Live);
        assert!(matches!(booth.trigger_capture(), CaptureOutcome::Skipped(_)));
        let notice = booth.take_notice().unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn test_download_writes_strip() {
        let dir = TempDir::new().unwrap();
        let config = ConfigBuilder::new()
            .export_dir(dir.path())
            .save_mode(SaveMode::Direct)
            .build()
            .unwrap();
        let source = Arc::new(ScriptedSource::with_both_cameras());
        let mut booth = Booth::new(&config, source);
        booth.dispatch(Event::SetConsent(true));
        booth.dispatch(Event::AcceptConsent);
        booth.dispatch(Event::SelectShotCount(2));
        while booth.controller().feed() != FeedStatus::Active {
            booth.step().await;
        }

        booth.dispatch(Event::SelectTimer(0));
        for expected in 1..=2 {
            assert_eq!(booth.trigger_capture(), CaptureOutcome::SnapshotRequested);
            while booth.controller().frames().len() < expected {
                booth.step().await;
            }
        }
        assert_eq!(booth.controller().phase(), Phase::Reviewing);

        booth.dispatch(Event::Download);
        assert!(booth.is_exporting());
        let notice = loop {
            booth.step().await;
            if let Some(notice) = booth.take_notice() {
                break notice;
            }
        };

        assert_eq!(notice.level, NoticeLevel::Info);
        assert!(!booth.is_exporting());
        assert!(dir.path().join("PikTà.png").exists());
        assert_eq!(booth.controller().phase(), Phase::Reviewing);
    }
}
