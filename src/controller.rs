use log::{debug, info, warn};
use std::time::Duration;

use crate::composer::{FrameShape, HexColor, StripStyle};
use crate::config::Config;
use crate::device::FacingMode;
use crate::effects::{Effect, Orientation};
use crate::errors::{BoothError, DeviceError, ExportError};
use crate::exporter::ExportOutcome;
use crate::frame_store::{Frame, FrameStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Consent,
    Configuring,
    Live,
    Countdown { remaining: u32 },
    Reviewing,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Consent => "consent",
            Phase::Configuring => "configuring",
            Phase::Live => "live",
            Phase::Countdown { .. } => "countdown",
            Phase::Reviewing => "reviewing",
        }
    }
}

/// Fixed for the lifetime of one capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub target_frame_count: usize,
}

/// Adjustable while live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureSettings {
    pub timer_seconds: u32,
    pub auto_capture: bool,
    pub effect: Effect,
    pub facing: FacingMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    None,
    Acquiring,
    Active,
    Unavailable,
}

/// Why a capture request turned into a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotLive,
    NoFeed,
    StoreFull,
    CountdownActive,
    SnapshotPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    CountdownStarted(u32),
    SnapshotRequested,
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
pub enum Event {
    SetConsent(bool),
    AcceptConsent,
    SelectShotCount(usize),
    FeedReady { facing: FacingMode },
    FeedFailed(DeviceError),
    SwitchFacing,
    FeedSwitched { facing: FacingMode },
    FeedSwitchFailed(DeviceError),
    SelectTimer(u32),
    SetAutoCapture(bool),
    SelectEffect(Effect),
    TriggerCapture,
    Tick { generation: u64 },
    ChainElapsed { generation: u64 },
    SnapshotTaken { generation: u64, frame: Frame },
    SnapshotFailed { generation: u64, error: DeviceError },
    SetFrameColor(HexColor),
    SetFrameShape(FrameShape),
    SetMessage(String),
    SetShowMessage(bool),
    SetShowDate(bool),
    Retake,
    Download,
    ExportFinished(Result<ExportOutcome, ExportError>),
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, message: message.into() }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }
}

/// Snapshot of everything the exporter needs, taken when download is pressed.
#[derive(Debug, Clone)]
pub struct StripRequest {
    pub frames: Vec<Frame>,
    pub style: StripStyle,
}

#[derive(Debug, Clone)]
pub enum Intent {
    AcquireFeed(FacingMode),
    SwitchFeed(FacingMode),
    ReleaseFeed,
    ScheduleTick { generation: u64, after: Duration },
    ScheduleChain { generation: u64, after: Duration },
    CancelTimers,
    Snapshot { generation: u64, effect: Effect, orientation: Orientation },
    Export(StripRequest),
    Notify(Notice),
}

/// Timing and choice sets the controller enforces.
#[derive(Debug, Clone)]
pub struct CaptureRules {
    pub shot_counts: Vec<usize>,
    pub tick: Duration,
    pub chain_delay: Duration,
    pub mirror_front_capture: bool,
    pub default_style: StripStyle,
}

impl Default for CaptureRules {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl CaptureRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            shot_counts: config.capture.shot_counts.clone(),
            tick: Duration::from_millis(config.capture.tick_ms),
            chain_delay: Duration::from_millis(config.capture.auto_capture_delay_ms),
            mirror_front_capture: config.camera.mirror_front_capture,
            default_style: config.strip.default_style(),
        }
    }
}

/// Capture loop state machine. Never touches hardware: every event returns
/// the side effects it wants as [`Intent`]s.
pub struct CaptureController {
    rules: CaptureRules,
    phase: Phase,
    consent: bool,
    session: Option<SessionConfig>,
    settings: CaptureSettings,
    store: FrameStore,
    style: StripStyle,
    feed: FeedStatus,
    generation: u64,
    auto_capturing: bool,
    // Chain delay elapsed while a camera switch was in flight
    chain_parked: bool,
    snapshot_pending: bool,
}

impl CaptureController {
    pub fn new(rules: CaptureRules) -> Self {
        let style = rules.default_style.clone();
        Self {
            rules,
            phase: Phase::Consent,
            consent: false,
            session: None,
            settings: CaptureSettings::default(),
            store: FrameStore::default(),
            style,
            feed: FeedStatus::None,
            generation: 0,
            auto_capturing: false,
            chain_parked: false,
            snapshot_pending: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn consent(&self) -> bool {
        self.consent
    }

    pub fn session(&self) -> Option<SessionConfig> {
        self.session
    }

    pub fn settings(&self) -> CaptureSettings {
        self.settings
    }

    pub fn frames(&self) -> &[Frame] {
        self.store.frames()
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub fn style(&self) -> &StripStyle {
        &self.style
    }

    pub fn feed(&self) -> FeedStatus {
        self.feed
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn countdown(&self) -> Option<u32> {
        match self.phase {
            Phase::Countdown { remaining } => Some(remaining),
            _ => None,
        }
    }

    pub fn is_auto_capturing(&self) -> bool {
        self.auto_capturing
    }

    pub fn can_capture(&self) -> bool {
        self.capture_blocked().is_none()
    }

    /// Apply one event, returning the side effects to run.
    pub fn handle(&mut self, event: Event) -> Vec<Intent> {
        match event {
            Event::SetConsent(checked) => {
                if self.phase == Phase::Consent {
                    self.consent = checked;
                }
                Vec::new()
            }
            Event::AcceptConsent => self.accept_consent(),
            Event::SelectShotCount(count) => self.select_shot_count(count),
            Event::FeedReady { facing } => self.feed_ready(facing),
            Event::FeedFailed(error) => self.feed_failed(error),
            Event::SwitchFacing => self.switch_facing(),
            Event::FeedSwitched { facing } => self.feed_ready(facing),
            Event::FeedSwitchFailed(error) => {
                warn!("Camera switch failed, keeping previous feed: {}", error);
                if self.feed == FeedStatus::Acquiring {
                    self.feed = FeedStatus::Active;
                }
                self.resume_chain()
            }
            Event::SelectTimer(seconds) => {
                self.settings.timer_seconds = seconds;
                if seconds == 0 && self.settings.auto_capture {
                    debug!("Timer disabled, turning auto-capture off");
                    self.settings.auto_capture = false;
                    self.stop_chain();
                }
                Vec::new()
            }
            Event::SetAutoCapture(enabled) => {
                if enabled && self.settings.timer_seconds == 0 {
                    debug!("Auto-capture needs a timer, ignoring");
                } else {
                    self.settings.auto_capture = enabled;
                    if !enabled {
                        self.stop_chain();
                    }
                }
                Vec::new()
            }
            Event::SelectEffect(effect) => {
                self.settings.effect = effect;
                Vec::new()
            }
            Event::TriggerCapture => self.trigger_capture().1,
            Event::Tick { generation } => self.tick(generation),
            Event::ChainElapsed { generation } => self.chain_elapsed(generation),
            Event::SnapshotTaken { generation, frame } => self.snapshot_taken(generation, frame),
            Event::SnapshotFailed { generation, error } => {
                if generation != self.generation || !self.snapshot_pending {
                    return Vec::new();
                }
                self.snapshot_pending = false;
                self.stop_chain();
                warn!("Snapshot failed: {}", error);
                vec![Intent::Notify(Notice::warning(format!("Capture failed: {}", error)))]
            }
            Event::SetFrameColor(color) => self.edit_style(|style| style.frame_color = color),
            Event::SetFrameShape(shape) => self.edit_style(|style| style.frame_shape = shape),
            Event::SetMessage(message) => self.edit_style(|style| style.message = message),
            Event::SetShowMessage(show) => self.edit_style(|style| style.show_message = show),
            Event::SetShowDate(show) => self.edit_style(|style| style.show_date = show),
            Event::Retake => self.retake(),
            Event::Download => self.download(),
            Event::ExportFinished(result) => self.export_finished(result),
            Event::Reset => self.reset(),
        }
    }

    /// Start a capture the way the capture button does.
    pub fn trigger_capture(&mut self) -> (CaptureOutcome, Vec<Intent>) {
        if let Some(reason) = self.capture_blocked() {
            debug!("Capture skipped: {:?}", reason);
            return (CaptureOutcome::Skipped(reason), Vec::new());
        }

        if self.settings.timer_seconds > 0 {
            if self.settings.auto_capture {
                self.auto_capturing = true;
            }
            let seconds = self.settings.timer_seconds;
            (CaptureOutcome::CountdownStarted(seconds), self.start_countdown())
        } else {
            (CaptureOutcome::SnapshotRequested, vec![self.request_snapshot()])
        }
    }

    fn capture_blocked(&self) -> Option<SkipReason> {
        match self.phase {
            Phase::Live => {}
            Phase::Countdown { .. } => return Some(SkipReason::CountdownActive),
            _ => return Some(SkipReason::NotLive),
        }
        if self.feed != FeedStatus::Active {
            Some(SkipReason::NoFeed)
        } else if self.store.is_full() {
            Some(SkipReason::StoreFull)
        } else if self.snapshot_pending {
            Some(SkipReason::SnapshotPending)
        } else {
            None
        }
    }

    fn accept_consent(&mut self) -> Vec<Intent> {
        if self.phase == Phase::Consent && self.consent {
            self.enter_phase(Phase::Configuring);
        } else {
            debug!("Consent not given, staying on consent screen");
        }
        Vec::new()
    }

    fn select_shot_count(&mut self, count: usize) -> Vec<Intent> {
        if self.phase != Phase::Configuring {
            return Vec::new();
        }
        if !self.rules.shot_counts.contains(&count) {
            warn!("Shot count {} is not one of {:?}", count, self.rules.shot_counts);
            return Vec::new();
        }

        self.session = Some(SessionConfig { target_frame_count: count });
        self.store.reset(count);
        self.bump_generation();
        self.enter_phase(Phase::Live);
        self.ensure_feed()
    }

    fn ensure_feed(&mut self) -> Vec<Intent> {
        match self.feed {
            FeedStatus::Active | FeedStatus::Acquiring => Vec::new(),
            FeedStatus::None | FeedStatus::Unavailable => {
                self.feed = FeedStatus::Acquiring;
                vec![Intent::AcquireFeed(self.settings.facing)]
            }
        }
    }

    fn wants_feed(&self) -> bool {
        matches!(self.phase, Phase::Live | Phase::Countdown { .. })
    }

    fn feed_ready(&mut self, facing: FacingMode) -> Vec<Intent> {
        if !self.wants_feed() {
            // Acquisition finished after the user left the live screen
            debug!("Feed arrived in {} phase, releasing", self.phase.name());
            self.feed = FeedStatus::None;
            return vec![Intent::ReleaseFeed];
        }
        self.feed = FeedStatus::Active;
        self.settings.facing = facing;
        self.resume_chain()
    }

    fn feed_failed(&mut self, error: DeviceError) -> Vec<Intent> {
        if !self.wants_feed() {
            self.feed = FeedStatus::None;
            return Vec::new();
        }
        self.feed = FeedStatus::Unavailable;
        self.stop_chain();
        let message = BoothError::from(error).user_message();
        vec![Intent::Notify(Notice::error(message))]
    }

    fn switch_facing(&mut self) -> Vec<Intent> {
        if !self.wants_feed() {
            return Vec::new();
        }
        let target = self.settings.facing.flipped();
        match self.feed {
            FeedStatus::Active => {
                self.feed = FeedStatus::Acquiring;
                vec![Intent::SwitchFeed(target)]
            }
            FeedStatus::None | FeedStatus::Unavailable => {
                self.settings.facing = target;
                self.ensure_feed()
            }
            FeedStatus::Acquiring => Vec::new(),
        }
    }

    fn start_countdown(&mut self) -> Vec<Intent> {
        let seconds = self.settings.timer_seconds;
        self.enter_phase(Phase::Countdown { remaining: seconds });
        vec![Intent::ScheduleTick {
            generation: self.generation,
            after: self.rules.tick,
        }]
    }

    fn tick(&mut self, generation: u64) -> Vec<Intent> {
        if generation != self.generation {
            debug!("Dropping stale tick from generation {}", generation);
            return Vec::new();
        }
        let Phase::Countdown { remaining } = self.phase else {
            return Vec::new();
        };

        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            debug!("Countdown: {}", remaining);
            self.phase = Phase::Countdown { remaining };
            return vec![Intent::ScheduleTick {
                generation: self.generation,
                after: self.rules.tick,
            }];
        }

        self.bump_generation();
        self.enter_phase(Phase::Live);
        if self.feed != FeedStatus::Active {
            debug!("Capture skipped at countdown end: {:?}", SkipReason::NoFeed);
            if self.feed == FeedStatus::Acquiring && self.auto_capturing {
                self.chain_parked = true;
            } else {
                self.stop_chain();
            }
            return Vec::new();
        }
        vec![self.request_snapshot()]
    }

    fn request_snapshot(&mut self) -> Intent {
        self.snapshot_pending = true;
        Intent::Snapshot {
            generation: self.generation,
            effect: self.settings.effect,
            orientation: Orientation::for_capture(
                self.settings.facing,
                self.rules.mirror_front_capture,
            ),
        }
    }

    fn snapshot_taken(&mut self, generation: u64, frame: Frame) -> Vec<Intent> {
        if generation != self.generation || !self.snapshot_pending {
            debug!("Dropping stale snapshot from generation {}", generation);
            return Vec::new();
        }
        self.snapshot_pending = false;

        let count = match self.store.push(frame) {
            Ok(count) => count,
            Err(_) => return Vec::new(),
        };
        info!("Captured frame {}/{}", count, self.store.capacity());

        if self.store.is_full() {
            self.stop_chain();
            self.bump_generation();
            self.style = self.rules.default_style.clone();
            self.feed = FeedStatus::None;
            self.enter_phase(Phase::Reviewing);
            return vec![Intent::CancelTimers, Intent::ReleaseFeed];
        }

        if self.auto_capturing && self.settings.auto_capture && self.settings.timer_seconds > 0 {
            vec![Intent::ScheduleChain {
                generation: self.generation,
                after: self.rules.chain_delay,
            }]
        } else {
            self.stop_chain();
            Vec::new()
        }
    }

    fn chain_elapsed(&mut self, generation: u64) -> Vec<Intent> {
        if generation != self.generation || !self.auto_capturing || !self.settings.auto_capture {
            debug!("Auto-capture chain stopped");
            return Vec::new();
        }
        match self.capture_blocked() {
            None => self.start_countdown(),
            Some(SkipReason::NoFeed) if self.feed == FeedStatus::Acquiring => {
                debug!("Auto-capture chain waiting for camera switch");
                self.chain_parked = true;
                Vec::new()
            }
            Some(reason) => {
                debug!("Auto-capture chain stopped: {:?}", reason);
                self.stop_chain();
                Vec::new()
            }
        }
    }

    fn resume_chain(&mut self) -> Vec<Intent> {
        if !std::mem::take(&mut self.chain_parked) {
            return Vec::new();
        }
        if self.phase != Phase::Live || !self.auto_capturing || !self.settings.auto_capture {
            return Vec::new();
        }
        debug!("Camera ready, resuming auto-capture chain");
        vec![Intent::ScheduleChain {
            generation: self.generation,
            after: self.rules.chain_delay,
        }]
    }

    fn stop_chain(&mut self) {
        self.auto_capturing = false;
        self.chain_parked = false;
    }

    fn edit_style(&mut self, edit: impl FnOnce(&mut StripStyle)) -> Vec<Intent> {
        if self.phase == Phase::Reviewing {
            edit(&mut self.style);
        }
        Vec::new()
    }

    fn retake(&mut self) -> Vec<Intent> {
        if self.phase != Phase::Reviewing {
            return Vec::new();
        }
        self.store.clear();
        self.stop_chain();
        self.snapshot_pending = false;
        self.bump_generation();
        self.enter_phase(Phase::Live);
        self.ensure_feed()
    }

    fn download(&self) -> Vec<Intent> {
        if self.phase != Phase::Reviewing {
            return Vec::new();
        }
        vec![Intent::Export(StripRequest {
            frames: self.store.frames().to_vec(),
            style: self.style.clone(),
        })]
    }

    fn export_finished(&self, result: Result<ExportOutcome, ExportError>) -> Vec<Intent> {
        let notice = match result {
            Ok(ExportOutcome::Saved(path)) => {
                Notice::info(format!("Photo strip saved to {}", path.display()))
            }
            Ok(ExportOutcome::OpenedInViewer(path)) => Notice::info(format!(
                "Photo strip opened in a viewer, save it manually ({})",
                path.display()
            )),
            Err(e) => Notice::error(BoothError::from(e).user_message()),
        };
        vec![Intent::Notify(notice)]
    }

    fn reset(&mut self) -> Vec<Intent> {
        self.bump_generation();
        self.store.clear();
        self.session = None;
        self.stop_chain();
        self.snapshot_pending = false;
        self.enter_phase(if self.consent { Phase::Configuring } else { Phase::Consent });

        let mut intents = vec![Intent::CancelTimers];
        if self.feed != FeedStatus::None {
            self.feed = FeedStatus::None;
            intents.push(Intent::ReleaseFeed);
        }
        intents
    }

    fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn enter_phase(&mut self, phase: Phase) {
        if self.phase.name() != phase.name() {
            info!("Booth phase: {} -> {}", self.phase.name(), phase.name());
        }
        self.phase = phase;
    }
}
