use async_trait::async_trait;
use image::RgbaImage;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::DeviceError;

/// Which physical camera supplies the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// User-facing
    #[default]
    Front,
    /// Environment-facing
    Back,
}

impl FacingMode {
    pub fn flipped(&self) -> FacingMode {
        match self {
            FacingMode::Front => FacingMode::Back,
            FacingMode::Back => FacingMode::Front,
        }
    }

    /// Label keyword used when matching enumerated devices.
    pub fn label_hint(&self) -> &'static str {
        match self {
            FacingMode::Front => "front",
            FacingMode::Back => "back",
        }
    }
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label_hint())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
}

/// Constraint passed to a device source when requesting access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRequest {
    /// Exactly this facing mode, fail otherwise
    Facing(FacingMode),
    /// A specific enumerated device
    Device(String),
}

/// A live camera feed. Dropping without `stop` is allowed but leaves release to the backend.
pub trait Feed: Send {
    fn device(&self) -> &DeviceInfo;

    /// Latest frame at native capture resolution.
    fn frame(&mut self) -> Result<RgbaImage, DeviceError>;

    /// Stop all tracks. Must be idempotent.
    fn stop(&mut self);
}

/// Abstraction over the platform camera API.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    async fn request(&self, request: &FeedRequest) -> Result<Box<dyn Feed>, DeviceError>;

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError>;
}

/// Owns the single active feed and applies the acquisition fallback policy.
pub struct DeviceAdapter {
    source: std::sync::Arc<dyn DeviceSource>,
    active: Option<(FacingMode, Box<dyn Feed>)>,
}

impl DeviceAdapter {
    pub fn new(source: std::sync::Arc<dyn DeviceSource>) -> Self {
        Self { source, active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn facing(&self) -> Option<FacingMode> {
        self.active.as_ref().map(|(facing, _)| *facing)
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.active.as_ref().map(|(_, feed)| feed.device())
    }

    /// Acquire a feed for `facing`, replacing (and releasing) any current one.
    pub async fn acquire(&mut self, facing: FacingMode) -> Result<(), DeviceError> {
        self.release();
        let source = std::sync::Arc::clone(&self.source);
        let feed = Self::open(source.as_ref(), facing).await?;
        info!("Camera acquired: {} ({})", feed.device().label, facing);
        self.active = Some((facing, feed));
        Ok(())
    }

    /// Stop the current feed, if any.
    pub fn release(&mut self) {
        if let Some((facing, mut feed)) = self.active.take() {
            feed.stop();
            info!("Camera released: {} ({})", feed.device().label, facing);
        }
    }

    /// Switch to `facing`. The old feed is released first so two cameras are
    /// never held at once; on failure the previous facing mode is re-acquired.
    pub async fn switch_facing(&mut self, facing: FacingMode) -> Result<(), DeviceError> {
        let previous = self.facing();
        if previous == Some(facing) {
            debug!("Camera already facing {}", facing);
            return Ok(());
        }

        self.release();
        let source = std::sync::Arc::clone(&self.source);
        match Self::open(source.as_ref(), facing).await {
            Ok(feed) => {
                info!("Switched camera to {} ({})", feed.device().label, facing);
                self.active = Some((facing, feed));
                Ok(())
            }
            Err(e) => {
                warn!("Camera flip to {} failed: {}", facing, e);
                if let Some(previous) = previous {
                    // Restore the feed the caller had before the switch
                    let feed = Self::open(source.as_ref(), previous).await?;
                    self.active = Some((previous, feed));
                }
                Err(DeviceError::SwitchFailed {
                    facing,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Grab the latest frame from the active feed.
    pub fn frame(&mut self) -> Result<RgbaImage, DeviceError> {
        match self.active.as_mut() {
            Some((_, feed)) => feed.frame(),
            None => Err(DeviceError::Unavailable("no active camera feed".to_string())),
        }
    }

    async fn open(source: &dyn DeviceSource, facing: FacingMode) -> Result<Box<dyn Feed>, DeviceError> {
        match source.request(&FeedRequest::Facing(facing)).await {
            Ok(feed) => Ok(feed),
            Err(e) => {
                warn!("Exact {} camera request failed, falling back to device labels: {}", facing, e);
                let devices = source.enumerate().await?;
                let target = devices
                    .iter()
                    .find(|device| device.label.to_lowercase().contains(facing.label_hint()))
                    .ok_or_else(|| {
                        DeviceError::Unavailable(format!("no {} camera found", facing))
                    })?;
                debug!("Falling back to device {} ({})", target.id, target.label);
                source.request(&FeedRequest::Device(target.id.clone())).await
            }
        }
    }
}

impl Drop for DeviceAdapter {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory camera used by the runtime and adapter tests.

    use super::*;
    use image::{ImageBuffer, Rgba};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct ScriptedSource {
        /// Facing modes that answer an exact request
        pub exact: Mutex<Vec<FacingMode>>,
        /// Devices reported by enumeration
        pub devices: Mutex<Vec<DeviceInfo>>,
        /// Reject every request, as if permission was denied
        pub deny: Mutex<bool>,
        pub live: Arc<AtomicUsize>,
        pub max_live: Arc<AtomicUsize>,
        pub requests: Mutex<Vec<FeedRequest>>,
    }

    impl ScriptedSource {
        pub fn with_both_cameras() -> Self {
            let source = Self::default();
            *source.exact.lock().unwrap() = vec![FacingMode::Front, FacingMode::Back];
            source
        }

        pub fn live_feeds(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        fn open(&self, device: DeviceInfo) -> Box<dyn Feed> {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_live.fetch_max(now, Ordering::SeqCst);
            Box::new(ScriptedFeed {
                device,
                live: Arc::clone(&self.live),
                stopped: false,
            })
        }
    }

    #[async_trait]
    impl DeviceSource for ScriptedSource {
        async fn request(&self, request: &FeedRequest) -> Result<Box<dyn Feed>, DeviceError> {
            self.requests.lock().unwrap().push(request.clone());
            if *self.deny.lock().unwrap() {
                return Err(DeviceError::Unavailable("permission denied".into()));
            }
            match request {
                FeedRequest::Facing(facing) if self.exact.lock().unwrap().contains(facing) => {
                    Ok(self.open(DeviceInfo {
                        id: facing.label_hint().to_string(),
                        label: format!("{} camera", facing),
                    }))
                }
                FeedRequest::Facing(facing) => {
                    Err(DeviceError::Unavailable(format!("no exact {} camera", facing)))
                }
                FeedRequest::Device(id) => {
                    let device = self
                        .devices
                        .lock()
                        .unwrap()
                        .iter()
                        .find(|d| &d.id == id)
                        .cloned()
                        .ok_or_else(|| DeviceError::Unavailable(id.clone()))?;
                    Ok(self.open(device))
                }
            }
        }

        async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
            Ok(self.devices.lock().unwrap().clone())
        }
    }

    pub struct ScriptedFeed {
        device: DeviceInfo,
        live: Arc<AtomicUsize>,
        stopped: bool,
    }

    impl Feed for ScriptedFeed {
        fn device(&self) -> &DeviceInfo {
            &self.device
        }

        fn frame(&mut self) -> Result<RgbaImage, DeviceError> {
            // Left half red, right half blue so mirroring is observable
            Ok(ImageBuffer::from_fn(8, 6, |x, _| {
                if x < 4 {
                    Rgba([255, 0, 0, 255])
                } else {
                    Rgba([0, 0, 255, 255])
                }
            }))
        }

        fn stop(&mut self) {
            if !self.stopped {
                self.stopped = true;
                self.live.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    impl Drop for ScriptedFeed {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedSource;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let source = Arc::new(ScriptedSource::with_both_cameras());
        let mut adapter = DeviceAdapter::new(source.clone());

        adapter.acquire(FacingMode::Front).await.unwrap();
        assert!(adapter.is_active());
        assert_eq!(source.live_feeds(), 1);
        assert!(adapter.frame().is_ok());

        adapter.release();
        assert!(!adapter.is_active());
        assert_eq!(source.live_feeds(), 0);
        assert!(adapter.frame().is_err());
    }

    #[tokio::test]
    async fn test_switch_never_holds_two_feeds() {
        let source = Arc::new(ScriptedSource::with_both_cameras());
        let mut adapter = DeviceAdapter::new(source.clone());

        adapter.acquire(FacingMode::Front).await.unwrap();
        adapter.switch_facing(FacingMode::Back).await.unwrap();

        assert_eq!(adapter.facing(), Some(FacingMode::Back));
        assert_eq!(source.live_feeds(), 1);
        assert_eq!(source.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_label_fallback_when_exact_fails() {
        let source = Arc::new(ScriptedSource::default());
        *source.exact.lock().unwrap() = vec![FacingMode::Front];
        *source.devices.lock().unwrap() = vec![
            DeviceInfo { id: "cam0".into(), label: "Front Camera".into() },
            DeviceInfo { id: "cam1".into(), label: "Back Camera (wide)".into() },
        ];
        let mut adapter = DeviceAdapter::new(source.clone());

        adapter.acquire(FacingMode::Front).await.unwrap();
        adapter.switch_facing(FacingMode::Back).await.unwrap();

        assert_eq!(adapter.device().map(|d| d.id.as_str()), Some("cam1"));
        assert!(source
            .requests
            .lock()
            .unwrap()
            .contains(&FeedRequest::Device("cam1".into())));
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_previous_facing() {
        let source = Arc::new(ScriptedSource::default());
        *source.exact.lock().unwrap() = vec![FacingMode::Front];
        *source.devices.lock().unwrap() = vec![DeviceInfo {
            id: "cam0".into(),
            label: "Integrated Webcam".into(),
        }];
        let mut adapter = DeviceAdapter::new(source.clone());

        adapter.acquire(FacingMode::Front).await.unwrap();
        let result = adapter.switch_facing(FacingMode::Back).await;

        assert!(matches!(result, Err(DeviceError::SwitchFailed { facing: FacingMode::Back, .. })));
        assert_eq!(adapter.facing(), Some(FacingMode::Front));
        assert_eq!(source.live_feeds(), 1);
        assert_eq!(source.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_denied_permission_is_unavailable() {
        let source = Arc::new(ScriptedSource::with_both_cameras());
        *source.deny.lock().unwrap() = true;
        let mut adapter = DeviceAdapter::new(source);

        let result = adapter.acquire(FacingMode::Front).await;
        assert!(matches!(result, Err(DeviceError::Unavailable(_))));
        assert!(!adapter.is_active());
    }

    #[test]
    fn test_facing_flip() {
        assert_eq!(FacingMode::Front.flipped(), FacingMode::Back);
        assert_eq!(FacingMode::Back.to_string(), "back");
    }
}
