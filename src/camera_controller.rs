use async_trait::async_trait;
use image::{ImageBuffer, Rgba, RgbaImage};
use std::time::Instant;

use crate::device::{DeviceInfo, DeviceSource, FacingMode, Feed, FeedRequest};
use crate::errors::DeviceError;

/// Index of the camera conventionally mounted on the given side.
#[cfg_attr(not(feature = "camera"), allow(dead_code))]
fn index_for(facing: FacingMode) -> usize {
    match facing {
        FacingMode::Front => 0,
        FacingMode::Back => 1,
    }
}

#[cfg_attr(not(feature = "camera"), allow(dead_code))]
fn label_for(index: usize, sensor: &str) -> String {
    match index {
        0 => format!("Front Camera ({})", sensor),
        1 => format!("Back Camera ({})", sensor),
        n => format!("Camera {} ({})", n, sensor),
    }
}

/// Parse `--list-cameras` output: `0 : imx219 [3280x2464] (/base/...)`.
#[cfg_attr(not(feature = "camera"), allow(dead_code))]
fn parse_camera_list(output: &str) -> Vec<DeviceInfo> {
    output
        .lines()
        .filter_map(|line| {
            let (index, rest) = line.trim().split_once(" : ")?;
            let index: usize = index.trim().parse().ok()?;
            let sensor = rest.split_whitespace().next().unwrap_or("camera");
            Some(DeviceInfo {
                id: index.to_string(),
                label: label_for(index, sensor),
            })
        })
        .collect()
}

#[cfg(feature = "camera")]
pub use command::CommandCameraSource;

#[cfg(feature = "camera")]
mod command {
    use super::*;
    use std::path::PathBuf;
    use std::process::{Child, Command, Stdio};

    use crate::config::CameraConfig;

    /// Still-capture command line tool (`rpicam-still`) as a device source.
    pub struct CommandCameraSource {
        command: String,
        width: u32,
        height: u32,
    }

    impl CommandCameraSource {
        /// Probe for the capture tool. `None` when it is not installed.
        pub fn detect(config: &CameraConfig) -> Option<Self> {
            match Command::new(&config.command).arg("--help").output() {
                Ok(_) => {
                    log::info!("Camera backend available ({})", config.command);
                    Some(Self {
                        command: config.command.clone(),
                        width: config.capture_width,
                        height: config.capture_height,
                    })
                }
                Err(e) => {
                    log::warn!("{} not found: {}", config.command, e);
                    None
                }
            }
        }

        fn start(&self, device: DeviceInfo) -> Result<Box<dyn Feed>, DeviceError> {
            let scratch = std::env::temp_dir().join(format!("pikta_feed_{}.jpg", device.id));
            let _ = std::fs::remove_file(&scratch);

            let width = self.width.to_string();
            let height = self.height.to_string();
            let output = scratch.to_string_lossy().to_string();
            let args = [
                "--camera", device.id.as_str(),
                "-o", output.as_str(),
                "--width", width.as_str(),
                "--height", height.as_str(),
                "--quality", "80",
                "--nopreview",
                "--timeout", "0",
                "--timelapse", "200",
            ];
            log::info!("Feed command: {} {}", self.command, args.join(" "));

            let child = Command::new(&self.command)
                .args(args)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| DeviceError::Backend(format!("failed to start {}: {}", self.command, e)))?;

            Ok(Box::new(CommandFeed {
                device,
                child: Some(child),
                scratch,
                last: None,
            }))
        }
    }

    #[async_trait]
    impl DeviceSource for CommandCameraSource {
        async fn request(&self, request: &FeedRequest) -> Result<Box<dyn Feed>, DeviceError> {
            let devices = self.enumerate().await?;
            let device = match request {
                FeedRequest::Facing(facing) => {
                    let id = index_for(*facing).to_string();
                    devices.into_iter().find(|d| d.id == id)
                }
                FeedRequest::Device(id) => devices.into_iter().find(|d| &d.id == id),
            }
            .ok_or_else(|| DeviceError::Unavailable(format!("no camera matches {:?}", request)))?;

            self.start(device)
        }

        async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
            let output = tokio::process::Command::new(&self.command)
                .arg("--list-cameras")
                .output()
                .await
                .map_err(|e| DeviceError::Backend(e.to_string()))?;

            // The tool prints the list on stderr on some releases
            let mut text = String::from_utf8_lossy(&output.stdout).to_string();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            let devices = parse_camera_list(&text);
            log::debug!("Enumerated {} camera(s)", devices.len());

            if devices.is_empty() {
                return Err(DeviceError::Unavailable("no cameras detected".to_string()));
            }
            Ok(devices)
        }
    }

    struct CommandFeed {
        device: DeviceInfo,
        child: Option<Child>,
        scratch: PathBuf,
        last: Option<RgbaImage>,
    }

    impl Feed for CommandFeed {
        fn device(&self) -> &DeviceInfo {
            &self.device
        }

        fn frame(&mut self) -> Result<RgbaImage, DeviceError> {
            if self.child.is_none() {
                return Err(DeviceError::Unavailable("feed stopped".to_string()));
            }
            match image::open(&self.scratch) {
                Ok(img) => {
                    let img = img.to_rgba8();
                    self.last = Some(img.clone());
                    Ok(img)
                }
                // The tool may be mid-write; serve the previous frame
                Err(e) => {
                    log::debug!("Feed frame not readable yet: {}", e);
                    self.last.clone().ok_or(DeviceError::NoFrame)
                }
            }
        }

        fn stop(&mut self) {
            if let Some(mut child) = self.child.take() {
                let _ = child.kill();
                let _ = child.wait();
                let _ = std::fs::remove_file(&self.scratch);
                log::info!("Camera feed stopped: {}", self.device.label);
            }
        }
    }

    impl Drop for CommandFeed {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

/// Synthetic cameras for development machines.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    devices: Vec<DeviceInfo>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            devices: vec![
                DeviceInfo {
                    id: "test-front".to_string(),
                    label: "Front Camera (test pattern)".to_string(),
                },
                DeviceInfo {
                    id: "test-back".to_string(),
                    label: "Back Camera (test pattern)".to_string(),
                },
            ],
        }
    }
}

#[async_trait]
impl DeviceSource for TestPatternSource {
    async fn request(&self, request: &FeedRequest) -> Result<Box<dyn Feed>, DeviceError> {
        let device = match request {
            FeedRequest::Facing(facing) => self
                .devices
                .iter()
                .find(|d| d.label.to_lowercase().starts_with(facing.label_hint())),
            FeedRequest::Device(id) => self.devices.iter().find(|d| &d.id == id),
        }
        .cloned()
        .ok_or_else(|| DeviceError::Unavailable(format!("no test camera matches {:?}", request)))?;

        log::debug!("Test pattern feed started: {}", device.label);
        Ok(Box::new(TestPatternFeed {
            tint: if device.id.ends_with("back") { 60 } else { 0 },
            device,
            width: self.width,
            height: self.height,
            started: Instant::now(),
            stopped: false,
        }))
    }

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(self.devices.clone())
    }
}

struct TestPatternFeed {
    device: DeviceInfo,
    width: u32,
    height: u32,
    tint: u8,
    started: Instant,
    stopped: bool,
}

impl Feed for TestPatternFeed {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn frame(&mut self) -> Result<RgbaImage, DeviceError> {
        if self.stopped {
            return Err(DeviceError::Unavailable("feed stopped".to_string()));
        }
        let (w, h) = (self.width.max(1), self.height.max(1));
        let time = self.started.elapsed().as_secs_f32();
        let tint = self.tint;

        let img = ImageBuffer::from_fn(w, h, |x, y| {
            let r = ((x as f32 / w as f32 * 255.0) + (time * 1.3).sin() * 50.0) as u8;
            let g = ((y as f32 / h as f32 * 255.0) + (time * 0.7).cos() * 50.0) as u8;
            let b = (((x + y) as f32 / (w + h) as f32 * 255.0) + (time * 1.9).sin() * 50.0) as u8;
            // Marker in the top-left corner makes mirroring visible
            if x < w / 8 && y < h / 8 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([r.saturating_add(tint), g, b.saturating_add(100 - tint.min(100)), 255])
            }
        });
        Ok(img)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceAdapter;
    use std::sync::Arc;

    #[test]
    fn test_parse_camera_list() {
        let output = "Available cameras\n-----------------\n\
            0 : imx708 [4608x2592 10-bit RGGB] (/base/soc/i2c0mux/i2c@1/imx708@1a)\n    \
            Modes: 'SRGGB10_CSI2P' : 1536x864 [120.13 fps - (768, 432)/3072x1728 crop]\n\
            1 : ov5647 [2592x1944 10-bit GBRG] (/base/soc/i2c0mux/i2c@0/ov5647@36)\n";
        let devices = parse_camera_list(output);

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "0");
        assert_eq!(devices[0].label, "Front Camera (imx708)");
        assert_eq!(devices[1].label, "Back Camera (ov5647)");
    }

    #[test]
    fn test_parse_empty_camera_list() {
        assert!(parse_camera_list("No cameras available!").is_empty());
    }

    #[tokio::test]
    async fn test_pattern_source_serves_both_facings() {
        let source = TestPatternSource::new(32, 24);
        for facing in [FacingMode::Front, FacingMode::Back] {
            let mut feed = source.request(&FeedRequest::Facing(facing)).await.unwrap();
            assert!(feed.device().label.to_lowercase().contains(facing.label_hint()));
            assert_eq!(feed.frame().unwrap().dimensions(), (32, 24));
            feed.stop();
            assert!(feed.frame().is_err());
        }
    }

    #[tokio::test]
    async fn test_front_only_source_rejects_flip() {
        // Only a user-facing camera, as on most laptops
        let mut source = TestPatternSource::new(16, 12);
        source.devices.truncate(1);
        let mut adapter = DeviceAdapter::new(Arc::new(source));
        adapter.acquire(FacingMode::Front).await.unwrap();

        let result = adapter.switch_facing(FacingMode::Back).await;
        assert!(matches!(result, Err(DeviceError::SwitchFailed { .. })));
        assert_eq!(adapter.facing(), Some(FacingMode::Front));
    }
}
