use thiserror::Error;

use crate::device::FacingMode;

/// Failures coming from the camera side of the booth.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    /// Permission denied or no camera matches the request
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    /// A facing-mode switch could not acquire a replacement feed
    #[error("could not switch to the {facing} camera: {reason}")]
    SwitchFailed { facing: FacingMode, reason: String },
    /// The feed exists but has not produced a frame yet
    #[error("no frame available from the camera")]
    NoFrame,
    #[error("camera backend error: {0}")]
    Backend(String),
}

/// Failures while rasterizing or saving a strip.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExportError {
    #[error("nothing to export: {0}")]
    Render(String),
    #[error("failed to encode strip: {0}")]
    Encode(String),
    #[error("failed to save strip: {0}")]
    Save(String),
    /// Direct saving is blocked and the fallback viewer could not be opened
    #[error("could not open the strip for manual saving: {0}")]
    ViewerUnavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BoothError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl BoothError {
    /// Message shown to the user. Every failure here is recoverable.
    pub fn user_message(&self) -> String {
        match self {
            BoothError::Device(DeviceError::Unavailable(_)) => {
                "Camera access failed. Check permissions and that a camera is connected.".to_string()
            }
            BoothError::Device(DeviceError::SwitchFailed { facing, .. }) => {
                format!("No {} camera found, keeping the current one", facing)
            }
            BoothError::Device(e) => format!("Camera problem: {}", e),
            BoothError::Export(ExportError::ViewerUnavailable(_)) => {
                "Could not open the photo strip. Allow a viewer to open or save it from the export folder.".to_string()
            }
            BoothError::Export(_) => "Failed to generate image. Please try again.".to_string(),
        }
    }
}
