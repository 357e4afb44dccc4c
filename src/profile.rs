//! Backend profiles: which backend to construct and its hardware parameters.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CameraError, Result};
use crate::types::{CameraConfig, Resolution};

/// Hardware parameters handed to a backend constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Native device index.
    pub device_index: u32,
    /// Resolution applied when opening without a configuration.
    pub default_resolution: Resolution,
    /// Framerate applied when opening without a configuration.
    pub default_framerate: f64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            default_resolution: Resolution::new(640, 480),
            default_framerate: 30.0,
        }
    }
}

impl HardwareConfig {
    /// The configuration a backend applies when opened without one.
    #[must_use]
    pub fn default_config(&self) -> CameraConfig {
        CameraConfig::default()
            .with_resolution(self.default_resolution)
            .with_framerate(self.default_framerate)
    }

    /// Reject parameters no backend can honor.
    pub fn validate(&self) -> Result<()> {
        if !self.default_resolution.is_valid() {
            return Err(CameraError::Config(format!(
                "invalid default resolution {}",
                self.default_resolution
            )));
        }
        if !self.default_framerate.is_finite() || self.default_framerate <= 0.0 {
            return Err(CameraError::Config(format!(
                "invalid default framerate {}",
                self.default_framerate
            )));
        }
        Ok(())
    }
}

/// A backend key plus its hardware parameters.
///
/// ```json
/// {
///   "backend": "v4l2",
///   "hardware": {
///     "device_index": 0,
///     "default_resolution": { "width": 640, "height": 480 },
///     "default_framerate": 30.0
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendProfile {
    /// Registry key of the backend.
    pub backend: String,
    /// Parameters passed to the backend constructor.
    #[serde(default)]
    pub hardware: HardwareConfig,
}

impl Default for BackendProfile {
    fn default() -> Self {
        Self {
            backend: "v4l2".to_owned(),
            hardware: HardwareConfig::default(),
        }
    }
}

impl BackendProfile {
    /// A profile for `backend` with default hardware parameters.
    pub fn new<S: Into<String>>(backend: S) -> Self {
        Self {
            backend: backend.into(),
            hardware: HardwareConfig::default(),
        }
    }

    /// Parse a profile from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| CameraError::Config(format!("invalid backend profile: {err}")))
    }

    /// Load a profile from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|err| {
            CameraError::Config(format!("cannot read profile {}: {err}", path.display()))
        })?;
        Self::from_json_str(&json)
    }
}
