//! Backend selection from a [`BackendProfile`].
//!
//! Backends are registered explicitly under a string key. Construction
//! validates the hardware parameters first and checks the fresh backend
//! against the [`Camera`] contract before handing it out.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{CameraError, Result};
use crate::profile::{BackendProfile, HardwareConfig};
use crate::synthetic::{TestPatternCamera, TestPatternDriver};
use crate::traits::Camera;

/// Registry key of the synthetic test-pattern backend.
pub const TEST_PATTERN: &str = "test-pattern";

/// Registry key of the V4L2 backend.
#[cfg(feature = "v4l2")]
pub const V4L2: &str = "v4l2";

/// Builds a closed backend from hardware parameters.
pub type Constructor = fn(&HardwareConfig) -> Box<dyn Camera>;

/// Maps backend keys to constructors.
#[derive(Clone, Default)]
pub struct Registry {
    backends: BTreeMap<String, Constructor>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

impl Registry {
    /// A registry with no backends.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding every backend compiled into this crate.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(TEST_PATTERN, |hardware| {
            Box::new(TestPatternCamera::new(
                TestPatternDriver::new(),
                hardware.device_index,
                hardware.default_config(),
            ))
        });
        #[cfg(feature = "v4l2")]
        registry.register(V4L2, |hardware| {
            Box::new(crate::device::V4l2Camera::new(
                crate::device::V4l2Driver,
                hardware.device_index,
                hardware.default_config(),
            ))
        });
        registry
    }

    /// Register `constructor` under `key`, replacing any previous entry.
    pub fn register(&mut self, key: &str, constructor: Constructor) -> &mut Self {
        if self.backends.insert(key.to_owned(), constructor).is_some() {
            debug!(backend = key, "Replaced registered backend");
        }
        self
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.backends.contains_key(key)
    }

    /// Construct the backend named by `profile`.
    ///
    /// Fails with [`CameraError::Config`] for an unknown key, invalid
    /// hardware parameters, or a backend that does not start out closed.
    pub fn create(&self, profile: &BackendProfile) -> Result<Box<dyn Camera>> {
        let constructor = self.backends.get(&profile.backend).ok_or_else(|| {
            let known: Vec<&str> = self.keys().collect();
            CameraError::Config(format!(
                "unknown backend `{}` (known: {})",
                profile.backend,
                known.join(", ")
            ))
        })?;
        profile.hardware.validate()?;

        let camera = constructor(&profile.hardware);
        inspect(camera.as_ref()).map_err(|reason| {
            CameraError::Config(format!(
                "backend `{}` violates the camera contract: {reason}",
                profile.backend
            ))
        })?;

        info!(
            backend = %profile.backend,
            camera = camera.name(),
            device_index = profile.hardware.device_index,
            "Camera backend created"
        );
        Ok(camera)
    }
}

/// Construct a built-in backend, see [`Registry::create`].
pub fn create(profile: &BackendProfile) -> Result<Box<dyn Camera>> {
    Registry::builtin().create(profile)
}

/// Check that a freshly constructed backend behaves as a closed camera.
fn inspect(camera: &dyn Camera) -> std::result::Result<(), String> {
    if camera.name().is_empty() {
        return Err("empty name".to_owned());
    }
    if camera.is_open() || camera.is_streaming() {
        return Err("not closed after construction".to_owned());
    }
    if camera.current_config().is_some() {
        return Err("reports a configuration while closed".to_owned());
    }
    if !matches!(camera.capabilities(), Err(CameraError::State(_))) {
        return Err("capabilities available while closed".to_owned());
    }
    if !matches!(camera.read(Some(Duration::ZERO)), Err(CameraError::State(_))) {
        return Err("read allowed while closed".to_owned());
    }
    Ok(())
}
