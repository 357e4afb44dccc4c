//! Camera lifecycle state machine shared by every native driver.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{CameraError, Result};
use crate::persist;
use crate::reconcile;
use crate::traits::{Camera, CameraDriver, DeviceHandle, RawFrame};
use crate::types::{CameraConfig, Capabilities, Frame};

/// Number of buffered frames dropped by [`Camera::flush`].
pub const FLUSH_FRAME_COUNT: usize = 5;

/// Longest single wait on the native handle while the state lock is held.
pub const POLL_SLICE: Duration = Duration::from_millis(100);

/// How long [`Camera::capture`] waits for its one frame.
pub const CAPTURE_WAIT: Duration = Duration::from_secs(2);

/// Monotonic time since the first call in this process.
pub fn monotonic() -> Duration {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed()
}

struct DeviceState<H> {
    handle: Option<H>,
    streaming: bool,
    config: Option<CameraConfig>,
    sequence: u64,
}

impl<H> DeviceState<H> {
    fn stamp(&mut self, raw: RawFrame) -> Frame {
        let sequence = self.sequence;
        self.sequence += 1;
        Frame {
            data: raw.data,
            width: raw.resolution.width,
            height: raw.resolution.height,
            channels: raw.pixel_format.channels(),
            pixel_format: raw.pixel_format,
            timestamp: monotonic(),
            sequence,
        }
    }
}

/// A [`Camera`] backed by a native driver.
///
/// The native handle, streaming flag and applied configuration live behind
/// one mutex. [`read`](Camera::read) holds it for a single acquisition
/// attempt at a time, so a concurrent `stop_stream` takes effect within
/// [`POLL_SLICE`].
pub struct DeviceCamera<D: CameraDriver> {
    driver: D,
    index: u32,
    name: String,
    defaults: CameraConfig,
    state: Mutex<DeviceState<D::Handle>>,
}

impl<D: CameraDriver> DeviceCamera<D> {
    /// Create a closed camera for device `index`.
    ///
    /// `defaults` is applied by [`open`](Camera::open) when no configuration
    /// is given.
    pub fn new(driver: D, index: u32, defaults: CameraConfig) -> Self {
        let name = driver.name(index);
        Self {
            driver,
            index,
            name,
            defaults,
            state: Mutex::new(DeviceState {
                handle: None,
                streaming: false,
                config: None,
                sequence: 0,
            }),
        }
    }

    /// The underlying driver.
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Configuration applied when opening without one.
    pub const fn default_config(&self) -> &CameraConfig {
        &self.defaults
    }

    fn state(&self) -> MutexGuard<'_, DeviceState<D::Handle>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: CameraDriver> Camera for DeviceCamera<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.state().handle.is_some()
    }

    fn is_streaming(&self) -> bool {
        self.state().streaming
    }

    fn current_config(&self) -> Option<CameraConfig> {
        self.state().config.clone()
    }

    fn open(&self, config: Option<&CameraConfig>) -> Result<()> {
        let mut state = self.state();
        if state.handle.is_some() {
            debug!(camera = %self.name, "Camera already open");
            return Ok(());
        }

        let mut handle = self.driver.open(self.index).map_err(|err| {
            warn!(camera = %self.name, error = %err, "Failed to open camera");
            err
        })?;
        let applied = reconcile::apply(&mut handle, config.unwrap_or(&self.defaults));

        info!(
            camera = %self.name,
            resolution = %applied.resolution,
            framerate = applied.framerate,
            pixel_format = %applied.pixel_format,
            "Camera opened"
        );
        state.handle = Some(handle);
        state.streaming = false;
        state.config = Some(applied);
        state.sequence = 0;
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state();
        let Some(mut handle) = state.handle.take() else {
            return;
        };

        if state.streaming {
            state.streaming = false;
            info!(camera = %self.name, "Stream stopped");
        }
        handle.release();
        state.config = None;
        info!(camera = %self.name, "Camera closed");
    }

    fn start_stream(&self) -> Result<()> {
        let mut state = self.state();
        if state.handle.is_none() {
            return Err(CameraError::State(
                "cannot start stream: camera not open".to_owned(),
            ));
        }
        if !state.streaming {
            state.streaming = true;
            info!(camera = %self.name, "Stream started");
        }
        Ok(())
    }

    fn stop_stream(&self) {
        let mut state = self.state();
        if state.streaming {
            state.streaming = false;
            info!(camera = %self.name, "Stream stopped");
        }
    }

    fn read(&self, timeout: Option<Duration>) -> Result<Frame> {
        let started = Instant::now();

        loop {
            let wait = timeout.map_or(POLL_SLICE, |limit| {
                limit.saturating_sub(started.elapsed()).min(POLL_SLICE)
            });

            {
                let mut state = self.state();
                if !state.streaming {
                    return Err(CameraError::not_streaming());
                }
                let handle = state.handle.as_mut().ok_or_else(CameraError::not_open)?;
                if let Some(raw) = handle.read_frame(wait) {
                    return Ok(state.stamp(raw));
                }
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(CameraError::Timeout(format!(
                        "no frame from {} within {limit:?}",
                        self.name
                    )));
                }
            }
            thread::yield_now();
        }
    }

    fn flush(&self) {
        let mut state = self.state();
        let Some(handle) = state.handle.as_mut() else {
            return;
        };

        let mut dropped = 0;
        for _ in 0..FLUSH_FRAME_COUNT {
            if handle.grab() {
                dropped += 1;
            }
        }
        debug!(camera = %self.name, dropped, "Flushed buffered frames");
    }

    fn capture(&self, path: Option<&Path>) -> Result<Frame> {
        let frame = {
            let mut state = self.state();
            let handle = state.handle.as_mut().ok_or_else(CameraError::not_open)?;
            let raw = handle
                .read_frame(CAPTURE_WAIT)
                .ok_or_else(|| CameraError::Timeout("failed to capture frame".to_owned()))?;
            state.stamp(raw)
        };

        if let Some(path) = path {
            persist::save_frame(&frame, path)?;
            info!(camera = %self.name, path = %path.display(), "Still image saved");
        }
        Ok(frame)
    }

    fn set_config(&self, config: &CameraConfig) -> Result<CameraConfig> {
        let mut state = self.state();
        let handle = state.handle.as_mut().ok_or_else(CameraError::not_open)?;

        let applied = reconcile::apply(handle, config);
        state.config = Some(applied.clone());
        Ok(applied)
    }

    fn capabilities(&self) -> Result<Capabilities> {
        self.state()
            .handle
            .as_ref()
            .map(DeviceHandle::capabilities)
            .ok_or_else(CameraError::not_open)
    }
}

impl<D: CameraDriver> Drop for DeviceCamera<D> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::TestPatternDriver;
    use crate::types::{PixelFormat, Resolution};

    fn camera() -> DeviceCamera<TestPatternDriver> {
        let defaults = CameraConfig::default()
            .with_resolution(Resolution::new(320, 240))
            .with_pixel_format(PixelFormat::Gray8);
        DeviceCamera::new(TestPatternDriver::new(), 0, defaults)
    }

    #[test]
    fn test_monotonic_never_goes_backwards() {
        let first = monotonic();
        let second = monotonic();
        assert!(second >= first);
    }

    #[test]
    fn test_open_applies_defaults() {
        let camera = camera();
        camera.open(None).expect("open should succeed");

        let config = camera.current_config().expect("camera should be open");
        assert_eq!(config.resolution, Resolution::new(320, 240));
        assert_eq!(config.pixel_format, PixelFormat::Gray8);
        assert_eq!(camera.default_config().resolution, Resolution::new(320, 240));
    }

    #[test]
    fn test_flush_while_closed_is_noop() {
        let camera = camera();
        camera.flush();
        assert!(!camera.is_open());
    }

    #[test]
    fn test_sequence_counts_reads_and_captures() {
        let camera = camera();
        camera.open(None).expect("open should succeed");
        camera.start_stream().expect("start_stream should succeed");

        let first = camera.read(None).expect("read should succeed");
        let still = camera.capture(None).expect("capture should succeed");
        let next = camera.read(None).expect("read should succeed");

        assert_eq!((first.sequence, still.sequence, next.sequence), (0, 1, 2));
        assert!(next.timestamp >= first.timestamp);
    }

    #[test]
    fn test_stop_stream_keeps_device_open() {
        let camera = camera();
        camera.open(None).expect("open should succeed");
        camera.start_stream().expect("start_stream should succeed");
        camera.stop_stream();
        camera.stop_stream();

        assert!(camera.is_open());
        assert!(!camera.is_streaming());
        assert!(matches!(camera.read(None), Err(CameraError::State(_))));
    }
}
