//! Core traits for the camera abstraction.
//!
//! [`Camera`] is the contract every backend satisfies and the only type
//! calling code should depend on. [`CameraDriver`] and [`DeviceHandle`] are
//! the narrower native-device API a backend wraps; [`DeviceCamera`] turns any
//! driver into a [`Camera`].
//!
//! [`DeviceCamera`]: crate::camera::DeviceCamera

use std::ops::Deref;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::{CameraError, Result};
use crate::types::{CameraConfig, Capabilities, Frame, PixelFormat, Resolution, Roi};

/// Default bound for a single [`Camera::read`].
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Hardware-agnostic camera contract.
///
/// A camera is always in exactly one of three states: closed, open and idle,
/// or open and streaming. Closed is both the initial state and reachable
/// again after [`close`](Self::close); a closed camera can be reopened.
///
/// State transitions are expected to be driven by a single owner, while
/// [`read`](Self::read) may be called from several threads at once.
pub trait Camera: Send + Sync {
    /// Human-readable camera name.
    fn name(&self) -> &str;

    /// Whether the device handle is held.
    fn is_open(&self) -> bool;

    /// Whether continuous capture is active.
    fn is_streaming(&self) -> bool;

    /// Last successfully applied configuration, `None` while closed.
    fn current_config(&self) -> Option<CameraConfig>;

    /// Acquire the device and apply `config`, or the backend default.
    ///
    /// Does nothing if the camera is already open. On failure the camera
    /// stays closed.
    ///
    /// # Arguments
    ///
    /// * `config` - Requested configuration, `None` for the backend default
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::Open`] if the device cannot be acquired.
    fn open(&self, config: Option<&CameraConfig>) -> Result<()>;

    /// Stop streaming if needed and release the device. Idempotent.
    fn close(&self);

    /// Begin continuous capture. Fails with [`CameraError::State`] when closed.
    fn start_stream(&self) -> Result<()>;

    /// End continuous capture. Does nothing when not streaming.
    fn stop_stream(&self);

    /// Wait for the next streamed frame.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Longest wait for a frame, `None` to wait indefinitely
    ///
    /// # Returns
    ///
    /// The next frame, stamped with a monotonic timestamp and sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::State`] immediately unless streaming, and
    /// [`CameraError::Timeout`] once `timeout` has elapsed without a frame.
    fn read(&self, timeout: Option<Duration>) -> Result<Frame>;

    /// Drop a few already-buffered frames to cut latency. No-op when closed.
    fn flush(&self);

    /// Grab a single still frame, streaming or not, optionally saving it.
    ///
    /// # Arguments
    ///
    /// * `path` - Where to save the frame; the extension picks the format
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::State`] when closed, [`CameraError::Timeout`]
    /// if no frame arrives, and [`CameraError::Persist`] if saving fails.
    /// A save failure leaves the camera state untouched.
    fn capture(&self, path: Option<&Path>) -> Result<Frame>;

    /// Apply `config` as far as the hardware allows.
    ///
    /// # Arguments
    ///
    /// * `config` - Requested configuration; unsupported values are clamped
    ///
    /// # Returns
    ///
    /// The configuration actually in effect, which also becomes the
    /// [`current_config`](Self::current_config).
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::State`] when the camera is closed.
    fn set_config(&self, config: &CameraConfig) -> Result<CameraConfig>;

    /// Describe what the open device supports.
    fn capabilities(&self) -> Result<Capabilities>;
}

/// Native controls a device handle may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// Frame width in pixels.
    FrameWidth,
    /// Frame height in pixels.
    FrameHeight,
    /// Frames per second.
    Framerate,
    /// Rotation in degrees.
    Rotation,
    /// Horizontal mirror, 0 or 1.
    HFlip,
    /// Vertical mirror, 0 or 1.
    VFlip,
    /// Automatic exposure, 0 or 1.
    AutoExposure,
    /// Exposure time in microseconds.
    ExposureTimeUs,
    /// ISO sensitivity, 0 for automatic.
    Iso,
    /// Automatic white balance, 0 or 1.
    AutoWhiteBalance,
    /// Red gain.
    WbGainRed,
    /// Blue gain.
    WbGainBlue,
    /// Automatic focus, 0 or 1.
    AutoFocus,
    /// Focus distance in meters.
    FocusDistance,
    /// Normalized ROI left edge.
    RoiX,
    /// Normalized ROI top edge.
    RoiY,
    /// Normalized ROI width.
    RoiWidth,
    /// Normalized ROI height.
    RoiHeight,
}

/// Image data as delivered by a device handle, before timestamping.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Pixel data in `pixel_format` layout.
    pub data: Vec<u8>,
    /// Image resolution.
    pub resolution: Resolution,
    /// Pixel layout.
    pub pixel_format: PixelFormat,
}

/// Opens native devices by index.
pub trait CameraDriver: Send + Sync {
    /// The handle type returned by `open`.
    type Handle: DeviceHandle;

    /// Human-readable name for the device at `index`.
    fn name(&self, index: u32) -> String;

    /// Acquire the device.
    ///
    /// # Arguments
    ///
    /// * `index` - Device index, as given in the hardware profile
    ///
    /// # Errors
    ///
    /// Returns [`CameraError::Open`] if the device is missing or busy.
    fn open(&self, index: u32) -> Result<Self::Handle>;
}

/// An acquired native capture device.
pub trait DeviceHandle: Send {
    /// Produce the next frame, waiting at most `wait`.
    fn read_frame(&mut self, wait: Duration) -> Option<RawFrame>;

    /// Discard one buffered frame without decoding it.
    fn grab(&mut self) -> bool;

    /// Request a control value. Returns whether the device accepted it.
    fn set_property(&mut self, control: Control, value: f64) -> bool;

    /// Current control value, `None` if the device cannot report it.
    fn property(&self, control: Control) -> Option<f64>;

    /// Request the layout of delivered frames.
    fn set_pixel_format(&mut self, format: PixelFormat) -> bool;

    /// Layout frames are currently delivered in.
    fn pixel_format(&self) -> PixelFormat;

    /// Describe the device.
    fn capabilities(&self) -> Capabilities;

    /// Release the device. Called once, before the handle is dropped.
    fn release(&mut self);
}

/// Conveniences composed from the [`Camera`] operations.
pub trait CameraExt: Camera {
    /// Iterate over streamed frames until streaming stops.
    fn frames(&self, timeout: Option<Duration>) -> Frames<'_, Self> {
        Frames {
            camera: self,
            timeout,
            done: false,
        }
    }

    /// Open the camera for the lifetime of the returned guard.
    ///
    /// Dropping the guard stops streaming and closes the camera, on every
    /// exit path.
    fn session(&self) -> Result<Session<'_, Self>> {
        if !self.is_open() {
            self.open(None)?;
        }
        Ok(Session { camera: self })
    }

    /// Change only the resolution.
    fn set_resolution(&self, width: u32, height: u32) -> Result<CameraConfig> {
        self.update_config(|config| config.resolution = Resolution::new(width, height))
    }

    /// Change only the framerate.
    fn set_framerate(&self, fps: f64) -> Result<CameraConfig> {
        self.update_config(|config| config.framerate = fps)
    }

    /// Switch exposure mode, with manual exposure time and ISO.
    fn set_exposure(
        &self,
        auto: bool,
        exposure_time_us: Option<u32>,
        iso: Option<u32>,
    ) -> Result<CameraConfig> {
        self.update_config(|config| {
            config.auto_exposure = auto;
            config.exposure_time_us = exposure_time_us.filter(|_| !auto);
            config.iso = iso;
        })
    }

    /// Switch white balance mode, with manual red and blue gains.
    fn set_white_balance(
        &self,
        auto: bool,
        gain_r: Option<f64>,
        gain_b: Option<f64>,
    ) -> Result<CameraConfig> {
        self.update_config(|config| {
            config.auto_white_balance = auto;
            config.wb_gain_r = gain_r.filter(|_| !auto);
            config.wb_gain_b = gain_b.filter(|_| !auto);
        })
    }

    /// Switch focus mode, with a manual focus distance.
    fn set_focus(&self, auto: bool, distance_m: Option<f64>) -> Result<CameraConfig> {
        self.update_config(|config| {
            config.auto_focus = auto;
            config.focus_distance_m = distance_m.filter(|_| !auto);
        })
    }

    /// Restrict capture to a normalized region of interest.
    ///
    /// Backends may round the region to their alignment block.
    fn set_roi(&self, x: f64, y: f64, width: f64, height: f64) -> Result<CameraConfig> {
        self.update_config(|config| config.roi = Some(Roi::new(x, y, width, height)))
    }

    /// Capture the full field of view again.
    fn clear_roi(&self) -> Result<CameraConfig> {
        self.update_config(|config| config.roi = None)
    }

    /// Overlay a change on the current configuration and reconcile it.
    fn update_config<F>(&self, change: F) -> Result<CameraConfig>
    where
        F: FnOnce(&mut CameraConfig),
    {
        let mut config = self.current_config().ok_or_else(CameraError::not_open)?;
        change(&mut config);
        self.set_config(&config)
    }
}

impl<C: Camera + ?Sized> CameraExt for C {}

/// Frames read from a streaming camera, see [`CameraExt::frames`].
///
/// Ends as soon as the camera stops streaming, whoever stopped it. Any other
/// read error, a timeout included, is yielded once and then ends the
/// sequence.
pub struct Frames<'a, C: Camera + ?Sized> {
    camera: &'a C,
    timeout: Option<Duration>,
    done: bool,
}

impl<C: Camera + ?Sized> Iterator for Frames<'_, C> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || !self.camera.is_streaming() {
            return None;
        }
        match self.camera.read(self.timeout) {
            Err(CameraError::State(_)) if !self.camera.is_streaming() => None,
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
            frame => Some(frame),
        }
    }
}

/// Scoped use of a camera, see [`CameraExt::session`].
pub struct Session<'a, C: Camera + ?Sized> {
    camera: &'a C,
}

impl<C: Camera + ?Sized> Deref for Session<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.camera
    }
}

impl<C: Camera + ?Sized> Drop for Session<'_, C> {
    fn drop(&mut self) {
        debug!(camera = self.camera.name(), "Ending camera session");
        if self.camera.is_streaming() {
            self.camera.stop_stream();
        }
        self.camera.close();
    }
}
