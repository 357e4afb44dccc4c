//! Synthetic test-pattern backend for running without hardware.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::camera::DeviceCamera;
use crate::convert::{self, yuv_to_rgb};
use crate::error::{CameraError, Result};
use crate::traits::{CameraDriver, Control, DeviceHandle, RawFrame};
use crate::types::{
    Capabilities, ControlRange, ControlSupport, PixelFormat, Resolution, Roi, Rotation,
};

/// A camera producing generated test patterns.
pub type TestPatternCamera = DeviceCamera<TestPatternDriver>;

const EXPOSURE_RANGE_US: ControlRange = ControlRange::new(50.0, 200_000.0);
const ISO_RANGE: ControlRange = ControlRange::new(100.0, 1600.0);
const WB_GAIN_RANGE: ControlRange = ControlRange::new(0.5, 4.0);
const FOCUS_RANGE_M: ControlRange = ControlRange::new(0.1, 10.0);
const ROI_ALIGNMENT: u32 = 16;

/// Test pattern types for frame generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Normal,
    Stalled,
    Unavailable,
}

/// Driver for the synthetic source.
#[derive(Debug, Clone)]
pub struct TestPatternDriver {
    modes: Vec<Resolution>,
    framerates: Vec<f64>,
    pattern: TestPattern,
    behavior: Behavior,
}

impl Default for TestPatternDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPatternDriver {
    /// Create a driver with common resolutions at 15, 30 and 60 fps.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modes: vec![
                Resolution::new(320, 240),
                Resolution::new(640, 480),
                Resolution::new(1280, 720),
                Resolution::new(1920, 1080),
            ],
            framerates: vec![15.0, 30.0, 60.0],
            pattern: TestPattern::ColorBars,
            behavior: Behavior::Normal,
        }
    }

    /// A source with a single capture mode.
    #[must_use]
    pub fn fixed(resolution: Resolution, framerate: f64) -> Self {
        Self::new()
            .with_modes(vec![resolution])
            .with_framerates(vec![framerate])
    }

    /// Set the supported resolutions.
    #[must_use]
    pub fn with_modes(mut self, modes: Vec<Resolution>) -> Self {
        self.modes = modes;
        self
    }

    /// Set the supported framerates.
    #[must_use]
    pub fn with_framerates(mut self, framerates: Vec<f64>) -> Self {
        self.framerates = framerates;
        self
    }

    /// Set the generated pattern.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// A source that opens but never produces a frame.
    #[must_use]
    pub const fn stalled(mut self) -> Self {
        self.behavior = Behavior::Stalled;
        self
    }

    /// A source that cannot be opened.
    #[must_use]
    pub const fn unavailable(mut self) -> Self {
        self.behavior = Behavior::Unavailable;
        self
    }
}

impl CameraDriver for TestPatternDriver {
    type Handle = TestPatternHandle;

    fn name(&self, index: u32) -> String {
        format!("TestPattern[{index}]")
    }

    fn open(&self, index: u32) -> Result<Self::Handle> {
        if self.behavior == Behavior::Unavailable {
            return Err(CameraError::Open(format!(
                "test pattern device {index} unavailable"
            )));
        }

        let resolution = self
            .modes
            .first()
            .copied()
            .unwrap_or(Resolution::new(640, 480));
        debug!(index, %resolution, pattern = ?self.pattern, "Opened test pattern source");

        Ok(TestPatternHandle {
            modes: self.modes.clone(),
            framerates: self.framerates.clone(),
            pattern: self.pattern,
            stalled: self.behavior == Behavior::Stalled,
            requested: resolution,
            resolution,
            framerate: self.framerates.first().copied().unwrap_or(30.0),
            pixel_format: PixelFormat::Bgr,
            rotation: Rotation::Deg0,
            hflip: false,
            vflip: false,
            auto_exposure: true,
            exposure_us: 10_000.0,
            iso: None,
            auto_white_balance: true,
            gain_r: 1.0,
            gain_b: 1.0,
            auto_focus: true,
            focus_m: 1.0,
            roi: Roi::FULL,
            cached: None,
            released: false,
        })
    }
}

/// An open synthetic source.
#[derive(Debug)]
pub struct TestPatternHandle {
    modes: Vec<Resolution>,
    framerates: Vec<f64>,
    pattern: TestPattern,
    stalled: bool,
    requested: Resolution,
    resolution: Resolution,
    framerate: f64,
    pixel_format: PixelFormat,
    rotation: Rotation,
    hflip: bool,
    vflip: bool,
    auto_exposure: bool,
    exposure_us: f64,
    iso: Option<f64>,
    auto_white_balance: bool,
    gain_r: f64,
    gain_b: f64,
    auto_focus: bool,
    focus_m: f64,
    roi: Roi,
    cached: Option<RawFrame>,
    released: bool,
}

impl TestPatternHandle {
    /// Pick the supported mode closest to the requested width and height.
    fn select_mode(&mut self) {
        let requested = self.requested;
        if let Some(mode) = self.modes.iter().copied().min_by_key(|mode| {
            u64::from(mode.width.abs_diff(requested.width))
                + u64::from(mode.height.abs_diff(requested.height))
        }) {
            self.resolution = mode;
        }
    }

    fn render(&self) -> RawFrame {
        let rgb = generate_rgb(self.resolution, self.pattern, |u, v| {
            let (mut u, mut v) = (u, v);
            if self.hflip {
                u = 1.0 - u;
            }
            if self.vflip {
                v = 1.0 - v;
            }
            if self.rotation == Rotation::Deg180 {
                u = 1.0 - u;
                v = 1.0 - v;
            }
            (
                self.roi.width.mul_add(u, self.roi.x),
                self.roi.height.mul_add(v, self.roi.y),
            )
        });

        // generate_rgb always yields a full buffer, so the conversion cannot fail
        let data = convert::from_rgb(&rgb, self.resolution, self.pixel_format).unwrap_or_default();
        RawFrame {
            data,
            resolution: self.resolution,
            pixel_format: self.pixel_format,
        }
    }
}

impl DeviceHandle for TestPatternHandle {
    fn read_frame(&mut self, wait: Duration) -> Option<RawFrame> {
        if self.stalled || self.released {
            thread::sleep(wait);
            return None;
        }
        if self.cached.is_none() {
            self.cached = Some(self.render());
        }
        self.cached.clone()
    }

    fn grab(&mut self) -> bool {
        !self.stalled && !self.released
    }

    fn set_property(&mut self, control: Control, value: f64) -> bool {
        let on = value >= 0.5;
        match control {
            Control::FrameWidth | Control::FrameHeight if value < 1.0 => return false,
            Control::FrameWidth => {
                self.requested.width = round_dimension(value);
                self.select_mode();
            }
            Control::FrameHeight => {
                self.requested.height = round_dimension(value);
                self.select_mode();
            }
            Control::Framerate => {
                let Some(fps) = self.framerates.iter().copied().min_by(|a, b| {
                    (a - value).abs().total_cmp(&(b - value).abs()).then(a.total_cmp(b))
                }) else {
                    return false;
                };
                self.framerate = fps;
            }
            Control::Rotation => match Rotation::try_from(round_u32(value)) {
                Ok(rotation @ (Rotation::Deg0 | Rotation::Deg180)) => self.rotation = rotation,
                _ => return false,
            },
            Control::HFlip => self.hflip = on,
            Control::VFlip => self.vflip = on,
            Control::AutoExposure => self.auto_exposure = on,
            Control::ExposureTimeUs => self.exposure_us = EXPOSURE_RANGE_US.clamp(value),
            Control::Iso => {
                self.iso = (value > 0.0).then(|| ISO_RANGE.clamp(value).round());
            }
            Control::AutoWhiteBalance => self.auto_white_balance = on,
            Control::WbGainRed => self.gain_r = WB_GAIN_RANGE.clamp(value),
            Control::WbGainBlue => self.gain_b = WB_GAIN_RANGE.clamp(value),
            Control::AutoFocus => self.auto_focus = on,
            Control::FocusDistance => self.focus_m = FOCUS_RANGE_M.clamp(value),
            Control::RoiX => self.roi.x = value.clamp(0.0, 1.0),
            Control::RoiY => self.roi.y = value.clamp(0.0, 1.0),
            Control::RoiWidth => self.roi.width = value.clamp(0.0, 1.0),
            Control::RoiHeight => self.roi.height = value.clamp(0.0, 1.0),
        }
        self.cached = None;
        true
    }

    fn property(&self, control: Control) -> Option<f64> {
        let flag = |on: bool| if on { 1.0 } else { 0.0 };
        let value = match control {
            Control::FrameWidth => f64::from(self.resolution.width),
            Control::FrameHeight => f64::from(self.resolution.height),
            Control::Framerate => self.framerate,
            Control::Rotation => f64::from(self.rotation.degrees()),
            Control::HFlip => flag(self.hflip),
            Control::VFlip => flag(self.vflip),
            Control::AutoExposure => flag(self.auto_exposure),
            Control::ExposureTimeUs => self.exposure_us,
            Control::Iso => return self.iso,
            Control::AutoWhiteBalance => flag(self.auto_white_balance),
            Control::WbGainRed => self.gain_r,
            Control::WbGainBlue => self.gain_b,
            Control::AutoFocus => flag(self.auto_focus),
            Control::FocusDistance => self.focus_m,
            Control::RoiX => self.roi.x,
            Control::RoiY => self.roi.y,
            Control::RoiWidth => self.roi.width,
            Control::RoiHeight => self.roi.height,
        };
        Some(value)
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> bool {
        self.pixel_format = format;
        self.cached = None;
        true
    }

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            resolutions: self.modes.clone(),
            framerates: self.framerates.clone(),
            pixel_formats: PixelFormat::ALL.to_vec(),
            rotations: vec![Rotation::Deg0, Rotation::Deg180],
            flip: true,
            exposure: ControlSupport {
                auto: true,
                manual: true,
                range: Some(EXPOSURE_RANGE_US),
            },
            iso: Some(ISO_RANGE),
            white_balance: ControlSupport {
                auto: true,
                manual: true,
                range: Some(WB_GAIN_RANGE),
            },
            focus: ControlSupport {
                auto: true,
                manual: true,
                range: Some(FOCUS_RANGE_M),
            },
            roi_supported: true,
            roi_alignment: ROI_ALIGNMENT,
        }
    }

    fn release(&mut self) {
        self.released = true;
        self.cached = None;
        debug!("Released test pattern source");
    }
}

fn round_u32(value: f64) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        value.round().clamp(0.0, f64::from(u32::MAX)) as u32
    }
}

fn round_dimension(value: f64) -> u32 {
    round_u32(value).max(1)
}

/// Generate packed RGB24 data for `pattern`.
///
/// `map` turns normalized output coordinates (pixel centers) into normalized
/// pattern coordinates.
fn generate_rgb<F>(resolution: Resolution, pattern: TestPattern, map: F) -> Vec<u8>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let width = f64::from(resolution.width);
    let height = f64::from(resolution.height);
    let mut data = Vec::with_capacity(resolution.area() as usize * 3);

    for y in 0..resolution.height {
        for x in 0..resolution.width {
            let (u, v) = map(
                (f64::from(x) + 0.5) / width,
                (f64::from(y) + 0.5) / height,
            );
            let (y_val, u_val, v_val) = pattern_yuv(pattern, u, v);
            let (r, g, b) = yuv_to_rgb(y_val, u_val, v_val);
            data.extend_from_slice(&[r, g, b]);
        }
    }
    data
}

/// YUV value of `pattern` at normalized coordinates.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pattern_yuv(pattern: TestPattern, u: f64, _v: f64) -> (u8, u8, u8) {
    // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    const BARS: [(u8, u8, u8); 8] = [
        (235, 128, 128), // White
        (210, 16, 146),  // Yellow
        (170, 166, 16),  // Cyan
        (145, 54, 34),   // Green
        (106, 202, 222), // Magenta
        (81, 90, 240),   // Red
        (41, 240, 110),  // Blue
        (16, 128, 128),  // Black
    ];

    match pattern {
        TestPattern::ColorBars => {
            let bar = ((u * 8.0).floor().clamp(0.0, 7.0)) as usize;
            BARS.get(bar).copied().unwrap_or((16, 128, 128))
        }
        TestPattern::Gradient => ((u * 255.0).clamp(0.0, 255.0) as u8, 128, 128),
        TestPattern::Solid(y, u, v) => (y, u, v),
    }
}
