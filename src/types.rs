//! Value types shared by the camera contract and its backends.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::convert::yuv_to_rgb;

/// Image resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Create a new resolution.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels.
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether both dimensions are non-zero.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layout of a delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// Packed 24-bit, blue first.
    #[default]
    Bgr,
    /// Packed 24-bit, red first.
    Rgb,
    /// 8-bit luminance.
    Gray8,
    /// Planar YUV 4:2:0 (I420): full Y plane, then quarter-size U and V planes.
    Yuv420,
}

impl PixelFormat {
    /// Every format a frame can be delivered in.
    pub const ALL: [Self; 4] = [Self::Bgr, Self::Rgb, Self::Gray8, Self::Yuv420];

    /// Number of colour channels.
    #[must_use]
    pub const fn channels(self) -> u32 {
        match self {
            Self::Gray8 => 1,
            Self::Bgr | Self::Rgb | Self::Yuv420 => 3,
        }
    }

    /// Size in bytes of one frame at the given resolution.
    #[must_use]
    pub const fn frame_size(self, resolution: Resolution) -> usize {
        let pixels = resolution.width as usize * resolution.height as usize;
        match self {
            Self::Bgr | Self::Rgb => pixels * 3,
            Self::Gray8 => pixels,
            Self::Yuv420 => pixels + 2 * chroma_plane_len(resolution),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bgr => "BGR",
            Self::Rgb => "RGB",
            Self::Gray8 => "GRAY8",
            Self::Yuv420 => "YUV420",
        };
        f.write_str(name)
    }
}

/// Length of one chroma plane of an I420 image.
pub(crate) const fn chroma_plane_len(resolution: Resolution) -> usize {
    resolution.width.div_ceil(2) as usize * resolution.height.div_ceil(2) as usize
}

/// Image rotation applied by the sensor pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    /// No rotation.
    #[default]
    Deg0,
    /// Quarter turn clockwise.
    Deg90,
    /// Half turn.
    Deg180,
    /// Three quarter turns clockwise.
    Deg270,
}

impl Rotation {
    /// Rotation in degrees.
    #[must_use]
    pub const fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = u32;

    fn try_from(degrees: u32) -> std::result::Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(other),
        }
    }
}

/// Region of interest in normalized sensor coordinates, each value in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Roi {
    /// Create a new region of interest.
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole field of view.
    pub const FULL: Self = Self::new(0.0, 0.0, 1.0, 1.0);

    /// Whether every component is a finite number.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Generic camera configuration.
///
/// A configuration passed to a camera is a request. Backends answer with the
/// configuration they actually applied, which can differ on any field the
/// hardware cannot honor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Capture resolution.
    pub resolution: Resolution,
    /// Frames per second.
    pub framerate: f64,
    /// Layout of delivered frames.
    pub pixel_format: PixelFormat,
    /// Sensor rotation.
    pub rotation: Rotation,
    /// Horizontal mirror.
    pub hflip: bool,
    /// Vertical mirror.
    pub vflip: bool,
    /// Automatic exposure.
    pub auto_exposure: bool,
    /// Manual exposure time in microseconds, ignored with auto exposure.
    pub exposure_time_us: Option<u32>,
    /// Sensor sensitivity, if supported.
    pub iso: Option<u32>,
    /// Automatic white balance.
    pub auto_white_balance: bool,
    /// Manual red gain, ignored with auto white balance.
    pub wb_gain_r: Option<f64>,
    /// Manual blue gain, ignored with auto white balance.
    pub wb_gain_b: Option<f64>,
    /// Automatic focus.
    pub auto_focus: bool,
    /// Manual focus distance in meters, ignored with auto focus.
    pub focus_distance_m: Option<f64>,
    /// Region of interest.
    pub roi: Option<Roi>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::new(1280, 720),
            framerate: 30.0,
            pixel_format: PixelFormat::Bgr,
            rotation: Rotation::Deg0,
            hflip: false,
            vflip: false,
            auto_exposure: true,
            exposure_time_us: None,
            iso: None,
            auto_white_balance: true,
            wb_gain_r: None,
            wb_gain_b: None,
            auto_focus: true,
            focus_distance_m: None,
            roi: None,
        }
    }
}

impl CameraConfig {
    /// Set the capture resolution.
    #[must_use]
    pub const fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the framerate.
    #[must_use]
    pub const fn with_framerate(mut self, framerate: f64) -> Self {
        self.framerate = framerate;
        self
    }

    /// Set the pixel format of delivered frames.
    #[must_use]
    pub const fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }
}

/// A captured frame. Owned by the caller once returned.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data laid out according to `pixel_format`.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of colour channels.
    pub channels: u32,
    /// Pixel layout.
    pub pixel_format: PixelFormat,
    /// Monotonic acquisition time.
    pub timestamp: Duration,
    /// Number of frames delivered before this one since the camera was opened.
    pub sequence: u64,
}

impl Frame {
    /// Frame resolution.
    #[must_use]
    pub const fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// Returns `None` if the coordinates fall outside the frame or the buffer
    /// is shorter than its format requires.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;

        match self.pixel_format {
            PixelFormat::Rgb => {
                let px = self.data.get(index * 3..index * 3 + 3)?;
                Some((px[0], px[1], px[2]))
            }
            PixelFormat::Bgr => {
                let px = self.data.get(index * 3..index * 3 + 3)?;
                Some((px[2], px[1], px[0]))
            }
            PixelFormat::Gray8 => {
                let v = *self.data.get(index)?;
                Some((v, v, v))
            }
            PixelFormat::Yuv420 => {
                let resolution = self.resolution();
                let y_len = resolution.area() as usize;
                let chroma_len = chroma_plane_len(resolution);
                let chroma_index =
                    (y / 2) as usize * self.width.div_ceil(2) as usize + (x / 2) as usize;

                let y_val = *self.data.get(index)?;
                let u = *self.data.get(y_len + chroma_index)?;
                let v = *self.data.get(y_len + chroma_len + chroma_index)?;
                Some(yuv_to_rgb(y_val, u, v))
            }
        }
    }
}

/// Allowed numeric range of a manual control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlRange {
    /// Smallest accepted value.
    pub min: f64,
    /// Largest accepted value.
    pub max: f64,
}

impl ControlRange {
    /// Create a new range.
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamp a value into the range.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Automatic/manual support of a single control group.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlSupport {
    /// Automatic mode available.
    pub auto: bool,
    /// Manual mode available.
    pub manual: bool,
    /// Accepted manual values, if the backend knows them.
    pub range: Option<ControlRange>,
}

/// Static description of what a backend can do.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Capabilities {
    /// Supported capture resolutions.
    pub resolutions: Vec<Resolution>,
    /// Supported framerates.
    pub framerates: Vec<f64>,
    /// Supported frame layouts.
    pub pixel_formats: Vec<PixelFormat>,
    /// Supported rotations.
    pub rotations: Vec<Rotation>,
    /// Horizontal and vertical mirroring available.
    pub flip: bool,
    /// Exposure time in microseconds.
    pub exposure: ControlSupport,
    /// ISO sensitivity range, `None` if unsupported.
    pub iso: Option<ControlRange>,
    /// White balance; the range applies to the red and blue gains.
    pub white_balance: ControlSupport,
    /// Focus; the range is a distance in meters.
    pub focus: ControlSupport,
    /// Region of interest support.
    pub roi_supported: bool,
    /// ROI granularity in pixels.
    pub roi_alignment: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pixel_format: PixelFormat, data: Vec<u8>) -> Frame {
        Frame {
            data,
            width: 2,
            height: 2,
            channels: pixel_format.channels(),
            pixel_format,
            timestamp: Duration::ZERO,
            sequence: 0,
        }
    }

    #[test]
    fn test_frame_size() {
        let vga = Resolution::new(640, 480);
        assert_eq!(PixelFormat::Bgr.frame_size(vga), 640 * 480 * 3);
        assert_eq!(PixelFormat::Gray8.frame_size(vga), 640 * 480);
        assert_eq!(PixelFormat::Yuv420.frame_size(vga), 640 * 480 * 3 / 2);
        assert_eq!(
            PixelFormat::Yuv420.frame_size(Resolution::new(3, 3)),
            9 + 2 * 4
        );
    }

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::try_from(180), Ok(Rotation::Deg180));
        assert_eq!(Rotation::try_from(45), Err(45));
        assert_eq!(Rotation::Deg270.degrees(), 270);
    }

    #[test]
    fn test_pixel_at_packed_formats() {
        let rgb = frame(PixelFormat::Rgb, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(rgb.pixel_at(1, 0), Some((4, 5, 6)));

        let bgr = frame(PixelFormat::Bgr, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(bgr.pixel_at(0, 1), Some((9, 8, 7)));

        let gray = frame(PixelFormat::Gray8, vec![10, 20, 30, 40]);
        assert_eq!(gray.pixel_at(1, 1), Some((40, 40, 40)));
    }

    #[test]
    fn test_pixel_at_out_of_bounds() {
        let gray = frame(PixelFormat::Gray8, vec![10, 20, 30, 40]);
        assert_eq!(gray.pixel_at(2, 0), None);
        assert_eq!(gray.pixel_at(0, 2), None);

        let truncated = frame(PixelFormat::Rgb, vec![1, 2, 3]);
        assert_eq!(truncated.pixel_at(1, 1), None);
    }

    #[test]
    fn test_pixel_at_yuv420_neutral_chroma() {
        // 2x2 Y plane followed by one U and one V sample
        let yuv = frame(PixelFormat::Yuv420, vec![128, 128, 128, 128, 128, 128]);
        assert_eq!(yuv.pixel_at(1, 1), Some((128, 128, 128)));
    }

    #[test]
    fn test_default_config() {
        let config = CameraConfig::default();
        assert_eq!(config.resolution, Resolution::new(1280, 720));
        assert!(config.auto_exposure && config.auto_white_balance && config.auto_focus);
        assert!(config.roi.is_none());
    }
}
