//! V4L2 backend using the v4l crate.
//!
//! Devices are captured in YUYV, or MJPG when the device offers no YUYV, and
//! converted in software to the requested [`PixelFormat`]. Rotation, ISO,
//! white balance gains, focus distance and ROI have no portable V4L2 control
//! and are reported as unsupported.

use std::io;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::control::{Control as V4lControl, Description, Value};
use v4l::framesize::FrameSizeEnum;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::camera::DeviceCamera;
use crate::convert;
use crate::error::{CameraError, Result};
use crate::traits::{CameraDriver, Control, DeviceHandle, RawFrame};
use crate::types::{
    Capabilities, ControlRange, ControlSupport, PixelFormat, Resolution, Rotation,
};

/// A camera on a `/dev/video*` node.
pub type V4l2Camera = DeviceCamera<V4l2Driver>;

const BUFFER_COUNT: u32 = 4;

// V4L2 control IDs from linux/v4l2-controls.h
const V4L2_CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const V4L2_CID_HFLIP: u32 = 0x0098_0914;
const V4L2_CID_VFLIP: u32 = 0x0098_0915;
const V4L2_CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const V4L2_CID_FOCUS_AUTO: u32 = 0x009a_090c;

// V4L2_CID_EXPOSURE_AUTO menu entries
const EXPOSURE_AUTO: i64 = 0;
const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// V4L2_CID_EXPOSURE_ABSOLUTE counts in units of 100 µs.
const EXPOSURE_UNIT_US: f64 = 100.0;

/// Sizes offered for devices that describe their frame sizes as a range.
const STEPWISE_CANDIDATES: [(u32, u32); 4] = [(320, 240), (640, 480), (1280, 720), (1920, 1080)];

/// Opens `/dev/video<index>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Driver;

impl CameraDriver for V4l2Driver {
    type Handle = V4l2Handle;

    fn name(&self, index: u32) -> String {
        format!("/dev/video{index}")
    }

    fn open(&self, index: u32) -> Result<Self::Handle> {
        V4l2Handle::open(index)
    }
}

/// An open V4L2 capture device.
pub struct V4l2Handle {
    stream: Option<Stream<'static>>,
    device: Device,
    fourcc: FourCC,
    resolution: Resolution,
    requested: Resolution,
    output: PixelFormat,
    controls: Vec<Description>,
}

impl V4l2Handle {
    fn open(index: u32) -> Result<Self> {
        let open_err = |err: io::Error| CameraError::Open(format!("/dev/video{index}: {err}"));

        let device = Device::new(index as usize).map_err(open_err)?;
        let caps = device.query_caps().map_err(open_err)?;
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::Open(format!(
                "/dev/video{index} ({}) is not a capture device",
                caps.card
            )));
        }

        let offered: Vec<FourCC> = device
            .enum_formats()
            .map_err(open_err)?
            .into_iter()
            .map(|desc| desc.fourcc)
            .collect();
        let fourcc = [FourCC::new(b"YUYV"), FourCC::new(b"MJPG")]
            .into_iter()
            .find(|candidate| offered.contains(candidate))
            .ok_or_else(|| {
                CameraError::Open(format!("/dev/video{index} offers neither YUYV nor MJPG"))
            })?;

        let mut format = device.format().map_err(open_err)?;
        format.fourcc = fourcc;
        let format = device.set_format(&format).map_err(open_err)?;
        let resolution = Resolution::new(format.width, format.height);

        let controls = device.query_controls().unwrap_or_else(|err| {
            debug!(index, error = %err, "Device does not enumerate controls");
            Vec::new()
        });

        debug!(
            index,
            card = %caps.card,
            driver = %caps.driver,
            fourcc = %fourcc,
            %resolution,
            "Opened V4L2 device"
        );

        Ok(Self {
            stream: None,
            device,
            fourcc,
            resolution,
            requested: resolution,
            output: PixelFormat::default(),
            controls,
        })
    }

    fn describe(&self, id: u32) -> Option<&Description> {
        self.controls.iter().find(|desc| desc.id == id)
    }

    fn menu_has(&self, id: u32, entry: i64) -> bool {
        self.describe(id).is_some_and(|desc| {
            desc.items.as_ref().map_or(true, |items| {
                items.iter().any(|(index, _)| i64::from(*index) == entry)
            })
        })
    }

    fn has_control(&self, id: u32) -> bool {
        self.describe(id).is_some()
    }

    fn control_value(&self, id: u32) -> Option<i64> {
        self.describe(id)?;
        match self.device.control(id).ok()?.value {
            Value::Integer(value) => Some(value),
            Value::Boolean(value) => Some(i64::from(value)),
            _ => None,
        }
    }

    fn set_control(&self, id: u32, value: i64) -> bool {
        let Some(desc) = self.describe(id) else {
            return false;
        };
        let value = value.clamp(desc.minimum, desc.maximum);
        match self.device.set_control(V4lControl {
            id,
            value: Value::Integer(value),
        }) {
            Ok(()) => true,
            Err(err) => {
                debug!(control = %desc.name, value, error = %err, "Failed to set V4L2 control");
                false
            }
        }
    }

    /// Negotiate the requested size. Buffers must be released first.
    fn apply_size(&mut self) -> bool {
        self.stream = None;
        let result = self.device.format().and_then(|mut format| {
            format.width = self.requested.width;
            format.height = self.requested.height;
            format.fourcc = self.fourcc;
            self.device.set_format(&format)
        });

        match result {
            Ok(format) => {
                self.resolution = Resolution::new(format.width, format.height);
                true
            }
            Err(err) => {
                warn!(requested = %self.requested, error = %err, "Failed to set V4L2 format");
                false
            }
        }
    }

    fn ensure_stream(&mut self) -> io::Result<&mut Stream<'static>> {
        if self.stream.is_none() {
            self.stream = Some(Stream::with_buffers(
                &self.device,
                Type::VideoCapture,
                BUFFER_COUNT,
            )?);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::other("capture stream unavailable"))
    }

    fn decode(&self, data: &[u8]) -> Option<RawFrame> {
        let (rgb, resolution) = if self.fourcc == FourCC::new(b"MJPG") {
            let image = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
                .map_err(|err| debug!(error = %err, "Dropping undecodable MJPG frame"))
                .ok()?
                .to_rgb8();
            let resolution = Resolution::new(image.width(), image.height());
            (image.into_raw(), resolution)
        } else {
            (convert::yuyv_to_rgb(data, self.resolution)?, self.resolution)
        };

        Some(RawFrame {
            data: convert::from_rgb(&rgb, resolution, self.output)?,
            resolution,
            pixel_format: self.output,
        })
    }

    fn modes(&self) -> Vec<Resolution> {
        let mut modes = Vec::new();
        for size in self.device.enum_framesizes(self.fourcc).unwrap_or_default() {
            match size.size {
                FrameSizeEnum::Discrete(discrete) => {
                    modes.push(Resolution::new(discrete.width, discrete.height));
                }
                FrameSizeEnum::Stepwise(stepwise) => {
                    modes.extend(
                        STEPWISE_CANDIDATES
                            .iter()
                            .filter(|&&(width, height)| {
                                (stepwise.min_width..=stepwise.max_width).contains(&width)
                                    && (stepwise.min_height..=stepwise.max_height)
                                        .contains(&height)
                            })
                            .map(|&(width, height)| Resolution::new(width, height)),
                    );
                }
            }
        }
        modes.sort_by_key(|mode| (mode.area(), mode.width));
        modes.dedup();
        modes
    }

    fn framerates(&self) -> Vec<f64> {
        let intervals = self
            .device
            .enum_frameintervals(self.fourcc, self.resolution.width, self.resolution.height)
            .unwrap_or_default();

        let mut rates: Vec<f64> = intervals
            .into_iter()
            .filter_map(|interval| match interval.interval {
                FrameIntervalEnum::Discrete(fraction) => {
                    fps_from_interval(fraction.numerator, fraction.denominator)
                }
                FrameIntervalEnum::Stepwise(stepwise) => {
                    fps_from_interval(stepwise.min.numerator, stepwise.min.denominator)
                }
            })
            .collect();
        rates.sort_by(f64::total_cmp);
        rates.dedup();
        rates
    }

    fn framerate(&self) -> Option<f64> {
        let params = self.device.params().ok()?;
        fps_from_interval(params.interval.numerator, params.interval.denominator)
    }
}

impl DeviceHandle for V4l2Handle {
    fn read_frame(&mut self, wait: Duration) -> Option<RawFrame> {
        let next = self.ensure_stream().and_then(|stream| {
            stream.set_timeout(wait);
            let (buf, meta) = stream.next()?;
            let used = (meta.bytesused as usize).min(buf.len());
            Ok(buf.get(..used).unwrap_or(buf).to_vec())
        });

        match next {
            Ok(data) => self.decode(&data),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => None,
            Err(err) => {
                warn!(error = %err, "V4L2 capture failed, restarting stream");
                self.stream = None;
                thread::sleep(wait);
                None
            }
        }
    }

    fn grab(&mut self) -> bool {
        self.ensure_stream()
            .and_then(|stream| {
                stream.set_timeout(Duration::ZERO);
                stream.next().map(|_| ())
            })
            .is_ok()
    }

    fn set_property(&mut self, control: Control, value: f64) -> bool {
        #[allow(clippy::cast_possible_truncation)]
        let integer = value.round() as i64;
        let on = value >= 0.5;

        match control {
            Control::FrameWidth | Control::FrameHeight if value < 1.0 => false,
            Control::FrameWidth => {
                self.requested.width = u32::try_from(integer).unwrap_or(u32::MAX);
                self.apply_size()
            }
            Control::FrameHeight => {
                self.requested.height = u32::try_from(integer).unwrap_or(u32::MAX);
                self.apply_size()
            }
            Control::Framerate => {
                self.stream = None;
                let fps = u32::try_from(integer).unwrap_or(1).max(1);
                self.device
                    .set_params(&Parameters::with_fps(fps))
                    .map_err(|err| warn!(fps, error = %err, "Failed to set V4L2 framerate"))
                    .is_ok()
            }
            Control::Rotation => integer == 0,
            Control::HFlip => self.set_control(V4L2_CID_HFLIP, i64::from(on)),
            Control::VFlip => self.set_control(V4L2_CID_VFLIP, i64::from(on)),
            Control::AutoExposure => {
                let mode = if !on {
                    EXPOSURE_MANUAL
                } else if self.menu_has(V4L2_CID_EXPOSURE_AUTO, EXPOSURE_APERTURE_PRIORITY) {
                    EXPOSURE_APERTURE_PRIORITY
                } else {
                    EXPOSURE_AUTO
                };
                self.set_control(V4L2_CID_EXPOSURE_AUTO, mode)
            }
            Control::ExposureTimeUs => {
                #[allow(clippy::cast_possible_truncation)]
                let units = (value / EXPOSURE_UNIT_US).round() as i64;
                self.set_control(V4L2_CID_EXPOSURE_ABSOLUTE, units)
            }
            Control::AutoWhiteBalance => self.set_control(V4L2_CID_AUTO_WHITE_BALANCE, i64::from(on)),
            Control::AutoFocus => self.set_control(V4L2_CID_FOCUS_AUTO, i64::from(on)),
            Control::Iso => integer == 0,
            Control::WbGainRed
            | Control::WbGainBlue
            | Control::FocusDistance
            | Control::RoiX
            | Control::RoiY
            | Control::RoiWidth
            | Control::RoiHeight => false,
        }
    }

    fn property(&self, control: Control) -> Option<f64> {
        #[allow(clippy::cast_precision_loss)]
        let as_f64 = |value: i64| value as f64;
        let flag = |id: u32| self.control_value(id).map(|value| if value == 0 { 0.0 } else { 1.0 });

        match control {
            Control::FrameWidth => Some(f64::from(self.resolution.width)),
            Control::FrameHeight => Some(f64::from(self.resolution.height)),
            Control::Framerate => self.framerate(),
            Control::Rotation => Some(0.0),
            Control::HFlip => flag(V4L2_CID_HFLIP),
            Control::VFlip => flag(V4L2_CID_VFLIP),
            Control::AutoExposure => match self.control_value(V4L2_CID_EXPOSURE_AUTO) {
                Some(mode) => Some(if mode == EXPOSURE_MANUAL { 0.0 } else { 1.0 }),
                None if self.has_control(V4L2_CID_EXPOSURE_ABSOLUTE) => Some(0.0),
                None => None,
            },
            Control::ExposureTimeUs => self
                .control_value(V4L2_CID_EXPOSURE_ABSOLUTE)
                .map(|units| as_f64(units) * EXPOSURE_UNIT_US),
            Control::AutoWhiteBalance => flag(V4L2_CID_AUTO_WHITE_BALANCE),
            Control::AutoFocus => flag(V4L2_CID_FOCUS_AUTO),
            Control::Iso
            | Control::WbGainRed
            | Control::WbGainBlue
            | Control::FocusDistance
            | Control::RoiX
            | Control::RoiY
            | Control::RoiWidth
            | Control::RoiHeight => None,
        }
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> bool {
        self.output = format;
        true
    }

    fn pixel_format(&self) -> PixelFormat {
        self.output
    }

    fn capabilities(&self) -> Capabilities {
        #[allow(clippy::cast_precision_loss)]
        let exposure_range = self.describe(V4L2_CID_EXPOSURE_ABSOLUTE).map(|desc| {
            ControlRange::new(
                desc.minimum.max(1) as f64 * EXPOSURE_UNIT_US,
                desc.maximum as f64 * EXPOSURE_UNIT_US,
            )
        });

        Capabilities {
            resolutions: self.modes(),
            framerates: self.framerates(),
            pixel_formats: PixelFormat::ALL.to_vec(),
            rotations: vec![Rotation::Deg0],
            flip: self.has_control(V4L2_CID_HFLIP) && self.has_control(V4L2_CID_VFLIP),
            exposure: ControlSupport {
                auto: self.has_control(V4L2_CID_EXPOSURE_AUTO),
                manual: exposure_range.is_some(),
                range: exposure_range,
            },
            iso: None,
            white_balance: ControlSupport {
                auto: self.has_control(V4L2_CID_AUTO_WHITE_BALANCE),
                manual: false,
                range: None,
            },
            focus: ControlSupport {
                auto: self.has_control(V4L2_CID_FOCUS_AUTO),
                manual: false,
                range: None,
            },
            roi_supported: false,
            roi_alignment: 1,
        }
    }

    fn release(&mut self) {
        self.stream = None;
        debug!(fourcc = %self.fourcc, "Released V4L2 buffers");
    }
}

fn fps_from_interval(numerator: u32, denominator: u32) -> Option<f64> {
    (numerator > 0 && denominator > 0).then(|| f64::from(denominator) / f64::from(numerator))
}
