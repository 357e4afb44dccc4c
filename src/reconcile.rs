//! Best-effort application of a [`CameraConfig`] to a device handle.
//!
//! Reconciliation happens in three steps: the request is clamped to the
//! device capabilities, the clamped values are pushed to the handle, and the
//! applied configuration is rebuilt purely from what the handle reports back.
//! A field the handle cannot report is never echoed from the request.

use tracing::{debug, warn};

use crate::traits::{Control, DeviceHandle};
use crate::types::{CameraConfig, Capabilities, ControlSupport, Resolution, Roi, Rotation};

/// Clamp a requested configuration to what `caps` allows.
///
/// Resolutions and framerates snap to the nearest supported value; ties go
/// to the smaller resolution and the lower framerate. Unsupported features
/// fall back to their neutral setting.
#[must_use]
pub fn clamp(request: &CameraConfig, caps: &Capabilities) -> CameraConfig {
    let mut target = request.clone();

    target.resolution = nearest_resolution(request.resolution, &caps.resolutions);
    target.framerate = nearest_framerate(request.framerate, &caps.framerates);

    if let Some(&fallback) = caps.pixel_formats.first() {
        if !caps.pixel_formats.contains(&request.pixel_format) {
            target.pixel_format = fallback;
        }
    }
    if !caps.rotations.contains(&request.rotation) {
        target.rotation = Rotation::Deg0;
    }
    if !caps.flip {
        target.hflip = false;
        target.vflip = false;
    }

    let (auto, exposure) = clamp_control(
        request.auto_exposure,
        request.exposure_time_us.map(f64::from),
        &caps.exposure,
    );
    target.auto_exposure = auto;
    target.exposure_time_us = exposure.map(round_u32);
    target.iso = match (request.iso, caps.iso) {
        (Some(iso), Some(range)) => Some(round_u32(range.clamp(f64::from(iso)))),
        _ => None,
    };

    let (auto, gain_r) = clamp_control(
        request.auto_white_balance,
        request.wb_gain_r,
        &caps.white_balance,
    );
    let (_, gain_b) = clamp_control(
        request.auto_white_balance,
        request.wb_gain_b,
        &caps.white_balance,
    );
    target.auto_white_balance = auto;
    target.wb_gain_r = gain_r;
    target.wb_gain_b = gain_b;

    let (auto, distance) = clamp_control(request.auto_focus, request.focus_distance_m, &caps.focus);
    target.auto_focus = auto;
    target.focus_distance_m = distance;

    target.roi = match request.roi {
        Some(roi) if !roi.is_finite() => {
            warn!(?roi, "Ignoring region of interest with non-finite components");
            None
        }
        roi => roi
            .filter(|_| caps.roi_supported)
            .map(|roi| align_roi(roi, target.resolution, caps.roi_alignment))
            .filter(|roi| *roi != Roi::FULL),
    };

    if target != *request {
        warn!(?request, applied = ?target, "Requested configuration clamped to device capabilities");
    }
    target
}

/// Push `request` to `handle` and return the configuration now in effect.
pub fn apply<H: DeviceHandle + ?Sized>(handle: &mut H, request: &CameraConfig) -> CameraConfig {
    let caps = handle.capabilities();
    let target = clamp(request, &caps);

    handle.set_pixel_format(target.pixel_format);
    push(handle, Control::FrameWidth, f64::from(target.resolution.width));
    push(handle, Control::FrameHeight, f64::from(target.resolution.height));
    push(handle, Control::Framerate, target.framerate);
    push(handle, Control::Rotation, f64::from(target.rotation.degrees()));
    push(handle, Control::HFlip, flag(target.hflip));
    push(handle, Control::VFlip, flag(target.vflip));

    push(handle, Control::AutoExposure, flag(target.auto_exposure));
    if let Some(exposure) = target.exposure_time_us {
        push(handle, Control::ExposureTimeUs, f64::from(exposure));
    }
    push(handle, Control::Iso, target.iso.map_or(0.0, f64::from));

    push(handle, Control::AutoWhiteBalance, flag(target.auto_white_balance));
    if let Some(gain) = target.wb_gain_r {
        push(handle, Control::WbGainRed, gain);
    }
    if let Some(gain) = target.wb_gain_b {
        push(handle, Control::WbGainBlue, gain);
    }

    push(handle, Control::AutoFocus, flag(target.auto_focus));
    if let Some(distance) = target.focus_distance_m {
        push(handle, Control::FocusDistance, distance);
    }

    let roi = target.roi.unwrap_or(Roi::FULL);
    push(handle, Control::RoiX, roi.x);
    push(handle, Control::RoiY, roi.y);
    push(handle, Control::RoiWidth, roi.width);
    push(handle, Control::RoiHeight, roi.height);

    read_back(handle, &target)
}

/// Rebuild the applied configuration from the handle's reported state.
///
/// `target` only supplies the framerate when the handle cannot report it,
/// since every backend honors a framerate picked from its own capabilities.
fn read_back<H: DeviceHandle + ?Sized>(handle: &H, target: &CameraConfig) -> CameraConfig {
    let prop = |control: Control| handle.property(control);
    let enabled = |control: Control| prop(control).is_some_and(|v| v >= 0.5);

    let resolution = match (prop(Control::FrameWidth), prop(Control::FrameHeight)) {
        (Some(width), Some(height)) => Resolution::new(round_u32(width), round_u32(height)),
        _ => target.resolution,
    };

    let auto_exposure = prop(Control::AutoExposure).map_or(true, |v| v >= 0.5);
    let auto_white_balance = prop(Control::AutoWhiteBalance).map_or(true, |v| v >= 0.5);
    let auto_focus = prop(Control::AutoFocus).map_or(true, |v| v >= 0.5);

    let roi = match (
        prop(Control::RoiX),
        prop(Control::RoiY),
        prop(Control::RoiWidth),
        prop(Control::RoiHeight),
    ) {
        (Some(x), Some(y), Some(width), Some(height)) => {
            Some(Roi::new(x, y, width, height)).filter(|roi| *roi != Roi::FULL)
        }
        _ => None,
    };

    let applied = CameraConfig {
        resolution,
        framerate: prop(Control::Framerate).unwrap_or(target.framerate),
        pixel_format: handle.pixel_format(),
        rotation: prop(Control::Rotation)
            .and_then(|deg| Rotation::try_from(round_u32(deg)).ok())
            .unwrap_or_default(),
        hflip: enabled(Control::HFlip),
        vflip: enabled(Control::VFlip),
        auto_exposure,
        exposure_time_us: prop(Control::ExposureTimeUs)
            .filter(|_| !auto_exposure)
            .map(round_u32),
        iso: prop(Control::Iso).filter(|&v| v > 0.0).map(round_u32),
        auto_white_balance,
        wb_gain_r: prop(Control::WbGainRed).filter(|_| !auto_white_balance),
        wb_gain_b: prop(Control::WbGainBlue).filter(|_| !auto_white_balance),
        auto_focus,
        focus_distance_m: prop(Control::FocusDistance).filter(|_| !auto_focus),
        roi,
    };
    debug!(?applied, "Configuration read back from device");
    applied
}

fn push<H: DeviceHandle + ?Sized>(handle: &mut H, control: Control, value: f64) {
    if !handle.set_property(control, value) {
        debug!(?control, value, "Device did not accept control value");
    }
}

const fn flag(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

fn round_u32(value: f64) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        value.round().clamp(0.0, f64::from(u32::MAX)) as u32
    }
}

/// Resolve one auto/manual control group against its support.
///
/// Returns the effective auto flag and the manual value, which is only kept
/// in manual mode.
fn clamp_control(
    auto: bool,
    manual_value: Option<f64>,
    support: &ControlSupport,
) -> (bool, Option<f64>) {
    let auto = if auto { support.auto || !support.manual } else { !support.manual };
    if auto {
        return (true, None);
    }
    let value = manual_value.map(|v| support.range.map_or(v, |range| range.clamp(v)));
    (false, value)
}

fn nearest_resolution(requested: Resolution, supported: &[Resolution]) -> Resolution {
    supported
        .iter()
        .copied()
        .min_by_key(|res| {
            let distance = u64::from(res.width.abs_diff(requested.width))
                + u64::from(res.height.abs_diff(requested.height));
            (distance, res.area())
        })
        .unwrap_or(requested)
}

fn nearest_framerate(requested: f64, supported: &[f64]) -> f64 {
    supported
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = (a - requested).abs();
            let db = (b - requested).abs();
            da.total_cmp(&db).then(a.total_cmp(b))
        })
        .unwrap_or(requested)
}

/// Clamp a region into the unit square and snap its edges to `alignment`
/// pixels.
///
/// The grid points of each axis are the multiples of `alignment` plus the
/// frame edge itself, so the last block may be shorter than `alignment` and
/// a full-frame request stays reachable on any extent.
fn align_roi(roi: Roi, resolution: Resolution, alignment: u32) -> Roi {
    let alignment = f64::from(alignment.max(1));
    let axis = |start: f64, length: f64, extent: u32| -> (f64, f64) {
        let extent = f64::from(extent.max(1));
        let snap = |px: f64| {
            let lower = (px / alignment).floor() * alignment;
            let upper = (lower + alignment).min(extent);
            if px - lower <= upper - px {
                lower
            } else {
                upper
            }
        };

        let start = start.clamp(0.0, 1.0);
        let end = (start + length.max(0.0)).min(1.0);
        let mut first = snap(start * extent);
        if first >= extent {
            first = ((extent - 1.0) / alignment).floor() * alignment;
        }
        let last = snap(end * extent).max((first + alignment).min(extent));

        (
            (first / extent).clamp(0.0, 1.0),
            ((last - first) / extent).clamp(0.0, 1.0),
        )
    };

    let (x, width) = axis(roi.x, roi.width, resolution.width);
    let (y, height) = axis(roi.y, roi.height, resolution.height);
    Roi::new(x, y, width, height)
}
