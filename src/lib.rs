//! Cam-Interface: a hardware-agnostic camera abstraction
//!
//! This library defines one capability contract, [`Camera`], that every capture
//! backend satisfies: a closed / open / streaming lifecycle, bounded-wait frame
//! acquisition, best-effort configuration and self-describing capabilities.
//! Backends are picked at runtime from a [`BackendProfile`] through the
//! [`factory`].
//!
//! Two backends ship with the crate: a synthetic test-pattern source that needs
//! no hardware, and a V4L2 backend (feature `v4l2`, on by default).

pub mod camera;
pub mod convert;
#[cfg(feature = "v4l2")]
pub mod device;
pub mod error;
pub mod factory;
pub mod persist;
pub mod profile;
pub mod reconcile;
pub mod synthetic;
pub mod traits;
pub mod types;
pub mod validation;

pub use camera::DeviceCamera;
#[cfg(feature = "v4l2")]
pub use device::{V4l2Camera, V4l2Driver};
pub use error::{CameraError, Result};
pub use factory::Registry;
pub use profile::{BackendProfile, HardwareConfig};
pub use synthetic::{TestPattern, TestPatternCamera, TestPatternDriver};
pub use traits::{Camera, CameraDriver, CameraExt, Control, DeviceHandle, RawFrame};
pub use types::{
    CameraConfig, Capabilities, ControlRange, ControlSupport, Frame, PixelFormat, Resolution,
    Roi, Rotation,
};
