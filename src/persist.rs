//! Saving frames to disk through the `image` crate.

use std::path::Path;

use image::{ExtendedColorType, ImageError};

use crate::convert;
use crate::types::{Frame, PixelFormat};

/// Save `frame` to `path`; the image format follows the file extension.
///
/// Grayscale frames are written as 8-bit luma, everything else as RGB.
pub fn save_frame(frame: &Frame, path: &Path) -> Result<(), ImageError> {
    let (data, color) = match frame.pixel_format {
        PixelFormat::Gray8 => (
            frame
                .data
                .get(..frame.resolution().area() as usize)
                .map(<[u8]>::to_vec),
            ExtendedColorType::L8,
        ),
        PixelFormat::Rgb | PixelFormat::Bgr | PixelFormat::Yuv420 => {
            (convert::to_rgb(frame), ExtendedColorType::Rgb8)
        }
    };

    let data = data.ok_or_else(|| {
        ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::DimensionMismatch,
        ))
    })?;

    image::save_buffer(path, &data, frame.width, frame.height, color)
}
