//! Frame validation utilities for test pattern verification.
//!
//! These check that captured frames contain the expected test patterns and
//! that a run of frames was delivered without drops. Useful for integration
//! testing with the synthetic backend and virtual V4L2 cameras.

use thiserror::Error;

use crate::types::Frame;

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// These are the RGB values resulting from converting the YUV values
/// used by the test pattern backend's color bar pattern.
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
pub const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
pub const COLOR_TOLERANCE: u32 = 15;

/// Why a frame or frame sequence failed validation.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A sample point lies outside the frame or the frame data is short.
    #[error("no pixel at ({x}, {y})")]
    MissingPixel {
        /// Column of the sample.
        x: u32,
        /// Row of the sample.
        y: u32,
    },

    /// A color bar differs from the expected color.
    #[error("color bar {bar} mismatch at x={x}: expected RGB{expected:?}, got RGB{actual:?}")]
    ColorBar {
        /// Index of the bar, left to right.
        bar: usize,
        /// Column of the sample.
        x: u32,
        /// Expected color.
        expected: (u8, u8, u8),
        /// Sampled color.
        actual: (u8, u8, u8),
    },

    /// Luminance drops while moving right.
    #[error("gradient not monotonically increasing at x={x}")]
    GradientDecreasing {
        /// Column where the drop was seen.
        x: u32,
    },

    /// Left and right edges are too similar for a gradient.
    #[error("insufficient luminance change for gradient: {0:.1} (expected at least 50.0)")]
    GradientFlat(f32),

    /// There were no frames to check.
    #[error("cannot validate empty frame sequence")]
    EmptySequence,

    /// A frame number was skipped or repeated.
    #[error("frame sequence gap at index {index}: expected {expected}, got {actual}")]
    SequenceGap {
        /// Position in the slice.
        index: usize,
        /// Expected sequence number.
        expected: u64,
        /// Sequence number found.
        actual: u64,
    },

    /// A frame is timestamped before its predecessor.
    #[error("frame timestamp went backwards at index {0}")]
    TimestampRegression(usize),
}

/// Validates that a frame contains the SMPTE color bar pattern.
///
/// Checks 8 vertical stripes at their center positions, with a tolerance
/// for YUV-to-RGB conversion inaccuracies.
///
/// # Arguments
///
/// * `frame` - The frame to validate, in any pixel format
///
/// # Returns
///
/// * `Ok(())` if the color bars are valid
/// * `Err(ValidationError)` describing the first mismatching bar
///
/// # Errors
///
/// Returns `MissingPixel` if a sample point cannot be decoded and
/// `ColorBar` if a bar color is outside [`COLOR_TOLERANCE`].
pub fn validate_color_bars(frame: &Frame) -> Result<(), ValidationError> {
    let bar_width = frame.width / 8;
    let center_y = frame.height / 2;

    for (bar, expected) in SMPTE_COLOR_BARS.iter().enumerate() {
        // Sample the center of each bar
        #[allow(clippy::cast_possible_truncation)]
        let x = (bar as u32 * bar_width) + (bar_width / 2);

        let actual = sample(frame, x, center_y)?;
        if !colors_match(actual, *expected, COLOR_TOLERANCE) {
            return Err(ValidationError::ColorBar {
                bar,
                x,
                expected: *expected,
                actual,
            });
        }
    }

    Ok(())
}

/// Validates that a frame contains a horizontal gradient pattern.
///
/// Samples a horizontal line at the center of the frame and verifies that
/// luminance increases monotonically from left to right, with a significant
/// overall change.
///
/// # Arguments
///
/// * `frame` - The frame to validate, in any pixel format
///
/// # Returns
///
/// * `Ok(())` if the gradient is valid
/// * `Err(ValidationError)` if validation fails
///
/// # Errors
///
/// Returns `ValidationError` if:
/// - A sample point cannot be decoded
/// - Luminance decreases between two samples
/// - The total change across the line is too small
pub fn validate_gradient(frame: &Frame) -> Result<(), ValidationError> {
    let center_y = frame.height / 2;

    let mut first: Option<f32> = None;
    let mut prev: Option<f32> = None;

    // Sample every 10 pixels to check for monotonic increase
    for x in (0..frame.width).step_by(10) {
        let (r, g, b) = sample(frame, x, center_y)?;

        // Calculate luminance (Y' in Rec. 601)
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        // Allow small decreases due to rounding
        if prev.is_some_and(|prev| luminance < prev - 1.0) {
            return Err(ValidationError::GradientDecreasing { x });
        }

        first.get_or_insert(luminance);
        prev = Some(luminance);
    }

    match (first, prev) {
        (Some(first), Some(last)) if last - first < 50.0 => {
            Err(ValidationError::GradientFlat(last - first))
        }
        _ => Ok(()),
    }
}

/// Validates that frames were delivered in order without drops.
///
/// Sequence numbers must increment by exactly 1 and timestamps must never
/// go backwards.
///
/// # Arguments
///
/// * `frames` - The frames to validate, in delivery order
///
/// # Returns
///
/// * `Ok(())` if the sequence is valid
/// * `Err(ValidationError)` at the first offending frame
///
/// # Errors
///
/// Returns `ValidationError` if:
/// - The frames slice is empty
/// - Sequence numbers are not consecutive
/// - A timestamp is earlier than its predecessor
pub fn validate_frame_sequence(frames: &[Frame]) -> Result<(), ValidationError> {
    if frames.is_empty() {
        return Err(ValidationError::EmptySequence);
    }

    for (offset, pair) in frames.windows(2).enumerate() {
        let [prev, curr] = pair else {
            continue;
        };
        let index = offset + 1;

        let expected = prev.sequence + 1;
        if curr.sequence != expected {
            return Err(ValidationError::SequenceGap {
                index,
                expected,
                actual: curr.sequence,
            });
        }
        if curr.timestamp < prev.timestamp {
            return Err(ValidationError::TimestampRegression(index));
        }
    }

    Ok(())
}

fn sample(frame: &Frame, x: u32, y: u32) -> Result<(u8, u8, u8), ValidationError> {
    frame
        .pixel_at(x, y)
        .ok_or(ValidationError::MissingPixel { x, y })
}

/// Check if two RGB colors match within a tolerance.
///
/// # Arguments
///
/// * `actual` - The actual RGB color
/// * `expected` - The expected RGB color
/// * `tolerance` - Maximum allowed difference per channel
///
/// # Returns
///
/// `true` if all three channels are within tolerance, `false` otherwise
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    u32::from(ar.abs_diff(er)) <= tolerance
        && u32::from(ag.abs_diff(eg)) <= tolerance
        && u32::from(ab.abs_diff(eb)) <= tolerance
}
