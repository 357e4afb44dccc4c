//! Pixel format conversions between native capture layouts and [`PixelFormat`].

use crate::types::{chroma_plane_len, Frame, PixelFormat, Resolution};

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

/// Convert RGB values to YUV (BT.601, full range).
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));

    let y = 0.114f32.mul_add(b, 0.587f32.mul_add(g, 0.299 * r));
    let u = 0.564f32.mul_add(b - y, 128.0);
    let v = 0.713f32.mul_add(r - y, 128.0);

    (clamp_u8(y), clamp_u8(u), clamp_u8(v))
}

fn clamp_u8(val: f32) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        val.round().clamp(0.0, 255.0) as u8
    }
}

/// Converts packed YUYV (4:2:2) data to packed RGB24.
///
/// Returns `None` if `data` is shorter than `width * height * 2` bytes.
#[must_use]
pub fn yuyv_to_rgb(data: &[u8], resolution: Resolution) -> Option<Vec<u8>> {
    let pixel_count = resolution.area() as usize;
    let yuyv = data.get(..pixel_count * 2)?;

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    for chunk in yuyv.chunks_exact(4) {
        if let [y0, u, y1, v] = *chunk {
            let (r0, g0, b0) = yuv_to_rgb(y0, u, v);
            let (r1, g1, b1) = yuv_to_rgb(y1, u, v);
            rgb.extend_from_slice(&[r0, g0, b0, r1, g1, b1]);
        }
    }
    Some(rgb)
}

/// Lay out packed RGB24 pixels in the requested format.
///
/// `rgb` must hold exactly `resolution.area() * 3` bytes; shorter buffers
/// yield `None`.
#[must_use]
pub fn from_rgb(rgb: &[u8], resolution: Resolution, format: PixelFormat) -> Option<Vec<u8>> {
    let pixel_count = resolution.area() as usize;
    let rgb = rgb.get(..pixel_count * 3)?;

    let data = match format {
        PixelFormat::Rgb => rgb.to_vec(),
        PixelFormat::Bgr => rgb
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelFormat::Gray8 => rgb
            .chunks_exact(3)
            .map(|px| rgb_to_yuv(px[0], px[1], px[2]).0)
            .collect(),
        PixelFormat::Yuv420 => rgb_to_i420(rgb, resolution),
    };
    Some(data)
}

/// Convert a frame of any format to packed RGB24.
#[must_use]
pub fn to_rgb(frame: &Frame) -> Option<Vec<u8>> {
    let resolution = frame.resolution();
    let pixel_count = resolution.area() as usize;
    if frame.data.len() < frame.pixel_format.frame_size(resolution) {
        return None;
    }

    let data = match frame.pixel_format {
        PixelFormat::Rgb => frame.data.get(..pixel_count * 3)?.to_vec(),
        PixelFormat::Bgr => frame
            .data
            .chunks_exact(3)
            .take(pixel_count)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelFormat::Gray8 => frame
            .data
            .iter()
            .take(pixel_count)
            .flat_map(|&v| [v, v, v])
            .collect(),
        PixelFormat::Yuv420 => {
            let mut rgb = Vec::with_capacity(pixel_count * 3);
            for y in 0..frame.height {
                for x in 0..frame.width {
                    let (r, g, b) = frame.pixel_at(x, y)?;
                    rgb.extend_from_slice(&[r, g, b]);
                }
            }
            rgb
        }
    };
    Some(data)
}

/// Packed RGB24 to planar I420, averaging chroma over each 2x2 block.
fn rgb_to_i420(rgb: &[u8], resolution: Resolution) -> Vec<u8> {
    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let chroma_width = resolution.width.div_ceil(2) as usize;
    let chroma_len = chroma_plane_len(resolution);

    let mut y_plane = Vec::with_capacity(width * height);
    let mut u_acc = vec![0u32; chroma_len];
    let mut v_acc = vec![0u32; chroma_len];
    let mut counts = vec![0u32; chroma_len];

    for (index, px) in rgb.chunks_exact(3).enumerate() {
        let (y, u, v) = rgb_to_yuv(px[0], px[1], px[2]);
        y_plane.push(y);

        let chroma_index = (index / width / 2) * chroma_width + (index % width) / 2;
        if let (Some(u_sum), Some(v_sum), Some(count)) = (
            u_acc.get_mut(chroma_index),
            v_acc.get_mut(chroma_index),
            counts.get_mut(chroma_index),
        ) {
            *u_sum += u32::from(u);
            *v_sum += u32::from(v);
            *count += 1;
        }
    }

    let average = |sum: &u32, count: &u32| -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        {
            (sum / (*count).max(1)) as u8
        }
    };

    let mut data = y_plane;
    data.extend(u_acc.iter().zip(&counts).map(|(s, c)| average(s, c)));
    data.extend(v_acc.iter().zip(&counts).map(|(s, c)| average(s, c)));
    data
}
