//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Conversion of raw frames to images.
//!

use crate::camera::{CameraError, PixelFormat};
use num_traits::clamp;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImagePixelFormat {
    Mono8,
    /// Native byte order.
    Mono16,
    RGB8
}

impl ImagePixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            ImagePixelFormat::Mono8 => 1,
            ImagePixelFormat::Mono16 => 2,
            ImagePixelFormat::RGB8 => 3
        }
    }

    /// Returns the image format which preserves all information of frames in `pixel_format`.
    pub fn natural_for(pixel_format: PixelFormat) -> ImagePixelFormat {
        match pixel_format {
            PixelFormat::Y8 => ImagePixelFormat::Mono8,
            PixelFormat::Y16 => ImagePixelFormat::Mono16,
            PixelFormat::YUV411 | PixelFormat::YUV422 | PixelFormat::YUV444
                | PixelFormat::RGB8 | PixelFormat::RGB16 => ImagePixelFormat::RGB8
        }
    }
}

/// Image with contiguous rows (no padding).
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    pixel_format: ImagePixelFormat,
    pixels: Vec<u8>
}

impl Image {
    pub fn new(width: u32, height: u32, pixel_format: ImagePixelFormat) -> Image {
        let num_bytes = width as usize * height as usize * pixel_format.bytes_per_pixel();
        Image{ width, height, pixel_format, pixels: vec![0; num_bytes] }
    }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    pub fn pixel_format(&self) -> ImagePixelFormat { self.pixel_format }

    pub fn pixels(&self) -> &[u8] { &self.pixels }

    pub fn pixels_mut(&mut self) -> &mut [u8] { &mut self.pixels }

    pub fn line(&self, y: u32) -> &[u8] {
        let line_len = self.width as usize * self.pixel_format.bytes_per_pixel();
        let start = y as usize * line_len;
        &self.pixels[start..start + line_len]
    }

    /// Returns the value of a `Mono16` pixel.
    pub fn mono16(&self, x: u32, y: u32) -> u16 {
        let idx = 2 * (y as usize * self.width as usize + x as usize);
        u16::from_ne_bytes([self.pixels[idx], self.pixels[idx + 1]])
    }

    /// Changes the size and format; contents become unspecified.
    pub fn reset(&mut self, width: u32, height: u32, pixel_format: ImagePixelFormat) {
        self.width = width;
        self.height = height;
        self.pixel_format = pixel_format;
        self.pixels.resize(width as usize * height as usize * pixel_format.bytes_per_pixel(), 0);
    }
}

/// Returns the raw frame size in bytes.
pub fn raw_frame_size(pixel_format: PixelFormat, width: u32, height: u32) -> usize {
    width as usize * height as usize * pixel_format.bits_per_pixel() as usize / 8
}

/// BT.601 full range.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let to_u8 = |value: f32| clamp(value.round(), 0.0, 255.0) as u8;

    [
        to_u8(y + 1.402 * v),
        to_u8(y - 0.344136 * u - 0.714136 * v),
        to_u8(y + 1.772 * u)
    ]
}

/// Number of pixels sharing a chroma sample and the byte layout of such a group.
///
/// Returns (pixels per group, group length, U offset, V offset, Y offsets).
fn yuv_layout(pixel_format: PixelFormat) -> Option<(usize, usize, usize, usize, &'static [usize])> {
    match pixel_format {
        // U Y V
        PixelFormat::YUV444 => Some((1, 3, 0, 2, &[1])),
        // U Y0 V Y1
        PixelFormat::YUV422 => Some((2, 4, 0, 2, &[1, 3])),
        // U Y0 Y1 V Y2 Y3
        PixelFormat::YUV411 => Some((4, 6, 0, 3, &[1, 2, 4, 5])),
        _ => None
    }
}

fn convert_yuv(
    dest: &mut [u8],
    dest_format: ImagePixelFormat,
    pixel_format: PixelFormat,
    raw: &[u8]
) -> Result<(), CameraError> {
    let (group_pixels, group_len, u_offset, v_offset, y_offsets) = match yuv_layout(pixel_format) {
        Some(layout) => layout,
        None => return Err(CameraError::UnsupportedCapability(format!("{:?} is not a YUV format", pixel_format)))
    };

    match dest_format {
        ImagePixelFormat::RGB8 => {
            for (group, out) in raw.chunks_exact(group_len).zip(dest.chunks_exact_mut(3 * group_pixels)) {
                let u = group[u_offset];
                let v = group[v_offset];
                for (y_offset, rgb) in y_offsets.iter().zip(out.chunks_exact_mut(3)) {
                    rgb.copy_from_slice(&yuv_to_rgb(group[*y_offset], u, v));
                }
            }
        },

        ImagePixelFormat::Mono8 => {
            for (group, out) in raw.chunks_exact(group_len).zip(dest.chunks_exact_mut(group_pixels)) {
                for (y_offset, value) in y_offsets.iter().zip(out.iter_mut()) {
                    *value = group[*y_offset];
                }
            }
        },

        ImagePixelFormat::Mono16 => return Err(CameraError::UnsupportedCapability(
            format!("conversion from {:?} to {:?}", pixel_format, dest_format)
        ))
    }

    Ok(())
}

/// Checks if `convert` supports conversion from `pixel_format` to `dest_format`.
pub fn supports_conversion(pixel_format: PixelFormat, dest_format: ImagePixelFormat) -> bool {
    use ImagePixelFormat as I;
    use PixelFormat as P;

    matches!(
        (pixel_format, dest_format),
        (P::Y8, I::Mono8 | I::RGB8)
            | (P::RGB8, I::RGB8)
            | (P::RGB16, I::RGB8)
            | (P::Y16, I::Mono16 | I::Mono8)
            | (P::YUV411 | P::YUV422 | P::YUV444, I::RGB8 | I::Mono8)
    )
}

/// Converts a raw frame to `dest`.
///
/// `dest` is resized to `width` x `height`; its pixel format selects the conversion.
/// On failure `dest` is left unchanged.
///
/// # Parameters
///
/// * `pixel_format` - Format of `raw`; multi-byte values are big-endian as sent by the camera,
///     except RGB16, whose components are taken as little-endian.
///
pub fn convert(
    dest: &mut Image,
    pixel_format: PixelFormat,
    raw: &[u8],
    width: u32,
    height: u32
) -> Result<(), CameraError> {
    let expected = raw_frame_size(pixel_format, width, height);
    if raw.len() != expected {
        return Err(CameraError::DimensionMismatch{ expected, actual: raw.len() });
    }

    let dest_format = dest.pixel_format();
    let unsupported = || Err(CameraError::UnsupportedCapability(
        format!("conversion from {:?} to {:?}", pixel_format, dest_format)
    ));
    if !supports_conversion(pixel_format, dest_format) {
        return unsupported();
    }
    if let Some((group_pixels, ..)) = yuv_layout(pixel_format) {
        if width as usize % group_pixels != 0 {
            return Err(CameraError::UnsupportedCapability(format!(
                "width {} of a {:?} frame is not a multiple of {}", width, pixel_format, group_pixels
            )));
        }
    }

    dest.reset(width, height, dest_format);
    let out = dest.pixels_mut();

    match (pixel_format, dest_format) {
        (PixelFormat::Y8, ImagePixelFormat::Mono8) | (PixelFormat::RGB8, ImagePixelFormat::RGB8) => {
            out.copy_from_slice(raw);
        },

        (PixelFormat::Y8, ImagePixelFormat::RGB8) => {
            for (value, rgb) in raw.iter().zip(out.chunks_exact_mut(3)) {
                rgb.fill(*value);
            }
        },

        (PixelFormat::RGB16, ImagePixelFormat::RGB8) => {
            for (component, value) in raw.chunks_exact(2).zip(out.iter_mut()) {
                *value = component[0];
            }
        },

        (PixelFormat::Y16, ImagePixelFormat::Mono16) => {
            for (input, output) in raw.chunks_exact(2).zip(out.chunks_exact_mut(2)) {
                output.copy_from_slice(&u16::from_be_bytes([input[0], input[1]]).to_ne_bytes());
            }
        },

        (PixelFormat::Y16, ImagePixelFormat::Mono8) => {
            for (input, value) in raw.chunks_exact(2).zip(out.iter_mut()) {
                *value = input[0];
            }
        },

        (PixelFormat::YUV411, _) | (PixelFormat::YUV422, _) | (PixelFormat::YUV444, _) => {
            convert_yuv(out, dest_format, pixel_format, raw)?;
        },

        _ => return unsupported()
    }

    Ok(())
}
