//! Reusable RGBA frame buffer.

use crate::decode::{DecodeError, CHANNELS};
use crate::traits::{yuv_to_rgb, Format, FourCC, Frame};

/// RGBA pixel storage reused across scan iterations.
///
/// The allocation only grows; shrinking the geometry keeps capacity.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            data: Vec::new(),
        }
    }

    /// Current width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Current height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// RGBA bytes, `width * height * 4` long.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Whether the buffer holds no geometry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Match the buffer to a frame geometry. Returns `true` if it changed.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == self.width && height == self.height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.data
            .resize(width as usize * height as usize * CHANNELS, 0);
        true
    }

    /// Drop the geometry and pixel contents.
    pub fn clear(&mut self) {
        self.width = 0;
        self.height = 0;
        self.data.clear();
    }

    /// Convert a camera frame into the buffer.
    ///
    /// The buffer must already match `format`'s geometry.
    pub fn fill(&mut self, frame: &Frame, format: &Format) -> Result<(), DecodeError> {
        if !format.has_geometry() {
            return Err(DecodeError::EmptyFrame {
                width: format.width,
                height: format.height,
            });
        }
        if format.width != self.width || format.height != self.height {
            return Err(DecodeError::MalformedBuffer {
                expected: self.data.len(),
                actual: format.width as usize * format.height as usize * CHANNELS,
            });
        }
        let Some(bpp) = format.fourcc.bytes_per_pixel() else {
            return Err(DecodeError::UnsupportedFormat(format.fourcc));
        };
        if format.fourcc == FourCC::YUYV && format.width % 2 != 0 {
            return Err(DecodeError::OddWidth(format.width));
        }

        let width = format.width as usize;
        let row_bytes = width * bpp as usize;
        let stride = (format.stride as usize).max(row_bytes);
        let expected = stride * (format.height as usize - 1) + row_bytes;
        if frame.data.len() < expected {
            return Err(DecodeError::MalformedBuffer {
                expected,
                actual: frame.data.len(),
            });
        }

        let rows = frame
            .data
            .chunks(stride)
            .zip(self.data.chunks_exact_mut(width * CHANNELS));

        match format.fourcc {
            FourCC::YUYV => {
                for (src, dst) in rows {
                    fill_yuyv_row(src, dst);
                }
            }
            FourCC::RGB3 => {
                for (src, dst) in rows {
                    fill_rgb_row(src, dst);
                }
            }
            other => return Err(DecodeError::UnsupportedFormat(other)),
        }

        Ok(())
    }
}

fn fill_yuyv_row(src: &[u8], dst: &mut [u8]) {
    // [Y0 U Y1 V] becomes two RGBA pixels
    for (yuyv, out) in src.chunks_exact(4).zip(dst.chunks_mut(2 * CHANNELS)) {
        if let [y0, u, y1, v] = *yuyv {
            let (r0, g0, b0) = yuv_to_rgb(y0, u, v);
            let (r1, g1, b1) = yuv_to_rgb(y1, u, v);
            for (slot, value) in out.iter_mut().zip([r0, g0, b0, 255, r1, g1, b1, 255]) {
                *slot = value;
            }
        }
    }
}

fn fill_rgb_row(src: &[u8], dst: &mut [u8]) {
    for (rgb, out) in src.chunks_exact(3).zip(dst.chunks_exact_mut(CHANNELS)) {
        if let [r, g, b] = *rgb {
            out.copy_from_slice(&[r, g, b, 255]);
        }
    }
}
