//! QR decode primitive.
//!
//! The primitive is a pure function from an RGBA pixel buffer to an optional
//! [`DecodeResult`]. "No symbol in this frame" is `Ok(None)`; only a buffer the
//! primitive cannot interpret is an error.

use serde::Deserialize;
use tracing::trace;

use crate::traits::FourCC;

/// Channels per pixel in buffers handed to the decoder.
pub const CHANNELS: usize = 4;

/// Whether to look for light-on-dark symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InversionMode {
    /// Only dark-on-light symbols.
    #[default]
    DontInvert,
    /// Only light-on-dark symbols.
    OnlyInvert,
    /// Normal pass first, then inverted.
    AttemptBoth,
    /// Inverted pass first, then normal.
    InvertFirst,
}

impl InversionMode {
    /// Passes to run, in order. `true` means inverted.
    #[must_use]
    pub const fn passes(self) -> &'static [bool] {
        match self {
            Self::DontInvert => &[false],
            Self::OnlyInvert => &[true],
            Self::AttemptBoth => &[false, true],
            Self::InvertFirst => &[true, false],
        }
    }
}

/// A corner of a located symbol, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    /// Horizontal coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
}

/// Corner points of a located symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Top-left corner.
    pub top_left: Point,
    /// Top-right corner.
    pub top_right: Point,
    /// Bottom-right corner.
    pub bottom_right: Point,
    /// Bottom-left corner.
    pub bottom_left: Point,
}

/// Output of a successful detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeResult {
    /// Payload text. Never empty for results the scanner reports.
    pub payload: String,
    /// Where the symbol was found.
    pub location: Option<Location>,
    /// Payload bytes as stored in the symbol.
    pub raw: Option<Vec<u8>>,
    /// Symbol version (1-40) when known.
    pub version: Option<usize>,
    /// Error correction level when known.
    pub ecc_level: Option<u16>,
}

impl DecodeResult {
    /// A result carrying only payload text.
    #[must_use]
    pub fn from_payload<T: Into<String>>(payload: T) -> Self {
        Self {
            payload: payload.into(),
            location: None,
            raw: None,
            version: None,
            ecc_level: None,
        }
    }
}

/// The decoder could not interpret the buffer it was given.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Buffer length does not match the stated dimensions.
    #[error("malformed pixel buffer: expected {expected} bytes, got {actual}")]
    MalformedBuffer {
        /// Bytes required by the dimensions.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// A zero dimension.
    #[error("empty frame geometry {width}x{height}")]
    EmptyFrame {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
    },
    /// The camera delivered a pixel format the frame buffer cannot convert.
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(FourCC),
    /// YUYV shares chroma between pixel pairs, so rows need an even width.
    #[error("YUYV frame width {0} is odd")]
    OddWidth(u32),
}

/// Extracts a symbol payload from pixel data.
pub trait DecodePrimitive {
    /// Decode an RGBA buffer of `width * height * 4` bytes, row-major.
    fn decode(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        inversion: InversionMode,
    ) -> Result<Option<DecodeResult>, DecodeError>;
}

/// Decode primitive backed by the rqrr crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RqrrDecoder;

impl RqrrDecoder {
    /// Create a decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DecodePrimitive for RqrrDecoder {
    fn decode(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        inversion: InversionMode,
    ) -> Result<Option<DecodeResult>, DecodeError> {
        check_shape(pixels, width, height)?;
        let (w, h) = (width as usize, height as usize);

        for &inverted in inversion.passes() {
            let mut image = rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| {
                let start = (y * w + x) * CHANNELS;
                let value = pixels.get(start..start + CHANNELS).map_or(0, luma);
                if inverted {
                    255 - value
                } else {
                    value
                }
            });

            for grid in image.detect_grids() {
                let mut raw = Vec::new();
                let meta = match grid.decode_to(&mut raw) {
                    Ok(meta) => meta,
                    Err(err) => {
                        trace!(error = %err, inverted, "grid located but not decodable");
                        continue;
                    }
                };
                if raw.is_empty() {
                    continue;
                }

                let payload = String::from_utf8_lossy(&raw).into_owned();
                let point = |p: &rqrr::Point| Point { x: p.x, y: p.y };
                let [top_left, top_right, bottom_right, bottom_left] = &grid.bounds;

                return Ok(Some(DecodeResult {
                    payload,
                    location: Some(Location {
                        top_left: point(top_left),
                        top_right: point(top_right),
                        bottom_right: point(bottom_right),
                        bottom_left: point(bottom_left),
                    }),
                    raw: Some(raw),
                    version: Some(meta.version.0),
                    ecc_level: Some(meta.ecc_level),
                }));
            }
        }

        Ok(None)
    }
}

/// Reject buffers whose length does not match `width * height` RGBA pixels.
fn check_shape(pixels: &[u8], width: u32, height: u32) -> Result<(), DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::EmptyFrame { width, height });
    }
    let expected = width as usize * height as usize * CHANNELS;
    if pixels.len() != expected {
        return Err(DecodeError::MalformedBuffer {
            expected,
            actual: pixels.len(),
        });
    }
    Ok(())
}

/// BT.601 luma of one RGBA pixel.
fn luma(px: &[u8]) -> u8 {
    match *px {
        [r, g, b, _] => {
            let weighted = 299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b);
            #[allow(clippy::cast_possible_truncation)]
            {
                (weighted / 1000) as u8
            }
        }
        _ => 0,
    }
}
