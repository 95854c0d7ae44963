// src/frame.rs

//! Picture snapshots and their flat payload encoding.
//!
//! A [`Frame`] is what crosses the process boundary on every `show()` or
//! `repaint()`: a title, the picture dimensions and a row-major RGB raster.
//! Frames are immutable once built. The producer creates a new one per call,
//! so nothing it does to the picture afterwards can reach the display.
//!
//! Payload layout (all integers big-endian):
//!
//! | field        | size                    |
//! |--------------|-------------------------|
//! | title length | 4 bytes                 |
//! | title        | `title length`, UTF-8   |
//! | width        | 4 bytes                 |
//! | height       | 4 bytes                 |
//! | pixels       | `width * height * 3`    |

use thiserror::Error;

/// Channels per pixel: red, green, blue.
pub const BYTES_PER_PIXEL: usize = 3;

const TITLE_LEN_SIZE: usize = 4;
const DIMENSION_SIZE: usize = 4;

/// Reasons a frame cannot be built or a payload cannot be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame dimensions must be positive, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },

    #[error("frame of {width}x{height} pixels is too large to address")]
    TooLarge { width: u32, height: u32 },

    #[error("pixel buffer holds {actual} bytes but {width}x{height} RGB needs {expected}")]
    PixelCountMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("frame payload truncated: {field} needs {needed} bytes at offset {offset}, {available} left")]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("frame title is not valid UTF-8")]
    InvalidTitle,
}

/// An immutable picture snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    title: String,
    width: u32,
    height: u32,
    pixels: Box<[u8]>,
}

impl Frame {
    /// Builds a frame, checking that `pixels` holds exactly one RGB triple per
    /// pixel.
    pub fn new(
        title: impl Into<String>,
        width: u32,
        height: u32,
        pixels: impl Into<Box<[u8]>>,
    ) -> Result<Self, FrameError> {
        let pixels = pixels.into();
        let expected = raster_len(width, height)?;
        if pixels.len() != expected {
            return Err(FrameError::PixelCountMismatch {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            title: title.into(),
            width,
            height,
            pixels,
        })
    }

    /// Builds a frame from parts whose sizes the caller already keeps
    /// consistent.
    pub(crate) fn from_validated(title: String, width: u32, height: u32, pixels: Box<[u8]>) -> Self {
        debug_assert_eq!(raster_len(width, height).ok(), Some(pixels.len()));
        Self {
            title,
            width,
            height,
            pixels,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Splits the frame into `(title, width, height, pixels)` without copying
    /// the raster.
    pub fn into_parts(self) -> (String, u32, u32, Box<[u8]>) {
        (self.title, self.width, self.height, self.pixels)
    }

    /// Serializes the frame into the flat payload layout.
    pub fn encode(&self) -> Vec<u8> {
        let title = self.title.as_bytes();
        let mut out = Vec::with_capacity(
            TITLE_LEN_SIZE + title.len() + 2 * DIMENSION_SIZE + self.pixels.len(),
        );
        out.extend_from_slice(&(title.len() as u32).to_be_bytes());
        out.extend_from_slice(title);
        out.extend_from_slice(&self.width.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.pixels);
        out
    }

    /// Parses a payload produced by [`Frame::encode`].
    ///
    /// Every length is checked against the bytes actually present, so a
    /// truncated or corrupted payload yields an error instead of a panic or a
    /// huge allocation.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut cursor = Cursor { bytes, offset: 0 };

        let title_len = cursor.read_u32("title length")? as usize;
        let title = cursor.take("title", title_len)?;
        let title = std::str::from_utf8(title)
            .map_err(|_| FrameError::InvalidTitle)?
            .to_owned();
        let width = cursor.read_u32("width")?;
        let height = cursor.read_u32("height")?;
        let raster = raster_len(width, height)?;
        let pixels = cursor.take("pixels", raster)?;

        if cursor.remaining() != 0 {
            return Err(FrameError::PixelCountMismatch {
                width,
                height,
                expected: raster,
                actual: raster + cursor.remaining(),
            });
        }

        Ok(Self {
            title,
            width,
            height,
            pixels: pixels.into(),
        })
    }
}

/// The encoded form of a frame as it travels through the channel.
///
/// The channel never decodes payloads; that happens on the display's event
/// loop so a bad payload costs one dropped frame and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePayload(Vec<u8>);

impl FramePayload {
    pub fn encode(frame: &Frame) -> Self {
        Self(frame.encode())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn decode(&self) -> Result<Frame, FrameError> {
        Frame::decode(&self.0)
    }
}

impl From<&Frame> for FramePayload {
    fn from(frame: &Frame) -> Self {
        Self::encode(frame)
    }
}

/// Number of raster bytes for a `width x height` RGB image.
pub fn raster_len(width: u32, height: u32) -> Result<usize, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::EmptyDimensions { width, height });
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
        .ok_or(FrameError::TooLarge { width, height })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, field: &'static str, needed: usize) -> Result<&'a [u8], FrameError> {
        if needed > self.remaining() {
            return Err(FrameError::Truncated {
                field,
                offset: self.offset,
                needed,
                available: self.remaining(),
            });
        }
        let bytes: &'a [u8] = self.bytes;
        let slice = &bytes[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, FrameError> {
        let bytes = self.take(field, 4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(width: u32, height: u32) -> Frame {
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                pixels.extend_from_slice(&[v, x as u8, y as u8]);
            }
        }
        Frame::new("checkers", width, height, pixels).unwrap()
    }

    #[test]
    fn it_should_decode_what_it_encodes() {
        let frame = checkerboard(5, 3);
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn it_should_keep_non_ascii_titles() {
        let frame = Frame::new("Café ☕", 1, 1, vec![1, 2, 3]).unwrap();
        let decoded = FramePayload::encode(&frame).decode().unwrap();
        assert_eq!(decoded.title(), "Café ☕");
    }

    #[test]
    fn it_should_reject_zero_dimensions() {
        assert_eq!(
            Frame::new("empty", 0, 4, Vec::new()),
            Err(FrameError::EmptyDimensions {
                width: 0,
                height: 4
            })
        );
    }

    #[test]
    fn it_should_reject_a_raster_of_the_wrong_size() {
        let err = Frame::new("short", 2, 2, vec![0; 11]).unwrap_err();
        assert_eq!(
            err,
            FrameError::PixelCountMismatch {
                width: 2,
                height: 2,
                expected: 12,
                actual: 11
            }
        );
    }

    #[test]
    fn it_should_report_truncated_pixels() {
        let mut bytes = checkerboard(4, 4).encode();
        bytes.truncate(bytes.len() - 7);
        match Frame::decode(&bytes) {
            Err(FrameError::Truncated { field, .. }) => assert_eq!(field, "pixels"),
            other => panic!("expected truncated pixels, got {:?}", other),
        }
    }

    #[test]
    fn it_should_report_a_title_length_past_the_end() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1000u32.to_be_bytes());
        bytes.extend_from_slice(b"abc");
        match Frame::decode(&bytes) {
            Err(FrameError::Truncated { field, needed, .. }) => {
                assert_eq!(field, "title");
                assert_eq!(needed, 1000);
            }
            other => panic!("expected truncated title, got {:?}", other),
        }
    }

    #[test]
    fn it_should_reject_invalid_utf8_titles() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0]);
        assert_eq!(Frame::decode(&bytes), Err(FrameError::InvalidTitle));
    }

    #[test]
    fn it_should_reject_trailing_bytes() {
        let mut bytes = checkerboard(2, 2).encode();
        bytes.push(9);
        assert!(matches!(
            Frame::decode(&bytes),
            Err(FrameError::PixelCountMismatch { actual: 13, .. })
        ));
    }

    #[test]
    fn it_should_reject_an_empty_payload() {
        assert!(matches!(
            FramePayload::from_bytes(Vec::new()).decode(),
            Err(FrameError::Truncated {
                field: "title length",
                ..
            })
        ));
    }
}
