//! Decoded raw pictures

use std::time::Duration;

use bytes::Bytes;

use super::codec::{chroma_dim, PixelFormat};
use crate::error::MediaError;

/// A decoded video picture
///
/// Plane data is stored contiguously in the layout of `pixel_format`
/// (for `I420`: Y, U, V; for `Nv12`: Y, interleaved UV).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Presentation time
    pub time: Duration,
    pub data: Bytes,
}

impl VideoFrame {
    /// Wrap picture data, validating its length against the layout
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        time: Duration,
        data: Bytes,
    ) -> Result<Self, MediaError> {
        let expected = pixel_format.frame_size(width, height);
        if data.len() != expected {
            return Err(MediaError::InvalidFrame(format!(
                "{}x{} {} needs {} bytes, got {}",
                width,
                height,
                pixel_format,
                expected,
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            pixel_format,
            time,
            data,
        })
    }

    /// Luma plane
    pub fn luma(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    /// Everything after the luma plane
    pub fn chroma(&self) -> &[u8] {
        &self.data[self.luma_len()..]
    }

    /// Width of a chroma plane row, in samples
    pub fn chroma_width(&self) -> usize {
        chroma_dim(self.width)
    }

    /// Height of a chroma plane, in rows
    pub fn chroma_height(&self) -> usize {
        chroma_dim(self.height)
    }

    fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_planes() {
        let data: Vec<u8> = (0..PixelFormat::I420.frame_size(4, 2) as u8).collect();
        let frame = VideoFrame::new(4, 2, PixelFormat::I420, Duration::ZERO, Bytes::from(data))
            .unwrap();

        assert_eq!(frame.luma().len(), 8);
        assert_eq!(frame.chroma().len(), 4);
        assert_eq!(frame.chroma_width(), 2);
        assert_eq!(frame.chroma_height(), 1);
    }

    #[test]
    fn test_frame_size_mismatch() {
        let result = VideoFrame::new(
            4,
            4,
            PixelFormat::Nv12,
            Duration::ZERO,
            Bytes::from_static(&[0u8; 10]),
        );
        assert!(matches!(result, Err(MediaError::InvalidFrame(_))));
    }
}
