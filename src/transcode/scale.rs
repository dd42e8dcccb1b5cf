//! Picture format and size conversion
//!
//! Nearest-neighbour scaling between 4:2:0 layouts. Runs between a decoder
//! and an encoder whose expected input differs from the decoded picture.

use bytes::{BufMut, Bytes, BytesMut};

use crate::av::codec::chroma_dim as chroma;
use crate::av::{PixelFormat, VideoFrame};
use crate::error::MediaError;

/// Planar Y, U, V view of a picture
struct Planes {
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

/// Convert a picture to the given size and layout
///
/// Returns the input unchanged (cheap `Bytes` clone) when it already matches.
pub fn convert(
    frame: &VideoFrame,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
) -> Result<VideoFrame, MediaError> {
    if frame.width == width && frame.height == height && frame.pixel_format == pixel_format {
        return Ok(frame.clone());
    }
    if width == 0 || height == 0 {
        return Err(MediaError::InvalidFrame(format!(
            "cannot scale to {}x{}",
            width, height
        )));
    }

    let src = split(frame);
    let (src_cw, src_ch) = (frame.chroma_width(), frame.chroma_height());
    let (dst_cw, dst_ch) = (chroma(width), chroma(height));

    let planes = Planes {
        y: resize(
            &src.y,
            frame.width as usize,
            frame.height as usize,
            width as usize,
            height as usize,
        ),
        u: resize(&src.u, src_cw, src_ch, dst_cw, dst_ch),
        v: resize(&src.v, src_cw, src_ch, dst_cw, dst_ch),
    };

    VideoFrame::new(width, height, pixel_format, frame.time, join(planes, pixel_format))
}

fn split(frame: &VideoFrame) -> Planes {
    let y = frame.luma().to_vec();
    let chroma = frame.chroma();
    let plane = frame.chroma_width() * frame.chroma_height();

    match frame.pixel_format {
        PixelFormat::I420 => Planes {
            y,
            u: chroma[..plane].to_vec(),
            v: chroma[plane..].to_vec(),
        },
        PixelFormat::Nv12 => {
            let mut u = Vec::with_capacity(plane);
            let mut v = Vec::with_capacity(plane);
            for pair in chroma.chunks_exact(2) {
                u.push(pair[0]);
                v.push(pair[1]);
            }
            Planes { y, u, v }
        }
    }
}

fn join(planes: Planes, pixel_format: PixelFormat) -> Bytes {
    let mut out = BytesMut::with_capacity(planes.y.len() + planes.u.len() * 2);
    out.put_slice(&planes.y);

    match pixel_format {
        PixelFormat::I420 => {
            out.put_slice(&planes.u);
            out.put_slice(&planes.v);
        }
        PixelFormat::Nv12 => {
            for (u, v) in planes.u.iter().zip(&planes.v) {
                out.put_u8(*u);
                out.put_u8(*v);
            }
        }
    }

    out.freeze()
}

fn resize(src: &[u8], sw: usize, sh: usize, dw: usize, dh: usize) -> Vec<u8> {
    if sw == dw && sh == dh {
        return src.to_vec();
    }
    if sw == 0 || sh == 0 {
        return vec![0; dw * dh];
    }

    let mut out = Vec::with_capacity(dw * dh);
    for y in 0..dh {
        let row = (y * sh / dh) * sw;
        for x in 0..dw {
            out.push(src[row + x * sw / dw]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn i420(width: u32, height: u32, y: u8, u: u8, v: u8) -> VideoFrame {
        let luma = (width * height) as usize;
        let plane = chroma(width) * chroma(height);
        let mut data = vec![y; luma];
        data.extend(std::iter::repeat(u).take(plane));
        data.extend(std::iter::repeat(v).take(plane));
        VideoFrame::new(width, height, PixelFormat::I420, Duration::from_millis(40), Bytes::from(data))
            .unwrap()
    }

    #[test]
    fn test_identity_is_cheap() {
        let frame = i420(4, 4, 1, 2, 3);
        let out = convert(&frame, 4, 4, PixelFormat::I420).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn test_i420_to_nv12_interleaves() {
        let frame = i420(2, 2, 16, 100, 200);
        let out = convert(&frame, 2, 2, PixelFormat::Nv12).unwrap();

        assert_eq!(out.pixel_format, PixelFormat::Nv12);
        assert_eq!(&out.data[..], &[16, 16, 16, 16, 100, 200]);

        let back = convert(&out, 2, 2, PixelFormat::I420).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_downscale_picks_nearest() {
        let luma: Vec<u8> = (0..16).collect();
        let mut data = luma;
        data.extend([0u8; 8]);
        let frame = VideoFrame::new(4, 4, PixelFormat::I420, Duration::ZERO, Bytes::from(data)).unwrap();

        let out = convert(&frame, 2, 2, PixelFormat::I420).unwrap();
        assert_eq!(out.luma(), &[0, 2, 8, 10]);
        assert_eq!(out.time, Duration::ZERO);
    }

    #[test]
    fn test_upscale_to_target_size() {
        let frame = i420(2, 2, 50, 60, 70);
        let out = convert(&frame, 352, 240, PixelFormat::I420).unwrap();

        assert_eq!(out.data.len(), PixelFormat::I420.frame_size(352, 240));
        assert!(out.luma().iter().all(|&p| p == 50));
        assert_eq!(out.time, frame.time);
    }

    #[test]
    fn test_zero_target_rejected() {
        let frame = i420(2, 2, 0, 0, 0);
        assert!(convert(&frame, 0, 2, PixelFormat::I420).is_err());
    }
}
