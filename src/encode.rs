//! JPEG conversion boundary.
//!
//! Two shapes of the same conversion:
//! - `encode_frame` produces a full buffer, for the stream path, which needs
//!   the exact byte count before it can emit a part header.
//! - `encode_frame_into` writes through a caller-supplied writer, for the
//!   capture path, so a large frame never needs a second full-frame
//!   allocation.
//!
//! Conversion failures are never retried; the same input would fail again.

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::io::Write;

use crate::frame::{FrameBuffer, OwnedJpeg, PixelFormat, PooledFrame};
use crate::params::{QUALITY_MAX, QUALITY_MIN};

/// Map sensor quality (5..=63, lower is finer) onto the encoder's percent
/// scale (higher is finer).
pub fn quality_percent(sensor_quality: u8) -> u8 {
    let q = sensor_quality.clamp(QUALITY_MIN, QUALITY_MAX) as u32;
    (100 - q * 100 / 64).clamp(5, 95) as u8
}

/// Convert a raw frame to JPEG through `out`.
pub fn encode_frame_into<W: Write>(
    frame: &PooledFrame,
    sensor_quality: u8,
    out: &mut W,
) -> Result<()> {
    match frame.format() {
        PixelFormat::Jpeg => bail!("frame is already jpeg"),
        PixelFormat::Rgb888 => {}
    }
    let expected = (frame.width() * frame.height() * 3) as usize;
    if frame.len() != expected {
        bail!(
            "rgb frame length {} does not match {}x{}",
            frame.len(),
            frame.width(),
            frame.height()
        );
    }
    JpegEncoder::new_with_quality(out, quality_percent(sensor_quality))
        .encode(
            frame.data(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )
        .context("encode frame to jpeg")
}

/// Convert a raw frame to a single JPEG allocation.
pub fn encode_frame(frame: &PooledFrame, sensor_quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(frame.len() / 8);
    encode_frame_into(frame, sensor_quality, &mut out)?;
    Ok(out)
}

/// Normalize an acquired frame to a sendable JPEG.
///
/// JPEG frames pass through still pooled. Raw frames are converted and the
/// camera buffer is released before the owned copy is handed out, keeping the
/// checkout window as short as possible.
pub fn normalize(frame: PooledFrame, sensor_quality: u8) -> Result<FrameBuffer> {
    if frame.is_jpeg() {
        return Ok(FrameBuffer::Pooled(frame));
    }
    let timestamp = frame.timestamp();
    let encoded = encode_frame(&frame, sensor_quality);
    drop(frame);
    Ok(FrameBuffer::Owned(OwnedJpeg::new(encoded?, timestamp)))
}
