//! Single-frame capture service.
//!
//! One request, one fresh JPEG. Transient acquisition misses are absorbed by
//! a bounded retry loop; the client sees a 500 only after the retry budget is
//! spent. The camera buffer is held for the duration of this handler only and
//! its release is RAII, so no exit path can leak a checkout.

use anyhow::{Context, Result};
use std::io::Write;
use std::time::Duration;

use super::http::{write_chunked_head, write_empty, write_response, ChunkedWriter, NO_CACHE_HEADERS};
use super::ServerState;
use crate::encode::encode_frame_into;
use crate::frame::PooledFrame;

const CAPTURE_HEADERS: [(&str, &str); 4] = [
    ("Content-Disposition", "inline; filename=capture.jpg"),
    NO_CACHE_HEADERS[0],
    NO_CACHE_HEADERS[1],
    NO_CACHE_HEADERS[2],
];

/// Acquire one frame, retrying transient misses with a fixed backoff.
fn acquire_with_retry(state: &ServerState) -> Result<PooledFrame> {
    let mut last_err = None;
    for attempt in 0..state.capture.retries {
        match state.camera.acquire() {
            Ok(frame) => return Ok(frame),
            Err(err) => {
                log::debug!("capture acquire attempt {} missed: {}", attempt + 1, err);
                last_err = Some(err);
            }
        }
        if attempt + 1 < state.capture.retries {
            std::thread::sleep(Duration::from_millis(state.capture.retry_delay_ms));
        }
    }
    Err(last_err
        .map(|err| err.context("capture retry budget exhausted"))
        .unwrap_or_else(|| anyhow::anyhow!("capture retry budget exhausted")))
}

/// Handle `/capture` and `/snapshot`.
pub fn handle<W: Write>(out: &mut W, state: &ServerState) -> Result<()> {
    let frame = match acquire_with_retry(state) {
        Ok(frame) => frame,
        Err(err) => {
            write_empty(out, 500)?;
            return Err(err);
        }
    };

    if frame.is_jpeg() {
        write_response(out, 200, "image/jpeg", &CAPTURE_HEADERS, frame.data())
            .context("send captured jpeg")?;
        return Ok(());
    }

    // Raw frame: stream the conversion so a large frame never needs a second
    // full-frame allocation. The quality knob lives on the sensor.
    let quality = match state.camera.sensor() {
        Ok(sensor) => sensor.quality,
        Err(err) => {
            write_empty(out, 500)?;
            return Err(err.context("read sensor state for capture"));
        }
    };

    write_chunked_head(out, 200, "image/jpeg", &CAPTURE_HEADERS)?;
    let mut chunked = ChunkedWriter::new(&mut *out);
    encode_frame_into(&frame, quality, &mut chunked).context("convert captured frame")?;
    drop(frame);
    chunked.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{FrameSource, SyntheticCamera};
    use crate::frame::PixelFormat;
    use crate::params::FrameSize;
    use crate::server::test_state;
    use std::sync::Arc;

    #[test]
    fn capture_succeeds_within_retry_budget() {
        let camera = Arc::new(SyntheticCamera::new(PixelFormat::Jpeg, FrameSize::Qvga, 12, 2));
        camera.fail_next(2);
        let state = test_state(camera.clone());

        let mut out = Vec::new();
        handle(&mut out, &state).unwrap();

        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: image/jpeg"));
        assert!(out.ends_with(&[0xFF, 0xD9]));
        assert_eq!(camera.outstanding(), 0);
    }

    #[test]
    fn capture_reports_500_after_budget_exhausted() {
        let camera = Arc::new(SyntheticCamera::new(PixelFormat::Jpeg, FrameSize::Qvga, 12, 2));
        camera.fail_next(10);
        let state = test_state(camera.clone());

        let mut out = Vec::new();
        assert!(handle(&mut out, &state).is_err());

        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 500"));
        assert_eq!(camera.outstanding(), 0);
    }

    #[test]
    fn raw_frames_are_streamed_as_chunked_jpeg() {
        let camera = Arc::new(SyntheticCamera::new(
            PixelFormat::Rgb888,
            FrameSize::Qqvga,
            12,
            2,
        ));
        let state = test_state(camera.clone());

        let mut out = Vec::new();
        handle(&mut out, &state).unwrap();

        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Transfer-Encoding: chunked"));
        assert!(out.ends_with(b"0\r\n\r\n"));
        assert_eq!(camera.outstanding(), 0);
    }

    #[test]
    fn checkout_count_is_balanced_across_outcomes() {
        let camera = Arc::new(SyntheticCamera::new(PixelFormat::Jpeg, FrameSize::Qvga, 12, 2));
        let state = test_state(camera.clone());

        for scripted_failures in [0usize, 2, 10] {
            camera.fail_next(scripted_failures);
            let before = camera.outstanding();
            let mut out = Vec::new();
            let _ = handle(&mut out, &state);
            assert_eq!(camera.outstanding(), before);
        }
    }
}
