//! Multipart MJPEG stream service.
//!
//! A session is an explicit state machine:
//!
//! ```text
//! negotiating -> streaming -> (error | client-close) -> closed
//! ```
//!
//! Each streaming iteration acquires one frame, normalizes it to JPEG, and
//! emits boundary, part header, and payload as three separate writes, then
//! paces itself. The first failed write ends the session (a disconnected or
//! stalled client); a run of acquisition misses beyond the configured ceiling
//! ends it with an error. No frame is ever buffered ahead, and every held
//! buffer is disposed by drop on every exit path.

use std::io::Write;
use std::time::Duration;

use super::http::{write_chunked_head, ChunkedWriter};
use super::ServerState;
use crate::encode::normalize;

const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
const BOUNDARY_LINE: &[u8] = b"\r\n--frame\r\n";
/// Sleep between acquisition misses inside a session.
const MISS_SLEEP_MS: u64 = 50;

/// Why a stream session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// The peer was gone before the multipart headers went out.
    NegotiationFailed,
    /// A write failed mid-stream; routine client disconnect.
    ClientClosed,
    /// Too many consecutive acquisition misses.
    AcquisitionCeiling,
    /// A frame could not be normalized to JPEG.
    ConversionFailed,
}

enum Phase {
    Streaming,
    Closed(StreamEnd),
}

/// Drive one stream session until a terminal state.
pub fn run<W: Write>(out: &mut W, state: &ServerState) -> StreamEnd {
    // Negotiating: multipart content type, CORS, no-cache. A failure here
    // means the peer already hung up.
    let negotiated = write_chunked_head(
        out,
        200,
        STREAM_CONTENT_TYPE,
        &[("Cache-Control", "no-store, no-cache, must-revalidate")],
    );
    if negotiated.is_err() {
        return StreamEnd::NegotiationFailed;
    }

    let mut session = Session {
        out: ChunkedWriter::new(out),
        state,
        misses: 0,
    };
    let mut phase = Phase::Streaming;
    loop {
        phase = match phase {
            Phase::Streaming => session.next_frame(),
            Phase::Closed(end) => return end,
        };
    }
}

struct Session<'a, W: Write> {
    out: ChunkedWriter<&'a mut W>,
    state: &'a ServerState,
    misses: u32,
}

impl<W: Write> Session<'_, W> {
    /// One streaming iteration: acquire, normalize, emit, pace.
    fn next_frame(&mut self) -> Phase {
        let frame = match self.state.camera.acquire() {
            Ok(frame) => {
                self.misses = 0;
                frame
            }
            Err(err) => {
                self.misses += 1;
                if self.misses > self.state.stream.failure_ceiling {
                    log::warn!(
                        "stream: {} consecutive acquisition misses, giving up: {}",
                        self.misses,
                        err
                    );
                    return Phase::Closed(StreamEnd::AcquisitionCeiling);
                }
                std::thread::sleep(Duration::from_millis(MISS_SLEEP_MS));
                return Phase::Streaming;
            }
        };

        let quality = if frame.is_jpeg() {
            0
        } else {
            match self.state.camera.sensor() {
                Ok(sensor) => sensor.quality,
                Err(err) => {
                    log::warn!("stream: sensor unreadable before conversion: {}", err);
                    return Phase::Closed(StreamEnd::ConversionFailed);
                }
            }
        };
        // `normalize` releases the camera buffer itself on the conversion
        // path, including on failure.
        let buffer = match normalize(frame, quality) {
            Ok(buffer) => buffer,
            Err(err) => {
                log::warn!("stream: frame conversion failed: {}", err);
                return Phase::Closed(StreamEnd::ConversionFailed);
            }
        };

        let payload = buffer.jpeg_bytes();
        let part_header = format!(
            "Content-Type: image/jpeg\r\nContent-Length: {}\r\nX-Timestamp: {}\r\n\r\n",
            payload.len(),
            buffer.timestamp()
        );
        let sent = self
            .out
            .write_chunk(BOUNDARY_LINE)
            .and_then(|_| self.out.write_chunk(part_header.as_bytes()))
            .and_then(|_| self.out.write_chunk(payload))
            .and_then(|_| self.out.flush());
        drop(buffer);
        if let Err(err) = sent {
            log::debug!("stream: send failed, closing session: {}", err);
            return Phase::Closed(StreamEnd::ClientClosed);
        }

        let delay_ms = self.state.pacing.delay_ms();
        if delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(delay_ms));
        }
        Phase::Streaming
    }
}
