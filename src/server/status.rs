//! Read-only status and liveness reporting.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::Ordering;

use super::http::{write_empty, write_json};
use super::ServerState;

#[derive(Serialize)]
struct StatusPayload<'a> {
    framesize: u8,
    framesize_name: &'a str,
    quality: u8,
    stream_delay: u64,
    vflip: u8,
    hmirror: u8,
}

/// Handle `/status`: a JSON snapshot of the current parameter values.
pub fn handle_status<W: Write>(out: &mut W, state: &ServerState) -> Result<()> {
    let sensor = match state.camera.sensor() {
        Ok(sensor) => sensor,
        Err(err) => {
            write_empty(out, 500)?;
            return Err(err.context("read sensor state"));
        }
    };
    let payload = StatusPayload {
        framesize: sensor.framesize.index(),
        framesize_name: sensor.framesize.name(),
        quality: sensor.quality,
        stream_delay: state.pacing.delay_ms(),
        vflip: sensor.vflip as u8,
        hmirror: sensor.hmirror as u8,
    };
    let body = serde_json::to_vec(&payload).context("serialize status")?;
    write_json(out, 200, &body)?;
    Ok(())
}

#[derive(Serialize)]
struct HealthPayload<'a> {
    status: &'a str,
    camera: bool,
    wifi: bool,
    server: bool,
}

/// Handle `/health`: liveness booleans. Never fails; degraded conditions are
/// reported as `"ERROR"` with a 200.
pub fn handle_health<W: Write>(out: &mut W, state: &ServerState) -> Result<()> {
    let camera = state.camera.is_connected();
    let wifi = state.network_up.load(Ordering::Relaxed);
    let server = state.started.load(Ordering::Relaxed);
    let payload = HealthPayload {
        status: if camera && wifi && server {
            "OK"
        } else {
            "ERROR"
        },
        camera,
        wifi,
        server,
    };
    let body = serde_json::to_vec(&payload).context("serialize health")?;
    write_json(out, 200, &body)?;
    Ok(())
}
