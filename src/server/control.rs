//! Runtime control service: `/control?var=<name>&val=<value>`.
//!
//! Exactly one named parameter change per request. Unknown variable names are
//! a client error and change nothing; numeric values are clamped into range
//! rather than rejected. Sensor-affecting changes go through the camera and a
//! rejection there is a server error; pacing is process-local and cannot
//! fail.

use anyhow::Result;
use std::io::Write;

use super::http::{write_empty, HttpRequest};
use super::ServerState;
use crate::camera::SensorSetting;
use crate::params::{clamp_flag, clamp_quality, FrameSize};

pub fn handle<W: Write>(out: &mut W, request: &HttpRequest, state: &ServerState) -> Result<()> {
    let (var, val) = match (request.query_param("var"), request.query_param("val")) {
        (Some(var), Some(val)) => (var, val),
        _ => {
            write_empty(out, 404)?;
            return Ok(());
        }
    };

    // Numeric values follow the sensor's lenient convention: unparsable
    // input reads as 0 and is then clamped like any other number.
    let numeric = val.trim().parse::<i64>().unwrap_or(0);

    let setting = match var {
        "framesize" => {
            let requested = FrameSize::parse(val);
            let effective = requested.clamp_for_memory(state.extended_memory);
            if effective != requested {
                log::warn!(
                    "framesize {} needs extended memory, clamping to {}",
                    requested.name(),
                    effective.name()
                );
            }
            Some(SensorSetting::FrameSize(effective))
        }
        "quality" => Some(SensorSetting::Quality(clamp_quality(numeric))),
        "vflip" => Some(SensorSetting::VFlip(clamp_flag(numeric))),
        "hmirror" => Some(SensorSetting::HMirror(clamp_flag(numeric))),
        "stream_delay" => {
            let effective = state.pacing.set(numeric);
            log::info!("stream pacing set to {} ms", effective);
            None
        }
        _ => {
            write_empty(out, 404)?;
            return Ok(());
        }
    };

    if let Some(setting) = setting {
        if let Err(err) = state.camera.apply(setting) {
            write_empty(out, 500)?;
            return Err(err.context("sensor rejected setting"));
        }
    }
    write_empty(out, 200)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{FrameSource, SyntheticCamera};
    use crate::frame::PixelFormat;
    use crate::params::FrameSize;
    use crate::server::test_state;
    use crate::server::http::read_request;
    use std::sync::Arc;

    fn request(target: &str) -> HttpRequest {
        let raw = format!("GET {} HTTP/1.1\r\n\r\n", target);
        read_request(&mut raw.as_bytes()).unwrap()
    }

    fn status_of(out: &[u8]) -> u16 {
        let text = String::from_utf8_lossy(out);
        text.split_whitespace().nth(1).unwrap().parse().unwrap()
    }

    fn camera() -> Arc<SyntheticCamera> {
        Arc::new(SyntheticCamera::new(PixelFormat::Jpeg, FrameSize::Svga, 12, 2))
    }

    #[test]
    fn quality_is_clamped_not_rejected() {
        let camera = camera();
        let state = test_state(camera.clone());

        for (value, expected) in [("999", 63), ("-4", 5), ("0", 5), ("20", 20)] {
            let mut out = Vec::new();
            handle(
                &mut out,
                &request(&format!("/control?var=quality&val={}", value)),
                &state,
            )
            .unwrap();
            assert_eq!(status_of(&out), 200);
            assert_eq!(camera.sensor().unwrap().quality, expected);
        }
    }

    #[test]
    fn framesize_clamps_without_extended_memory() {
        let camera = camera();
        let state = test_state(camera.clone());
        assert!(!state.extended_memory);

        let mut out = Vec::new();
        handle(&mut out, &request("/control?var=framesize&val=fhd"), &state).unwrap();
        assert_eq!(status_of(&out), 200);
        assert_eq!(camera.sensor().unwrap().framesize, FrameSize::Svga);
    }

    #[test]
    fn unknown_var_is_client_error_with_no_state_change() {
        let camera = camera();
        let state = test_state(camera.clone());
        let before = camera.sensor().unwrap();

        let mut out = Vec::new();
        handle(&mut out, &request("/control?var=zoom&val=3"), &state).unwrap();
        assert_eq!(status_of(&out), 404);

        let after = camera.sensor().unwrap();
        assert_eq!(after.quality, before.quality);
        assert_eq!(after.framesize, before.framesize);
        assert_eq!(state.pacing.delay_ms(), 33);
    }

    #[test]
    fn missing_query_is_client_error() {
        let state = test_state(camera());
        let mut out = Vec::new();
        handle(&mut out, &request("/control"), &state).unwrap();
        assert_eq!(status_of(&out), 404);

        let mut out = Vec::new();
        handle(&mut out, &request("/control?var=quality"), &state).unwrap();
        assert_eq!(status_of(&out), 404);
    }

    #[test]
    fn stream_delay_clamps_to_pacing_floor() {
        let state = test_state(camera());
        let mut out = Vec::new();
        handle(
            &mut out,
            &request("/control?var=stream_delay&val=1"),
            &state,
        )
        .unwrap();
        assert_eq!(status_of(&out), 200);
        assert_eq!(state.pacing.delay_ms(), state.pacing.floor_ms());
    }

    #[test]
    fn sensor_rejection_is_server_error() {
        let camera = camera();
        camera.reject_settings(true);
        let state = test_state(camera);

        let mut out = Vec::new();
        assert!(handle(&mut out, &request("/control?var=vflip&val=1"), &state).is_err());
        assert_eq!(status_of(&out), 500);
    }

    #[test]
    fn orientation_flags_clamp_to_binary() {
        let camera = camera();
        let state = test_state(camera.clone());

        let mut out = Vec::new();
        handle(&mut out, &request("/control?var=vflip&val=7"), &state).unwrap();
        assert!(camera.sensor().unwrap().vflip);

        let mut out = Vec::new();
        handle(&mut out, &request("/control?var=hmirror&val=-2"), &state).unwrap();
        assert_eq!(status_of(&out), 200);
        assert!(!camera.sensor().unwrap().hmirror);
    }
}
