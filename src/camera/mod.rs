//! Camera backends (the frame source boundary).
//!
//! This module provides the sources a server can acquire frames from:
//! - Synthetic camera (`stub://` URLs, tests and bring-up)
//! - V4L2 devices (`v4l2://` URLs, feature: camera-v4l2)
//!
//! A backend is responsible for:
//! - Producing one `PooledFrame` per `acquire` call, stamped at capture time
//! - Enforcing its bounded checkout pool (depth >= 2 so the capture and
//!   stream listeners can each hold one frame)
//! - Applying validated sensor settings
//!
//! A backend never retries on its own and never holds frames back; retry and
//! pacing policy belong to the services calling it.

pub mod stub;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

pub use stub::SyntheticCamera;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::CameraConfig;
use crate::frame::PooledFrame;
use crate::params::{FrameSize, SensorStatus};

/// One validated, named parameter change for the sensor.
#[derive(Clone, Copy, Debug)]
pub enum SensorSetting {
    FrameSize(FrameSize),
    Quality(u8),
    VFlip(bool),
    HMirror(bool),
}

/// A camera that yields frame buffers and accepts parameter changes.
///
/// `acquire` transfers ownership of one buffer to the caller until the
/// returned `PooledFrame` is dropped. Implementations must tolerate two
/// concurrent checkouts (capture and stream on separate listeners).
pub trait FrameSource: Send + Sync {
    fn acquire(&self) -> Result<PooledFrame>;
    fn sensor(&self) -> Result<SensorStatus>;
    fn apply(&self, setting: SensorSetting) -> Result<()>;
    fn is_connected(&self) -> bool;
    /// Buffers currently checked out; observable for health and tests.
    fn outstanding(&self) -> usize;
}

/// Open the camera named by the config URL.
///
/// `stub://<name>` selects the synthetic camera; `v4l2://<device-path>`
/// selects a local device when the `camera-v4l2` feature is enabled.
pub fn open_source(config: &CameraConfig) -> Result<Arc<dyn FrameSource>> {
    let url = Url::parse(&config.url)
        .map_err(|e| anyhow!("invalid camera url '{}': {}", config.url, e))?;
    match url.scheme() {
        "stub" => Ok(Arc::new(SyntheticCamera::from_config(config)?)),
        #[cfg(feature = "camera-v4l2")]
        "v4l2" => Ok(Arc::new(V4l2Camera::open(config, url.path())?)),
        #[cfg(not(feature = "camera-v4l2"))]
        "v4l2" => Err(anyhow!(
            "camera url '{}' requires the camera-v4l2 feature",
            config.url
        )),
        other => Err(anyhow!(
            "unsupported camera scheme '{}'; expected stub or v4l2",
            other
        )),
    }
}

/// Acquire and discard a few frames after init so the first real capture
/// does not hit sensor cold-start misses. Failures here are expected and
/// only logged.
pub fn warm_up(source: &dyn FrameSource, frames: usize) {
    for attempt in 0..frames {
        match source.acquire() {
            Ok(frame) => drop(frame),
            Err(err) => log::debug!("warm-up acquire {} missed: {}", attempt + 1, err),
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}
