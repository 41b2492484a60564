//! camserve
//!
//! An HTTP camera service: single-frame JPEG capture, multipart MJPEG
//! streaming, and runtime sensor control over a small hand-rolled HTTP/1.1
//! server.
//!
//! # Architecture
//!
//! - `frame`: pooled frame buffers with checked-out-slot accounting
//! - `camera`: the `FrameSource` trait and its backends (synthetic, V4L2)
//! - `params`: frame-size ladder, clamping rules, stream pacing
//! - `encode`: raw-to-JPEG normalization with bounded quality mapping
//! - `server`: listeners, routing, and the capture/stream/control/status
//!   services
//! - `ui`: the embedded, gzip-served control page
//! - `config`: file plus environment configuration
//!
//! Every frame handed out by a camera backend occupies a pool slot until it
//! is dropped; all service paths release on every exit, so a camera with a
//! small pool keeps working under client churn.

pub mod camera;
pub mod config;
pub mod encode;
pub mod frame;
pub mod params;
pub mod server;
pub mod ui;

pub use camera::{open_source, warm_up, FrameSource, SensorSetting, SyntheticCamera};
#[cfg(feature = "camera-v4l2")]
pub use camera::V4l2Camera;
pub use config::CamserveConfig;
pub use frame::{FrameBuffer, FrameTimestamp, PixelFormat, PooledFrame};
pub use params::{FrameSize, SensorStatus, StreamPacing, QUALITY_MAX, QUALITY_MIN};
pub use server::{CameraServer, ServerState, StreamEnd};
