//! Synthetic camera for tests and bring-up.
//!
//! Produces deterministic frames without hardware: canned JPEG buffers in
//! `Jpeg` mode, a generated pixel pattern in `Rgb888` mode. Tests can script
//! transient acquisition failures and sensor rejections to exercise the
//! retry and error paths.

use anyhow::{anyhow, bail, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{FrameSource, SensorSetting};
use crate::config::CameraConfig;
use crate::frame::{CheckoutPool, FrameTimestamp, PixelFormat, PooledFrame};
use crate::params::{FrameSize, SensorStatus};

pub struct SyntheticCamera {
    sensor: Mutex<SensorStatus>,
    pool: CheckoutPool,
    format: PixelFormat,
    frame_count: AtomicU64,
    /// Scripted consecutive acquisition failures remaining.
    fail_budget: AtomicUsize,
    /// When set, `apply` reports a sensor rejection.
    reject_settings: AtomicBool,
    connected: AtomicBool,
}

impl SyntheticCamera {
    pub fn new(format: PixelFormat, framesize: FrameSize, quality: u8, pool_depth: usize) -> Self {
        Self {
            sensor: Mutex::new(SensorStatus {
                framesize,
                quality,
                vflip: false,
                hmirror: false,
            }),
            pool: CheckoutPool::new(pool_depth),
            format,
            frame_count: AtomicU64::new(0),
            fail_budget: AtomicUsize::new(0),
            reject_settings: AtomicBool::new(false),
            connected: AtomicBool::new(true),
        }
    }

    pub fn from_config(config: &CameraConfig) -> Result<Self> {
        let format = match config.pixel_format.as_str() {
            "jpeg" => PixelFormat::Jpeg,
            "rgb" => PixelFormat::Rgb888,
            other => bail!("unknown pixel format '{}'; expected jpeg or rgb", other),
        };
        Ok(Self::new(
            format,
            FrameSize::parse(&config.framesize),
            config.quality,
            config.pool_depth,
        ))
    }

    /// Make the next `count` acquisitions fail.
    pub fn fail_next(&self, count: usize) {
        self.fail_budget.store(count, Ordering::SeqCst);
    }

    /// Make `apply` reject every setting until cleared.
    pub fn reject_settings(&self, reject: bool) {
        self.reject_settings.store(reject, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn synthetic_jpeg(&self, count: u64) -> Vec<u8> {
        // Marker-framed filler; never decoded, only framed and measured.
        let body_len = 512 + (count % 7) as usize * 64;
        let mut data = Vec::with_capacity(body_len + 4);
        data.extend_from_slice(&[0xFF, 0xD8]);
        for i in 0..body_len {
            data.push(((i as u64 + count) % 251) as u8);
        }
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    fn synthetic_rgb(&self, count: u64, width: u32, height: u32) -> Vec<u8> {
        let pixel_count = (width * height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + count) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticCamera {
    fn acquire(&self) -> Result<PooledFrame> {
        let remaining = self.fail_budget.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_budget.store(remaining - 1, Ordering::SeqCst);
            bail!("sensor returned no frame");
        }

        let slot = self.pool.checkout()?;
        let count = self.frame_count.fetch_add(1, Ordering::SeqCst);
        let (width, height) = {
            let sensor = self
                .sensor
                .lock()
                .map_err(|_| anyhow!("sensor state poisoned"))?;
            sensor.framesize.dimensions()
        };
        let data = match self.format {
            PixelFormat::Jpeg => self.synthetic_jpeg(count),
            PixelFormat::Rgb888 => self.synthetic_rgb(count, width, height),
        };
        Ok(PooledFrame::new(
            data,
            self.format,
            width,
            height,
            FrameTimestamp::now()?,
            slot,
        ))
    }

    fn sensor(&self) -> Result<SensorStatus> {
        let sensor = self
            .sensor
            .lock()
            .map_err(|_| anyhow!("sensor state poisoned"))?;
        Ok(*sensor)
    }

    fn apply(&self, setting: SensorSetting) -> Result<()> {
        if self.reject_settings.load(Ordering::SeqCst) {
            bail!("sensor rejected setting {:?}", setting);
        }
        let mut sensor = self
            .sensor
            .lock()
            .map_err(|_| anyhow!("sensor state poisoned"))?;
        match setting {
            SensorSetting::FrameSize(size) => sensor.framesize = size,
            SensorSetting::Quality(quality) => sensor.quality = quality,
            SensorSetting::VFlip(flag) => sensor.vflip = flag,
            SensorSetting::HMirror(flag) => sensor.hmirror = flag,
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn outstanding(&self) -> usize {
        self.pool.outstanding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(format: PixelFormat) -> SyntheticCamera {
        SyntheticCamera::new(format, FrameSize::Qvga, 12, 2)
    }

    #[test]
    fn produces_marker_framed_jpeg() {
        let cam = camera(PixelFormat::Jpeg);
        let frame = cam.acquire().unwrap();
        assert!(frame.is_jpeg());
        assert_eq!(&frame.data()[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame.data()[frame.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn rgb_frames_match_sensor_dimensions() {
        let cam = camera(PixelFormat::Rgb888);
        let frame = cam.acquire().unwrap();
        assert_eq!(frame.format(), PixelFormat::Rgb888);
        assert_eq!(frame.len(), 320 * 240 * 3);
    }

    #[test]
    fn scripted_failures_then_recovery() {
        let cam = camera(PixelFormat::Jpeg);
        cam.fail_next(2);
        assert!(cam.acquire().is_err());
        assert!(cam.acquire().is_err());
        assert!(cam.acquire().is_ok());
        assert_eq!(cam.outstanding(), 0);
    }

    #[test]
    fn failed_acquire_does_not_consume_a_slot() {
        let cam = camera(PixelFormat::Jpeg);
        cam.fail_next(1);
        let _ = cam.acquire();
        assert_eq!(cam.outstanding(), 0);
    }

    #[test]
    fn settings_apply_and_reject() {
        let cam = camera(PixelFormat::Jpeg);
        cam.apply(SensorSetting::Quality(30)).unwrap();
        cam.apply(SensorSetting::VFlip(true)).unwrap();
        let sensor = cam.sensor().unwrap();
        assert_eq!(sensor.quality, 30);
        assert!(sensor.vflip);

        cam.reject_settings(true);
        assert!(cam.apply(SensorSetting::Quality(10)).is_err());
        assert_eq!(cam.sensor().unwrap().quality, 30);
    }
}
