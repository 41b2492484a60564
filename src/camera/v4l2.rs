//! V4L2 camera backend (feature: camera-v4l2).
//!
//! Drives a local device node (e.g. `v4l2:///dev/video0`) through memory-
//! mapped capture buffers. Devices that deliver MJPG are passed through as
//! JPEG frames; RGB3 devices go through the converter on the send path.

use anyhow::{anyhow, bail, Context, Result};
use ouroboros::self_referencing;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{FrameSource, SensorSetting};
use crate::config::CameraConfig;
use crate::frame::{CheckoutPool, FrameTimestamp, PixelFormat, PooledFrame};
use crate::params::{FrameSize, SensorStatus};

pub struct V4l2Camera {
    inner: Mutex<Inner>,
    pool: CheckoutPool,
    sensor: Mutex<SensorStatus>,
    device_path: String,
    connected: AtomicBool,
}

struct Inner {
    capture: Option<CaptureState>,
    format: PixelFormat,
    width: u32,
    height: u32,
}

#[self_referencing]
struct CaptureState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn open(config: &CameraConfig, device_path: &str) -> Result<Self> {
        let framesize = FrameSize::parse(&config.framesize);
        let camera = Self {
            inner: Mutex::new(Inner {
                capture: None,
                format: PixelFormat::Jpeg,
                width: 0,
                height: 0,
            }),
            pool: CheckoutPool::new(config.pool_depth),
            sensor: Mutex::new(SensorStatus {
                framesize,
                quality: config.quality,
                vflip: false,
                hmirror: false,
            }),
            device_path: device_path.to_string(),
            connected: AtomicBool::new(false),
        };
        camera.reconnect(framesize)?;
        Ok(camera)
    }

    /// (Re)open the device and capture stream at the given frame size.
    fn reconnect(&self, framesize: FrameSize) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let (width, height) = framesize.dimensions();
        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = width;
        format.height = height;
        format.fourcc = v4l::FourCC::new(b"MJPG");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let pixel_format = match &format.fourcc.repr {
            b"MJPG" | b"JPEG" => PixelFormat::Jpeg,
            b"RGB3" => PixelFormat::Rgb888,
            other => bail!(
                "unsupported v4l2 pixel format {}",
                String::from_utf8_lossy(other)
            ),
        };

        let capture = CaptureStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("v4l2 state poisoned"))?;
        inner.capture = Some(capture);
        inner.format = pixel_format;
        inner.width = format.width;
        inner.height = format.height;
        self.connected.store(true, Ordering::SeqCst);

        log::info!(
            "V4l2Camera: connected to {} ({}x{}, {:?})",
            self.device_path,
            format.width,
            format.height,
            pixel_format
        );
        Ok(())
    }
}

impl FrameSource for V4l2Camera {
    fn acquire(&self) -> Result<PooledFrame> {
        use v4l::io::traits::CaptureStream;

        let slot = self.pool.checkout()?;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("v4l2 state poisoned"))?;
        let format = inner.format;
        let (width, height) = (inner.width, inner.height);
        let capture = inner
            .capture
            .as_mut()
            .ok_or_else(|| anyhow!("v4l2 device not connected"))?;

        let data = capture
            .with_stream_mut(|stream| stream.next())
            .map_err(|err| {
                self.connected.store(false, Ordering::SeqCst);
                anyhow::Error::new(err).context("capture v4l2 frame")
            })
            .map(|(buf, _meta)| buf.to_vec())?;
        self.connected.store(true, Ordering::SeqCst);

        Ok(PooledFrame::new(
            data,
            format,
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
        match setting {
            SensorSetting::FrameSize(size) => {
                // Resizing requires tearing down and rebuilding the stream.
                {
                    let mut inner = self
                        .inner
                        .lock()
                        .map_err(|_| anyhow!("v4l2 state poisoned"))?;
                    inner.capture = None;
                }
                self.reconnect(size)?;
            }
            SensorSetting::Quality(_) => {
                // Compression quality is applied by the converter on the send
                // path; MJPG devices keep their driver default.
            }
            SensorSetting::VFlip(flag) => self.set_control_flag(0x0098_0915, flag)?,
            SensorSetting::HMirror(flag) => self.set_control_flag(0x0098_0914, flag)?,
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

impl V4l2Camera {
    // The capture stream mutably borrows its device handle, so controls go
    // through a second open of the same node.
    fn set_control_flag(&self, control_id: u32, value: bool) -> Result<()> {
        let device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {} for control", self.device_path))?;
        let control = v4l::Control {
            id: control_id,
            value: v4l::control::Value::Boolean(value),
        };
        device
            .set_control(control)
            .with_context(|| format!("set v4l2 control {:#x}", control_id))
    }
}
