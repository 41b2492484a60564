//! Frame buffer ownership model.
//!
//! Every frame handed out by a camera backend is a `PooledFrame` holding a
//! `CheckoutGuard`. The guard returns the pool slot when the frame is dropped,
//! so release-on-every-exit-path holds by construction rather than by caller
//! discipline. A converted frame becomes an `OwnedJpeg` with no pool slot; the
//! `FrameBuffer` enum carries either variant through the send path and a plain
//! drop disposes of each correctly.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Capture time, split the way the multipart part header wants it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTimestamp {
    pub sec: u64,
    pub usec: u32,
}

impl FrameTimestamp {
    pub fn now() -> Result<Self> {
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH)?;
        Ok(Self {
            sec: elapsed.as_secs(),
            usec: elapsed.subsec_micros(),
        })
    }
}

impl std::fmt::Display for FrameTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:06}", self.sec, self.usec)
    }
}

/// Pixel format tag on an acquired buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Already JPEG-encoded; send verbatim.
    Jpeg,
    /// Packed 24-bit RGB; must be converted before sending.
    Rgb888,
}

struct PoolInner {
    outstanding: AtomicUsize,
    depth: usize,
}

/// Bounded checkout accounting for a camera's frame buffers.
///
/// The depth is the number of frames that may be checked out at once. With a
/// split capture/stream topology two handlers can each hold one frame, so the
/// default depth is 2.
#[derive(Clone)]
pub struct CheckoutPool {
    inner: Arc<PoolInner>,
}

impl CheckoutPool {
    pub fn new(depth: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                outstanding: AtomicUsize::new(0),
                depth,
            }),
        }
    }

    /// Take a slot, failing when the pool is exhausted.
    pub fn checkout(&self) -> Result<CheckoutGuard> {
        let prev = self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        if prev >= self.inner.depth {
            self.inner.outstanding.fetch_sub(1, Ordering::SeqCst);
            bail!(
                "frame pool exhausted ({} of {} buffers checked out)",
                prev,
                self.inner.depth
            );
        }
        Ok(CheckoutGuard {
            pool: self.inner.clone(),
        })
    }

    /// Number of buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }
}

/// Returns its pool slot on drop.
pub struct CheckoutGuard {
    pool: Arc<PoolInner>,
}

impl Drop for CheckoutGuard {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One checked-out camera buffer. Dropping it releases the pool slot.
pub struct PooledFrame {
    data: Vec<u8>,
    format: PixelFormat,
    width: u32,
    height: u32,
    timestamp: FrameTimestamp,
    _slot: CheckoutGuard,
}

impl PooledFrame {
    pub fn new(
        data: Vec<u8>,
        format: PixelFormat,
        width: u32,
        height: u32,
        timestamp: FrameTimestamp,
        slot: CheckoutGuard,
    ) -> Self {
        Self {
            data,
            format,
            width,
            height,
            timestamp,
            _slot: slot,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn is_jpeg(&self) -> bool {
        self.format == PixelFormat::Jpeg
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn timestamp(&self) -> FrameTimestamp {
        self.timestamp
    }
}

/// A freshly allocated JPEG produced by conversion. The original pooled
/// buffer has already been released by the time one of these exists.
pub struct OwnedJpeg {
    data: Vec<u8>,
    timestamp: FrameTimestamp,
}

impl OwnedJpeg {
    pub fn new(data: Vec<u8>, timestamp: FrameTimestamp) -> Self {
        Self { data, timestamp }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn timestamp(&self) -> FrameTimestamp {
        self.timestamp
    }
}

/// A JPEG ready to send, tagged by origin so disposal is a plain drop:
/// `Pooled` returns its slot, `Owned` frees its allocation.
pub enum FrameBuffer {
    Pooled(PooledFrame),
    Owned(OwnedJpeg),
}

impl FrameBuffer {
    /// JPEG payload bytes. `Pooled` frames reach here only when the camera
    /// delivered JPEG directly.
    pub fn jpeg_bytes(&self) -> &[u8] {
        match self {
            FrameBuffer::Pooled(frame) => frame.data(),
            FrameBuffer::Owned(jpeg) => jpeg.data(),
        }
    }

    pub fn timestamp(&self) -> FrameTimestamp {
        match self {
            FrameBuffer::Pooled(frame) => frame.timestamp(),
            FrameBuffer::Owned(jpeg) => jpeg.timestamp(),
        }
    }
}
