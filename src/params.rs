//! Camera parameter set: frame size ladder, quality and orientation clamps,
//! and the process-local stream pacing interval.
//!
//! Numeric control values are clamped into range, never rejected. Unknown
//! frame size *values* fall back to SVGA; rejecting is reserved for unknown
//! variable *names*, which the control handler turns into a client error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Discrete sensor resolutions, in hardware ladder order. The discriminants
/// are the sensor's own frame size indexes, so numeric control values map
/// directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FrameSize {
    Qqvga = 1,
    Qvga = 5,
    Cif = 6,
    Hvga = 7,
    Vga = 8,
    Svga = 9,
    Xga = 10,
    Hd = 11,
    Sxga = 12,
    Uxga = 13,
    Fhd = 14,
}

impl FrameSize {
    const LADDER: [FrameSize; 11] = [
        FrameSize::Qqvga,
        FrameSize::Qvga,
        FrameSize::Cif,
        FrameSize::Hvga,
        FrameSize::Vga,
        FrameSize::Svga,
        FrameSize::Xga,
        FrameSize::Hd,
        FrameSize::Sxga,
        FrameSize::Uxga,
        FrameSize::Fhd,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameSize::Qqvga => "QQVGA",
            FrameSize::Qvga => "QVGA",
            FrameSize::Cif => "CIF",
            FrameSize::Hvga => "HVGA",
            FrameSize::Vga => "VGA",
            FrameSize::Svga => "SVGA",
            FrameSize::Xga => "XGA",
            FrameSize::Hd => "HD",
            FrameSize::Sxga => "SXGA",
            FrameSize::Uxga => "UXGA",
            FrameSize::Fhd => "FHD",
        }
    }

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Hvga => (480, 320),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Hd => (1280, 720),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
            FrameSize::Fhd => (1920, 1080),
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::LADDER.iter().copied().find(|s| s.index() == index)
    }

    /// Lenient parse of a control value: a ladder name (case-insensitive),
    /// the `1080p` alias, or a numeric sensor index. Anything unrecognized
    /// falls back to SVGA.
    pub fn parse(value: &str) -> Self {
        let lowered = value.trim().to_ascii_lowercase();
        for size in Self::LADDER {
            if lowered == size.name().to_ascii_lowercase() {
                return size;
            }
        }
        if lowered == "1080p" {
            return FrameSize::Fhd;
        }
        if let Ok(index) = lowered.parse::<u8>() {
            if let Some(size) = Self::from_index(index) {
                return size;
            }
        }
        FrameSize::Svga
    }

    /// Large frames need external frame memory; without it the sensor is
    /// capped at SVGA.
    pub fn clamp_for_memory(self, extended_memory: bool) -> Self {
        if !extended_memory && self > FrameSize::Svga {
            FrameSize::Svga
        } else {
            self
        }
    }
}

/// JPEG compression quality valid range (sensor scale, lower is finer).
pub const QUALITY_MIN: u8 = 5;
pub const QUALITY_MAX: u8 = 63;

pub fn clamp_quality(value: i64) -> u8 {
    value.clamp(QUALITY_MIN as i64, QUALITY_MAX as i64) as u8
}

/// Orientation flags accept {0, 1}; out-of-range values clamp.
pub fn clamp_flag(value: i64) -> bool {
    value >= 1
}

/// Current sensor-owned parameter values, as reported by `/status`.
#[derive(Clone, Copy, Debug)]
pub struct SensorStatus {
    pub framesize: FrameSize,
    pub quality: u8,
    pub vflip: bool,
    pub hmirror: bool,
}

struct PacingInner {
    delay_ms: AtomicU64,
    floor_ms: u64,
    max_ms: u64,
}

/// Process-local stream pacing interval.
///
/// Read on every stream iteration without synchronization beyond a relaxed
/// atomic; a stale read affects at most one frame interval. The floor is
/// policy (a 33 ms floor caps the stream at ~30 FPS to stay inside the
/// device's thermal envelope) and comes from configuration.
#[derive(Clone)]
pub struct StreamPacing {
    inner: Arc<PacingInner>,
}

impl StreamPacing {
    pub fn new(initial_ms: u64, floor_ms: u64, max_ms: u64) -> Self {
        let inner = PacingInner {
            delay_ms: AtomicU64::new(initial_ms.clamp(floor_ms, max_ms)),
            floor_ms,
            max_ms,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Clamp into [floor, max] and apply. Returns the effective value.
    pub fn set(&self, value_ms: i64) -> u64 {
        let clamped = value_ms
            .clamp(self.inner.floor_ms as i64, self.inner.max_ms as i64)
            as u64;
        self.inner.delay_ms.store(clamped, Ordering::Relaxed);
        clamped
    }

    pub fn delay_ms(&self) -> u64 {
        self.inner.delay_ms.load(Ordering::Relaxed)
    }

    pub fn floor_ms(&self) -> u64 {
        self.inner.floor_ms
    }
}
