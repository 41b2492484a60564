//! Daemon configuration: JSON file plus `CAMSERVE_*` environment overrides.
//!
//! The two behaviors that differ between deployments are explicit policy
//! here rather than constants: the stream pacing floor (33 ms caps streaming
//! at ~30 FPS; 0 disables the cap) and whether `/snapshot` gets its own
//! listener so polling capture clients are isolated from long-lived streams.

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_SNAPSHOT_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_MAX_CONNECTIONS: usize = 8;
const DEFAULT_CAMERA_URL: &str = "stub://cam0";
const DEFAULT_PIXEL_FORMAT: &str = "jpeg";
const DEFAULT_FRAMESIZE: &str = "svga";
const DEFAULT_QUALITY: u8 = 12;
const DEFAULT_POOL_DEPTH: usize = 2;
const DEFAULT_STREAM_DELAY_MS: u64 = 33;
const DEFAULT_STREAM_MIN_DELAY_MS: u64 = 33;
const DEFAULT_STREAM_MAX_DELAY_MS: u64 = 500;
const DEFAULT_FAILURE_CEILING: u32 = 10;
const DEFAULT_CAPTURE_RETRIES: u32 = 3;
const DEFAULT_CAPTURE_RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    http: Option<HttpConfigFile>,
    camera: Option<CameraConfigFile>,
    stream: Option<StreamConfigFile>,
    capture: Option<CaptureConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    addr: Option<String>,
    /// "none" disables the dedicated snapshot listener.
    snapshot_addr: Option<String>,
    max_connections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    pixel_format: Option<String>,
    framesize: Option<String>,
    quality: Option<i64>,
    pool_depth: Option<usize>,
    extended_memory: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    delay_ms: Option<u64>,
    min_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    failure_ceiling: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    retries: Option<u32>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CamserveConfig {
    pub http: HttpSettings,
    pub camera: CameraConfig,
    pub stream: StreamSettings,
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub addr: String,
    /// When set, `/snapshot` (and `/capture`) get their own listener.
    pub snapshot_addr: Option<String>,
    /// Concurrent connections per listener before the oldest is purged.
    pub max_connections: usize,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub url: String,
    pub pixel_format: String,
    pub framesize: String,
    pub quality: u8,
    pub pool_depth: usize,
    /// Device has external frame memory; without it large frame sizes clamp
    /// down to SVGA.
    pub extended_memory: bool,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive acquisition misses before a stream session gives up.
    pub failure_ceiling: u32,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl CamserveConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAMSERVE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Self {
        let http = HttpSettings {
            addr: file
                .http
                .as_ref()
                .and_then(|http| http.addr.clone())
                .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
            snapshot_addr: match file.http.as_ref().and_then(|http| http.snapshot_addr.clone()) {
                Some(addr) => normalize_snapshot_addr(&addr),
                None => Some(DEFAULT_SNAPSHOT_ADDR.to_string()),
            },
            max_connections: file
                .http
                .as_ref()
                .and_then(|http| http.max_connections)
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
        };
        let camera = CameraConfig {
            url: file
                .camera
                .as_ref()
                .and_then(|camera| camera.url.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            pixel_format: file
                .camera
                .as_ref()
                .and_then(|camera| camera.pixel_format.clone())
                .unwrap_or_else(|| DEFAULT_PIXEL_FORMAT.to_string()),
            framesize: file
                .camera
                .as_ref()
                .and_then(|camera| camera.framesize.clone())
                .unwrap_or_else(|| DEFAULT_FRAMESIZE.to_string()),
            quality: file
                .camera
                .as_ref()
                .and_then(|camera| camera.quality)
                .map(crate::params::clamp_quality)
                .unwrap_or(DEFAULT_QUALITY),
            pool_depth: file
                .camera
                .as_ref()
                .and_then(|camera| camera.pool_depth)
                .unwrap_or(DEFAULT_POOL_DEPTH),
            extended_memory: file
                .camera
                .and_then(|camera| camera.extended_memory)
                .unwrap_or(false),
        };
        let stream = StreamSettings {
            delay_ms: file
                .stream
                .as_ref()
                .and_then(|stream| stream.delay_ms)
                .unwrap_or(DEFAULT_STREAM_DELAY_MS),
            min_delay_ms: file
                .stream
                .as_ref()
                .and_then(|stream| stream.min_delay_ms)
                .unwrap_or(DEFAULT_STREAM_MIN_DELAY_MS),
            max_delay_ms: file
                .stream
                .as_ref()
                .and_then(|stream| stream.max_delay_ms)
                .unwrap_or(DEFAULT_STREAM_MAX_DELAY_MS),
            failure_ceiling: file
                .stream
                .and_then(|stream| stream.failure_ceiling)
                .unwrap_or(DEFAULT_FAILURE_CEILING),
        };
        let capture = CaptureSettings {
            retries: file
                .capture
                .as_ref()
                .and_then(|capture| capture.retries)
                .unwrap_or(DEFAULT_CAPTURE_RETRIES),
            retry_delay_ms: file
                .capture
                .and_then(|capture| capture.retry_delay_ms)
                .unwrap_or(DEFAULT_CAPTURE_RETRY_DELAY_MS),
        };
        Self {
            http,
            camera,
            stream,
            capture,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("CAMSERVE_HTTP_ADDR") {
            if !addr.trim().is_empty() {
                self.http.addr = addr;
            }
        }
        if let Ok(addr) = std::env::var("CAMSERVE_SNAPSHOT_ADDR") {
            if !addr.trim().is_empty() {
                self.http.snapshot_addr = normalize_snapshot_addr(&addr);
            }
        }
        if let Ok(url) = std::env::var("CAMSERVE_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(delay) = std::env::var("CAMSERVE_STREAM_DELAY_MS") {
            self.stream.delay_ms = delay
                .parse()
                .map_err(|_| anyhow!("CAMSERVE_STREAM_DELAY_MS must be milliseconds"))?;
        }
        if let Ok(floor) = std::env::var("CAMSERVE_STREAM_MIN_DELAY_MS") {
            self.stream.min_delay_ms = floor
                .parse()
                .map_err(|_| anyhow!("CAMSERVE_STREAM_MIN_DELAY_MS must be milliseconds"))?;
        }
        Ok(())
    }

    /// Reject inconsistent settings and clamp the initial pacing delay into
    /// its configured range. Called by the loaders; embedders applying their
    /// own overrides call it again afterwards.
    pub fn validate(&mut self) -> Result<()> {
        if self.stream.max_delay_ms < self.stream.min_delay_ms {
            bail!(
                "stream.max_delay_ms ({}) below stream.min_delay_ms ({})",
                self.stream.max_delay_ms,
                self.stream.min_delay_ms
            );
        }
        if self.stream.failure_ceiling == 0 {
            bail!("stream.failure_ceiling must be greater than zero");
        }
        if self.capture.retries == 0 {
            bail!("capture.retries must be greater than zero");
        }
        if self.http.max_connections == 0 {
            bail!("http.max_connections must be greater than zero");
        }
        if self.camera.pool_depth == 0 {
            bail!("camera.pool_depth must be greater than zero");
        }
        if self.http.snapshot_addr.is_some() && self.camera.pool_depth < 2 {
            bail!("camera.pool_depth must be at least 2 with a dedicated snapshot listener");
        }
        match self.camera.pixel_format.as_str() {
            "jpeg" | "rgb" => {}
            other => bail!(
                "camera.pixel_format '{}' unknown; expected jpeg or rgb",
                other
            ),
        }
        self.stream.delay_ms = self
            .stream
            .delay_ms
            .clamp(self.stream.min_delay_ms, self.stream.max_delay_ms);
        Ok(())
    }
}

impl Default for CamserveConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default())
    }
}

fn normalize_snapshot_addr(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_split_snapshot_listener() {
        let cfg = CamserveConfig::default();
        assert_eq!(cfg.http.addr, DEFAULT_HTTP_ADDR);
        assert_eq!(cfg.http.snapshot_addr.as_deref(), Some(DEFAULT_SNAPSHOT_ADDR));
        assert_eq!(cfg.stream.min_delay_ms, 33);
        assert_eq!(cfg.capture.retries, 3);
    }

    #[test]
    fn snapshot_addr_none_collapses_to_single_listener() {
        assert_eq!(normalize_snapshot_addr("none"), None);
        assert_eq!(normalize_snapshot_addr("  "), None);
        assert_eq!(
            normalize_snapshot_addr("0.0.0.0:9001"),
            Some("0.0.0.0:9001".to_string())
        );
    }

    #[test]
    fn validate_rejects_inverted_pacing_range() {
        let mut cfg = CamserveConfig::default();
        cfg.stream.min_delay_ms = 100;
        cfg.stream.max_delay_ms = 50;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_clamps_initial_delay_into_range() {
        let mut cfg = CamserveConfig::default();
        cfg.stream.delay_ms = 5;
        cfg.validate().unwrap();
        assert_eq!(cfg.stream.delay_ms, 33);
    }

    #[test]
    fn validate_requires_pool_depth_for_split_topology() {
        let mut cfg = CamserveConfig::default();
        cfg.camera.pool_depth = 1;
        assert!(cfg.validate().is_err());

        cfg.http.snapshot_addr = None;
        cfg.validate().unwrap();
    }
}
