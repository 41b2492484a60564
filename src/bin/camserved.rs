//! camserved - camera HTTP service daemon
//!
//! This daemon:
//! 1. Opens the configured camera backend
//! 2. Warms the sensor up with a few throwaway captures
//! 3. Serves capture, stream, control, and status over HTTP

use anyhow::Result;
use clap::Parser;
use std::sync::mpsc;

use camserve::{config::CamserveConfig, open_source, warm_up, CameraServer};

#[derive(Parser, Debug)]
#[command(name = "camserved", about = "HTTP camera capture and streaming service")]
struct Args {
    /// Path to a JSON config file
    #[arg(long, env = "CAMSERVE_CONFIG")]
    config: Option<String>,

    /// Listen address, overriding the config file
    #[arg(long)]
    addr: Option<String>,

    /// Dedicated snapshot listener address ("none" disables the split)
    #[arg(long)]
    snapshot_addr: Option<String>,

    /// Camera URL (stub://NAME or v4l2:///dev/videoN), overriding the config
    #[arg(long)]
    camera: Option<String>,

    /// Throwaway captures before serving, letting auto-exposure settle
    #[arg(long, default_value_t = 2)]
    warm_up: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => CamserveConfig::load_from_path(std::path::Path::new(path))?,
        None => CamserveConfig::load()?,
    };
    if let Some(addr) = args.addr {
        config.http.addr = addr;
    }
    if let Some(addr) = args.snapshot_addr {
        config.http.snapshot_addr = if addr.eq_ignore_ascii_case("none") || addr.is_empty() {
            None
        } else {
            Some(addr)
        };
    }
    if let Some(url) = args.camera {
        config.camera.url = url;
    }
    config.validate()?;

    let camera = open_source(&config.camera)?;
    log::info!("camera opened: {}", config.camera.url);
    if args.warm_up > 0 {
        warm_up(camera.as_ref(), args.warm_up);
    }

    let mut server = CameraServer::new(config, camera);
    server.start()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("camserved waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping server...");
    server.stop()?;

    Ok(())
}
