//! Server topology: listeners, routing, and per-connection workers.
//!
//! The main listener carries the UI, stream, status, control, and capture
//! routes. When a snapshot address is configured, `/snapshot` and `/capture`
//! also get their own listener so a slow or wedged streaming client can never
//! starve polling capture clients (or vice versa).
//!
//! Each accepted connection runs on its own worker thread. A listener tracks
//! its open connections and, at its configured cap, purges the oldest one
//! instead of refusing the new client. Start is idempotent; stop flips a
//! shared flag, shuts down every open connection, and joins the accept
//! threads.

pub mod http;

mod capture;
mod control;
mod status;
mod stream;

pub use stream::StreamEnd;

use anyhow::{Context, Result};
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::camera::FrameSource;
use crate::config::{CamserveConfig, CaptureSettings, StreamSettings};
use crate::params::StreamPacing;
use crate::ui;

/// Shared context handed to every handler.
#[derive(Clone)]
pub struct ServerState {
    pub camera: Arc<dyn FrameSource>,
    pub pacing: StreamPacing,
    pub capture: CaptureSettings,
    pub stream: StreamSettings,
    pub extended_memory: bool,
    /// Listener(s) bound; reported by `/health`.
    pub started: Arc<AtomicBool>,
    /// Network association, maintained by the embedding bootstrap.
    pub network_up: Arc<AtomicBool>,
}

#[derive(Clone, Copy, Debug)]
enum EndpointRole {
    /// UI, stream, status, control, capture, health.
    Full { serve_snapshot: bool },
    /// Snapshot/capture only, for polling consumers.
    Snapshot,
}

pub struct CameraServer {
    config: CamserveConfig,
    state: ServerState,
    handle: Option<ServerHandle>,
}

impl CameraServer {
    pub fn new(config: CamserveConfig, camera: Arc<dyn FrameSource>) -> Self {
        let pacing = StreamPacing::new(
            config.stream.delay_ms,
            config.stream.min_delay_ms,
            config.stream.max_delay_ms,
        );
        let state = ServerState {
            camera,
            pacing,
            capture: config.capture.clone(),
            stream: config.stream.clone(),
            extended_memory: config.camera.extended_memory,
            started: Arc::new(AtomicBool::new(false)),
            network_up: Arc::new(AtomicBool::new(true)),
        };
        Self {
            config,
            state,
            handle: None,
        }
    }

    /// Bind the listeners and spawn their accept loops. Starting an already
    /// running server is a no-op that reports success.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            log::debug!("server already running");
            return Ok(());
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut joins = Vec::new();
        let mut tables = Vec::new();

        let split = self.config.http.snapshot_addr.is_some();
        let (main_addr, main_join, main_table) = spawn_endpoint(
            &self.config.http.addr,
            EndpointRole::Full {
                serve_snapshot: !split,
            },
            self.config.http.max_connections,
            self.state.clone(),
            shutdown.clone(),
        )?;
        joins.push(main_join);
        tables.push(main_table);

        let snapshot_addr = match &self.config.http.snapshot_addr {
            Some(addr) => {
                let (addr, join, table) = spawn_endpoint(
                    addr,
                    EndpointRole::Snapshot,
                    self.config.http.max_connections,
                    self.state.clone(),
                    shutdown.clone(),
                )?;
                joins.push(join);
                tables.push(table);
                Some(addr)
            }
            None => None,
        };

        self.state.started.store(true, Ordering::SeqCst);
        log::info!(
            "camera server listening on {}{}",
            main_addr,
            snapshot_addr
                .map(|a| format!(" (snapshot on {})", a))
                .unwrap_or_default()
        );
        self.handle = Some(ServerHandle {
            addr: main_addr,
            snapshot_addr,
            shutdown,
            joins,
            tables,
        });
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.state.started.store(false, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle.stop(),
            None => Ok(()),
        }
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.handle.as_ref().map(|h| h.addr)
    }

    pub fn snapshot_addr(&self) -> Option<SocketAddr> {
        self.handle.as_ref().and_then(|h| h.snapshot_addr)
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn set_network_up(&self, up: bool) {
        self.state.network_up.store(up, Ordering::SeqCst);
    }
}

impl Drop for CameraServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct ServerHandle {
    addr: SocketAddr,
    snapshot_addr: Option<SocketAddr>,
    shutdown: Arc<AtomicBool>,
    joins: Vec<JoinHandle<()>>,
    tables: Vec<Arc<ConnectionTable>>,
}

impl ServerHandle {
    fn stop(self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        // Shut down open connections so long-lived stream sessions notice.
        for table in &self.tables {
            table.purge_all();
        }
        for join in self.joins {
            join.join()
                .map_err(|_| anyhow::anyhow!("accept thread panicked"))?;
        }
        Ok(())
    }
}

fn spawn_endpoint(
    addr: &str,
    role: EndpointRole,
    max_connections: usize,
    state: ServerState,
    shutdown: Arc<AtomicBool>,
) -> Result<(SocketAddr, JoinHandle<()>, Arc<ConnectionTable>)> {
    let configured: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid listen address '{}'", addr))?;
    let listener =
        TcpListener::bind(configured).with_context(|| format!("bind listener on {}", addr))?;
    let bound = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let table = Arc::new(ConnectionTable::new(max_connections));
    let accept_table = table.clone();
    let join = std::thread::spawn(move || accept_loop(listener, role, state, accept_table, shutdown));
    Ok((bound, join, table))
}

fn accept_loop(
    listener: TcpListener,
    role: EndpointRole,
    state: ServerState,
    table: Arc<ConnectionTable>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let id = table.register(&stream);
                let state = state.clone();
                let table = table.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &state, role) {
                        log::debug!("connection from {} ended: {:#}", peer, err);
                    }
                    table.deregister(id);
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                log::error!("accept failed: {}", err);
                break;
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, state: &ServerState, role: EndpointRole) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;

    let request = http::read_request(&mut stream)?;
    if request.method != "GET" {
        http::write_empty(&mut stream, 405)?;
        return Ok(());
    }

    match role {
        EndpointRole::Snapshot => match request.path.as_str() {
            "/snapshot" | "/capture" => capture::handle(&mut stream, state),
            _ => not_found(&mut stream),
        },
        EndpointRole::Full { serve_snapshot } => match request.path.as_str() {
            "/" => serve_index(&mut stream),
            "/capture" => capture::handle(&mut stream, state),
            "/snapshot" if serve_snapshot => capture::handle(&mut stream, state),
            "/stream" => {
                let end = stream::run(&mut stream, state);
                log::debug!("stream session closed: {:?}", end);
                Ok(())
            }
            "/control" => control::handle(&mut stream, &request, state),
            "/status" => status::handle_status(&mut stream, state),
            "/health" => status::handle_health(&mut stream, state),
            _ => not_found(&mut stream),
        },
    }
}

fn serve_index<W: Write>(out: &mut W) -> Result<()> {
    let body = ui::gzipped_index()?;
    http::write_response(
        out,
        200,
        "text/html",
        &[("Content-Encoding", "gzip")],
        body,
    )?;
    Ok(())
}

fn not_found<W: Write>(out: &mut W) -> Result<()> {
    http::write_empty(out, 404)?;
    Ok(())
}

struct ConnEntry {
    id: u64,
    opened: Instant,
    stream: TcpStream,
}

/// Open connections on one endpoint, capped; the oldest is purged to make
/// room rather than refusing a new client.
struct ConnectionTable {
    max: usize,
    next_id: AtomicU64,
    entries: Mutex<Vec<ConnEntry>>,
}

impl ConnectionTable {
    fn new(max: usize) -> Self {
        Self {
            max,
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    fn register(&self, stream: &TcpStream) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let clone = match stream.try_clone() {
            Ok(clone) => clone,
            Err(err) => {
                log::warn!("connection untracked, clone failed: {}", err);
                return id;
            }
        };
        let Ok(mut entries) = self.entries.lock() else {
            return id;
        };
        while entries.len() >= self.max {
            let oldest = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.opened)
                .map(|(i, _)| i);
            let Some(index) = oldest else { break };
            let victim = entries.swap_remove(index);
            log::debug!("connection cap reached, purging oldest (id {})", victim.id);
            let _ = victim.stream.shutdown(std::net::Shutdown::Both);
        }
        entries.push(ConnEntry {
            id,
            opened: Instant::now(),
            stream: clone,
        });
        id
    }

    fn deregister(&self, id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|e| e.id != id);
        }
    }

    fn purge_all(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            for entry in entries.drain(..) {
                let _ = entry.stream.shutdown(std::net::Shutdown::Both);
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_state(camera: Arc<dyn FrameSource>) -> ServerState {
    ServerState {
        camera,
        pacing: StreamPacing::new(33, 33, 500),
        capture: CaptureSettings {
            retries: 3,
            retry_delay_ms: 1,
        },
        stream: StreamSettings {
            delay_ms: 33,
            min_delay_ms: 33,
            max_delay_ms: 500,
            failure_ceiling: 10,
        },
        extended_memory: false,
        started: Arc::new(AtomicBool::new(true)),
        network_up: Arc::new(AtomicBool::new(true)),
    }
}
