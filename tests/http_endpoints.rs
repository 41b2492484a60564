//! End-to-end tests over real sockets: a server with a synthetic camera,
//! exercised by a plain TCP client.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camserve::config::CamserveConfig;
use camserve::{CameraServer, FrameSize, FrameSource, PixelFormat, SyntheticCamera};

fn test_config() -> CamserveConfig {
    let mut config = CamserveConfig::default();
    config.http.addr = "127.0.0.1:0".to_string();
    config.http.snapshot_addr = Some("127.0.0.1:0".to_string());
    config.capture.retry_delay_ms = 1;
    config
}

fn start_server() -> (CameraServer, Arc<SyntheticCamera>) {
    let camera = Arc::new(SyntheticCamera::new(PixelFormat::Jpeg, FrameSize::Svga, 12, 2));
    let mut server = CameraServer::new(test_config(), camera.clone());
    server.start().expect("server start");
    (server, camera)
}

fn get(addr: SocketAddr, target: &str) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write!(stream, "GET {} HTTP/1.1\r\nHost: test\r\n\r\n", target).unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read response");
    parse_response(&raw)
}

fn parse_response(raw: &[u8]) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let pos = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8_lossy(&raw[..pos]);
    let mut lines = head.lines();
    let status: u16 = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
        .expect("status code");
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| {
            l.split_once(": ")
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect();
    (status, headers, raw[pos + 4..].to_vec())
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[test]
fn capture_returns_a_complete_jpeg() {
    let (mut server, camera) = start_server();
    let addr = server.addr().unwrap();

    let (status, headers, body) = get(addr, "/capture");
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "Content-Type"), Some("image/jpeg"));
    let declared: usize = header(&headers, "Content-Length").unwrap().parse().unwrap();
    assert_eq!(declared, body.len());
    assert_eq!(&body[..2], &[0xFF, 0xD8]);
    assert_eq!(&body[body.len() - 2..], &[0xFF, 0xD9]);
    assert_eq!(camera.outstanding(), 0);

    server.stop().unwrap();
}

#[test]
fn control_changes_are_visible_in_status() {
    let (mut server, _camera) = start_server();
    let addr = server.addr().unwrap();

    let (status, _, _) = get(addr, "/control?var=quality&val=20");
    assert_eq!(status, 200);
    let (status, _, _) = get(addr, "/control?var=vflip&val=1");
    assert_eq!(status, 200);

    let (status, _, body) = get(addr, "/status");
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["quality"], 20);
    assert_eq!(json["vflip"], 1);
    assert_eq!(json["framesize_name"], "SVGA");

    server.stop().unwrap();
}

#[test]
fn health_reports_ok_when_all_subsystems_are_up() {
    let (mut server, _camera) = start_server();
    let addr = server.addr().unwrap();

    let (status, _, body) = get(addr, "/health");
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "OK");
    assert_eq!(json["camera"], true);
    assert_eq!(json["server"], true);

    server.stop().unwrap();
}

#[test]
fn index_page_is_served_gzip_encoded() {
    let (mut server, _camera) = start_server();
    let addr = server.addr().unwrap();

    let (status, headers, body) = get(addr, "/");
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "Content-Encoding"), Some("gzip"));
    assert_eq!(&body[..2], &[0x1F, 0x8B]);

    server.stop().unwrap();
}

#[test]
fn snapshot_listener_serves_capture_only() {
    let (mut server, _camera) = start_server();
    let snapshot = server.snapshot_addr().unwrap();

    let (status, headers, _) = get(snapshot, "/snapshot");
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "Content-Type"), Some("image/jpeg"));

    let (status, _, _) = get(snapshot, "/status");
    assert_eq!(status, 404);

    // /snapshot moved off the main listener when the split is active.
    let (status, _, _) = get(server.addr().unwrap(), "/snapshot");
    assert_eq!(status, 404);

    server.stop().unwrap();
}

#[test]
fn unknown_paths_and_methods_are_rejected() {
    let (mut server, _camera) = start_server();
    let addr = server.addr().unwrap();

    let (status, _, _) = get(addr, "/nope");
    assert_eq!(status, 404);

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write!(stream, "POST /control HTTP/1.1\r\nHost: test\r\n\r\n").unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();
    let (status, _, _) = parse_response(&raw);
    assert_eq!(status, 405);

    server.stop().unwrap();
}

#[test]
fn stream_yields_parts_and_survives_client_disconnect() {
    let (mut server, camera) = start_server();
    let addr = server.addr().unwrap();

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    write!(stream, "GET /stream HTTP/1.1\r\nHost: test\r\n\r\n").unwrap();

    // Read until at least three boundary markers arrive.
    let marker = b"--frame";
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
            Err(_) => {}
        }
        let markers = raw
            .windows(marker.len())
            .filter(|w| w == marker)
            .count();
        if markers >= 3 || Instant::now() > deadline {
            break;
        }
    }
    let markers = raw.windows(marker.len()).filter(|w| w == marker).count();
    assert!(markers >= 3, "expected >= 3 parts, got {}", markers);
    let head_end = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
    let head = String::from_utf8_lossy(&raw[..head_end]);
    assert!(head.contains("multipart/x-mixed-replace; boundary=frame"));
    drop(stream);

    // The abandoned session must release its buffers and leave the server
    // able to take new clients.
    std::thread::sleep(Duration::from_millis(300));
    let (status, _, _) = get(addr, "/capture");
    assert_eq!(status, 200);
    assert_eq!(camera.outstanding(), 0);

    server.stop().unwrap();
}

#[test]
fn stop_terminates_open_stream_sessions() {
    let (mut server, _camera) = start_server();
    let addr = server.addr().unwrap();

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write!(stream, "GET /stream HTTP/1.1\r\nHost: test\r\n\r\n").unwrap();
    let mut buf = [0u8; 1024];
    let _ = stream.read(&mut buf);

    server.stop().unwrap();

    // The connection was shut down server-side; reads drain and hit EOF.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }
        assert!(Instant::now() < deadline, "stream session did not terminate");
    }
}
