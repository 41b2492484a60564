//! Minimal HTTP/1.1 plumbing over a TCP stream.
//!
//! Request parsing with a hard size cap, response writers with the header
//! policy shared by every route (permissive CORS, explicit no-cache on image
//! bodies), and a chunked-transfer writer for bodies of unknown length.

use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::io::{self, Read, Write};

const MAX_REQUEST_BYTES: usize = 8192;

/// Cache-defeating headers for image responses, so polling consumers always
/// get a fresh frame.
pub const NO_CACHE_HEADERS: [(&str, &str); 3] = [
    (
        "Cache-Control",
        "no-store, no-cache, must-revalidate, max-age=0",
    ),
    ("Pragma", "no-cache"),
    ("Expires", "0"),
];

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    query: HashMap<String, String>,
}

impl HttpRequest {
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn has_query(&self) -> bool {
        !self.query.is_empty()
    }
}

/// Read and parse one GET-style request head. The body, if any, is ignored.
pub fn read_request<R: Read>(stream: &mut R) -> Result<HttpRequest> {
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            bail!("request too large");
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;

    let (path, query_str) = match raw_path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (raw_path, None),
    };
    let mut query = HashMap::new();
    if let Some(query_str) = query_str {
        for pair in query_str.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                if !k.is_empty() {
                    query.insert(k.to_string(), v.to_string());
                }
            }
        }
    }
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
    })
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

/// Write a complete response with an exact `Content-Length`. Every response
/// carries the permissive cross-origin header.
pub fn write_response<W: Write>(
    out: &mut W,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> io::Result<()> {
    let mut header = format!(
        "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n",
        status_line(status),
        content_type,
        body.len()
    );
    for (name, value) in extra_headers {
        header.push_str(name);
        header.push_str(": ");
        header.push_str(value);
        header.push_str("\r\n");
    }
    header.push_str("\r\n");
    out.write_all(header.as_bytes())?;
    out.write_all(body)?;
    out.flush()
}

pub fn write_empty<W: Write>(out: &mut W, status: u16) -> io::Result<()> {
    write_response(out, status, "text/plain", &[], &[])
}

pub fn write_json<W: Write>(out: &mut W, status: u16, body: &[u8]) -> io::Result<()> {
    write_response(out, status, "application/json", &[], body)
}

/// Write the response head for a body of unknown length, to be followed by a
/// `ChunkedWriter`.
pub fn write_chunked_head<W: Write>(
    out: &mut W,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, &str)],
) -> io::Result<()> {
    let mut header = format!(
        "{}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n",
        status_line(status),
        content_type
    );
    for (name, value) in extra_headers {
        header.push_str(name);
        header.push_str(": ");
        header.push_str(value);
        header.push_str("\r\n");
    }
    header.push_str("\r\n");
    out.write_all(header.as_bytes())?;
    out.flush()
}

/// Chunked transfer encoding over any writer.
///
/// `write_chunk` frames one chunk; `finish` writes the terminating chunk.
/// The `Write` impl lets the JPEG converter stream straight into the
/// connection.
pub struct ChunkedWriter<W: Write> {
    inner: W,
}

impl<W: Write> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            // An empty chunk would terminate the body.
            return Ok(());
        }
        write!(self.inner, "{:X}\r\n", data.len())?;
        self.inner.write_all(data)?;
        self.inner.write_all(b"\r\n")
    }

    pub fn finish(mut self) -> io::Result<()> {
        self.inner.write_all(b"0\r\n\r\n")?;
        self.inner.flush()
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write> Write for ChunkedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_line_and_query() {
        let mut raw: &[u8] =
            b"GET /control?var=quality&val=10 HTTP/1.1\r\nHost: cam\r\n\r\n";
        let request = read_request(&mut raw).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/control");
        assert_eq!(request.query_param("var"), Some("quality"));
        assert_eq!(request.query_param("val"), Some("10"));
    }

    #[test]
    fn path_without_query_has_no_params() {
        let mut raw: &[u8] = b"GET /status HTTP/1.1\r\n\r\n";
        let request = read_request(&mut raw).unwrap();
        assert_eq!(request.path, "/status");
        assert!(!request.has_query());
    }

    #[test]
    fn oversized_request_is_rejected() {
        let mut raw = Vec::from(&b"GET /x HTTP/1.1\r\n"[..]);
        raw.extend(std::iter::repeat(b'a').take(MAX_REQUEST_BYTES + 1));
        assert!(read_request(&mut raw.as_slice()).is_err());
    }

    #[test]
    fn response_carries_cors_and_exact_length() {
        let mut out = Vec::new();
        write_response(&mut out, 200, "image/jpeg", &NO_CACHE_HEADERS, b"abc").unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(text.contains("Cache-Control: no-store"));
        assert!(text.ends_with("\r\n\r\nabc"));
    }

    #[test]
    fn chunked_writer_frames_and_terminates() {
        let mut out = Vec::new();
        {
            let mut chunked = ChunkedWriter::new(&mut out);
            chunked.write_chunk(b"hello").unwrap();
            chunked.write_chunk(b"").unwrap();
            chunked.finish().unwrap();
        }
        assert_eq!(out, b"5\r\nhello\r\n0\r\n\r\n");
    }
}
