//! Minimal HTTP/1.1 framing for the control socket
//!
//! The daemon answers plain HTTP so the socket stays inspectable with
//! curl. Only what the control routes need is implemented: a request
//! line, headers, an optional Content-Length body, one exchange per
//! connection (`Connection: close`).

use std::io::{BufRead, Read, Write};

/// Longest accepted request or header line
const MAX_LINE: usize = 8 * 1024;

/// Sanity cap for response bodies; control payloads are tiny
const MAX_BODY: usize = 1024 * 1024;

/// Parsed request line. Headers are consumed but not retained; the
/// control routes never need them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
}

/// Response with body, ready to write or just read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn json(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body,
        }
    }

    pub fn not_found() -> Self {
        Self::text(404, "not found\n")
    }

    /// Body as text, for the plain-text routes.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Write a request. Control requests carry no body.
pub fn write_request<W: Write>(
    writer: &mut W,
    method: &str,
    path: &str,
) -> std::io::Result<()> {
    write!(
        writer,
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
    )?;
    writer.flush()
}

/// Read a request line and consume the headers.
pub fn read_request<R: BufRead>(reader: &mut R) -> std::io::Result<Request> {
    let line = read_line(reader)?;
    let mut parts = line.split_whitespace();

    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    let version = parts.next().unwrap_or_default();
    if method.is_empty() || path.is_empty() || !version.starts_with("HTTP/") {
        return Err(invalid(format!("malformed request line: {line:?}")));
    }

    read_headers(reader)?;

    Ok(Request { method, path })
}

/// Write a response with the fixed control-socket headers.
pub fn write_response<W: Write>(
    writer: &mut W,
    response: &Response,
) -> std::io::Result<()> {
    write!(
        writer,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason(response.status),
        response.content_type,
        response.body.len()
    )?;
    writer.write_all(&response.body)?;
    writer.flush()
}

/// Read a status line, headers and body. Without a Content-Length the
/// body runs to end of stream, which `Connection: close` guarantees.
pub fn read_response<R: BufRead>(reader: &mut R) -> std::io::Result<Response> {
    let line = read_line(reader)?;
    let mut parts = line.split_whitespace();

    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(invalid(format!("malformed status line: {line:?}")));
    }
    let status: u16 = parts
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|_| invalid(format!("malformed status line: {line:?}")))?;

    let content_length = read_headers(reader)?;

    let body = match content_length {
        Some(len) if len > MAX_BODY => {
            return Err(invalid("response body too large".to_string()));
        }
        Some(len) => {
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf)?;
            buf
        }
        None => {
            let mut buf = Vec::new();
            reader.take(MAX_BODY as u64 + 1).read_to_end(&mut buf)?;
            if buf.len() > MAX_BODY {
                return Err(invalid("response body too large".to_string()));
            }
            buf
        }
    };

    Ok(Response {
        status,
        content_type: "",
        body,
    })
}

/// Consume headers up to the blank line, returning any Content-Length.
fn read_headers<R: BufRead>(reader: &mut R) -> std::io::Result<Option<usize>> {
    let mut content_length = None;
    loop {
        let line = read_line(reader)?;
        if line.is_empty() {
            return Ok(content_length);
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok();
            }
        }
    }
}

/// Read one CRLF-terminated line, without the terminator.
fn read_line<R: BufRead>(reader: &mut R) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_LINE as u64 + 1)
        .read_until(b'\n', &mut buf)?;
    if read == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed",
        ));
    }
    if buf.last() != Some(&b'\n') {
        return Err(invalid("line too long or truncated".to_string()));
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| invalid("line is not UTF-8".to_string()))
}

fn invalid(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}
