//! The minimal HTTP/1.0 style text framing that precedes a transfer: the client asks for a
//!  document with a request line, and the server announces the document's length in a response
//!  header. Both are single datagrams outside the packet format.

use anyhow::{anyhow, bail};

pub const NOT_FOUND: &str = "HTTP/1.0 404 Not Found\r\n\r\n";
pub const BAD_REQUEST: &str = "HTTP/1.0 400 Bad Request\r\n\r\n";
pub const INTERNAL_SERVER_ERROR: &str = "HTTP/1.0 500 Internal Server Error\r\n\r\n";

pub fn request_line(filename: &str) -> String {
    format!("GET {} HTTP/1.0", filename)
}

/// Returns the requested filename
pub fn parse_request(datagram: &[u8]) -> anyhow::Result<String> {
    let line = std::str::from_utf8(datagram)?
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace());

    let parts = line.split_whitespace().collect::<Vec<_>>();
    match parts.as_slice() {
        ["GET", filename, version] if version.starts_with("HTTP/") => Ok(filename.to_string()),
        _ => bail!("malformed request line {:?}", line),
    }
}

pub fn response_header(content_length: usize) -> String {
    format!("HTTP/1.0 200 Document Follows\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n", content_length)
}

pub fn is_response(datagram: &[u8]) -> bool {
    datagram.starts_with(b"HTTP/")
}

/// Returns the announced content length, or an error for anything but a `200` response
pub fn parse_response(datagram: &[u8]) -> anyhow::Result<usize> {
    let text = std::str::from_utf8(datagram)?;
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut status_parts = status_line.splitn(3, ' ');
    let status = match (status_parts.next(), status_parts.next()) {
        (Some(version), Some(status)) if version.starts_with("HTTP/") => status,
        _ => bail!("malformed response status line {:?}", status_line),
    };
    if status != "200" {
        bail!("server responded with {:?}", status_line);
    }

    for line in lines.take_while(|l| !l.is_empty()) {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse::<usize>()
                    .map_err(|e| anyhow!("invalid content length {:?}: {}", value.trim(), e));
            }
        }
    }
    bail!("response has no content length")
}
