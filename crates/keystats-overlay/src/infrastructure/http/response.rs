//! Response framing.
//!
//! One-shot responses carry `Content-Length` and `Connection: close`; the
//! event stream carries neither a length nor a close and stays open.

/// Header block that opens an event stream.
pub const EVENT_STREAM_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/event-stream\r\n\
Cache-Control: no-cache\r\n\
Connection: keep-alive\r\n\
Access-Control-Allow-Origin: *\r\n\
\r\n";

/// Frames a complete response whose body is `body`.
pub fn one_shot(status: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let head = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        body.len()
    );
    let mut out = Vec::with_capacity(head.len() + body.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(body);
    out
}

pub fn html(body: &str) -> Vec<u8> {
    one_shot("200 OK", "text/html; charset=UTF-8", body.as_bytes())
}

pub fn json(body: &str) -> Vec<u8> {
    one_shot("200 OK", "application/json", body.as_bytes())
}

pub fn not_found() -> Vec<u8> {
    one_shot("404 Not Found", "text/plain", b"Not Found")
}

pub fn internal_error() -> Vec<u8> {
    one_shot("500 Internal Server Error", "text/plain", b"Stats not available")
}
