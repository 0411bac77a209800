//! Outgoing wire frames.
//!
//! A [`Frame`] is the unit the bridge hands to [`Connection::write`]: a
//! response head with or without its body, one chunk of a chunked body, the
//! terminating chunk, or an interim `100 Continue`. Transports that speak raw
//! bytes call [`Frame::encode`].
//!
//! [`Connection::write`]: crate::Connection::write

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode, Version};

// ── ResponseHead ──────────────────────────────────────────────────────────────

/// Status line plus headers of one response.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub version: Version,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(version: Version, status: StatusCode) -> Self {
        Self { version, status, headers: HeaderMap::new() }
    }

    fn encode(&self, dst: &mut BytesMut) {
        let reason = self.status.canonical_reason().unwrap_or("");
        let _ = write!(dst, "{} {} {}\r\n", version_str(self.version), self.status.as_u16(), reason);
        for (name, value) in &self.headers {
            dst.put_slice(name.as_str().as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One write on the connection.
#[derive(Clone, Debug)]
pub enum Frame {
    /// Interim `100 Continue`.
    Continue(Version),
    /// Status line and headers of a chunked response; the body follows as
    /// [`Frame::Chunk`]s.
    Head(ResponseHead),
    /// A complete buffered response.
    Full(ResponseHead, Bytes),
    /// One non-empty chunk of a chunked body.
    Chunk(Bytes),
    /// The zero-length chunk that ends a chunked body.
    LastChunk,
}

impl Frame {
    /// A complete `text/plain` response, used for every response the bridge
    /// synthesizes itself (`400`, `500`).
    pub fn plain_text(
        version: Version,
        status: StatusCode,
        body: impl Into<Bytes>,
        close: bool,
    ) -> Self {
        let body = body.into();
        let mut head = ResponseHead::new(version, status);
        head.headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        head.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        if close {
            head.headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        Self::Full(head, body)
    }

    pub fn head(&self) -> Option<&ResponseHead> {
        match self {
            Self::Head(head) | Self::Full(head, _) => Some(head),
            _ => None,
        }
    }

    /// The body bytes carried by this frame, if any.
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::Full(_, body) | Self::Chunk(body) => Some(body),
            _ => None,
        }
    }

    /// Appends the HTTP/1.x wire form of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Self::Continue(version) => {
                let _ = write!(dst, "{} 100 Continue\r\n\r\n", version_str(*version));
            }
            Self::Head(head) => head.encode(dst),
            Self::Full(head, body) => {
                head.encode(dst);
                dst.put_slice(body);
            }
            Self::Chunk(body) => {
                let _ = write!(dst, "{:X}\r\n", body.len());
                dst.put_slice(body);
                dst.put_slice(b"\r\n");
            }
            Self::LastChunk => dst.put_slice(b"0\r\n\r\n"),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }
}

/// Status-line version token. Anything newer than 1.1 is answered as 1.1:
/// this is an HTTP/1.x bridge.
fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_frame_wire_form() {
        let mut head = ResponseHead::new(Version::HTTP_11, StatusCode::OK);
        head.headers.insert(CONTENT_LENGTH, HeaderValue::from(5u64));
        let frame = Frame::Full(head, Bytes::from_static(b"hello"));

        assert_eq!(
            frame.to_bytes(),
            Bytes::from_static(b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello"),
        );
    }

    #[test]
    fn chunk_size_is_hex() {
        let frame = Frame::Chunk(Bytes::from(vec![b'a'; 26]));
        let wire = frame.to_bytes();
        assert!(wire.starts_with(b"1A\r\naaaa"));
        assert!(wire.ends_with(b"a\r\n"));
        assert_eq!(Frame::LastChunk.to_bytes(), Bytes::from_static(b"0\r\n\r\n"));
    }

    #[test]
    fn continue_uses_request_version() {
        assert_eq!(
            Frame::Continue(Version::HTTP_11).to_bytes(),
            Bytes::from_static(b"HTTP/1.1 100 Continue\r\n\r\n"),
        );
    }

    #[test]
    fn plain_text_marks_close() {
        let frame = Frame::plain_text(Version::HTTP_10, StatusCode::BAD_REQUEST, "nope", true);
        let head = frame.head().unwrap();
        assert_eq!(head.headers[CONNECTION], "close");
        assert_eq!(head.headers[CONTENT_LENGTH], "4");
        assert!(frame.to_bytes().starts_with(b"HTTP/1.0 400 Bad Request\r\n"));
    }
}
