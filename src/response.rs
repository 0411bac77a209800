//! The response writer.
//!
//! The engine drives one [`ResponseWriter`] per request through a fixed
//! protocol: [`write_status_and_headers`](ResponseWriter::write_status_and_headers)
//! once, any number of writes on the returned [`BodySink`], then
//! [`commit`](ResponseWriter::commit). The writer picks the transfer strategy
//! exactly once, when the headers are written:
//!
//! | Version  | Length known | Mode     | On the wire                               |
//! |----------|--------------|----------|-------------------------------------------|
//! | HTTP/1.1 | no           | Chunked  | head now, one chunk per write, `0\r\n\r\n` |
//! | HTTP/1.1 | yes          | Buffered | one frame at commit                       |
//! | HTTP/1.0 | either       | Buffered | one frame at commit                       |
//!
//! Errors after dispatch go through [`failure`](ResponseWriter::failure),
//! which answers `500` when nothing has reached the wire yet and always
//! closes the connection.

use std::fmt;
use std::io;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, StatusCode, Version};
use tracing::{debug, trace, warn};

use crate::connection::{AfterWrite, SharedConnection};
use crate::error::Error;
use crate::frame::{Frame, ResponseHead};
use crate::request;

// ── State ─────────────────────────────────────────────────────────────────────

/// Where a response is in its lifecycle. Transitions only move forward.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriterState {
    /// Nothing written yet.
    Idle,
    /// Headers are held back and the body accumulates until commit.
    Buffered,
    /// Headers are on the wire and every write goes out as a chunk.
    Chunked,
    Committed,
    Failed,
}

enum ResponseState {
    Idle,
    Buffered { head: ResponseHead, body: BytesMut, declared: Option<u64> },
    Chunked,
    Committed,
    Failed,
}

impl ResponseState {
    fn public(&self) -> WriterState {
        match self {
            Self::Idle => WriterState::Idle,
            Self::Buffered { .. } => WriterState::Buffered,
            Self::Chunked => WriterState::Chunked,
            Self::Committed => WriterState::Committed,
            Self::Failed => WriterState::Failed,
        }
    }
}

struct Inner {
    version: Version,
    close: bool,
    state: ResponseState,
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// Writes one response onto one connection.
///
/// Cloning is cheap and every clone drives the same response: the bridge
/// keeps one to run the failure path if the engine errors out.
#[derive(Clone)]
pub struct ResponseWriter {
    inner: Arc<Mutex<Inner>>,
    conn: SharedConnection,
}

impl ResponseWriter {
    /// A writer for a response to a request of `version`.
    ///
    /// `close` is the keep-alive decision for this request; versions older
    /// than HTTP/1.1 always close.
    pub fn new(conn: SharedConnection, version: Version, close: bool) -> Self {
        let close = close || version < Version::HTTP_11;
        Self {
            inner: Arc::new(Mutex::new(Inner { version, close, state: ResponseState::Idle })),
            conn,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> WriterState {
        self.lock().state.public()
    }

    /// Whether the response was committed or failed.
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), WriterState::Committed | WriterState::Failed)
    }

    /// Whether the connection closes once this response is out.
    pub fn closes_connection(&self) -> bool {
        self.lock().close
    }

    /// Writes the status and headers and chooses the output mode.
    ///
    /// `content_length` is the body length when the engine knows it. An
    /// explicit `Content-Length` in `headers` counts as known and is never
    /// replaced. Headers with several values go out as one line, values
    /// joined by `", "`.
    pub fn write_status_and_headers(
        &self,
        status: StatusCode,
        headers: HeaderMap,
        content_length: Option<u64>,
    ) -> Result<BodySink, Error> {
        let mut inner = self.lock();
        match inner.state {
            ResponseState::Idle => {}
            ResponseState::Committed | ResponseState::Failed => return Err(Error::AlreadyCommitted),
            _ => return Err(Error::HeadersAlreadyWritten),
        }

        let mut head = ResponseHead::new(inner.version, status);
        head.headers = join_values(headers);
        if inner.close && !head.headers.contains_key(CONNECTION) {
            head.headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }

        let explicit = head.headers.contains_key(CONTENT_LENGTH);
        let declared = content_length.or_else(|| {
            head.headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        });

        let chunked = inner.version == Version::HTTP_11
            && declared.is_none()
            && !explicit
            && !forbids_body(status);

        if chunked {
            if !self.conn.is_open() {
                return Err(Error::ConnectionClosed);
            }
            mark_chunked(&mut head.headers);
            trace!(conn = %self.conn.key(), status = status.as_u16(), "streaming chunked response");
            self.conn.write(Frame::Head(head)).then(&self.conn, AfterWrite::CloseOnFailure);
            inner.state = ResponseState::Chunked;
        } else {
            if !explicit && !forbids_body(status) {
                if let Some(len) = declared {
                    head.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
                }
            }
            trace!(conn = %self.conn.key(), status = status.as_u16(), "buffering response");
            inner.state = ResponseState::Buffered { head, body: BytesMut::new(), declared };
        }

        Ok(BodySink { writer: self.clone() })
    }

    fn write_body(&self, bytes: &[u8]) -> Result<(), Error> {
        let mut inner = self.lock();
        match &mut inner.state {
            ResponseState::Idle => Err(Error::HeadersNotWritten),
            ResponseState::Buffered { body, .. } => {
                body.extend_from_slice(bytes);
                Ok(())
            }
            ResponseState::Chunked => {
                if bytes.is_empty() {
                    // An empty chunk would end the body.
                    return Ok(());
                }
                if !self.conn.is_open() {
                    return Err(Error::ConnectionClosed);
                }
                let chunk = Frame::Chunk(Bytes::copy_from_slice(bytes));
                self.conn.write(chunk).then(&self.conn, AfterWrite::CloseOnFailure);
                Ok(())
            }
            ResponseState::Committed | ResponseState::Failed => Err(Error::AlreadyCommitted),
        }
    }

    /// Finishes the response.
    ///
    /// Chunked responses get their terminating chunk; buffered responses go
    /// out as one frame. The connection then closes if this request asked for
    /// it, and otherwise only if the write fails.
    pub fn commit(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        let after = if inner.close { AfterWrite::Close } else { AfterWrite::CloseOnFailure };

        match mem::replace(&mut inner.state, ResponseState::Committed) {
            ResponseState::Chunked => {
                self.conn.write(Frame::LastChunk).then(&self.conn, after);
            }
            ResponseState::Buffered { mut head, body, declared } => {
                let mut body = body.freeze();
                if forbids_body(head.status) {
                    if !body.is_empty() {
                        warn!(conn = %self.conn.key(), status = head.status.as_u16(), "dropping body of bodiless response");
                        body = Bytes::new();
                    }
                } else if !head.headers.contains_key(CONTENT_LENGTH) {
                    head.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
                } else if let Some(declared) = declared.filter(|&d| d != body.len() as u64) {
                    warn!(
                        conn = %self.conn.key(),
                        declared,
                        actual = body.len(),
                        "body length differs from declared content-length, sending declared length"
                    );
                }
                self.conn.write(Frame::Full(head, body)).then(&self.conn, after);
            }
            prior @ ResponseState::Idle => {
                inner.state = prior;
                return Err(Error::HeadersNotWritten);
            }
            prior @ (ResponseState::Committed | ResponseState::Failed) => {
                inner.state = prior;
                return Err(Error::AlreadyCommitted);
            }
        }

        trace!(conn = %self.conn.key(), close = inner.close, "response committed");
        Ok(())
    }

    /// Abandons the response after an unrecovered error and closes the
    /// connection.
    ///
    /// When the connection is still writable a best-effort `500` carrying the
    /// error text goes out first. If a chunked head is already on the wire the
    /// text is sent as a last chunk instead and the body is left unterminated,
    /// so the peer sees an incomplete message. Safe to call in any state.
    pub fn failure(&self, error: &dyn fmt::Display) {
        let mut inner = self.lock();
        let prior = mem::replace(&mut inner.state, ResponseState::Failed);
        let key = self.conn.key();

        if !(self.conn.is_open() && self.conn.is_writable()) {
            debug!(conn = %key, "connection not writable, closing without error response");
            self.conn.close();
            return;
        }

        let text = error.to_string();
        let frame = match prior {
            ResponseState::Idle | ResponseState::Buffered { .. } => Frame::plain_text(
                inner.version,
                StatusCode::INTERNAL_SERVER_ERROR,
                text,
                true,
            ),
            ResponseState::Chunked => Frame::Chunk(Bytes::from(text)),
            ResponseState::Committed | ResponseState::Failed => {
                self.conn.close();
                return;
            }
        };
        debug!(conn = %key, "sending error response");
        self.conn.write(frame).then(&self.conn, AfterWrite::Close);
    }
}

impl fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ResponseWriter")
            .field("conn", &self.conn.key())
            .field("version", &inner.version)
            .field("close", &inner.close)
            .field("state", &inner.state.public())
            .finish()
    }
}

// ── BodySink ──────────────────────────────────────────────────────────────────

/// Body output of one response, returned by
/// [`ResponseWriter::write_status_and_headers`].
///
/// Also an [`io::Write`], so serializers can write into it directly.
#[derive(Clone, Debug)]
pub struct BodySink {
    writer: ResponseWriter,
}

impl BodySink {
    /// Writes body bytes. In chunked mode this is one chunk frame; the bytes
    /// are copied, so the caller may reuse its buffer right away.
    pub fn write(&self, bytes: &[u8]) -> Result<(), Error> {
        self.writer.write_body(bytes)
    }

    /// Shorthand for [`ResponseWriter::commit`].
    pub fn commit(self) -> Result<(), Error> {
        self.writer.commit()
    }
}

impl io::Write for BodySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write_body(buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Collapses every multi-valued header into one value joined by `", "`.
fn join_values(headers: HeaderMap) -> HeaderMap {
    let mut joined = HeaderMap::with_capacity(headers.keys_len());
    for name in headers.keys() {
        let mut values = headers.get_all(name).iter();
        let Some(first) = values.next() else { continue };

        let mut line = BytesMut::from(first.as_bytes());
        for value in values {
            line.extend_from_slice(b", ");
            line.extend_from_slice(value.as_bytes());
        }
        match HeaderValue::from_maybe_shared(line.freeze()) {
            Ok(value) => {
                joined.insert(name.clone(), value);
            }
            Err(_) => {
                for value in headers.get_all(name) {
                    joined.append(name.clone(), value.clone());
                }
            }
        }
    }
    joined
}

/// Makes `chunked` the final transfer coding. Codings the engine applied
/// itself (`gzip`, ...) stay in front of it.
fn mark_chunked(headers: &mut HeaderMap) {
    if request::ends_with_chunked(headers) {
        return;
    }
    let value = match headers.get(TRANSFER_ENCODING) {
        Some(codings) => {
            let mut line = BytesMut::from(codings.as_bytes());
            line.extend_from_slice(b", chunked");
            HeaderValue::from_maybe_shared(line.freeze())
                .unwrap_or_else(|_| HeaderValue::from_static("chunked"))
        }
        None => HeaderValue::from_static("chunked"),
    };
    headers.insert(TRANSFER_ENCODING, value);
}

/// Statuses that never carry a body (RFC 9110 §6.4.1).
fn forbids_body(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

#[cfg(test)]
mod tests {
    use http::header::{CACHE_CONTROL, CONTENT_TYPE};

    use super::*;

    #[test]
    fn joins_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.append(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.append(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let joined = join_values(headers);
        assert_eq!(joined[CACHE_CONTROL], "no-cache, no-store");
        assert_eq!(joined[CONTENT_TYPE], "text/plain");
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn chunked_goes_last() {
        let mut headers = HeaderMap::new();
        mark_chunked(&mut headers);
        assert_eq!(headers[TRANSFER_ENCODING], "chunked");

        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("gzip"));
        mark_chunked(&mut headers);
        assert_eq!(headers[TRANSFER_ENCODING], "gzip, chunked");

        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("gzip, Chunked"));
        mark_chunked(&mut headers);
        assert_eq!(headers[TRANSFER_ENCODING], "gzip, Chunked");
    }

    #[test]
    fn bodiless_statuses() {
        assert!(forbids_body(StatusCode::NO_CONTENT));
        assert!(forbids_body(StatusCode::NOT_MODIFIED));
        assert!(forbids_body(StatusCode::CONTINUE));
        assert!(!forbids_body(StatusCode::OK));
    }
}
