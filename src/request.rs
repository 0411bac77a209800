//! Inbound request types: what the transport decodes, and what the engine gets.

use std::net::SocketAddr;

use bytes::buf::Reader;
use bytes::{Buf, Bytes};
use http::header::{AsHeaderName, CONNECTION, EXPECT, IntoHeaderName, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Method, Version};
use url::Url;

use crate::security::SecurityContext;

// ── RequestHead ───────────────────────────────────────────────────────────────

/// A decoded request line plus headers, as delivered by the transport.
///
/// For a simple request the body is already attached. For a chunked request
/// the body arrives later as [`Chunk`]s and is filled in by the
/// [`ChunkAssembler`](crate::ChunkAssembler).
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub(crate) method: Method,
    pub(crate) target: String,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) chunked: bool,
}

impl RequestHead {
    /// A head with no headers and an empty body.
    pub fn new(method: Method, target: impl Into<String>, version: Version) -> Self {
        Self {
            method,
            target: target.into(),
            version,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            chunked: false,
        }
    }

    /// Appends a header, keeping any earlier value for the same name.
    pub fn header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Attaches the body of a non-chunked request.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Marks the request as using chunked transfer-coding.
    ///
    /// Decoders that do not track this themselves can pass
    /// [`RequestHead::declares_chunked`].
    pub fn chunked(mut self, chunked: bool) -> Self {
        self.chunked = chunked;
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn target(&self) -> &str { &self.target }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn content(&self) -> &Bytes { &self.body }
    pub fn is_chunked(&self) -> bool { self.chunked }

    /// Whether the final `Transfer-Encoding` coding is `chunked`.
    pub fn declares_chunked(&self) -> bool {
        ends_with_chunked(&self.headers)
    }

    /// Whether the client sent `Expect: 100-continue`.
    pub fn expects_continue(&self) -> bool {
        has_token(&self.headers, EXPECT, "100-continue")
    }

    /// Whether the connection must close once the response is written.
    ///
    /// HTTP/1.0 and older have no persistent-connection default, so they
    /// always close. Newer versions close only on `Connection: close`.
    pub fn wants_close(&self) -> bool {
        self.version < Version::HTTP_11 || has_token(&self.headers, CONNECTION, "close")
    }
}

/// Whether the last coding listed across all `Transfer-Encoding` values is
/// `chunked`.
pub(crate) fn ends_with_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .last()
        .is_some_and(|t| t.eq_ignore_ascii_case("chunked"))
}

/// Case-insensitive token search across every value of a comma-separated header.
fn has_token<K: AsHeaderName>(headers: &HeaderMap, name: K, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

// ── Chunk ─────────────────────────────────────────────────────────────────────

/// One decoded chunk frame of a chunked request body.
#[derive(Clone, Debug, Default)]
pub struct Chunk {
    payload: Bytes,
    last: bool,
}

impl Chunk {
    /// An intermediate chunk.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into(), last: false }
    }

    /// The terminal chunk. Usually empty, but any payload it carries is kept.
    pub fn last(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into(), last: true }
    }

    pub fn payload(&self) -> &Bytes { &self.payload }
    pub fn is_last(&self) -> bool { self.last }

    pub(crate) fn into_payload(self) -> Bytes {
        self.payload
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// A fully materialized request, handed to the engine.
///
/// Immutable once built: the engine owns it for the duration of one
/// invocation.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Url,
    base_uri: Url,
    version: Version,
    headers: HeaderMap,
    security: SecurityContext,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    pub(crate) fn new(
        head: RequestHead,
        uri: Url,
        base_uri: Url,
        security: SecurityContext,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            method: head.method,
            uri,
            base_uri,
            version: head.version,
            headers: head.headers,
            security,
            body: head.body,
            remote_addr,
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn security(&self) -> &SecurityContext { &self.security }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Absolute request URI, resolved against [`Request::base_uri`].
    pub fn uri(&self) -> &Url { &self.uri }

    /// The base URI the bridge was configured with.
    pub fn base_uri(&self) -> &Url { &self.base_uri }

    pub fn path(&self) -> &str { self.uri.path() }

    /// Case-insensitive header lookup. Returns the first value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The body as a byte stream.
    pub fn body_reader(&self) -> Reader<Bytes> {
        self.body.clone().reader()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http10_always_closes() {
        let head = RequestHead::new(Method::GET, "/", Version::HTTP_10)
            .header(CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(head.wants_close());
    }

    #[test]
    fn http11_closes_only_on_request() {
        let keep = RequestHead::new(Method::GET, "/", Version::HTTP_11);
        assert!(!keep.wants_close());

        let close = RequestHead::new(Method::GET, "/", Version::HTTP_11)
            .header(CONNECTION, HeaderValue::from_static("Upgrade, Close"));
        assert!(close.wants_close());
    }

    #[test]
    fn expect_continue_is_case_insensitive() {
        let head = RequestHead::new(Method::PUT, "/upload", Version::HTTP_11)
            .header(EXPECT, HeaderValue::from_static("100-Continue"));
        assert!(head.expects_continue());
        assert!(!RequestHead::new(Method::PUT, "/", Version::HTTP_11).expects_continue());
    }

    #[test]
    fn chunked_must_be_the_final_coding() {
        let chunked = RequestHead::new(Method::POST, "/", Version::HTTP_11)
            .header(TRANSFER_ENCODING, HeaderValue::from_static("gzip, chunked"));
        assert!(chunked.declares_chunked());

        let not = RequestHead::new(Method::POST, "/", Version::HTTP_11)
            .header(TRANSFER_ENCODING, HeaderValue::from_static("chunked, gzip"));
        assert!(!not.declares_chunked());
    }
}
