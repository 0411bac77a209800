//! The request bridge.
//!
//! [`RequestBridge`] is the one object a transport talks to. It receives the
//! decoded events of every connection through [`RequestBridge::on_event`] and
//! runs each connection's request cycle:
//!
//! ```text
//! AwaitingHead ─ simple head ──────────────────────┐
//!      │                                           ▼
//!      └─ chunked head ─▶ AwaitingChunks ─ last ─▶ AwaitingDispatch ─▶ Dispatched
//!                                                                        │
//!      ▲                       committed / failed, connection still open │
//!      └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing escapes: a malformed target becomes a fixed `400`, an engine error
//! or panic becomes a `500` through [`ResponseWriter::failure`], a stray
//! chunk is dropped, and a transport exception becomes a `500` if the
//! connection can still take one.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use http::header::AUTHORIZATION;
use http::{StatusCode, Version};
use tracing::{debug, error, info, trace, warn};

use crate::assembler::ChunkAssembler;
use crate::config::BridgeConfig;
use crate::connection::{AfterWrite, ConnectionKey, SharedConnection};
use crate::engine::{BoxedEngine, Engine};
use crate::error::{BoxError, Error};
use crate::frame::Frame;
use crate::request::{Chunk, Request, RequestHead};
use crate::response::{ResponseWriter, WriterState};
use crate::security::{Credentials, DefaultSecurityContextFactory, SecurityContextFactory};
use crate::target;

/// Body of the `400` sent for a target that does not resolve.
pub const MALFORMED_TARGET_BODY: &str = "Bad Request: malformed request URI";

// ── Events ────────────────────────────────────────────────────────────────────

/// One decoded event from the transport.
#[derive(Debug)]
pub enum Event {
    /// A request line plus headers.
    Head(RequestHead),
    /// One chunk of the current chunked request.
    Chunk(Chunk),
    /// The transport failed on this connection, e.g. while decoding.
    Exception(BoxError),
}

/// Where a connection is in its current request cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    AwaitingHead,
    AwaitingChunks,
    AwaitingDispatch,
    Dispatched,
}

/// What the bridge remembers about a connection's latest request.
#[derive(Clone, Copy, Debug)]
struct ConnState {
    phase: Phase,
    version: Version,
    close: bool,
    expects_continue: bool,
}

impl ConnState {
    fn of(head: &RequestHead, phase: Phase) -> Self {
        Self {
            phase,
            version: head.version(),
            close: head.wants_close(),
            expects_continue: head.expects_continue(),
        }
    }
}

// ── RequestBridge ─────────────────────────────────────────────────────────────

/// Drives every connection's request/response cycle against one engine.
///
/// Share it across connection tasks behind an `Arc`. Per-connection state
/// lives in keyed tables; events of one connection must be delivered in order
/// and one at a time, events of different connections may run in parallel.
pub struct RequestBridge {
    engine: BoxedEngine,
    security: Arc<dyn SecurityContextFactory>,
    config: BridgeConfig,
    assembler: ChunkAssembler,
    connections: DashMap<ConnectionKey, ConnState>,
}

impl RequestBridge {
    /// A bridge with the default configuration.
    pub fn new(engine: impl Engine) -> Self {
        Self::builder(engine).build()
    }

    pub fn builder(engine: impl Engine) -> RequestBridgeBuilder {
        RequestBridgeBuilder {
            engine: Arc::new(engine),
            security: Arc::new(DefaultSecurityContextFactory),
            config: BridgeConfig::default(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn assembler(&self) -> &ChunkAssembler {
        &self.assembler
    }

    /// Current phase of `key`. Unknown connections await a head.
    pub fn phase(&self, key: ConnectionKey) -> Phase {
        self.connections.get(&key).map_or(Phase::AwaitingHead, |s| s.phase)
    }

    /// Handles one decoded event on `conn`.
    ///
    /// Resolves once the event is fully handled. For the event that completes
    /// a request that includes the whole engine invocation.
    pub async fn on_event(&self, conn: &SharedConnection, event: Event) {
        match event {
            Event::Head(head) => self.on_head(conn, head).await,
            Event::Chunk(chunk) => self.on_chunk(conn, chunk).await,
            Event::Exception(err) => self.on_exception(conn, &*err),
        }
    }

    /// Forgets everything about `key`. Call when the transport closes the
    /// connection.
    pub fn disconnect(&self, key: ConnectionKey) {
        if self.assembler.discard(key) {
            debug!(conn = %key, "discarded unfinished chunked request");
        }
        self.connections.remove(&key);
    }

    async fn on_head(&self, conn: &SharedConnection, head: RequestHead) {
        let key = conn.key();

        if !head.is_chunked() {
            self.connections.insert(key, ConnState::of(&head, Phase::AwaitingDispatch));
            self.dispatch(conn, head).await;
            return;
        }

        trace!(conn = %key, method = %head.method(), path = head.target(), "chunked request started");
        let state = ConnState::of(&head, Phase::AwaitingChunks);
        self.connections.insert(key, state);
        self.assembler.begin(key, head);
        if state.expects_continue {
            self.send_continue(conn, state.version);
        }
    }

    async fn on_chunk(&self, conn: &SharedConnection, chunk: Chunk) {
        let key = conn.key();
        let last = chunk.is_last();
        self.assembler.add_chunk(key, Some(chunk));

        if !last {
            if self.config.continue_per_chunk {
                let state = self.connections.get(&key).map(|s| *s);
                if let Some(state) = state.filter(|s| s.expects_continue && s.phase == Phase::AwaitingChunks) {
                    self.send_continue(conn, state.version);
                }
            }
            return;
        }

        match self.assembler.assemble(key) {
            Ok(head) => {
                self.set_phase(key, Phase::AwaitingDispatch);
                self.dispatch(conn, head).await;
            }
            Err(e) => warn!(conn = %key, error = %e, "terminal chunk not dispatched"),
        }
    }

    fn on_exception(&self, conn: &SharedConnection, err: &(dyn std::error::Error + Send + Sync)) {
        let key = conn.key();
        error!(conn = %key, error = %err, "uncaught exception on connection");

        self.assembler.discard(key);
        if !conn.is_open() {
            info!(conn = %key, "not writing any response, connection is already closed");
            return;
        }

        let (version, close) = self
            .connections
            .get(&key)
            .map_or((Version::HTTP_10, true), |s| (s.version, s.close || s.version < Version::HTTP_11));
        self.finish(key, close);

        let frame = Frame::plain_text(version, StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), close);
        let after = if close { AfterWrite::Close } else { AfterWrite::CloseOnFailure };
        conn.write(frame).then(conn, after);
    }

    async fn dispatch(&self, conn: &SharedConnection, head: RequestHead) {
        let key = conn.key();
        let version = head.version();
        let close = head.wants_close();

        let uri = match target::resolve(&self.config.base_uri, head.target()) {
            Ok(uri) => uri,
            Err(e) => {
                debug!(conn = %key, error = %e, "rejecting request");
                let frame = Frame::plain_text(version, StatusCode::BAD_REQUEST, MALFORMED_TARGET_BODY, true);
                conn.write(frame).then(conn, AfterWrite::Close);
                self.finish(key, true);
                return;
            }
        };

        let credentials = head
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(Credentials::from_authorization);
        let secure = uri.scheme().eq_ignore_ascii_case("https");
        let security = self.security.create(credentials, secure, conn.remote_addr());

        let request = Request::new(head, uri, self.config.base_uri.clone(), security, conn.remote_addr());
        let writer = ResponseWriter::new(Arc::clone(conn), version, close);

        trace!(conn = %key, method = %request.method(), uri = %request.uri(), close, "dispatching request");
        self.set_phase(key, Phase::Dispatched);

        // `handle` itself may panic before it hands back a future.
        let engine = &self.engine;
        let engine_writer = writer.clone();
        let outcome = AssertUnwindSafe(async move { engine.handle(request, engine_writer).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) if writer.is_finished() => {}
            Ok(Ok(())) => {
                let err = Error::engine("engine returned without committing the response");
                error!(conn = %key, "{err}");
                writer.failure(&err);
            }
            Ok(Err(e)) => {
                let err = Error::Engine(e);
                error!(conn = %key, error = %err, "engine failed");
                writer.failure(&err);
            }
            Err(panic) => {
                let err = Error::engine(panic_message(panic.as_ref()));
                error!(conn = %key, error = %err, "engine panicked");
                writer.failure(&err);
            }
        }

        let closing = writer.closes_connection() || writer.state() == WriterState::Failed;
        self.finish(key, closing || !conn.is_open());
    }

    fn send_continue(&self, conn: &SharedConnection, version: Version) {
        // 1xx responses mean nothing to HTTP/1.0 clients.
        if version < Version::HTTP_11 {
            return;
        }
        trace!(conn = %conn.key(), "sending 100 Continue");
        conn.write(Frame::Continue(version)).then(conn, AfterWrite::CloseOnFailure);
    }

    /// Ends the current request cycle: back to `AwaitingHead`, or gone
    /// entirely when the connection is closing.
    fn finish(&self, key: ConnectionKey, closing: bool) {
        if closing {
            self.connections.remove(&key);
        } else {
            self.set_phase(key, Phase::AwaitingHead);
        }
    }

    fn set_phase(&self, key: ConnectionKey, phase: Phase) {
        if let Some(mut state) = self.connections.get_mut(&key) {
            state.phase = phase;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "engine panicked".to_owned()
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Fluent builder for [`RequestBridge`]. Obtain via [`RequestBridge::builder`].
pub struct RequestBridgeBuilder {
    engine: BoxedEngine,
    security: Arc<dyn SecurityContextFactory>,
    config: BridgeConfig,
}

impl RequestBridgeBuilder {
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base_uri(mut self, base_uri: url::Url) -> Self {
        self.config.base_uri = base_uri;
        self
    }

    pub fn security(mut self, factory: impl SecurityContextFactory) -> Self {
        self.security = Arc::new(factory);
        self
    }

    pub fn build(self) -> RequestBridge {
        RequestBridge {
            engine: self.engine,
            security: self.security,
            config: self.config,
            assembler: ChunkAssembler::new(),
            connections: DashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use http::{HeaderMap, Method};

    use super::*;
    use crate::connection::{Completion, Connection};

    struct TestConnection {
        key: ConnectionKey,
        open: AtomicBool,
        frames: Mutex<Vec<Frame>>,
    }

    impl Connection for TestConnection {
        fn key(&self) -> ConnectionKey { self.key }
        fn remote_addr(&self) -> Option<std::net::SocketAddr> { None }

        fn write(&self, frame: Frame) -> Completion {
            self.frames.lock().unwrap().push(frame);
            Completion::ready(Ok(()))
        }

        fn close(&self) { self.open.store(false, Ordering::SeqCst) }
        fn is_open(&self) -> bool { self.open.load(Ordering::SeqCst) }
        fn is_writable(&self) -> bool { self.is_open() }
    }

    fn connection() -> SharedConnection {
        Arc::new(TestConnection {
            key: ConnectionKey::next(),
            open: AtomicBool::new(true),
            frames: Mutex::new(Vec::new()),
        })
    }

    async fn ok(_: Request, writer: ResponseWriter) -> Result<(), Error> {
        writer.write_status_and_headers(StatusCode::OK, HeaderMap::new(), Some(0))?.commit()
    }

    #[tokio::test]
    async fn closed_connections_leave_no_state_behind() {
        let bridge = RequestBridge::new(ok);

        let rejected = connection();
        let head = RequestHead::new(Method::GET, "/%zz", Version::HTTP_11);
        bridge.on_event(&rejected, Event::Head(head)).await;

        let broken = connection();
        let head = RequestHead::new(Method::POST, "/upload", Version::HTTP_11).chunked(true);
        bridge.on_event(&broken, Event::Head(head)).await;
        bridge.on_event(&broken, Event::Exception("bad chunk".into())).await;
        assert!(broken.is_open());
        broken.close();

        let legacy = connection();
        bridge.on_event(&legacy, Event::Head(RequestHead::new(Method::GET, "/", Version::HTTP_10))).await;

        assert!(!rejected.is_open());
        assert!(!legacy.is_open());
        // Only the keep-alive connection that saw an exception is still tracked.
        assert_eq!(bridge.connections.len(), 1);
        bridge.disconnect(broken.key());
        assert!(bridge.connections.is_empty());
        assert!(bridge.assembler.is_empty());
    }

    #[tokio::test]
    async fn exception_on_closing_request_forgets_the_connection() {
        let bridge = RequestBridge::new(ok);
        let conn = connection();

        let head = RequestHead::new(Method::POST, "/upload", Version::HTTP_11)
            .chunked(true)
            .header(http::header::CONNECTION, http::HeaderValue::from_static("close"));
        bridge.on_event(&conn, Event::Head(head)).await;
        bridge.on_event(&conn, Event::Exception("bad chunk".into())).await;

        assert!(!conn.is_open());
        assert!(bridge.connections.is_empty());
    }

    #[tokio::test]
    async fn keep_alive_connection_stays_tracked_until_disconnect() {
        let bridge = RequestBridge::new(ok);
        let conn = connection();

        bridge.on_event(&conn, Event::Head(RequestHead::new(Method::GET, "/", Version::HTTP_11))).await;
        assert_eq!(bridge.connections.len(), 1);
        assert_eq!(bridge.phase(conn.key()), Phase::AwaitingHead);

        bridge.disconnect(conn.key());
        assert!(bridge.connections.is_empty());
    }
}
