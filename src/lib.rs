//! # h1bridge
//!
//! The glue between an HTTP/1.x transport and a request-processing engine.
//! It turns decoded protocol events into engine invocations and engine output
//! back into protocol frames.
//!
//! ## The contract
//!
//! The transport owns sockets, parsing and TLS. It hands the bridge decoded
//! [`Event`]s (a request head, a chunk of a chunked body, or an exception)
//! together with a [`Connection`] it can write [`Frame`]s to. The engine owns
//! the application: it receives a fully materialized [`Request`] and answers
//! through a [`ResponseWriter`].
//!
//! What the bridge does in between:
//!
//! - **Chunk reassembly**: [`ChunkAssembler`] buffers chunked bodies per
//!   connection until the terminal chunk
//! - **`100 Continue`**: sent for `Expect: 100-continue` chunked uploads
//! - **Output mode**: buffered with `Content-Length`, or chunked on HTTP/1.1
//!   when the engine cannot say how long the body is
//! - **Keep-alive**: the connection closes after the response exactly when
//!   the client asked for it or speaks HTTP/1.0
//! - **Failures**: malformed targets get a `400`, engine errors, panics and
//!   transport exceptions get a `500`
//!
//! What it does not do: decode bytes, route, or keep a session between
//! requests.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use h1bridge::{Chunk, Event, Request, RequestBridge, RequestHead, ResponseWriter, StreamConnection};
//! use http::{HeaderMap, Method, StatusCode, Version};
//!
//! async fn echo(req: Request, writer: ResponseWriter) -> Result<(), h1bridge::Error> {
//!     let body = writer.write_status_and_headers(StatusCode::OK, HeaderMap::new(), None)?;
//!     body.write(req.body())?;
//!     body.commit()
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let bridge = Arc::new(RequestBridge::new(echo));
//!     let conn: h1bridge::SharedConnection = StreamConnection::spawn(tokio::io::stdout(), None);
//!
//!     let head = RequestHead::new(Method::POST, "/echo", Version::HTTP_11).chunked(true);
//!     bridge.on_event(&conn, Event::Head(head)).await;
//!     bridge.on_event(&conn, Event::Chunk(Chunk::new("hello"))).await;
//!     bridge.on_event(&conn, Event::Chunk(Chunk::last(""))).await;
//! }
//! ```

mod assembler;
mod bridge;
mod config;
mod connection;
mod engine;
mod error;
mod frame;
mod request;
mod response;
mod security;
mod stream;
mod target;

pub use assembler::ChunkAssembler;
pub use bridge::{Event, MALFORMED_TARGET_BODY, Phase, RequestBridge, RequestBridgeBuilder};
pub use config::{BridgeConfig, DEFAULT_BASE_URI};
pub use connection::{Completion, CompletionSender, Connection, ConnectionKey, SharedConnection};
pub use engine::{BoxFuture, Engine};
pub use error::{BoxError, Error};
pub use frame::{Frame, ResponseHead};
pub use request::{Chunk, Request, RequestHead};
pub use response::{BodySink, ResponseWriter, WriterState};
pub use security::{
    AuthScheme, Credentials, DefaultSecurityContextFactory, SecurityContext, SecurityContextFactory,
};
pub use stream::StreamConnection;
