//! Unified error type.

use crate::connection::ConnectionKey;

/// A boxed error raised by an engine while handling a request.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by h1bridge's fallible operations.
///
/// None of these ever escape [`RequestBridge::on_event`](crate::RequestBridge::on_event):
/// the bridge turns each one into a synthesized response, a dropped event or
/// a closed connection. They surface to engines through the
/// [`ResponseWriter`](crate::ResponseWriter) API and to callers of the
/// lower-level components.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The terminal chunk arrived on a connection with no pending chunked request.
    #[error("no pending chunked request for connection {0}")]
    Assembly(ConnectionKey),

    /// The request target cannot be resolved against the base URI.
    #[error("malformed request target `{target}`: {reason}")]
    MalformedTarget { target: String, reason: String },

    /// The underlying connection failed to write a frame.
    #[error("transport write failed: {0}")]
    TransportWrite(#[from] std::io::Error),

    /// The engine failed while handling the request.
    #[error("{0}")]
    Engine(BoxError),

    /// `write_status_and_headers` was called a second time.
    #[error("response status and headers were already written")]
    HeadersAlreadyWritten,

    /// Body bytes or a commit arrived before `write_status_and_headers`.
    #[error("response status and headers were not written yet")]
    HeadersNotWritten,

    /// The response was already committed or failed.
    #[error("response is already finished")]
    AlreadyCommitted,

    /// The connection is no longer open for writing.
    #[error("connection is closed")]
    ConnectionClosed,
}

impl Error {
    pub(crate) fn engine(err: impl Into<BoxError>) -> Self {
        Self::Engine(err.into())
    }
}
