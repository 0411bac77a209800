//! The engine trait and type erasure.
//!
//! # How engines are stored
//!
//! The bridge holds exactly one engine for its whole life, shared by every
//! connection task. Any `async fn(Request, ResponseWriter) -> Result<(), E>`
//! is an engine through the blanket impl below; structs can implement
//! [`Engine`] by hand. Either way the bridge stores it as
//! `Arc<dyn Engine>` and pays one virtual call plus one boxed future per
//! request.
//!
//! ```text
//! async fn app(req, writer) -> Result<(), E> { … }  ← user writes this
//!        ↓ RequestBridge::new(app)
//! Arc::new(app) as Arc<dyn Engine>                   ← stored once
//!        ↓
//! engine.handle(req, writer)   per request           ← one vtable dispatch
//!        ↓
//! Box::pin(async { app(req, writer).await.map_err(Into::into) })
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::BoxError;
use crate::request::Request;
use crate::response::ResponseWriter;

/// A heap-allocated, type-erased engine invocation.
///
/// `Send + 'static` lets the transport drive it from any tokio worker.
pub type BoxFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'static>>;

/// The request-processing engine behind the bridge.
///
/// On success the engine must have called
/// [`ResponseWriter::commit`] exactly once. Returning an error (or
/// panicking) hands the response to the bridge's failure path instead.
pub trait Engine: Send + Sync + 'static {
    fn handle(&self, request: Request, writer: ResponseWriter) -> BoxFuture;
}

pub(crate) type BoxedEngine = Arc<dyn Engine>;

impl<F, Fut, E> Engine for F
where
    F: Fn(Request, ResponseWriter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn handle(&self, request: Request, writer: ResponseWriter) -> BoxFuture {
        let fut = (self)(request, writer);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}
