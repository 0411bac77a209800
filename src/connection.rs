//! The transport boundary.
//!
//! The bridge never touches sockets. It talks to a [`Connection`]: an opaque
//! per-connection handle with a fire-and-forget write primitive, a close
//! primitive and two liveness queries. Every write hands back a
//! [`Completion`]; the bridge only ever looks at it to decide whether the
//! connection should be closed once the frame is out.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::frame::Frame;

// ── ConnectionKey ─────────────────────────────────────────────────────────────

/// Opaque identity of one transport connection.
///
/// Only ever used as a map key. Transports either allocate one with
/// [`ConnectionKey::next`] or wrap an identifier they already have.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnectionKey(u64);

impl ConnectionKey {
    /// Allocates a process-unique key.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for ConnectionKey {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// One transport connection, as seen by the bridge.
///
/// Implementations must not block in any of these methods: `write` queues the
/// frame and reports the outcome through the returned [`Completion`].
pub trait Connection: Send + Sync + 'static {
    fn key(&self) -> ConnectionKey;

    /// Address of the peer, when the transport knows it.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Queues one frame for writing.
    fn write(&self, frame: Frame) -> Completion;

    /// Closes the connection. Idempotent.
    fn close(&self);

    fn is_open(&self) -> bool;

    fn is_writable(&self) -> bool;
}

/// A connection shared between the bridge, the response writer and whatever
/// background task observes write completions.
pub type SharedConnection = Arc<dyn Connection>;

// ── Completion ────────────────────────────────────────────────────────────────

/// Outcome of one [`Connection::write`].
///
/// Either already resolved (synchronous transports, or a write rejected up
/// front) or backed by a oneshot channel the transport resolves later.
/// Awaiting it yields the write result; a transport that drops the sender
/// without answering counts as a failed write.
#[derive(Debug)]
pub struct Completion(Inner);

#[derive(Debug)]
enum Inner {
    Ready(Option<io::Result<()>>),
    Pending(oneshot::Receiver<io::Result<()>>),
}

/// The transport's half of a pending [`Completion`].
#[derive(Debug)]
pub struct CompletionSender(oneshot::Sender<io::Result<()>>);

impl CompletionSender {
    pub fn send(self, result: io::Result<()>) {
        // The receiver is gone when nobody cares about the outcome.
        let _ = self.0.send(result);
    }
}

impl Completion {
    /// A completion that has already resolved.
    pub fn ready(result: io::Result<()>) -> Self {
        Self(Inner::Ready(Some(result)))
    }

    /// A pending completion and the sender that resolves it.
    pub fn channel() -> (CompletionSender, Self) {
        let (tx, rx) = oneshot::channel();
        (CompletionSender(tx), Self(Inner::Pending(rx)))
    }

    /// Returns the result if it is already known, without waiting.
    fn try_take(&mut self) -> Option<io::Result<()>> {
        match &mut self.0 {
            Inner::Ready(result) => result.take(),
            Inner::Pending(rx) => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
            },
        }
    }

    /// Applies `after` once the write has resolved.
    ///
    /// Resolved completions are handled on the spot. Pending ones are watched
    /// from a task on the current tokio runtime.
    pub(crate) fn then(mut self, conn: &SharedConnection, after: AfterWrite) {
        if let Some(result) = self.try_take() {
            after.apply(&**conn, result);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let conn = Arc::clone(conn);
                handle.spawn(async move {
                    let result = self.await;
                    after.apply(&*conn, result);
                });
            }
            Err(_) => {
                warn!(conn = %conn.key(), "no runtime to observe write completion");
                if after == AfterWrite::Close {
                    conn.close();
                }
            }
        }
    }
}

impl Future for Completion {
    type Output = io::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.0 {
            Inner::Ready(result) => Poll::Ready(result.take().unwrap_or(Ok(()))),
            Inner::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|res| res.unwrap_or_else(|_| Err(dropped()))),
        }
    }
}

fn dropped() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "transport dropped the write")
}

// ── Close policy ──────────────────────────────────────────────────────────────

/// What happens to the connection once a write resolves.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AfterWrite {
    /// Close whether the write succeeded or not.
    Close,
    /// Keep the connection unless the write failed.
    CloseOnFailure,
}

impl AfterWrite {
    fn apply(self, conn: &dyn Connection, result: io::Result<()>) {
        match (self, result) {
            (_, Err(e)) => {
                warn!(conn = %conn.key(), error = %e, "write failed, closing connection");
                conn.close();
            }
            (Self::Close, Ok(())) => {
                trace!(conn = %conn.key(), "closing connection");
                conn.close();
            }
            (Self::CloseOnFailure, Ok(())) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique() {
        let a = ConnectionKey::next();
        let b = ConnectionKey::next();
        assert_ne!(a, b);
        assert_eq!(ConnectionKey::from(7).to_string(), "#7");
    }

    #[tokio::test]
    async fn dropped_sender_is_a_failed_write() {
        let (tx, completion) = Completion::channel();
        drop(tx);
        let err = completion.await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn pending_completion_resolves_with_the_transport_result() {
        let (tx, completion) = Completion::channel();
        tx.send(Ok(()));
        assert!(completion.await.is_ok());
    }
}
