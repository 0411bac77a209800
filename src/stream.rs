//! A [`Connection`] over any tokio byte stream.
//!
//! [`StreamConnection::spawn`] moves the write half of a socket (or anything
//! `AsyncWrite`) into a dedicated writer task. `write` only queues the frame;
//! the task encodes it, writes it out, flushes, and resolves the frame's
//! [`Completion`]. Frames hit the wire in the order they were queued, and a
//! close queued after a frame takes effect only once that frame is out.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{Completion, CompletionSender, Connection, ConnectionKey};
use crate::frame::Frame;

enum Command {
    Write(Frame, CompletionSender),
    Close,
}

/// A connection whose frames are written by a background tokio task.
pub struct StreamConnection {
    key: ConnectionKey,
    remote_addr: Option<SocketAddr>,
    open: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Command>,
}

impl StreamConnection {
    /// Starts the writer task for `io` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<W>(io: W, remote_addr: Option<SocketAddr>) -> Arc<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let key = ConnectionKey::next();
        let open = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(writer_task(key, io, rx, Arc::clone(&open)));

        Arc::new(Self { key, remote_addr, open, tx })
    }
}

impl Connection for StreamConnection {
    fn key(&self) -> ConnectionKey {
        self.key
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn write(&self, frame: Frame) -> Completion {
        if !self.is_open() {
            return Completion::ready(Err(io::ErrorKind::NotConnected.into()));
        }
        let (done, completion) = Completion::channel();
        if self.tx.send(Command::Write(frame, done)).is_err() {
            return Completion::ready(Err(io::ErrorKind::NotConnected.into()));
        }
        completion
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Command::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn is_writable(&self) -> bool {
        // The queue is unbounded: an open connection always accepts a frame.
        self.is_open()
    }
}

async fn writer_task<W>(
    key: ConnectionKey,
    mut io: W,
    mut rx: mpsc::UnboundedReceiver<Command>,
    open: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(8 * 1024);

    while let Some(command) = rx.recv().await {
        let Command::Write(frame, done) = command else { break };

        buf.clear();
        frame.encode(&mut buf);
        let result = write_frame(&mut io, &buf).await;
        let failed = result.is_err();
        if let Err(e) = &result {
            warn!(conn = %key, error = %e, "stream write failed");
        }
        done.send(result);
        if failed {
            break;
        }
    }

    open.store(false, Ordering::Release);
    // Fail whatever is still queued rather than leaving completions hanging.
    rx.close();
    while let Ok(Command::Write(_, done)) = rx.try_recv() {
        done.send(Err(io::ErrorKind::NotConnected.into()));
    }
    let _ = io.shutdown().await;
    debug!(conn = %key, "stream writer stopped");
}

async fn write_frame<W: AsyncWrite + Unpin>(io: &mut W, bytes: &[u8]) -> io::Result<()> {
    io.write_all(bytes).await?;
    io.flush().await
}
