//! Shared utilities for the integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use h1bridge::{Completion, Connection, ConnectionKey, Frame, SharedConnection};

/// An in-memory connection that records every frame written to it.
pub struct RecordingConnection {
    key: ConnectionKey,
    remote_addr: Option<SocketAddr>,
    open: AtomicBool,
    writable: AtomicBool,
    fail_writes: AtomicBool,
    frames: Mutex<Vec<Frame>>,
}

#[allow(dead_code)]
impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Self::with_addr(None)
    }

    pub fn with_addr(remote_addr: Option<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            key: ConnectionKey::next(),
            remote_addr,
            open: AtomicBool::new(true),
            writable: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn shared(self: &Arc<Self>) -> SharedConnection {
        Arc::clone(self) as SharedConnection
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    /// Everything written so far, encoded as it would appear on the wire.
    pub fn wire(&self) -> String {
        let mut buf = BytesMut::new();
        for frame in self.frames.lock().unwrap().iter() {
            frame.encode(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    /// Makes every later write report an I/O error.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

impl Connection for RecordingConnection {
    fn key(&self) -> ConnectionKey {
        self.key
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn write(&self, frame: Frame) -> Completion {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Completion::ready(Err(std::io::ErrorKind::BrokenPipe.into()));
        }
        self.frames.lock().unwrap().push(frame);
        Completion::ready(Ok(()))
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_writable(&self) -> bool {
        self.is_open() && self.writable.load(Ordering::SeqCst)
    }
}
