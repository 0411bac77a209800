//! Reassembly of chunked request bodies.
//!
//! The transport delivers a chunked request as one head event followed by
//! chunk events on the same connection. [`ChunkAssembler`] keeps the head and
//! the fragments received so far, keyed by [`ConnectionKey`], until the
//! terminal chunk turns them into one request with a materialized body.
//!
//! Events for one connection arrive serially, so arrival order is body order.
//! Distinct connections touch distinct keys of a sharded concurrent map: there
//! is no lock shared by every connection.

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::connection::ConnectionKey;
use crate::error::Error;
use crate::request::{Chunk, RequestHead};

/// A chunked request whose terminal chunk has not arrived yet.
#[derive(Debug)]
struct PendingRequest {
    head: RequestHead,
    fragments: Vec<Bytes>,
}

impl PendingRequest {
    fn into_request(self) -> RequestHead {
        let Self { mut head, mut fragments } = self;
        head.body = match fragments.len() {
            0 => Bytes::new(),
            1 => fragments.swap_remove(0),
            _ => {
                let len = fragments.iter().map(Bytes::len).sum();
                let mut body = BytesMut::with_capacity(len);
                for fragment in &fragments {
                    body.extend_from_slice(fragment);
                }
                body.freeze()
            }
        };
        head
    }
}

/// Per-connection accumulator of chunked request bodies.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    pending: DashMap<ConnectionKey, PendingRequest>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts collecting a chunked request for `key`.
    ///
    /// A request already pending for `key` is replaced.
    pub fn begin(&self, key: ConnectionKey, head: RequestHead) {
        let replaced = self
            .pending
            .insert(key, PendingRequest { head, fragments: Vec::new() })
            .is_some();
        if replaced {
            debug!(conn = %key, "replaced unfinished chunked request");
        }
    }

    /// Appends one chunk's payload to the request pending for `key`.
    ///
    /// Stray chunks (nothing pending for `key`) and absent chunks are dropped
    /// with a diagnostic.
    pub fn add_chunk(&self, key: ConnectionKey, chunk: Option<Chunk>) {
        let Some(chunk) = chunk else {
            warn!(conn = %key, "ignoring absent chunk");
            return;
        };

        match self.pending.get_mut(&key) {
            Some(mut pending) => {
                let payload = chunk.into_payload();
                trace!(conn = %key, len = payload.len(), "chunk received");
                if !payload.is_empty() {
                    pending.fragments.push(payload);
                }
            }
            None => warn!(conn = %key, "dropping chunk with no pending request"),
        }
    }

    /// Removes the request pending for `key` and returns it with its body set
    /// to the concatenation of every fragment, in arrival order.
    pub fn assemble(&self, key: ConnectionKey) -> Result<RequestHead, Error> {
        let (_, pending) = self.pending.remove(&key).ok_or(Error::Assembly(key))?;
        let request = pending.into_request();
        debug!(conn = %key, len = request.body.len(), "chunked request assembled");
        Ok(request)
    }

    /// Drops whatever is pending for `key`. Returns whether anything was.
    pub fn discard(&self, key: ConnectionKey) -> bool {
        self.pending.remove(&key).is_some()
    }

    pub fn is_pending(&self, key: ConnectionKey) -> bool {
        self.pending.contains_key(&key)
    }

    /// Number of connections with a chunked request in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
