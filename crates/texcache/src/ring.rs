// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded byte ring carrying build requests from lookups to the workers.
//!
//! Single mutex + condvar, 64-bit monotonic byte positions. The occupied
//! range is `write_pos - read_pos`, the free range is `size - occupied`.
//! Requests are fixed-size tuples (key, hash, topology) written and read
//! as a unit; a partial tuple can never be observed. Both sides broadcast
//! after moving a position because producers and consumers may be parked
//! on the same condvar.
//!
//! Shutdown: `close()` flips a flag under the mutex. Producers fail fast;
//! consumers drain the remaining tuples and then receive `None`.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::ident::{ContentHash, UserKey};
use crate::topology::TexTopology;

/// Serialized size of one request tuple: key (16) + hash (16) + topology (8).
pub(crate) const REQ_BYTES: usize = 40;

/// One queued texture build.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct BuildRequest {
    pub key: UserKey,
    pub hash: ContentHash,
    pub topology: TexTopology,
}

impl BuildRequest {
    fn encode(&self, out: &mut [u8; REQ_BYTES]) {
        let mut key = [0u8; 16];
        let mut hash = [0u8; 16];
        let mut top = [0u8; 8];
        self.key.write_le(&mut key);
        self.hash.write_le(&mut hash);
        self.topology.write_le(&mut top);
        out[..16].copy_from_slice(&key);
        out[16..32].copy_from_slice(&hash);
        out[32..].copy_from_slice(&top);
    }

    fn decode(buf: &[u8; REQ_BYTES]) -> Option<Self> {
        let mut key = [0u8; 16];
        let mut hash = [0u8; 16];
        let mut top = [0u8; 8];
        key.copy_from_slice(&buf[..16]);
        hash.copy_from_slice(&buf[16..32]);
        top.copy_from_slice(&buf[32..]);
        Some(Self {
            key: UserKey::read_le(&key),
            hash: ContentHash::read_le(&hash),
            topology: TexTopology::read_le(&top)?,
        })
    }
}

struct RingState {
    buf: Box<[u8]>,
    write_pos: u64,
    read_pos: u64,
    closed: bool,
}

impl RingState {
    fn occupied(&self) -> u64 {
        self.write_pos - self.read_pos
    }

    fn free(&self) -> u64 {
        self.buf.len() as u64 - self.occupied()
    }

    fn write_tuple(&mut self, bytes: &[u8; REQ_BYTES]) {
        let size = self.buf.len();
        let off = (self.write_pos % size as u64) as usize;
        let first = REQ_BYTES.min(size - off);
        self.buf[off..off + first].copy_from_slice(&bytes[..first]);
        self.buf[..REQ_BYTES - first].copy_from_slice(&bytes[first..]);
        self.write_pos += REQ_BYTES as u64;
    }

    fn read_tuple(&mut self) -> [u8; REQ_BYTES] {
        let size = self.buf.len();
        let off = (self.read_pos % size as u64) as usize;
        let mut bytes = [0u8; REQ_BYTES];
        let first = REQ_BYTES.min(size - off);
        bytes[..first].copy_from_slice(&self.buf[off..off + first]);
        bytes[first..].copy_from_slice(&self.buf[..REQ_BYTES - first]);
        self.read_pos += REQ_BYTES as u64;
        bytes
    }
}

/// SPMC request ring (one logical producer side, worker-pool consumers).
pub(crate) struct RequestRing {
    state: Mutex<RingState>,
    cv: Condvar,
}

impl RequestRing {
    /// `bytes` is clamped to hold at least one tuple.
    pub(crate) fn with_capacity(bytes: usize) -> Self {
        let bytes = bytes.max(REQ_BYTES);
        Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; bytes].into_boxed_slice(),
                write_pos: 0,
                read_pos: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Queue a build request.
    ///
    /// With `deadline = None` this parks until space frees up (never
    /// drops). With a deadline it fails once the deadline has passed while
    /// the ring is full; a deadline already in the past makes this a
    /// try-enqueue. Returns `false` on timeout or when the ring is closed.
    pub(crate) fn enqueue(&self, req: &BuildRequest, deadline: Option<Instant>) -> bool {
        let mut bytes = [0u8; REQ_BYTES];
        req.encode(&mut bytes);

        let mut state = self.state.lock();
        loop {
            if state.closed {
                return false;
            }
            if state.free() >= REQ_BYTES as u64 {
                state.write_tuple(&bytes);
                drop(state);
                self.cv.notify_all();
                return true;
            }
            match deadline {
                Some(d) => {
                    if Instant::now() >= d {
                        return false;
                    }
                    let _ = self.cv.wait_until(&mut state, d);
                }
                None => self.cv.wait(&mut state),
            }
        }
    }

    /// Take the oldest request, parking while the ring is empty.
    ///
    /// Returns `None` once the ring is closed and drained.
    pub(crate) fn dequeue(&self) -> Option<BuildRequest> {
        let mut state = self.state.lock();
        loop {
            if state.occupied() >= REQ_BYTES as u64 {
                let bytes = state.read_tuple();
                drop(state);
                self.cv.notify_all();
                match BuildRequest::decode(&bytes) {
                    Some(req) => return Some(req),
                    None => {
                        // Encode is the only writer, so this is unreachable.
                        debug_assert!(false, "request tuple failed to decode");
                        state = self.state.lock();
                        continue;
                    }
                }
            }
            if state.closed {
                return None;
            }
            self.cv.wait(&mut state);
        }
    }

    /// Stop accepting requests and wake every parked thread.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.cv.notify_all();
    }

    #[cfg(test)]
    fn occupied_tuples(&self) -> usize {
        (self.state.lock().occupied() as usize) / REQ_BYTES
    }
}
