// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cache facade: lookups, clocks, scopes, and lifecycle.
//!
//! [`TextureCache`] owns the shared state plus the transfer worker pool
//! and the evictor thread. Dropping the cache closes the request ring,
//! lets the workers drain what is already queued, joins every thread, and
//! releases the surviving device textures through the backend.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::backend::{TextureBackend, TextureHandle};
use crate::clock::{Clock, MonotonicClock, UserClock};
use crate::config::CacheConfig;
use crate::evictor;
use crate::fallback::FallbackTable;
use crate::ident::{ContentHash, UserKey};
use crate::ring::{BuildRequest, RequestRing};
use crate::scope::TexScope;
use crate::store::HashStore;
use crate::table::NodeTable;
use crate::topology::TexTopology;
use crate::worker;

#[derive(Default)]
pub(crate) struct Counters {
    pub nodes_inserted: AtomicU64,
    pub builds_completed: AtomicU64,
    pub builds_skipped: AtomicU64,
    pub evictions: AtomicU64,
    pub fallback_hits: AtomicU64,
}

/// Point-in-time view of cache activity.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    /// Nodes currently linked in the primary table.
    pub resident_nodes: usize,
    /// Nodes created by lookups (cache misses).
    pub nodes_inserted: u64,
    /// Builds published by the workers (including null results).
    pub builds_completed: u64,
    /// Requests dropped because another worker already owned the build.
    pub builds_skipped: u64,
    /// Nodes retired by the evictor.
    pub evictions: u64,
    /// Lookups served a non-null handle through the fallback table.
    pub fallback_hits: u64,
}

pub(crate) struct Shared {
    pub cfg: CacheConfig,
    pub table: NodeTable,
    pub fallback: FallbackTable,
    pub ring: RequestRing,
    pub store: Arc<dyn HashStore>,
    pub backend: Arc<dyn TextureBackend>,
    pub clock: Arc<dyn Clock>,
    pub user_clock: UserClock,
    pub running: AtomicBool,
    pub counters: Counters,
}

/// Asynchronous content-addressed texture cache.
///
/// `texture_for` resolves a (key, hash, topology) triple to a device
/// handle. Hits return synchronously; misses enqueue a build for the
/// worker pool and fall back to the key's last completed hash, so a frame
/// is never blocked on a texture transfer. A background evictor retires
/// nodes that are stale on both the wall clock and the host's frame clock.
pub struct TextureCache {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    evictor: Option<JoinHandle<()>>,
}

impl TextureCache {
    /// Create the cache and spawn its worker pool and evictor.
    #[must_use]
    pub fn new(
        cfg: CacheConfig,
        store: Arc<dyn HashStore>,
        backend: Arc<dyn TextureBackend>,
    ) -> Self {
        Self::with_clock(cfg, store, backend, Arc::new(MonotonicClock::new()))
    }

    /// Like [`new`](Self::new) with an explicit wall-clock source.
    ///
    /// Embedders with their own frame timing (and eviction tests) inject a
    /// [`ManualClock`](crate::ManualClock) here.
    #[must_use]
    pub fn with_clock(
        cfg: CacheConfig,
        store: Arc<dyn HashStore>,
        backend: Arc<dyn TextureBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cfg = cfg.normalized();
        let worker_count = cfg.worker_count();
        let shared = Arc::new(Shared {
            table: NodeTable::new(cfg.slot_count, cfg.stripe_count),
            fallback: FallbackTable::new(cfg.fallback_slot_count, cfg.fallback_stripe_count),
            ring: RequestRing::with_capacity(cfg.ring_bytes),
            store,
            backend,
            clock,
            user_clock: UserClock::default(),
            running: AtomicBool::new(true),
            counters: Counters::default(),
            cfg,
        });
        let workers = worker::spawn_pool(&shared, worker_count);
        let evictor = Some(evictor::spawn(&shared));
        log::debug!(
            "[TexCache] up: {} slots / {} stripes, {} workers",
            shared.cfg.slot_count,
            shared.cfg.stripe_count,
            worker_count
        );
        Self {
            shared,
            workers,
            evictor,
        }
    }

    /// Advance the logical frame clock by one. Call once per host frame.
    pub fn user_clock_tick(&self) {
        self.shared.user_clock.tick();
    }

    /// Current logical frame index.
    #[must_use]
    pub fn user_clock_idx(&self) -> u64 {
        self.shared.user_clock.idx()
    }

    /// Open a pin scope. Handles observed through it stay valid until the
    /// scope closes.
    #[must_use]
    pub fn scope_open(&self) -> TexScope<'_> {
        TexScope::open(&self.shared.table)
    }

    /// Resolve a texture, possibly via fallback; never blocks on a build.
    ///
    /// Returns the null handle when nothing is resident yet; the caller
    /// re-enters on a later frame. A miss creates the node and queues a
    /// build exactly once; while that build is in flight (or the hash is
    /// still unavailable), the key's last completed hash serves a stale
    /// handle instead.
    pub fn texture_for(
        &self,
        scope: &mut TexScope<'_>,
        key: UserKey,
        hash: ContentHash,
        topology: TexTopology,
    ) -> TextureHandle {
        if hash.is_zero() {
            return TextureHandle::NULL;
        }
        let shared = &self.shared;
        let now_us = shared.clock.now_micros();
        let user_clock = shared.user_clock.idx();

        let mut handle = TextureHandle::NULL;
        let mut resident = false;
        if let Some(found) = shared.table.find_and_touch(hash, topology, now_us, user_clock) {
            scope.record(hash, topology);
            handle = found;
            resident = true;
        }

        if !resident && shared.table.insert_if_absent(hash, topology) {
            shared.counters.nodes_inserted.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "[TexCache] miss: new node {:?} {}x{} {:?}",
                hash,
                topology.width,
                topology.height,
                topology.format
            );
            let req = BuildRequest {
                key,
                hash,
                topology,
            };
            // Infinite deadline: cede the CPU on a full ring, never drop.
            let queued = shared.ring.enqueue(&req, None);
            debug_assert!(queued || !shared.running.load(Ordering::Acquire));
        }

        if handle.is_null() {
            if let Some(fallback_hash) = shared.fallback.get(key) {
                if let Some(found) =
                    shared
                        .table
                        .find_and_touch(fallback_hash, topology, now_us, user_clock)
                {
                    scope.record(fallback_hash, topology);
                    if !found.is_null() {
                        shared.counters.fallback_hits.fetch_add(1, Ordering::Relaxed);
                    }
                    handle = found;
                }
            }
        }
        handle
    }

    /// Run one eviction sweep synchronously.
    ///
    /// The background evictor does this on its own cadence; exposing the
    /// pass lets hosts force reclamation (and tests drive it
    /// deterministically with a manual clock).
    pub fn evict_pass(&self) {
        evictor::evict_pass(&self.shared);
    }

    /// Snapshot of activity counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let c = &self.shared.counters;
        CacheStats {
            resident_nodes: self.shared.table.resident_nodes(),
            nodes_inserted: c.nodes_inserted.load(Ordering::Relaxed),
            builds_completed: c.builds_completed.load(Ordering::Relaxed),
            builds_skipped: c.builds_skipped.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            fallback_hits: c.fallback_hits.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TextureCache {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.ring.close();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = self.evictor.take() {
            let _ = handle.join();
        }
        let textures = self.shared.table.drain_all();
        let released = textures.len();
        for texture in textures {
            self.shared.backend.release_2d(texture);
        }
        if released > 0 {
            log::debug!("[TexCache] released {} textures at teardown", released);
        }
    }
}
