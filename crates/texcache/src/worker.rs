// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transfer worker pool.
//!
//! Workers drain the request ring, fetch blob bytes from the hash store,
//! allocate a device texture, and publish it into the node that the lookup
//! created. The `is_working` claim keeps concurrent workers off the same
//! node; after the claim, every result -- including "bytes not available
//! yet" -- is published as-is so the node records a completed build
//! attempt. The (key, hash) pair is recorded in the fallback table either
//! way.
//!
//! No stripe lock is ever held across a hash-store or backend call.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::backend::TextureHandle;
use crate::cache::Shared;
use crate::ring::BuildRequest;

#[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
pub(crate) fn spawn_pool(shared: &Arc<Shared>, count: usize) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|idx| {
            let shared = Arc::clone(shared);
            std::thread::Builder::new()
                .name(format!("texcache-xfer-{idx}"))
                .spawn(move || worker_loop(&shared))
                .expect("failed to spawn transfer worker")
        })
        .collect()
}

fn worker_loop(shared: &Shared) {
    while let Some(req) = shared.ring.dequeue() {
        build_one(shared, &req);
    }
    log::debug!("[TexCache] transfer worker draining done, exiting");
}

fn build_one(shared: &Shared, req: &BuildRequest) {
    if shared.table.try_claim(req.hash, req.topology) {
        // Bytes may not be staged yet; a short or missing payload publishes
        // a null texture and the next lookup after eviction retries.
        let data = shared.store.data_from_hash(req.hash);

        let mut texture = TextureHandle::NULL;
        if let Some(data) = &data {
            if !req.topology.is_degenerate() && data.len() >= req.topology.byte_len() {
                match shared.backend.alloc_2d(req.topology, data) {
                    Some(handle) => texture = handle,
                    None => log::warn!(
                        "[TexCache] backend refused {}x{} {:?} allocation for {:?}",
                        req.topology.width,
                        req.topology.height,
                        req.topology.format,
                        req.hash
                    ),
                }
            }
        }

        if shared.table.publish(req.hash, req.topology, texture) {
            shared
                .counters
                .builds_completed
                .fetch_add(1, Ordering::Relaxed);
            if !texture.is_null() {
                log::debug!("[TexCache] built {:?} -> {:?}", req.hash, texture);
            }
        } else if !texture.is_null() {
            // Node evicted between claim and publish; the handle is ours.
            shared.backend.release_2d(texture);
        }
    } else {
        shared
            .counters
            .builds_skipped
            .fetch_add(1, Ordering::Relaxed);
    }

    if !req.key.is_zero() && !req.hash.is_zero() {
        shared.fallback.put(req.key, req.hash);
    }
}
