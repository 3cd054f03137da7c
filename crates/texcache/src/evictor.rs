// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background evictor.
//!
//! A single thread sweeps the primary table stripe by stripe and retires
//! every node that is unpinned, has completed at least one build, is not
//! being worked on, and is stale on *both* liveness axes: the wall clock
//! (bounds real release latency for device memory) and the user clock
//! (keeps a stalled host from flushing its working set). Textures are
//! released after the stripe lock is dropped.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cache::Shared;

#[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
pub(crate) fn spawn(shared: &Arc<Shared>) -> JoinHandle<()> {
    let shared = Arc::clone(shared);
    std::thread::Builder::new()
        .name("texcache-evict".to_string())
        .spawn(move || {
            while shared.running.load(Ordering::Acquire) {
                evict_pass(&shared);
                sleep_while_running(&shared, shared.cfg.sweep_interval);
            }
            log::debug!("[TexCache] evictor exiting");
        })
        .expect("failed to spawn evictor thread")
}

/// One full sweep over every stripe of the primary table.
pub(crate) fn evict_pass(shared: &Shared) {
    let now_us = shared.clock.now_micros();
    let user_clock = shared.user_clock.idx();
    let mut retired_total = 0usize;
    for stripe_idx in 0..shared.table.stripe_count() {
        let result = shared.table.sweep_stripe(
            stripe_idx,
            now_us,
            user_clock,
            shared.cfg.evict_age_us,
            shared.cfg.evict_age_ticks,
        );
        for texture in result.textures {
            shared.backend.release_2d(texture);
        }
        retired_total += result.retired;
        // Keep the sweep from monopolizing contended stripes.
        std::thread::yield_now();
    }
    if retired_total > 0 {
        shared
            .counters
            .evictions
            .fetch_add(retired_total as u64, Ordering::Relaxed);
        log::debug!("[TexCache] evicted {} stale nodes", retired_total);
    }
}

/// Sleep `total`, waking early when the cache is tearing down.
fn sleep_while_running(shared: &Shared, total: Duration) {
    const STEP: Duration = Duration::from_millis(50);
    let mut remaining = total;
    while !remaining.is_zero() && shared.running.load(Ordering::Acquire) {
        let chunk = remaining.min(STEP);
        std::thread::sleep(chunk);
        remaining -= chunk;
    }
}
