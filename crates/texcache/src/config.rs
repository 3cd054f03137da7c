// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cache sizing and eviction thresholds.

use std::time::Duration;

use crate::ring::REQ_BYTES;

/// Tunables for [`TextureCache`](crate::TextureCache).
///
/// The defaults match the production sizing: 1024 slots across 64 stripes
/// for both tables, a 64 KiB request ring, and the 10 s / 10 tick dual
/// eviction threshold.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Primary table buckets.
    pub slot_count: usize,
    /// Lock stripes over the primary buckets.
    pub stripe_count: usize,
    /// Fallback table buckets.
    pub fallback_slot_count: usize,
    /// Lock stripes over the fallback buckets.
    pub fallback_stripe_count: usize,
    /// Request ring capacity in bytes.
    pub ring_bytes: usize,
    /// Transfer worker threads; `None` picks `min(4, cores - 1)`, at least 1.
    pub worker_threads: Option<usize>,
    /// Wall-clock age a node must exceed before eviction.
    pub evict_age_us: u64,
    /// User-clock age a node must exceed before eviction.
    pub evict_age_ticks: u64,
    /// Pause between full eviction sweeps.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            slot_count: 1024,
            stripe_count: 64,
            fallback_slot_count: 1024,
            fallback_stripe_count: 64,
            ring_bytes: 64 * 1024,
            worker_threads: None,
            evict_age_us: 10_000_000,
            evict_age_ticks: 10,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl CacheConfig {
    /// Clamp the sizing fields into a usable shape.
    ///
    /// Stripe counts never exceed their slot counts (a stripe guards the
    /// buckets congruent to its index), and the ring holds at least one
    /// request tuple.
    pub(crate) fn normalized(mut self) -> Self {
        self.slot_count = self.slot_count.max(1);
        self.stripe_count = self.stripe_count.clamp(1, self.slot_count);
        self.fallback_slot_count = self.fallback_slot_count.max(1);
        self.fallback_stripe_count = self.fallback_stripe_count.clamp(1, self.fallback_slot_count);
        self.ring_bytes = self.ring_bytes.max(REQ_BYTES);
        self
    }

    pub(crate) fn worker_count(&self) -> usize {
        match self.worker_threads {
            Some(n) => n.max(1),
            None => {
                let cores = std::thread::available_parallelism()
                    .map(std::num::NonZeroUsize::get)
                    .unwrap_or(1);
                cores.saturating_sub(1).clamp(1, 4)
            }
        }
    }
}
