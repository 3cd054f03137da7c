// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Striped primary node table.
//!
//! Nodes are keyed by (content hash, topology) and live in per-slot chains
//! kept in insertion order; no two nodes with the same identity coexist in
//! a chain. Bucketing follows the hash's high half:
//! `slot = hash.hi % slot_count`, `stripe = slot % stripe_count`. A stripe
//! owns the slots congruent to its index together with a free list of
//! retired node boxes, all guarded by one `RwLock`.
//!
//! Lock discipline:
//! - lookups, touches and build claims run under the stripe **read** lock;
//!   the per-node fields they change are atomics,
//! - insertion, build publication and eviction run under the **write**
//!   lock; `texture` is a plain field because only write-lock holders
//!   mutate it,
//! - the evictor re-checks `scope_ref_count` under the write lock, which
//!   excludes readers, so a touch can never pin a node that is being
//!   retired.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::backend::TextureHandle;
use crate::ident::ContentHash;
use crate::topology::TexTopology;

/// One cached texture identity and its liveness metadata.
pub(crate) struct TexNode {
    hash: ContentHash,
    topology: TexTopology,
    /// Device handle; null until the build publishes, then never rewritten.
    texture: TextureHandle,
    /// Claimed by exactly one transfer worker at a time.
    is_working: AtomicBool,
    /// Successful build publications for this node storage.
    load_count: AtomicU64,
    /// Open-scope pins; a pinned node is never evicted.
    scope_ref_count: AtomicU64,
    last_touch_us: AtomicU64,
    last_user_clock: AtomicU64,
}

impl TexNode {
    fn empty() -> Self {
        Self {
            hash: ContentHash::ZERO,
            topology: TexTopology::new(0, 0, crate::topology::PixelFormat::R8),
            texture: TextureHandle::NULL,
            is_working: AtomicBool::new(false),
            load_count: AtomicU64::new(0),
            scope_ref_count: AtomicU64::new(0),
            last_touch_us: AtomicU64::new(0),
            last_user_clock: AtomicU64::new(0),
        }
    }

    fn reset(&mut self, hash: ContentHash, topology: TexTopology) {
        self.hash = hash;
        self.topology = topology;
        self.texture = TextureHandle::NULL;
        *self.is_working.get_mut() = false;
        *self.load_count.get_mut() = 0;
        *self.scope_ref_count.get_mut() = 0;
        *self.last_touch_us.get_mut() = 0;
        *self.last_user_clock.get_mut() = 0;
    }

    fn matches(&self, hash: ContentHash, topology: TexTopology) -> bool {
        self.hash == hash && self.topology == topology
    }

    /// Pin and stamp both liveness clocks. Read-lock guarded.
    fn touch(&self, now_us: u64, user_clock: u64) {
        self.scope_ref_count.fetch_add(1, Ordering::Relaxed);
        self.last_touch_us.store(now_us, Ordering::Relaxed);
        self.last_user_clock.store(user_clock, Ordering::Relaxed);
    }

    fn is_expired(&self, now_us: u64, user_clock: u64, age_us: u64, age_ticks: u64) -> bool {
        self.scope_ref_count.load(Ordering::Relaxed) == 0
            && self.last_touch_us.load(Ordering::Relaxed).saturating_add(age_us) <= now_us
            && self
                .last_user_clock
                .load(Ordering::Relaxed)
                .saturating_add(age_ticks)
                <= user_clock
            && self.load_count.load(Ordering::Relaxed) != 0
            && !self.is_working.load(Ordering::Acquire)
    }
}

struct StripeState {
    /// Chains for the slots this stripe guards, in insertion order.
    slots: Vec<Vec<Box<TexNode>>>,
    /// Retired node storage, reused before allocating fresh boxes.
    free: Vec<Box<TexNode>>,
}

/// Result of sweeping one stripe: how many nodes were retired and the
/// non-null handles the caller must release outside the lock.
pub(crate) struct SweepResult {
    pub retired: usize,
    pub textures: Vec<TextureHandle>,
}

pub(crate) struct NodeTable {
    stripes: Vec<RwLock<StripeState>>,
    slot_count: u64,
    stripe_count: usize,
}

impl NodeTable {
    pub(crate) fn new(slot_count: usize, stripe_count: usize) -> Self {
        debug_assert!(stripe_count >= 1 && stripe_count <= slot_count);
        let stripes = (0..stripe_count)
            .map(|idx| {
                // Slots congruent to this stripe index.
                let local_slots = (slot_count - idx + stripe_count - 1) / stripe_count;
                RwLock::new(StripeState {
                    slots: (0..local_slots).map(|_| Vec::new()).collect(),
                    free: Vec::new(),
                })
            })
            .collect();
        Self {
            stripes,
            slot_count: slot_count as u64,
            stripe_count,
        }
    }

    pub(crate) fn stripe_count(&self) -> usize {
        self.stripe_count
    }

    fn place(&self, hash: ContentHash) -> (usize, usize) {
        let slot = (hash.bucket() % self.slot_count) as usize;
        (slot % self.stripe_count, slot / self.stripe_count)
    }

    /// Find a node and touch it (pin + stamp clocks).
    ///
    /// `Some(handle)` reports the node's current texture, which may still
    /// be the null handle while its build is in flight. `None` means no
    /// node with this identity exists. Every `Some` return pins the node
    /// once; the caller owes a matching [`release_pin`](Self::release_pin).
    pub(crate) fn find_and_touch(
        &self,
        hash: ContentHash,
        topology: TexTopology,
        now_us: u64,
        user_clock: u64,
    ) -> Option<TextureHandle> {
        let (stripe_idx, slot_idx) = self.place(hash);
        let stripe = self.stripes[stripe_idx].read();
        let node = stripe.slots[slot_idx]
            .iter()
            .find(|n| n.matches(hash, topology))?;
        let handle = node.texture;
        node.touch(now_us, user_clock);
        Some(handle)
    }

    /// Insert a fresh node unless the identity already exists.
    ///
    /// Double-checks under the write lock, so concurrent inserters agree
    /// on a single node; exactly one caller sees `true` and owns the build
    /// request. Retired storage from the stripe free list is reused first.
    pub(crate) fn insert_if_absent(&self, hash: ContentHash, topology: TexTopology) -> bool {
        let (stripe_idx, slot_idx) = self.place(hash);
        let mut stripe = self.stripes[stripe_idx].write();
        if stripe.slots[slot_idx]
            .iter()
            .any(|n| n.matches(hash, topology))
        {
            return false;
        }
        let mut node = stripe.free.pop().unwrap_or_else(|| Box::new(TexNode::empty()));
        node.reset(hash, topology);
        stripe.slots[slot_idx].push(node);
        true
    }

    /// Drop one pin taken by [`find_and_touch`](Self::find_and_touch).
    ///
    /// Returns whether the node was found; a missing node at unpin time
    /// means a pinned node was evicted, which the eviction predicate rules
    /// out.
    pub(crate) fn release_pin(&self, hash: ContentHash, topology: TexTopology) -> bool {
        let (stripe_idx, slot_idx) = self.place(hash);
        let stripe = self.stripes[stripe_idx].read();
        match stripe.slots[slot_idx]
            .iter()
            .find(|n| n.matches(hash, topology))
        {
            Some(node) => {
                let prev = node.scope_ref_count.fetch_sub(1, Ordering::Relaxed);
                debug_assert!(prev > 0, "scope unpin without a matching pin");
                true
            }
            None => false,
        }
    }

    /// Claim the build for a node: `is_working` 0 -> 1.
    ///
    /// Refuses nodes that already published a build (`load_count != 0`),
    /// so a replayed request can never rewrite a texture.
    pub(crate) fn try_claim(&self, hash: ContentHash, topology: TexTopology) -> bool {
        let (stripe_idx, slot_idx) = self.place(hash);
        let stripe = self.stripes[stripe_idx].read();
        let Some(node) = stripe.slots[slot_idx]
            .iter()
            .find(|n| n.matches(hash, topology))
        else {
            return false;
        };
        if node.load_count.load(Ordering::Relaxed) != 0 {
            return false;
        }
        node.is_working
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Publish a finished build: store the texture, clear `is_working`,
    /// bump `load_count`.
    ///
    /// Returns `false` when the node vanished since the claim; the caller
    /// owns the handle in that case and must release it.
    pub(crate) fn publish(
        &self,
        hash: ContentHash,
        topology: TexTopology,
        texture: TextureHandle,
    ) -> bool {
        let (stripe_idx, slot_idx) = self.place(hash);
        let mut stripe = self.stripes[stripe_idx].write();
        let Some(node) = stripe.slots[slot_idx]
            .iter_mut()
            .find(|n| n.matches(hash, topology))
        else {
            return false;
        };
        debug_assert!(node.texture.is_null(), "texture published twice");
        node.texture = texture;
        node.is_working.store(false, Ordering::Release);
        node.load_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Retire every expired node in one stripe.
    ///
    /// Probes under the read lock first and only takes the write lock when
    /// the probe found work. Retired storage goes back on the stripe free
    /// list; the returned handles must be released by the caller after the
    /// lock is gone.
    pub(crate) fn sweep_stripe(
        &self,
        stripe_idx: usize,
        now_us: u64,
        user_clock: u64,
        age_us: u64,
        age_ticks: u64,
    ) -> SweepResult {
        let mut result = SweepResult {
            retired: 0,
            textures: Vec::new(),
        };
        {
            let stripe = self.stripes[stripe_idx].read();
            let has_work = stripe
                .slots
                .iter()
                .flatten()
                .any(|n| n.is_expired(now_us, user_clock, age_us, age_ticks));
            if !has_work {
                return result;
            }
        }
        let mut stripe = self.stripes[stripe_idx].write();
        let StripeState { slots, free } = &mut *stripe;
        for chain in slots.iter_mut() {
            let mut idx = 0;
            while idx < chain.len() {
                if chain[idx].is_expired(now_us, user_clock, age_us, age_ticks) {
                    let mut node = chain.remove(idx);
                    if !node.texture.is_null() {
                        result.textures.push(node.texture);
                    }
                    node.texture = TextureHandle::NULL;
                    free.push(node);
                    result.retired += 1;
                } else {
                    idx += 1;
                }
            }
        }
        result
    }

    /// Unlink every node, returning the live handles. Teardown only.
    pub(crate) fn drain_all(&self) -> Vec<TextureHandle> {
        let mut textures = Vec::new();
        for stripe in &self.stripes {
            let mut stripe = stripe.write();
            for chain in stripe.slots.iter_mut() {
                for node in chain.drain(..) {
                    if !node.texture.is_null() {
                        textures.push(node.texture);
                    }
                }
            }
        }
        textures
    }

    /// Nodes currently linked into chains.
    pub(crate) fn resident_nodes(&self) -> usize {
        self.stripes
            .iter()
            .map(|s| s.read().slots.iter().map(Vec::len).sum::<usize>())
            .sum()
    }

    #[cfg(test)]
    fn free_list_len(&self, stripe_idx: usize) -> usize {
        self.stripes[stripe_idx].read().free.len()
    }
}
