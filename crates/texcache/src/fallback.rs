// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Striped fallback table: user key -> last-known-good content hash.
//!
//! When a lookup cannot produce a texture for the requested hash yet, the
//! last hash that completed a build under the same key is used to serve a
//! stale-but-valid handle. Entries are last-writer-wins and only ever hold
//! non-zero (key, hash) pairs. Bucketing mirrors the primary table, keyed
//! on the user key's high half.

use parking_lot::RwLock;

use crate::ident::{ContentHash, UserKey};

struct FallbackEntry {
    key: UserKey,
    hash: ContentHash,
}

pub(crate) struct FallbackTable {
    stripes: Vec<RwLock<Vec<Vec<FallbackEntry>>>>,
    slot_count: u64,
    stripe_count: usize,
}

impl FallbackTable {
    pub(crate) fn new(slot_count: usize, stripe_count: usize) -> Self {
        debug_assert!(stripe_count >= 1 && stripe_count <= slot_count);
        let stripes = (0..stripe_count)
            .map(|idx| {
                let local_slots = (slot_count - idx + stripe_count - 1) / stripe_count;
                RwLock::new((0..local_slots).map(|_| Vec::new()).collect())
            })
            .collect();
        Self {
            stripes,
            slot_count: slot_count as u64,
            stripe_count,
        }
    }

    fn place(&self, key: UserKey) -> (usize, usize) {
        let slot = (key.bucket() % self.slot_count) as usize;
        (slot % self.stripe_count, slot / self.stripe_count)
    }

    /// Last hash recorded for `key`, if any.
    pub(crate) fn get(&self, key: UserKey) -> Option<ContentHash> {
        if key.is_zero() {
            return None;
        }
        let (stripe_idx, slot_idx) = self.place(key);
        let stripe = self.stripes[stripe_idx].read();
        stripe[slot_idx]
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.hash)
    }

    /// Record `key -> hash`, replacing any previous mapping for the key.
    pub(crate) fn put(&self, key: UserKey, hash: ContentHash) {
        debug_assert!(!key.is_zero() && !hash.is_zero());
        let (stripe_idx, slot_idx) = self.place(key);
        let mut stripe = self.stripes[stripe_idx].write();
        let chain = &mut stripe[slot_idx];
        match chain.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.hash = hash,
            None => chain.push(FallbackEntry { key, hash }),
        }
    }
}
