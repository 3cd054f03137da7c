// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hash store collaborator: content-addressed blob source.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ident::ContentHash;

/// Source of immutable byte blobs addressed by content hash.
///
/// `None` means the blob is not available *yet*; the cache treats this as
/// "try again later", never as an error. Returned data is shared and must
/// not change for a given hash (content addressing).
pub trait HashStore: Send + Sync {
    fn data_from_hash(&self, hash: ContentHash) -> Option<Arc<[u8]>>;
}

/// In-memory [`HashStore`] backed by a hash map.
///
/// Suitable for tests and for hosts that stage blobs themselves.
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<ContentHash, Arc<[u8]>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `data` under `hash`. Replaces any prior blob for the hash.
    pub fn insert(&self, hash: ContentHash, data: impl Into<Arc<[u8]>>) {
        self.blobs.write().insert(hash, data.into());
    }

    /// Drop the blob for `hash`, making it unavailable again.
    pub fn remove(&self, hash: ContentHash) {
        self.blobs.write().remove(&hash);
    }
}

impl HashStore for MemoryStore {
    fn data_from_hash(&self, hash: ContentHash) -> Option<Arc<[u8]>> {
        self.blobs.read().get(&hash).cloned()
    }
}
