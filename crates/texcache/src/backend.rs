// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Texture backend collaborator: the device-side resource owner.

use crate::topology::TexTopology;

/// Opaque token for a device texture issued by the backend.
///
/// The raw value 0 is the distinguished null handle ("no texture").
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

impl TextureHandle {
    pub const NULL: TextureHandle = TextureHandle(0);

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Debug for TextureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "TextureHandle(null)")
        } else {
            write!(f, "TextureHandle({:#x})", self.0)
        }
    }
}

/// Allocator and owner of static 2D device textures.
///
/// `alloc_2d` is only called with a non-degenerate topology and a payload
/// of at least `topology.byte_len()` bytes; `None` signals allocation
/// failure and degrades to a null handle on the caller side. Every handle
/// returned from `alloc_2d` is eventually passed to `release_2d` exactly
/// once (by the evictor, by cache teardown, or by the worker when its node
/// was evicted mid-build).
pub trait TextureBackend: Send + Sync {
    fn alloc_2d(&self, topology: TexTopology, data: &[u8]) -> Option<TextureHandle>;
    fn release_2d(&self, handle: TextureHandle);
}
