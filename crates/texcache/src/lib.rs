// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # texcache - Asynchronous content-addressed texture cache
//!
//! A concurrent cache that sits between a content-hash store (opaque byte
//! blobs named by 128-bit hashes) and a GPU-side texture backend (opaque
//! device handles). Lookups never block on a texture transfer: hits
//! resolve synchronously, misses queue a build for a background worker
//! pool and are served a stale-but-valid handle through a per-key fallback
//! mapping until the build lands.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use texcache::{
//!     CacheConfig, ContentHash, MemoryStore, PixelFormat, TexTopology, TextureBackend,
//!     TextureCache, TextureHandle, UserKey,
//! };
//!
//! struct MyBackend;
//! impl TextureBackend for MyBackend {
//!     fn alloc_2d(&self, _: TexTopology, _: &[u8]) -> Option<TextureHandle> {
//!         Some(TextureHandle(1))
//!     }
//!     fn release_2d(&self, _: TextureHandle) {}
//! }
//!
//! let store = Arc::new(MemoryStore::new());
//! let cache = TextureCache::new(CacheConfig::default(), store.clone(), Arc::new(MyBackend));
//!
//! // Per frame:
//! cache.user_clock_tick();
//! let mut scope = cache.scope_open();
//! let handle = cache.texture_for(
//!     &mut scope,
//!     UserKey::new(1, 1),
//!     ContentHash::new(0xabc, 0xdef),
//!     TexTopology::new(256, 256, PixelFormat::Rgba8),
//! );
//! if !handle.is_null() {
//!     // draw with `handle`; it stays valid until `scope` closes
//! }
//! scope.close();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                          Caller threads                            |
//! |        scope_open -> texture_for (pin + touch) -> scope_close      |
//! +--------------------------------------------------------------------+
//! |                          Striped tables                            |
//! |   primary: (hash, topology) -> node       fallback: key -> hash    |
//! +--------------------------------------------------------------------+
//! |   Request ring (mutex + condvar)  ->  transfer worker pool         |
//! |        hash store fetch -> backend alloc -> publish handle         |
//! +--------------------------------------------------------------------+
//! |    Evictor thread: dual-clock staleness sweep, handle release      |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`TextureCache`] | Owner of tables, worker pool, and evictor |
//! | [`TexScope`] | Pin scope; observed handles outlive it never |
//! | [`ContentHash`] / [`UserKey`] | 128-bit content and logical identities |
//! | [`TexTopology`] | Width, height, pixel format of a 2D texture |
//! | [`HashStore`] / [`TextureBackend`] | Collaborator traits |
//!
//! The single externally visible failure mode is a null
//! [`TextureHandle`]; callers tolerate it and re-enter on a later frame.

/// Texture backend collaborator trait and device handle type.
pub mod backend;
/// Cache facade: lookups, clocks, scopes, stats, lifecycle.
pub mod cache;
/// Wall-clock sources and the logical frame clock.
pub mod clock;
/// Sizing and eviction tunables.
pub mod config;
/// 128-bit content and key identities.
pub mod ident;
/// Reader-side pin scopes.
pub mod scope;
/// Hash store collaborator trait and in-memory implementation.
pub mod store;
/// Texture topology value types.
pub mod topology;

mod evictor;
mod fallback;
mod ring;
mod table;
mod worker;

pub use backend::{TextureBackend, TextureHandle};
pub use cache::{CacheStats, TextureCache};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::CacheConfig;
pub use ident::{ContentHash, UserKey};
pub use scope::TexScope;
pub use store::{HashStore, MemoryStore};
pub use topology::{PixelFormat, TexTopology};

/// texcache version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
