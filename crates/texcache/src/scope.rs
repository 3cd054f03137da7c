// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader-side pin scopes.
//!
//! Every handle a lookup returns stays valid until the scope that observed
//! it closes: the lookup pins the node (bumps its `scope_ref_count`) and
//! records a touch, and closing the scope unpins each touched node again.
//! Touches name nodes by identity (hash, topology), never by pointer, so a
//! touch cannot dangle.
//!
//! Touch buffers are recycled through a per-thread pool, so steady-state
//! frames allocate nothing on the lookup path.

use std::cell::RefCell;

use crate::ident::ContentHash;
use crate::table::NodeTable;
use crate::topology::TexTopology;

#[derive(Clone, Copy)]
struct Touch {
    hash: ContentHash,
    topology: TexTopology,
}

thread_local! {
    static TOUCH_BUFFERS: RefCell<Vec<Vec<Touch>>> = const { RefCell::new(Vec::new()) };
}

fn take_buffer() -> Vec<Touch> {
    TOUCH_BUFFERS.with(|pool| pool.borrow_mut().pop().unwrap_or_default())
}

fn recycle_buffer(mut buf: Vec<Touch>) {
    buf.clear();
    TOUCH_BUFFERS.with(|pool| pool.borrow_mut().push(buf));
}

/// Pin scope for one reader's frame.
///
/// Closes on drop; [`close`](Self::close) exists to make the end of the
/// pinned region explicit at the call site. Scopes must be closed on the
/// thread that opened them (the touch pool is thread-local).
pub struct TexScope<'a> {
    table: &'a NodeTable,
    touches: Vec<Touch>,
}

impl<'a> TexScope<'a> {
    pub(crate) fn open(table: &'a NodeTable) -> Self {
        Self {
            table,
            touches: take_buffer(),
        }
    }

    pub(crate) fn record(&mut self, hash: ContentHash, topology: TexTopology) {
        self.touches.push(Touch { hash, topology });
    }

    /// Number of pins currently held by this scope.
    #[must_use]
    pub fn pinned(&self) -> usize {
        self.touches.len()
    }

    /// Drop every pin taken through this scope.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for TexScope<'_> {
    fn drop(&mut self) {
        // Unpin in LIFO order, newest touch first.
        while let Some(touch) = self.touches.pop() {
            let found = self.table.release_pin(touch.hash, touch.topology);
            debug_assert!(found, "pinned node evicted while its scope was open");
        }
        recycle_buffer(std::mem::take(&mut self.touches));
    }
}
