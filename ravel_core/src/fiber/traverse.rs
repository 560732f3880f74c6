// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tree traversal utilities.

use alloc::vec::Vec;
use core::fmt;

use super::id::FiberId;
use super::store::FiberStore;
use crate::host::HostConfig;

/// An iterator over the direct children of a fiber.
///
/// Created by [`FiberStore::children`].
pub(crate) struct Children<'a, H: HostConfig> {
    store: &'a FiberStore<H>,
    current: Option<FiberId>,
}

impl<'a, H: HostConfig> Children<'a, H> {
    pub(crate) fn new(store: &'a FiberStore<H>, first: Option<FiberId>) -> Self {
        Self {
            store,
            current: first,
        }
    }
}

impl<H: HostConfig> Iterator for Children<'_, H> {
    type Item = FiberId;

    fn next(&mut self) -> Option<FiberId> {
        let id = self.current?;
        self.current = self.store[id].sibling;
        Some(id)
    }
}

impl<H: HostConfig> fmt::Debug for Children<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Children")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

/// A pre-order iterator over a fiber and its descendants.
///
/// Follows `child` and `sibling` links only, so it is unaffected by parent
/// links left stale by bail-outs. Created by [`FiberStore::subtree`].
pub(crate) struct Subtree<'a, H: HostConfig> {
    store: &'a FiberStore<H>,
    root: FiberId,
    stack: Vec<FiberId>,
}

impl<'a, H: HostConfig> Subtree<'a, H> {
    pub(crate) fn new(store: &'a FiberStore<H>, root: FiberId) -> Self {
        let mut stack = Vec::with_capacity(16);
        stack.push(root);
        Self { store, root, stack }
    }
}

impl<H: HostConfig> Iterator for Subtree<'_, H> {
    type Item = FiberId;

    fn next(&mut self) -> Option<FiberId> {
        let id = self.stack.pop()?;
        let fiber = &self.store[id];
        // The root's own siblings are outside the subtree.
        if id != self.root
            && let Some(sibling) = fiber.sibling
        {
            self.stack.push(sibling);
        }
        if let Some(child) = fiber.child {
            self.stack.push(child);
        }
        Some(id)
    }
}

impl<H: HostConfig> fmt::Debug for Subtree<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subtree")
            .field("root", &self.root)
            .field("pending", &self.stack.len())
            .finish_non_exhaustive()
    }
}
