// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fiber arena with generational handles.

use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::ops::{Index, IndexMut};

use super::id::FiberId;
use super::traverse::{Children, Subtree};
use super::{BoundaryState, Fiber, FiberInput, FiberState, FiberTag, Flags, SuspenseState};
use crate::element::{Element, Key};
use crate::host::HostConfig;
use crate::lane::Lanes;

/// Slot-based storage for fibers.
///
/// Released slots go on a free list and are reset completely when reused;
/// the slot's generation is bumped on release so outstanding handles go
/// stale.
pub(crate) struct FiberStore<H: HostConfig> {
    slots: Vec<Option<Fiber<H>>>,
    generation: Vec<u32>,
    free_list: Vec<u32>,
    live: usize,
}

impl<H: HostConfig> Default for FiberStore<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HostConfig> fmt::Debug for FiberStore<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberStore")
            .field("live", &self.live)
            .field("slots", &self.slots.len())
            .field("free", &self.free_list.len())
            .finish_non_exhaustive()
    }
}

impl<H: HostConfig> FiberStore<H> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            generation: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    /// Number of live fibers.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Stores a fiber and returns its handle.
    pub(crate) fn create(&mut self, fiber: Fiber<H>) -> FiberId {
        self.live += 1;
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx as usize] = Some(fiber);
            return FiberId {
                idx,
                generation: self.generation[idx as usize],
            };
        }
        #[expect(
            clippy::cast_possible_truncation,
            reason = "fiber count cannot exceed u32::MAX"
        )]
        let idx = self.slots.len() as u32;
        self.slots.push(Some(fiber));
        self.generation.push(0);
        FiberId { idx, generation: 0 }
    }

    /// Releases a fiber. Its handle, and every copy of it, goes stale.
    pub(crate) fn release(&mut self, id: FiberId) {
        self.validate(id);
        self.slots[id.idx as usize] = None;
        self.generation[id.idx as usize] = self.generation[id.idx as usize].wrapping_add(1);
        self.free_list.push(id.idx);
        self.live -= 1;
    }

    /// Returns whether `id` refers to a live fiber.
    pub(crate) fn is_alive(&self, id: FiberId) -> bool {
        let idx = id.idx as usize;
        idx < self.slots.len() && self.generation[idx] == id.generation && self.slots[idx].is_some()
    }

    pub(crate) fn get(&self, id: FiberId) -> Option<&Fiber<H>> {
        if self.is_alive(id) {
            self.slots[id.idx as usize].as_ref()
        } else {
            None
        }
    }

    pub(crate) fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber<H>> {
        if self.is_alive(id) {
            self.slots[id.idx as usize].as_mut()
        } else {
            None
        }
    }

    /// The alternate of `id`, if it is still alive.
    pub(crate) fn alternate(&self, id: FiberId) -> Option<FiberId> {
        self[id].alternate.filter(|&alt| self.is_alive(alt))
    }

    /// Iterates the direct children of `id`.
    pub(crate) fn children(&self, id: FiberId) -> Children<'_, H> {
        Children::new(self, self[id].child)
    }

    /// Iterates `id` and all of its descendants in pre-order.
    pub(crate) fn subtree(&self, id: FiberId) -> Subtree<'_, H> {
        Subtree::new(self, id)
    }

    // -- Construction --

    /// Creates a fiber for `element`.
    pub(crate) fn create_from_element(&mut self, element: &Element, lanes: Lanes) -> FiberId {
        let tag = FiberTag::for_element(element);
        let key = element.key().cloned();
        let state = match &tag {
            FiberTag::Suspense => FiberState::Suspense(SuspenseState::default()),
            FiberTag::ErrorBoundary => FiberState::Boundary(BoundaryState::default()),
            _ => FiberState::None,
        };
        let mut fiber = Fiber::new(tag, key, FiberInput::Element(element.clone()), lanes);
        fiber.state = state;
        self.create(fiber)
    }

    /// Creates a fragment fiber for a bare child list.
    pub(crate) fn create_fragment(
        &mut self,
        children: Rc<[Element]>,
        key: Option<Key>,
        lanes: Lanes,
    ) -> FiberId {
        self.create(Fiber::new(
            FiberTag::Fragment,
            key,
            FiberInput::Children(children),
            lanes,
        ))
    }

    /// Creates the primary-content fiber of a suspense boundary.
    pub(crate) fn create_offscreen(
        &mut self,
        hidden: bool,
        children: Rc<[Element]>,
        lanes: Lanes,
    ) -> FiberId {
        self.create(Fiber::new(
            FiberTag::Offscreen,
            None,
            FiberInput::Offscreen { hidden, children },
            lanes,
        ))
    }

    /// Returns the work-in-progress twin of `current`, reusing the alternate
    /// slot when one is alive.
    ///
    /// The twin starts from `current`'s committed state and children, with
    /// no effects. The caller sets `parent`.
    pub(crate) fn create_work_in_progress(
        &mut self,
        current: FiberId,
        pending: FiberInput,
    ) -> FiberId {
        let wip = match self.alternate(current) {
            Some(wip) => {
                let w = &mut self[wip];
                w.pending = pending;
                w.flags = Flags::empty();
                w.subtree_flags = Flags::empty();
                w.deletions.clear();
                w.update_payload = None;
                w.replacement = None;
                w.snapshot = None;
                w.store_checks.clear();
                wip
            }
            None => {
                let c = &self[current];
                let mut fiber = Fiber::new(c.tag.clone(), c.key.clone(), pending, Lanes::NONE);
                fiber.alternate = Some(current);
                fiber.parent = c.parent;
                let wip = self.create(fiber);
                self[current].alternate = Some(wip);
                wip
            }
        };

        let c = &self[current];
        let tag = c.tag.clone();
        let memoized = c.memoized.clone();
        let state = c.state.clone();
        let instance = c.instance.clone();
        let (child, sibling, index) = (c.child, c.sibling, c.index);
        let (lanes, child_lanes) = (c.lanes, c.child_lanes);

        let w = &mut self[wip];
        w.tag = tag;
        w.memoized = memoized;
        w.state = state;
        w.instance = instance;
        w.child = child;
        w.sibling = sibling;
        w.index = index;
        w.lanes = lanes;
        w.child_lanes = child_lanes;
        wip
    }

    // -- Reclamation --

    /// Releases every fiber that is neither reachable from `roots` nor the
    /// alternate of a reachable fiber. Returns the number released.
    ///
    /// Must only run while no build session or deferred commit work holds
    /// fiber handles outside those trees.
    pub(crate) fn collect_garbage(&mut self, roots: &[FiberId]) -> usize {
        let mut reached = vec![false; self.slots.len()];
        let mut keep = vec![false; self.slots.len()];
        let mut stack: Vec<FiberId> = roots.iter().copied().filter(|&r| self.is_alive(r)).collect();
        while let Some(id) = stack.pop() {
            let idx = id.idx as usize;
            if reached[idx] {
                continue;
            }
            reached[idx] = true;
            keep[idx] = true;
            if let Some(alt) = self.alternate(id) {
                keep[alt.idx as usize] = true;
            }
            let fiber = &self[id];
            for next in [fiber.child, fiber.sibling].into_iter().flatten() {
                if self.is_alive(next) {
                    stack.push(next);
                }
            }
        }

        let mut released = 0;
        for idx in 0..self.slots.len() {
            if self.slots[idx].is_some() && !keep[idx] {
                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "slot indices were handed out as u32"
                )]
                let id = FiberId {
                    idx: idx as u32,
                    generation: self.generation[idx],
                };
                self.release(id);
                released += 1;
            }
        }
        released
    }

    fn validate(&self, id: FiberId) {
        assert!(
            self.is_alive(id),
            "stale FiberId: {id:?} (current gen: {})",
            self.generation.get(id.idx as usize).copied().unwrap_or(u32::MAX)
        );
    }
}

impl<H: HostConfig> Index<FiberId> for FiberStore<H> {
    type Output = Fiber<H>;

    fn index(&self, id: FiberId) -> &Fiber<H> {
        match self.get(id) {
            Some(fiber) => fiber,
            None => panic!("stale FiberId: {id:?}"),
        }
    }
}

impl<H: HostConfig> IndexMut<FiberId> for FiberStore<H> {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber<H> {
        match self.get_mut(id) {
            Some(fiber) => fiber,
            None => panic!("stale FiberId: {id:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Props;
    use crate::test_support::NullHost;

    fn host(store: &mut FiberStore<NullHost>, tag: &'static str) -> FiberId {
        store.create_from_element(&Element::host(tag, Props::new(), vec![]), Lanes::NONE)
    }

    #[test]
    fn released_handles_go_stale() {
        let mut store = FiberStore::<NullHost>::new();
        let a = host(&mut store, "a");
        store.release(a);
        assert!(!store.is_alive(a));
        let b = host(&mut store, "b");
        assert_eq!(a.index(), b.index(), "slot is reused");
        assert_ne!(a.generation(), b.generation());
        assert!(store.get(a).is_none());
        assert!(store.is_alive(b));
    }

    #[test]
    #[should_panic(expected = "stale FiberId")]
    fn indexing_a_stale_handle_panics() {
        let mut store = FiberStore::<NullHost>::new();
        let a = host(&mut store, "a");
        store.release(a);
        let _ = &store[a];
    }

    #[test]
    fn work_in_progress_reuses_the_alternate() {
        let mut store = FiberStore::<NullHost>::new();
        let current = host(&mut store, "a");
        store[current].lanes = Lanes::DEFAULT;
        let wip = store.create_work_in_progress(current, FiberInput::None);
        assert_eq!(store[wip].alternate, Some(current));
        assert_eq!(store[current].alternate, Some(wip));
        assert_eq!(store[wip].lanes, Lanes::DEFAULT);

        store[wip].flags = Flags::UPDATE;
        store[wip].deletions.push(current);
        let again = store.create_work_in_progress(current, FiberInput::None);
        assert_eq!(again, wip);
        assert!(store[again].flags.is_empty(), "effects reset on reuse");
        assert!(store[again].deletions.is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn garbage_collection_keeps_trees_and_alternates() {
        let mut store = FiberStore::<NullHost>::new();
        let root = host(&mut store, "root");
        let child = host(&mut store, "child");
        let orphan = host(&mut store, "orphan");
        store[root].child = Some(child);
        store[child].parent = Some(root);
        let child_alt = store.create_work_in_progress(child, FiberInput::None);
        let orphan_child = host(&mut store, "orphan-child");
        store[orphan].child = Some(orphan_child);

        let released = store.collect_garbage(&[root]);
        assert_eq!(released, 2);
        assert!(store.is_alive(root));
        assert!(store.is_alive(child));
        assert!(store.is_alive(child_alt));
        assert!(!store.is_alive(orphan));
        assert!(!store.is_alive(orphan_child));
    }

    #[test]
    fn subtree_walks_in_pre_order() {
        let mut store = FiberStore::<NullHost>::new();
        let root = host(&mut store, "root");
        let a = host(&mut store, "a");
        let a1 = host(&mut store, "a1");
        let b = host(&mut store, "b");
        store[root].child = Some(a);
        store[a].sibling = Some(b);
        store[a].child = Some(a1);
        let order: Vec<_> = store.subtree(root).collect();
        assert_eq!(order, vec![root, a, a1, b]);
        let kids: Vec<_> = store.children(root).collect();
        assert_eq!(kids, vec![a, b]);
    }
}
