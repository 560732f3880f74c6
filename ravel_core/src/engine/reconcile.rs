// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Child reconciliation.
//!
//! Matches a new child list against the committed children of a fiber.
//! Children are matched by key, or by position when unkeyed. A match of the
//! same type reuses the committed fiber's alternate; everything else is
//! created fresh, and committed children left unmatched are deleted.
//!
//! The walk is the usual two-phase one: a linear scan while old and new
//! children line up, then a map of the remaining old children for
//! everything after the first mismatch. A reused child that moved before
//! the last child kept in place is marked for placement; children that kept
//! their relative order are left alone.

use hashbrown::HashMap;

use super::Engine;
use crate::element::{Element, Key};
use crate::fiber::{FiberId, FiberInput, Flags};
use crate::host::HostConfig;
use crate::lane::Lanes;

#[derive(Clone, PartialEq, Eq, Hash)]
enum MapKey {
    Key(Key),
    Index(u32),
}

impl<H: HostConfig> Engine<H> {
    /// Reconciles `children` against `current`'s children and installs the
    /// result as `wip`'s child list. Returns the first new child.
    pub(super) fn reconcile_children(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        children: &[Element],
    ) -> Option<FiberId> {
        let old_first = current.and_then(|c| self.fibers[c].child);
        let first = self.reconcile_child_list(wip, old_first, children, current.is_some());
        self.fibers[wip].child = first;
        first
    }

    /// Reconciles `children` against the list starting at `old_first`.
    ///
    /// With `track` unset nothing is marked for placement or deletion; a
    /// parent that is itself being inserted carries its children along.
    pub(super) fn reconcile_child_list(
        &mut self,
        parent: FiberId,
        old_first: Option<FiberId>,
        children: &[Element],
        track: bool,
    ) -> Option<FiberId> {
        let mut first: Option<FiberId> = None;
        let mut previous: Option<FiberId> = None;
        let mut last_placed = 0_u32;
        let mut old = old_first;
        let mut new_idx = 0_usize;

        let mut link = |engine: &mut Self, fiber: FiberId| {
            engine.fibers[fiber].parent = Some(parent);
            engine.fibers[fiber].sibling = None;
            match previous {
                Some(p) => engine.fibers[p].sibling = Some(fiber),
                None => first = Some(fiber),
            }
            previous = Some(fiber);
        };

        // Linear scan.
        while let Some(o) = old
            && new_idx < children.len()
        {
            let next_old = self.fibers[o].sibling;
            let Some(new) = self.update_slot(o, &children[new_idx]) else {
                // Keys diverge; fall back to the map.
                break;
            };
            if track && self.fibers[new].alternate.is_none() {
                self.delete_child(parent, o);
            }
            last_placed = self.place_child(new, last_placed, new_idx, track);
            link(self, new);
            old = next_old;
            new_idx += 1;
        }

        if new_idx == children.len() {
            // Every new child is placed; delete the rest.
            while let Some(o) = old {
                if track {
                    self.delete_child(parent, o);
                }
                old = self.fibers[o].sibling;
            }
            return first;
        }

        if old.is_none() {
            for (i, element) in children.iter().enumerate().skip(new_idx) {
                let new = self.fibers.create_from_element(element, Lanes::NONE);
                last_placed = self.place_child(new, last_placed, i, track);
                link(self, new);
            }
            return first;
        }

        let mut existing: HashMap<MapKey, FiberId> = HashMap::new();
        while let Some(o) = old {
            let f = &self.fibers[o];
            let key = match &f.key {
                Some(key) => MapKey::Key(key.clone()),
                None => MapKey::Index(f.index),
            };
            existing.insert(key, o);
            old = f.sibling;
        }

        for (i, element) in children.iter().enumerate().skip(new_idx) {
            let key = match element.key() {
                Some(key) => MapKey::Key(key.clone()),
                None => MapKey::Index(slot(i)),
            };
            let matched = existing
                .get(&key)
                .copied()
                .filter(|&o| self.fibers[o].tag.matches(element));
            let new = match matched {
                Some(o) => {
                    existing.remove(&key);
                    self.use_fiber(o, element)
                }
                None => self.fibers.create_from_element(element, Lanes::NONE),
            };
            last_placed = self.place_child(new, last_placed, i, track);
            link(self, new);
        }

        if track {
            for o in existing.into_values() {
                self.delete_child(parent, o);
            }
        }
        first
    }

    /// Returns a fiber for `element` in the slot of `old`, or `None` when the
    /// keys differ.
    fn update_slot(&mut self, old: FiberId, element: &Element) -> Option<FiberId> {
        if self.fibers[old].key.as_ref() != element.key() {
            return None;
        }
        Some(if self.fibers[old].tag.matches(element) {
            self.use_fiber(old, element)
        } else {
            self.fibers.create_from_element(element, Lanes::NONE)
        })
    }

    fn use_fiber(&mut self, old: FiberId, element: &Element) -> FiberId {
        let fiber = self
            .fibers
            .create_work_in_progress(old, FiberInput::Element(element.clone()));
        let f = &mut self.fibers[fiber];
        f.index = 0;
        f.sibling = None;
        fiber
    }

    fn place_child(&mut self, new: FiberId, last_placed: u32, new_idx: usize, track: bool) -> u32 {
        let f = &mut self.fibers[new];
        f.index = slot(new_idx);
        if !track {
            return last_placed;
        }
        let Some(current) = f.alternate else {
            f.flags |= Flags::PLACEMENT;
            return last_placed;
        };
        let old_index = self.fibers[current].index;
        if old_index < last_placed {
            self.fibers[new].flags |= Flags::PLACEMENT;
            last_placed
        } else {
            old_index
        }
    }

    fn delete_child(&mut self, parent: FiberId, child: FiberId) {
        let p = &mut self.fibers[parent];
        p.deletions.push(child);
        p.flags |= Flags::CHILD_DELETION;
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "sibling lists are far shorter than u32::MAX"
)]
fn slot(i: usize) -> u32 {
    i as u32
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::vec;
    use alloc::vec::Vec;

    use crate::element::{Element, Props};
    use crate::engine::{Engine, EngineConfig, RootOptions};
    use crate::fiber::{FiberId, Flags};
    use crate::host_loop::ManualLoop;
    use crate::test_support::LogHost;

    fn item(key: &str) -> Element {
        Element::host("li", Props::new(), vec![Element::text(key)]).with_key(key)
    }

    fn list(keys: &[&str]) -> Element {
        Element::host("ul", Props::new(), keys.iter().map(|k| item(k)).collect())
    }

    fn engine() -> Engine<LogHost> {
        Engine::new(LogHost::default(), Rc::new(ManualLoop::new()), EngineConfig::standard())
    }

    /// Reconciles `next` against the committed children of the `ul` rendered
    /// from `first`, returning the flags of each new child in order.
    fn reconcile_keys(first: &[&str], next: &[&str]) -> (Vec<Flags>, usize) {
        let mut engine = engine();
        let root = engine.create_root(0, RootOptions::new());
        engine
            .flush_sync(|e| e.render(root, Some(list(first))))
            .and_then(|scheduled| scheduled)
            .expect("initial render");
        let current_root = engine.record(root).map(|r| r.current);
        let ul = current_root
            .and_then(|r| engine.fibers[r].child)
            .expect("mounted list");

        let wip = engine.fibers.create_work_in_progress(ul, crate::fiber::FiberInput::None);
        let children: Vec<Element> = next.iter().map(|k| item(k)).collect();
        engine.reconcile_children(Some(ul), wip, &children);
        let flags: Vec<Flags> = child_ids(&engine, wip)
            .into_iter()
            .map(|c| engine.fibers[c].flags & (Flags::PLACEMENT | Flags::CHILD_DELETION))
            .collect();
        (flags, engine.fibers[wip].deletions.len())
    }

    fn child_ids(engine: &Engine<LogHost>, fiber: FiberId) -> Vec<FiberId> {
        engine.fibers.children(fiber).collect()
    }

    #[test]
    fn unchanged_keys_place_nothing() {
        let (flags, deleted) = reconcile_keys(&["a", "b", "c"], &["a", "b", "c"]);
        assert!(flags.iter().all(Flags::is_empty), "no child moved: {flags:?}");
        assert_eq!(deleted, 0, "no child was removed");
    }

    #[test]
    fn moving_the_last_key_to_the_front_places_only_the_followers() {
        let (flags, deleted) = reconcile_keys(&["a", "b", "c"], &["c", "a", "b"]);
        assert_eq!(
            flags,
            vec![Flags::empty(), Flags::PLACEMENT, Flags::PLACEMENT],
            "c keeps its position, a and b move after it"
        );
        assert_eq!(deleted, 0, "reorders never delete");
    }

    #[test]
    fn swapping_two_keys_places_one() {
        let (flags, _) = reconcile_keys(&["a", "b"], &["b", "a"]);
        assert_eq!(flags, vec![Flags::empty(), Flags::PLACEMENT], "a moves after b");
    }

    #[test]
    fn removed_and_added_keys_delete_and_insert() {
        let (flags, deleted) = reconcile_keys(&["a", "b", "c"], &["a", "c", "d"]);
        assert_eq!(
            flags,
            vec![Flags::empty(), Flags::empty(), Flags::PLACEMENT],
            "only the new key is placed"
        );
        assert_eq!(deleted, 1, "b is deleted");
    }

    #[test]
    fn changing_a_type_replaces_the_child() {
        let mut engine = engine();
        let root = engine.create_root(0, RootOptions::new());
        let first = Element::host("div", Props::new(), vec![Element::host("span", Props::new(), vec![])]);
        engine
            .flush_sync(|e| e.render(root, Some(first)))
            .and_then(|scheduled| scheduled)
            .expect("initial render");
        let div = engine
            .record(root)
            .and_then(|r| engine.fibers[r.current].child)
            .expect("mounted div");

        let wip = engine.fibers.create_work_in_progress(div, crate::fiber::FiberInput::None);
        let next = [Element::host("p", Props::new(), vec![])];
        let new = engine.reconcile_children(Some(div), wip, &next).expect("one child");
        assert!(engine.fibers[new].alternate.is_none(), "a new fiber replaces the span");
        assert!(engine.fibers[new].flags.contains(Flags::PLACEMENT), "the new fiber is placed");
        assert_eq!(engine.fibers[wip].deletions.len(), 1, "the span is deleted");
    }
}
