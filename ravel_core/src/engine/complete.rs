// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The complete phase: build detached host instances, diff props, and
//! bubble lanes and effect flags up to the parent.

use alloc::rc::Rc;

use super::Engine;
use crate::fiber::{FiberId, FiberTag, Flags};
use crate::host::HostConfig;
use crate::lane::Lanes;

impl<H: HostConfig> Engine<H> {
    pub(super) fn complete_work(&mut self, current: Option<FiberId>, wip: FiberId) {
        match self.fibers[wip].tag.clone() {
            FiberTag::Host(tag) => self.complete_host(current, wip, tag),
            FiberTag::Text => self.complete_text(current, wip),
            FiberTag::Suspense => self.complete_suspense(current, wip),
            FiberTag::Offscreen => {
                self.pop_subtree_lanes();
                if self.fibers[wip].pending.is_hidden() {
                    // Hidden content was not rendered; keep the lanes left
                    // on it for the pass that reveals it.
                    self.fibers[wip].subtree_flags = Flags::empty();
                    return;
                }
            }
            FiberTag::HostRoot
            | FiberTag::Component(_)
            | FiberTag::Fragment
            | FiberTag::ErrorBoundary => {}
        }
        self.bubble_properties(current, wip);
    }

    fn complete_host(&mut self, current: Option<FiberId>, wip: FiberId, tag: &'static str) {
        let Some(element) = self.fibers[wip].pending.element().cloned() else {
            return;
        };
        let mounted = current.is_some() && self.fibers[wip].instance.is_some();
        if !mounted {
            let instance = self.host.create_instance(tag, element.props());
            self.append_all_children(&instance, wip);
            let w = &mut self.fibers[wip];
            w.instance = Some(instance);
            if element.ref_callback().is_some() {
                w.flags |= Flags::REF;
            }
            if element.measure_callback().is_some() {
                w.flags |= Flags::CALLBACK;
            }
            return;
        }

        let Some(old) = current.and_then(|c| self.fibers[c].memoized.element().cloned()) else {
            return;
        };
        if !old.ptr_eq(&element) {
            let Some(instance) = self.fibers[wip].instance.clone() else {
                return;
            };
            if self.host.supports_mutation(tag) {
                if let Some(payload) = self
                    .host
                    .prepare_update(&instance, tag, old.props(), element.props())
                {
                    let w = &mut self.fibers[wip];
                    w.update_payload = Some(payload);
                    w.flags |= Flags::UPDATE;
                }
            } else if old.props() != element.props() {
                let replacement = self.host.create_instance(tag, element.props());
                let w = &mut self.fibers[wip];
                w.replacement = Some(replacement);
                w.flags |= Flags::UPDATE | Flags::REF;
            }
        }

        let w = &mut self.fibers[wip];
        if element.measure_callback().is_some() {
            w.flags |= Flags::SNAPSHOT | Flags::CALLBACK;
        }
        if !same_callback(old.ref_callback(), element.ref_callback()) {
            w.flags |= Flags::REF;
        }
    }

    fn complete_text(&mut self, current: Option<FiberId>, wip: FiberId) {
        let text = self.fibers[wip].pending.text();
        let mounted = current.is_some() && self.fibers[wip].instance.is_some();
        if !mounted {
            let instance = self.host.create_text_instance(text);
            self.fibers[wip].instance = Some(instance);
        } else if current.is_some_and(|c| self.fibers[c].memoized.text() != text) {
            self.fibers[wip].flags |= Flags::UPDATE;
        }
    }

    fn complete_suspense(&mut self, current: Option<FiberId>, wip: FiberId) {
        let (showing, has_retry) = self.fibers[wip]
            .state
            .suspense()
            .map_or((false, false), |s| (s.showing_fallback, !s.retry.is_empty()));
        let was_showing = current
            .and_then(|c| self.fibers[c].state.suspense())
            .is_some_and(|s| s.showing_fallback);

        if current.is_some()
            && showing != was_showing
            && let Some(primary) = self.fibers[wip].child
        {
            self.fibers[primary].flags |= Flags::VISIBILITY;
        }
        if showing && !was_showing {
            if current.is_some() {
                self.render_did_suspend_delay_if_possible();
            } else {
                self.render_did_suspend();
            }
        }
        if has_retry {
            self.fibers[wip].flags |= Flags::UPDATE;
        }
    }

    /// Appends the top-level host nodes below `fiber` to `parent`.
    fn append_all_children(&mut self, parent: &H::Instance, fiber: FiberId) {
        let mut next = self.fibers[fiber].child;
        while let Some(child) = next {
            let c = &self.fibers[child];
            if c.tag.is_host() {
                if let Some(instance) = c.instance.clone() {
                    self.host.append_initial_child(parent, &instance);
                }
            } else if c.child.is_some() {
                self.append_all_children(parent, child);
            }
            next = self.fibers[child].sibling;
        }
    }

    /// Collects the lanes and flags of `wip`'s children. Children reused
    /// without rendering contribute their lanes only.
    fn bubble_properties(&mut self, current: Option<FiberId>, wip: FiberId) {
        let did_bailout = current.is_some_and(|c| self.fibers[c].child == self.fibers[wip].child);
        let mut lanes = Lanes::NONE;
        let mut flags = Flags::empty();
        let mut next = self.fibers[wip].child;
        while let Some(child) = next {
            let c = &mut self.fibers[child];
            lanes = lanes.merge(c.lanes).merge(c.child_lanes);
            if !did_bailout {
                flags |= c.subtree_flags | c.flags;
            }
            c.parent = Some(wip);
            next = c.sibling;
        }
        let w = &mut self.fibers[wip];
        w.child_lanes = lanes;
        w.subtree_flags = flags;
    }
}

fn same_callback<T: ?Sized>(a: Option<&Rc<T>>, b: Option<&Rc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;

    use super::same_callback;

    #[test]
    fn callbacks_compare_by_identity() {
        let a: Rc<dyn Fn()> = Rc::new(|| {});
        let b: Rc<dyn Fn()> = Rc::new(|| {});
        assert!(same_callback(Some(&a), Some(&a.clone())), "clones are the same callback");
        assert!(!same_callback(Some(&a), Some(&b)), "separate closures differ");
        assert!(same_callback::<dyn Fn()>(None, None), "two absent callbacks match");
        assert!(!same_callback(Some(&a), None), "adding or removing a callback is a change");
    }
}
