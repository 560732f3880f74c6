// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The begin phase: render one fiber and reconcile its children.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::mem;

use super::{Engine, root_element};
use crate::element::{Element, ElementKind};
use crate::error::Signal;
use crate::fiber::{
    ComponentState, FiberId, FiberInput, FiberState, FiberTag, Flags, OffscreenState, RootState,
};
use crate::hooks::queue::StateHook;
use crate::hooks::{RenderRequest, render_with_hooks};
use crate::host::HostConfig;
use crate::lane::Lanes;

impl<H: HostConfig> Engine<H> {
    /// Renders `wip` and returns the next fiber to begin, if any.
    ///
    /// A fiber whose input is unchanged and which has no work in the render
    /// lanes bails out: its children are reused, or skipped entirely when
    /// nothing below it has work either.
    pub(super) fn begin_work(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<Option<FiberId>, Signal> {
        let render_lanes = self.session.subtree_lanes;
        let mut props_changed = false;
        if let Some(c) = current {
            let (cf, wf) = (&self.fibers[c], &self.fibers[wip]);
            if !wf.pending.same(&cf.memoized) {
                props_changed = true;
            } else if !cf.lanes.includes_some(render_lanes)
                && !wf.flags.contains(Flags::DID_CAPTURE)
                // Offscreen always renders so its subtree lanes are pushed.
                && !matches!(wf.tag, FiberTag::Offscreen)
            {
                return Ok(self.bailout_on_already_finished_work(wip));
            }
        }

        self.fibers[wip].lanes = Lanes::NONE;
        match self.fibers[wip].tag.clone() {
            FiberTag::HostRoot => Ok(self.update_host_root(current, wip)),
            FiberTag::Component(component) => {
                let Some(element) = self.fibers[wip].pending.element().cloned() else {
                    return Ok(None);
                };
                self.update_component(current, wip, &component, &element, props_changed)
            }
            FiberTag::Host(tag) => Ok(self.update_host(current, wip, tag)),
            FiberTag::Text => Ok(None),
            FiberTag::Fragment => {
                let children = match &self.fibers[wip].pending {
                    FiberInput::Element(element) => element.children().clone(),
                    FiberInput::Children(children) => children.clone(),
                    _ => Rc::from([]),
                };
                Ok(self.reconcile_children(current, wip, &children))
            }
            FiberTag::Suspense => Ok(self.update_suspense(current, wip)),
            FiberTag::Offscreen => Ok(self.update_offscreen(current, wip)),
            FiberTag::ErrorBoundary => Ok(self.update_error_boundary(current, wip)),
        }
    }

    /// Reuses the committed children of `wip`, or skips them when no work
    /// is scheduled below it.
    fn bailout_on_already_finished_work(&mut self, wip: FiberId) -> Option<FiberId> {
        let w = &self.fibers[wip];
        self.session.skipped_lanes = self.session.skipped_lanes.merge(w.lanes);
        if !w.child_lanes.includes_some(self.session.subtree_lanes) {
            return None;
        }
        self.clone_child_fibers(wip)
    }

    fn clone_child_fibers(&mut self, wip: FiberId) -> Option<FiberId> {
        let mut old = self.fibers[wip].child;
        let mut first = None;
        let mut previous: Option<FiberId> = None;
        while let Some(c) = old {
            let memoized = self.fibers[c].memoized.clone();
            let next = self.fibers.create_work_in_progress(c, memoized);
            let n = &mut self.fibers[next];
            n.parent = Some(wip);
            n.sibling = None;
            match previous {
                Some(p) => self.fibers[p].sibling = Some(next),
                None => first = Some(next),
            }
            previous = Some(next);
            old = self.fibers[c].sibling;
        }
        self.fibers[wip].child = first;
        first
    }

    fn update_host_root(&mut self, current: Option<FiberId>, wip: FiberId) -> Option<FiberId> {
        let c = current?;
        let render_lanes = self.session.subtree_lanes;
        let captured = self.fibers[wip].flags.contains(Flags::DID_CAPTURE);
        let FiberState::Root(state) = &mut self.fibers[c].state else {
            return None;
        };
        let root = state.root;
        let processed = StateHook::process(&mut state.element, render_lanes);
        let mut hook = processed.hook;
        if captured {
            hook.memoized = Rc::new(None::<Element>);
            if hook.base_queue.is_empty() {
                hook.base_state = hook.memoized.clone();
            }
        }
        let element = root_element(&hook);

        let w = &mut self.fibers[wip];
        w.state = FiberState::Root(RootState { root, element: hook });
        w.lanes = processed.skipped;
        self.session.skipped_lanes = self.session.skipped_lanes.merge(processed.skipped);
        if !processed.changed && !captured {
            return self.bailout_on_already_finished_work(wip);
        }
        let children: Vec<Element> = element.into_iter().collect();
        self.reconcile_children(current, wip, &children)
    }

    fn update_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        component: &crate::element::Component,
        element: &Element,
        props_changed: bool,
    ) -> Result<Option<FiberId>, Signal> {
        let render_lanes = self.session.subtree_lanes;
        let instance = match &self.fibers[wip].state {
            FiberState::Component(state) => state.instance,
            _ => self.shared.next_instance(),
        };
        let mut current_hooks = current.and_then(|c| match &mut self.fibers[c].state {
            FiberState::Component(state) => Some(mem::take(&mut state.hooks)),
            _ => None,
        });
        let request = RenderRequest {
            fiber: wip,
            component,
            props: element.props(),
            instance,
            render_lanes,
            rerender_limit: self.config.render_phase_update_limit,
        };
        let out = render_with_hooks(&self.shared, &request, current_hooks.as_mut());
        if let (Some(c), Some(hooks)) = (current, current_hooks)
            && let FiberState::Component(state) = &mut self.fibers[c].state
        {
            state.hooks = hooks;
        }

        let w = &mut self.fibers[wip];
        w.state = FiberState::Component(ComponentState {
            instance,
            hooks: out.hooks,
        });
        let children = out.result?;
        w.flags |= out.flags;
        w.store_checks = out.store_checks;
        w.lanes = w.lanes.merge(out.skipped_lanes);
        self.session.skipped_lanes = self.session.skipped_lanes.merge(out.skipped_lanes);

        if let Some(c) = current
            && !props_changed
            && !out.did_receive_update
        {
            self.fibers[wip].flags.remove(Flags::PASSIVE | Flags::UPDATE);
            let cf = &mut self.fibers[c];
            cf.lanes = cf.lanes.remove(render_lanes);
            return Ok(self.bailout_on_already_finished_work(wip));
        }
        Ok(self.reconcile_children(current, wip, &children))
    }

    fn update_host(&mut self, current: Option<FiberId>, wip: FiberId, tag: &'static str) -> Option<FiberId> {
        let element = self.fibers[wip].pending.element().cloned()?;
        if self.host.should_set_text_content(tag, element.props()) {
            return self.reconcile_children(current, wip, &[]);
        }
        let previous_was_text = current
            .and_then(|c| self.fibers[c].memoized.element())
            .is_some_and(|old| self.host.should_set_text_content(tag, old.props()));
        if previous_was_text {
            self.fibers[wip].flags |= Flags::CONTENT_RESET;
        }
        let children = element.children().clone();
        self.reconcile_children(current, wip, &children)
    }

    /// Renders suspense primary content. Hidden content is not rendered; its
    /// committed children stay in place. Every call pushes subtree lanes,
    /// popped when the fiber completes or unwinds.
    fn update_offscreen(&mut self, current: Option<FiberId>, wip: FiberId) -> Option<FiberId> {
        let base = current
            .and_then(|c| self.fibers[c].state.offscreen())
            .map_or(Lanes::NONE, |s| s.base_lanes);
        self.push_subtree_lanes(self.session.subtree_lanes.merge(base));
        let FiberInput::Offscreen { hidden, children } = self.fibers[wip].pending.clone() else {
            return None;
        };
        if hidden {
            return None;
        }
        self.fibers[wip].state = FiberState::None;
        self.reconcile_children(current, wip, &children)
    }

    /// Renders a suspense boundary: its primary content, or, after the
    /// content suspended, the content hidden and the fallback after it.
    fn update_suspense(&mut self, current: Option<FiberId>, wip: FiberId) -> Option<FiberId> {
        let element = self.fibers[wip].pending.element().cloned()?;
        let ElementKind::Suspense { fallback } = element.kind() else {
            return None;
        };
        let fallback = fallback.clone();
        let children = element.children().clone();
        let render_lanes = self.session.subtree_lanes;

        let w = &mut self.fibers[wip];
        let show_fallback = w.flags.contains(Flags::DID_CAPTURE);
        w.flags.remove(Flags::DID_CAPTURE);
        if let Some(state) = w.state.suspense_mut() {
            state.showing_fallback = show_fallback;
        }

        let current_primary = current.and_then(|c| self.fibers[c].child);
        let Some(cp) = current_primary else {
            // Mount.
            if !show_fallback {
                let primary = self
                    .fibers
                    .create_offscreen(false, children, Lanes::NONE);
                self.fibers[primary].parent = Some(wip);
                self.fibers[wip].child = Some(primary);
                return Some(primary);
            }
            let primary = self
                .fibers
                .create_offscreen(true, children, Lanes::NONE);
            let p = &mut self.fibers[primary];
            p.memoized = p.pending.clone();
            p.parent = Some(wip);
            p.state = FiberState::Offscreen(OffscreenState {
                base_lanes: render_lanes,
            });
            let fb = self.fibers.create_fragment(fallback, None, Lanes::NONE);
            self.fibers[fb].parent = Some(wip);
            self.fibers[primary].sibling = Some(fb);
            self.fibers[wip].child = Some(primary);
            return Some(fb);
        };

        let current_fallback = self.fibers[cp].sibling;
        if !show_fallback {
            let primary = self.fibers.create_work_in_progress(
                cp,
                FiberInput::Offscreen {
                    hidden: false,
                    children,
                },
            );
            let p = &mut self.fibers[primary];
            p.parent = Some(wip);
            p.sibling = None;
            if let Some(fb) = current_fallback {
                let w = &mut self.fibers[wip];
                w.deletions.push(fb);
                w.flags |= Flags::CHILD_DELETION;
            }
            self.fibers[wip].child = Some(primary);
            return Some(primary);
        }

        let previous_base = self.fibers[cp]
            .state
            .offscreen()
            .map_or(Lanes::NONE, |s| s.base_lanes);
        let remaining = self.fibers[cp].child_lanes.remove(render_lanes);
        let primary = self.fibers.create_work_in_progress(
            cp,
            FiberInput::Offscreen {
                hidden: true,
                children,
            },
        );
        let p = &mut self.fibers[primary];
        p.memoized = p.pending.clone();
        p.parent = Some(wip);
        p.child_lanes = remaining;
        p.state = FiberState::Offscreen(OffscreenState {
            base_lanes: previous_base.merge(render_lanes),
        });

        let fb = match current_fallback {
            Some(cf) => self
                .fibers
                .create_work_in_progress(cf, FiberInput::Children(fallback)),
            None => {
                let fb = self.fibers.create_fragment(fallback, None, Lanes::NONE);
                self.fibers[fb].flags |= Flags::PLACEMENT;
                fb
            }
        };
        let f = &mut self.fibers[fb];
        f.parent = Some(wip);
        f.sibling = None;
        self.fibers[primary].sibling = Some(fb);
        self.fibers[wip].child = Some(primary);
        Some(fb)
    }

    /// Renders an error boundary: its children, or its fallback once an
    /// error below it has been captured.
    fn update_error_boundary(&mut self, current: Option<FiberId>, wip: FiberId) -> Option<FiberId> {
        let element = self.fibers[wip].pending.element().cloned()?;
        let ElementKind::ErrorBoundary { fallback, .. } = element.kind() else {
            return None;
        };
        let render_lanes = self.session.subtree_lanes;

        let w = &mut self.fibers[wip];
        let state = w.state.boundary_mut()?;
        state.callbacks.clear();
        let mut captured = mem::take(&mut state.captured);
        let mut remaining = Lanes::NONE;
        for update in state.queue.borrow().iter() {
            if update.lane.is_subset_of(render_lanes) {
                captured.push(update.error.clone());
            } else {
                remaining = remaining.merge(update.lane);
            }
        }
        let did_capture = !captured.is_empty();
        if let Some(last) = captured.last() {
            state.error = Some(last.clone());
            state.callbacks = captured;
        }
        let children: Rc<[Element]> = match &state.error {
            Some(error) => fallback(error).into(),
            None => element.children().clone(),
        };
        w.lanes = w.lanes.merge(remaining);
        if did_capture {
            w.flags |= Flags::CALLBACK;
        }

        if did_capture && let Some(c) = current {
            // Remount: the children that threw must not be reused.
            let old = self.fibers[c].child;
            self.reconcile_child_list(wip, old, &[], true);
            let first = self.reconcile_child_list(wip, None, &children, true);
            self.fibers[wip].child = first;
            return first;
        }
        self.reconcile_children(current, wip, &children)
    }
}
