// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The commit phase.
//!
//! A finished tree is committed in one uninterruptible pass over the
//! fibers that carry effects, split into three sub-passes:
//!
//! 1. **Before mutation** reads snapshots of host nodes that asked to be
//!    measured, while the host tree still shows the previous state.
//! 2. **Mutation** applies deletions, placements, prop and text updates and
//!    visibility toggles, and runs layout-effect cleanups. The finished tree
//!    then becomes the current tree.
//! 3. **Layout** attaches refs, runs layout effects and measure callbacks,
//!    and reports errors captured by boundaries.
//!
//! Passive effects are deferred to their own task; see `passive`.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;

use kurbo::Rect;

use super::root::PendingPassive;
use super::{Engine, Job, child_ids, record_mut};
use crate::element::{Element, ElementKind};
use crate::error::{CapturedError, EngineError, RenderError};
use crate::fiber::{CapturedUpdate, ExecutionContext, FiberId, FiberTag, Flags, RootId};
use crate::hooks::{EffectHook, EffectKind, Hook};
use crate::hooks::queue::{Action, Update};
use crate::host::HostConfig;
use crate::lane::{EventPriority, Lanes};
use crate::scheduler::Priority;
use crate::shared::InboxEntry;
use crate::trace::{CommitSummaryBuilder, ErrorEvent, ErrorKind, PhaseBeginEvent, PhaseEndEvent, PhaseKind};

#[cfg(feature = "trace-rich")]
use crate::trace::{HostMutation, HostMutationKind};

/// A host operation issued during a commit.
#[derive(Clone, Copy, Debug)]
pub(super) enum Mutation {
    Place,
    Update,
    TextUpdate,
    ResetText,
    Remove,
    Hide,
    Unhide,
}

#[cfg(feature = "trace-rich")]
impl From<Mutation> for HostMutationKind {
    fn from(m: Mutation) -> Self {
        match m {
            Mutation::Place => Self::Place,
            Mutation::Update => Self::Update,
            Mutation::TextUpdate => Self::TextUpdate,
            Mutation::ResetText => Self::ResetText,
            Mutation::Remove => Self::Remove,
            Mutation::Hide => Self::Hide,
            Mutation::Unhide => Self::Unhide,
        }
    }
}

impl<H: HostConfig> Engine<H> {
    /// Commits the finished tree stored on `root`.
    pub(super) fn commit_root(&mut self, root: RootId) {
        // Effects of the previous commit run before this one mutates.
        while self.flush_passive_effects() {}

        let Some(record) = record_mut(&mut self.roots, root) else {
            return;
        };
        let Some(finished) = record.finished.take() else {
            return;
        };
        if let Some(task) = record.callback.take() {
            self.scheduler.cancel_task(task);
        }
        record.callback_priority = Lanes::NONE;
        let container = record.container.clone();
        let top = finished.fiber;
        let lanes = finished.lanes;
        let f = &self.fibers[top];
        let remaining = f.lanes.merge(f.child_lanes);
        let effects = f.flags | f.subtree_flags;
        record.lanes.mark_finished(remaining);

        let has_passive = effects.intersects(Flags::PASSIVE_MASK);
        if has_passive {
            self.pending_passive = Some(PendingPassive {
                root,
                finished: top,
                lanes,
            });
            if self.passive_task.is_none() {
                self.passive_task = Some(self.scheduler.schedule_task(
                    Priority::Normal,
                    Job::FlushPassiveEffects,
                    None,
                ));
            }
        }

        let mut summary = self.sink.is_some().then(|| {
            let mut builder = CommitSummaryBuilder::new(self.commit_count, root, lanes, self.shared.now());
            builder.set_render_span(finished.render_start, finished.render_end);
            builder
        });
        self.commit_mutations = 0;
        #[cfg(feature = "trace-rich")]
        self.mutation_log.clear();

        let previous = self.shared.execution();
        self.shared
            .set_execution(previous | ExecutionContext::COMMIT);
        let previous_priority = self
            .shared
            .replace_update_priority(Some(EventPriority::Discrete));

        self.commit_phase(&mut summary, root, lanes, PhaseKind::BeforeMutation, true);
        if effects.intersects(Flags::BEFORE_MUTATION_MASK) {
            self.commit_before_mutation_effects(top);
        }
        self.commit_phase(&mut summary, root, lanes, PhaseKind::BeforeMutation, false);

        self.commit_phase(&mut summary, root, lanes, PhaseKind::Mutation, true);
        self.host.prepare_for_commit(&container);
        if effects.intersects(Flags::MUTATION_MASK) {
            self.commit_mutation_effects(root, top);
        }
        self.host.reset_after_commit(&container);
        if let Some(record) = record_mut(&mut self.roots, root) {
            record.current = top;
        }
        self.commit_phase(&mut summary, root, lanes, PhaseKind::Mutation, false);

        self.commit_phase(&mut summary, root, lanes, PhaseKind::Layout, true);
        if effects.intersects(Flags::LAYOUT_MASK) {
            self.commit_layout_effects(root, top, lanes);
        }
        self.commit_phase(&mut summary, root, lanes, PhaseKind::Layout, false);

        self.scheduler.request_paint();
        self.shared.replace_update_priority(previous_priority);
        self.shared.set_execution(previous);

        if let Some(error) = finished.uncaught {
            self.report_uncaught(root, error);
        }
        self.drain_inbox();
        self.ensure_root_is_scheduled(root);

        if !finished.recoverable.is_empty() {
            let observer = self
                .record(root)
                .and_then(|r| r.options.on_recoverable_error.clone());
            for error in &finished.recoverable {
                if let Some(observer) = &observer {
                    observer(error);
                }
                self.trace(|t, timestamp| {
                    t.error(&ErrorEvent {
                        root,
                        kind: ErrorKind::Recoverable,
                        timestamp,
                    });
                });
            }
        }

        if has_passive && lanes.includes_sync() {
            self.flush_passive_effects();
        }

        let pending = self.record(root).map_or(Lanes::NONE, |r| r.lanes.pending());
        if pending.includes_sync() {
            if self.root_with_nested_updates == Some(root) {
                self.nested_update_count += 1;
            } else {
                self.nested_update_count = 0;
                self.root_with_nested_updates = Some(root);
            }
        } else {
            self.nested_update_count = 0;
        }

        if let Some(mut builder) = summary {
            builder.set_host_mutations(self.commit_mutations);
            let summary = builder.finish(pending, has_passive);
            #[cfg(feature = "trace-rich")]
            let log = core::mem::take(&mut self.mutation_log);
            self.trace(|t, _| {
                t.commit_summary(&summary);
                #[cfg(feature = "trace-rich")]
                t.host_mutations(summary.commit_index, &log);
            });
        }
        self.commit_count += 1;

        self.flush_sync_queue();
        self.maybe_collect_garbage();
    }

    fn commit_phase(
        &mut self,
        summary: &mut Option<CommitSummaryBuilder>,
        root: RootId,
        lanes: Lanes,
        phase: PhaseKind,
        begin: bool,
    ) {
        let Some(builder) = summary.as_mut() else {
            return;
        };
        let now = self.shared.now();
        if begin {
            builder.phase_begin(phase, now);
        } else {
            builder.phase_end(phase, now);
        }
        self.trace(|t, timestamp| {
            if begin {
                t.phase_begin(&PhaseBeginEvent {
                    root,
                    lanes,
                    phase,
                    timestamp,
                });
            } else {
                t.phase_end(&PhaseEndEvent {
                    root,
                    lanes,
                    phase,
                    timestamp,
                });
            }
        });
    }

    fn report_uncaught(&mut self, root: RootId, error: CapturedError) {
        self.errors.push(EngineError::Uncaught(error));
        self.trace(|t, timestamp| {
            t.error(&ErrorEvent {
                root,
                kind: ErrorKind::Uncaught,
                timestamp,
            });
        });
    }

    // -- Before mutation --

    fn commit_before_mutation_effects(&mut self, fiber: FiberId) {
        if self.fibers[fiber]
            .subtree_flags
            .intersects(Flags::BEFORE_MUTATION_MASK)
        {
            for child in child_ids(&self.fibers, fiber) {
                self.commit_before_mutation_effects(child);
            }
        }
        let f = &self.fibers[fiber];
        if f.flags.contains(Flags::SNAPSHOT)
            && let Some(instance) = &f.instance
        {
            let bounds = self.host.measure(instance);
            self.fibers[fiber].snapshot = Some(bounds);
        }
    }

    // -- Mutation --

    fn commit_mutation_effects(&mut self, root: RootId, fiber: FiberId) {
        let deletions = self.fibers[fiber].deletions.clone();
        for deleted in deletions {
            self.commit_deletion(root, fiber, deleted);
        }
        if self.fibers[fiber]
            .subtree_flags
            .intersects(Flags::MUTATION_MASK)
        {
            for child in child_ids(&self.fibers, fiber) {
                self.commit_mutation_effects(root, child);
            }
        }
        self.commit_mutation_on_fiber(root, fiber);
    }

    fn commit_mutation_on_fiber(&mut self, root: RootId, fiber: FiberId) {
        let flags = self.fibers[fiber].flags;
        if flags.contains(Flags::PLACEMENT) {
            self.commit_placement(fiber);
            self.fibers[fiber].flags.remove(Flags::PLACEMENT);
        }
        let current = self.fibers.alternate(fiber);
        match self.fibers[fiber].tag.clone() {
            FiberTag::Component(_) if flags.contains(Flags::UPDATE) => {
                let effects: Vec<_> = layout_effects(self.fibers[fiber].state.hooks(), true);
                for effect in effects {
                    if let Err(error) = effect.run_destroy() {
                        let parent = self.fibers[fiber].parent;
                        self.capture_commit_phase_error(root, fiber, parent, error);
                    }
                }
            }
            FiberTag::Host(tag) => {
                if flags.contains(Flags::REF)
                    && let Some(c) = current
                {
                    self.detach_ref(c);
                }
                let Some(instance) = self.fibers[fiber].instance.clone() else {
                    return;
                };
                if flags.contains(Flags::CONTENT_RESET) {
                    self.host.reset_text_content(&instance);
                    self.note_mutation(fiber, Mutation::ResetText);
                }
                if flags.contains(Flags::UPDATE) {
                    let f = &mut self.fibers[fiber];
                    if let Some(replacement) = f.replacement.take() {
                        self.replace_instance(fiber, &instance, replacement);
                    } else if let Some(payload) = f.update_payload.take() {
                        let props = f
                            .pending
                            .element()
                            .map(|e| e.props().clone())
                            .unwrap_or_default();
                        self.host.commit_update(&instance, payload, tag, &props);
                        self.note_mutation(fiber, Mutation::Update);
                    }
                }
            }
            FiberTag::Text if flags.contains(Flags::UPDATE) => {
                let Some(instance) = self.fibers[fiber].instance.clone() else {
                    return;
                };
                let old = current.map_or("", |c| self.fibers[c].memoized.text());
                let new = self.fibers[fiber].pending.text();
                self.host.commit_text_update(&instance, old, new);
                self.note_mutation(fiber, Mutation::TextUpdate);
            }
            FiberTag::Offscreen if flags.contains(Flags::VISIBILITY) => {
                let hidden = self.fibers[fiber].pending.is_hidden();
                self.hide_or_unhide_all_children(fiber, hidden);
            }
            FiberTag::Suspense => {
                let showing = self.fibers[fiber]
                    .state
                    .suspense()
                    .is_some_and(|s| s.showing_fallback);
                let was_showing = current
                    .and_then(|c| self.fibers[c].state.suspense())
                    .is_some_and(|s| s.showing_fallback);
                if showing && !was_showing {
                    self.last_fallback_time = self.shared.now();
                }
                if flags.contains(Flags::UPDATE) {
                    self.attach_retry_listeners(fiber);
                }
            }
            _ => {}
        }
    }

    /// Retries the boundary when a wakeable thrown below it settles.
    fn attach_retry_listeners(&mut self, boundary: FiberId) {
        let Some(state) = self.fibers[boundary].state.suspense_mut() else {
            return;
        };
        let retry = core::mem::take(&mut state.retry);
        let cache = state.retry_cache.clone();
        for wakeable in retry {
            let key = wakeable.key();
            if !cache.borrow_mut().insert(key) {
                continue;
            }
            let shared = Rc::downgrade(&self.shared);
            wakeable.then(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.post(InboxEntry::Retry {
                        boundary,
                        wakeable: key,
                    });
                }
            });
        }
    }

    fn commit_placement(&mut self, fiber: FiberId) {
        let Some(parent) = self.host_parent(fiber) else {
            return;
        };
        let Some(parent_instance) = self.fibers[parent].instance.clone() else {
            return;
        };
        if matches!(self.fibers[parent].tag, FiberTag::Host(_))
            && self.fibers[parent].flags.contains(Flags::CONTENT_RESET)
        {
            self.host.reset_text_content(&parent_instance);
            self.note_mutation(parent, Mutation::ResetText);
            self.fibers[parent].flags.remove(Flags::CONTENT_RESET);
        }
        let before = self.host_sibling(fiber);
        self.insert_or_append(fiber, before.as_ref(), &parent_instance);
    }

    fn insert_or_append(&mut self, fiber: FiberId, before: Option<&H::Instance>, parent: &H::Instance) {
        if self.fibers[fiber].tag.is_host() {
            if let Some(instance) = self.fibers[fiber].instance.clone() {
                match before {
                    Some(before) => self.host.insert_before(parent, &instance, before),
                    None => self.host.append_child(parent, &instance),
                }
                self.note_mutation(fiber, Mutation::Place);
            }
            return;
        }
        for child in child_ids(&self.fibers, fiber) {
            self.insert_or_append(child, before, parent);
        }
    }

    /// Nearest ancestor that owns the host node `fiber`'s nodes live in.
    fn host_parent(&self, fiber: FiberId) -> Option<FiberId> {
        let mut node = self.fibers[fiber].parent;
        while let Some(n) = node {
            if matches!(self.fibers[n].tag, FiberTag::Host(_) | FiberTag::HostRoot) {
                return Some(n);
            }
            node = self.fibers[n].parent;
        }
        None
    }

    /// First host node after `fiber` under the same host parent that is
    /// already in place.
    fn host_sibling(&self, fiber: FiberId) -> Option<H::Instance> {
        let mut node = fiber;
        'siblings: loop {
            while self.fibers[node].sibling.is_none() {
                let parent = self.fibers[node].parent?;
                if matches!(self.fibers[parent].tag, FiberTag::Host(_) | FiberTag::HostRoot) {
                    return None;
                }
                node = parent;
            }
            node = self.fibers[node].sibling?;
            while !self.fibers[node].tag.is_host() {
                let f = &self.fibers[node];
                if f.flags.contains(Flags::PLACEMENT) {
                    continue 'siblings;
                }
                match f.child {
                    Some(child) => node = child,
                    None => continue 'siblings,
                }
            }
            let f = &self.fibers[node];
            if !f.flags.contains(Flags::PLACEMENT) {
                return f.instance.clone();
            }
        }
    }

    /// Swaps a host node that cannot be updated in place for a new one.
    fn replace_instance(&mut self, fiber: FiberId, old: &H::Instance, new: H::Instance) {
        for child in self.host_children(fiber, false) {
            if let Some(instance) = self.fibers[child].instance.clone() {
                self.host.append_child(&new, &instance);
            }
        }
        if let Some(parent) = self.host_parent(fiber)
            && let Some(parent_instance) = self.fibers[parent].instance.clone()
        {
            self.host.insert_before(&parent_instance, &new, old);
            self.host.remove_child(&parent_instance, old);
        }
        self.note_mutation(fiber, Mutation::Update);
        self.fibers[fiber].instance = Some(new);
    }

    /// Top-level host fibers below `fiber`, optionally skipping content
    /// hidden by a nested boundary.
    fn host_children(&self, fiber: FiberId, skip_hidden: bool) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut stack: Vec<FiberId> = child_ids(&self.fibers, fiber);
        stack.reverse();
        while let Some(node) = stack.pop() {
            let f = &self.fibers[node];
            if f.tag.is_host() {
                out.push(node);
                continue;
            }
            if skip_hidden && matches!(f.tag, FiberTag::Offscreen) && f.pending.is_hidden() {
                continue;
            }
            let start = stack.len();
            stack.extend(self.fibers.children(node));
            stack[start..].reverse();
        }
        out
    }

    fn hide_or_unhide_all_children(&mut self, offscreen: FiberId, hide: bool) {
        for node in self.host_children(offscreen, true) {
            let f = &self.fibers[node];
            let Some(instance) = f.instance.clone() else {
                continue;
            };
            match (&f.tag, hide) {
                (FiberTag::Text, true) => self.host.hide_text_instance(&instance),
                (FiberTag::Text, false) => {
                    let text = f.memoized.text();
                    self.host.unhide_text_instance(&instance, text);
                }
                (_, true) => self.host.hide_instance(&instance),
                (_, false) => {
                    let props = f
                        .element()
                        .map(|e| e.props().clone())
                        .unwrap_or_default();
                    self.host.unhide_instance(&instance, &props);
                }
            }
            self.note_mutation(node, if hide { Mutation::Hide } else { Mutation::Unhide });
        }
    }

    // -- Deletion --

    fn commit_deletion(&mut self, root: RootId, parent: FiberId, deleted: FiberId) {
        let host_parent = if matches!(self.fibers[parent].tag, FiberTag::Host(_) | FiberTag::HostRoot) {
            Some(parent)
        } else {
            self.host_parent(parent)
        };
        let instance = host_parent.and_then(|p| self.fibers[p].instance.clone());
        self.commit_deletion_effects(root, parent, instance.as_ref(), deleted);

        self.fibers[deleted].parent = None;
        if let Some(alt) = self.fibers.alternate(deleted) {
            self.fibers[alt].parent = None;
        }
    }

    /// Runs unmount work for the subtree at `deleted`, removing its
    /// top-level host nodes from `host_parent`.
    fn commit_deletion_effects(
        &mut self,
        root: RootId,
        nearest_mounted: FiberId,
        host_parent: Option<&H::Instance>,
        deleted: FiberId,
    ) {
        match self.fibers[deleted].tag.clone() {
            FiberTag::Host(_) | FiberTag::Text => {
                self.detach_ref(deleted);
                for child in child_ids(&self.fibers, deleted) {
                    self.commit_deletion_effects(root, nearest_mounted, None, child);
                }
                if let Some(parent) = host_parent
                    && let Some(instance) = self.fibers[deleted].instance.clone()
                {
                    self.host.remove_child(parent, &instance);
                    self.note_mutation(deleted, Mutation::Remove);
                }
            }
            FiberTag::Component(_) => {
                for effect in layout_effects(self.fibers[deleted].state.hooks(), false) {
                    if let Err(error) = effect.run_destroy() {
                        self.capture_commit_phase_error(root, deleted, Some(nearest_mounted), error);
                    }
                }
                for child in child_ids(&self.fibers, deleted) {
                    self.commit_deletion_effects(root, nearest_mounted, host_parent, child);
                }
            }
            _ => {
                for child in child_ids(&self.fibers, deleted) {
                    self.commit_deletion_effects(root, nearest_mounted, host_parent, child);
                }
            }
        }
    }

    fn detach_ref(&self, fiber: FiberId) {
        if let Some(callback) = self.fibers[fiber].element().and_then(|e| e.ref_callback()) {
            callback(None);
        }
    }

    // -- Layout --

    fn commit_layout_effects(&mut self, root: RootId, fiber: FiberId, committed: Lanes) {
        if self.fibers[fiber].subtree_flags.intersects(Flags::LAYOUT_MASK) {
            for child in child_ids(&self.fibers, fiber) {
                self.commit_layout_effects(root, child, committed);
            }
        }
        let flags = self.fibers[fiber].flags;
        if !flags.intersects(Flags::LAYOUT_MASK) {
            return;
        }
        match self.fibers[fiber].tag.clone() {
            FiberTag::Component(_) if flags.contains(Flags::UPDATE) => {
                for effect in layout_effects(self.fibers[fiber].state.hooks(), true) {
                    if let Err(error) = effect.run_create() {
                        let parent = self.fibers[fiber].parent;
                        self.capture_commit_phase_error(root, fiber, parent, error);
                    }
                }
            }
            FiberTag::Host(_) => {
                let f = &self.fibers[fiber];
                let Some(instance) = f.instance.clone() else {
                    return;
                };
                let element = f.element().cloned();
                let snapshot = f.snapshot.unwrap_or(Rect::ZERO);
                if flags.contains(Flags::REF)
                    && let Some(callback) = element.as_ref().and_then(|e| e.ref_callback())
                {
                    callback(Some(&instance as &dyn Any));
                }
                if flags.contains(Flags::CALLBACK)
                    && let Some(callback) = element.as_ref().and_then(|e| e.measure_callback())
                {
                    let bounds = self.host.measure(&instance);
                    callback(snapshot, bounds);
                }
            }
            FiberTag::ErrorBoundary if flags.contains(Flags::CALLBACK) => {
                self.commit_boundary_callbacks(root, fiber, committed);
            }
            _ => {}
        }
    }

    fn commit_boundary_callbacks(&mut self, root: RootId, fiber: FiberId, committed: Lanes) {
        let f = &mut self.fibers[fiber];
        let observer = match f.element().map(|e| e.kind()) {
            Some(ElementKind::ErrorBoundary { on_error, .. }) => on_error.clone(),
            _ => None,
        };
        let Some(state) = f.state.boundary_mut() else {
            return;
        };
        state
            .queue
            .borrow_mut()
            .retain(|u| !u.lane.is_subset_of(committed));
        let errors = core::mem::take(&mut state.callbacks);
        let root_observer = self
            .record(root)
            .and_then(|r| r.options.on_caught_error.clone());
        for error in &errors {
            if let Some(observer) = &observer {
                observer(error);
            }
            if let Some(observer) = &root_observer {
                observer(error);
            }
            self.trace(|t, timestamp| {
                t.error(&ErrorEvent {
                    root,
                    kind: ErrorKind::Caught,
                    timestamp,
                });
            });
        }
    }

    // -- Errors --

    /// Routes an error thrown by an effect or cleanup of `source` to the
    /// nearest error boundary at or above `nearest`, as a synchronous
    /// update. Without one, the root is cleared.
    pub(super) fn capture_commit_phase_error(
        &mut self,
        root: RootId,
        source: FiberId,
        nearest: Option<FiberId>,
        error: RenderError,
    ) {
        let captured = CapturedError {
            error,
            component_stack: self.component_stack(source),
        };
        let event_time = self.shared.request_event_time();
        let mut node = nearest;
        while let Some(n) = node {
            if let Some(state) = self.fibers[n].state.boundary_mut() {
                state.queue.borrow_mut().push(CapturedUpdate {
                    lane: Lanes::SYNC,
                    error: captured,
                });
                if let Some(root) = self.mark_update_lane_from_fiber_to_root(n, Lanes::SYNC)
                    && let Some(record) = record_mut(&mut self.roots, root)
                {
                    record.lanes.mark_updated(Lanes::SYNC, event_time);
                    self.ensure_root_is_scheduled(root);
                }
                return;
            }
            node = self.fibers[n].parent;
        }

        self.report_uncaught(root, captured);
        let Some((queue, fiber)) = self
            .record(root)
            .map(|r| (r.element_queue.clone(), r.current))
        else {
            return;
        };
        let clear: Action = Rc::new(|_: &Rc<dyn Any>| -> Rc<dyn Any> { Rc::new(None::<Element>) });
        queue.push(
            Update {
                lane: Lanes::SYNC,
                action: clear,
            },
            false,
        );
        self.schedule_update_on_fiber(queue.fiber().unwrap_or(fiber), Lanes::SYNC, event_time);
    }

    pub(super) fn note_mutation(&mut self, fiber: FiberId, kind: Mutation) {
        self.commit_mutations += 1;
        #[cfg(feature = "trace-rich")]
        self.mutation_log.push(HostMutation {
            fiber_index: fiber.index(),
            kind: kind.into(),
        });
        #[cfg(not(feature = "trace-rich"))]
        {
            _ = (fiber, kind);
        }
    }
}

/// Layout effects of a component, only those due in this commit when
/// `due_only` is set.
fn layout_effects(hooks: &[Hook], due_only: bool) -> Vec<EffectHook> {
    hooks
        .iter()
        .filter_map(Hook::effect)
        .filter(|e| e.kind == EffectKind::Layout && (e.has_effect || !due_only))
        .cloned()
        .collect()
}
