// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Throwing and unwinding.
//!
//! A component that fails or suspends marks its fiber incomplete and
//! picks the ancestor that will handle the signal:
//!
//! - A suspension goes to the nearest suspense boundary not already showing
//!   its fallback. Without one, a time-sliced render is abandoned until the
//!   wakeable settles; a synchronous one turns the suspension into an error.
//! - An error goes to the nearest error boundary that has not captured in
//!   this render, or to the root, which then renders nothing.
//!
//! The chosen ancestor is flagged `SHOULD_CAPTURE`. Completion then unwinds
//! incomplete fibers upward until it reaches it, flips the flag to
//! `DID_CAPTURE` and begins the ancestor again.

use alloc::rc::Rc;
use alloc::vec::Vec;

use super::work_loop::ExitStatus;
use super::{Engine, record_mut};
use crate::error::{CapturedError, RenderError, Signal, SuspendedDuringSyncRender};
use crate::fiber::{FiberId, FiberState, FiberTag, Flags};
use crate::host::HostConfig;
use crate::shared::InboxEntry;
use crate::wakeable::Wakeable;

impl<H: HostConfig> Engine<H> {
    /// Handles a signal thrown while beginning `source`. Returns whether the
    /// pass continues by completing `source`; `false` means the pass ended
    /// with a fatal error.
    pub(super) fn throw_exception(&mut self, source: FiberId, signal: Signal) -> bool {
        self.fibers[source].flags |= Flags::INCOMPLETE;
        let error = match signal {
            Signal::Suspended(wakeable) => {
                if let Some(boundary) = self.nearest_suspense_boundary(source) {
                    self.attach_ping_listener(&wakeable);
                    let b = &mut self.fibers[boundary];
                    b.flags |= Flags::SHOULD_CAPTURE;
                    if let Some(state) = b.state.suspense_mut() {
                        state.retry.push(wakeable);
                    }
                    return true;
                }
                if !self.session.render_lanes.includes_sync() {
                    // Nothing to show instead; keep the committed tree until
                    // the wakeable settles.
                    self.attach_ping_listener(&wakeable);
                    self.render_did_suspend_delay_if_possible();
                    return true;
                }
                let component = self.fibers[source]
                    .tag
                    .stack_name()
                    .unwrap_or("Unknown");
                RenderError::new(SuspendedDuringSyncRender { component })
            }
            Signal::Thrown(error) => error,
        };

        let captured = CapturedError {
            error,
            component_stack: self.component_stack(source),
        };
        self.render_did_error(captured.clone());

        let mut ancestor = self.fibers[source].parent;
        while let Some(a) = ancestor {
            let f = &mut self.fibers[a];
            if !f.flags.contains(Flags::DID_CAPTURE) {
                match (&f.tag, &mut f.state) {
                    (FiberTag::ErrorBoundary, FiberState::Boundary(state)) => {
                        state.captured.push(captured);
                        f.flags |= Flags::SHOULD_CAPTURE;
                        return true;
                    }
                    (FiberTag::HostRoot, _) => {
                        f.flags |= Flags::SHOULD_CAPTURE;
                        self.session.uncaught = Some(captured);
                        return true;
                    }
                    _ => {}
                }
            }
            ancestor = f.parent;
        }

        self.session.fatal = Some(captured);
        self.session.exit = ExitStatus::FatalErrored;
        self.session.cursor = None;
        false
    }

    /// Unwinds one incomplete fiber. Returns it if it captures, to be begun
    /// again.
    pub(super) fn unwind_work(&mut self, fiber: FiberId) -> Option<FiberId> {
        let f = &mut self.fibers[fiber];
        let captures = matches!(
            f.tag,
            FiberTag::Suspense | FiberTag::ErrorBoundary | FiberTag::HostRoot
        );
        if captures && f.flags.contains(Flags::SHOULD_CAPTURE) {
            f.flags.remove(Flags::SHOULD_CAPTURE);
            f.flags |= Flags::DID_CAPTURE;
            return Some(fiber);
        }
        if matches!(f.tag, FiberTag::Offscreen) {
            self.pop_subtree_lanes();
        }
        None
    }

    fn nearest_suspense_boundary(&self, source: FiberId) -> Option<FiberId> {
        let mut ancestor = self.fibers[source].parent;
        while let Some(a) = ancestor {
            let f = &self.fibers[a];
            if let Some(state) = f.state.suspense()
                && matches!(f.tag, FiberTag::Suspense)
                && !state.showing_fallback
            {
                return Some(a);
            }
            ancestor = f.parent;
        }
        None
    }

    /// Pings the root when `wakeable` settles, once per wakeable and set of
    /// render lanes.
    fn attach_ping_listener(&mut self, wakeable: &Wakeable) {
        let (Some(root), lanes) = (self.session.root, self.session.render_lanes) else {
            return;
        };
        let Some(record) = record_mut(&mut self.roots, root) else {
            return;
        };
        let key = wakeable.key();
        let seen = record.ping_cache.entry(key).or_default();
        if lanes.is_subset_of(*seen) {
            return;
        }
        *seen = seen.merge(lanes);

        let shared = Rc::downgrade(&self.shared);
        wakeable.then(move || {
            if let Some(shared) = shared.upgrade() {
                shared.post(InboxEntry::Ping {
                    root,
                    wakeable: key,
                    lanes,
                });
            }
        });
    }

    /// Names of the components from `fiber` outward.
    pub(super) fn component_stack(&self, fiber: FiberId) -> Vec<&'static str> {
        let mut stack = Vec::new();
        let mut next = Some(fiber);
        while let Some(f) = next {
            let fiber = &self.fibers[f];
            if let Some(name) = fiber.tag.stack_name() {
                stack.push(name);
            }
            next = fiber.parent;
        }
        stack
    }
}
