// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! State shared between the engine and the handles it gives out.
//!
//! Setters, store subscriptions and wakeable listeners run outside the
//! engine's `&mut self`, so they cannot schedule work directly. They read
//! the ambient update context from [`Shared`] to pick a lane, then post an
//! [`InboxEntry`] that the engine drains at its next entry point.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt;

use crate::fiber::{ExecutionContext, FiberId, RootId};
use crate::hooks::InstanceId;
use crate::hooks::queue::StateQueue;
use crate::host_loop::HostLoop;
use crate::lane::{EventPriority, LaneAllocator, Lanes};
use crate::time::HostTime;

/// Work posted from outside the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InboxEntry {
    /// A fiber received an update on `lane`.
    Update {
        fiber: FiberId,
        lane: Lanes,
        event_time: HostTime,
    },
    /// A wakeable a render suspended on has settled.
    Ping {
        root: RootId,
        wakeable: usize,
        lanes: Lanes,
    },
    /// A wakeable a committed boundary is showing a fallback for has
    /// settled.
    Retry { boundary: FiberId, wakeable: usize },
}

pub(crate) struct Shared {
    host: Rc<dyn HostLoop>,
    inbox: RefCell<Vec<InboxEntry>>,

    // -- Update context --
    execution: Cell<ExecutionContext>,
    update_priority: Cell<Option<EventPriority>>,
    in_transition: Cell<bool>,
    transition_lane: Cell<Lanes>,
    event_time: Cell<Option<HostTime>>,
    allocator: Cell<LaneAllocator>,

    // -- Build session --
    render_lanes: Cell<Lanes>,
    session_active: Cell<bool>,
    interleaved: RefCell<Vec<Rc<StateQueue>>>,
    rendering: Cell<Option<InstanceId>>,
    render_phase_update: Cell<bool>,
    next_instance: Cell<u64>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("inbox", &self.inbox.borrow().len())
            .field("execution", &self.execution.get())
            .field("update_priority", &self.update_priority.get())
            .field("in_transition", &self.in_transition.get())
            .field("render_lanes", &self.render_lanes.get())
            .field("session_active", &self.session_active.get())
            .finish_non_exhaustive()
    }
}

impl Shared {
    pub(crate) fn new(host: Rc<dyn HostLoop>) -> Self {
        Self {
            host,
            inbox: RefCell::new(Vec::new()),
            execution: Cell::new(ExecutionContext::empty()),
            update_priority: Cell::new(None),
            in_transition: Cell::new(false),
            transition_lane: Cell::new(Lanes::NONE),
            event_time: Cell::new(None),
            allocator: Cell::new(LaneAllocator::new()),
            render_lanes: Cell::new(Lanes::NONE),
            session_active: Cell::new(false),
            interleaved: RefCell::new(Vec::new()),
            rendering: Cell::new(None),
            render_phase_update: Cell::new(false),
            next_instance: Cell::new(0),
        }
    }

    pub(crate) fn now(&self) -> HostTime {
        self.host.now()
    }

    // -- Inbox --

    /// Posts work for the engine. Wakes the host when nothing on the engine
    /// side will drain the inbox on its own.
    pub(crate) fn post(&self, entry: InboxEntry) {
        self.inbox.borrow_mut().push(entry);
        if self.execution.get().is_empty() {
            self.host.request_callback();
        }
    }

    /// Posts an update for `fiber` with the current event time.
    pub(crate) fn post_update(&self, fiber: FiberId, lane: Lanes) {
        let event_time = self.request_event_time();
        self.post(InboxEntry::Update {
            fiber,
            lane,
            event_time,
        });
    }

    pub(crate) fn take_inbox(&self) -> Vec<InboxEntry> {
        core::mem::take(&mut *self.inbox.borrow_mut())
    }

    pub(crate) fn has_inbox(&self) -> bool {
        !self.inbox.borrow().is_empty()
    }

    // -- Update context --

    pub(crate) fn execution(&self) -> ExecutionContext {
        self.execution.get()
    }

    pub(crate) fn set_execution(&self, context: ExecutionContext) {
        self.execution.set(context);
    }

    /// Replaces the ambient update priority, returning the previous one.
    pub(crate) fn replace_update_priority(
        &self,
        priority: Option<EventPriority>,
    ) -> Option<EventPriority> {
        self.update_priority.replace(priority)
    }

    /// Enters or leaves a transition scope, returning the previous state.
    pub(crate) fn replace_in_transition(&self, in_transition: bool) -> bool {
        self.in_transition.replace(in_transition)
    }

    /// Lane for an update requested right now.
    ///
    /// Updates from inside a render take a render lane. Updates inside a
    /// transition scope share one transition lane per event. Otherwise the
    /// ambient event priority decides, defaulting to [`Lanes::DEFAULT`].
    pub(crate) fn request_update_lane(&self) -> Lanes {
        let render_lanes = self.render_lanes.get();
        if self.execution.get().contains(ExecutionContext::RENDER) && !render_lanes.is_empty() {
            return render_lanes.pick_arbitrary();
        }
        if self.in_transition.get() {
            if self.transition_lane.get().is_empty() {
                self.transition_lane.set(self.claim_transition_lane());
            }
            return self.transition_lane.get();
        }
        self.update_priority
            .get()
            .map_or(Lanes::DEFAULT, EventPriority::lane)
    }

    /// Time of the current event. Updates posted during the same event share
    /// it; inside a render or commit it is always the current time.
    pub(crate) fn request_event_time(&self) -> HostTime {
        if self.execution.get().is_working() {
            return self.now();
        }
        if let Some(t) = self.event_time.get() {
            return t;
        }
        let t = self.now();
        self.event_time.set(Some(t));
        t
    }

    /// Ends the current event: the next update gets a fresh event time and
    /// transition lane.
    pub(crate) fn end_event(&self) {
        self.event_time.set(None);
        self.transition_lane.set(Lanes::NONE);
    }

    pub(crate) fn claim_transition_lane(&self) -> Lanes {
        let mut allocator = self.allocator.get();
        let lane = allocator.claim_next_transition_lane();
        self.allocator.set(allocator);
        lane
    }

    pub(crate) fn claim_retry_lane(&self) -> Lanes {
        let mut allocator = self.allocator.get();
        let lane = allocator.claim_next_retry_lane();
        self.allocator.set(allocator);
        lane
    }

    // -- Build session --

    pub(crate) fn set_render_lanes(&self, lanes: Lanes) {
        self.render_lanes.set(lanes);
    }

    pub(crate) fn set_session_active(&self, active: bool) {
        self.session_active.set(active);
    }

    pub(crate) fn session_active(&self) -> bool {
        self.session_active.get()
    }

    /// Remembers a queue holding interleaved updates.
    pub(crate) fn enqueue_interleaved(&self, queue: Rc<StateQueue>) {
        self.interleaved.borrow_mut().push(queue);
    }

    /// Moves interleaved updates into their queues' pending lists.
    pub(crate) fn promote_interleaved(&self) {
        let queues = core::mem::take(&mut *self.interleaved.borrow_mut());
        for queue in queues {
            queue.promote();
        }
    }

    pub(crate) fn next_instance(&self) -> InstanceId {
        let id = self.next_instance.get();
        self.next_instance.set(id + 1);
        InstanceId(id)
    }

    /// Marks `instance` as the component currently rendering.
    pub(crate) fn begin_component(&self, instance: InstanceId) {
        self.rendering.set(Some(instance));
        self.render_phase_update.set(false);
    }

    /// Clears the rendering component. Returns whether it scheduled updates
    /// on itself while rendering.
    pub(crate) fn end_component(&self) -> bool {
        self.rendering.set(None);
        self.render_phase_update.replace(false)
    }

    pub(crate) fn is_rendering(&self, instance: InstanceId) -> bool {
        self.rendering.get() == Some(instance)
    }

    pub(crate) fn note_render_phase_update(&self) {
        self.render_phase_update.set(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_loop::ManualLoop;

    fn shared() -> (ManualLoop, Shared) {
        let host = ManualLoop::new();
        let shared = Shared::new(Rc::new(host.clone()));
        (host, shared)
    }

    #[test]
    fn lane_follows_ambient_priority() {
        let (_, shared) = shared();
        assert_eq!(shared.request_update_lane(), Lanes::DEFAULT);
        shared.replace_update_priority(Some(EventPriority::Discrete));
        assert_eq!(shared.request_update_lane(), Lanes::SYNC);
        shared.replace_update_priority(Some(EventPriority::Continuous));
        assert_eq!(shared.request_update_lane(), Lanes::INPUT_CONTINUOUS);
    }

    #[test]
    fn one_transition_lane_per_event() {
        let (_, shared) = shared();
        shared.replace_in_transition(true);
        let first = shared.request_update_lane();
        assert!(first.includes_only_transitions());
        assert_eq!(shared.request_update_lane(), first);
        shared.end_event();
        assert_ne!(shared.request_update_lane(), first, "next event claims the next lane");
    }

    #[test]
    fn event_time_is_stable_within_an_event() {
        let (host, shared) = shared();
        let t0 = shared.request_event_time();
        host.advance(crate::time::Duration::from_millis(3));
        assert_eq!(shared.request_event_time(), t0);
        shared.end_event();
        assert!(shared.request_event_time() > t0);
    }

    #[test]
    fn posting_wakes_the_host_only_when_idle() {
        let (host, shared) = shared();
        let fiber = FiberId {
            idx: 0,
            generation: 0,
        };
        shared.set_execution(ExecutionContext::COMMIT);
        shared.post_update(fiber, Lanes::SYNC);
        assert!(!host.has_callback());
        shared.set_execution(ExecutionContext::empty());
        shared.post_update(fiber, Lanes::SYNC);
        assert!(host.has_callback());
        assert_eq!(shared.take_inbox().len(), 2);
        assert!(!shared.has_inbox());
    }
}
