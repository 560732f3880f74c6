// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! State update queues and setters.
//!
//! Every state hook owns a [`StateQueue`] shared by both buffers of its
//! fiber. Updates carry the lane they were requested on. A render applies
//! only updates whose lane it is rendering; the rest stay in the hook's base
//! queue, together with every later update, so that rebasing over skipped
//! updates replays them in their original order.

use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::cell::{Cell, RefCell};
use core::fmt;
use core::marker::PhantomData;

use super::InstanceId;
use crate::fiber::FiberId;
use crate::lane::Lanes;
use crate::shared::Shared;

/// Computes the next state from the previous one.
pub(crate) type Action = Rc<dyn Fn(&Rc<dyn Any>) -> Rc<dyn Any>>;

/// Compares two states for the bail-out check.
pub(crate) type EqFn = fn(&dyn Any, &dyn Any) -> bool;

/// `EqFn` for a concrete state type.
pub(crate) fn eq_as<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// A queued state change.
#[derive(Clone)]
pub(crate) struct Update {
    pub(crate) lane: Lanes,
    pub(crate) action: Action,
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Update")
            .field("lane", &self.lane)
            .finish_non_exhaustive()
    }
}

/// Updates waiting for a state hook.
pub(crate) struct StateQueue {
    pending: RefCell<Vec<Update>>,
    /// Updates posted while a build session was active; promoted to
    /// `pending` at the next fresh stack or render completion.
    interleaved: RefCell<Vec<Update>>,
    /// Updates the owning component made to itself while rendering.
    render_phase: RefCell<Vec<Action>>,
    fiber: Cell<Option<FiberId>>,
    instance: InstanceId,
    eq: EqFn,
    /// Transition lanes entangled through this queue.
    lanes: Cell<Lanes>,
}

impl fmt::Debug for StateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateQueue")
            .field("pending", &self.pending.borrow().len())
            .field("interleaved", &self.interleaved.borrow().len())
            .field("render_phase", &self.render_phase.borrow().len())
            .field("fiber", &self.fiber.get())
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

impl StateQueue {
    pub(crate) fn new(instance: InstanceId, eq: EqFn) -> Self {
        Self {
            pending: RefCell::new(Vec::new()),
            interleaved: RefCell::new(Vec::new()),
            render_phase: RefCell::new(Vec::new()),
            fiber: Cell::new(None),
            instance,
            eq,
            lanes: Cell::new(Lanes::NONE),
        }
    }

    /// Binds the queue to the fiber that updates should be scheduled on.
    pub(crate) fn bind(&self, fiber: FiberId) {
        self.fiber.set(Some(fiber));
    }

    pub(crate) fn fiber(&self) -> Option<FiberId> {
        self.fiber.get()
    }

    pub(crate) fn push(&self, update: Update, interleaved: bool) {
        if interleaved {
            self.interleaved.borrow_mut().push(update);
        } else {
            self.pending.borrow_mut().push(update);
        }
    }

    pub(crate) fn take_pending(&self) -> Vec<Update> {
        core::mem::take(&mut *self.pending.borrow_mut())
    }

    pub(crate) fn promote(&self) {
        let interleaved = core::mem::take(&mut *self.interleaved.borrow_mut());
        self.pending.borrow_mut().extend(interleaved);
    }

    pub(crate) fn push_render_phase(&self, action: Action) {
        self.render_phase.borrow_mut().push(action);
    }

    pub(crate) fn take_render_phase(&self) -> Vec<Action> {
        core::mem::take(&mut *self.render_phase.borrow_mut())
    }

    pub(crate) fn entangled_lanes(&self) -> Lanes {
        self.lanes.get()
    }

    pub(crate) fn set_entangled_lanes(&self, lanes: Lanes) {
        self.lanes.set(lanes);
    }

    pub(crate) fn equal(&self, a: &dyn Any, b: &dyn Any) -> bool {
        (self.eq)(a, b)
    }
}

/// State of one `use_state` call site.
#[derive(Clone)]
pub(crate) struct StateHook {
    pub(crate) memoized: Rc<dyn Any>,
    pub(crate) base_state: Rc<dyn Any>,
    pub(crate) base_queue: Vec<Update>,
    pub(crate) queue: Rc<StateQueue>,
}

impl fmt::Debug for StateHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateHook")
            .field("base_queue", &self.base_queue.len())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Result of applying queued updates for one render.
#[derive(Debug)]
pub(crate) struct Processed {
    pub(crate) hook: StateHook,
    /// The new state differs from the committed one.
    pub(crate) changed: bool,
    /// Lanes of updates left for a later render.
    pub(crate) skipped: Lanes,
}

impl StateHook {
    pub(crate) fn mount(initial: Rc<dyn Any>, queue: Rc<StateQueue>) -> Self {
        Self {
            memoized: initial.clone(),
            base_state: initial,
            base_queue: Vec::new(),
            queue,
        }
    }

    /// Computes the work-in-progress hook from the committed one.
    ///
    /// Pending updates are moved into the committed hook's base queue first,
    /// so an interrupted render does not lose them.
    pub(crate) fn process(current: &mut Self, render_lanes: Lanes) -> Processed {
        let pending = current.queue.take_pending();
        current.base_queue.extend(pending);

        let mut hook = current.clone();
        if current.base_queue.is_empty() {
            return Processed {
                hook,
                changed: false,
                skipped: Lanes::NONE,
            };
        }

        let mut state = current.base_state.clone();
        let mut new_base_state = None;
        let mut new_base_queue = Vec::new();
        let mut skipped = Lanes::NONE;
        for update in &current.base_queue {
            if update.lane.is_subset_of(render_lanes) {
                if !new_base_queue.is_empty() {
                    // Already-applied updates after a skipped one replay on
                    // rebase, but never block a render again.
                    new_base_queue.push(Update {
                        lane: Lanes::NONE,
                        action: update.action.clone(),
                    });
                }
                state = (update.action)(&state);
            } else {
                if new_base_queue.is_empty() {
                    new_base_state = Some(state.clone());
                }
                new_base_queue.push(update.clone());
                skipped = skipped.merge(update.lane);
            }
        }

        let changed = !current.queue.equal(&*state, &*current.memoized);
        hook.base_state = new_base_state.unwrap_or_else(|| state.clone());
        hook.base_queue = new_base_queue;
        hook.memoized = state;
        Processed {
            hook,
            changed,
            skipped,
        }
    }

    /// Applies updates the component made to itself during the previous
    /// render pass. Returns whether the state changed.
    pub(crate) fn apply_render_phase(&mut self) -> bool {
        let actions = self.queue.take_render_phase();
        if actions.is_empty() {
            return false;
        }
        let mut state = self.memoized.clone();
        for action in actions {
            state = action(&state);
        }
        let changed = !self.queue.equal(&*state, &*self.memoized);
        if self.base_queue.is_empty() {
            self.base_state = state.clone();
        }
        self.memoized = state;
        changed
    }
}

/// Schedules updates to one `use_state` value.
///
/// Setters are cheap to clone and may outlive the component; updates to an
/// unmounted component are dropped.
pub struct Setter<T> {
    queue: Rc<StateQueue>,
    shared: Weak<Shared>,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            shared: self.shared.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Setter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("fiber", &self.queue.fiber())
            .finish_non_exhaustive()
    }
}

impl<T: 'static> Setter<T> {
    pub(crate) fn new(queue: Rc<StateQueue>, shared: Weak<Shared>) -> Self {
        Self {
            queue,
            shared,
            _marker: PhantomData,
        }
    }

    /// Replaces the state.
    pub fn set(&self, value: T)
    where
        T: Clone,
    {
        self.dispatch(Rc::new(move |_: &Rc<dyn Any>| -> Rc<dyn Any> {
            Rc::new(value.clone())
        }));
    }

    /// Derives the next state from the previous one. The function may run
    /// more than once when renders are rebased.
    pub fn update(&self, f: impl Fn(&T) -> T + 'static) {
        self.dispatch(Rc::new(move |prev: &Rc<dyn Any>| -> Rc<dyn Any> {
            match prev.downcast_ref::<T>() {
                Some(prev) => Rc::new(f(prev)),
                None => prev.clone(),
            }
        }));
    }

    /// Returns whether both setters update the same state.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.queue, &other.queue)
    }

    fn dispatch(&self, action: Action) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if shared.is_rendering(self.queue.instance) {
            self.queue.push_render_phase(action);
            shared.note_render_phase_update();
            return;
        }
        let lane = shared.request_update_lane();
        let interleaved = shared.session_active();
        self.queue.push(Update { lane, action }, interleaved);
        if interleaved {
            shared.enqueue_interleaved(self.queue.clone());
        }
        if let Some(fiber) = self.queue.fiber() {
            shared.post_update(fiber, lane);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn hook(initial: i32) -> StateHook {
        let queue = Rc::new(StateQueue::new(InstanceId(0), eq_as::<i32>));
        StateHook::mount(Rc::new(initial), queue)
    }

    fn add(n: i32) -> Action {
        Rc::new(move |prev: &Rc<dyn Any>| -> Rc<dyn Any> {
            Rc::new(prev.downcast_ref::<i32>().copied().unwrap_or_default() + n)
        })
    }

    fn value(hook: &StateHook) -> i32 {
        *hook.memoized.downcast_ref::<i32>().unwrap()
    }

    #[test]
    fn skipped_updates_are_rebased_in_order() {
        let mut current = hook(0);
        current.queue.push(
            Update {
                lane: Lanes::TRANSITION_1,
                action: add(10),
            },
            false,
        );
        current.queue.push(
            Update {
                lane: Lanes::SYNC,
                action: add(1),
            },
            false,
        );

        // The sync render skips the transition and applies only +1.
        let sync = StateHook::process(&mut current, Lanes::SYNC);
        assert_eq!(value(&sync.hook), 1);
        assert!(sync.changed);
        assert_eq!(sync.skipped, Lanes::TRANSITION_1);
        assert_eq!(sync.hook.base_queue.len(), 2, "+1 replays after +10");
        assert_eq!(*sync.hook.base_state.downcast_ref::<i32>().unwrap(), 0);

        // Committing the sync render, then rendering the transition, replays
        // both on top of the base state.
        let mut committed = sync.hook;
        let transition = StateHook::process(&mut committed, Lanes::TRANSITION_1);
        assert_eq!(value(&transition.hook), 11);
        assert!(transition.hook.base_queue.is_empty());
        assert_eq!(transition.skipped, Lanes::NONE);
    }

    #[test]
    fn unchanged_state_reports_no_change() {
        let mut current = hook(5);
        current.queue.push(
            Update {
                lane: Lanes::DEFAULT,
                action: add(0),
            },
            false,
        );
        let processed = StateHook::process(&mut current, Lanes::DEFAULT);
        assert!(!processed.changed);
    }

    #[test]
    fn pending_updates_survive_an_abandoned_render() {
        let mut current = hook(0);
        current.queue.push(
            Update {
                lane: Lanes::DEFAULT,
                action: add(2),
            },
            false,
        );
        let _abandoned = StateHook::process(&mut current, Lanes::DEFAULT);
        assert_eq!(current.base_queue.len(), 1, "kept on the committed hook");
        let retry = StateHook::process(&mut current, Lanes::DEFAULT);
        assert_eq!(value(&retry.hook), 2);
    }

    #[test]
    fn interleaved_updates_wait_for_promotion() {
        let mut current = hook(0);
        current.queue.push(
            Update {
                lane: Lanes::DEFAULT,
                action: add(3),
            },
            true,
        );
        assert!(!StateHook::process(&mut current, Lanes::DEFAULT).changed);
        current.queue.promote();
        assert_eq!(value(&StateHook::process(&mut current, Lanes::DEFAULT).hook), 3);
    }

    #[test]
    fn render_phase_updates_apply_in_order() {
        let mut h = hook(1);
        for action in vec![add(1), add(2)] {
            h.queue.push_render_phase(action);
        }
        assert!(h.apply_render_phase());
        assert_eq!(value(&h), 4);
        assert!(!h.apply_render_phase(), "queue drained");
    }
}
