// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wakeables and suspending resources.
//!
//! A [`Wakeable`] is a one-shot completion signal. A component that cannot
//! render yet returns [`Signal::Suspended`] with a wakeable; the engine
//! attaches a listener and retries the affected lanes once the wakeable
//! settles. [`Resource`] pairs a wakeable with the value it produces.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use crate::error::{RenderError, Signal};

/// Settlement state of a [`Wakeable`].
#[derive(Clone, Debug)]
pub enum WakeStatus {
    /// Not settled yet.
    Pending,
    /// Completed successfully.
    Resolved,
    /// Completed with an error.
    Rejected(RenderError),
}

type Listener = Box<dyn FnOnce()>;

struct WakeCell {
    status: WakeStatus,
    listeners: Vec<Listener>,
}

/// A shared one-shot completion signal.
#[derive(Clone)]
pub struct Wakeable(Rc<RefCell<WakeCell>>);

impl Default for Wakeable {
    fn default() -> Self {
        Self::new()
    }
}

impl Wakeable {
    /// Creates a pending wakeable.
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(WakeCell {
            status: WakeStatus::Pending,
            listeners: Vec::new(),
        })))
    }

    /// Identity of the wakeable, stable across clones.
    #[must_use]
    pub fn key(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> WakeStatus {
        self.0.borrow().status.clone()
    }

    /// Returns whether the wakeable has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self.0.borrow().status, WakeStatus::Pending)
    }

    /// Registers a listener called once on settlement. If the wakeable has
    /// already settled the listener runs immediately.
    pub fn then(&self, listener: impl FnOnce() + 'static) {
        if self.is_settled() {
            listener();
        } else {
            self.0.borrow_mut().listeners.push(Box::new(listener));
        }
    }

    /// Settles successfully and wakes listeners. Later calls do nothing.
    pub fn resolve(&self) {
        self.settle(WakeStatus::Resolved);
    }

    /// Settles with an error and wakes listeners. Later calls do nothing.
    pub fn reject(&self, error: RenderError) {
        self.settle(WakeStatus::Rejected(error));
    }

    fn settle(&self, status: WakeStatus) {
        let listeners = {
            let mut cell = self.0.borrow_mut();
            if !matches!(cell.status, WakeStatus::Pending) {
                return;
            }
            cell.status = status;
            core::mem::take(&mut cell.listeners)
        };
        for listener in listeners {
            listener();
        }
    }
}

impl fmt::Debug for Wakeable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.0.borrow();
        f.debug_struct("Wakeable")
            .field("key", &self.key())
            .field("status", &cell.status)
            .field("listeners", &cell.listeners.len())
            .finish()
    }
}

enum Slot<T> {
    Pending,
    Ready(T),
    Failed(RenderError),
}

/// A value that may not be available yet.
///
/// Reading a pending resource suspends the reading component.
pub struct Resource<T> {
    slot: Rc<RefCell<Slot<T>>>,
    wakeable: Wakeable,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            wakeable: self.wakeable.clone(),
        }
    }
}

impl<T: Clone> Default for Resource<T> {
    fn default() -> Self {
        Self::pending()
    }
}

impl<T: Clone> Resource<T> {
    /// Creates a resource that is still loading.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            slot: Rc::new(RefCell::new(Slot::Pending)),
            wakeable: Wakeable::new(),
        }
    }

    /// Creates a resource that is already available.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let resource = Self::pending();
        resource.resolve(value);
        resource
    }

    /// Reads the value, suspending while it loads.
    pub fn read(&self) -> Result<T, Signal> {
        match &*self.slot.borrow() {
            Slot::Ready(value) => Ok(value.clone()),
            Slot::Failed(error) => Err(Signal::Thrown(error.clone())),
            Slot::Pending => Err(Signal::Suspended(self.wakeable.clone())),
        }
    }

    /// Supplies the value and wakes suspended readers.
    pub fn resolve(&self, value: T) {
        {
            let mut slot = self.slot.borrow_mut();
            if !matches!(*slot, Slot::Pending) {
                return;
            }
            *slot = Slot::Ready(value);
        }
        self.wakeable.resolve();
    }

    /// Fails the resource; readers throw `error` on their next attempt.
    pub fn reject(&self, error: RenderError) {
        {
            let mut slot = self.slot.borrow_mut();
            if !matches!(*slot, Slot::Pending) {
                return;
            }
            *slot = Slot::Failed(error.clone());
        }
        self.wakeable.reject(error);
    }

    /// The wakeable readers suspend on.
    #[must_use]
    pub fn wakeable(&self) -> &Wakeable {
        &self.wakeable
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.borrow() {
            Slot::Pending => "pending",
            Slot::Ready(_) => "ready",
            Slot::Failed(_) => "failed",
        };
        f.debug_struct("Resource")
            .field("state", &state)
            .field("wakeable", &self.wakeable.key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[test]
    fn listeners_fire_once_on_resolve() {
        let w = Wakeable::new();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        w.then(move || h.set(h.get() + 1));
        assert_eq!(hits.get(), 0);
        w.resolve();
        w.resolve();
        assert_eq!(hits.get(), 1);
        assert!(w.is_settled());
    }

    #[test]
    fn late_listener_runs_immediately() {
        let w = Wakeable::new();
        w.reject(RenderError::msg("gone"));
        let hit = Rc::new(Cell::new(false));
        let h = hit.clone();
        w.then(move || h.set(true));
        assert!(hit.get());
        assert!(matches!(w.status(), WakeStatus::Rejected(_)));
    }

    #[test]
    fn clones_share_identity() {
        let w = Wakeable::new();
        assert_eq!(w.key(), w.clone().key());
        assert_ne!(w.key(), Wakeable::new().key());
    }

    #[test]
    fn resource_suspends_until_resolved() {
        let r: Resource<u32> = Resource::pending();
        let Err(Signal::Suspended(w)) = r.read() else {
            panic!("pending resource must suspend");
        };
        assert_eq!(w.key(), r.wakeable().key());
        r.resolve(7);
        assert!(w.is_settled());
        assert_eq!(r.read().ok(), Some(7));
    }

    #[test]
    fn rejected_resource_throws() {
        let r: Resource<u32> = Resource::pending();
        r.reject(RenderError::msg("offline"));
        assert!(matches!(r.read(), Err(Signal::Thrown(_))));
        r.resolve(1);
        assert!(matches!(r.read(), Err(Signal::Thrown(_))), "first settlement wins");
    }
}
