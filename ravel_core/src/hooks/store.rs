// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! External mutable stores.
//!
//! An [`ExternalStore`] holds a value that lives outside the component
//! tree. Components read it with [`RenderCx::use_store`], which subscribes
//! in a passive effect and re-renders the component synchronously whenever
//! the store changes. A time-sliced render that read a store re-checks the
//! store's version before committing; if the store moved on mid-render the
//! tree is rebuilt synchronously so the commit never mixes two versions.
//!
//! [`RenderCx::use_store`]: super::RenderCx::use_store

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt;

struct StoreInner<T> {
    value: RefCell<T>,
    version: Cell<u64>,
    subscribers: RefCell<Vec<(Subscription, Rc<dyn Fn()>)>>,
    next_subscription: Cell<u64>,
}

/// Identifies one listener registered with [`ExternalStore::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// A shared value with change notification.
pub struct ExternalStore<T> {
    inner: Rc<StoreInner<T>>,
}

impl<T> Clone for ExternalStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ExternalStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalStore")
            .field("value", &self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .field("subscribers", &self.inner.subscribers.borrow().len())
            .finish()
    }
}

impl<T: Clone + 'static> ExternalStore<T> {
    /// Creates a store holding `value` at version 0.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                value: RefCell::new(value),
                version: Cell::new(0),
                subscribers: RefCell::new(Vec::new()),
                next_subscription: Cell::new(0),
            }),
        }
    }

    /// Returns a copy of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Returns the number of writes so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Replaces the value and notifies subscribers.
    pub fn set(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        self.inner.version.set(self.inner.version.get() + 1);
        let listeners: Vec<_> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener();
        }
    }

    /// Derives the next value from the current one and notifies
    /// subscribers.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.inner.value.borrow());
        self.set(next);
    }

    /// Registers a change listener.
    pub fn subscribe(&self, listener: impl Fn() + 'static) -> Subscription {
        let id = Subscription(self.inner.next_subscription.get());
        self.inner.next_subscription.set(id.0 + 1);
        self.inner
            .subscribers
            .borrow_mut()
            .push((id, Rc::new(listener)));
        id
    }

    /// Removes a listener. Unknown subscriptions are ignored.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.inner
            .subscribers
            .borrow_mut()
            .retain(|(id, _)| *id != subscription);
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Identity of the store, stable across clones.
    pub(crate) fn identity(&self) -> i64 {
        let addr = Rc::as_ptr(&self.inner).cast::<()>() as usize;
        i64::try_from(addr).unwrap_or(i64::MAX)
    }

    /// A check comparing the store against the version read during render.
    pub(crate) fn check(&self, version: u64) -> StoreCheck {
        let inner = self.inner.clone();
        StoreCheck {
            version,
            current_version: Rc::new(move || inner.version.get()),
        }
    }
}

/// A store version read by a time-sliced render.
#[derive(Clone)]
pub(crate) struct StoreCheck {
    version: u64,
    current_version: Rc<dyn Fn() -> u64>,
}

impl StoreCheck {
    /// Returns whether the store still has the version that was rendered.
    pub(crate) fn is_consistent(&self) -> bool {
        (self.current_version)() == self.version
    }
}

impl fmt::Debug for StoreCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCheck")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_bumps_version_and_notifies() {
        let store = ExternalStore::new(1_u32);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let sub = store.subscribe(move || h.set(h.get() + 1));
        store.set(2);
        store.update(|v| v * 10);
        assert_eq!(store.get(), 20);
        assert_eq!(store.version(), 2);
        assert_eq!(hits.get(), 2);

        store.unsubscribe(sub);
        store.set(3);
        assert_eq!(hits.get(), 2, "unsubscribed listener is not called");
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn checks_detect_later_writes() {
        let store = ExternalStore::new("a");
        let check = store.check(store.version());
        assert!(check.is_consistent());
        store.set("b");
        assert!(!check.is_consistent());
    }

    #[test]
    fn listener_may_unsubscribe_while_notified() {
        let store = ExternalStore::new(0_u8);
        let slot: Rc<Cell<Option<Subscription>>> = Rc::new(Cell::new(None));
        let (s, st) = (slot.clone(), store.clone());
        let sub = store.subscribe(move || {
            if let Some(sub) = s.get() {
                st.unsubscribe(sub);
            }
        });
        slot.set(Some(sub));
        store.set(1);
        assert_eq!(store.subscriber_count(), 0);
        assert_eq!(store.identity(), store.clone().identity());
    }
}
