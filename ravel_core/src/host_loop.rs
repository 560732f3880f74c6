// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The host event loop seen from the engine.
//!
//! The engine never blocks and never spawns threads. It asks the host for a
//! single future callback (a message-channel post, a microtask, a `poll`
//! wakeup) and for at most one timer, and the host calls back into
//! [`Engine::run_host_callback`] or [`Engine::run_host_timeout`] when they
//! fire.
//!
//! [`ManualLoop`] is a deterministic implementation driven entirely by the
//! caller, used by tests and the test host.
//!
//! [`Engine::run_host_callback`]: crate::engine::Engine::run_host_callback
//! [`Engine::run_host_timeout`]: crate::engine::Engine::run_host_timeout

use alloc::rc::Rc;
use core::cell::Cell;

use crate::time::{Duration, HostTime};

/// Clock and wakeup primitives provided by the host environment.
///
/// All methods take `&self` because the loop is shared between the
/// scheduler, the engine and any wakeable listeners that need to re-arm it.
pub trait HostLoop {
    /// Reads the monotonic clock.
    fn now(&self) -> HostTime;

    /// Requests that the host call back into the engine as soon as it has
    /// handled pending input and paint. Repeated requests before the callback
    /// fires coalesce into one.
    fn request_callback(&self);

    /// Arms the single host timer to fire at `at`, replacing any armed timer.
    fn request_timeout(&self, at: HostTime);

    /// Disarms the host timer.
    fn cancel_timeout(&self);

    /// Reports whether user input is waiting to be processed.
    ///
    /// `include_continuous` widens the pending-input query to continuous input such as
    /// pointer moves. Hosts without such a query keep the default.
    fn is_input_pending(&self, include_continuous: bool) -> bool {
        _ = include_continuous;
        false
    }
}

#[derive(Debug, Default)]
struct ManualState {
    now: Cell<u64>,
    auto_advance: Cell<u64>,
    callback_requested: Cell<bool>,
    callback_requests: Cell<u32>,
    timeout: Cell<Option<HostTime>>,
    input_pending: Cell<bool>,
    continuous_input_pending: Cell<bool>,
}

/// A host loop whose clock and wakeups are driven by the caller.
///
/// Clones share state, so one handle can be given to the engine while the
/// test keeps another to advance time and observe requests.
#[derive(Clone, Debug, Default)]
pub struct ManualLoop {
    state: Rc<ManualState>,
}

impl ManualLoop {
    /// Creates a loop whose clock starts at [`HostTime::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loop whose clock starts at `start`.
    #[must_use]
    pub fn starting_at(start: HostTime) -> Self {
        let lp = Self::default();
        lp.state.now.set(start.ticks());
        lp
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let s = &self.state;
        s.now.set(s.now.get().saturating_add(by.ticks()));
    }

    /// Makes every [`now`](HostLoop::now) call advance the clock by `step`
    /// after reading it. Used to force time slices to run out.
    pub fn set_auto_advance(&self, step: Duration) {
        self.state.auto_advance.set(step.ticks());
    }

    /// Simulates pending user input.
    pub fn set_input_pending(&self, discrete: bool, continuous: bool) {
        self.state.input_pending.set(discrete);
        self.state.continuous_input_pending.set(continuous);
    }

    /// Consumes a pending callback request, returning whether one existed.
    pub fn take_callback(&self) -> bool {
        self.state.callback_requested.replace(false)
    }

    /// Returns whether a callback is currently requested.
    #[must_use]
    pub fn has_callback(&self) -> bool {
        self.state.callback_requested.get()
    }

    /// Returns the total number of callback requests seen so far.
    #[must_use]
    pub fn callback_requests(&self) -> u32 {
        self.state.callback_requests.get()
    }

    /// Returns the armed timer deadline, if any.
    #[must_use]
    pub fn pending_timeout(&self) -> Option<HostTime> {
        self.state.timeout.get()
    }

    /// Disarms and returns the timer if its deadline has been reached.
    pub fn take_due_timeout(&self) -> bool {
        match self.state.timeout.get() {
            Some(at) if at.ticks() <= self.state.now.get() => {
                self.state.timeout.set(None);
                true
            }
            _ => false,
        }
    }
}

impl HostLoop for ManualLoop {
    fn now(&self) -> HostTime {
        let s = &self.state;
        let t = s.now.get();
        s.now.set(t.saturating_add(s.auto_advance.get()));
        HostTime(t)
    }

    fn request_callback(&self) {
        let s = &self.state;
        s.callback_requested.set(true);
        s.callback_requests.set(s.callback_requests.get().saturating_add(1));
    }

    fn request_timeout(&self, at: HostTime) {
        self.state.timeout.set(Some(at));
    }

    fn cancel_timeout(&self) {
        self.state.timeout.set(None);
    }

    fn is_input_pending(&self, include_continuous: bool) -> bool {
        let s = &self.state;
        s.input_pending.get() || (include_continuous && s.continuous_input_pending.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_clock_and_requests() {
        let a = ManualLoop::new();
        let b = a.clone();
        a.advance(Duration::from_millis(3));
        assert_eq!(b.now(), HostTime(3_000));
        b.request_callback();
        assert!(a.take_callback());
        assert!(!a.take_callback(), "request is consumed once");
    }

    #[test]
    fn auto_advance_moves_clock_after_each_read() {
        let lp = ManualLoop::starting_at(HostTime(10));
        lp.set_auto_advance(Duration(5));
        assert_eq!(lp.now(), HostTime(10));
        assert_eq!(lp.now(), HostTime(15));
        assert_eq!(lp.now(), HostTime(20));
    }

    #[test]
    fn timeout_fires_only_once_due() {
        let lp = ManualLoop::new();
        lp.request_timeout(HostTime(100));
        assert!(!lp.take_due_timeout());
        lp.advance(Duration(100));
        assert!(lp.take_due_timeout());
        assert_eq!(lp.pending_timeout(), None);
    }

    #[test]
    fn continuous_input_needs_wide_query() {
        let lp = ManualLoop::new();
        lp.set_input_pending(false, true);
        assert!(!lp.is_input_pending(false));
        assert!(lp.is_input_pending(true));
    }
}
