// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cooperative task scheduler with priorities, delays and time slicing.
//!
//! Tasks are opaque values of type `T`. Each one carries a [`Priority`] that
//! maps to a timeout; the task's *expiration time* (start time plus timeout)
//! orders the ready queue, so an old low-priority task eventually outranks
//! fresh high-priority ones. Delayed tasks wait in a timer queue until their
//! start time.
//!
//! Work happens in *slices*. The host calls into the scheduler from a single
//! callback; the scheduler runs ready tasks until the slice budget is spent
//! (or, with the input check enabled, until input is pending), then asks the
//! host for another callback. A task can return a continuation
//! ([`Step::Yielded`]), which keeps its position and ends the slice.
//!
//! There are two ways to drive a slice:
//!
//! - [`Scheduler::perform_work_until_deadline`] with a [`TaskRunner`], for
//!   callers that can lend the scheduler out while tasks run.
//! - The split API ([`begin_slice`], [`next_task`], [`complete_task`],
//!   [`end_slice`]), for owners that need `&mut self` inside each task.
//!
//! [`begin_slice`]: Scheduler::begin_slice
//! [`next_task`]: Scheduler::next_task
//! [`complete_task`]: Scheduler::complete_task
//! [`end_slice`]: Scheduler::end_slice

use alloc::collections::BinaryHeap;
use alloc::rc::Rc;
use core::cmp::Reverse;
use core::fmt;

use hashbrown::HashMap;

use crate::host_loop::HostLoop;
use crate::time::{Duration, HostTime};

/// Task priority levels, most urgent first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Expires before it is scheduled: always runs even when yielding.
    Immediate,
    /// User-facing work that should finish within a quarter second.
    UserBlocking,
    /// Everything without a better classification.
    Normal,
    /// Deferrable work.
    Low,
    /// Runs only when nothing else is ready.
    Idle,
}

impl Priority {
    /// Returns the expiration time of a task at this priority that becomes
    /// ready at `start`.
    #[must_use]
    pub const fn expiration_from(self, start: HostTime) -> HostTime {
        match self {
            Self::Immediate => start.saturating_sub(Duration::from_millis(1)),
            Self::UserBlocking => start.saturating_add(Duration::from_millis(250)),
            Self::Normal => start.saturating_add(Duration::from_millis(5_000)),
            Self::Low => start.saturating_add(Duration::from_millis(10_000)),
            // Roughly twelve days: effectively never.
            Self::Idle => start.saturating_add(Duration::from_millis(1_073_741_823)),
        }
    }
}

/// Configuration for the [`Scheduler`].
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Length of a work slice before the scheduler yields to the host.
    pub frame_budget: Duration,
    /// Consult [`HostLoop::is_input_pending`] instead of yielding as soon as
    /// the frame budget is spent.
    pub enable_input_check: bool,
    /// With the input check, only discrete input causes a yield before this
    /// much of the slice has elapsed.
    pub continuous_input_budget: Duration,
    /// With the input check, the slice always yields after this long.
    pub max_yield_interval: Duration,
}

impl SchedulerConfig {
    /// Yield every five milliseconds.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            frame_budget: Duration::from_millis(5),
            enable_input_check: false,
            continuous_input_budget: Duration::from_millis(50),
            max_yield_interval: Duration::from_millis(300),
        }
    }

    /// Keep working past the frame budget while no input is pending.
    #[must_use]
    pub const fn input_aware() -> Self {
        Self {
            enable_input_check: true,
            ..Self::standard()
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Handle to a scheduled task.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

/// Result of running a task.
#[derive(Debug, PartialEq, Eq)]
pub enum Step<T> {
    /// The task finished.
    Done,
    /// The task has more work; the continuation keeps the task's place in the
    /// queue and runs in a later slice.
    Yielded(T),
}

/// What the slice should do next.
#[derive(Debug, PartialEq, Eq)]
pub enum Next<T> {
    /// Run this task, then report back with [`Scheduler::complete_task`].
    Run {
        /// The task's handle.
        id: TaskId,
        /// The task itself, taken out of the queue while it runs.
        task: T,
        /// Whether the task's expiration time has passed.
        did_timeout: bool,
    },
    /// The slice budget is spent, or a continuation asked to yield.
    Yield,
    /// No task is ready.
    Idle,
}

/// Executes tasks on behalf of [`Scheduler::perform_work_until_deadline`].
pub trait TaskRunner<T> {
    /// Runs one task.
    fn run(&mut self, task: T, did_timeout: bool) -> Step<T>;
}

impl<T, F: FnMut(T, bool) -> Step<T>> TaskRunner<T> for F {
    fn run(&mut self, task: T, did_timeout: bool) -> Step<T> {
        self(task, did_timeout)
    }
}

/// A closure bound to the priority that was current when it was wrapped.
///
/// Created by [`Scheduler::wrap_callback`].
pub struct PriorityScoped<F> {
    priority: Priority,
    f: F,
}

impl<F> PriorityScoped<F> {
    /// The captured priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Runs the closure with the captured priority current.
    pub fn call<T, R>(self, scheduler: &mut Scheduler<T>) -> R
    where
        F: FnOnce(&mut Scheduler<T>) -> R,
    {
        scheduler.run_with_priority(self.priority, self.f)
    }
}

impl<F> fmt::Debug for PriorityScoped<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityScoped")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

struct TaskSlot<T> {
    /// `None` while the task is running.
    task: Option<T>,
    priority: Priority,
    start_time: HostTime,
    expiration_time: HostTime,
    delayed: bool,
}

/// The task scheduler.
///
/// Queue entries are `(sort time, sequence)` pairs; the sequence number keeps
/// equal-time tasks in insertion order. Cancelled tasks are removed from the
/// slot map and their heap entries are skipped lazily.
pub struct Scheduler<T> {
    config: SchedulerConfig,
    host: Rc<dyn HostLoop>,
    tasks: HashMap<u64, TaskSlot<T>>,
    ready: BinaryHeap<Reverse<(HostTime, u64)>>,
    timers: BinaryHeap<Reverse<(HostTime, u64)>>,
    next_id: u64,
    current_priority: Priority,
    slice_priority: Priority,
    slice_start: HostTime,
    performing: bool,
    slice_yielded: bool,
    needs_paint: bool,
    host_callback_scheduled: bool,
    host_timeout_scheduled: bool,
}

impl<T> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("tasks", &self.tasks.len())
            .field("current_priority", &self.current_priority)
            .field("performing", &self.performing)
            .field("host_callback_scheduled", &self.host_callback_scheduled)
            .field("host_timeout_scheduled", &self.host_timeout_scheduled)
            .finish_non_exhaustive()
    }
}

impl<T> Scheduler<T> {
    /// Creates a scheduler that talks to `host`.
    #[must_use]
    pub fn new(config: SchedulerConfig, host: Rc<dyn HostLoop>) -> Self {
        Self {
            config,
            host,
            tasks: HashMap::new(),
            ready: BinaryHeap::new(),
            timers: BinaryHeap::new(),
            next_id: 0,
            current_priority: Priority::Normal,
            slice_priority: Priority::Normal,
            slice_start: HostTime::ZERO,
            performing: false,
            slice_yielded: false,
            needs_paint: false,
            host_callback_scheduled: false,
            host_timeout_scheduled: false,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Reads the host clock.
    #[inline]
    #[must_use]
    pub fn now(&self) -> HostTime {
        self.host.now()
    }

    /// Returns the priority of the running task, or the priority set by
    /// [`run_with_priority`](Self::run_with_priority).
    #[must_use]
    pub fn current_priority(&self) -> Priority {
        self.current_priority
    }

    /// Returns whether a host callback is outstanding.
    #[must_use]
    pub fn is_host_callback_scheduled(&self) -> bool {
        self.host_callback_scheduled
    }

    /// Returns whether `id` is still queued or running.
    #[must_use]
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id.0)
    }

    /// Returns the number of queued or running tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns whether no task is queued or running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Schedules a task, optionally after a delay.
    pub fn schedule_task(&mut self, priority: Priority, task: T, delay: Option<Duration>) -> TaskId {
        let now = self.host.now();
        let start_time = match delay {
            Some(d) if d > Duration::ZERO => now.saturating_add(d),
            _ => now,
        };
        let expiration_time = priority.expiration_from(start_time);
        let seq = self.next_id;
        self.next_id += 1;
        let delayed = start_time > now;
        self.tasks.insert(
            seq,
            TaskSlot {
                task: Some(task),
                priority,
                start_time,
                expiration_time,
                delayed,
            },
        );

        if delayed {
            self.timers.push(Reverse((start_time, seq)));
            if self.peek_ready().is_none() && self.peek_timer() == Some(seq) {
                self.arm_timeout(start_time);
            }
        } else {
            self.ready.push(Reverse((expiration_time, seq)));
            if !self.host_callback_scheduled && !self.performing {
                self.request_host_callback();
            }
        }
        TaskId(seq)
    }

    /// Cancels a task. Cancelling a finished or unknown task does nothing.
    pub fn cancel_task(&mut self, id: TaskId) {
        self.tasks.remove(&id.0);
    }

    /// Runs `f` with `priority` as the current priority.
    pub fn run_with_priority<R>(&mut self, priority: Priority, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = core::mem::replace(&mut self.current_priority, priority);
        let result = f(self);
        self.current_priority = previous;
        result
    }

    /// Captures the current priority together with `f`.
    pub fn wrap_callback<F>(&self, f: F) -> PriorityScoped<F> {
        PriorityScoped {
            priority: self.current_priority,
            f,
        }
    }

    /// Asks the current slice to yield at the next check so the host can
    /// paint.
    pub fn request_paint(&mut self) {
        self.needs_paint = true;
    }

    /// Returns whether the running task should return control.
    #[must_use]
    pub fn should_yield(&self) -> bool {
        if self.needs_paint {
            return true;
        }
        let elapsed = self.host.now().saturating_duration_since(self.slice_start);
        if elapsed < self.config.frame_budget {
            return false;
        }
        if !self.config.enable_input_check {
            return true;
        }
        if elapsed < self.config.continuous_input_budget {
            self.host.is_input_pending(false)
        } else if elapsed < self.config.max_yield_interval {
            self.host.is_input_pending(true)
        } else {
            true
        }
    }

    /// Handles the host timer firing: promotes due timers and asks for a
    /// callback if anything became ready.
    pub fn handle_timeout(&mut self) {
        self.host_timeout_scheduled = false;
        let now = self.host.now();
        self.advance_timers(now);
        if self.host_callback_scheduled {
            return;
        }
        if self.peek_ready().is_some() {
            self.request_host_callback();
        } else if let Some(start) = self.first_timer_start() {
            self.arm_timeout(start);
        }
    }

    // -----------------------------------------------------------------------
    // Slices
    // -----------------------------------------------------------------------

    /// Runs ready tasks through `runner` until the slice ends. Returns whether
    /// ready work remains (a callback has then been requested).
    pub fn perform_work_until_deadline(&mut self, runner: &mut impl TaskRunner<T>) -> bool {
        self.begin_slice();
        while let Next::Run {
            id,
            task,
            did_timeout,
        } = self.next_task()
        {
            let step = runner.run(task, did_timeout);
            self.complete_task(id, step);
        }
        self.end_slice()
    }

    /// Starts a slice. Call when the host callback fires.
    pub fn begin_slice(&mut self) {
        self.host_callback_scheduled = false;
        if self.host_timeout_scheduled {
            self.host_timeout_scheduled = false;
            self.host.cancel_timeout();
        }
        self.performing = true;
        self.slice_yielded = false;
        self.slice_priority = self.current_priority;
        self.slice_start = self.host.now();
        self.advance_timers(self.slice_start);
    }

    /// Takes the next task to run in this slice.
    pub fn next_task(&mut self) -> Next<T> {
        if self.slice_yielded {
            return Next::Yield;
        }
        let now = self.host.now();
        self.advance_timers(now);
        let Some(seq) = self.peek_ready() else {
            return Next::Idle;
        };
        let Some(slot) = self.tasks.get(&seq) else {
            return Next::Idle;
        };
        let expiration = slot.expiration_time;
        if expiration > now && self.should_yield() {
            return Next::Yield;
        }
        let Some(slot) = self.tasks.get_mut(&seq) else {
            return Next::Idle;
        };
        let Some(task) = slot.task.take() else {
            return Next::Idle;
        };
        self.current_priority = slot.priority;
        Next::Run {
            id: TaskId(seq),
            task,
            did_timeout: expiration <= now,
        }
    }

    /// Reports the outcome of a task handed out by [`next_task`](Self::next_task).
    ///
    /// A continuation is dropped if the task was cancelled while it ran.
    pub fn complete_task(&mut self, id: TaskId, step: Step<T>) {
        match step {
            Step::Done => {
                self.tasks.remove(&id.0);
            }
            Step::Yielded(next) => {
                if let Some(slot) = self.tasks.get_mut(&id.0) {
                    slot.task = Some(next);
                    self.slice_yielded = true;
                }
            }
        }
        self.current_priority = self.slice_priority;
        let now = self.host.now();
        self.advance_timers(now);
    }

    /// Ends the slice. Returns whether ready work remains, in which case a
    /// new host callback has been requested; otherwise the host timer is
    /// armed for the earliest delayed task.
    pub fn end_slice(&mut self) -> bool {
        self.performing = false;
        self.needs_paint = false;
        self.current_priority = self.slice_priority;
        if self.peek_ready().is_some() {
            self.request_host_callback();
            true
        } else {
            if let Some(start) = self.first_timer_start() {
                self.arm_timeout(start);
            }
            false
        }
    }

    // -----------------------------------------------------------------------
    // Queues
    // -----------------------------------------------------------------------

    fn request_host_callback(&mut self) {
        self.host_callback_scheduled = true;
        self.host.request_callback();
    }

    fn arm_timeout(&mut self, at: HostTime) {
        if self.host_timeout_scheduled {
            self.host.cancel_timeout();
        }
        self.host_timeout_scheduled = true;
        self.host.request_timeout(at);
    }

    /// Moves timers whose start time has passed into the ready queue.
    fn advance_timers(&mut self, now: HostTime) {
        while let Some(&Reverse((start, seq))) = self.timers.peek() {
            match self.tasks.get_mut(&seq) {
                None => {
                    self.timers.pop();
                }
                Some(slot) if start <= now => {
                    self.timers.pop();
                    slot.delayed = false;
                    self.ready.push(Reverse((slot.expiration_time, seq)));
                }
                Some(_) => break,
            }
        }
    }

    fn peek_ready(&mut self) -> Option<u64> {
        while let Some(&Reverse((_, seq))) = self.ready.peek() {
            match self.tasks.get(&seq) {
                Some(slot) if !slot.delayed => return Some(seq),
                _ => {
                    self.ready.pop();
                }
            }
        }
        None
    }

    fn peek_timer(&mut self) -> Option<u64> {
        while let Some(&Reverse((_, seq))) = self.timers.peek() {
            if self.tasks.contains_key(&seq) {
                return Some(seq);
            }
            self.timers.pop();
        }
        None
    }

    fn first_timer_start(&mut self) -> Option<HostTime> {
        let seq = self.peek_timer()?;
        self.tasks.get(&seq).map(|slot| slot.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_loop::ManualLoop;
    use alloc::vec::Vec;

    fn scheduler(config: SchedulerConfig) -> (Scheduler<&'static str>, ManualLoop) {
        let lp = ManualLoop::new();
        let host: Rc<dyn HostLoop> = Rc::new(lp.clone());
        (Scheduler::new(config, host), lp)
    }

    fn drain(s: &mut Scheduler<&'static str>) -> Vec<&'static str> {
        let mut ran = Vec::new();
        s.perform_work_until_deadline(&mut |task: &'static str, _timeout: bool| {
            ran.push(task);
            Step::Done
        });
        ran
    }

    #[test]
    fn orders_by_expiration_then_insertion() {
        let (mut s, lp) = scheduler(SchedulerConfig::standard());
        s.schedule_task(Priority::Normal, "normal-a", None);
        s.schedule_task(Priority::Idle, "idle", None);
        s.schedule_task(Priority::UserBlocking, "blocking", None);
        s.schedule_task(Priority::Normal, "normal-b", None);
        s.schedule_task(Priority::Immediate, "immediate", None);
        assert!(lp.take_callback(), "first ready task requests a callback");
        assert_eq!(lp.callback_requests(), 1, "later tasks coalesce");

        assert_eq!(
            drain(&mut s),
            ["immediate", "blocking", "normal-a", "normal-b", "idle"]
        );
        assert!(s.is_empty());
    }

    #[test]
    fn old_low_priority_task_outranks_fresh_urgent_one() {
        let (mut s, lp) = scheduler(SchedulerConfig::standard());
        s.schedule_task(Priority::Normal, "old", None);
        lp.advance(Duration::from_millis(4_900));
        s.schedule_task(Priority::UserBlocking, "fresh", None);
        assert_eq!(drain(&mut s), ["old", "fresh"]);
    }

    #[test]
    fn cancelled_task_never_runs() {
        let (mut s, _lp) = scheduler(SchedulerConfig::standard());
        let a = s.schedule_task(Priority::Normal, "a", None);
        s.schedule_task(Priority::Normal, "b", None);
        s.cancel_task(a);
        assert!(!s.is_pending(a));
        assert_eq!(drain(&mut s), ["b"]);
    }

    #[test]
    fn delayed_task_waits_for_timer() {
        let (mut s, lp) = scheduler(SchedulerConfig::standard());
        s.schedule_task(Priority::Normal, "later", Some(Duration::from_millis(10)));
        assert!(!lp.has_callback());
        assert_eq!(lp.pending_timeout(), Some(HostTime::from_millis(10)));

        lp.advance(Duration::from_millis(10));
        assert!(lp.take_due_timeout());
        s.handle_timeout();
        assert!(lp.take_callback());
        assert_eq!(drain(&mut s), ["later"]);
    }

    #[test]
    fn immediate_tasks_report_timeout() {
        let (mut s, _lp) = scheduler(SchedulerConfig::standard());
        s.schedule_task(Priority::Immediate, "now", None);
        s.schedule_task(Priority::Normal, "soon", None);
        let mut seen = Vec::new();
        s.perform_work_until_deadline(&mut |task: &'static str, timeout: bool| {
            seen.push((task, timeout));
            Step::Done
        });
        assert_eq!(seen, [("now", true), ("soon", false)]);
    }

    #[test]
    fn continuation_keeps_place_and_ends_slice() {
        let (mut s, lp) = scheduler(SchedulerConfig::standard());
        s.schedule_task(Priority::Normal, "first", None);
        s.schedule_task(Priority::Normal, "second", None);
        lp.take_callback();

        let mut ran = Vec::new();
        let more = s.perform_work_until_deadline(&mut |task: &'static str, _t: bool| {
            ran.push(task);
            if task == "first" {
                Step::Yielded("first-cont")
            } else {
                Step::Done
            }
        });
        assert!(more);
        assert!(lp.take_callback());
        assert_eq!(ran, ["first"]);
        assert_eq!(drain(&mut s), ["first-cont", "second"]);
    }

    #[test]
    fn slice_yields_once_budget_is_spent() {
        let (mut s, lp) = scheduler(SchedulerConfig::standard());
        for _ in 0..20 {
            s.schedule_task(Priority::Normal, "t", None);
        }
        lp.set_auto_advance(Duration::from_millis(1));
        let ran = drain(&mut s);
        assert!(!ran.is_empty());
        assert!(ran.len() < 20, "slice should stop early, ran {}", ran.len());
        assert!(lp.has_callback(), "remaining work requests another slice");
    }

    #[test]
    fn standard_config_yields_after_frame_budget() {
        let (mut s, lp) = scheduler(SchedulerConfig::standard());
        s.begin_slice();
        lp.advance(Duration::from_millis(4));
        assert!(!s.should_yield());
        lp.advance(Duration::from_millis(2));
        assert!(s.should_yield());
        s.end_slice();
    }

    #[test]
    fn input_check_extends_slice_until_input() {
        let (mut s, lp) = scheduler(SchedulerConfig::input_aware());
        s.begin_slice();
        lp.advance(Duration::from_millis(6));
        assert!(!s.should_yield(), "no input pending");
        lp.set_input_pending(false, true);
        assert!(!s.should_yield(), "continuous input ignored early in the slice");
        lp.set_input_pending(true, false);
        assert!(s.should_yield());

        lp.set_input_pending(false, true);
        lp.advance(Duration::from_millis(60));
        assert!(s.should_yield(), "continuous input counts after 50ms");

        lp.set_input_pending(false, false);
        assert!(!s.should_yield());
        lp.advance(Duration::from_millis(300));
        assert!(s.should_yield(), "always yields past the ceiling");
        s.end_slice();
    }

    #[test]
    fn paint_request_forces_yield() {
        let (mut s, _lp) = scheduler(SchedulerConfig::standard());
        s.begin_slice();
        assert!(!s.should_yield());
        s.request_paint();
        assert!(s.should_yield());
        s.end_slice();
        s.begin_slice();
        assert!(!s.should_yield(), "paint request clears at slice end");
        s.end_slice();
    }

    #[test]
    fn run_with_priority_restores_previous() {
        let (mut s, _lp) = scheduler(SchedulerConfig::standard());
        let inner = s.run_with_priority(Priority::UserBlocking, |s| s.current_priority());
        assert_eq!(inner, Priority::UserBlocking);
        assert_eq!(s.current_priority(), Priority::Normal);

        let wrapped = s.run_with_priority(Priority::Low, |s| {
            s.wrap_callback(|s: &mut Scheduler<&'static str>| s.current_priority())
        });
        assert_eq!(wrapped.priority(), Priority::Low);
        assert_eq!(wrapped.call(&mut s), Priority::Low);
    }
}
