// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Root coordination: which lanes render next, in which task, and what
//! happens to a render once it exits.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;

use super::work_loop::ExitStatus;
use super::{Engine, Job, RootOptions, record_mut};
use crate::error::{CapturedError, EngineError};
use crate::fiber::{ExecutionContext, FiberId, FiberTag, Flags, RootId};
use crate::hooks::queue::StateQueue;
use crate::host::HostConfig;
use crate::lane::{EventPriority, Lanes, RootLanes};
use crate::scheduler::{Priority, Step, TaskId};
use crate::shared::InboxEntry;
use crate::time::{Duration, HostTime};
use crate::trace::{ErrorEvent, ErrorKind, PingEvent, SuspendEvent, UpdateScheduledEvent};

/// Bookkeeping for one root.
pub(super) struct RootRecord<H: HostConfig> {
    pub(super) container: H::Instance,
    /// The committed tree.
    pub(super) current: FiberId,
    pub(super) lanes: RootLanes,
    /// Task that will render this root, if one is scheduled.
    pub(super) callback: Option<TaskId>,
    /// Most urgent lane `callback` was scheduled for.
    pub(super) callback_priority: Lanes,
    /// A finished tree waiting to commit.
    pub(super) finished: Option<Finished>,
    /// Delayed task that commits `finished`.
    pub(super) timeout_task: Option<TaskId>,
    /// Lanes each wakeable already has a ping listener for.
    pub(super) ping_cache: HashMap<usize, Lanes>,
    pub(super) options: RootOptions,
    /// Queue of the root's element state.
    pub(super) element_queue: Rc<StateQueue>,
}

impl<H: HostConfig> RootRecord<H> {
    pub(super) fn new(
        container: H::Instance,
        current: FiberId,
        element_queue: Rc<StateQueue>,
        options: RootOptions,
    ) -> Self {
        Self {
            container,
            current,
            lanes: RootLanes::default(),
            callback: None,
            callback_priority: Lanes::NONE,
            finished: None,
            timeout_task: None,
            ping_cache: HashMap::new(),
            options,
            element_queue,
        }
    }
}

impl<H: HostConfig> fmt::Debug for RootRecord<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootRecord")
            .field("current", &self.current)
            .field("lanes", &self.lanes)
            .field("callback", &self.callback)
            .field("callback_priority", &self.callback_priority)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// A completed render waiting to be committed.
#[derive(Debug)]
pub(super) struct Finished {
    pub(super) fiber: FiberId,
    pub(super) lanes: Lanes,
    pub(super) recoverable: Vec<CapturedError>,
    pub(super) uncaught: Option<CapturedError>,
    pub(super) render_start: HostTime,
    pub(super) render_end: HostTime,
}

/// A committed tree whose passive effects have not run.
#[derive(Clone, Copy, Debug)]
pub(super) struct PendingPassive {
    pub(super) root: RootId,
    pub(super) finished: FiberId,
    pub(super) lanes: Lanes,
}

/// The smallest delay a user notices, for an update already `elapsed_ms`
/// old.
fn just_noticeable_difference(elapsed_ms: u64) -> u64 {
    match elapsed_ms {
        0..120 => 120,
        120..480 => 480,
        480..1080 => 1080,
        1080..1920 => 1920,
        1920..3000 => 3000,
        3000..4320 => 4320,
        _ => elapsed_ms.div_ceil(1960) * 1960,
    }
}

impl<H: HostConfig> Engine<H> {
    /// Turns everything posted from outside the engine into scheduled work.
    pub(super) fn drain_inbox(&mut self) {
        while self.shared.has_inbox() {
            for entry in self.shared.take_inbox() {
                match entry {
                    InboxEntry::Update {
                        fiber,
                        lane,
                        event_time,
                    } => self.schedule_update_on_fiber(fiber, lane, event_time),
                    InboxEntry::Ping {
                        root,
                        wakeable,
                        lanes,
                    } => self.ping_suspended_root(root, wakeable, lanes),
                    InboxEntry::Retry { boundary, wakeable } => {
                        self.retry_timed_out_boundary(boundary, wakeable);
                    }
                }
            }
        }
    }

    /// Records an update of `fiber` on `lane` and makes sure its root has a
    /// task. Updates to unmounted fibers are dropped.
    ///
    /// Past the nested-update limit the update is dropped as well, and
    /// [`EngineError::MaximumUpdateDepthExceeded`] is queued for the entry
    /// point that is running to return.
    pub fn schedule_update_on_fiber(&mut self, fiber: FiberId, lane: Lanes, event_time: HostTime) {
        if self.nested_update_count > self.config.nested_update_limit
            || self.nested_passive_count > self.config.nested_passive_update_limit
        {
            let runaway = self
                .root_with_nested_updates
                .or(self.root_with_passive_nested);
            self.nested_update_count = 0;
            self.root_with_nested_updates = None;
            self.nested_passive_count = 0;
            self.root_with_passive_nested = None;
            if let Some(root) = runaway {
                self.errors
                    .push(EngineError::MaximumUpdateDepthExceeded { root });
                self.trace(|t, timestamp| {
                    t.error(&ErrorEvent {
                        root,
                        kind: ErrorKind::NestedUpdateLimit,
                        timestamp,
                    });
                });
            }
            return;
        }

        let Some(root) = self.mark_update_lane_from_fiber_to_root(fiber, lane) else {
            return;
        };
        let Some(record) = record_mut(&mut self.roots, root) else {
            return;
        };
        record.lanes.mark_updated(lane, event_time);

        if self.session.root == Some(root)
            && !self.shared.execution().contains(ExecutionContext::RENDER)
        {
            self.session.interleaved_lanes = self.session.interleaved_lanes.merge(lane);
            if self.session.exit == ExitStatus::SuspendedWithDelay {
                let render_lanes = self.session.render_lanes;
                self.mark_root_suspended(root, render_lanes);
            }
        }
        self.ensure_root_is_scheduled(root);
        self.trace(|t, _| {
            t.update_scheduled(&UpdateScheduledEvent {
                root,
                lane,
                event_time,
            });
        });
    }

    /// Adds `lane` to the fiber and `child_lanes` to its ancestors, on both
    /// buffers. Returns the root the fiber is mounted in.
    pub(super) fn mark_update_lane_from_fiber_to_root(&mut self, fiber: FiberId, lane: Lanes) -> Option<RootId> {
        let f = self.fibers.get_mut(fiber)?;
        f.lanes = f.lanes.merge(lane);
        if let Some(alt) = self.fibers.alternate(fiber) {
            let a = &mut self.fibers[alt];
            a.lanes = a.lanes.merge(lane);
        }
        let mut node = fiber;
        while let Some(parent) = self.fibers[node].parent {
            let p = self.fibers.get_mut(parent)?;
            p.child_lanes = p.child_lanes.merge(lane);
            if let Some(alt) = self.fibers.alternate(parent) {
                let a = &mut self.fibers[alt];
                a.child_lanes = a.child_lanes.merge(lane);
            }
            node = parent;
        }
        let top = &self.fibers[node];
        match (&top.tag, &top.state) {
            (FiberTag::HostRoot, crate::fiber::FiberState::Root(state)) => Some(state.root),
            _ => None,
        }
    }

    /// Entangles a transition update on the root queue with the transition
    /// lanes still pending there, so they commit together.
    pub(super) fn entangle_transitions(&mut self, root: RootId, queue: &StateQueue, lane: Lanes) {
        if !lane.includes_only_transitions() || lane.is_empty() {
            return;
        }
        let Some(record) = record_mut(&mut self.roots, root) else {
            return;
        };
        let lanes = queue
            .entangled_lanes()
            .intersect(record.lanes.pending())
            .merge(lane);
        queue.set_entangled_lanes(lanes);
        record.lanes.mark_entangled(lanes);
    }

    /// Makes the root's scheduled task match its most urgent pending lanes.
    pub(super) fn ensure_root_is_scheduled(&mut self, root: RootId) {
        let now = self.shared.now();
        let wip_lanes = if self.session.root == Some(root) {
            self.session.render_lanes
        } else {
            Lanes::NONE
        };
        let Some(record) = record_mut(&mut self.roots, root) else {
            return;
        };
        record.lanes.mark_starved_as_expired(now);
        let next = record.lanes.next_lanes(wip_lanes);
        if next.is_empty() {
            if let Some(task) = record.callback.take() {
                self.scheduler.cancel_task(task);
            }
            record.callback_priority = Lanes::NONE;
            return;
        }

        let priority = next.highest_priority();
        if priority == record.callback_priority {
            return;
        }
        if let Some(task) = record.callback.take() {
            self.scheduler.cancel_task(task);
        }
        if priority == Lanes::SYNC {
            self.sync_queue.push(root);
            if self.sync_task.is_none() {
                self.sync_task = Some(
                    self.scheduler
                        .schedule_task(Priority::Immediate, Job::FlushSyncQueue, None),
                );
            }
        } else {
            let task_priority = EventPriority::from_lanes(next).scheduler_priority();
            record.callback = Some(self.scheduler.schedule_task(
                task_priority,
                Job::PerformConcurrentWork(root),
                None,
            ));
        }
        record.callback_priority = priority;
    }

    /// Renders and commits every root queued with synchronous work.
    pub(super) fn flush_sync_queue(&mut self) {
        if self.flushing_sync || self.shared.execution().is_working() {
            return;
        }
        self.flushing_sync = true;
        let mut i = 0;
        while i < self.sync_queue.len() {
            let root = self.sync_queue[i];
            i += 1;
            if let Some(record) = record_mut(&mut self.roots, root) {
                record.callback_priority = Lanes::NONE;
            }
            self.perform_sync_work_on_root(root);
            self.drain_inbox();
        }
        self.sync_queue.clear();
        self.flushing_sync = false;
        if let Some(task) = self.sync_task.take() {
            self.scheduler.cancel_task(task);
        }
    }

    /// Body of a [`Job::PerformConcurrentWork`] task.
    pub(super) fn perform_concurrent_work_on_root(
        &mut self,
        task: TaskId,
        root: RootId,
        did_timeout: bool,
    ) -> Step<Job> {
        self.shared.end_event();
        if self.flush_passive_effects()
            && self.record(root).and_then(|r| r.callback) != Some(task)
        {
            return Step::Done;
        }

        let wip_lanes = if self.session.root == Some(root) {
            self.session.render_lanes
        } else {
            Lanes::NONE
        };
        let Some(record) = self.record(root) else {
            return Step::Done;
        };
        let lanes = record.lanes.next_lanes(wip_lanes);
        if lanes.is_empty() {
            return Step::Done;
        }
        let blocking = if self.config.time_slice_default_updates {
            lanes.includes_some(Lanes::SYNC.merge(Lanes::INPUT_CONTINUOUS))
        } else {
            lanes.includes_blocking()
        };
        let time_slice = !blocking && !record.lanes.includes_expired(lanes) && !did_timeout;

        let exit = if time_slice {
            self.render_root_concurrent(root, lanes)
        } else {
            self.render_root_sync(root, lanes)
        };
        if exit != ExitStatus::InProgress {
            self.finish_render(root, lanes, exit, time_slice);
        }

        self.ensure_root_is_scheduled(root);
        if self.record(root).and_then(|r| r.callback) == Some(task) {
            Step::Yielded(Job::PerformConcurrentWork(root))
        } else {
            Step::Done
        }
    }

    /// Handles a render pass that ran to an exit.
    fn finish_render(&mut self, root: RootId, lanes: Lanes, exit: ExitStatus, time_sliced: bool) {
        let Some((mut exit, mut lanes)) = self.settle_render(root, lanes, exit) else {
            return;
        };
        if exit == ExitStatus::DidNotComplete {
            self.mark_root_suspended(root, lanes);
            return;
        }
        if time_sliced && !self.is_render_consistent_with_external_stores() {
            let retried = self.render_root_sync(root, lanes);
            let Some(settled) = self.settle_render(root, lanes, retried) else {
                return;
            };
            (exit, lanes) = settled;
            if exit == ExitStatus::DidNotComplete {
                self.mark_root_suspended(root, lanes);
                return;
            }
        }
        self.store_finished(root, lanes);
        self.finish_concurrent_render(root, exit, lanes);
    }

    /// Retries an errored render once, and crashes the root on a fatal
    /// error. Returns `None` when the root crashed.
    fn settle_render(&mut self, root: RootId, mut lanes: Lanes, mut exit: ExitStatus) -> Option<(ExitStatus, Lanes)> {
        if exit == ExitStatus::Errored {
            let retry = self
                .record(root)
                .map_or(Lanes::NONE, |r| r.lanes.lanes_to_retry_on_error());
            if !retry.is_empty() {
                lanes = retry;
                exit = self.recover_from_concurrent_error(root, retry);
            }
        }
        if exit == ExitStatus::FatalErrored {
            let fatal = self.session.fatal.take();
            self.abandon_session();
            self.mark_root_suspended(root, lanes);
            if let Some(error) = fatal {
                self.errors.push(EngineError::Uncaught(error));
                self.trace(|t, timestamp| {
                    t.error(&ErrorEvent {
                        root,
                        kind: ErrorKind::Uncaught,
                        timestamp,
                    });
                });
            }
            return None;
        }
        Some((exit, lanes))
    }

    /// Re-renders synchronously after a render errored. Errors from the
    /// first attempt become recoverable if the retry gets past them.
    fn recover_from_concurrent_error(&mut self, root: RootId, lanes: Lanes) -> ExitStatus {
        let first_attempt = core::mem::take(&mut self.session.concurrent_errors);
        let exit = self.render_root_sync(root, lanes);
        if exit != ExitStatus::Errored {
            let second = core::mem::take(&mut self.session.recoverable);
            self.session.recoverable = first_attempt;
            self.session.recoverable.extend(second);
        }
        exit
    }

    /// Whether every store read by the finished tree still has the version
    /// that was rendered.
    fn is_render_consistent_with_external_stores(&self) -> bool {
        let Some(top) = self.session.wip_root else {
            return true;
        };
        let mut stack = alloc::vec![top];
        while let Some(id) = stack.pop() {
            let f = &self.fibers[id];
            if f.flags.contains(Flags::STORE_CONSISTENCY)
                && !f.store_checks.iter().all(|c| c.is_consistent())
            {
                return false;
            }
            if f.subtree_flags.contains(Flags::STORE_CONSISTENCY) {
                stack.extend(self.fibers.children(id));
            }
        }
        true
    }

    fn store_finished(&mut self, root: RootId, lanes: Lanes) {
        let Some(fiber) = self.session.wip_root else {
            return;
        };
        let finished = Finished {
            fiber,
            lanes,
            recoverable: core::mem::take(&mut self.session.recoverable),
            uncaught: self.session.uncaught.take(),
            render_start: self.session.render_start,
            render_end: self.session.render_end,
        };
        if let Some(record) = record_mut(&mut self.roots, root) {
            record.finished = Some(finished);
        }
    }

    /// Commits a finished concurrent render, or holds it back while the
    /// tree is suspended.
    fn finish_concurrent_render(&mut self, root: RootId, exit: ExitStatus, lanes: Lanes) {
        match exit {
            ExitStatus::Completed | ExitStatus::Errored => self.commit_root(root),
            ExitStatus::Suspended => {
                self.mark_root_suspended(root, lanes);
                if lanes.includes_only_retries() {
                    let now = self.shared.now();
                    let wait = self
                        .last_fallback_time
                        .saturating_add(self.config.fallback_throttle)
                        .saturating_duration_since(now);
                    if wait > self.config.commit_delay_threshold {
                        let Some(record) = record_mut(&mut self.roots, root) else {
                            return;
                        };
                        if !record.lanes.next_lanes(Lanes::NONE).is_empty() {
                            return;
                        }
                        let suspended = record.lanes.suspended();
                        if !lanes.is_subset_of(suspended) {
                            record.lanes.mark_pinged(suspended);
                            return;
                        }
                        self.schedule_commit_suspended(root, lanes, wait);
                        return;
                    }
                }
                self.trace_suspend(root, lanes, None);
                self.commit_root(root);
            }
            ExitStatus::SuspendedWithDelay => {
                self.mark_root_suspended(root, lanes);
                if lanes.includes_only_transitions() {
                    self.trace_suspend(root, lanes, None);
                    return;
                }
                let now = self.shared.now();
                let most_recent = self
                    .record(root)
                    .map_or(now, |r| r.lanes.most_recent_event_time(lanes));
                let elapsed = now.saturating_duration_since(most_recent).as_millis();
                let wait = Duration::from_millis(just_noticeable_difference(elapsed).saturating_sub(elapsed));
                if wait > self.config.commit_delay_threshold {
                    self.schedule_commit_suspended(root, lanes, wait);
                    return;
                }
                self.trace_suspend(root, lanes, None);
                self.commit_root(root);
            }
            ExitStatus::InProgress | ExitStatus::FatalErrored | ExitStatus::DidNotComplete => {}
        }
    }

    fn schedule_commit_suspended(&mut self, root: RootId, lanes: Lanes, wait: Duration) {
        let task = self
            .scheduler
            .schedule_task(Priority::Normal, Job::CommitSuspended(root), Some(wait));
        if let Some(record) = record_mut(&mut self.roots, root) {
            record.timeout_task = Some(task);
        }
        self.trace_suspend(root, lanes, Some(wait.ticks()));
    }

    fn trace_suspend(&mut self, root: RootId, lanes: Lanes, commit_delay_ticks: Option<u64>) {
        self.trace(|t, timestamp| {
            t.suspend(&SuspendEvent {
                root,
                lanes,
                commit_delay_ticks,
                timestamp,
            });
        });
    }

    /// Body of a [`Job::CommitSuspended`] task.
    pub(super) fn commit_suspended(&mut self, root: RootId) {
        let Some(record) = record_mut(&mut self.roots, root) else {
            return;
        };
        record.timeout_task = None;
        if record.finished.is_some() {
            self.commit_root(root);
        }
        self.ensure_root_is_scheduled(root);
    }

    /// Marks `lanes` suspended, except lanes that were pinged or updated
    /// while the render ran.
    pub(super) fn mark_root_suspended(&mut self, root: RootId, lanes: Lanes) {
        let lanes = lanes
            .remove(self.session.pinged_lanes)
            .remove(self.session.interleaved_lanes);
        if let Some(record) = record_mut(&mut self.roots, root) {
            record.lanes.mark_suspended(lanes);
        }
    }

    /// Renders and commits a root's synchronous lanes without yielding.
    pub(super) fn perform_sync_work_on_root(&mut self, root: RootId) {
        self.flush_passive_effects();
        let Some(record) = self.record(root) else {
            return;
        };
        let lanes = record.lanes.next_lanes(Lanes::NONE);
        if !lanes.includes_sync() {
            self.ensure_root_is_scheduled(root);
            return;
        }
        let exit = self.render_root_sync(root, lanes);
        if let Some((exit, lanes)) = self.settle_render(root, lanes, exit) {
            if exit == ExitStatus::DidNotComplete {
                self.mark_root_suspended(root, lanes);
            } else {
                self.store_finished(root, lanes);
                self.commit_root(root);
            }
        }
        self.ensure_root_is_scheduled(root);
    }

    /// A wakeable a render suspended on settled.
    fn ping_suspended_root(&mut self, root: RootId, wakeable: usize, lanes: Lanes) {
        let Some(record) = record_mut(&mut self.roots, root) else {
            return;
        };
        record.ping_cache.remove(&wakeable);
        record.lanes.mark_pinged(lanes);

        let mut restarted = false;
        if self.session.root == Some(root) && lanes.is_subset_of(self.session.render_lanes) {
            let now = self.shared.now();
            let within_throttle =
                now.saturating_duration_since(self.last_fallback_time) < self.config.fallback_throttle;
            let restart = match self.session.exit {
                ExitStatus::SuspendedWithDelay => true,
                ExitStatus::Suspended => self.session.render_lanes.includes_only_retries() && within_throttle,
                _ => false,
            };
            if restart {
                self.abandon_session();
                restarted = true;
            } else {
                self.session.pinged_lanes = self.session.pinged_lanes.merge(lanes);
            }
        }
        self.ensure_root_is_scheduled(root);
        self.trace(|t, timestamp| {
            t.ping(&PingEvent {
                root,
                lanes,
                restarted,
                timestamp,
            });
        });
    }

    /// A wakeable a committed boundary shows a fallback for settled.
    fn retry_timed_out_boundary(&mut self, boundary: FiberId, wakeable: usize) {
        if let Some(state) = self
            .fibers
            .get_mut(boundary)
            .and_then(|f| f.state.suspense_mut())
        {
            state.retry_cache.borrow_mut().remove(&wakeable);
        }
        let lane = self.shared.claim_retry_lane();
        let event_time = self.shared.request_event_time();
        let Some(root) = self.mark_update_lane_from_fiber_to_root(boundary, lane) else {
            return;
        };
        if let Some(record) = record_mut(&mut self.roots, root) {
            record.lanes.mark_updated(lane, event_time);
        }
        self.ensure_root_is_scheduled(root);
    }

    /// Releases fibers no root or pending effect can reach.
    pub(super) fn maybe_collect_garbage(&mut self) {
        if self.session.root.is_some() || self.pending_passive.is_some() {
            return;
        }
        let mut live: Vec<FiberId> = Vec::new();
        for record in self.roots.iter().flatten() {
            live.push(record.current);
            if let Some(finished) = &record.finished {
                live.push(finished.fiber);
            }
        }
        self.fibers.collect_garbage(&live);
    }
}

#[cfg(test)]
mod tests {
    use super::just_noticeable_difference;

    #[test]
    fn noticeable_delay_rounds_up_to_the_next_step() {
        assert_eq!(just_noticeable_difference(0), 120);
        assert_eq!(just_noticeable_difference(130), 480);
        assert_eq!(just_noticeable_difference(2000), 3000);
        assert_eq!(just_noticeable_difference(4320), 5880, "ceil(4320 / 1960) * 1960");
    }
}
