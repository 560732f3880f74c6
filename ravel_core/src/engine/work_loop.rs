// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The render work loop.
//!
//! A render pass walks the work-in-progress tree depth first. Each unit of
//! work is one fiber: `begin_work` renders it and returns its first child,
//! and once a fiber has no more children to begin, `complete_work` runs on
//! it and then on each ancestor whose children are all done, moving to the
//! next sibling whenever there is one. A time-sliced pass checks the
//! scheduler before every unit and can stop anywhere; the session keeps its
//! place until the same root and lanes are rendered again.

use alloc::vec::Vec;

use super::{Engine, record_mut};
use crate::error::CapturedError;
use crate::fiber::{ExecutionContext, FiberId, FiberInput, Flags, RootId};
use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::time::HostTime;
use crate::trace::{PhaseBeginEvent, PhaseEndEvent, PhaseKind, RenderExitEvent, RenderOutcome, RenderYieldEvent};

/// How a render pass ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum ExitStatus {
    /// The pass has not finished.
    #[default]
    InProgress,
    /// An error escaped every boundary, including the root.
    FatalErrored,
    /// A boundary captured an error.
    Errored,
    /// A boundary is showing a fallback for new content.
    Suspended,
    /// Visible content would be replaced by a fallback; wait instead.
    SuspendedWithDelay,
    /// The tree is ready to commit.
    Completed,
    /// The pass unwound past the root.
    DidNotComplete,
}

impl ExitStatus {
    fn outcome(self) -> Option<RenderOutcome> {
        Some(match self {
            Self::InProgress => return None,
            Self::FatalErrored => RenderOutcome::FatalErrored,
            Self::Errored => RenderOutcome::Errored,
            Self::Suspended => RenderOutcome::Suspended,
            Self::SuspendedWithDelay => RenderOutcome::SuspendedWithDelay,
            Self::Completed => RenderOutcome::Completed,
            Self::DidNotComplete => RenderOutcome::DidNotComplete,
        })
    }
}

/// State of the render pass in progress, or of the last one to exit.
#[derive(Debug, Default)]
pub(crate) struct WorkSession {
    /// Root being rendered. Cleared when the pass exits.
    pub(crate) root: Option<RootId>,
    pub(crate) render_lanes: Lanes,
    /// Render lanes of the subtree being worked on. Revealed suspense
    /// content widens them for its descendants.
    pub(crate) subtree_lanes: Lanes,
    pub(crate) subtree_stack: Vec<Lanes>,
    pub(crate) wip_root: Option<FiberId>,
    /// Next unit of work.
    pub(crate) cursor: Option<FiberId>,
    pub(crate) exit: ExitStatus,
    pub(crate) fatal: Option<CapturedError>,
    /// Lanes left behind by components that rendered.
    pub(crate) skipped_lanes: Lanes,
    /// Lanes updated from outside the pass while it was in progress.
    pub(crate) interleaved_lanes: Lanes,
    /// Render lanes whose wakeables settled while the pass was in progress.
    pub(crate) pinged_lanes: Lanes,
    /// Errors boundaries captured in this pass.
    pub(crate) concurrent_errors: Vec<CapturedError>,
    /// Errors to report as recovered once the tree commits.
    pub(crate) recoverable: Vec<CapturedError>,
    /// An error captured by the root itself.
    pub(crate) uncaught: Option<CapturedError>,
    pub(crate) render_start: HostTime,
    pub(crate) render_end: HostTime,
}

impl<H: HostConfig> Engine<H> {
    /// Discards the pass in progress. The next render of any root starts
    /// from its committed tree.
    pub(super) fn abandon_session(&mut self) {
        self.session = WorkSession::default();
        self.shared.set_session_active(false);
        self.shared.set_render_lanes(Lanes::NONE);
        self.shared.promote_interleaved();
    }

    fn prepare_fresh_stack(&mut self, root: RootId, lanes: Lanes) {
        let now = if self.sink.is_some() {
            self.shared.now()
        } else {
            HostTime::ZERO
        };
        let Some(record) = record_mut(&mut self.roots, root) else {
            return;
        };
        record.finished = None;
        if let Some(task) = record.timeout_task.take() {
            self.scheduler.cancel_task(task);
        }
        let current = record.current;
        let wip = self
            .fibers
            .create_work_in_progress(current, FiberInput::None);
        self.fibers[wip].parent = None;

        self.session = WorkSession {
            root: Some(root),
            render_lanes: lanes,
            subtree_lanes: lanes,
            wip_root: Some(wip),
            cursor: Some(wip),
            render_start: now,
            ..WorkSession::default()
        };
        self.shared.promote_interleaved();
        self.shared.set_render_lanes(lanes);
        self.shared.set_session_active(true);
        self.trace(|t, timestamp| {
            t.phase_begin(&PhaseBeginEvent {
                root,
                lanes,
                phase: PhaseKind::Render,
                timestamp,
            });
        });
    }

    /// Renders `lanes` of `root` to an exit without yielding.
    pub(super) fn render_root_sync(&mut self, root: RootId, lanes: Lanes) -> ExitStatus {
        let previous = self.shared.execution();
        self.shared
            .set_execution(previous | ExecutionContext::RENDER);
        if self.session.root != Some(root) || self.session.render_lanes != lanes {
            self.prepare_fresh_stack(root, lanes);
        }
        while let Some(unit) = self.session.cursor {
            self.perform_unit_of_work(unit);
        }
        self.shared.set_execution(previous);
        self.finish_render_pass()
    }

    /// Renders `lanes` of `root` until the scheduler asks to yield.
    /// Returns [`ExitStatus::InProgress`] if the pass yielded.
    pub(super) fn render_root_concurrent(&mut self, root: RootId, lanes: Lanes) -> ExitStatus {
        let previous = self.shared.execution();
        self.shared
            .set_execution(previous | ExecutionContext::RENDER);
        if self.session.root != Some(root) || self.session.render_lanes != lanes {
            self.prepare_fresh_stack(root, lanes);
        }
        let mut units = 0_u32;
        while let Some(unit) = self.session.cursor {
            if self.scheduler.should_yield() {
                break;
            }
            self.perform_unit_of_work(unit);
            units += 1;
        }
        self.shared.set_execution(previous);
        if self.session.cursor.is_some() {
            self.trace(|t, timestamp| {
                t.render_yield(&RenderYieldEvent {
                    root,
                    lanes,
                    units,
                    timestamp,
                });
            });
            return ExitStatus::InProgress;
        }
        self.finish_render_pass()
    }

    fn finish_render_pass(&mut self) -> ExitStatus {
        let exit = self.session.exit;
        let lanes = self.session.render_lanes;
        let root = self.session.root.take();
        if self.sink.is_some() {
            self.session.render_end = self.shared.now();
        }
        self.shared.set_session_active(false);
        self.shared.set_render_lanes(Lanes::NONE);
        self.shared.promote_interleaved();
        if let (Some(root), Some(outcome)) = (root, exit.outcome()) {
            self.trace(|t, timestamp| {
                t.phase_end(&PhaseEndEvent {
                    root,
                    lanes,
                    phase: PhaseKind::Render,
                    timestamp,
                });
                t.render_exit(&RenderExitEvent {
                    root,
                    lanes,
                    outcome,
                    timestamp,
                });
            });
        }
        exit
    }

    fn perform_unit_of_work(&mut self, unit: FiberId) {
        let current = self.fibers.alternate(unit);
        match self.begin_work(current, unit) {
            Ok(next) => {
                let f = &mut self.fibers[unit];
                f.memoized = f.pending.clone();
                match next {
                    Some(child) => self.session.cursor = Some(child),
                    None => self.complete_unit_of_work(unit),
                }
            }
            Err(signal) => {
                if self.throw_exception(unit, signal) {
                    self.complete_unit_of_work(unit);
                }
            }
        }
    }

    /// Completes `unit` and its ancestors until one has a sibling left to
    /// begin. Incomplete fibers unwind instead, up to the nearest fiber that
    /// captured; their siblings are not rendered.
    fn complete_unit_of_work(&mut self, unit: FiberId) {
        let mut completed = unit;
        loop {
            let current = self.fibers.alternate(completed);
            let parent = self.fibers[completed].parent;
            let incomplete = self.fibers[completed].flags.contains(Flags::INCOMPLETE);

            if incomplete {
                if let Some(next) = self.unwind_work(completed) {
                    self.fibers[next].flags &= Flags::HOST_EFFECT_MASK | Flags::DID_CAPTURE;
                    self.session.cursor = Some(next);
                    return;
                }
                let Some(p) = parent else {
                    self.session.exit = ExitStatus::DidNotComplete;
                    self.session.cursor = None;
                    return;
                };
                let pf = &mut self.fibers[p];
                pf.flags |= Flags::INCOMPLETE;
                pf.subtree_flags = Flags::empty();
                pf.deletions.clear();
            } else {
                self.complete_work(current, completed);
                if let Some(sibling) = self.fibers[completed].sibling {
                    self.session.cursor = Some(sibling);
                    return;
                }
            }

            match parent {
                Some(p) => completed = p,
                None => {
                    if self.session.exit == ExitStatus::InProgress {
                        self.session.exit = ExitStatus::Completed;
                    }
                    self.session.cursor = None;
                    return;
                }
            }
        }
    }

    // -- Subtree lanes --

    pub(super) fn push_subtree_lanes(&mut self, lanes: Lanes) {
        let previous = core::mem::replace(&mut self.session.subtree_lanes, lanes);
        self.session.subtree_stack.push(previous);
    }

    pub(super) fn pop_subtree_lanes(&mut self) {
        if let Some(previous) = self.session.subtree_stack.pop() {
            self.session.subtree_lanes = previous;
        }
    }

    // -- Exit status --

    /// A boundary mounted showing its fallback.
    pub(super) fn render_did_suspend(&mut self) {
        if self.session.exit == ExitStatus::InProgress {
            self.session.exit = ExitStatus::Suspended;
        }
    }

    /// Content that is already visible would be replaced by a fallback.
    pub(super) fn render_did_suspend_delay_if_possible(&mut self) {
        if matches!(
            self.session.exit,
            ExitStatus::InProgress | ExitStatus::Suspended | ExitStatus::Errored
        ) {
            self.session.exit = ExitStatus::SuspendedWithDelay;
        }
        let pending_elsewhere = self
            .session
            .skipped_lanes
            .merge(self.session.interleaved_lanes)
            .includes_some(Lanes::NON_IDLE);
        if pending_elsewhere && let Some(root) = self.session.root {
            let lanes = self.session.render_lanes;
            self.mark_root_suspended(root, lanes);
        }
    }

    /// A boundary captured an error.
    pub(super) fn render_did_error(&mut self, error: CapturedError) {
        if self.session.exit != ExitStatus::SuspendedWithDelay {
            self.session.exit = ExitStatus::Errored;
        }
        self.session.concurrent_errors.push(error);
    }
}
