// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing and diagnostics for the render and commit pipeline.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that
//! the engine calls at each stage: task runs, render passes (with their
//! yields and exit status), the commit phases, suspensions, pings and
//! errors. All method bodies default to no-ops, so implementing only the
//! events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing (zero overhead). When
//! **on**, each method performs a single `Option` branch before dispatching.
//!
//! [`CommitSummaryBuilder`] collects phase timestamps during a render and
//! commit and produces a [`CommitSummary`] at the end.
//!
//! # Crate features
//!
//! - `trace`: enables the `Tracer` method bodies (one branch per call).
//! - `trace-rich` (implies `trace`): gates per-commit [`HostMutation`]
//!   records plus the corresponding `TraceSink` method.

use alloc::rc::Rc;
use core::cell::RefCell;

use crate::fiber::RootId;
use crate::lane::Lanes;
use crate::time::HostTime;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which phase of the pipeline is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Building the work-in-progress tree.
    Render,
    /// Snapshot reads before any host mutation.
    BeforeMutation,
    /// Host mutations, deletions and layout-effect cleanups.
    Mutation,
    /// Layout effects, ref attachment and measurement.
    Layout,
    /// Deferred passive effects.
    Passive,
}

impl PhaseKind {
    /// Every phase, in pipeline order.
    pub const ALL: [Self; 5] = [
        Self::Render,
        Self::BeforeMutation,
        Self::Mutation,
        Self::Layout,
        Self::Passive,
    ];

    /// Short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::BeforeMutation => "before-mutation",
            Self::Mutation => "mutation",
            Self::Layout => "layout",
            Self::Passive => "passive",
        }
    }
}

/// Which kind of scheduler task ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// A concurrent render pass on one root.
    PerformWork,
    /// Draining the synchronous work queue.
    FlushSync,
    /// Flushing pending passive effects.
    FlushPassive,
    /// Committing a render that was held back by suspense throttling.
    CommitSuspended,
}

/// How a render pass ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderOutcome {
    /// The tree is complete and ready to commit.
    Completed,
    /// A render error was thrown and not captured.
    Errored,
    /// The root itself failed.
    FatalErrored,
    /// A boundary showed its fallback.
    Suspended,
    /// The render suspended in a way that should wait rather than show a
    /// fallback.
    SuspendedWithDelay,
    /// The render was abandoned before completing.
    DidNotComplete,
}

/// Which error path an [`ErrorEvent`] reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Recovered by a synchronous retry.
    Recoverable,
    /// Captured by an error boundary.
    Caught,
    /// Reached the root with no boundary.
    Uncaught,
    /// Too many nested updates.
    NestedUpdateLimit,
}

/// Which host operation a [`HostMutation`] records.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostMutationKind {
    /// `create_instance` or `create_text_instance`.
    Create,
    /// `commit_update`.
    Update,
    /// `commit_text_update`.
    TextUpdate,
    /// `reset_text_content`.
    ResetText,
    /// `append_child` or `insert_before`.
    Place,
    /// `remove_child`.
    Remove,
    /// `hide_instance` or `hide_text_instance`.
    Hide,
    /// `unhide_instance` or `unhide_text_instance`.
    Unhide,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted when the engine runs a scheduler task.
#[derive(Clone, Copy, Debug)]
pub struct TaskRunEvent {
    /// Which task.
    pub task: TaskKind,
    /// Root the task works on, if any.
    pub root: Option<RootId>,
    /// Whether the task's expiration time had passed.
    pub did_timeout: bool,
    /// Host time when the task started.
    pub timestamp: HostTime,
}

/// Emitted when an update is scheduled on a root.
#[derive(Clone, Copy, Debug)]
pub struct UpdateScheduledEvent {
    /// Root that received the update.
    pub root: RootId,
    /// Lane of the update.
    pub lane: Lanes,
    /// Event time recorded for the update.
    pub event_time: HostTime,
}

/// Marks the beginning of a pipeline phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseBeginEvent {
    /// Root being worked on.
    pub root: RootId,
    /// Lanes being rendered or committed.
    pub lanes: Lanes,
    /// Which phase is starting.
    pub phase: PhaseKind,
    /// Host time at the start of the phase.
    pub timestamp: HostTime,
}

/// Marks the end of a pipeline phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseEndEvent {
    /// Root being worked on.
    pub root: RootId,
    /// Lanes being rendered or committed.
    pub lanes: Lanes,
    /// Which phase is ending.
    pub phase: PhaseKind,
    /// Host time at the end of the phase.
    pub timestamp: HostTime,
}

/// Emitted when a concurrent render pass yields to the host.
#[derive(Clone, Copy, Debug)]
pub struct RenderYieldEvent {
    /// Root being rendered.
    pub root: RootId,
    /// Lanes being rendered.
    pub lanes: Lanes,
    /// Units of work performed in this slice.
    pub units: u32,
    /// Host time of the yield.
    pub timestamp: HostTime,
}

/// Emitted when a render pass exits.
#[derive(Clone, Copy, Debug)]
pub struct RenderExitEvent {
    /// Root that was rendered.
    pub root: RootId,
    /// Lanes that were rendered.
    pub lanes: Lanes,
    /// How the pass ended.
    pub outcome: RenderOutcome,
    /// Host time of the exit.
    pub timestamp: HostTime,
}

/// Emitted when a render at `lanes` suspends on a root.
#[derive(Clone, Copy, Debug)]
pub struct SuspendEvent {
    /// Root that suspended.
    pub root: RootId,
    /// Lanes marked suspended.
    pub lanes: Lanes,
    /// Delay before a held-back commit, if the commit was deferred.
    pub commit_delay_ticks: Option<u64>,
    /// Host time of the suspension.
    pub timestamp: HostTime,
}

/// Emitted when a resource the root was waiting on resolves.
#[derive(Clone, Copy, Debug)]
pub struct PingEvent {
    /// Root that was pinged.
    pub root: RootId,
    /// Lanes that were pinged.
    pub lanes: Lanes,
    /// Whether the in-progress render was restarted.
    pub restarted: bool,
    /// Host time of the ping.
    pub timestamp: HostTime,
}

/// Emitted for each error the engine handles.
#[derive(Clone, Copy, Debug)]
pub struct ErrorEvent {
    /// Root where the error surfaced.
    pub root: RootId,
    /// Which error path was taken.
    pub kind: ErrorKind,
    /// Host time of the error.
    pub timestamp: HostTime,
}

/// Per-commit timing summary produced by [`CommitSummaryBuilder`].
#[derive(Clone, Copy, Debug)]
pub struct CommitSummary {
    /// Monotonic commit counter.
    pub commit_index: u64,
    /// Root that committed.
    pub root: RootId,
    /// Lanes that were committed.
    pub lanes: Lanes,
    /// Lanes still pending after the commit.
    pub remaining_lanes: Lanes,
    /// Host time at the start of the commit.
    pub timestamp: HostTime,
    /// Render phase duration in ticks (0 if not measured).
    pub render_ticks: u64,
    /// Before-mutation phase duration in ticks.
    pub before_mutation_ticks: u64,
    /// Mutation phase duration in ticks.
    pub mutation_ticks: u64,
    /// Layout phase duration in ticks.
    pub layout_ticks: u64,
    /// Number of host mutations issued during the commit.
    pub host_mutations: u32,
    /// Whether the commit left passive effects pending.
    pub has_passive_effects: bool,
}

/// A per-commit host mutation record.
#[cfg(feature = "trace-rich")]
#[derive(Clone, Copy, Debug)]
pub struct HostMutation {
    /// Index of the fiber whose instance was touched.
    pub fiber_index: u32,
    /// Which operation.
    pub kind: HostMutationKind,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the engine.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called before a scheduler task runs.
    fn on_task_run(&mut self, e: &TaskRunEvent) {
        _ = e;
    }

    /// Called when an update is scheduled on a root.
    fn on_update_scheduled(&mut self, e: &UpdateScheduledEvent) {
        _ = e;
    }

    /// Called at the beginning of a pipeline phase.
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        _ = e;
    }

    /// Called at the end of a pipeline phase.
    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        _ = e;
    }

    /// Called when a concurrent render yields.
    fn on_render_yield(&mut self, e: &RenderYieldEvent) {
        _ = e;
    }

    /// Called when a render pass exits.
    fn on_render_exit(&mut self, e: &RenderExitEvent) {
        _ = e;
    }

    /// Called when a render suspends.
    fn on_suspend(&mut self, e: &SuspendEvent) {
        _ = e;
    }

    /// Called when a suspended root is pinged.
    fn on_ping(&mut self, e: &PingEvent) {
        _ = e;
    }

    /// Called when the engine handles an error.
    fn on_error(&mut self, e: &ErrorEvent) {
        _ = e;
    }

    /// Called with a per-commit summary.
    fn on_commit_summary(&mut self, s: &CommitSummary) {
        _ = s;
    }

    /// Called with per-commit host mutations (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    fn on_host_mutations(&mut self, commit_index: u64, mutations: &[HostMutation]) {
        _ = (commit_index, mutations);
    }
}

/// Shared sinks: lets a caller keep a handle to a sink owned by the engine.
impl<S: TraceSink + ?Sized> TraceSink for Rc<RefCell<S>> {
    fn on_task_run(&mut self, e: &TaskRunEvent) {
        self.borrow_mut().on_task_run(e);
    }

    fn on_update_scheduled(&mut self, e: &UpdateScheduledEvent) {
        self.borrow_mut().on_update_scheduled(e);
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.borrow_mut().on_phase_begin(e);
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.borrow_mut().on_phase_end(e);
    }

    fn on_render_yield(&mut self, e: &RenderYieldEvent) {
        self.borrow_mut().on_render_yield(e);
    }

    fn on_render_exit(&mut self, e: &RenderExitEvent) {
        self.borrow_mut().on_render_exit(e);
    }

    fn on_suspend(&mut self, e: &SuspendEvent) {
        self.borrow_mut().on_suspend(e);
    }

    fn on_ping(&mut self, e: &PingEvent) {
        self.borrow_mut().on_ping(e);
    }

    fn on_error(&mut self, e: &ErrorEvent) {
        self.borrow_mut().on_error(e);
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        self.borrow_mut().on_commit_summary(s);
    }

    #[cfg(feature = "trace-rich")]
    fn on_host_mutations(&mut self, commit_index: u64, mutations: &[HostMutation]) {
        self.borrow_mut().on_host_mutations(commit_index, mutations);
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

/// Generates a `Tracer` method that forwards one event to the sink.
macro_rules! forward {
    ($(#[$meta:meta])* $name:ident => $hook:ident($ty:ty)) => {
        $(#[$meta])*
        #[inline]
        pub fn $name(&mut self, e: &$ty) {
            #[cfg(feature = "trace")]
            if let Some(s) = &mut self.sink {
                s.$hook(e);
            }
            #[cfg(not(feature = "trace"))]
            {
                _ = e;
            }
        }
    };
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Returns whether events reach a sink.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        #[cfg(feature = "trace")]
        {
            self.sink.is_some()
        }
        #[cfg(not(feature = "trace"))]
        {
            false
        }
    }

    forward!(
        /// Emits a [`TaskRunEvent`].
        task_run => on_task_run(TaskRunEvent)
    );
    forward!(
        /// Emits an [`UpdateScheduledEvent`].
        update_scheduled => on_update_scheduled(UpdateScheduledEvent)
    );
    forward!(
        /// Emits a [`PhaseBeginEvent`].
        phase_begin => on_phase_begin(PhaseBeginEvent)
    );
    forward!(
        /// Emits a [`PhaseEndEvent`].
        phase_end => on_phase_end(PhaseEndEvent)
    );
    forward!(
        /// Emits a [`RenderYieldEvent`].
        render_yield => on_render_yield(RenderYieldEvent)
    );
    forward!(
        /// Emits a [`RenderExitEvent`].
        render_exit => on_render_exit(RenderExitEvent)
    );
    forward!(
        /// Emits a [`SuspendEvent`].
        suspend => on_suspend(SuspendEvent)
    );
    forward!(
        /// Emits a [`PingEvent`].
        ping => on_ping(PingEvent)
    );
    forward!(
        /// Emits an [`ErrorEvent`].
        error => on_error(ErrorEvent)
    );
    forward!(
        /// Emits a [`CommitSummary`].
        commit_summary => on_commit_summary(CommitSummary)
    );

    /// Emits host mutations (requires `trace-rich` feature).
    #[cfg(feature = "trace-rich")]
    #[inline]
    pub fn host_mutations(&mut self, commit_index: u64, mutations: &[HostMutation]) {
        if let Some(s) = &mut self.sink {
            s.on_host_mutations(commit_index, mutations);
        }
    }
}

// ---------------------------------------------------------------------------
// CommitSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps for one render and commit and produces a
/// [`CommitSummary`].
#[derive(Debug)]
pub struct CommitSummaryBuilder {
    commit_index: u64,
    root: RootId,
    lanes: Lanes,
    timestamp: HostTime,
    phase_starts: [Option<HostTime>; 5],
    phase_ends: [Option<HostTime>; 5],
    host_mutations: u32,
}

impl CommitSummaryBuilder {
    /// Starts building a summary for a commit of `lanes` on `root`.
    #[must_use]
    pub fn new(commit_index: u64, root: RootId, lanes: Lanes, timestamp: HostTime) -> Self {
        Self {
            commit_index,
            root,
            lanes,
            timestamp,
            phase_starts: [None; 5],
            phase_ends: [None; 5],
            host_mutations: 0,
        }
    }

    /// Records the start of a phase.
    pub fn phase_begin(&mut self, phase: PhaseKind, t: HostTime) {
        self.phase_starts[phase_index(phase)] = Some(t);
    }

    /// Records the end of a phase.
    pub fn phase_end(&mut self, phase: PhaseKind, t: HostTime) {
        self.phase_ends[phase_index(phase)] = Some(t);
    }

    /// Records the render phase duration measured elsewhere.
    pub fn set_render_span(&mut self, start: HostTime, end: HostTime) {
        self.phase_begin(PhaseKind::Render, start);
        self.phase_end(PhaseKind::Render, end);
    }

    /// Sets the number of host mutations issued.
    pub fn set_host_mutations(&mut self, count: u32) {
        self.host_mutations = count;
    }

    /// Consumes the builder and produces the final [`CommitSummary`].
    #[must_use]
    pub fn finish(self, remaining_lanes: Lanes, has_passive_effects: bool) -> CommitSummary {
        CommitSummary {
            commit_index: self.commit_index,
            root: self.root,
            lanes: self.lanes,
            remaining_lanes,
            timestamp: self.timestamp,
            render_ticks: self.phase_duration(PhaseKind::Render),
            before_mutation_ticks: self.phase_duration(PhaseKind::BeforeMutation),
            mutation_ticks: self.phase_duration(PhaseKind::Mutation),
            layout_ticks: self.phase_duration(PhaseKind::Layout),
            host_mutations: self.host_mutations,
            has_passive_effects,
        }
    }

    fn phase_duration(&self, phase: PhaseKind) -> u64 {
        let idx = phase_index(phase);
        match (self.phase_starts[idx], self.phase_ends[idx]) {
            (Some(start), Some(end)) => end.saturating_duration_since(start).ticks(),
            _ => 0,
        }
    }
}

/// Maps a [`PhaseKind`] to an array index.
const fn phase_index(phase: PhaseKind) -> usize {
    match phase {
        PhaseKind::Render => 0,
        PhaseKind::BeforeMutation => 1,
        PhaseKind::Mutation => 2,
        PhaseKind::Layout => 3,
        PhaseKind::Passive => 4,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> RootId {
        RootId::from_raw(0)
    }

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_task_run(&TaskRunEvent {
            task: TaskKind::FlushSync,
            root: None,
            did_timeout: false,
            timestamp: HostTime(0),
        });
        sink.on_render_exit(&RenderExitEvent {
            root: root(),
            lanes: Lanes::SYNC,
            outcome: RenderOutcome::Completed,
            timestamp: HostTime(0),
        });
    }

    #[test]
    fn tracer_none_does_nothing() {
        let mut tracer = Tracer::none();
        assert!(!tracer.is_active());
        tracer.ping(&PingEvent {
            root: root(),
            lanes: Lanes::RETRY_1,
            restarted: false,
            timestamp: HostTime(5),
        });
    }

    #[test]
    fn summary_builder_computes_durations() {
        let mut builder = CommitSummaryBuilder::new(3, root(), Lanes::DEFAULT, HostTime(1_000));
        builder.set_render_span(HostTime(100), HostTime(900));
        builder.phase_begin(PhaseKind::BeforeMutation, HostTime(1_000));
        builder.phase_end(PhaseKind::BeforeMutation, HostTime(1_010));
        builder.phase_begin(PhaseKind::Mutation, HostTime(1_010));
        builder.phase_end(PhaseKind::Mutation, HostTime(1_200));
        builder.phase_begin(PhaseKind::Layout, HostTime(1_200));
        builder.phase_end(PhaseKind::Layout, HostTime(1_250));
        builder.set_host_mutations(4);

        let summary = builder.finish(Lanes::IDLE, true);
        assert_eq!(summary.commit_index, 3);
        assert_eq!(summary.render_ticks, 800);
        assert_eq!(summary.before_mutation_ticks, 10);
        assert_eq!(summary.mutation_ticks, 190);
        assert_eq!(summary.layout_ticks, 50);
        assert_eq!(summary.host_mutations, 4);
        assert_eq!(summary.remaining_lanes, Lanes::IDLE);
        assert!(summary.has_passive_effects);
    }

    #[test]
    fn summary_builder_missing_phases_are_zero() {
        let builder = CommitSummaryBuilder::new(0, root(), Lanes::SYNC, HostTime(0));
        let summary = builder.finish(Lanes::NONE, false);
        assert_eq!(summary.render_ticks, 0);
        assert_eq!(summary.mutation_ticks, 0);
        assert_eq!(summary.layout_ticks, 0);
    }

    #[test]
    fn phase_names_are_distinct() {
        for (i, a) in PhaseKind::ALL.iter().enumerate() {
            assert_eq!(phase_index(*a), i);
            for b in &PhaseKind::ALL[i + 1..] {
                assert_ne!(a.name(), b.name());
            }
        }
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_to_shared_sink() {
        use alloc::vec::Vec;

        #[derive(Default)]
        struct RecordingSink {
            outcomes: Vec<RenderOutcome>,
        }
        impl TraceSink for RecordingSink {
            fn on_render_exit(&mut self, e: &RenderExitEvent) {
                self.outcomes.push(e.outcome);
            }
        }

        let shared = Rc::new(RefCell::new(RecordingSink::default()));
        let mut handle = shared.clone();
        let mut tracer = Tracer::new(&mut handle);
        tracer.render_exit(&RenderExitEvent {
            root: root(),
            lanes: Lanes::DEFAULT,
            outcome: RenderOutcome::Suspended,
            timestamp: HostTime(7),
        });
        drop(tracer);
        assert_eq!(shared.borrow().outcomes, [RenderOutcome::Suspended]);
    }
}
