// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].
//!
//! Rich events ([`on_host_mutations`](TraceSink::on_host_mutations)) store
//! only the count.

use ravel_core::fiber::RootId;
use ravel_core::lane::Lanes;
use ravel_core::time::HostTime;
use ravel_core::trace::{
    CommitSummary, ErrorEvent, ErrorKind, HostMutation, PhaseBeginEvent, PhaseEndEvent,
    PhaseKind, PingEvent, RenderExitEvent, RenderOutcome, RenderYieldEvent, SuspendEvent,
    TaskKind, TaskRunEvent, TraceSink, UpdateScheduledEvent,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_TASK_RUN: u8 = 1;
const TAG_UPDATE_SCHEDULED: u8 = 2;
const TAG_PHASE_BEGIN: u8 = 3;
const TAG_PHASE_END: u8 = 4;
const TAG_RENDER_YIELD: u8 = 5;
const TAG_RENDER_EXIT: u8 = 6;
const TAG_SUSPEND: u8 = 7;
const TAG_PING: u8 = 8;
const TAG_ERROR: u8 = 9;
const TAG_COMMIT_SUMMARY: u8 = 10;
const TAG_HOST_MUTATIONS_COUNT: u8 = 11;

/// Root id written for tasks that do not belong to a root.
const NO_ROOT: u32 = u32::MAX;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_option_u64(&mut self, v: Option<u64>) {
        match v {
            Some(val) => {
                self.write_u8(1);
                self.write_u64(val);
            }
            None => {
                self.write_u8(0);
                self.write_u64(0);
            }
        }
    }

    fn write_head(&mut self, tag: u8, root: RootId, lanes: Lanes) {
        self.write_u8(tag);
        self.write_u32(root.index());
        self.write_u32(lanes.bits());
    }

    fn write_phase(&mut self, p: PhaseKind) {
        self.write_u8(match p {
            PhaseKind::Render => 0,
            PhaseKind::BeforeMutation => 1,
            PhaseKind::Mutation => 2,
            PhaseKind::Layout => 3,
            PhaseKind::Passive => 4,
        });
    }
}

fn task_code(t: TaskKind) -> u8 {
    match t {
        TaskKind::PerformWork => 0,
        TaskKind::FlushSync => 1,
        TaskKind::FlushPassive => 2,
        TaskKind::CommitSuspended => 3,
    }
}

fn outcome_code(o: RenderOutcome) -> u8 {
    match o {
        RenderOutcome::Completed => 0,
        RenderOutcome::Errored => 1,
        RenderOutcome::FatalErrored => 2,
        RenderOutcome::Suspended => 3,
        RenderOutcome::SuspendedWithDelay => 4,
        RenderOutcome::DidNotComplete => 5,
    }
}

fn error_code(k: ErrorKind) -> u8 {
    match k {
        ErrorKind::Recoverable => 0,
        ErrorKind::Caught => 1,
        ErrorKind::Uncaught => 2,
        ErrorKind::NestedUpdateLimit => 3,
    }
}

impl TraceSink for RecorderSink {
    fn on_task_run(&mut self, e: &TaskRunEvent) {
        self.write_u8(TAG_TASK_RUN);
        self.write_u8(task_code(e.task));
        self.write_u32(e.root.map_or(NO_ROOT, RootId::index));
        self.write_bool(e.did_timeout);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_update_scheduled(&mut self, e: &UpdateScheduledEvent) {
        self.write_head(TAG_UPDATE_SCHEDULED, e.root, e.lane);
        self.write_u64(e.event_time.ticks());
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.write_head(TAG_PHASE_BEGIN, e.root, e.lanes);
        self.write_phase(e.phase);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.write_head(TAG_PHASE_END, e.root, e.lanes);
        self.write_phase(e.phase);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_render_yield(&mut self, e: &RenderYieldEvent) {
        self.write_head(TAG_RENDER_YIELD, e.root, e.lanes);
        self.write_u32(e.units);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_render_exit(&mut self, e: &RenderExitEvent) {
        self.write_head(TAG_RENDER_EXIT, e.root, e.lanes);
        self.write_u8(outcome_code(e.outcome));
        self.write_u64(e.timestamp.ticks());
    }

    fn on_suspend(&mut self, e: &SuspendEvent) {
        self.write_head(TAG_SUSPEND, e.root, e.lanes);
        self.write_option_u64(e.commit_delay_ticks);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_ping(&mut self, e: &PingEvent) {
        self.write_head(TAG_PING, e.root, e.lanes);
        self.write_bool(e.restarted);
        self.write_u64(e.timestamp.ticks());
    }

    fn on_error(&mut self, e: &ErrorEvent) {
        self.write_u8(TAG_ERROR);
        self.write_u32(e.root.index());
        self.write_u8(error_code(e.kind));
        self.write_u64(e.timestamp.ticks());
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        self.write_head(TAG_COMMIT_SUMMARY, s.root, s.lanes);
        self.write_u64(s.commit_index);
        self.write_u32(s.remaining_lanes.bits());
        self.write_u64(s.timestamp.ticks());
        self.write_u64(s.render_ticks);
        self.write_u64(s.before_mutation_ticks);
        self.write_u64(s.mutation_ticks);
        self.write_u64(s.layout_ticks);
        self.write_u32(s.host_mutations);
        self.write_bool(s.has_passive_effects);
    }

    fn on_host_mutations(&mut self, commit_index: u64, mutations: &[HostMutation]) {
        self.write_u8(TAG_HOST_MUTATIONS_COUNT);
        self.write_u64(commit_index);
        #[expect(
            clippy::cast_possible_truncation,
            reason = "mutation count capped at u32::MAX for recording"
        )]
        self.write_u32(mutations.len().min(u32::MAX as usize) as u32);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`TaskRunEvent`].
    TaskRun(TaskRunEvent),
    /// An [`UpdateScheduledEvent`].
    UpdateScheduled(UpdateScheduledEvent),
    /// A [`PhaseBeginEvent`].
    PhaseBegin(PhaseBeginEvent),
    /// A [`PhaseEndEvent`].
    PhaseEnd(PhaseEndEvent),
    /// A [`RenderYieldEvent`].
    RenderYield(RenderYieldEvent),
    /// A [`RenderExitEvent`].
    RenderExit(RenderExitEvent),
    /// A [`SuspendEvent`].
    Suspend(SuspendEvent),
    /// A [`PingEvent`].
    Ping(PingEvent),
    /// An [`ErrorEvent`].
    Error(ErrorEvent),
    /// A [`CommitSummary`].
    CommitSummary(CommitSummary),
    /// Host mutation count for a commit.
    HostMutationsCount {
        /// Commit counter.
        commit_index: u64,
        /// Number of host mutations.
        count: u32,
    },
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Some(v)
    }

    fn read_u32(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let v = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().ok()?);
        self.pos += 4;
        Some(v)
    }

    fn read_u64(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let v = u64::from_le_bytes(self.data[self.pos..self.pos + 8].try_into().ok()?);
        self.pos += 8;
        Some(v)
    }

    fn read_bool(&mut self) -> Option<bool> {
        Some(self.read_u8()? != 0)
    }

    fn read_option_u64(&mut self) -> Option<Option<u64>> {
        let present = self.read_u8()?;
        let val = self.read_u64()?;
        Some(if present != 0 { Some(val) } else { None })
    }

    fn read_time(&mut self) -> Option<HostTime> {
        self.read_u64().map(HostTime)
    }

    fn read_head(&mut self) -> Option<(RootId, Lanes)> {
        let root = RootId::from_raw(self.read_u32()?);
        let lanes = Lanes::from_bits(self.read_u32()?);
        Some((root, lanes))
    }

    fn read_phase(&mut self) -> Option<PhaseKind> {
        Some(match self.read_u8()? {
            0 => PhaseKind::Render,
            1 => PhaseKind::BeforeMutation,
            2 => PhaseKind::Mutation,
            3 => PhaseKind::Layout,
            _ => PhaseKind::Passive,
        })
    }

    fn read_task(&mut self) -> Option<TaskKind> {
        Some(match self.read_u8()? {
            0 => TaskKind::PerformWork,
            1 => TaskKind::FlushSync,
            2 => TaskKind::FlushPassive,
            _ => TaskKind::CommitSuspended,
        })
    }

    fn read_outcome(&mut self) -> Option<RenderOutcome> {
        Some(match self.read_u8()? {
            0 => RenderOutcome::Completed,
            1 => RenderOutcome::Errored,
            2 => RenderOutcome::FatalErrored,
            3 => RenderOutcome::Suspended,
            4 => RenderOutcome::SuspendedWithDelay,
            _ => RenderOutcome::DidNotComplete,
        })
    }

    fn read_error_kind(&mut self) -> Option<ErrorKind> {
        Some(match self.read_u8()? {
            0 => ErrorKind::Recoverable,
            1 => ErrorKind::Caught,
            2 => ErrorKind::Uncaught,
            _ => ErrorKind::NestedUpdateLimit,
        })
    }

    fn decode_task_run(&mut self) -> Option<RecordedEvent> {
        let task = self.read_task()?;
        let root = self.read_u32()?;
        Some(RecordedEvent::TaskRun(TaskRunEvent {
            task,
            root: (root != NO_ROOT).then(|| RootId::from_raw(root)),
            did_timeout: self.read_bool()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_update_scheduled(&mut self) -> Option<RecordedEvent> {
        let (root, lane) = self.read_head()?;
        Some(RecordedEvent::UpdateScheduled(UpdateScheduledEvent {
            root,
            lane,
            event_time: self.read_time()?,
        }))
    }

    fn decode_phase_begin(&mut self) -> Option<RecordedEvent> {
        let (root, lanes) = self.read_head()?;
        Some(RecordedEvent::PhaseBegin(PhaseBeginEvent {
            root,
            lanes,
            phase: self.read_phase()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_phase_end(&mut self) -> Option<RecordedEvent> {
        let (root, lanes) = self.read_head()?;
        Some(RecordedEvent::PhaseEnd(PhaseEndEvent {
            root,
            lanes,
            phase: self.read_phase()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_render_yield(&mut self) -> Option<RecordedEvent> {
        let (root, lanes) = self.read_head()?;
        Some(RecordedEvent::RenderYield(RenderYieldEvent {
            root,
            lanes,
            units: self.read_u32()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_render_exit(&mut self) -> Option<RecordedEvent> {
        let (root, lanes) = self.read_head()?;
        Some(RecordedEvent::RenderExit(RenderExitEvent {
            root,
            lanes,
            outcome: self.read_outcome()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_suspend(&mut self) -> Option<RecordedEvent> {
        let (root, lanes) = self.read_head()?;
        Some(RecordedEvent::Suspend(SuspendEvent {
            root,
            lanes,
            commit_delay_ticks: self.read_option_u64()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_ping(&mut self) -> Option<RecordedEvent> {
        let (root, lanes) = self.read_head()?;
        Some(RecordedEvent::Ping(PingEvent {
            root,
            lanes,
            restarted: self.read_bool()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_error(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Error(ErrorEvent {
            root: RootId::from_raw(self.read_u32()?),
            kind: self.read_error_kind()?,
            timestamp: self.read_time()?,
        }))
    }

    fn decode_commit_summary(&mut self) -> Option<RecordedEvent> {
        let (root, lanes) = self.read_head()?;
        Some(RecordedEvent::CommitSummary(CommitSummary {
            root,
            lanes,
            commit_index: self.read_u64()?,
            remaining_lanes: Lanes::from_bits(self.read_u32()?),
            timestamp: self.read_time()?,
            render_ticks: self.read_u64()?,
            before_mutation_ticks: self.read_u64()?,
            mutation_ticks: self.read_u64()?,
            layout_ticks: self.read_u64()?,
            host_mutations: self.read_u32()?,
            has_passive_effects: self.read_bool()?,
        }))
    }

    fn decode_host_mutations_count(&mut self) -> Option<RecordedEvent> {
        let commit_index = self.read_u64()?;
        let count = self.read_u32()?;
        Some(RecordedEvent::HostMutationsCount {
            commit_index,
            count,
        })
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        match tag {
            TAG_TASK_RUN => self.decode_task_run(),
            TAG_UPDATE_SCHEDULED => self.decode_update_scheduled(),
            TAG_PHASE_BEGIN => self.decode_phase_begin(),
            TAG_PHASE_END => self.decode_phase_end(),
            TAG_RENDER_YIELD => self.decode_render_yield(),
            TAG_RENDER_EXIT => self.decode_render_exit(),
            TAG_SUSPEND => self.decode_suspend(),
            TAG_PING => self.decode_ping(),
            TAG_ERROR => self.decode_error(),
            TAG_COMMIT_SUMMARY => self.decode_commit_summary(),
            TAG_HOST_MUTATIONS_COUNT => self.decode_host_mutations_count(),
            _ => None, // unknown tag → stop iteration
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> RootId {
        RootId::from_raw(3)
    }

    fn sample_summary() -> CommitSummary {
        CommitSummary {
            commit_index: 12,
            root: root(),
            lanes: Lanes::DEFAULT,
            remaining_lanes: Lanes::IDLE,
            timestamp: HostTime(40_000),
            render_ticks: 1_200,
            before_mutation_ticks: 10,
            mutation_ticks: 300,
            layout_ticks: 45,
            host_mutations: 7,
            has_passive_effects: true,
        }
    }

    #[test]
    fn commit_summaries_keep_every_field() {
        let mut rec = RecorderSink::new();
        let orig = sample_summary();
        rec.on_commit_summary(&orig);

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RecordedEvent::CommitSummary(s) => {
                assert_eq!(s.commit_index, 12);
                assert_eq!(s.root, orig.root);
                assert_eq!(s.lanes, Lanes::DEFAULT);
                assert_eq!(s.remaining_lanes, Lanes::IDLE);
                assert_eq!(s.render_ticks, 1_200);
                assert_eq!(s.mutation_ticks, 300);
                assert_eq!(s.host_mutations, 7);
                assert!(s.has_passive_effects);
            }
            other => panic!("expected CommitSummary, got {other:?}"),
        }
    }

    #[test]
    fn rootless_tasks_decode_without_a_root() {
        let mut rec = RecorderSink::new();
        rec.on_task_run(&TaskRunEvent {
            task: TaskKind::FlushPassive,
            root: None,
            did_timeout: false,
            timestamp: HostTime(5),
        });
        rec.on_task_run(&TaskRunEvent {
            task: TaskKind::PerformWork,
            root: Some(root()),
            did_timeout: true,
            timestamp: HostTime(6),
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert!(matches!(
            events[0],
            RecordedEvent::TaskRun(TaskRunEvent {
                task: TaskKind::FlushPassive,
                root: None,
                ..
            })
        ));
        match &events[1] {
            RecordedEvent::TaskRun(e) => {
                assert_eq!(e.root, Some(root()));
                assert!(e.did_timeout);
            }
            other => panic!("expected TaskRun, got {other:?}"),
        }
    }

    #[test]
    fn a_suspended_render_records_in_order() {
        let mut rec = RecorderSink::new();
        rec.on_phase_begin(&PhaseBeginEvent {
            root: root(),
            lanes: Lanes::DEFAULT,
            phase: PhaseKind::Render,
            timestamp: HostTime(100),
        });
        rec.on_suspend(&SuspendEvent {
            root: root(),
            lanes: Lanes::DEFAULT,
            commit_delay_ticks: Some(480_000),
            timestamp: HostTime(150),
        });
        rec.on_render_exit(&RenderExitEvent {
            root: root(),
            lanes: Lanes::DEFAULT,
            outcome: RenderOutcome::SuspendedWithDelay,
            timestamp: HostTime(160),
        });
        rec.on_ping(&PingEvent {
            root: root(),
            lanes: Lanes::DEFAULT,
            restarted: false,
            timestamp: HostTime(900),
        });
        rec.on_error(&ErrorEvent {
            root: root(),
            kind: ErrorKind::Caught,
            timestamp: HostTime(950),
        });
        rec.on_host_mutations(4, &[]);

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 6);
        assert!(matches!(events[0], RecordedEvent::PhaseBegin(_)));
        match &events[1] {
            RecordedEvent::Suspend(e) => assert_eq!(e.commit_delay_ticks, Some(480_000)),
            other => panic!("expected Suspend, got {other:?}"),
        }
        match &events[2] {
            RecordedEvent::RenderExit(e) => {
                assert_eq!(e.outcome, RenderOutcome::SuspendedWithDelay);
                assert_eq!(e.timestamp, HostTime(160));
            }
            other => panic!("expected RenderExit, got {other:?}"),
        }
        assert!(matches!(events[3], RecordedEvent::Ping(PingEvent { restarted: false, .. })));
        assert!(matches!(
            events[4],
            RecordedEvent::Error(ErrorEvent {
                kind: ErrorKind::Caught,
                ..
            })
        ));
        assert!(matches!(
            events[5],
            RecordedEvent::HostMutationsCount {
                commit_index: 4,
                count: 0
            }
        ));
    }

    #[test]
    fn truncated_records_end_decoding() {
        let mut rec = RecorderSink::new();
        rec.on_commit_summary(&sample_summary());
        rec.on_commit_summary(&sample_summary());
        let bytes = rec.into_bytes();
        let events: Vec<_> = decode(&bytes[..bytes.len() - 3]).collect();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        let events: Vec<_> = decode(&[]).collect();
        assert!(events.is_empty());
    }
}
