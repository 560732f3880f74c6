// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! are converted to microseconds using a [`Timebase`].

use std::io::Write;

use ravel_core::lane::Lanes;
use ravel_core::time::{HostTime, Timebase};
use ravel_core::trace::{
    CommitSummary, ErrorEvent, HostMutation, PhaseBeginEvent, PhaseEndEvent, PingEvent,
    RenderExitEvent, RenderYieldEvent, SuspendEvent, TaskRunEvent, TraceSink,
    UpdateScheduledEvent,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
    timebase: Timebase,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink")
            .field("timebase", &self.timebase)
            .finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr(timebase: Timebase) -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
            timebase,
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W, timebase: Timebase) -> Self {
        Self { writer, timebase }
    }

    /// Consumes the sink and returns its destination.
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn ticks_to_us(&self, ticks: u64) -> f64 {
        self.timebase.ticks_to_nanos(ticks) as f64 / 1000.0
    }

    fn host_us(&self, t: HostTime) -> f64 {
        self.ticks_to_us(t.ticks())
    }
}

fn lanes(l: Lanes) -> String {
    format!("{}({:#x})", l.label(), l.bits())
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_task_run(&mut self, e: &TaskRunEvent) {
        let root = e.root.map_or_else(|| "-".to_owned(), |r| r.index().to_string());
        let _ = writeln!(
            self.writer,
            "[task] {:?} root={root} timeout={} at {:.1}µs",
            e.task,
            e.did_timeout,
            self.host_us(e.timestamp),
        );
    }

    fn on_update_scheduled(&mut self, e: &UpdateScheduledEvent) {
        let _ = writeln!(
            self.writer,
            "[update] root={} lane={} event={:.1}µs",
            e.root.index(),
            lanes(e.lane),
            self.host_us(e.event_time),
        );
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:begin] root={} {} lanes={} at {:.1}µs",
            e.root.index(),
            e.phase.name(),
            lanes(e.lanes),
            self.host_us(e.timestamp),
        );
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        let _ = writeln!(
            self.writer,
            "[phase:end] root={} {} at {:.1}µs",
            e.root.index(),
            e.phase.name(),
            self.host_us(e.timestamp),
        );
    }

    fn on_render_yield(&mut self, e: &RenderYieldEvent) {
        let _ = writeln!(
            self.writer,
            "[yield] root={} lanes={} after {} units at {:.1}µs",
            e.root.index(),
            lanes(e.lanes),
            e.units,
            self.host_us(e.timestamp),
        );
    }

    fn on_render_exit(&mut self, e: &RenderExitEvent) {
        let _ = writeln!(
            self.writer,
            "[exit] root={} lanes={} {:?}",
            e.root.index(),
            lanes(e.lanes),
            e.outcome,
        );
    }

    fn on_suspend(&mut self, e: &SuspendEvent) {
        let delay = e
            .commit_delay_ticks
            .map_or_else(|| "none".to_owned(), |t| format!("{:.1}µs", self.ticks_to_us(t)));
        let _ = writeln!(
            self.writer,
            "[suspend] root={} lanes={} commit-delay={delay}",
            e.root.index(),
            lanes(e.lanes),
        );
    }

    fn on_ping(&mut self, e: &PingEvent) {
        let _ = writeln!(
            self.writer,
            "[ping] root={} lanes={}{}",
            e.root.index(),
            lanes(e.lanes),
            if e.restarted { " RESTART" } else { "" },
        );
    }

    fn on_error(&mut self, e: &ErrorEvent) {
        let _ = writeln!(
            self.writer,
            "[error] root={} {:?} at {:.1}µs",
            e.root.index(),
            e.kind,
            self.host_us(e.timestamp),
        );
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        let _ = writeln!(
            self.writer,
            "[commit] #{} root={} lanes={} remaining={} render={:.1}µs \
             before-mutation={:.1}µs mutation={:.1}µs layout={:.1}µs mutations={}{}",
            s.commit_index,
            s.root.index(),
            lanes(s.lanes),
            lanes(s.remaining_lanes),
            self.ticks_to_us(s.render_ticks),
            self.ticks_to_us(s.before_mutation_ticks),
            self.ticks_to_us(s.mutation_ticks),
            self.ticks_to_us(s.layout_ticks),
            s.host_mutations,
            if s.has_passive_effects { " +passive" } else { "" },
        );
    }

    fn on_host_mutations(&mut self, commit_index: u64, mutations: &[HostMutation]) {
        let _ = writeln!(
            self.writer,
            "[mutations] #{commit_index} count={}",
            mutations.len(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ravel_core::fiber::RootId;
    use ravel_core::trace::{PhaseKind, RenderOutcome};

    #[test]
    fn phase_lines_name_the_root_and_phase() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new(), Timebase::MICROS);
        sink.on_phase_begin(&PhaseBeginEvent {
            root: RootId::from_raw(2),
            lanes: Lanes::SYNC,
            phase: PhaseKind::Layout,
            timestamp: HostTime(1_500),
        });
        let output = String::from_utf8(sink.into_writer()).unwrap();
        assert!(output.starts_with("[phase:begin] root=2 layout"), "got: {output}");
        assert!(output.contains("lanes=sync"), "got: {output}");
        assert!(output.contains("1500.0µs"), "got: {output}");
    }

    #[test]
    fn render_exits_print_their_outcome() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new(), Timebase::MICROS);
        sink.on_render_exit(&RenderExitEvent {
            root: RootId::from_raw(0),
            lanes: Lanes::DEFAULT,
            outcome: RenderOutcome::SuspendedWithDelay,
            timestamp: HostTime(0),
        });
        let output = String::from_utf8(sink.into_writer()).unwrap();
        assert!(output.contains("SuspendedWithDelay"), "got: {output}");
    }
}
