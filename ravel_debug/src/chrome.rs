// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][format] JSON to the given writer.
//!
//! Each root gets its own track (`tid` is the root index); scheduler tasks
//! that belong to no root land on track `u32::MAX`.
//!
//! [format]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use ravel_core::lane::Lanes;
use ravel_core::time::Timebase;

use crate::recorder::{RecordedEvent, decode};

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
///
/// Phases become duration events; everything else is an instant. Timestamps
/// are converted to microseconds using the provided [`Timebase`].
pub fn export(bytes: &[u8], timebase: Timebase, writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    let us = |ticks: u64| ticks_to_us(ticks, timebase);
    // Host mutation counts carry no timestamp; place them at their commit.
    let mut last_commit_ts = 0.0;

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::TaskRun(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": format!("{:?}", e.task),
                    "cat": "Scheduler",
                    "ts": us(e.timestamp.ticks()),
                    "pid": 0,
                    "tid": e.root.map_or(u32::MAX, |r| r.index()),
                    "s": "t",
                    "args": {
                        "did_timeout": e.did_timeout,
                    }
                }));
            }
            RecordedEvent::UpdateScheduled(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Update",
                    "cat": "Scheduler",
                    "ts": us(e.event_time.ticks()),
                    "pid": 0,
                    "tid": e.root.index(),
                    "s": "t",
                    "args": lanes_args(e.lane),
                }));
            }
            RecordedEvent::PhaseBegin(e) => {
                events.push(json!({
                    "ph": "B",
                    "name": e.phase.name(),
                    "cat": "Pipeline",
                    "ts": us(e.timestamp.ticks()),
                    "pid": 0,
                    "tid": e.root.index(),
                    "args": lanes_args(e.lanes),
                }));
            }
            RecordedEvent::PhaseEnd(e) => {
                events.push(json!({
                    "ph": "E",
                    "name": e.phase.name(),
                    "cat": "Pipeline",
                    "ts": us(e.timestamp.ticks()),
                    "pid": 0,
                    "tid": e.root.index(),
                }));
            }
            RecordedEvent::RenderYield(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Yield",
                    "cat": "Render",
                    "ts": us(e.timestamp.ticks()),
                    "pid": 0,
                    "tid": e.root.index(),
                    "s": "t",
                    "args": {
                        "units": e.units,
                        "lanes": e.lanes.label(),
                    }
                }));
            }
            RecordedEvent::RenderExit(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": format!("{:?}", e.outcome),
                    "cat": "Render",
                    "ts": us(e.timestamp.ticks()),
                    "pid": 0,
                    "tid": e.root.index(),
                    "s": "t",
                    "args": lanes_args(e.lanes),
                }));
            }
            RecordedEvent::Suspend(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Suspend",
                    "cat": "Suspense",
                    "ts": us(e.timestamp.ticks()),
                    "pid": 0,
                    "tid": e.root.index(),
                    "s": "t",
                    "args": {
                        "lanes": e.lanes.label(),
                        "commit_delay_us": e.commit_delay_ticks.map(us),
                    }
                }));
            }
            RecordedEvent::Ping(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Ping",
                    "cat": "Suspense",
                    "ts": us(e.timestamp.ticks()),
                    "pid": 0,
                    "tid": e.root.index(),
                    "s": "t",
                    "args": {
                        "lanes": e.lanes.label(),
                        "restarted": e.restarted,
                    }
                }));
            }
            RecordedEvent::Error(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": format!("{:?}", e.kind),
                    "cat": "Error",
                    "ts": us(e.timestamp.ticks()),
                    "pid": 0,
                    "tid": e.root.index(),
                    "s": "p",
                }));
            }
            RecordedEvent::CommitSummary(s) => {
                last_commit_ts = us(s.timestamp.ticks());
                events.push(json!({
                    "ph": "i",
                    "name": "Commit",
                    "cat": "Summary",
                    "ts": last_commit_ts,
                    "pid": 0,
                    "tid": s.root.index(),
                    "s": "t",
                    "args": {
                        "commit_index": s.commit_index,
                        "lanes": s.lanes.label(),
                        "remaining": s.remaining_lanes.label(),
                        "render_us": us(s.render_ticks),
                        "before_mutation_us": us(s.before_mutation_ticks),
                        "mutation_us": us(s.mutation_ticks),
                        "layout_us": us(s.layout_ticks),
                        "host_mutations": s.host_mutations,
                        "passive": s.has_passive_effects,
                    }
                }));
            }
            RecordedEvent::HostMutationsCount {
                commit_index,
                count,
            } => {
                events.push(json!({
                    "ph": "C",
                    "name": "HostMutations",
                    "cat": "Rich",
                    "ts": last_commit_ts,
                    "pid": 0,
                    "args": {
                        "count": count,
                        "commit_index": commit_index,
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn lanes_args(lanes: Lanes) -> Value {
    json!({
        "lanes": lanes.label(),
        "bits": lanes.bits(),
    })
}

fn ticks_to_us(ticks: u64, timebase: Timebase) -> f64 {
    timebase.ticks_to_nanos(ticks) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use ravel_core::fiber::RootId;
    use ravel_core::time::HostTime;
    use ravel_core::trace::{
        PhaseBeginEvent, PhaseEndEvent, PhaseKind, TaskKind, TaskRunEvent, TraceSink,
    };

    #[test]
    fn export_produces_valid_json() {
        let root = RootId::from_raw(1);
        let mut rec = RecorderSink::new();
        rec.on_task_run(&TaskRunEvent {
            task: TaskKind::PerformWork,
            root: Some(root),
            did_timeout: false,
            timestamp: HostTime(1_000),
        });
        rec.on_phase_begin(&PhaseBeginEvent {
            root,
            lanes: Lanes::DEFAULT,
            phase: PhaseKind::Render,
            timestamp: HostTime(1_000),
        });
        rec.on_phase_end(&PhaseEndEvent {
            root,
            lanes: Lanes::DEFAULT,
            phase: PhaseKind::Render,
            timestamp: HostTime(1_250),
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), Timebase::MICROS, &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();

        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.len(), 3);

        assert_eq!(parsed[0]["ph"], "i");
        assert_eq!(parsed[0]["name"], "PerformWork");
        assert_eq!(parsed[0]["tid"], 1);

        assert_eq!(parsed[1]["ph"], "B");
        assert_eq!(parsed[1]["name"], "render");
        assert_eq!(parsed[1]["args"]["lanes"], "default");

        assert_eq!(parsed[2]["ph"], "E");
        assert_eq!(parsed[2]["ts"], 1250.0);
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], Timebase::MICROS, &mut out).unwrap();
        let json_str = String::from_utf8(out).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&json_str).unwrap();
        assert!(parsed.is_empty());
    }
}
