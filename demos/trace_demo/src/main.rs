// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scripted reconciliation session that exercises the tracing and
//! diagnostics pipeline.
//!
//! Mounts a keyed list next to a suspense boundary on the recording test
//! host, then reorders the list synchronously, re-sorts it in time slices,
//! and starts a transition that suspends until its data arrives. Events go
//! to both a [`PrettyPrintSink`] on stdout and a [`RecorderSink`], which is
//! exported as a Chrome trace at the end.
//!
//! Usage: `trace_demo [OUTPUT]` (default `trace.json`).

use std::cell::RefCell;
use std::fs::File;
use std::io::BufWriter;
use std::rc::Rc;

use ravel_core::element::{Component, Element, Props};
use ravel_core::engine::EngineConfig;
use ravel_core::hooks::Setter;
use ravel_core::time::{Duration, Timebase};
use ravel_core::trace::{
    CommitSummary, ErrorEvent, HostMutation, PhaseBeginEvent, PhaseEndEvent, PingEvent,
    RenderExitEvent, RenderYieldEvent, SuspendEvent, TaskRunEvent, TraceSink,
    UpdateScheduledEvent,
};
use ravel_core::wakeable::Resource;
use ravel_debug::pretty::PrettyPrintSink;
use ravel_debug::recorder::RecorderSink;
use ravel_test_host::Harness;

const ITEMS: u32 = 120;

/// Forwards every event to the pretty printer and the shared recorder.
#[derive(Debug)]
struct Tee {
    pretty: PrettyPrintSink,
    recorder: Rc<RefCell<RecorderSink>>,
}

impl TraceSink for Tee {
    fn on_task_run(&mut self, e: &TaskRunEvent) {
        self.pretty.on_task_run(e);
        self.recorder.on_task_run(e);
    }

    fn on_update_scheduled(&mut self, e: &UpdateScheduledEvent) {
        self.pretty.on_update_scheduled(e);
        self.recorder.on_update_scheduled(e);
    }

    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.pretty.on_phase_begin(e);
        self.recorder.on_phase_begin(e);
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.pretty.on_phase_end(e);
        self.recorder.on_phase_end(e);
    }

    fn on_render_yield(&mut self, e: &RenderYieldEvent) {
        self.pretty.on_render_yield(e);
        self.recorder.on_render_yield(e);
    }

    fn on_render_exit(&mut self, e: &RenderExitEvent) {
        self.pretty.on_render_exit(e);
        self.recorder.on_render_exit(e);
    }

    fn on_suspend(&mut self, e: &SuspendEvent) {
        self.pretty.on_suspend(e);
        self.recorder.on_suspend(e);
    }

    fn on_ping(&mut self, e: &PingEvent) {
        self.pretty.on_ping(e);
        self.recorder.on_ping(e);
    }

    fn on_error(&mut self, e: &ErrorEvent) {
        self.pretty.on_error(e);
        self.recorder.on_error(e);
    }

    fn on_commit_summary(&mut self, s: &CommitSummary) {
        self.pretty.on_commit_summary(s);
        self.recorder.on_commit_summary(s);
    }

    fn on_host_mutations(&mut self, commit_index: u64, mutations: &[HostMutation]) {
        self.pretty.on_host_mutations(commit_index, mutations);
        self.recorder.on_host_mutations(commit_index, mutations);
    }
}

type Controls = Rc<RefCell<Option<(Setter<Vec<u32>>, Setter<bool>)>>>;

fn app(controls: &Controls, profile: &Resource<Rc<str>>) -> Component {
    let profile = profile.clone();
    let profile_view = Component::new("Profile", move |_, _| {
        let name = profile.read()?;
        Ok(vec![Element::host("p", Props::new(), vec![Element::text(name)])])
    });
    let controls = controls.clone();
    Component::new("App", move |cx, _| {
        let (order, set_order) = cx.use_state(|| (0..ITEMS).collect::<Vec<u32>>());
        let (show_profile, set_show_profile) = cx.use_state(|| false);
        *controls.borrow_mut() = Some((set_order, set_show_profile));

        let items = order
            .iter()
            .map(|i| {
                Element::host("li", Props::new(), vec![Element::text(format!("item {i}"))])
                    .with_key(u64::from(*i))
            })
            .collect();
        let content = if show_profile {
            profile_view.element(Props::new())
        } else {
            Element::text("no profile selected")
        };
        Ok(vec![
            Element::host("ul", Props::new(), items),
            Element::suspense(vec![Element::text("loading profile")], vec![content]),
        ])
    })
}

fn main() {
    let timebase = Timebase::MICROS;
    let path = std::env::args().nth(1).unwrap_or_else(|| "trace.json".to_owned());

    // -- sinks -------------------------------------------------------------
    let recorder = Rc::new(RefCell::new(RecorderSink::new()));
    let pretty = PrettyPrintSink::new(Box::new(std::io::stdout()), timebase);

    // -- engine ------------------------------------------------------------
    let mut h = Harness::with_config(EngineConfig::time_sliced());
    h.host_loop().set_auto_advance(Duration::from_micros(40));
    h.engine_mut().set_trace_sink(Tee {
        pretty,
        recorder: recorder.clone(),
    });

    let controls = Controls::default();
    let profile: Resource<Rc<str>> = Resource::pending();
    let root = app(&controls, &profile);

    // 1. Mount synchronously.
    println!("== mount");
    h.render_sync(root.element(Props::new())).expect("mount failed");
    let (set_order, set_show_profile) = controls.borrow().clone().expect("app rendered");

    // 2. Move the last item to the front in one discrete event.
    println!("== keyed move");
    h.engine_mut()
        .flush_sync(|_| {
            set_order.update(|order| {
                let mut order = order.clone();
                order.rotate_right(1);
                order
            });
        })
        .expect("reorder failed");

    // 3. Reverse the list at default priority; the render yields between
    // slices.
    println!("== time-sliced reverse");
    set_order.update(|order| order.iter().rev().copied().collect());
    h.run_until_idle().expect("reverse failed");

    // 4. Show the profile in a transition. It suspends, and the committed
    // tree stays as it is until the data arrives.
    println!("== suspending transition");
    h.engine_mut().start_transition(|_| set_show_profile.set(true));
    h.run_until_idle().expect("transition failed");
    h.advance(Duration::from_millis(120)).expect("timers failed");
    profile.resolve("Ada Lovelace".into());
    h.run_until_idle().expect("retry failed");

    println!("== {} commits, {} host nodes", h.commits(), h.host().node_count());

    // -- export Chrome trace -----------------------------------------------
    h.engine_mut().clear_trace_sink();
    let file = File::create(&path).expect("failed to create trace file");
    let mut writer = BufWriter::new(file);
    ravel_debug::chrome::export(recorder.borrow().as_bytes(), timebase, &mut writer)
        .expect("failed to write Chrome trace");

    println!("Wrote {path}");
}
