// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The reconciliation engine.
//!
//! [`Engine`] owns the fiber store, the task scheduler and every root
//! created on it. The host drives it from two callbacks:
//!
//! - [`Engine::run_host_callback`] when the [`HostLoop`] fires the callback
//!   it was asked for. The engine runs scheduler tasks until the slice
//!   budget is spent.
//! - [`Engine::run_host_timeout`] when the host timer fires. Delayed tasks
//!   become ready and a callback is requested for them.
//!
//! Updates enter through [`Engine::render`], through setters handed out to
//! components, and through wakeables settling. Each gets a lane. The root
//! coordinator then schedules a task that renders the most urgent lanes,
//! and commits the result in one pass when it finishes.

mod begin;
mod commit;
mod complete;
mod passive;
mod reconcile;
mod root;
mod unwind;
mod work_loop;

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use crate::element::Element;
use crate::error::{CapturedError, EngineError};
use crate::fiber::{ExecutionContext, Fiber, FiberId, FiberInput, FiberState, FiberStore, FiberTag, RootId, RootState};
use crate::hooks::queue::{Action, StateHook, StateQueue, Update};
use crate::host::HostConfig;
use crate::host_loop::HostLoop;
use crate::lane::{EventPriority, Lanes};
use crate::scheduler::{Next, Scheduler, SchedulerConfig, TaskId};
use crate::shared::Shared;
use crate::time::{Duration, HostTime};
use crate::trace::{TaskKind, TaskRunEvent, TraceSink, Tracer};

#[cfg(feature = "trace-rich")]
use crate::trace::HostMutation;

use self::root::{PendingPassive, RootRecord};
use self::work_loop::WorkSession;

/// Tunables for an [`Engine`].
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Slice budget and input probing of the task scheduler.
    pub scheduler: SchedulerConfig,
    /// Consecutive synchronous re-renders of one root scheduled from its
    /// own commits before the engine gives up.
    pub nested_update_limit: u32,
    /// The same limit for updates scheduled from passive effects.
    pub nested_passive_update_limit: u32,
    /// Times a component may re-run because it updated itself while
    /// rendering.
    pub render_phase_update_limit: u32,
    /// Minimum time between two fallbacks being revealed by retries.
    pub fallback_throttle: Duration,
    /// Suspended commits closer than this are not held back.
    pub commit_delay_threshold: Duration,
    /// Render [`Lanes::DEFAULT`] in time slices instead of blocking.
    pub time_slice_default_updates: bool,
    /// Unmount and re-run the effects of newly mounted components once
    /// after their first passive flush.
    pub strict_effects: bool,
}

impl EngineConfig {
    /// Default updates render without yielding.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            scheduler: SchedulerConfig::standard(),
            nested_update_limit: 50,
            nested_passive_update_limit: 50,
            render_phase_update_limit: 25,
            fallback_throttle: Duration::from_millis(500),
            commit_delay_threshold: Duration::from_millis(10),
            time_slice_default_updates: false,
            strict_effects: false,
        }
    }

    /// Default updates render in time slices, and the scheduler keeps
    /// working past its frame budget while no input is pending.
    #[must_use]
    pub const fn time_sliced() -> Self {
        Self {
            scheduler: SchedulerConfig::input_aware(),
            time_slice_default_updates: true,
            ..Self::standard()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Observer for errors surfacing on a root.
pub type ErrorCallback = Rc<dyn Fn(&CapturedError)>;

/// Per-root options.
#[derive(Clone, Default)]
pub struct RootOptions {
    on_recoverable_error: Option<ErrorCallback>,
    on_caught_error: Option<ErrorCallback>,
}

impl RootOptions {
    /// Options with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for errors a time-sliced render threw that a synchronous
    /// retry rendered past.
    #[must_use]
    pub fn on_recoverable_error(mut self, f: impl Fn(&CapturedError) + 'static) -> Self {
        self.on_recoverable_error = Some(Rc::new(f));
        self
    }

    /// Called for errors an error boundary caught, after the boundary's
    /// own observer.
    #[must_use]
    pub fn on_caught_error(mut self, f: impl Fn(&CapturedError) + 'static) -> Self {
        self.on_caught_error = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for RootOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootOptions")
            .field("on_recoverable_error", &self.on_recoverable_error.is_some())
            .field("on_caught_error", &self.on_caught_error.is_some())
            .finish()
    }
}

/// A scheduler task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Job {
    /// Render, and possibly commit, the next lanes of a root.
    PerformConcurrentWork(RootId),
    /// Render and commit every root with synchronous work.
    FlushSyncQueue,
    /// Run pending passive effects.
    FlushPassiveEffects,
    /// Commit a finished tree that was held back while suspended.
    CommitSuspended(RootId),
}

/// Reconciles element trees into a host tree.
pub struct Engine<H: HostConfig> {
    host: H,
    fibers: FiberStore<H>,
    shared: Rc<Shared>,
    scheduler: Scheduler<Job>,
    config: EngineConfig,
    roots: Vec<Option<RootRecord<H>>>,
    session: WorkSession,

    sync_queue: Vec<RootId>,
    sync_task: Option<TaskId>,
    flushing_sync: bool,

    pending_passive: Option<PendingPassive>,
    passive_task: Option<TaskId>,

    errors: Vec<EngineError>,
    sink: Option<Box<dyn TraceSink>>,

    nested_update_count: u32,
    root_with_nested_updates: Option<RootId>,
    nested_passive_count: u32,
    root_with_passive_nested: Option<RootId>,

    last_fallback_time: HostTime,
    commit_count: u64,
    commit_mutations: u32,
    #[cfg(feature = "trace-rich")]
    mutation_log: Vec<HostMutation>,
}

impl<H: HostConfig> fmt::Debug for Engine<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("fibers", &self.fibers.len())
            .field("roots", &self.roots.iter().flatten().count())
            .field("scheduler", &self.scheduler)
            .field("session", &self.session)
            .field("sync_queue", &self.sync_queue)
            .field("pending_passive", &self.pending_passive)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl<H: HostConfig> Engine<H> {
    /// Creates an engine that applies mutations through `host` and is
    /// driven by `host_loop`.
    pub fn new(host: H, host_loop: Rc<dyn HostLoop>, config: EngineConfig) -> Self {
        Self {
            host,
            fibers: FiberStore::new(),
            shared: Rc::new(Shared::new(host_loop.clone())),
            scheduler: Scheduler::new(config.scheduler, host_loop),
            config,
            roots: Vec::new(),
            session: WorkSession::default(),
            sync_queue: Vec::new(),
            sync_task: None,
            flushing_sync: false,
            pending_passive: None,
            passive_task: None,
            errors: Vec::new(),
            sink: None,
            nested_update_count: 0,
            root_with_nested_updates: None,
            nested_passive_count: 0,
            root_with_passive_nested: None,
            last_fallback_time: HostTime::ZERO,
            commit_count: 0,
            commit_mutations: 0,
            #[cfg(feature = "trace-rich")]
            mutation_log: Vec::new(),
        }
    }

    /// Routes trace events to `sink`.
    pub fn set_trace_sink(&mut self, sink: impl TraceSink + 'static) {
        self.sink = Some(Box::new(sink));
    }

    /// Stops emitting trace events.
    pub fn clear_trace_sink(&mut self) {
        self.sink = None;
    }

    /// The host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The host, mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// The configuration the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of fibers currently allocated.
    pub fn live_fibers(&self) -> usize {
        self.fibers.len()
    }

    /// Lanes with pending work on `root`.
    pub fn pending_lanes(&self, root: RootId) -> Lanes {
        self.record(root).map_or(Lanes::NONE, |r| r.lanes.pending())
    }

    /// Whether a commit left passive effects that have not run yet.
    pub fn has_pending_passive_effects(&self) -> bool {
        self.pending_passive.is_some()
    }

    // -- Roots --

    /// Creates a root rendering into `container`.
    pub fn create_root(&mut self, container: H::Instance, options: RootOptions) -> RootId {
        #[expect(clippy::cast_possible_truncation, reason = "root count stays far below u32::MAX")]
        let id = RootId::from_raw(self.roots.len() as u32);
        let queue = Rc::new(StateQueue::new(self.shared.next_instance(), same_root_element));
        let mut fiber = Fiber::new(FiberTag::HostRoot, None, FiberInput::None, Lanes::NONE);
        fiber.state = FiberState::Root(RootState {
            root: id,
            element: StateHook::mount(Rc::new(None::<Element>), queue.clone()),
        });
        fiber.instance = Some(container.clone());
        let current = self.fibers.create(fiber);
        queue.bind(current);
        self.roots
            .push(Some(RootRecord::new(container, current, queue, options)));
        id
    }

    /// Schedules `element` to be rendered into `root`, replacing what was
    /// there. `None` clears the root.
    ///
    /// The update takes the lane of the ambient priority: synchronous inside
    /// [`flush_sync`](Self::flush_sync), a transition lane inside
    /// [`start_transition`](Self::start_transition), default otherwise.
    pub fn render(&mut self, root: RootId, element: Option<Element>) -> Result<(), EngineError> {
        let queue = self
            .record(root)
            .map(|r| r.element_queue.clone())
            .ok_or(EngineError::UnknownRoot(root))?;
        let lane = self.shared.request_update_lane();
        let event_time = self.shared.request_event_time();
        let action: Action = Rc::new(move |_: &Rc<dyn Any>| -> Rc<dyn Any> { Rc::new(element.clone()) });
        let interleaved = self.shared.session_active();
        queue.push(Update { lane, action }, interleaved);
        if interleaved {
            self.shared.enqueue_interleaved(queue.clone());
        }
        if let Some(fiber) = queue.fiber() {
            self.schedule_update_on_fiber(fiber, lane, event_time);
        }
        self.entangle_transitions(root, &queue, lane);
        Ok(())
    }

    /// Renders nothing into `root`, runs every cleanup, then drops the root.
    pub fn unmount(&mut self, root: RootId) -> Result<(), EngineError> {
        if self.shared.execution().is_working() {
            return Err(EngineError::AlreadyWorking);
        }
        let previous = self
            .shared
            .replace_update_priority(Some(EventPriority::Discrete));
        let scheduled = self.render(root, None);
        self.shared.replace_update_priority(previous);
        scheduled?;
        self.drain_inbox();
        self.flush_sync_queue();
        self.flush_passive_effects();

        if let Some(record) = self.roots.get_mut(root.index() as usize).and_then(Option::take) {
            for task in [record.callback, record.timeout_task].into_iter().flatten() {
                self.scheduler.cancel_task(task);
            }
        }
        self.sync_queue.retain(|r| *r != root);
        if self.session.root == Some(root) {
            self.abandon_session();
        }
        self.maybe_collect_garbage();
        self.take_error().map_or(Ok(()), Err)
    }

    // -- Host entry points --

    /// Runs one slice of scheduled work. Call when the host fires the
    /// callback requested through [`HostLoop::request_callback`].
    ///
    /// Returns whether work remains; a new callback has then already been
    /// requested. Errors surfacing during the slice are returned after the
    /// slice ends, the first one first; later ones are kept for the next
    /// entry point.
    pub fn run_host_callback(&mut self) -> Result<bool, EngineError> {
        if self.shared.execution().is_working() {
            return Err(EngineError::AlreadyWorking);
        }
        self.shared.end_event();
        self.drain_inbox();
        self.scheduler.begin_slice();
        loop {
            match self.scheduler.next_task() {
                Next::Run {
                    id,
                    task,
                    did_timeout,
                } => {
                    let step = self.run_job(id, task, did_timeout);
                    self.scheduler.complete_task(id, step);
                    self.drain_inbox();
                }
                Next::Yield | Next::Idle => break,
            }
        }
        let more = self.scheduler.end_slice();
        self.shared.end_event();
        self.take_error().map_or(Ok(more), Err)
    }

    /// Call when the host timer requested through
    /// [`HostLoop::request_timeout`] fires.
    pub fn run_host_timeout(&mut self) {
        self.scheduler.handle_timeout();
    }

    /// Schedules work for everything posted by setters and wakeables since
    /// the last entry point, then flushes synchronous work.
    pub fn flush_updates(&mut self) -> Result<(), EngineError> {
        if self.shared.execution().is_working() {
            return Err(EngineError::AlreadyWorking);
        }
        self.drain_inbox();
        self.flush_sync_queue();
        self.take_error().map_or(Ok(()), Err)
    }

    /// Runs `f` with discrete priority, then renders and commits the
    /// synchronous work it scheduled before returning.
    pub fn flush_sync<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R, EngineError> {
        if self.shared.execution().is_working() {
            return Err(EngineError::AlreadyWorking);
        }
        let previous = self
            .shared
            .replace_update_priority(Some(EventPriority::Discrete));
        let result = f(self);
        self.shared.replace_update_priority(previous);
        self.drain_inbox();
        self.flush_sync_queue();
        self.take_error().map_or(Ok(result), Err)
    }

    /// Runs `f` without waking the host for each update it posts.
    pub fn batched_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.shared.execution();
        self.shared
            .set_execution(previous | ExecutionContext::BATCHED);
        let result = f(self);
        self.shared.set_execution(previous);
        if previous.is_empty() {
            self.drain_inbox();
        }
        result
    }

    /// Runs `f` with `priority` as the ambient update priority.
    pub fn with_priority<R>(&mut self, priority: EventPriority, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.shared.replace_update_priority(Some(priority));
        let result = f(self);
        self.shared.replace_update_priority(previous);
        result
    }

    /// Runs `f` in a transition scope: updates get a transition lane shared
    /// by the current event, and render in time slices.
    pub fn start_transition<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.shared.replace_in_transition(true);
        let result = f(self);
        self.shared.replace_in_transition(previous);
        result
    }

    /// Flushes pending synchronous work on every root, including updates
    /// setters posted since the last entry point. There is no per-root
    /// variant: posted updates are only tied to a root once drained.
    pub fn flush_sync_work(&mut self) -> Result<(), EngineError> {
        self.flush_updates()
    }

    /// Lane an update requested right now would get.
    pub fn request_update_lane(&self) -> Lanes {
        self.shared.request_update_lane()
    }

    /// Event time an update requested right now would get.
    pub fn request_event_time(&self) -> HostTime {
        self.shared.request_event_time()
    }

    // -- Internals --

    fn record(&self, root: RootId) -> Option<&RootRecord<H>> {
        self.roots.get(root.index() as usize).and_then(Option::as_ref)
    }

    fn take_error(&mut self) -> Option<EngineError> {
        (!self.errors.is_empty()).then(|| self.errors.remove(0))
    }

    /// Emits a trace event. The clock is only read while a sink is set.
    fn trace(&mut self, f: impl FnOnce(&mut Tracer<'_>, HostTime)) {
        if let Some(sink) = self.sink.as_deref_mut() {
            let now = self.shared.now();
            let mut tracer = Tracer::new(sink);
            f(&mut tracer, now);
        }
    }

    fn run_job(&mut self, id: TaskId, job: Job, did_timeout: bool) -> crate::scheduler::Step<Job> {
        use crate::scheduler::Step;

        let (task, root) = match job {
            Job::PerformConcurrentWork(root) => (TaskKind::PerformWork, Some(root)),
            Job::FlushSyncQueue => (TaskKind::FlushSync, None),
            Job::FlushPassiveEffects => (TaskKind::FlushPassive, None),
            Job::CommitSuspended(root) => (TaskKind::CommitSuspended, Some(root)),
        };
        self.trace(|t, timestamp| {
            t.task_run(&TaskRunEvent {
                task,
                root,
                did_timeout,
                timestamp,
            });
        });
        match job {
            Job::PerformConcurrentWork(root) => self.perform_concurrent_work_on_root(id, root, did_timeout),
            Job::FlushSyncQueue => {
                self.sync_task = None;
                self.flush_sync_queue();
                Step::Done
            }
            Job::FlushPassiveEffects => {
                self.passive_task = None;
                self.flush_passive_effects();
                Step::Done
            }
            Job::CommitSuspended(root) => {
                self.commit_suspended(root);
                Step::Done
            }
        }
    }
}

/// Root record lookup that leaves the rest of the engine borrowable.
fn record_mut<H: HostConfig>(roots: &mut [Option<RootRecord<H>>], root: RootId) -> Option<&mut RootRecord<H>> {
    roots.get_mut(root.index() as usize).and_then(Option::as_mut)
}

fn same_root_element(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<Option<Element>>(), b.downcast_ref::<Option<Element>>()) {
        (Some(Some(a)), Some(Some(b))) => a.ptr_eq(b),
        (Some(None), Some(None)) => true,
        _ => false,
    }
}

/// Reads the element a root's state hook holds.
fn root_element(hook: &StateHook) -> Option<Element> {
    hook.memoized
        .downcast_ref::<Option<Element>>()
        .cloned()
        .flatten()
}

/// Ids of a fiber's children in order, so the store can be mutated while
/// walking them.
fn child_ids<H: HostConfig>(fibers: &FiberStore<H>, fiber: FiberId) -> Vec<FiberId> {
    fibers.children(fiber).collect()
}


#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::cell::{Cell, RefCell};

    use super::{Engine, EngineConfig, RootOptions};
    use crate::element::{Component, Element, PropValue, Props};
    use crate::error::{EngineError, RenderError, Signal};
    use crate::fiber::RootId;
    use crate::hooks::{Setter, cleanup};
    use crate::host_loop::ManualLoop;
    use crate::lane::{EventPriority, Lanes};
    use crate::test_support::LogHost;
    use crate::time::Duration;
    use crate::wakeable::Resource;

    type Log = Rc<RefCell<Vec<String>>>;

    fn setup(config: EngineConfig) -> (Engine<LogHost>, ManualLoop, RootId) {
        let host_loop = ManualLoop::new();
        let mut engine = Engine::new(LogHost::default(), Rc::new(host_loop.clone()), config);
        let root = engine.create_root(0, RootOptions::new());
        (engine, host_loop, root)
    }

    fn mount(engine: &mut Engine<LogHost>, root: RootId, element: Element) {
        engine
            .flush_sync(|e| e.render(root, Some(element)))
            .and_then(|scheduled| scheduled)
            .expect("synchronous render");
    }

    /// Runs host callbacks until no ready work is left.
    fn drain(engine: &mut Engine<LogHost>) {
        for _ in 0..1000 {
            if !engine.run_host_callback().expect("slice without errors") {
                return;
            }
        }
        panic!("scheduled work never settled");
    }

    fn div(children: Vec<Element>) -> Element {
        Element::host("div", Props::new(), children)
    }

    /// Logs effect creation and cleanup tagged with its `name` and `n` props.
    fn logger(log: &Log) -> Component {
        let log = log.clone();
        Component::new("Logger", move |cx, props| {
            let name = String::from(props.str("name").unwrap_or("?"));
            let n = props.int("n").unwrap_or(0);
            let log = log.clone();
            cx.use_effect(Some(vec![PropValue::Int(n)]), move || {
                log.borrow_mut().push(format!("create {name}{n}"));
                let log = log.clone();
                let name = name.clone();
                Ok(cleanup(move || log.borrow_mut().push(format!("destroy {name}{n}"))))
            });
            Ok(vec![])
        })
    }

    #[test]
    fn mount_builds_detached_nodes_and_places_the_top_once() {
        let (mut engine, _, root) = setup(EngineConfig::standard());
        let tree = div(vec![Element::host("span", Props::new(), vec![Element::text("hi")])]);
        mount(&mut engine, root, tree);
        assert_eq!(
            engine.host_mut().take(),
            vec![
                "create text#1 \"hi\"",
                "create span#2",
                "init 2 <- 1",
                "create div#3",
                "init 3 <- 2",
                "append 0 <- 3",
            ],
            "children are assembled before the single placement"
        );
    }

    #[test]
    fn changing_one_text_commits_one_mutation() {
        let (mut engine, _, root) = setup(EngineConfig::standard());
        mount(&mut engine, root, div(vec![Element::text("a")]));
        engine.host_mut().take();
        mount(&mut engine, root, div(vec![Element::text("b")]));
        assert_eq!(
            engine.host_mut().take_mutations(),
            vec!["text #1 \"b\""],
            "only the text node changes"
        );
    }

    #[test]
    fn rendering_the_same_element_again_changes_nothing() {
        let (mut engine, _, root) = setup(EngineConfig::standard());
        let tree = div(vec![Element::text("a"), Element::host("p", Props::new().with("x", 1), vec![])]);
        mount(&mut engine, root, tree.clone());
        engine.host_mut().take();
        mount(&mut engine, root, tree);
        assert!(engine.host_mut().take().is_empty(), "an identical element is a no-op");
    }

    #[test]
    fn every_cleanup_runs_before_any_effect_is_recreated() {
        let (mut engine, _, root) = setup(EngineConfig::standard());
        let log: Log = Rc::default();
        let component = logger(&log);
        let tree = |n: i64| {
            Element::fragment(vec![
                component.element(Props::new().with("name", "a").with("n", n)),
                component.element(Props::new().with("name", "b").with("n", n)),
            ])
        };
        mount(&mut engine, root, tree(0));
        assert_eq!(*log.borrow(), vec!["create a0", "create b0"], "effects run after mount");
        log.borrow_mut().clear();

        mount(&mut engine, root, tree(1));
        assert_eq!(
            *log.borrow(),
            vec!["destroy a0", "destroy b0", "create a1", "create b1"],
            "the whole tree is cleaned up first"
        );
        log.borrow_mut().clear();

        engine.unmount(root).expect("unmount");
        assert_eq!(*log.borrow(), vec!["destroy a1", "destroy b1"], "unmount runs cleanups");
    }

    #[test]
    fn effects_with_unchanged_dependencies_are_skipped() {
        let (mut engine, _, root) = setup(EngineConfig::standard());
        let log: Log = Rc::default();
        let component = logger(&log);
        let element = |label: &str| {
            div(vec![
                Element::text(label),
                component.element(Props::new().with("name", "a").with("n", 7)),
            ])
        };
        mount(&mut engine, root, element("x"));
        log.borrow_mut().clear();
        mount(&mut engine, root, element("y"));
        assert!(log.borrow().is_empty(), "same dependencies, no effect: {:?}", log.borrow());
    }

    #[test]
    fn time_sliced_render_mutates_nothing_until_it_commits() {
        let config = EngineConfig {
            time_slice_default_updates: true,
            ..EngineConfig::standard()
        };
        let (mut engine, host_loop, root) = setup(config);
        host_loop.set_auto_advance(Duration::from_micros(250));
        let items = (0..40)
            .map(|i| Element::host("span", Props::new(), vec![Element::text(format!("{i}"))]))
            .collect();
        engine.render(root, Some(div(items))).expect("render");
        assert!(host_loop.has_callback(), "default work asks for a host callback");

        let more = engine.run_host_callback().expect("first slice");
        assert!(more, "the first slice yields before the tree is finished");
        assert!(engine.host_mut().take_mutations().is_empty(), "nothing is attached mid-render");
        assert_eq!(engine.pending_lanes(root), Lanes::DEFAULT, "the update is still pending");

        drain(&mut engine);
        let mutations = engine.host_mut().take_mutations();
        assert_eq!(mutations.len(), 1, "one placement for the whole tree: {mutations:?}");
        assert!(mutations[0].starts_with("append 0 <- "), "the div is appended to the container");
        assert_eq!(engine.pending_lanes(root), Lanes::NONE, "nothing left to render");
    }

    #[test]
    fn suspended_content_shows_the_fallback_until_the_resource_resolves() {
        let (mut engine, _, root) = setup(EngineConfig::standard());
        let resource: Resource<&'static str> = Resource::pending();
        let lazy = {
            let resource = resource.clone();
            Component::new("Lazy", move |_, _| Ok(vec![Element::text(resource.read()?)]))
        };
        let tree = Element::suspense(vec![Element::text("loading")], vec![lazy.element(Props::new())]);
        mount(&mut engine, root, tree);
        assert_eq!(
            engine.host_mut().take(),
            vec!["create text#1 \"loading\"", "append 0 <- 1"],
            "the fallback is committed in place of the content"
        );

        resource.resolve("done");
        drain(&mut engine);
        let ops = engine.host_mut().take();
        assert!(ops.contains(&String::from("create text#2 \"done\"")), "content rendered: {ops:?}");
        assert!(ops.contains(&String::from("remove 0 -> 1")), "fallback removed: {ops:?}");
        assert!(ops.contains(&String::from("append 0 <- 2")), "content placed: {ops:?}");
    }

    #[test]
    fn error_boundaries_render_their_fallback_and_report_once() {
        let (mut engine, _, root) = setup(EngineConfig::standard());
        let caught = Rc::new(Cell::new(0_u32));
        let bomb = Component::new("Bomb", |_, _| Err(Signal::Thrown(RenderError::msg("boom"))));
        let seen = caught.clone();
        let tree = Element::error_boundary(
            |error| vec![Element::text(format!("failed: {}", error.error))],
            vec![bomb.element(Props::new())],
        )
        .on_error(move |error| {
            assert_eq!(
                error.component_stack,
                vec!["Bomb", "ErrorBoundary"],
                "the stack runs from the thrower outward"
            );
            seen.set(seen.get() + 1);
        });
        mount(&mut engine, root, tree);
        let ops = engine.host_mut().take();
        assert!(
            ops.iter().any(|op| op.ends_with("\"failed: boom\"")),
            "the fallback is rendered: {ops:?}"
        );
        let placed: Vec<&String> = ops.iter().filter(|op| op.starts_with("append")).collect();
        assert_eq!(placed.len(), 1, "only the fallback is attached: {ops:?}");
        assert_eq!(caught.get(), 1, "the observer runs once, after commit");
    }

    #[test]
    fn uncaught_errors_unmount_the_root_and_surface_from_the_entry_point() {
        let (mut engine, _, root) = setup(EngineConfig::standard());
        mount(&mut engine, root, div(vec![Element::text("ok")]));
        engine.host_mut().take();

        let bomb = Component::new("Bomb", |_, _| Err(RenderError::msg("boom").into()));
        let result = engine
            .flush_sync(|e| e.render(root, Some(bomb.element(Props::new()))))
            .and_then(|scheduled| scheduled);
        assert!(
            matches!(result, Err(EngineError::Uncaught(_))),
            "the error escapes: {result:?}"
        );
        assert_eq!(
            engine.host_mut().take_mutations(),
            vec!["remove 0 -> 2"],
            "the previous tree is removed"
        );
    }

    #[test]
    fn runaway_layout_updates_hit_the_nested_update_limit() {
        let (mut engine, _, root) = setup(EngineConfig::standard());
        let runaway = Component::new("Runaway", |cx, _| {
            let (count, set_count) = cx.use_state(|| 0_u32);
            cx.use_layout_effect(None, move || {
                set_count.update(|n| n + 1);
                Ok(None)
            });
            Ok(vec![Element::text(format!("{count}"))])
        });
        let result = engine
            .flush_sync(|e| e.render(root, Some(runaway.element(Props::new()))))
            .and_then(|scheduled| scheduled);
        assert!(
            matches!(result, Err(EngineError::MaximumUpdateDepthExceeded { root: r }) if r == root),
            "the loop is cut off: {result:?}"
        );
    }

    #[test]
    fn flush_sync_work_commits_pending_updates_on_every_root() {
        let (mut engine, _, first) = setup(EngineConfig::standard());
        let second = engine.create_root(100, RootOptions::new());
        let setters: Rc<RefCell<Vec<Setter<i64>>>> = Rc::default();
        let out = setters.clone();
        let counter = Component::new("Counter", move |cx, _| {
            let (n, set_n) = cx.use_state(|| 0_i64);
            out.borrow_mut().push(set_n);
            Ok(vec![Element::text(format!("{n}"))])
        });
        mount(&mut engine, first, counter.element(Props::new()));
        mount(&mut engine, second, counter.element(Props::new()));
        engine.host_mut().take();

        let (a, b) = (setters.borrow()[0].clone(), setters.borrow()[1].clone());
        engine.with_priority(EventPriority::Discrete, |_| {
            a.set(1);
            b.set(2);
        });
        assert!(engine.host_mut().take().is_empty(), "posted updates wait for an entry point");

        engine.flush_sync_work().expect("flush without errors");
        assert_eq!(
            engine.host_mut().take_mutations(),
            vec!["text #1 \"1\"", "text #2 \"2\""],
            "both roots commit"
        );
        assert_eq!(engine.pending_lanes(first), Lanes::NONE);
        assert_eq!(engine.pending_lanes(second), Lanes::NONE);
    }

    #[test]
    fn entry_points_reject_unknown_roots() {
        let (mut engine, _, _) = setup(EngineConfig::standard());
        let result = engine.render(RootId::from_raw(9), None);
        assert!(matches!(result, Err(EngineError::UnknownRoot(_))), "no such root: {result:?}");
    }
}
