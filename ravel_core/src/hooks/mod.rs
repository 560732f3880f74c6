// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Component state and effects.
//!
//! A component's hooks are identified by call order. Each render of a
//! component walks the hooks of its committed fiber in step with the calls
//! the render makes, producing a fresh hook list for the work-in-progress
//! fiber:
//!
//! - [`RenderCx::use_state`] applies the queued updates whose lanes are
//!   being rendered and rebases over the rest.
//! - [`RenderCx::use_memo`] recomputes when its dependencies change.
//! - [`RenderCx::use_effect`] and [`RenderCx::use_layout_effect`] record an
//!   effect to run after commit when their dependencies change. Layout
//!   effects run synchronously in the commit, passive ones in a later task.
//! - [`RenderCx::use_store`] reads an [`ExternalStore`] and keeps the
//!   component subscribed to it.
//!
//! A component that updates its own state while rendering is rendered again
//! immediately, up to a fixed limit.

pub(crate) mod queue;
pub(crate) mod store;

pub use queue::Setter;
pub use store::{ExternalStore, Subscription};

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;
use core::cell::RefCell;
use core::fmt;

use self::queue::{StateHook, StateQueue, eq_as};
use self::store::StoreCheck;
use crate::element::{Component, Element, PropValue, Props};
use crate::error::{HookOrderMismatch, RenderError, Signal, TooManyReRenders};
use crate::fiber::{FiberId, Flags};
use crate::lane::Lanes;
use crate::shared::Shared;

/// Identifies a mounted component instance across both of its fibers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct InstanceId(pub(crate) u64);

/// Undoes an effect. Runs before the effect is re-created and on unmount.
pub type Cleanup = Box<dyn FnOnce() -> Result<(), RenderError>>;

/// Wraps a closure as a [`Cleanup`].
pub fn cleanup(f: impl FnOnce() + 'static) -> Option<Cleanup> {
    Some(Box::new(move || {
        f();
        Ok(())
    }))
}

pub(crate) type EffectCreate = Rc<dyn Fn() -> Result<Option<Cleanup>, RenderError>>;

/// When an effect runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EffectKind {
    /// In the layout pass, before the host yields to paint.
    Layout,
    /// In the deferred passive pass.
    Passive,
}

#[derive(Clone)]
pub(crate) struct EffectHook {
    pub(crate) kind: EffectKind,
    deps: Option<Vec<PropValue>>,
    create: EffectCreate,
    /// Shared with the committed hook, so a cleanup survives re-renders.
    destroy: Rc<RefCell<Option<Cleanup>>>,
    /// The effect must be (re)created in this commit.
    pub(crate) has_effect: bool,
}

impl EffectHook {
    /// Runs and clears the stored cleanup, if any.
    pub(crate) fn run_destroy(&self) -> Result<(), RenderError> {
        let destroy = self.destroy.borrow_mut().take();
        match destroy {
            Some(destroy) => destroy(),
            None => Ok(()),
        }
    }

    /// Runs the effect and stores its cleanup.
    pub(crate) fn run_create(&self) -> Result<(), RenderError> {
        let cleanup = (self.create)()?;
        *self.destroy.borrow_mut() = cleanup;
        Ok(())
    }
}

impl fmt::Debug for EffectHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHook")
            .field("kind", &self.kind)
            .field("deps", &self.deps)
            .field("has_effect", &self.has_effect)
            .finish_non_exhaustive()
    }
}

/// One hook slot of a component.
#[derive(Clone)]
pub(crate) enum Hook {
    State(StateHook),
    Effect(EffectHook),
    Memo {
        deps: Vec<PropValue>,
        value: Rc<dyn Any>,
    },
    Store {
        version: u64,
    },
}

impl Hook {
    pub(crate) fn effect(&self) -> Option<&EffectHook> {
        match self {
            Self::Effect(effect) => Some(effect),
            _ => None,
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(state) => state.fmt(f),
            Self::Effect(effect) => effect.fmt(f),
            Self::Memo { deps, .. } => f.debug_struct("Memo").field("deps", deps).finish_non_exhaustive(),
            Self::Store { version } => f.debug_struct("Store").field("version", version).finish(),
        }
    }
}

enum Lookup<T> {
    Found(T),
    Mount,
    Mismatch,
}

/// Render context handed to component render functions.
pub struct RenderCx<'a> {
    shared: &'a Rc<Shared>,
    fiber: FiberId,
    component: &'static str,
    instance: InstanceId,
    render_lanes: Lanes,
    /// Hooks of the committed fiber, `None` on mount.
    current: Option<&'a mut Vec<Hook>>,
    /// Hooks produced by the previous pass of a re-render.
    previous_pass: Option<Vec<Hook>>,
    hooks: Vec<Hook>,
    is_rerender: bool,
    did_receive_update: bool,
    skipped_lanes: Lanes,
    flags: Flags,
    store_checks: Vec<StoreCheck>,
    error: Option<RenderError>,
}

impl fmt::Debug for RenderCx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCx")
            .field("component", &self.component)
            .field("fiber", &self.fiber)
            .field("render_lanes", &self.render_lanes)
            .field("hooks", &self.hooks.len())
            .field("is_rerender", &self.is_rerender)
            .finish_non_exhaustive()
    }
}

impl RenderCx<'_> {
    /// Name of the component being rendered.
    #[must_use]
    pub fn component_name(&self) -> &'static str {
        self.component
    }

    /// Lanes being rendered.
    #[must_use]
    pub fn render_lanes(&self) -> Lanes {
        self.render_lanes
    }

    /// Declares a state value, initialized by `init` on mount.
    pub fn use_state<T: Clone + PartialEq + 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> (T, Setter<T>) {
        let index = self.hooks.len();
        let found = match self.next_state_hook(index) {
            Lookup::Found(hook) => match hook.memoized.downcast_ref::<T>() {
                Some(value) => {
                    let value = value.clone();
                    Some((hook, value))
                }
                None => {
                    self.mismatch(index);
                    None
                }
            },
            Lookup::Mismatch => {
                self.mismatch(index);
                None
            }
            Lookup::Mount => None,
        };
        let (hook, value) = match found {
            Some(found) => found,
            None => {
                let value = init();
                let queue = Rc::new(StateQueue::new(self.instance, eq_as::<T>));
                queue.bind(self.fiber);
                (StateHook::mount(Rc::new(value.clone()), queue), value)
            }
        };
        let setter = Setter::new(hook.queue.clone(), Rc::downgrade(self.shared));
        self.hooks.push(Hook::State(hook));
        (value, setter)
    }

    /// Caches `compute()` until `deps` change.
    pub fn use_memo<T: Clone + 'static>(
        &mut self,
        deps: Vec<PropValue>,
        compute: impl FnOnce() -> T,
    ) -> T {
        let index = self.hooks.len();
        let previous = if self.is_rerender {
            self.previous_pass.as_ref().and_then(|p| p.get(index)).cloned()
        } else {
            self.current_hook(index)
        };
        let cached = match previous {
            Some(Hook::Memo { deps: old, value }) => {
                if old == deps {
                    value.downcast_ref::<T>().cloned()
                } else {
                    None
                }
            }
            Some(_) => {
                self.mismatch(index);
                None
            }
            None => {
                if self.current.is_some() {
                    self.mismatch(index);
                }
                None
            }
        };
        let value = cached.unwrap_or_else(compute);
        self.hooks.push(Hook::Memo {
            deps,
            value: Rc::new(value.clone()),
        });
        value
    }

    /// Runs `create` after the commit has been painted, whenever `deps`
    /// differ from the previous render. `None` runs it after every commit.
    pub fn use_effect(
        &mut self,
        deps: Option<Vec<PropValue>>,
        create: impl Fn() -> Result<Option<Cleanup>, RenderError> + 'static,
    ) {
        self.push_effect(EffectKind::Passive, deps, Rc::new(create));
    }

    /// Like [`use_effect`](Self::use_effect), but runs synchronously in the
    /// commit, after host mutations and before the host paints.
    pub fn use_layout_effect(
        &mut self,
        deps: Option<Vec<PropValue>>,
        create: impl Fn() -> Result<Option<Cleanup>, RenderError> + 'static,
    ) {
        self.push_effect(EffectKind::Layout, deps, Rc::new(create));
    }

    /// Reads `store` and re-renders the component when it changes.
    pub fn use_store<T: Clone + 'static>(&mut self, store: &ExternalStore<T>) -> T {
        let index = self.hooks.len();
        let value = store.get();
        let version = store.version();
        match self.current_hook(index) {
            Some(Hook::Store { version: old }) => {
                if old != version {
                    self.did_receive_update = true;
                }
            }
            Some(_) => self.mismatch(index),
            None => {
                if self.current.is_some() {
                    self.mismatch(index);
                }
            }
        }
        self.hooks.push(Hook::Store { version });
        if !self.render_lanes.includes_blocking() {
            self.store_checks.push(store.check(version));
            self.flags |= Flags::STORE_CONSISTENCY;
        }

        let fiber = self.fiber;
        let shared = Rc::downgrade(self.shared);
        let store = store.clone();
        self.push_effect(
            EffectKind::Passive,
            Some(vec![PropValue::Int(store.identity())]),
            Rc::new(move || {
                let notify = {
                    let shared = shared.clone();
                    move || {
                        if let Some(shared) = shared.upgrade() {
                            shared.post_update(fiber, Lanes::SYNC);
                        }
                    }
                };
                // A write between render and subscription would be missed.
                if store.version() != version {
                    notify();
                }
                let subscription = store.subscribe(notify);
                let store = store.clone();
                Ok(Some(Box::new(move || {
                    store.unsubscribe(subscription);
                    Ok(())
                })))
            }),
        );
        value
    }

    fn push_effect(&mut self, kind: EffectKind, deps: Option<Vec<PropValue>>, create: EffectCreate) {
        let index = self.hooks.len();
        let hook = match self.current_hook(index) {
            Some(Hook::Effect(previous)) if previous.kind == kind => {
                let unchanged = matches!((&deps, &previous.deps), (Some(a), Some(b)) if a == b);
                EffectHook {
                    kind,
                    deps,
                    create,
                    destroy: previous.destroy.clone(),
                    has_effect: !unchanged,
                }
            }
            previous => {
                if previous.is_some() || self.current.is_some() {
                    self.mismatch(index);
                }
                EffectHook {
                    kind,
                    deps,
                    create,
                    destroy: Rc::new(RefCell::new(None)),
                    has_effect: true,
                }
            }
        };
        if hook.has_effect {
            self.flags |= match kind {
                EffectKind::Layout => Flags::UPDATE,
                EffectKind::Passive => Flags::PASSIVE,
            };
        }
        self.hooks.push(Hook::Effect(hook));
    }

    fn current_hook(&self, index: usize) -> Option<Hook> {
        self.current.as_deref().and_then(|hooks| hooks.get(index)).cloned()
    }

    fn next_state_hook(&mut self, index: usize) -> Lookup<StateHook> {
        if self.is_rerender {
            return match self.previous_pass.as_ref().and_then(|p| p.get(index)) {
                Some(Hook::State(hook)) => {
                    let mut hook = hook.clone();
                    if hook.apply_render_phase() {
                        self.did_receive_update = true;
                    }
                    Lookup::Found(hook)
                }
                Some(_) => Lookup::Mismatch,
                None => Lookup::Mount,
            };
        }
        let render_lanes = self.render_lanes;
        let lookup = match self.current.as_deref_mut() {
            None => Lookup::Mount,
            Some(hooks) => match hooks.get_mut(index) {
                Some(Hook::State(current)) => Lookup::Found(StateHook::process(current, render_lanes)),
                _ => Lookup::Mismatch,
            },
        };
        match lookup {
            Lookup::Found(processed) => {
                if processed.changed {
                    self.did_receive_update = true;
                }
                self.skipped_lanes = self.skipped_lanes.merge(processed.skipped);
                Lookup::Found(processed.hook)
            }
            Lookup::Mount => Lookup::Mount,
            Lookup::Mismatch => Lookup::Mismatch,
        }
    }

    fn mismatch(&mut self, index: usize) {
        if self.error.is_none() {
            self.error = Some(RenderError::new(HookOrderMismatch {
                component: self.component,
                index,
            }));
        }
    }
}

/// Everything a component render produced.
#[derive(Debug)]
pub(crate) struct HookOutput {
    pub(crate) result: Result<Vec<Element>, Signal>,
    pub(crate) hooks: Vec<Hook>,
    /// State, store or props changed; the component cannot bail out.
    pub(crate) did_receive_update: bool,
    /// Lanes of updates left in the hooks' queues.
    pub(crate) skipped_lanes: Lanes,
    pub(crate) flags: Flags,
    pub(crate) store_checks: Vec<StoreCheck>,
}

/// Inputs for one component render.
#[derive(Debug)]
pub(crate) struct RenderRequest<'a> {
    pub(crate) fiber: FiberId,
    pub(crate) component: &'a Component,
    pub(crate) props: &'a Props,
    pub(crate) instance: InstanceId,
    pub(crate) render_lanes: Lanes,
    pub(crate) rerender_limit: u32,
}

/// Renders a component, re-running it while it updates itself during
/// render.
pub(crate) fn render_with_hooks(
    shared: &Rc<Shared>,
    request: &RenderRequest<'_>,
    mut current: Option<&mut Vec<Hook>>,
) -> HookOutput {
    let mut previous_pass = None;
    let mut passes = 0;
    let mut did_receive_update = false;
    let mut skipped_lanes = Lanes::NONE;
    loop {
        shared.begin_component(request.instance);
        let mut cx = RenderCx {
            shared,
            fiber: request.fiber,
            component: request.component.name(),
            instance: request.instance,
            render_lanes: request.render_lanes,
            current: current.as_deref_mut(),
            previous_pass: previous_pass.take(),
            hooks: Vec::new(),
            is_rerender: passes > 0,
            did_receive_update: false,
            skipped_lanes: Lanes::NONE,
            flags: Flags::empty(),
            store_checks: Vec::new(),
            error: None,
        };
        let mut result = request.component.render(&mut cx, request.props);
        let rerender = shared.end_component();
        if let Some(error) = cx.error.take()
            && result.is_ok()
        {
            result = Err(Signal::Thrown(error));
        }
        let RenderCx {
            hooks,
            did_receive_update: updated,
            skipped_lanes: skipped,
            flags,
            store_checks,
            ..
        } = cx;
        did_receive_update |= updated;
        skipped_lanes = skipped_lanes.merge(skipped);

        if rerender && result.is_ok() {
            if passes >= request.rerender_limit {
                discard_render_phase_updates(&hooks);
                return HookOutput {
                    result: Err(Signal::Thrown(RenderError::new(TooManyReRenders {
                        component: request.component.name(),
                    }))),
                    hooks,
                    did_receive_update,
                    skipped_lanes,
                    flags,
                    store_checks,
                };
            }
            passes += 1;
            previous_pass = Some(hooks);
            continue;
        }
        if result.is_err() {
            discard_render_phase_updates(&hooks);
            if let Some(current) = current.as_deref() {
                discard_render_phase_updates(current);
            }
        }
        return HookOutput {
            result,
            hooks,
            did_receive_update,
            skipped_lanes,
            flags,
            store_checks,
        };
    }
}

fn discard_render_phase_updates(hooks: &[Hook]) {
    for hook in hooks {
        if let Hook::State(state) = hook {
            state.queue.take_render_phase();
        }
    }
}
