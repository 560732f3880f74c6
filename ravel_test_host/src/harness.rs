// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deterministic driver for one root over a [`TestHost`].

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;

use ravel_core::element::Element;
use ravel_core::engine::{Engine, EngineConfig, RootOptions};
use ravel_core::error::EngineError;
use ravel_core::fiber::RootId;
use ravel_core::host_loop::{HostLoop, ManualLoop};
use ravel_core::time::Duration;

use crate::host::{HostOp, NodeId, TestHost};

/// Upper bound on callbacks and timers [`Harness::run_until_idle`] fires.
const MAX_STEPS: usize = 10_000;

/// An [`Engine`] over a [`TestHost`], driven by a [`ManualLoop`].
///
/// Nothing happens behind the caller's back: callbacks the engine requests
/// only run on [`step`](Self::step) or
/// [`run_until_idle`](Self::run_until_idle), and time only moves on
/// [`advance`](Self::advance).
#[derive(Debug)]
pub struct Harness {
    engine: Engine<TestHost>,
    host_loop: ManualLoop,
    root: RootId,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    /// Creates a harness with the standard engine configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::standard())
    }

    /// Creates a harness with `config`.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(TestHost::new(), config, RootOptions::new())
    }

    /// Creates a harness over a preconfigured host, root and engine.
    #[must_use]
    pub fn build(host: TestHost, config: EngineConfig, options: RootOptions) -> Self {
        let host_loop = ManualLoop::new();
        let mut engine = Engine::new(host, Rc::new(host_loop.clone()), config);
        let root = engine.create_root(NodeId::CONTAINER, options);
        Self {
            engine,
            host_loop,
            root,
        }
    }

    /// The root rendering into the host container.
    #[must_use]
    pub fn root(&self) -> RootId {
        self.root
    }

    /// The engine.
    #[must_use]
    pub fn engine(&self) -> &Engine<TestHost> {
        &self.engine
    }

    /// The engine, mutably; use it for scopes such as
    /// [`Engine::start_transition`].
    pub fn engine_mut(&mut self) -> &mut Engine<TestHost> {
        &mut self.engine
    }

    /// The host loop shared with the engine.
    #[must_use]
    pub fn host_loop(&self) -> &ManualLoop {
        &self.host_loop
    }

    /// The host.
    #[must_use]
    pub fn host(&self) -> &TestHost {
        self.engine.host()
    }

    /// Serialized host tree.
    #[must_use]
    pub fn tree(&self) -> String {
        self.engine.host().tree()
    }

    /// Returns and clears the recorded host operations.
    pub fn take_ops(&mut self) -> Vec<HostOp> {
        self.engine.host_mut().take_ops()
    }

    /// Commits seen by the host.
    #[must_use]
    pub fn commits(&self) -> u32 {
        self.engine.host().commits()
    }

    /// Renders `element` synchronously, committing before returning.
    pub fn render_sync(&mut self, element: Element) -> Result<(), EngineError> {
        let root = self.root;
        self.engine.flush_sync(|e| e.render(root, Some(element)))?
    }

    /// Schedules `element` at default priority. Nothing renders until the
    /// harness is stepped.
    pub fn render(&mut self, element: Element) -> Result<(), EngineError> {
        self.engine.render(self.root, Some(element))
    }

    /// Schedules `element` in a transition.
    pub fn render_transition(&mut self, element: Element) -> Result<(), EngineError> {
        let root = self.root;
        self.engine.start_transition(|e| e.render(root, Some(element)))
    }

    /// Clears the root.
    pub fn unmount(&mut self) -> Result<(), EngineError> {
        self.engine.unmount(self.root)
    }

    /// Schedules and flushes what setters and wakeables posted since the
    /// last entry point.
    pub fn flush_updates(&mut self) -> Result<(), EngineError> {
        self.engine.flush_updates()
    }

    /// Runs one host callback if the engine requested one. Returns whether
    /// one ran.
    pub fn step(&mut self) -> Result<bool, EngineError> {
        if !self.host_loop.take_callback() {
            return Ok(false);
        }
        self.engine.run_host_callback()?;
        Ok(true)
    }

    /// Moves the clock forward and fires the host timer if it came due.
    pub fn advance(&mut self, by: Duration) -> Result<(), EngineError> {
        self.host_loop.advance(by);
        if self.host_loop.take_due_timeout() {
            self.engine.run_host_timeout();
        }
        self.drain_callbacks()
    }

    /// Runs callbacks until none is requested, jumping the clock to each
    /// armed timer in turn, until there is nothing left to do.
    pub fn run_until_idle(&mut self) -> Result<(), EngineError> {
        for _ in 0..MAX_STEPS {
            if self.step()? {
                continue;
            }
            let Some(at) = self.host_loop.pending_timeout() else {
                return Ok(());
            };
            let now = self.host_loop.now();
            self.host_loop.advance(at.saturating_duration_since(now));
            if self.host_loop.take_due_timeout() {
                self.engine.run_host_timeout();
            }
        }
        Ok(())
    }

    /// Runs callbacks until none is requested, without moving the clock.
    pub fn drain_callbacks(&mut self) -> Result<(), EngineError> {
        for _ in 0..MAX_STEPS {
            if !self.step()? {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use ravel_core::element::{Element, Props};
    use ravel_core::time::Duration;

    use super::Harness;

    #[test]
    fn scheduled_renders_wait_for_a_step() {
        let mut h = Harness::new();
        h.render(Element::text("later")).unwrap();
        assert_eq!(h.tree(), "");
        assert!(h.host_loop().has_callback());
        assert!(h.step().unwrap());
        assert_eq!(h.tree(), "later");
        h.drain_callbacks().unwrap();
        assert!(!h.step().unwrap());
    }

    #[test]
    fn advancing_the_clock_fires_due_timers() {
        let mut h = Harness::new();
        h.render_sync(Element::host("p", Props::new(), vec![])).unwrap();
        assert_eq!(h.commits(), 1);
        h.advance(Duration::from_millis(5)).unwrap();
        h.run_until_idle().unwrap();
        assert_eq!(h.tree(), "<p></p>");
        h.unmount().unwrap();
        assert_eq!(h.tree(), "");
    }
}
