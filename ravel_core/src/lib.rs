// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interruptible reconciliation and cooperative scheduling for declarative
//! UI trees.
//!
//! `ravel_core` turns trees of [`Element`](element::Element)s into mutations
//! of a host tree (a DOM, a native widget hierarchy, a retained scene). It
//! is `no_std` compatible (with `alloc`) and single-threaded: everything
//! runs on the host's UI thread, driven by callbacks the host delivers.
//!
//! # Architecture
//!
//! ```text
//!   render() / Setter::set() / Wakeable::resolve()
//!       │
//!       ▼
//!   lane assignment ──► root coordinator ──► Scheduler task
//!                                                │
//!                 ┌──────────────────────────────┘
//!                 ▼
//!   render pass (begin ⇄ complete, yields between units)
//!       │
//!       ▼
//!   commit: before-mutation ──► mutation ──► layout ──► passive (deferred)
//!                                   │
//!                                   ▼
//!                              HostConfig
//! ```
//!
//! **[`lane`]**: Bitset priorities, per-root lane bookkeeping and the rule
//! that picks which lanes render next.
//!
//! **[`scheduler`]**: Priority task queue with delayed tasks, cooperative
//! time slicing and continuations, driven by a [`HostLoop`](host_loop::HostLoop).
//!
//! **[`fiber`]**: Double-buffered fiber graph in a generational arena.
//!
//! **[`hooks`]**: Component state, memoization, effects and external store
//! subscriptions, addressed by call order.
//!
//! **[`engine`]**: The [`Engine`](engine::Engine): roots, render passes,
//! reconciliation, suspension, error boundaries and commits.
//!
//! **[`host`]**: The [`HostConfig`](host::HostConfig) trait a host tree
//! implements to receive mutations.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! pipeline instrumentation, with zero-overhead [`Tracer`](trace::Tracer)
//! wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).
//! - `trace-rich` (disabled by default, implies `trace`): Records every host
//!   mutation of a commit.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod element;
pub mod engine;
pub mod error;
pub mod fiber;
pub mod hooks;
pub mod host;
pub mod host_loop;
pub mod lane;
pub mod scheduler;
pub mod time;
pub mod trace;
pub mod wakeable;

mod shared;

#[cfg(test)]
mod test_support;
