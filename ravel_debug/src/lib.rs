// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording, pretty-printing, and Chrome trace export for ravel
//! diagnostics.
//!
//! This crate provides [`TraceSink`](ravel_core::trace::TraceSink)
//! implementations for development and post-mortem analysis:
//!
//! - [`pretty::PrettyPrintSink`]: human-readable one-line-per-event output.
//! - [`recorder::RecorderSink`]: compact binary recording with
//!   [`recorder::decode`] for playback.
//! - [`chrome::export`]: writes Chrome Trace Event Format JSON from recorded
//!   bytes.
//!
//! The engine owns its sink; wrap one in `Rc<RefCell<_>>` to keep a handle
//! for reading it back.

pub mod chrome;
pub mod pretty;
pub mod recorder;
