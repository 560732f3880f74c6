// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recording in-memory host and deterministic harness for `ravel_core`.
//!
//! [`TestHost`] implements [`HostConfig`](ravel_core::host::HostConfig) over
//! a flat node table and logs every call as a [`HostOp`], so tests can assert
//! both the resulting tree ([`TestHost::tree`]) and the exact mutations that
//! produced it. [`Harness`] pairs it with an engine and a
//! [`ManualLoop`](ravel_core::host_loop::ManualLoop) for one root:
//!
//! ```ignore
//! let mut h = Harness::new();
//! h.render_sync(Element::host("div", Props::new(), vec![Element::text("hi")]))?;
//! assert_eq!(h.tree(), "<div>hi</div>");
//! ```

#![no_std]

extern crate alloc;

mod harness;
mod host;

pub use harness::Harness;
pub use host::{HostOp, NodeId, TestHost};

#[cfg(test)]
mod scenarios;
