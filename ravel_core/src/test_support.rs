// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hosts used by unit tests.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::element::Props;
use crate::host::HostConfig;

/// A host with unit instances that ignores every operation.
#[derive(Debug, Default)]
pub(crate) struct NullHost;

impl HostConfig for NullHost {
    type Instance = ();
    type UpdatePayload = ();

    fn create_instance(&mut self, _: &'static str, _: &Props) {}
    fn create_text_instance(&mut self, _: &str) {}
    fn append_initial_child(&mut self, _: &(), _: &()) {}
    fn prepare_update(&mut self, _: &(), _: &'static str, old: &Props, new: &Props) -> Option<()> {
        (old != new).then_some(())
    }
    fn commit_update(&mut self, _: &(), _: (), _: &'static str, _: &Props) {}
    fn commit_text_update(&mut self, _: &(), _: &str, _: &str) {}
    fn reset_text_content(&mut self, _: &()) {}
    fn append_child(&mut self, _: &(), _: &()) {}
    fn insert_before(&mut self, _: &(), _: &(), _: &()) {}
    fn remove_child(&mut self, _: &(), _: &()) {}
    fn hide_instance(&mut self, _: &()) {}
    fn unhide_instance(&mut self, _: &(), _: &Props) {}
    fn hide_text_instance(&mut self, _: &()) {}
    fn unhide_text_instance(&mut self, _: &(), _: &str) {}
}

/// A host that logs every operation as a short string. Instances are
/// numbered in creation order; the container passed to roots is 0.
#[derive(Debug, Default)]
pub(crate) struct LogHost {
    pub(crate) ops: Vec<String>,
    next: u32,
}

impl LogHost {
    pub(crate) fn take(&mut self) -> Vec<String> {
        core::mem::take(&mut self.ops)
    }

    /// Operations that change attached nodes, skipping creation.
    pub(crate) fn take_mutations(&mut self) -> Vec<String> {
        self.take()
            .into_iter()
            .filter(|op| !op.starts_with("create") && !op.starts_with("init"))
            .collect()
    }
}

impl HostConfig for LogHost {
    type Instance = u32;
    type UpdatePayload = Props;

    fn create_instance(&mut self, tag: &'static str, _: &Props) -> u32 {
        self.next += 1;
        self.ops.push(format!("create {tag}#{}", self.next));
        self.next
    }

    fn create_text_instance(&mut self, text: &str) -> u32 {
        self.next += 1;
        self.ops.push(format!("create text#{} {text:?}", self.next));
        self.next
    }

    fn append_initial_child(&mut self, parent: &u32, child: &u32) {
        self.ops.push(format!("init {parent} <- {child}"));
    }

    fn prepare_update(&mut self, _: &u32, _: &'static str, old: &Props, new: &Props) -> Option<Props> {
        (old != new).then(|| new.clone())
    }

    fn commit_update(&mut self, instance: &u32, _: Props, tag: &'static str, _: &Props) {
        self.ops.push(format!("update {tag}#{instance}"));
    }

    fn commit_text_update(&mut self, instance: &u32, _: &str, new: &str) {
        self.ops.push(format!("text #{instance} {new:?}"));
    }

    fn reset_text_content(&mut self, instance: &u32) {
        self.ops.push(format!("reset #{instance}"));
    }

    fn append_child(&mut self, parent: &u32, child: &u32) {
        self.ops.push(format!("append {parent} <- {child}"));
    }

    fn insert_before(&mut self, parent: &u32, child: &u32, before: &u32) {
        self.ops.push(format!("insert {parent} <- {child} before {before}"));
    }

    fn remove_child(&mut self, parent: &u32, child: &u32) {
        self.ops.push(format!("remove {parent} -> {child}"));
    }

    fn hide_instance(&mut self, instance: &u32) {
        self.ops.push(format!("hide #{instance}"));
    }

    fn unhide_instance(&mut self, instance: &u32, _: &Props) {
        self.ops.push(format!("unhide #{instance}"));
    }

    fn hide_text_instance(&mut self, instance: &u32) {
        self.ops.push(format!("hide #{instance}"));
    }

    fn unhide_text_instance(&mut self, instance: &u32, _: &str) {
        self.ops.push(format!("unhide #{instance}"));
    }
}
