// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host renderer contract.
//!
//! The engine never touches a concrete UI tree. Everything it does to the
//! host goes through a [`HostConfig`] implementation:
//!
//! - **Render phase** (interruptible): only *detached* work: creating
//!   instances, appending initial children to instances that are not yet
//!   attached, and diffing props into an update payload. Nothing visible
//!   changes, so a render can be thrown away at any point.
//!
//! - **Commit phase** (uninterruptible): everything visible: attaching,
//!   moving and removing instances, applying payloads, text updates and
//!   visibility toggles, bracketed by [`prepare_for_commit`] and
//!   [`reset_after_commit`].
//!
//! Hosts whose node kinds cannot be mutated in place report it through
//! [`supports_mutation`]. For such tags the engine builds a fresh instance
//! during render, then in the commit moves the old instance's children into
//! it and swaps it into the old position.
//!
//! [`prepare_for_commit`]: HostConfig::prepare_for_commit
//! [`reset_after_commit`]: HostConfig::reset_after_commit
//! [`supports_mutation`]: HostConfig::supports_mutation

use kurbo::Rect;

use crate::element::Props;

/// Operations the engine performs on the host tree.
///
/// Text instances and element instances share the `Instance` type; the root
/// container passed to [`Engine::create_root`] is an instance as well.
///
/// [`Engine::create_root`]: crate::engine::Engine::create_root
pub trait HostConfig {
    /// Handle to a host node.
    type Instance: Clone + 'static;
    /// Diff computed during render and applied during commit.
    type UpdatePayload: 'static;

    /// Creates a detached element instance.
    fn create_instance(&mut self, tag: &'static str, props: &Props) -> Self::Instance;

    /// Creates a detached text instance.
    fn create_text_instance(&mut self, text: &str) -> Self::Instance;

    /// Appends `child` to a parent that is not yet attached to the tree.
    fn append_initial_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    /// Returns whether the element manages its own text content from props,
    /// in which case the engine does not reconcile its children.
    fn should_set_text_content(&self, tag: &'static str, props: &Props) -> bool {
        _ = (tag, props);
        false
    }

    /// Diffs `old` against `new`. `None` means nothing to apply.
    fn prepare_update(
        &mut self,
        instance: &Self::Instance,
        tag: &'static str,
        old: &Props,
        new: &Props,
    ) -> Option<Self::UpdatePayload>;

    /// Applies a payload produced by [`prepare_update`](Self::prepare_update).
    fn commit_update(
        &mut self,
        instance: &Self::Instance,
        payload: Self::UpdatePayload,
        tag: &'static str,
        new: &Props,
    );

    /// Replaces the text of a text instance.
    fn commit_text_update(&mut self, instance: &Self::Instance, old: &str, new: &str);

    /// Clears text content set through props before children are inserted.
    fn reset_text_content(&mut self, instance: &Self::Instance);

    /// Appends `child` as the last child of an attached `parent`. Moves it if
    /// it is already a child.
    fn append_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    /// Inserts `child` before `before`. Moves it if it is already a child.
    fn insert_before(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
        before: &Self::Instance,
    );

    /// Removes `child` from `parent`.
    fn remove_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    /// Hides an element instance without removing it.
    fn hide_instance(&mut self, instance: &Self::Instance);

    /// Reverses [`hide_instance`](Self::hide_instance).
    fn unhide_instance(&mut self, instance: &Self::Instance, props: &Props);

    /// Hides a text instance without removing it.
    fn hide_text_instance(&mut self, instance: &Self::Instance);

    /// Reverses [`hide_text_instance`](Self::hide_text_instance).
    fn unhide_text_instance(&mut self, instance: &Self::Instance, text: &str);

    /// Reads an instance's bounds. Called before the mutation pass for
    /// snapshot reads and after it for measure callbacks.
    fn measure(&self, instance: &Self::Instance) -> Rect {
        _ = instance;
        Rect::ZERO
    }

    /// Returns whether instances of `tag` can be updated in place.
    fn supports_mutation(&self, tag: &'static str) -> bool {
        _ = tag;
        true
    }

    /// Called before the first mutation of a commit.
    fn prepare_for_commit(&mut self, container: &Self::Instance) {
        _ = container;
    }

    /// Called after the last mutation of a commit.
    fn reset_after_commit(&mut self, container: &Self::Instance) {
        _ = container;
    }
}
