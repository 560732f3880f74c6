// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Effect flags and the engine execution context.

use bitflags::bitflags;

bitflags! {
    /// Side effects recorded on a fiber during render and consumed by the
    /// commit passes.
    ///
    /// `flags` describes the fiber itself; `subtree_flags` is the union of
    /// `flags` over all descendants, bubbled up in complete so the commit
    /// passes can skip clean subtrees.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u32 {
        // === Mutation ===

        /// Insert (or move) the fiber's host nodes.
        const PLACEMENT = 1 << 0;
        /// Apply a props or text update, or run layout effects.
        const UPDATE = 1 << 1;
        /// `deletions` lists children to remove.
        const CHILD_DELETION = 1 << 2;
        /// Clear text content set through props.
        const CONTENT_RESET = 1 << 3;
        /// Detach the old ref callback and attach the new one.
        const REF = 1 << 4;
        /// Toggle visibility of an offscreen subtree.
        const VISIBILITY = 1 << 5;

        // === Before mutation / layout ===

        /// Measure the host node before mutations.
        const SNAPSHOT = 1 << 6;
        /// Invoke post-mutation callbacks (measure, boundary observers).
        const CALLBACK = 1 << 7;

        // === Passive ===

        /// Run passive effects.
        const PASSIVE = 1 << 8;

        // === Render bookkeeping ===

        /// An external store was read in a time-sliced render and must be
        /// re-checked before commit.
        const STORE_CONSISTENCY = 1 << 9;
        /// The fiber threw and did not complete.
        const INCOMPLETE = 1 << 10;
        /// A boundary that should catch the current throw.
        const SHOULD_CAPTURE = 1 << 11;
        /// A boundary re-rendering after catching a throw.
        const DID_CAPTURE = 1 << 12;

        // === Masks ===

        /// Work for the before-mutation pass.
        const BEFORE_MUTATION_MASK = Self::SNAPSHOT.bits() | Self::UPDATE.bits();
        /// Work for the mutation pass.
        const MUTATION_MASK = Self::PLACEMENT.bits()
            | Self::UPDATE.bits()
            | Self::CHILD_DELETION.bits()
            | Self::CONTENT_RESET.bits()
            | Self::REF.bits()
            | Self::VISIBILITY.bits();
        /// Work for the layout pass.
        const LAYOUT_MASK = Self::UPDATE.bits()
            | Self::CALLBACK.bits()
            | Self::REF.bits()
            | Self::VISIBILITY.bits();
        /// Work for the deferred passive pass.
        const PASSIVE_MASK = Self::PASSIVE.bits() | Self::CHILD_DELETION.bits();
        /// Flags that survive an unwind into a capturing boundary.
        const HOST_EFFECT_MASK = (1 << 10) - 1;
    }
}

bitflags! {
    /// What the engine is doing right now. Entry points consult this to
    /// decide whether work may start, and setters to pick a lane.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExecutionContext: u8 {
        /// Inside [`Engine::batched_updates`](crate::engine::Engine::batched_updates).
        const BATCHED = 1 << 0;
        /// Building a work-in-progress tree.
        const RENDER = 1 << 1;
        /// Applying a finished tree, or flushing passive effects.
        const COMMIT = 1 << 2;
    }
}

impl ExecutionContext {
    /// Returns whether a render or commit is running.
    #[inline]
    #[must_use]
    pub const fn is_working(self) -> bool {
        self.intersects(Self::RENDER.union(Self::COMMIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_partition_the_commit_passes() {
        assert!(Flags::MUTATION_MASK.contains(Flags::PLACEMENT));
        assert!(!Flags::MUTATION_MASK.contains(Flags::PASSIVE));
        assert!(Flags::PASSIVE_MASK.contains(Flags::CHILD_DELETION));
        assert!(Flags::LAYOUT_MASK.contains(Flags::CALLBACK));
        assert!(Flags::BEFORE_MUTATION_MASK.contains(Flags::SNAPSHOT));
    }

    #[test]
    fn host_effect_mask_drops_unwind_bookkeeping() {
        let f = Flags::PLACEMENT | Flags::INCOMPLETE | Flags::SHOULD_CAPTURE | Flags::PASSIVE;
        let kept = f & Flags::HOST_EFFECT_MASK;
        assert_eq!(kept, Flags::PLACEMENT | Flags::PASSIVE);
    }

    #[test]
    fn working_context() {
        assert!(!ExecutionContext::BATCHED.is_working());
        assert!((ExecutionContext::BATCHED | ExecutionContext::COMMIT).is_working());
    }
}
