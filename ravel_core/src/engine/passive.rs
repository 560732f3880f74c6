// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred passive effects.
//!
//! A commit with passive work leaves it pending and schedules a task for
//! it. The pending work is flushed by that task, or earlier, before the
//! next render or commit starts. Cleanups run for the whole tree before any
//! effect is created.

use alloc::vec::Vec;

use super::{Engine, child_ids};
use crate::fiber::{ExecutionContext, FiberId, FiberTag, Flags, RootId};
use crate::hooks::{EffectHook, EffectKind, Hook};
use crate::host::HostConfig;
use crate::lane::EventPriority;
use crate::trace::{PhaseBeginEvent, PhaseEndEvent, PhaseKind};

impl<H: HostConfig> Engine<H> {
    /// Runs pending passive effects. Returns whether there were any.
    pub(super) fn flush_passive_effects(&mut self) -> bool {
        let Some(pending) = self.pending_passive.take() else {
            return false;
        };
        if let Some(task) = self.passive_task.take() {
            self.scheduler.cancel_task(task);
        }
        let (root, lanes) = (pending.root, pending.lanes);

        let previous = self.shared.execution();
        self.shared
            .set_execution(previous | ExecutionContext::COMMIT);
        let priority = EventPriority::Default.lower(EventPriority::from_lanes(lanes));
        let previous_priority = self.shared.replace_update_priority(Some(priority));
        self.trace(|t, timestamp| {
            t.phase_begin(&PhaseBeginEvent {
                root,
                lanes,
                phase: PhaseKind::Passive,
                timestamp,
            });
        });

        self.commit_passive_unmount_effects(root, pending.finished);
        self.commit_passive_mount_effects(root, pending.finished);
        if self.config.strict_effects {
            self.double_invoke_new_effects(root, pending.finished);
        }

        self.trace(|t, timestamp| {
            t.phase_end(&PhaseEndEvent {
                root,
                lanes,
                phase: PhaseKind::Passive,
                timestamp,
            });
        });
        self.shared.replace_update_priority(previous_priority);
        self.shared.set_execution(previous);

        let scheduled = self.shared.has_inbox();
        self.drain_inbox();
        if scheduled {
            if self.root_with_passive_nested == Some(root) {
                self.nested_passive_count += 1;
            } else {
                self.nested_passive_count = 0;
                self.root_with_passive_nested = Some(root);
            }
        } else {
            self.nested_passive_count = 0;
        }

        self.flush_sync_queue();
        self.maybe_collect_garbage();
        true
    }

    fn commit_passive_unmount_effects(&mut self, root: RootId, fiber: FiberId) {
        if self.fibers[fiber].flags.contains(Flags::CHILD_DELETION) {
            let deletions = core::mem::take(&mut self.fibers[fiber].deletions);
            for deleted in deletions {
                let subtree: Vec<FiberId> = self.fibers.subtree(deleted).collect();
                for node in subtree {
                    for effect in passive_effects(&self.fibers[node].tag, self.fibers[node].state.hooks(), false) {
                        if let Err(error) = effect.run_destroy() {
                            self.capture_commit_phase_error(root, node, Some(fiber), error);
                        }
                    }
                }
            }
        }
        if self.fibers[fiber].subtree_flags.intersects(Flags::PASSIVE_MASK) {
            for child in child_ids(&self.fibers, fiber) {
                self.commit_passive_unmount_effects(root, child);
            }
        }
        if self.fibers[fiber].flags.contains(Flags::PASSIVE) {
            let f = &self.fibers[fiber];
            let parent = f.parent;
            for effect in passive_effects(&f.tag, f.state.hooks(), true) {
                if let Err(error) = effect.run_destroy() {
                    self.capture_commit_phase_error(root, fiber, parent, error);
                }
            }
        }
    }

    fn commit_passive_mount_effects(&mut self, root: RootId, fiber: FiberId) {
        if self.fibers[fiber].subtree_flags.contains(Flags::PASSIVE) {
            for child in child_ids(&self.fibers, fiber) {
                self.commit_passive_mount_effects(root, child);
            }
        }
        if self.fibers[fiber].flags.contains(Flags::PASSIVE) {
            let f = &self.fibers[fiber];
            let parent = f.parent;
            for effect in passive_effects(&f.tag, f.state.hooks(), true) {
                if let Err(error) = effect.run_create() {
                    self.capture_commit_phase_error(root, fiber, parent, error);
                }
            }
        }
    }

    /// Destroys and re-creates every effect of components mounted in this
    /// commit, so effects that do not clean up after themselves show up
    /// early.
    fn double_invoke_new_effects(&mut self, root: RootId, fiber: FiberId) {
        let mask = Flags::UPDATE | Flags::PASSIVE;
        if self.fibers[fiber].subtree_flags.intersects(mask) {
            for child in child_ids(&self.fibers, fiber) {
                self.double_invoke_new_effects(root, child);
            }
        }
        let f = &self.fibers[fiber];
        if !matches!(f.tag, FiberTag::Component(_)) || f.alternate.is_some() || !f.flags.intersects(mask) {
            return;
        }
        let parent = f.parent;
        let effects: Vec<EffectHook> = f
            .state
            .hooks()
            .iter()
            .filter_map(Hook::effect)
            .cloned()
            .collect();
        for effect in &effects {
            if let Err(error) = effect.run_destroy() {
                self.capture_commit_phase_error(root, fiber, parent, error);
            }
        }
        for kind in [EffectKind::Layout, EffectKind::Passive] {
            for effect in effects.iter().filter(|e| e.kind == kind) {
                if let Err(error) = effect.run_create() {
                    self.capture_commit_phase_error(root, fiber, parent, error);
                }
            }
        }
    }
}

/// Passive effects of a component fiber, only those due in this commit
/// when `due_only` is set.
fn passive_effects(tag: &FiberTag, hooks: &[Hook], due_only: bool) -> Vec<EffectHook> {
    if !matches!(tag, FiberTag::Component(_)) {
        return Vec::new();
    }
    hooks
        .iter()
        .filter_map(Hook::effect)
        .filter(|e| e.kind == EffectKind::Passive && (e.has_effect || !due_only))
        .cloned()
        .collect()
}
