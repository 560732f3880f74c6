// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lanes: the priority and identity space for pending work.
//!
//! A [`Lanes`] value is a 31-bit set. Each bit is one *lane*; lower bits are
//! more urgent. Updates are tagged with exactly one lane, fibers and roots
//! accumulate the union of the lanes that touch them, and a render pass works
//! on a chosen subset.
//!
//! ```text
//!  bit  0      SYNC
//!  bit  1      INPUT_CONTINUOUS
//!  bit  2      DEFAULT
//!  bits 3..=18 TRANSITIONS (16 lanes, claimed round-robin)
//!  bits 19..=23 RETRIES   (5 lanes, claimed round-robin)
//!  bit  29     IDLE
//!  bit  30     OFFSCREEN
//! ```
//!
//! [`RootLanes`] holds the per-root bookkeeping (pending, suspended, pinged,
//! expired, entangled) and the selection rule that picks the next batch of
//! lanes to render.

use core::fmt;

use crate::scheduler::Priority;
use crate::time::{Duration, HostTime};

/// Number of lanes in a [`Lanes`] set.
pub const TOTAL_LANES: usize = 31;

/// How long a sync or input lane may wait before it is treated as expired.
const URGENT_EXPIRATION: Duration = Duration::from_millis(250);

/// How long default and transition lanes may wait before they expire.
const NORMAL_EXPIRATION: Duration = Duration::from_millis(5_000);

/// A set of lanes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Lanes(u32);

impl Lanes {
    /// The empty set.
    pub const NONE: Self = Self(0);
    /// Discrete input and forced synchronous work.
    pub const SYNC: Self = Self(1);
    /// Continuous input (pointer moves, scrolling).
    pub const INPUT_CONTINUOUS: Self = Self(1 << 1);
    /// Updates with no better classification.
    pub const DEFAULT: Self = Self(1 << 2);
    /// The first transition lane.
    pub const TRANSITION_1: Self = Self(1 << 3);
    /// All transition lanes.
    pub const TRANSITIONS: Self = Self(0xFFFF << 3);
    /// The first retry lane.
    pub const RETRY_1: Self = Self(1 << 19);
    /// All retry lanes.
    pub const RETRIES: Self = Self(0x1F << 19);
    /// Work that can wait until nothing else is pending.
    pub const IDLE: Self = Self(1 << 29);
    /// Work inside hidden subtrees.
    pub const OFFSCREEN: Self = Self(1 << 30);
    /// Every lane that is not idle or offscreen.
    pub const NON_IDLE: Self = Self((1 << 29) - 1);
    /// Lanes that render without yielding to the host.
    pub const BLOCKING: Self = Self(Self::SYNC.0 | Self::INPUT_CONTINUOUS.0 | Self::DEFAULT.0);
    /// Every lane.
    pub const ALL: Self = Self((1 << TOTAL_LANES) - 1);

    /// Creates a set from raw bits, discarding bits outside the lane range.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns whether the set is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set union.
    #[inline]
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set difference: `self` without any lane in `other`.
    #[inline]
    #[must_use]
    pub const fn remove(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Set intersection.
    #[inline]
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Returns whether `self` and `other` share at least one lane.
    #[inline]
    #[must_use]
    pub const fn includes_some(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns whether every lane of `self` is in `set`.
    ///
    /// The empty set is a subset of everything.
    #[inline]
    #[must_use]
    pub const fn is_subset_of(self, set: Self) -> bool {
        self.0 & set.0 == self.0
    }

    /// Returns the single most urgent lane, or the empty set.
    #[inline]
    #[must_use]
    pub const fn highest_priority(self) -> Self {
        Self(self.0 & self.0.wrapping_neg())
    }

    /// Picks one lane out of the set. The choice is deterministic.
    #[inline]
    #[must_use]
    pub const fn pick_arbitrary(self) -> Self {
        self.highest_priority()
    }

    /// Returns the index of the most urgent lane, if any.
    #[inline]
    #[must_use]
    pub const fn index(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// Iterates the lanes of the set from most to least urgent.
    #[inline]
    pub fn iter(self) -> impl Iterator<Item = Self> {
        let mut rest = self.0;
        core::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let lane = rest & rest.wrapping_neg();
            rest &= !lane;
            Some(Self(lane))
        })
    }

    /// Returns the group of lanes that should be rendered together with the
    /// most urgent lane of the set.
    ///
    /// Transitions are batched with every other pending transition, and
    /// retries with every other pending retry.
    #[must_use]
    pub const fn highest_priority_lanes(self) -> Self {
        let lane = self.highest_priority();
        if lane.includes_some(Self::TRANSITIONS) {
            self.intersect(Self::TRANSITIONS)
        } else if lane.includes_some(Self::RETRIES) {
            self.intersect(Self::RETRIES)
        } else if lane.is_empty() {
            self
        } else {
            lane
        }
    }

    /// Returns whether the set contains the sync lane.
    #[inline]
    #[must_use]
    pub const fn includes_sync(self) -> bool {
        self.includes_some(Self::SYNC)
    }

    /// Returns whether any lane in the set renders without time slicing.
    #[inline]
    #[must_use]
    pub const fn includes_blocking(self) -> bool {
        self.includes_some(Self::BLOCKING)
    }

    /// Returns whether the set is non-empty and made only of retry lanes.
    #[inline]
    #[must_use]
    pub const fn includes_only_retries(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::RETRIES)
    }

    /// Returns whether the set is non-empty and made only of transition lanes.
    #[inline]
    #[must_use]
    pub const fn includes_only_transitions(self) -> bool {
        !self.is_empty() && self.is_subset_of(Self::TRANSITIONS)
    }

    /// Returns a short label for the most urgent lane of the set.
    #[must_use]
    pub const fn label(self) -> &'static str {
        let lane = self.highest_priority();
        if lane.is_empty() {
            "none"
        } else if lane.0 == Self::SYNC.0 {
            "sync"
        } else if lane.0 == Self::INPUT_CONTINUOUS.0 {
            "input-continuous"
        } else if lane.0 == Self::DEFAULT.0 {
            "default"
        } else if lane.includes_some(Self::TRANSITIONS) {
            "transition"
        } else if lane.includes_some(Self::RETRIES) {
            "retry"
        } else if lane.0 == Self::IDLE.0 {
            "idle"
        } else {
            "offscreen"
        }
    }
}

impl fmt::Debug for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lanes({:#033b})", self.0)
    }
}

/// Returns the time at which a lane scheduled at `now` should be treated as
/// expired, or `None` for lanes that never expire.
#[must_use]
pub fn expiration_for(lane: Lanes, now: HostTime) -> Option<HostTime> {
    if lane.includes_some(Lanes::SYNC.merge(Lanes::INPUT_CONTINUOUS)) {
        Some(now.saturating_add(URGENT_EXPIRATION))
    } else if lane.includes_some(Lanes::DEFAULT.merge(Lanes::TRANSITIONS)) {
        Some(now.saturating_add(NORMAL_EXPIRATION))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Event priority
// ---------------------------------------------------------------------------

/// Priority class of the event that produced an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    /// Clicks, key presses and anything that must not be batched across.
    Discrete,
    /// Continuous input such as pointer moves.
    Continuous,
    /// Everything else.
    Default,
    /// Background work.
    Idle,
}

impl EventPriority {
    /// Returns the lane updates at this priority are assigned.
    #[must_use]
    pub const fn lane(self) -> Lanes {
        match self {
            Self::Discrete => Lanes::SYNC,
            Self::Continuous => Lanes::INPUT_CONTINUOUS,
            Self::Default => Lanes::DEFAULT,
            Self::Idle => Lanes::IDLE,
        }
    }

    /// Returns the event priority that covers the most urgent lane of
    /// `lanes`.
    #[must_use]
    pub const fn from_lanes(lanes: Lanes) -> Self {
        let lane = lanes.highest_priority().bits();
        if lane <= Lanes::SYNC.bits() {
            Self::Discrete
        } else if lane <= Lanes::INPUT_CONTINUOUS.bits() {
            Self::Continuous
        } else if lane & Lanes::NON_IDLE.bits() != 0 {
            Self::Default
        } else {
            Self::Idle
        }
    }

    /// Returns the less urgent of two priorities.
    #[must_use]
    pub fn lower(self, other: Self) -> Self {
        self.max(other)
    }

    /// Maps the event priority to the task scheduler's priority levels.
    #[must_use]
    pub const fn scheduler_priority(self) -> Priority {
        match self {
            Self::Discrete => Priority::Immediate,
            Self::Continuous => Priority::UserBlocking,
            Self::Default => Priority::Normal,
            Self::Idle => Priority::Idle,
        }
    }
}

/// Returns the event priority that covers the most urgent lane of `lanes`.
#[inline]
#[must_use]
pub const fn lanes_to_event_priority(lanes: Lanes) -> EventPriority {
    EventPriority::from_lanes(lanes)
}

// ---------------------------------------------------------------------------
// LaneMap
// ---------------------------------------------------------------------------

/// A value per lane.
#[derive(Clone, PartialEq, Eq)]
pub struct LaneMap<T> {
    slots: [T; TOTAL_LANES],
}

impl<T: Copy + Default> Default for LaneMap<T> {
    fn default() -> Self {
        Self {
            slots: [T::default(); TOTAL_LANES],
        }
    }
}

impl<T: Copy> LaneMap<T> {
    /// Creates a map with every slot set to `value`.
    #[must_use]
    pub fn filled(value: T) -> Self {
        Self {
            slots: [value; TOTAL_LANES],
        }
    }

    /// Returns the value of the most urgent lane of `lane`.
    ///
    /// # Panics
    ///
    /// Panics if `lane` is empty.
    #[must_use]
    pub fn get(&self, lane: Lanes) -> T {
        self.slots[slot(lane)]
    }

    /// Sets the value of the most urgent lane of `lane`.
    ///
    /// # Panics
    ///
    /// Panics if `lane` is empty.
    pub fn set(&mut self, lane: Lanes, value: T) {
        self.slots[slot(lane)] = value;
    }
}

impl<T: fmt::Debug> fmt::Debug for LaneMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.iter()).finish()
    }
}

fn slot(lane: Lanes) -> usize {
    match lane.index() {
        Some(i) => i,
        None => panic!("lane map accessed with an empty lane set"),
    }
}

// ---------------------------------------------------------------------------
// Lane allocation
// ---------------------------------------------------------------------------

/// Hands out transition and retry lanes round-robin, so that independent
/// transitions (or retries) can be tracked separately until they run out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaneAllocator {
    next_transition: Lanes,
    next_retry: Lanes,
}

impl Default for LaneAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl LaneAllocator {
    /// Creates an allocator starting at the first lane of each group.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_transition: Lanes::TRANSITION_1,
            next_retry: Lanes::RETRY_1,
        }
    }

    /// Claims the next transition lane.
    pub fn claim_next_transition_lane(&mut self) -> Lanes {
        let lane = self.next_transition;
        self.next_transition = Lanes(lane.0 << 1);
        if !self.next_transition.includes_some(Lanes::TRANSITIONS) {
            self.next_transition = Lanes::TRANSITION_1;
        }
        lane
    }

    /// Claims the next retry lane.
    pub fn claim_next_retry_lane(&mut self) -> Lanes {
        let lane = self.next_retry;
        self.next_retry = Lanes(lane.0 << 1);
        if !self.next_retry.includes_some(Lanes::RETRIES) {
            self.next_retry = Lanes::RETRY_1;
        }
        lane
    }
}

// ---------------------------------------------------------------------------
// RootLanes
// ---------------------------------------------------------------------------

/// Lane bookkeeping for one root.
#[derive(Clone, Debug, Default)]
pub struct RootLanes {
    pending: Lanes,
    suspended: Lanes,
    pinged: Lanes,
    expired: Lanes,
    entangled: Lanes,
    entanglements: LaneMap<Lanes>,
    event_times: LaneMap<Option<HostTime>>,
    expiration_times: LaneMap<Option<HostTime>>,
}

impl RootLanes {
    /// Lanes with work scheduled on the root.
    #[must_use]
    pub fn pending(&self) -> Lanes {
        self.pending
    }

    /// Pending lanes whose last attempt suspended without a ping since.
    #[must_use]
    pub fn suspended(&self) -> Lanes {
        self.suspended
    }

    /// Suspended lanes whose resource has since resolved.
    #[must_use]
    pub fn pinged(&self) -> Lanes {
        self.pinged
    }

    /// Lanes that waited past their expiration time.
    #[must_use]
    pub fn expired(&self) -> Lanes {
        self.expired
    }

    /// Lanes that have entanglement entries.
    #[must_use]
    pub fn entangled(&self) -> Lanes {
        self.entangled
    }

    /// Returns whether `lanes` includes an expired lane.
    #[must_use]
    pub fn includes_expired(&self, lanes: Lanes) -> bool {
        lanes.includes_some(self.expired)
    }

    /// Records a new update at `lane`.
    ///
    /// Any non-idle update unsuspends every lane: the new update may unblock
    /// work that previously suspended, so everything gets another attempt.
    pub fn mark_updated(&mut self, lane: Lanes, event_time: HostTime) {
        self.pending = self.pending.merge(lane);
        if lane != Lanes::IDLE {
            self.suspended = Lanes::NONE;
            self.pinged = Lanes::NONE;
        }
        if !lane.is_empty() {
            self.event_times.set(lane, Some(event_time));
        }
    }

    /// Records that an attempt at `lanes` suspended.
    pub fn mark_suspended(&mut self, lanes: Lanes) {
        let suspended = lanes.remove(self.pinged);
        self.suspended = self.suspended.merge(suspended);
        self.pinged = self.pinged.remove(suspended);
        for lane in suspended.iter() {
            self.expiration_times.set(lane, None);
        }
    }

    /// Records that a resource the suspended `lanes` waited on resolved.
    pub fn mark_pinged(&mut self, lanes: Lanes) {
        self.pinged = self.pinged.merge(self.suspended.intersect(lanes));
    }

    /// Records a commit; `remaining` are the lanes still pending afterwards.
    pub fn mark_finished(&mut self, remaining: Lanes) {
        let no_longer_pending = self.pending.remove(remaining);
        self.pending = remaining;
        self.suspended = Lanes::NONE;
        self.pinged = Lanes::NONE;
        self.expired = self.expired.intersect(remaining);
        self.entangled = self.entangled.intersect(remaining);
        for lane in no_longer_pending.iter() {
            self.entanglements.set(lane, Lanes::NONE);
            self.event_times.set(lane, None);
            self.expiration_times.set(lane, None);
        }
    }

    /// Forces `lanes` to be rendered together from now on.
    pub fn mark_entangled(&mut self, lanes: Lanes) {
        self.entangled = self.entangled.merge(lanes);
        for lane in self.entangled.iter() {
            let existing = self.entanglements.get(lane);
            if lane.includes_some(lanes) || existing.includes_some(lanes) {
                self.entanglements.set(lane, existing.merge(lanes));
            }
        }
    }

    /// Assigns expiration times to newly pending lanes and moves lanes past
    /// their expiration time into the expired set.
    pub fn mark_starved_as_expired(&mut self, now: HostTime) {
        for lane in self.pending.iter() {
            match self.expiration_times.get(lane) {
                None => {
                    if !lane.includes_some(self.suspended) || lane.includes_some(self.pinged) {
                        self.expiration_times.set(lane, expiration_for(lane, now));
                    }
                }
                Some(at) if at <= now => {
                    self.expired = self.expired.merge(lane);
                }
                Some(_) => {}
            }
        }
    }

    /// Picks the next batch of lanes to render.
    ///
    /// `wip_lanes` are the lanes of a render already in progress on this
    /// root. If the best candidate is not more urgent than that render, the
    /// render's lanes are returned so its progress is not thrown away.
    #[must_use]
    pub fn next_lanes(&self, wip_lanes: Lanes) -> Lanes {
        let pending = self.pending;
        if pending.is_empty() {
            return Lanes::NONE;
        }

        let non_idle = pending.intersect(Lanes::NON_IDLE);
        let mut next = if !non_idle.is_empty() {
            let unblocked = non_idle.remove(self.suspended);
            if !unblocked.is_empty() {
                unblocked.highest_priority_lanes()
            } else {
                non_idle.intersect(self.pinged).highest_priority_lanes()
            }
        } else {
            let unblocked = pending.remove(self.suspended);
            if !unblocked.is_empty() {
                unblocked.highest_priority_lanes()
            } else {
                self.pinged.highest_priority_lanes()
            }
        };

        if next.is_empty() {
            return Lanes::NONE;
        }

        if !wip_lanes.is_empty()
            && wip_lanes != next
            && !wip_lanes.includes_some(self.suspended)
        {
            let next_lane = next.highest_priority();
            let wip_lane = wip_lanes.highest_priority();
            if next_lane.bits() >= wip_lane.bits()
                || (next_lane == Lanes::DEFAULT && wip_lane.includes_some(Lanes::TRANSITIONS))
            {
                return wip_lanes;
            }
        }

        // Continuous input and default updates are flushed together so a
        // drag never renders an intermediate default state.
        if next.includes_some(Lanes::INPUT_CONTINUOUS) {
            next = next.merge(pending.intersect(Lanes::DEFAULT));
        }

        let mut entangled = next.intersect(self.entangled);
        while !entangled.is_empty() {
            let lane = entangled.highest_priority();
            next = next.merge(self.entanglements.get(lane));
            entangled = entangled.remove(lane);
        }
        next
    }

    /// Returns the lanes a synchronous retry should render after a
    /// concurrent render errored.
    #[must_use]
    pub fn lanes_to_retry_on_error(&self) -> Lanes {
        let everything_but_offscreen = self.pending.remove(Lanes::OFFSCREEN);
        if !everything_but_offscreen.is_empty() {
            everything_but_offscreen
        } else if self.pending.includes_some(Lanes::OFFSCREEN) {
            Lanes::OFFSCREEN
        } else {
            Lanes::NONE
        }
    }

    /// Returns the latest event time recorded for any lane of `lanes`.
    #[must_use]
    pub fn most_recent_event_time(&self, lanes: Lanes) -> HostTime {
        lanes
            .iter()
            .filter_map(|lane| self.event_times.get(lane))
            .max()
            .unwrap_or(HostTime::ZERO)
    }
}
