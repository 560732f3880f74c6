// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The fiber graph.
//!
//! A *fiber* is one position in the component tree at one point in time.
//! Each fiber has:
//!
//! - An identity ([`FiberId`]), a generational handle that becomes stale when
//!   the fiber is released and its slot reused.
//! - Topology: `parent`, `child` and `sibling` links forming an ordered tree,
//!   plus `index`, the position among siblings at the last reconcile.
//! - An `alternate`: the fiber occupying the same position in the other
//!   buffer. The committed tree ("current") and the tree being built
//!   ("work in progress") share structure through this link; building reuses
//!   the alternate's slot instead of allocating.
//! - Inputs (`pending` for this render, `memoized` from the last completed
//!   one) and per-kind state (hooks, suspense state, boundary errors).
//! - Effect `flags` and the union of descendant flags, `subtree_flags`.
//! - Scheduling: `lanes` with pending work on the fiber itself and
//!   `child_lanes` for work somewhere below it.
//! - The host instance, when the fiber renders a host node.
//!
//! Fibers live in a [`FiberStore`] arena. Unreachable fibers are released
//! by a mark-and-sweep pass once no build session or deferred effect can
//! still refer to them.

mod flags;
mod id;
mod store;
mod traverse;

pub use flags::{ExecutionContext, Flags};
pub use id::{FiberId, RootId};
pub(crate) use store::FiberStore;

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use hashbrown::HashSet;
use kurbo::Rect;

use crate::element::{Component, Element, ElementKind, Key};
use crate::error::CapturedError;
use crate::hooks::store::StoreCheck;
use crate::hooks::queue::StateHook;
use crate::hooks::{Hook, InstanceId};
use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::wakeable::Wakeable;

/// What a fiber renders.
#[derive(Clone)]
pub(crate) enum FiberTag {
    /// The top of a root's tree; its state holds the rendered element.
    HostRoot,
    /// A function component.
    Component(Component),
    /// A host element.
    Host(&'static str),
    /// A host text node.
    Text,
    /// A list of children with no node of its own.
    Fragment,
    /// A suspense boundary.
    Suspense,
    /// The primary content of a suspense boundary, visible or hidden.
    Offscreen,
    /// An error boundary.
    ErrorBoundary,
}

impl FiberTag {
    /// Returns the tag a new fiber for `element` gets.
    pub(crate) fn for_element(element: &Element) -> Self {
        match element.kind() {
            ElementKind::Host(tag) => Self::Host(tag),
            ElementKind::Text(_) => Self::Text,
            ElementKind::Component(component) => Self::Component(component.clone()),
            ElementKind::Fragment => Self::Fragment,
            ElementKind::Suspense { .. } => Self::Suspense,
            ElementKind::ErrorBoundary { .. } => Self::ErrorBoundary,
        }
    }

    /// Returns whether a fiber with this tag can be reused for `element`.
    pub(crate) fn matches(&self, element: &Element) -> bool {
        match (self, element.kind()) {
            (Self::Host(a), ElementKind::Host(b)) => a == b,
            (Self::Text, ElementKind::Text(_))
            | (Self::Fragment, ElementKind::Fragment)
            | (Self::Suspense, ElementKind::Suspense { .. })
            | (Self::ErrorBoundary, ElementKind::ErrorBoundary { .. }) => true,
            (Self::Component(a), ElementKind::Component(b)) => a.same_type(b),
            _ => false,
        }
    }

    /// Name shown in component stacks, if the tag appears there.
    pub(crate) fn stack_name(&self) -> Option<&'static str> {
        match self {
            Self::Component(component) => Some(component.name()),
            Self::Host(tag) => Some(tag),
            Self::Suspense => Some("Suspense"),
            Self::ErrorBoundary => Some("ErrorBoundary"),
            Self::HostRoot | Self::Text | Self::Fragment | Self::Offscreen => None,
        }
    }

    /// Returns whether the tag owns a host instance.
    pub(crate) fn is_host(&self) -> bool {
        matches!(self, Self::Host(_) | Self::Text)
    }
}

impl fmt::Debug for FiberTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostRoot => f.write_str("HostRoot"),
            Self::Component(c) => write!(f, "Component({})", c.name()),
            Self::Host(tag) => write!(f, "Host({tag})"),
            Self::Text => f.write_str("Text"),
            Self::Fragment => f.write_str("Fragment"),
            Self::Suspense => f.write_str("Suspense"),
            Self::Offscreen => f.write_str("Offscreen"),
            Self::ErrorBoundary => f.write_str("ErrorBoundary"),
        }
    }
}

/// The input a fiber renders from.
#[derive(Clone, Debug, Default)]
pub(crate) enum FiberInput {
    /// Roots take their input from state.
    #[default]
    None,
    /// An element, for fibers created from one.
    Element(Element),
    /// A bare child list (suspense fallbacks).
    Children(Rc<[Element]>),
    /// Suspense primary content.
    Offscreen {
        /// Whether the content is hidden behind a fallback.
        hidden: bool,
        /// The boundary's children.
        children: Rc<[Element]>,
    },
}

impl FiberInput {
    /// Identity comparison used for bail-outs.
    pub(crate) fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Element(a), Self::Element(b)) => a.ptr_eq(b),
            (Self::Children(a), Self::Children(b)) => Rc::ptr_eq(a, b),
            (
                Self::Offscreen {
                    hidden: ha,
                    children: ca,
                },
                Self::Offscreen {
                    hidden: hb,
                    children: cb,
                },
            ) => ha == hb && Rc::ptr_eq(ca, cb),
            _ => false,
        }
    }

    pub(crate) fn element(&self) -> Option<&Element> {
        match self {
            Self::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Text of a text element, or empty.
    pub(crate) fn text(&self) -> &str {
        match self.element().map(Element::kind) {
            Some(ElementKind::Text(text)) => text,
            _ => "",
        }
    }

    /// Whether suspense primary content is hidden.
    pub(crate) fn is_hidden(&self) -> bool {
        matches!(self, Self::Offscreen { hidden: true, .. })
    }
}

/// Root fiber state.
#[derive(Clone, Debug)]
pub(crate) struct RootState {
    pub(crate) root: RootId,
    /// Holds an `Option<Element>`.
    pub(crate) element: StateHook,
}

/// Component fiber state.
#[derive(Clone, Debug)]
pub(crate) struct ComponentState {
    pub(crate) instance: InstanceId,
    pub(crate) hooks: Vec<Hook>,
}

/// Suspense boundary state.
#[derive(Clone, Debug, Default)]
pub(crate) struct SuspenseState {
    pub(crate) showing_fallback: bool,
    /// Wakeables thrown below this boundary in the current render; retry
    /// listeners are attached to them at commit.
    pub(crate) retry: Vec<Wakeable>,
    /// Keys of wakeables that already carry a retry listener. Shared by both
    /// buffers.
    pub(crate) retry_cache: Rc<RefCell<HashSet<usize>>>,
}

/// State of suspense primary content that is hidden behind a fallback.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct OffscreenState {
    /// Render lanes of the passes that hid the content. Revealing it
    /// renders the content at these lanes too, so updates that suspended
    /// are processed.
    pub(crate) base_lanes: Lanes,
}

/// A captured error waiting to be processed by a boundary.
#[derive(Clone, Debug)]
pub(crate) struct CapturedUpdate {
    pub(crate) lane: Lanes,
    pub(crate) error: CapturedError,
}

/// Error boundary state.
#[derive(Clone, Debug, Default)]
pub(crate) struct BoundaryState {
    /// Shared by both buffers, so commit-phase captures reach whichever
    /// fiber renders next.
    pub(crate) queue: Rc<RefCell<Vec<CapturedUpdate>>>,
    /// Errors thrown below the boundary in the current render.
    pub(crate) captured: Vec<CapturedError>,
    pub(crate) error: Option<CapturedError>,
    /// Errors to report to the observer in the layout pass.
    pub(crate) callbacks: Vec<CapturedError>,
}

/// Per-kind fiber state.
#[derive(Clone, Debug, Default)]
pub(crate) enum FiberState {
    #[default]
    None,
    Root(RootState),
    Component(ComponentState),
    Suspense(SuspenseState),
    Offscreen(OffscreenState),
    Boundary(BoundaryState),
}

impl FiberState {
    pub(crate) fn hooks(&self) -> &[Hook] {
        match self {
            Self::Component(state) => &state.hooks,
            _ => &[],
        }
    }

    pub(crate) fn suspense(&self) -> Option<&SuspenseState> {
        match self {
            Self::Suspense(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn suspense_mut(&mut self) -> Option<&mut SuspenseState> {
        match self {
            Self::Suspense(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn offscreen(&self) -> Option<OffscreenState> {
        match self {
            Self::Offscreen(state) => Some(*state),
            _ => None,
        }
    }

    pub(crate) fn boundary_mut(&mut self) -> Option<&mut BoundaryState> {
        match self {
            Self::Boundary(state) => Some(state),
            _ => None,
        }
    }
}

/// One node of the fiber graph.
pub(crate) struct Fiber<H: HostConfig> {
    // -- Identity --
    pub(crate) tag: FiberTag,
    pub(crate) key: Option<Key>,

    // -- Topology --
    pub(crate) parent: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) index: u32,
    pub(crate) alternate: Option<FiberId>,

    // -- Inputs and state --
    pub(crate) pending: FiberInput,
    pub(crate) memoized: FiberInput,
    pub(crate) state: FiberState,
    pub(crate) store_checks: Vec<StoreCheck>,

    // -- Effects --
    pub(crate) flags: Flags,
    pub(crate) subtree_flags: Flags,
    pub(crate) deletions: Vec<FiberId>,

    // -- Scheduling --
    pub(crate) lanes: Lanes,
    pub(crate) child_lanes: Lanes,

    // -- Host --
    pub(crate) instance: Option<H::Instance>,
    pub(crate) update_payload: Option<H::UpdatePayload>,
    /// New instance for a kind that cannot be updated in place.
    pub(crate) replacement: Option<H::Instance>,
    /// Bounds read before the mutation pass.
    pub(crate) snapshot: Option<Rect>,
}

impl<H: HostConfig> Fiber<H> {
    pub(crate) fn new(tag: FiberTag, key: Option<Key>, pending: FiberInput, lanes: Lanes) -> Self {
        Self {
            tag,
            key,
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            alternate: None,
            pending,
            memoized: FiberInput::None,
            state: FiberState::None,
            store_checks: Vec::new(),
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            deletions: Vec::new(),
            lanes,
            child_lanes: Lanes::NONE,
            instance: None,
            update_payload: None,
            replacement: None,
            snapshot: None,
        }
    }

    /// The element this fiber was last rendered from, falling back to the
    /// pending one.
    pub(crate) fn element(&self) -> Option<&Element> {
        self.memoized.element().or_else(|| self.pending.element())
    }
}

impl<H: HostConfig> fmt::Debug for Fiber<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("tag", &self.tag)
            .field("key", &self.key)
            .field("parent", &self.parent)
            .field("child", &self.child)
            .field("sibling", &self.sibling)
            .field("alternate", &self.alternate)
            .field("flags", &self.flags)
            .field("subtree_flags", &self.subtree_flags)
            .field("lanes", &self.lanes)
            .field("child_lanes", &self.child_lanes)
            .field("has_instance", &self.instance.is_some())
            .finish_non_exhaustive()
    }
}
