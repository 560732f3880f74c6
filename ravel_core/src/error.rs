// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy.
//!
//! Components fail with a [`Signal`]: either a thrown [`RenderError`] or a
//! suspension on a [`Wakeable`]. Thrown errors unwind to the nearest error
//! boundary, which receives a [`CapturedError`] carrying the component
//! stack. Errors that reach a root with no boundary, and engine-level
//! failures such as runaway update loops, surface as [`EngineError`].

use alloc::borrow::Cow;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use crate::fiber::RootId;
use crate::wakeable::Wakeable;

/// An error thrown while rendering or running an effect.
///
/// Cheap to clone; the underlying error is shared.
#[derive(Clone)]
pub struct RenderError(Rc<dyn core::error::Error>);

impl RenderError {
    /// Wraps any error value.
    pub fn new(error: impl core::error::Error + 'static) -> Self {
        Self(Rc::new(error))
    }

    /// Creates an error from a message.
    pub fn msg(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Returns the wrapped error as a concrete type, if it is one.
    #[must_use]
    pub fn downcast_ref<E: core::error::Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Returns whether both handles share the same underlying error.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RenderError({})", self.0)
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug)]
struct Message(Cow<'static, str>);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::error::Error for Message {}

/// A component scheduled more render-phase updates than the re-render
/// limit allows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TooManyReRenders {
    /// Name of the component.
    pub component: &'static str,
}

impl fmt::Display for TooManyReRenders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "too many re-renders in {}: render-phase updates must converge",
            self.component
        )
    }
}

impl core::error::Error for TooManyReRenders {}

/// A component suspended during a synchronous render with no boundary
/// above it to show a fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuspendedDuringSyncRender {
    /// Name of the component.
    pub component: &'static str,
}

impl fmt::Display for SuspendedDuringSyncRender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} suspended during a synchronous render with no suspense boundary above it",
            self.component
        )
    }
}

impl core::error::Error for SuspendedDuringSyncRender {}

/// Hooks were called in a different order than on the previous render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HookOrderMismatch {
    /// Name of the component.
    pub component: &'static str,
    /// Position of the offending hook call.
    pub index: usize,
}

impl fmt::Display for HookOrderMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hook {} in {} differs from the previous render",
            self.index, self.component
        )
    }
}

impl core::error::Error for HookOrderMismatch {}

/// How a component's render stopped early.
#[derive(Clone, Debug)]
pub enum Signal {
    /// The component failed.
    Thrown(RenderError),
    /// The component is waiting on an asynchronous resource.
    Suspended(Wakeable),
}

impl From<RenderError> for Signal {
    fn from(error: RenderError) -> Self {
        Self::Thrown(error)
    }
}

/// An error together with the components it unwound through.
#[derive(Clone, Debug)]
pub struct CapturedError {
    /// The thrown error.
    pub error: RenderError,
    /// Component names from the failing component outward.
    pub component_stack: Vec<&'static str>,
}

impl CapturedError {
    /// Captures an error with no stack.
    #[must_use]
    pub fn new(error: RenderError) -> Self {
        Self {
            error,
            component_stack: Vec::new(),
        }
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        for name in &self.component_stack {
            write!(f, "\n    in {name}")?;
        }
        Ok(())
    }
}

impl core::error::Error for CapturedError {}

/// Errors returned by engine entry points.
#[derive(Clone, Debug)]
pub enum EngineError {
    /// A render or commit error reached a root with no error boundary. The
    /// root's tree has been unmounted.
    Uncaught(CapturedError),
    /// Commits kept scheduling synchronous updates on the same root. Work on
    /// the root is halted until the next external update.
    MaximumUpdateDepthExceeded {
        /// The runaway root.
        root: RootId,
    },
    /// An entry point that requires an idle engine was called from inside a
    /// render or commit.
    AlreadyWorking,
    /// The root was never created or has been dropped.
    UnknownRoot(RootId),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncaught(captured) => write!(f, "uncaught render error: {captured}"),
            Self::MaximumUpdateDepthExceeded { root } => write!(
                f,
                "maximum update depth exceeded on {root:?}: a layout effect or passive effect \
                 keeps scheduling updates"
            ),
            Self::AlreadyWorking => f.write_str("engine is already rendering or committing"),
            Self::UnknownRoot(root) => write!(f, "unknown root {root:?}"),
        }
    }
}

impl core::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn render_error_downcasts() {
        let e = RenderError::new(TooManyReRenders { component: "Counter" });
        assert_eq!(
            e.downcast_ref::<TooManyReRenders>(),
            Some(&TooManyReRenders { component: "Counter" })
        );
        assert!(e.downcast_ref::<SuspendedDuringSyncRender>().is_none());
        assert!(e.ptr_eq(&e.clone()));
    }

    #[test]
    fn captured_error_lists_stack() {
        let captured = CapturedError {
            error: RenderError::msg("boom"),
            component_stack: alloc::vec!["Leaf", "App"],
        };
        assert_eq!(captured.to_string(), "boom\n    in Leaf\n    in App");
    }

    #[test]
    fn render_error_converts_to_signal() {
        fn fails() -> Result<(), Signal> {
            Err(RenderError::msg("nope"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(Signal::Thrown(e)) if e.to_string() == "nope"));
    }
}
