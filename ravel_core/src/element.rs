// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Element descriptions: the input the render phase reconciles.
//!
//! An [`Element`] is an immutable, shared description of one tree position:
//! a kind (host node, text, component, fragment, suspense boundary or error
//! boundary), an optional key, props and children. Elements compare by
//! pointer; reusing the same `Element` value across renders lets the engine
//! skip unchanged subtrees.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use kurbo::Rect;

use crate::error::{CapturedError, Signal};
use crate::hooks::RenderCx;

/// Reconciliation identity within a sibling list.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key(Rc<str>);

impl Key {
    /// Returns the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", &*self.0)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(Rc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(Rc::from(s))
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Self(Rc::from(alloc::format!("{n}")))
    }
}

/// A single prop value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    /// A flag.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A string.
    Str(Rc<str>),
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        Self::Str(Rc::from(v))
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        Self::Str(Rc::from(v))
    }
}

impl From<Rc<str>> for PropValue {
    fn from(v: Rc<str>) -> Self {
        Self::Str(v)
    }
}

/// Ordered name/value pairs handed to components and the host.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Props(Vec<(&'static str, PropValue)>);

impl Props {
    /// Empty props.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds or replaces a prop.
    #[must_use]
    pub fn with(mut self, name: &'static str, value: impl Into<PropValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Adds or replaces a prop in place.
    pub fn set(&mut self, name: &'static str, value: impl Into<PropValue>) {
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Looks up a prop.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Looks up an integer prop.
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(PropValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Looks up a string prop.
    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(PropValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Looks up a boolean prop.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(PropValue::Bool(true)))
    }

    /// Iterates the props in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &PropValue)> {
        self.0.iter().map(|(n, v)| (*n, v))
    }

    /// Returns whether there are no props.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

type RenderFn = dyn Fn(&mut RenderCx<'_>, &Props) -> Result<Vec<Element>, Signal>;

/// A named render function.
///
/// Two components are the same type only if they share the same render
/// function allocation; clone a `Component` to reuse it.
#[derive(Clone)]
pub struct Component {
    name: &'static str,
    render: Rc<RenderFn>,
}

impl Component {
    /// Creates a component.
    pub fn new(
        name: &'static str,
        render: impl Fn(&mut RenderCx<'_>, &Props) -> Result<Vec<Element>, Signal> + 'static,
    ) -> Self {
        Self {
            name,
            render: Rc::new(render),
        }
    }

    /// The component's display name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns whether both handles are the same component type.
    #[must_use]
    pub fn same_type(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.render, &other.render)
    }

    pub(crate) fn render(
        &self,
        cx: &mut RenderCx<'_>,
        props: &Props,
    ) -> Result<Vec<Element>, Signal> {
        (self.render)(cx, props)
    }

    /// Creates an element of this component.
    #[must_use]
    pub fn element(&self, props: Props) -> Element {
        Element::new(ElementKind::Component(self.clone()), props, Vec::new())
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.name)
    }
}

/// Called with the host instance when it attaches (`Some`) and detaches
/// (`None`).
pub type RefCallback = Rc<dyn Fn(Option<&dyn Any>)>;

/// Called in the layout pass with the bounds measured before the mutation
/// pass and the bounds after it.
pub type MeasureCallback = Rc<dyn Fn(Rect, Rect)>;

/// Renders an error boundary's fallback.
pub type BoundaryFallback = Rc<dyn Fn(&CapturedError) -> Vec<Element>>;

/// Observes errors captured by an error boundary.
pub type BoundaryObserver = Rc<dyn Fn(&CapturedError)>;

/// The kind of an element.
#[derive(Clone)]
pub enum ElementKind {
    /// A host node with the given tag.
    Host(&'static str),
    /// A host text node.
    Text(Rc<str>),
    /// A component.
    Component(Component),
    /// A transparent list of children.
    Fragment,
    /// Shows `fallback` while any child suspends.
    Suspense {
        /// Shown in place of the children while they suspend.
        fallback: Rc<[Element]>,
    },
    /// Renders `fallback` instead of children that threw.
    ErrorBoundary {
        /// Produces the replacement children.
        fallback: BoundaryFallback,
        /// Called in the layout pass for each captured error.
        on_error: Option<BoundaryObserver>,
    },
}

impl fmt::Debug for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(tag) => write!(f, "Host({tag})"),
            Self::Text(text) => write!(f, "Text({text:?})"),
            Self::Component(c) => write!(f, "{c:?}"),
            Self::Fragment => f.write_str("Fragment"),
            Self::Suspense { fallback } => write!(f, "Suspense(fallback: {})", fallback.len()),
            Self::ErrorBoundary { .. } => f.write_str("ErrorBoundary"),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ElementNode {
    pub(crate) kind: ElementKind,
    pub(crate) key: Option<Key>,
    pub(crate) props: Props,
    pub(crate) children: Rc<[Element]>,
    pub(crate) ref_callback: Option<RefCallback>,
    pub(crate) on_measure: Option<MeasureCallback>,
}

/// An immutable, shared element.
#[derive(Clone)]
pub struct Element(Rc<ElementNode>);

impl Element {
    fn new(kind: ElementKind, props: Props, children: Vec<Element>) -> Self {
        Self(Rc::new(ElementNode {
            kind,
            key: None,
            props,
            children: children.into(),
            ref_callback: None,
            on_measure: None,
        }))
    }

    /// A host node.
    #[must_use]
    pub fn host(tag: &'static str, props: Props, children: Vec<Self>) -> Self {
        Self::new(ElementKind::Host(tag), props, children)
    }

    /// A text node.
    #[must_use]
    pub fn text(text: impl Into<Rc<str>>) -> Self {
        Self::new(ElementKind::Text(text.into()), Props::new(), Vec::new())
    }

    /// A fragment.
    #[must_use]
    pub fn fragment(children: Vec<Self>) -> Self {
        Self::new(ElementKind::Fragment, Props::new(), children)
    }

    /// A suspense boundary.
    #[must_use]
    pub fn suspense(fallback: Vec<Self>, children: Vec<Self>) -> Self {
        Self::new(
            ElementKind::Suspense {
                fallback: fallback.into(),
            },
            Props::new(),
            children,
        )
    }

    /// An error boundary.
    #[must_use]
    pub fn error_boundary(
        fallback: impl Fn(&CapturedError) -> Vec<Self> + 'static,
        children: Vec<Self>,
    ) -> Self {
        Self::new(
            ElementKind::ErrorBoundary {
                fallback: Rc::new(fallback),
                on_error: None,
            },
            Props::new(),
            children,
        )
    }

    fn edit(mut self, f: impl FnOnce(&mut ElementNode)) -> Self {
        f(Rc::make_mut(&mut self.0));
        self
    }

    /// Sets the key.
    #[must_use]
    pub fn with_key(self, key: impl Into<Key>) -> Self {
        let key = key.into();
        self.edit(|n| n.key = Some(key))
    }

    /// Sets a ref callback. Only host and text elements attach refs.
    #[must_use]
    pub fn with_ref(self, callback: impl Fn(Option<&dyn Any>) + 'static) -> Self {
        let callback: RefCallback = Rc::new(callback);
        self.edit(|n| n.ref_callback = Some(callback))
    }

    /// Sets a measure callback. Only host elements are measured.
    #[must_use]
    pub fn on_measure(self, callback: impl Fn(Rect, Rect) + 'static) -> Self {
        let callback: MeasureCallback = Rc::new(callback);
        self.edit(|n| n.on_measure = Some(callback))
    }

    /// Sets the error observer of an error boundary. Other kinds ignore it.
    #[must_use]
    pub fn on_error(self, observer: impl Fn(&CapturedError) + 'static) -> Self {
        let observer: BoundaryObserver = Rc::new(observer);
        self.edit(|n| {
            if let ElementKind::ErrorBoundary { on_error, .. } = &mut n.kind {
                *on_error = Some(observer);
            }
        })
    }

    /// The element's kind.
    #[must_use]
    pub fn kind(&self) -> &ElementKind {
        &self.0.kind
    }

    /// The element's key.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        self.0.key.as_ref()
    }

    /// The element's props.
    #[must_use]
    pub fn props(&self) -> &Props {
        &self.0.props
    }

    /// The element's children.
    #[must_use]
    pub fn children(&self) -> &Rc<[Self]> {
        &self.0.children
    }

    pub(crate) fn ref_callback(&self) -> Option<&RefCallback> {
        self.0.ref_callback.as_ref()
    }

    pub(crate) fn measure_callback(&self) -> Option<&MeasureCallback> {
        self.0.on_measure.as_ref()
    }

    /// Returns whether both handles are the same element.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Returns whether `other` can update the fiber created for `self`:
    /// same kind and, for hosts and components, the same type.
    #[must_use]
    pub fn same_type(&self, other: &Self) -> bool {
        match (&self.0.kind, &other.0.kind) {
            (ElementKind::Host(a), ElementKind::Host(b)) => a == b,
            (ElementKind::Text(_), ElementKind::Text(_))
            | (ElementKind::Fragment, ElementKind::Fragment)
            | (ElementKind::Suspense { .. }, ElementKind::Suspense { .. })
            | (ElementKind::ErrorBoundary { .. }, ElementKind::ErrorBoundary { .. }) => true,
            (ElementKind::Component(a), ElementKind::Component(b)) => a.same_type(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Element");
        d.field("kind", &self.0.kind);
        if let Some(key) = &self.0.key {
            d.field("key", key);
        }
        if !self.0.props.is_empty() {
            d.field("props", &self.0.props);
        }
        if !self.0.children.is_empty() {
            d.field("children", &self.0.children.len());
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn props_replace_in_place() {
        let props = Props::new().with("a", 1).with("b", "x").with("a", 2);
        assert_eq!(props.int("a"), Some(2));
        assert_eq!(props.str("b"), Some("x"));
        assert_eq!(props.iter().count(), 2);
        assert!(!props.flag("missing"));
    }

    #[test]
    fn builders_keep_other_fields() {
        let e = Element::host("div", Props::new().with("id", 1), vec![Element::text("hi")])
            .with_key("k");
        assert_eq!(e.key().map(Key::as_str), Some("k"));
        assert_eq!(e.props().int("id"), Some(1));
        assert_eq!(e.children().len(), 1);
    }

    #[test]
    fn same_type_compares_tags_and_components() {
        let a = Component::new("A", |_, _| Ok(Vec::new()));
        let b = Component::new("A", |_, _| Ok(Vec::new()));
        assert!(a.element(Props::new()).same_type(&a.element(Props::new())));
        assert!(
            !a.element(Props::new()).same_type(&b.element(Props::new())),
            "same name is not the same type"
        );
        assert!(Element::host("div", Props::new(), vec![])
            .same_type(&Element::host("div", Props::new(), vec![])));
        assert!(!Element::host("div", Props::new(), vec![])
            .same_type(&Element::host("span", Props::new(), vec![])));
        assert!(Element::text("a").same_type(&Element::text("b")));
    }

    #[test]
    fn clones_share_identity() {
        let e = Element::text("x");
        assert!(e.ptr_eq(&e.clone()));
        assert!(!e.ptr_eq(&Element::text("x")));
    }

    #[test]
    fn on_error_only_applies_to_boundaries() {
        let b = Element::error_boundary(|_| Vec::new(), vec![]).on_error(|_| {});
        assert!(matches!(
            b.kind(),
            ElementKind::ErrorBoundary {
                on_error: Some(_),
                ..
            }
        ));
        let h = Element::host("div", Props::new(), vec![]).on_error(|_| {});
        assert!(matches!(h.kind(), ElementKind::Host("div")));
    }
}
