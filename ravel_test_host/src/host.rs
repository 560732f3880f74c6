// Copyright 2026 the Ravel Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory host tree that records every operation it receives.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;

use kurbo::Rect;
use ravel_core::element::{PropValue, Props};
use ravel_core::host::HostConfig;

/// Handle to a node of a [`TestHost`]. Node 0 is the container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The container every root of a [`Harness`](crate::Harness) renders into.
    pub const CONTAINER: Self = Self(0);
}

/// One call the engine made on the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostOp {
    /// A detached element node was created.
    Create {
        /// The new node.
        node: NodeId,
        /// Its tag.
        tag: &'static str,
    },
    /// A detached text node was created.
    CreateText {
        /// The new node.
        node: NodeId,
        /// Its text.
        text: String,
    },
    /// A child was appended to a node that is not attached yet.
    AppendInitial {
        /// The detached parent.
        parent: NodeId,
        /// The appended child.
        child: NodeId,
    },
    /// New props were applied to an element.
    Update {
        /// The updated node.
        node: NodeId,
    },
    /// A text node's content changed.
    UpdateText {
        /// The updated node.
        node: NodeId,
        /// Its new text.
        text: String,
    },
    /// An element's own text content was cleared.
    ResetText {
        /// The cleared node.
        node: NodeId,
    },
    /// A child was appended, or moved to the end.
    Append {
        /// The parent.
        parent: NodeId,
        /// The child.
        child: NodeId,
    },
    /// A child was inserted, or moved, before a sibling.
    Insert {
        /// The parent.
        parent: NodeId,
        /// The child.
        child: NodeId,
        /// The sibling it now precedes.
        before: NodeId,
    },
    /// A child was detached.
    Remove {
        /// The parent.
        parent: NodeId,
        /// The child.
        child: NodeId,
    },
    /// A node was hidden.
    Hide {
        /// The node.
        node: NodeId,
    },
    /// A hidden node was shown again.
    Unhide {
        /// The node.
        node: NodeId,
    },
}

impl HostOp {
    /// Whether the operation can change what is on screen.
    ///
    /// Creation and assembly of detached nodes are not mutations.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::Create { .. } | Self::CreateText { .. } | Self::AppendInitial { .. }
        )
    }
}

#[derive(Clone, Debug)]
enum NodeKind {
    Element { tag: &'static str, props: Props },
    Text(String),
}

#[derive(Clone, Debug)]
struct Node {
    kind: NodeKind,
    /// Text the element renders itself instead of children.
    content: Option<String>,
    children: Vec<NodeId>,
    hidden: bool,
}

/// A recording host.
///
/// Nodes live in a flat table indexed by [`NodeId`] and are never freed, so
/// ids stay unique for the life of the host. Element props are kept, which
/// lets [`measure`](HostConfig::measure) read `width` and `height`.
///
/// An element whose props carry a string `text` renders it as its own
/// content, the way a textarea would.
#[derive(Debug)]
pub struct TestHost {
    nodes: Vec<Node>,
    ops: Vec<HostOp>,
    immutable: Vec<&'static str>,
    in_commit: bool,
    commits: u32,
    outside_commit: u32,
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHost {
    /// Creates a host holding only the container node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: alloc::vec![Node {
                kind: NodeKind::Element {
                    tag: "root",
                    props: Props::new(),
                },
                content: None,
                children: Vec::new(),
                hidden: false,
            }],
            ops: Vec::new(),
            immutable: Vec::new(),
            in_commit: false,
            commits: 0,
            outside_commit: 0,
        }
    }

    /// Makes elements with these tags immutable: prop changes then replace
    /// the node instead of updating it.
    #[must_use]
    pub fn with_immutable_tags(mut self, tags: &[&'static str]) -> Self {
        self.immutable.extend_from_slice(tags);
        self
    }

    /// Every operation recorded since the last [`take_ops`](Self::take_ops).
    #[must_use]
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    /// Returns and clears the recorded operations.
    pub fn take_ops(&mut self) -> Vec<HostOp> {
        core::mem::take(&mut self.ops)
    }

    /// Recorded operations that change attached nodes.
    #[must_use]
    pub fn mutations(&self) -> Vec<HostOp> {
        self.ops.iter().filter(|op| op.is_mutation()).cloned().collect()
    }

    /// Number of commits the host has seen.
    #[must_use]
    pub fn commits(&self) -> u32 {
        self.commits
    }

    /// Number of mutations received outside a commit. Always zero for a
    /// correct engine.
    #[must_use]
    pub fn mutations_outside_commit(&self) -> u32 {
        self.outside_commit
    }

    /// Number of nodes created so far, the container included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Children of `node`, in order.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0 as usize)
            .map_or(&[], |n| n.children.as_slice())
    }

    /// Whether `node` is currently hidden.
    #[must_use]
    pub fn is_hidden(&self, node: NodeId) -> bool {
        self.nodes.get(node.0 as usize).is_some_and(|n| n.hidden)
    }

    /// Serializes the container's children.
    ///
    /// Elements print as `<tag name=value>children</tag>`, text as itself.
    /// Hidden elements carry a `hidden` marker and hidden text is wrapped in
    /// brackets.
    #[must_use]
    pub fn tree(&self) -> String {
        self.serialize(NodeId::CONTAINER)
    }

    /// Serializes the children of `node`.
    #[must_use]
    pub fn serialize(&self, node: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(node) {
            self.write_node(&mut out, child);
        }
        out
    }

    fn write_node(&self, out: &mut String, id: NodeId) {
        let Some(node) = self.nodes.get(id.0 as usize) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) if node.hidden => {
                let _ = write!(out, "[{text}]");
            }
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element { tag, props } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in props.iter() {
                    if name == "text" {
                        continue;
                    }
                    let _ = write!(out, " {name}=");
                    write_value(out, value);
                }
                if node.hidden {
                    out.push_str(" hidden");
                }
                out.push('>');
                if let Some(content) = &node.content {
                    out.push_str(content);
                }
                for &child in &node.children {
                    self.write_node(out, child);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    fn record(&mut self, op: HostOp) {
        if op.is_mutation() && !self.in_commit {
            self.outside_commit += 1;
        }
        self.ops.push(op);
    }

    fn push_node(&mut self, kind: NodeKind, content: Option<String>) -> NodeId {
        #[expect(clippy::cast_possible_truncation, reason = "test trees stay far below u32::MAX nodes")]
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            content,
            children: Vec::new(),
            hidden: false,
        });
        id
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize)
    }

    fn detach(&mut self, parent: NodeId, child: NodeId) {
        if let Some(p) = self.node_mut(parent) {
            p.children.retain(|c| *c != child);
        }
    }
}

fn write_value(out: &mut String, value: &PropValue) {
    let _ = match value {
        PropValue::Bool(b) => write!(out, "{b}"),
        PropValue::Int(n) => write!(out, "{n}"),
        PropValue::Float(f) => write!(out, "{f}"),
        PropValue::Str(s) => write!(out, "{s}"),
    };
}

fn own_text(props: &Props) -> Option<String> {
    props.str("text").map(String::from)
}

impl HostConfig for TestHost {
    type Instance = NodeId;
    type UpdatePayload = Props;

    fn create_instance(&mut self, tag: &'static str, props: &Props) -> NodeId {
        let node = self.push_node(
            NodeKind::Element {
                tag,
                props: props.clone(),
            },
            own_text(props),
        );
        self.record(HostOp::Create { node, tag });
        node
    }

    fn create_text_instance(&mut self, text: &str) -> NodeId {
        let node = self.push_node(NodeKind::Text(String::from(text)), None);
        self.record(HostOp::CreateText {
            node,
            text: String::from(text),
        });
        node
    }

    fn append_initial_child(&mut self, parent: &NodeId, child: &NodeId) {
        if let Some(p) = self.node_mut(*parent) {
            p.children.push(*child);
        }
        self.record(HostOp::AppendInitial {
            parent: *parent,
            child: *child,
        });
    }

    fn should_set_text_content(&self, _: &'static str, props: &Props) -> bool {
        props.str("text").is_some()
    }

    fn prepare_update(&mut self, _: &NodeId, _: &'static str, old: &Props, new: &Props) -> Option<Props> {
        (old != new).then(|| new.clone())
    }

    fn commit_update(&mut self, instance: &NodeId, payload: Props, _: &'static str, _: &Props) {
        if let Some(node) = self.node_mut(*instance) {
            node.content = own_text(&payload);
            if let NodeKind::Element { props, .. } = &mut node.kind {
                *props = payload;
            }
        }
        self.record(HostOp::Update { node: *instance });
    }

    fn commit_text_update(&mut self, instance: &NodeId, _: &str, new: &str) {
        if let Some(node) = self.node_mut(*instance) {
            node.kind = NodeKind::Text(String::from(new));
        }
        self.record(HostOp::UpdateText {
            node: *instance,
            text: String::from(new),
        });
    }

    fn reset_text_content(&mut self, instance: &NodeId) {
        if let Some(node) = self.node_mut(*instance) {
            node.content = None;
        }
        self.record(HostOp::ResetText { node: *instance });
    }

    fn append_child(&mut self, parent: &NodeId, child: &NodeId) {
        self.detach(*parent, *child);
        if let Some(p) = self.node_mut(*parent) {
            p.children.push(*child);
        }
        self.record(HostOp::Append {
            parent: *parent,
            child: *child,
        });
    }

    fn insert_before(&mut self, parent: &NodeId, child: &NodeId, before: &NodeId) {
        self.detach(*parent, *child);
        if let Some(p) = self.node_mut(*parent) {
            let at = p
                .children
                .iter()
                .position(|c| c == before)
                .unwrap_or(p.children.len());
            p.children.insert(at, *child);
        }
        self.record(HostOp::Insert {
            parent: *parent,
            child: *child,
            before: *before,
        });
    }

    fn remove_child(&mut self, parent: &NodeId, child: &NodeId) {
        self.detach(*parent, *child);
        self.record(HostOp::Remove {
            parent: *parent,
            child: *child,
        });
    }

    fn hide_instance(&mut self, instance: &NodeId) {
        if let Some(node) = self.node_mut(*instance) {
            node.hidden = true;
        }
        self.record(HostOp::Hide { node: *instance });
    }

    fn unhide_instance(&mut self, instance: &NodeId, _: &Props) {
        if let Some(node) = self.node_mut(*instance) {
            node.hidden = false;
        }
        self.record(HostOp::Unhide { node: *instance });
    }

    fn hide_text_instance(&mut self, instance: &NodeId) {
        self.hide_instance(instance);
    }

    fn unhide_text_instance(&mut self, instance: &NodeId, _: &str) {
        if let Some(node) = self.node_mut(*instance) {
            node.hidden = false;
        }
        self.record(HostOp::Unhide { node: *instance });
    }

    fn measure(&self, instance: &NodeId) -> Rect {
        let Some(Node {
            kind: NodeKind::Element { props, .. },
            ..
        }) = self.nodes.get(instance.0 as usize)
        else {
            return Rect::ZERO;
        };
        let dim = |name| props.int(name).unwrap_or(0) as f64;
        Rect::new(0.0, 0.0, dim("width"), dim("height"))
    }

    fn supports_mutation(&self, tag: &'static str) -> bool {
        !self.immutable.contains(&tag)
    }

    fn prepare_for_commit(&mut self, _: &NodeId) {
        self.in_commit = true;
        self.commits += 1;
    }

    fn reset_after_commit(&mut self, _: &NodeId) {
        self.in_commit = false;
    }
}

#[cfg(test)]
mod tests {
    use ravel_core::element::Props;
    use ravel_core::host::HostConfig;

    use super::{HostOp, NodeId, TestHost};

    #[test]
    fn moves_and_removals_keep_the_tree_consistent() {
        let mut host = TestHost::new();
        let a = host.create_text_instance("a");
        let b = host.create_text_instance("b");
        let c = host.create_text_instance("c");
        host.prepare_for_commit(&NodeId::CONTAINER);
        for node in [a, b, c] {
            host.append_child(&NodeId::CONTAINER, &node);
        }
        host.insert_before(&NodeId::CONTAINER, &c, &a);
        assert_eq!(host.tree(), "cab");
        host.append_child(&NodeId::CONTAINER, &c);
        host.remove_child(&NodeId::CONTAINER, &a);
        host.reset_after_commit(&NodeId::CONTAINER);
        assert_eq!(host.tree(), "bc");
        assert_eq!(host.mutations_outside_commit(), 0);
        assert_eq!(host.commits(), 1);
    }

    #[test]
    fn serializes_props_content_and_visibility() {
        let mut host = TestHost::new();
        let input = host.create_instance("input", &Props::new().with("text", "hi").with("size", 3));
        let label = host.create_text_instance("name");
        host.append_child(&NodeId::CONTAINER, &label);
        host.append_child(&NodeId::CONTAINER, &input);
        host.hide_text_instance(&label);
        host.hide_instance(&input);
        assert_eq!(host.tree(), "[name]<input size=3 hidden>hi</input>");
        assert_eq!(host.mutations_outside_commit(), 4, "no commit was open");
        host.reset_text_content(&input);
        host.unhide_instance(&input, &Props::new());
        assert_eq!(host.serialize(NodeId::CONTAINER), "[name]<input size=3></input>");
    }

    #[test]
    fn creation_is_not_a_mutation() {
        let mut host = TestHost::new();
        let div = host.create_instance("div", &Props::new());
        let text = host.create_text_instance("x");
        host.append_initial_child(&div, &text);
        assert!(host.mutations().is_empty());
        assert_eq!(host.ops()[2], HostOp::AppendInitial { parent: div, child: text });
        assert_eq!(host.mutations_outside_commit(), 0);
    }

    #[test]
    fn measures_width_and_height_props() {
        let mut host = TestHost::new();
        let div = host.create_instance("div", &Props::new().with("width", 30).with("height", 4));
        let rect = host.measure(&div);
        assert_eq!((rect.width(), rect.height()), (30.0, 4.0));
        assert_eq!(host.measure(&NodeId(99)).area(), 0.0);
    }
}
