//! Arena-backed document tree.
//!
//! Nodes are owned by a [`NodeArena`] and addressed by [`NodeId`]; parent and
//! child links are indices into the arena. Moving a node between parents is
//! index surgery with detach-first semantics, so a node is reachable through
//! at most one parent at any time. Detached nodes stay allocated but are
//! invisible to every traversal, which all start from the root.

use std::sync::Arc;

use crate::registry::{NewlineMode, TagDef, TagFlags};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Text,
    Element,
    Paragraph,
}

/// Attribute list of an element.
///
/// Entries keep insertion order; a `None` value is a bare boolean attribute
/// (`[tag name]` as opposed to `[tag name=value]`). The default attribute
/// (`[tag=value]`) is stored under the key `"default"`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, Option<String>)>,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    /// The value of an attribute. `None` when the attribute is absent or is
    /// a bare boolean; use [`Attributes::contains`] to tell those apart.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn set(&mut self, name: &str, value: Option<String>) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == name) {
            entry.1 = value;
            return;
        }
        self.entries.push((name.to_string(), value));
    }

    /// Append to an attribute's value, creating it when absent.
    pub fn append_to(&mut self, name: &str, chunk: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == name) {
            entry.1.get_or_insert_with(String::new).push_str(chunk);
            return;
        }
        self.entries
            .push((name.to_string(), Some(chunk.to_string())));
    }
}

#[derive(Clone, Debug)]
pub struct TextData {
    pub content: String,
    pub newline_begin: NewlineMode,
    pub newline_end: NewlineMode,
}

#[derive(Clone, Debug)]
pub struct ElementData {
    /// Tag name as typed in the input; canonical casing lives in `code`.
    pub name: String,
    pub attributes: Attributes,
    /// Flags copied from the tag definition when the open tag resolved.
    /// Independently mutable afterwards.
    pub flags: TagFlags,
    /// Snapshot of the tag definition captured at open time.
    pub code: Option<Arc<TagDef>>,
    pub had_close_tag: bool,
    pub paragraph_handled: bool,
}

#[derive(Clone, Debug)]
pub enum NodeData {
    Root,
    Text(TextData),
    Element(ElementData),
    Paragraph,
}

#[derive(Clone, Debug)]
struct NodeEntry {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Byte offset in the source input, when known.
    occurred_at: Option<usize>,
    data: NodeData,
}

/// Tree queries used by the occurrence limiter and the transform passes.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Query<'a> {
    /// Elements whose flags request newline trimming around a tag boundary.
    NeedsNewlineFix,
    /// Elements whose flags request paragraph handling of their children.
    ParagraphsRequested,
    /// Paragraphs with no output-relevant content.
    EmptyParagraph,
    /// Elements drawing from the given occurrence budget.
    Occurrence(&'a str),
}

#[derive(Clone, Debug)]
pub struct NodeArena {
    nodes: Vec<NodeEntry>,
}

impl Default for NodeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeArena {
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeEntry {
                parent: None,
                children: Vec::new(),
                occurred_at: None,
                data: NodeData::Root,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn push(&mut self, entry: NodeEntry) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(entry);
        id
    }

    pub fn alloc_text(&mut self, content: String, occurred_at: Option<usize>) -> NodeId {
        self.push(NodeEntry {
            parent: None,
            children: Vec::new(),
            occurred_at,
            data: NodeData::Text(TextData {
                content,
                newline_begin: NewlineMode::Parse,
                newline_end: NewlineMode::Parse,
            }),
        })
    }

    pub fn alloc_element(&mut self, occurred_at: Option<usize>) -> NodeId {
        self.push(NodeEntry {
            parent: None,
            children: Vec::new(),
            occurred_at,
            data: NodeData::Element(ElementData {
                name: String::new(),
                attributes: Attributes::default(),
                flags: TagFlags::default(),
                code: None,
                had_close_tag: false,
                paragraph_handled: false,
            }),
        })
    }

    pub fn alloc_paragraph(&mut self) -> NodeId {
        self.push(NodeEntry {
            parent: None,
            children: Vec::new(),
            occurred_at: None,
            data: NodeData::Paragraph,
        })
    }

    /// Shallow copy of an element: same name, attributes, flags and
    /// definition snapshot, no parent, no children.
    pub(crate) fn duplicate_element(&mut self, id: NodeId) -> NodeId {
        let (data, occurred_at) = {
            let entry = &self.nodes[id.0 as usize];
            (entry.data.clone(), entry.occurred_at)
        };
        debug_assert!(matches!(data, NodeData::Element(_)));
        self.push(NodeEntry {
            parent: None,
            children: Vec::new(),
            occurred_at,
            data,
        })
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        match self.nodes[id.0 as usize].data {
            NodeData::Root => NodeKind::Root,
            NodeData::Text(_) => NodeKind::Text,
            NodeData::Element(_) => NodeKind::Element,
            NodeData::Paragraph => NodeKind::Paragraph,
        }
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0 as usize].data
    }

    pub fn data_mut(&mut self, id: NodeId) -> &mut NodeData {
        &mut self.nodes[id.0 as usize].data
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes[id.0 as usize].data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match &mut self.nodes[id.0 as usize].data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&TextData> {
        match &self.nodes[id.0 as usize].data {
            NodeData::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn text_mut(&mut self, id: NodeId) -> Option<&mut TextData> {
        match &mut self.nodes[id.0 as usize].data {
            NodeData::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0 as usize].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0 as usize].children
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0 as usize].children.first().copied()
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0 as usize].children.last().copied()
    }

    pub fn occurred_at(&self, id: NodeId) -> Option<usize> {
        self.nodes[id.0 as usize].occurred_at
    }

    /// Remove a node from its parent's child list. No-op when detached.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0 as usize].parent.take() else {
            return;
        };
        let siblings = &mut self.nodes[parent.0 as usize].children;
        if let Some(pos) = siblings.iter().position(|&c| c == id) {
            siblings.remove(pos);
        }
    }

    /// Append a node as the last child of `parent`, detaching it from any
    /// previous parent first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert_ne!(parent, child);
        self.detach(child);
        self.nodes[child.0 as usize].parent = Some(parent);
        self.nodes[parent.0 as usize].children.push(child);
    }

    /// Take all children of a node, leaving it childless. The returned nodes
    /// are fully detached.
    pub(crate) fn take_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = std::mem::take(&mut self.nodes[id.0 as usize].children);
        for &c in &children {
            self.nodes[c.0 as usize].parent = None;
        }
        children
    }

    pub(crate) fn has_paragraph_ancestor(&self, id: NodeId) -> bool {
        let mut cursor = self.parent(id);
        while let Some(node) = cursor {
            if self.kind(node) == NodeKind::Paragraph {
                return true;
            }
            cursor = self.parent(node);
        }
        false
    }

    /// Preorder collection of reachable nodes matching a query.
    pub(crate) fn collect(&self, query: &Query<'_>) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            if self.matches(query, id) {
                out.push(id);
            }
            for &c in self.children(id).iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    pub(crate) fn count(&self, query: &Query<'_>) -> usize {
        let mut n = 0;
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            if self.matches(query, id) {
                n += 1;
            }
            stack.extend_from_slice(self.children(id));
        }
        n
    }

    fn matches(&self, query: &Query<'_>, id: NodeId) -> bool {
        match query {
            Query::NeedsNewlineFix => match self.element(id) {
                Some(el) => {
                    el.flags.newline_open_before != NewlineMode::Parse
                        || el.flags.newline_open_after != NewlineMode::Parse
                        || (el.had_close_tag
                            && (el.flags.newline_close_before != NewlineMode::Parse
                                || el.flags.newline_close_after != NewlineMode::Parse))
                }
                None => false,
            },
            Query::ParagraphsRequested => {
                matches!(self.element(id), Some(el) if el.flags.paragraphs)
            }
            Query::EmptyParagraph => self.is_empty_paragraph(id),
            Query::Occurrence(occurrence_type) => matches!(
                self.element(id),
                Some(el) if el.flags.occurrence_type.as_deref() == Some(*occurrence_type)
            ),
        }
    }

    fn is_empty_paragraph(&self, id: NodeId) -> bool {
        if self.kind(id) != NodeKind::Paragraph {
            return false;
        }
        let children = self.children(id);
        if children.is_empty() {
            return true;
        }
        if children.len() > 1 {
            return false;
        }
        let Some(text) = self.text(children[0]) else {
            return false;
        };
        if text.content.is_empty() {
            return true;
        }
        // Anything longer than two bytes survives even after trimming one
        // newline at each end.
        if text.content.len() > 2 {
            return false;
        }
        let mut rest = text.content.as_str();
        if text.newline_begin != NewlineMode::Parse {
            rest = rest.strip_prefix('\n').unwrap_or(rest);
        }
        if text.newline_end != NewlineMode::Parse {
            rest = rest.strip_suffix('\n').unwrap_or(rest);
        }
        rest.is_empty()
    }

    fn position_in_parent(&self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.parent(id)?;
        let pos = self.children(parent).iter().position(|&c| c == id)?;
        Some((parent, pos))
    }

    /// First child, when it is a text node.
    pub(crate) fn first_child_if_text(&self, id: NodeId) -> Option<NodeId> {
        let first = self.first_child(id)?;
        (self.kind(first) == NodeKind::Text).then_some(first)
    }

    /// Last child when it is a text node and the element had an explicit
    /// close tag, otherwise the trailing text of a last-child element that
    /// itself had no close tag.
    pub(crate) fn last_child_if_text(&self, id: NodeId) -> Option<NodeId> {
        let last = self.last_child(id)?;
        let had_close_tag = matches!(self.element(id), Some(el) if el.had_close_tag);
        if self.kind(last) == NodeKind::Text {
            return had_close_tag.then_some(last);
        }
        match self.element(last) {
            Some(el) if !el.had_close_tag => self.trailing_text_descendant(last),
            _ => None,
        }
    }

    /// Descend through last children of elements that had no close tag and
    /// return the text node at the bottom, if any.
    fn trailing_text_descendant(&self, id: NodeId) -> Option<NodeId> {
        let last = self.last_child(id)?;
        if self.kind(last) == NodeKind::Text {
            return Some(last);
        }
        match self.element(last) {
            Some(el) if !el.had_close_tag => self.trailing_text_descendant(last),
            _ => None,
        }
    }

    /// The text node immediately before this element's open tag, walking
    /// into a preceding element's trailing text when that element had no
    /// explicit close tag.
    pub(crate) fn find_prev_adjacent_text(&self, id: NodeId) -> Option<NodeId> {
        let (parent, pos) = self.position_in_parent(id)?;
        if pos == 0 {
            return None;
        }
        let prev = self.children(parent)[pos - 1];
        if self.kind(prev) == NodeKind::Text {
            return Some(prev);
        }
        match self.element(prev) {
            Some(el) if !el.had_close_tag => self.trailing_text_descendant(prev),
            _ => None,
        }
    }

    /// The text node immediately after this element's close tag. Walks up
    /// through ancestors that had no close tag when this element is their
    /// last child.
    pub(crate) fn find_next_adjacent_text(&self, id: NodeId) -> Option<NodeId> {
        let had_close_tag = matches!(self.element(id), Some(el) if el.had_close_tag);
        if !had_close_tag {
            return None;
        }
        let (parent, pos) = self.position_in_parent(id)?;
        let siblings = self.children(parent);
        if pos < siblings.len() - 1 {
            let next = siblings[pos + 1];
            return (self.kind(next) == NodeKind::Text).then_some(next);
        }
        match self.element(parent) {
            Some(el) if !el.had_close_tag => self.find_next_adjacent_text(parent),
            _ => None,
        }
    }
}
