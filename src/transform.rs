//! Tree rewrite passes between parsing and rendering.
//!
//! Three ordered passes over the finished tree:
//!
//! 1. newline propagation: elements whose flags trim a newline around a tag
//!    boundary mark the nearest adjacent text node;
//! 2. paragraph handling: children of the root (when enabled) and of every
//!    element that requests it are split at the detect string and grouped
//!    into paragraph wrappers;
//! 3. pruning: paragraphs left without output-relevant content are removed.
//!
//! The whole stage is idempotent; running it again on an already transformed
//! tree changes nothing.

use crate::registry::{NewlineMode, ParagraphType};
use crate::tree::{NodeArena, NodeId, NodeKind, Query};
use crate::Parser;

pub(crate) fn run(parser: &Parser, arena: &mut NodeArena) {
    propagate_newline_modes(arena);
    let detect = parser.config.paragraphs.detect.clone();
    if parser.config.root_paragraph_handling {
        handle_paragraphs(arena, arena.root(), &detect);
    }
    for id in arena.collect(&Query::ParagraphsRequested) {
        handle_paragraphs(arena, id, &detect);
    }
    prune_empty_paragraphs(arena);
}

/// Move per-element newline directives onto the adjacent text nodes.
fn propagate_newline_modes(arena: &mut NodeArena) {
    for id in arena.collect(&Query::NeedsNewlineFix) {
        let Some(el) = arena.element(id) else {
            continue;
        };
        let flags = el.flags.clone();
        if flags.newline_open_before != NewlineMode::Parse {
            if let Some(target) = arena.find_prev_adjacent_text(id) {
                if let Some(text) = arena.text_mut(target) {
                    text.newline_end = flags.newline_open_before;
                }
            }
        }
        if flags.newline_open_after != NewlineMode::Parse {
            if let Some(target) = arena.first_child_if_text(id) {
                if let Some(text) = arena.text_mut(target) {
                    text.newline_begin = flags.newline_open_after;
                }
            }
        }
        if flags.newline_close_before != NewlineMode::Parse {
            if let Some(target) = arena.last_child_if_text(id) {
                if let Some(text) = arena.text_mut(target) {
                    text.newline_end = flags.newline_close_before;
                }
            }
        }
        if flags.newline_close_after != NewlineMode::Parse {
            if let Some(target) = arena.find_next_adjacent_text(id) {
                if let Some(text) = arena.text_mut(target) {
                    text.newline_begin = flags.newline_close_after;
                }
            }
        }
    }
}

/// Split a node's children at the detect string and group the fragments
/// into paragraph wrappers.
fn handle_paragraphs(arena: &mut NodeArena, node: NodeId, detect: &str) {
    // Subtrees already inside a paragraph are never re-handled.
    if arena.has_paragraph_ancestor(node) {
        return;
    }
    log::trace!(target: "bbmark.transform", "paragraph handling");
    let children = arena.take_children(node);
    let mut dest: Vec<NodeId> = Vec::new();
    let mut paragraph: Option<NodeId> = None;
    let mut last_was_paragraph = false;
    let mut prev_kind = NodeKind::Text;
    for child in children {
        let fragments = break_up_node(arena, child, detect);
        for (i, fragment) in fragments.into_iter().enumerate() {
            let kind = arena.kind(fragment);
            if kind == NodeKind::Paragraph {
                // Already-wrapped content passes through untouched.
                dest.push(fragment);
                paragraph = None;
                last_was_paragraph = true;
                prev_kind = kind;
                continue;
            }
            // A fresh paragraph starts after a non-paragraph fragment, and
            // between same-kind fragments, except when two elements meet at
            // a child boundary (adjacent tags stay in one paragraph while
            // split-off fragments do not).
            if !last_was_paragraph || (prev_kind == kind && (i != 0 || prev_kind != NodeKind::Element))
            {
                paragraph = None;
            }
            prev_kind = kind;
            let is_block = matches!(
                arena.element(fragment),
                Some(el) if el.flags.paragraph_type == ParagraphType::BlockElement
            );
            if is_block {
                dest.push(fragment);
                // The next fragment starts a fresh paragraph.
                paragraph = None;
            } else {
                let wrapper = match paragraph {
                    Some(p) => p,
                    None => {
                        let p = arena.alloc_paragraph();
                        dest.push(p);
                        paragraph = Some(p);
                        p
                    }
                };
                arena.append_child(wrapper, fragment);
                last_was_paragraph = true;
            }
        }
    }
    for id in dest {
        arena.append_child(node, id);
    }
    if let Some(el) = arena.element_mut(node) {
        el.paragraph_handled = true;
    }
}

/// Split one node at every occurrence of the detect string.
///
/// Text splits cleanly. Elements that allow breakup are split recursively,
/// one shallow copy per fragment group. Everything else passes through as a
/// single fragment.
fn break_up_node(arena: &mut NodeArena, node: NodeId, detect: &str) -> Vec<NodeId> {
    if detect.is_empty() {
        return vec![node];
    }
    match arena.kind(node) {
        NodeKind::Text => break_up_text(arena, node, detect),
        NodeKind::Element => {
            let splittable = matches!(
                arena.element(node),
                Some(el) if el.flags.paragraph_type == ParagraphType::AllowBreakup
            );
            if !splittable || arena.children(node).is_empty() {
                return vec![node];
            }
            let children = arena.take_children(node);
            let mut out = Vec::new();
            let mut copy = arena.duplicate_element(node);
            for child in children {
                let fragments = break_up_node(arena, child, detect);
                for (j, fragment) in fragments.into_iter().enumerate() {
                    if j != 0 {
                        out.push(copy);
                        copy = arena.duplicate_element(node);
                    }
                    arena.append_child(copy, fragment);
                }
            }
            out.push(copy);
            out
        }
        _ => vec![node],
    }
}

fn break_up_text(arena: &mut NodeArena, node: NodeId, detect: &str) -> Vec<NodeId> {
    let (content, begin, end, occurred_at) = match arena.text(node) {
        Some(t) if t.content.contains(detect) => (
            t.content.clone(),
            t.newline_begin,
            t.newline_end,
            arena.occurred_at(node),
        ),
        _ => return vec![node],
    };
    let mut out = Vec::new();
    let mut cursor = 0;
    while let Some(rel) = content[cursor..].find(detect) {
        let hit = cursor + rel;
        let fragment = arena.alloc_text(
            content[cursor..hit].to_string(),
            occurred_at.map(|o| o + cursor),
        );
        if cursor == 0 {
            if let Some(t) = arena.text_mut(fragment) {
                t.newline_begin = begin;
            }
        }
        out.push(fragment);
        cursor = hit + detect.len();
    }
    let fragment = arena.alloc_text(
        content[cursor..].to_string(),
        occurred_at.map(|o| o + cursor),
    );
    if let Some(t) = arena.text_mut(fragment) {
        // The split consumed at least one separator, so this is never the
        // leading fragment; only the trailing newline mode survives.
        t.newline_end = end;
    }
    out.push(fragment);
    out
}

fn prune_empty_paragraphs(arena: &mut NodeArena) {
    for id in arena.collect(&Query::EmptyParagraph) {
        arena.detach(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TagFlags;

    fn text(arena: &mut NodeArena, content: &str) -> NodeId {
        arena.alloc_text(content.to_string(), None)
    }

    fn element_with_flags(arena: &mut NodeArena, name: &str, flags: TagFlags) -> NodeId {
        let id = arena.alloc_element(None);
        if let Some(el) = arena.element_mut(id) {
            el.name = name.to_string();
            el.flags = flags;
        }
        id
    }

    fn paragraph_texts(arena: &NodeArena) -> Vec<Vec<String>> {
        arena
            .children(arena.root())
            .iter()
            .map(|&p| {
                arena
                    .children(p)
                    .iter()
                    .map(|&c| match arena.text(c) {
                        Some(t) => t.content.clone(),
                        None => format!("<{}>", arena.element(c).map(|e| e.name.as_str()).unwrap_or("?")),
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn text_splits_into_one_paragraph_per_fragment() {
        let mut arena = NodeArena::new();
        let root = arena.root();
        let t = text(&mut arena, "A\n\nB\n\nC");
        arena.append_child(root, t);
        handle_paragraphs(&mut arena, root, "\n\n");
        assert_eq!(
            paragraph_texts(&arena),
            vec![vec!["A".to_string()], vec!["B".to_string()], vec!["C".to_string()]]
        );
    }

    #[test]
    fn adjacent_elements_share_a_paragraph() {
        let mut arena = NodeArena::new();
        let root = arena.root();
        let a = element_with_flags(&mut arena, "a", TagFlags::default());
        let b = element_with_flags(&mut arena, "b", TagFlags::default());
        arena.append_child(root, a);
        arena.append_child(root, b);
        handle_paragraphs(&mut arena, root, "\n\n");
        assert_eq!(
            paragraph_texts(&arena),
            vec![vec!["<a>".to_string(), "<b>".to_string()]]
        );
    }

    #[test]
    fn block_elements_are_never_wrapped() {
        let mut arena = NodeArena::new();
        let root = arena.root();
        let before = text(&mut arena, "x");
        let block = element_with_flags(
            &mut arena,
            "quote",
            TagFlags {
                paragraph_type: ParagraphType::BlockElement,
                ..TagFlags::default()
            },
        );
        let after = text(&mut arena, "y");
        arena.append_child(root, before);
        arena.append_child(root, block);
        arena.append_child(root, after);
        handle_paragraphs(&mut arena, root, "\n\n");

        let kinds: Vec<NodeKind> = arena
            .children(root)
            .iter()
            .map(|&c| arena.kind(c))
            .collect();
        assert_eq!(
            kinds,
            vec![NodeKind::Paragraph, NodeKind::Element, NodeKind::Paragraph]
        );
    }

    #[test]
    fn breakup_duplicates_split_elements() {
        // <i>one\n\ntwo</i> becomes two copies of <i>.
        let mut arena = NodeArena::new();
        let root = arena.root();
        let italic = element_with_flags(&mut arena, "i", TagFlags::default());
        let t = text(&mut arena, "one\n\ntwo");
        arena.append_child(italic, t);
        arena.append_child(root, italic);
        handle_paragraphs(&mut arena, root, "\n\n");

        let paragraphs = arena.children(root).to_vec();
        assert_eq!(paragraphs.len(), 2);
        for (p, expected) in paragraphs.iter().zip(["one", "two"]) {
            assert_eq!(arena.kind(*p), NodeKind::Paragraph);
            let inner = arena.children(*p)[0];
            assert_eq!(arena.element(inner).map(|e| e.name.as_str()), Some("i"));
            let inner_text = arena.children(inner)[0];
            assert_eq!(arena.text(inner_text).map(|t| t.content.as_str()), Some(expected));
        }
    }

    #[test]
    fn allow_inside_elements_are_not_split() {
        let mut arena = NodeArena::new();
        let root = arena.root();
        let code = element_with_flags(
            &mut arena,
            "code",
            TagFlags {
                paragraph_type: ParagraphType::AllowInside,
                ..TagFlags::default()
            },
        );
        let t = text(&mut arena, "one\n\ntwo");
        arena.append_child(code, t);
        arena.append_child(root, code);
        handle_paragraphs(&mut arena, root, "\n\n");

        assert_eq!(arena.children(root).len(), 1);
        let p = arena.children(root)[0];
        let inner = arena.children(p)[0];
        let inner_text = arena.children(inner)[0];
        assert_eq!(
            arena.text(inner_text).map(|t| t.content.as_str()),
            Some("one\n\ntwo")
        );
    }

    #[test]
    fn split_text_keeps_edge_newline_modes_only() {
        let mut arena = NodeArena::new();
        let root = arena.root();
        let t = text(&mut arena, "a\n\nb");
        if let Some(td) = arena.text_mut(t) {
            td.newline_begin = NewlineMode::Drop;
            td.newline_end = NewlineMode::Ignore;
        }
        arena.append_child(root, t);
        let fragments = break_up_node(&mut arena, t, "\n\n");
        assert_eq!(fragments.len(), 2);
        let first = arena.text(fragments[0]).unwrap();
        assert_eq!(first.newline_begin, NewlineMode::Drop);
        assert_eq!(first.newline_end, NewlineMode::Parse);
        let last = arena.text(fragments[1]).unwrap();
        assert_eq!(last.newline_begin, NewlineMode::Parse);
        assert_eq!(last.newline_end, NewlineMode::Ignore);
    }

    #[test]
    fn rerunning_paragraph_handling_is_structurally_stable() {
        let mut arena = NodeArena::new();
        let root = arena.root();
        let t = text(&mut arena, "A\n\nB");
        arena.append_child(root, t);
        handle_paragraphs(&mut arena, root, "\n\n");
        let shape = paragraph_texts(&arena);
        handle_paragraphs(&mut arena, root, "\n\n");
        assert_eq!(paragraph_texts(&arena), shape);
    }

    #[test]
    fn empty_paragraphs_are_pruned() {
        let mut arena = NodeArena::new();
        let root = arena.root();
        let t = text(&mut arena, "A\n\n");
        arena.append_child(root, t);
        handle_paragraphs(&mut arena, root, "\n\n");
        assert_eq!(arena.children(root).len(), 2);
        prune_empty_paragraphs(&mut arena);
        assert_eq!(paragraph_texts(&arena), vec![vec!["A".to_string()]]);
    }
}
