//! Compact tree dump for diagnostics and structural test assertions.

use crate::tree::{NodeArena, NodeData, NodeId};

/// One line per reachable node, two-space indented per depth.
///
/// Text content and attribute values are whitespace-squashed and truncated
/// so dumps stay readable for large inputs.
pub fn dump_tree(arena: &NodeArena) -> String {
    let mut out = String::new();
    dump_into(arena, arena.root(), 0, &mut out);
    out
}

fn dump_into(arena: &NodeArena, id: NodeId, depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    match arena.data(id) {
        NodeData::Root => out.push_str("root"),
        NodeData::Paragraph => out.push_str("paragraph"),
        NodeData::Text(text) => {
            out.push_str("text \"");
            out.push_str(&squash(&text.content, 40));
            out.push('"');
        }
        NodeData::Element(el) => {
            out.push_str("element \"");
            out.push_str(&squash(&el.name, 40));
            out.push('"');
            if !el.attributes.is_empty() {
                out.push_str(" (");
                let mut attrs: Vec<(&str, Option<&str>)> = el.attributes.iter().collect();
                attrs.sort_by_key(|(k, _)| *k);
                for (i, (key, value)) in attrs.into_iter().enumerate() {
                    if i != 0 {
                        out.push_str(", ");
                    }
                    out.push_str(key);
                    if let Some(value) = value {
                        out.push_str("=\"");
                        out.push_str(&squash(value, 10));
                        out.push('"');
                    }
                }
                out.push(')');
            }
            if !el.had_close_tag {
                out.push_str(" [open]");
            }
        }
    }
    out.push('\n');
    for &child in arena.children(id) {
        dump_into(arena, child, depth + 1, out);
    }
}

fn squash(raw: &str, max_chars: usize) -> String {
    let mut out = String::new();
    let mut emitted = 0;
    let mut last_was_space = false;
    for c in raw.chars() {
        if emitted >= max_chars {
            break;
        }
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                emitted += 1;
            }
            last_was_space = true;
        } else {
            out.push(c);
            emitted += 1;
            last_was_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_is_one_line_per_node() {
        let mut arena = NodeArena::new();
        let root = arena.root();
        let el = arena.alloc_element(None);
        if let Some(e) = arena.element_mut(el) {
            e.name = "b".to_string();
            e.had_close_tag = true;
            e.attributes.set("default", Some("x  y".to_string()));
            e.attributes.set("flagged", None);
        }
        let t = arena.alloc_text("hi\nthere".to_string(), None);
        arena.append_child(root, el);
        arena.append_child(el, t);

        let dump = dump_tree(&arena);
        assert_eq!(
            dump,
            "root\n  element \"b\" (default=\"x y\", flagged)\n    text \"hi there\"\n"
        );
    }
}
