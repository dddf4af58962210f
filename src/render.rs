//! Recursive tree-to-text serialization.
//!
//! Container nodes concatenate their children; paragraph wrappers add the
//! configured start/end tags; elements hand their child output to the tag
//! handler. Text output is trimmed per its newline modes and then run
//! through the text filters registered for the enclosing content type.

use crate::registry::NewlineMode;
use crate::tree::{NodeArena, NodeData, NodeId, NodeKind};
use crate::{ParseError, Parser};

pub(crate) fn render_tree(parser: &Parser, arena: &NodeArena) -> Result<String, ParseError> {
    let out = render_node(parser, arena, arena.root())?;
    Ok(parser.apply_postfilters(out))
}

fn render_node(parser: &Parser, arena: &NodeArena, id: NodeId) -> Result<String, ParseError> {
    match arena.data(id) {
        NodeData::Root | NodeData::Element(_) | NodeData::Paragraph => {
            let mut out = String::new();
            for &child in arena.children(id) {
                out.push_str(&render_node(parser, arena, child)?);
            }
            match arena.data(id) {
                NodeData::Paragraph => Ok(format!(
                    "{}{}{}",
                    parser.config.paragraphs.start_tag, out, parser.config.paragraphs.end_tag
                )),
                NodeData::Element(el) => {
                    let Some(def) = el.code.as_ref() else {
                        return Err(ParseError::Invariant("element without tag definition"));
                    };
                    match def.handler.render(&el.attributes, &out) {
                        Some(replaced) => Ok(replaced),
                        None => Err(ParseError::Replacement {
                            tag: def.name.clone(),
                        }),
                    }
                }
                _ => Ok(out),
            }
        }
        NodeData::Text(text) => {
            let mut content = text.content.clone();
            let mut before = "";
            let mut after = "";
            match text.newline_begin {
                NewlineMode::Ignore => {
                    if content.starts_with('\n') {
                        before = "\n";
                        content.remove(0);
                    }
                }
                NewlineMode::Drop => {
                    if content.starts_with('\n') {
                        content.remove(0);
                    }
                }
                NewlineMode::Parse => {}
            }
            match text.newline_end {
                NewlineMode::Ignore => {
                    if content.ends_with('\n') {
                        after = "\n";
                        content.pop();
                    }
                }
                NewlineMode::Drop => {
                    if content.ends_with('\n') {
                        content.pop();
                    }
                }
                NewlineMode::Parse => {}
            }
            let filtered = match filter_content_type(arena, id) {
                FilterScope::Root => {
                    parser.apply_text_filters(&parser.config.root_content_type, &content)
                }
                FilterScope::ContentType(content_type) => {
                    parser.apply_text_filters(content_type, &content)
                }
                FilterScope::None => content,
            };
            Ok(format!("{before}{filtered}{after}"))
        }
    }
}

enum FilterScope<'a> {
    Root,
    ContentType(&'a str),
    None,
}

/// Content type whose filters apply to a text node: the enclosing element's,
/// or the root's when the text sits at top level. A paragraph wrapper is
/// transparent.
fn filter_content_type<'a>(arena: &'a NodeArena, id: NodeId) -> FilterScope<'a> {
    let Some(mut parent) = arena.parent(id) else {
        return FilterScope::None;
    };
    if arena.kind(parent) == NodeKind::Paragraph {
        match arena.parent(parent) {
            Some(grandparent) => parent = grandparent,
            None => return FilterScope::None,
        }
    }
    match arena.data(parent) {
        NodeData::Root => FilterScope::Root,
        NodeData::Element(el) => match el.code.as_ref() {
            Some(def) => FilterScope::ContentType(&def.content_type),
            None => FilterScope::None,
        },
        _ => FilterScope::None,
    }
}
