//! Shared tag vocabulary for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use bbmark::{
    Attributes, ClosePolicy, NewlineMode, ParagraphType, Parser, ParserConfig, ReplaceMode,
    TagDef, TagHandler, ValidateAction,
};

/// `[url]target[/url]` or `[url=target]label[/url]`.
pub struct Anchor;

impl TagHandler for Anchor {
    fn validate(&self, _action: ValidateAction, attrs: &Attributes, content: Option<&str>) -> bool {
        attrs.contains("default") || content.is_some_and(|c| !c.is_empty())
    }

    fn render(&self, attrs: &Attributes, content: &str) -> Option<String> {
        let href = attrs.value("default").unwrap_or(content);
        Some(format!("<a href=\"{href}\">{content}</a>"))
    }
}

/// `[code]verbatim[/code]`.
pub struct CodeBlock;

impl TagHandler for CodeBlock {
    fn render(&self, _attrs: &Attributes, content: &str) -> Option<String> {
        Some(format!("<code>{content}</code>"))
    }
}

/// `[img]src[/img]`.
pub struct Image;

impl TagHandler for Image {
    fn validate(&self, _action: ValidateAction, _attrs: &Attributes, content: Option<&str>) -> bool {
        content.is_some_and(|c| !c.is_empty())
    }

    fn render(&self, _attrs: &Attributes, content: &str) -> Option<String> {
        Some(format!("<img src=\"{content}\" />"))
    }
}

pub fn demo_parser() -> Parser {
    demo_parser_with(ParserConfig::default())
}

pub fn demo_parser_with(config: ParserConfig) -> Parser {
    let mut parser = Parser::new(config);
    let registry = parser.registry_mut();

    for (name, start, end) in [
        ("b", "<b>", "</b>"),
        ("i", "<i>", "</i>"),
        ("u", "<u>", "</u>"),
    ] {
        assert!(registry.register(TagDef::static_replace(
            name,
            start,
            end,
            "inline",
            &["block", "inline", "listitem", "link"],
        )));
    }

    assert!(registry.register(
        TagDef::with_handler(
            "url",
            ReplaceMode::UseContentOptional,
            Arc::new(Anchor),
            "link",
            &["block", "inline", "listitem"],
        )
        .usecontent_params(&["default"])
        .not_allowed_within(&["link"])
    ));

    assert!(registry.register(TagDef::with_handler(
        "code",
        ReplaceMode::UseContent,
        Arc::new(CodeBlock),
        "code",
        &["block", "listitem"],
    )));

    assert!(registry.register(TagDef::with_handler(
        "img",
        ReplaceMode::UseContent,
        Arc::new(Image),
        "image",
        &["block", "inline", "listitem"],
    )));

    assert!(registry.register(TagDef::static_void(
        "hr",
        "<hr />",
        "block",
        &["block"],
    )));

    let mut list = TagDef::static_replace("list", "<ul>", "</ul>", "list", &["block", "listitem"]);
    list.flags.paragraph_type = ParagraphType::BlockElement;
    assert!(registry.register(list));

    let mut item = TagDef::static_replace("*", "<li>", "</li>", "listitem", &["list"]);
    item.flags.close_policy = ClosePolicy::Optional;
    assert!(registry.register(item));

    let mut quote =
        TagDef::static_replace("quote", "<blockquote>", "</blockquote>", "block", &["block"]);
    quote.flags.paragraphs = true;
    quote.flags.paragraph_type = ParagraphType::BlockElement;
    quote.flags.newline_open_before = NewlineMode::Drop;
    quote.flags.newline_open_after = NewlineMode::Drop;
    quote.flags.newline_close_before = NewlineMode::Drop;
    quote.flags.newline_close_after = NewlineMode::Ignore;
    assert!(registry.register(quote));

    parser
}
