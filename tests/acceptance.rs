//! End-to-end acceptance coverage for the parsing pipeline.

mod common;

use bbmark::{ParseError, ParserConfig};
use common::{demo_parser, demo_parser_with};

#[test]
fn input_without_markers_round_trips() {
    let parser = demo_parser();
    for input in [
        "",
        "plain text",
        "line one\nline two\n",
        "angle <brackets> & ampersands",
        "unicode \u{00e9}\u{6f22}\u{5b57} mixed in",
    ] {
        assert_eq!(parser.parse(input).unwrap(), input);
    }
}

#[test]
fn static_replacement() {
    let parser = demo_parser();
    assert_eq!(parser.parse("[b]hi[/b]").unwrap(), "<b>hi</b>");
    assert_eq!(
        parser.parse("[b][i]both[/i][/b]").unwrap(),
        "<b><i>both</i></b>"
    );
}

#[test]
fn unknown_tag_passthrough() {
    let parser = demo_parser();
    assert_eq!(parser.parse("[xyz]hi[/xyz]").unwrap(), "[xyz]hi[/xyz]");
}

#[test]
fn occurrence_limited_tags_degrade_past_their_budget() {
    let mut parser = demo_parser();
    assert!(parser.registry_mut().set_occurrence_type("url", "link"));
    parser.registry_mut().set_max_occurrences("link", 2);
    assert_eq!(
        parser
            .parse("[url]a[/url][url]b[/url][url]c[/url]")
            .unwrap(),
        "<a href=\"a\">a</a><a href=\"b\">b</a>[url]c[/url]"
    );
}

#[test]
fn nesting_rejection_renders_markers_literally() {
    let parser = demo_parser();
    // The captured body of `code` is never tokenized.
    assert_eq!(
        parser.parse("[code][b]x[/b][/code]").unwrap(),
        "<code>[b]x[/b]</code>"
    );
    // `b` may not open directly inside `list` content.
    assert_eq!(
        parser.parse("[list][b]x[/b][/list]").unwrap(),
        "<ul>[b]x[/b]</ul>"
    );
}

#[test]
fn mismatched_close_tag_is_literal() {
    let parser = demo_parser();
    assert_eq!(parser.parse("[b]x[/xyz]").unwrap(), "<b>x[/xyz]</b>");
}

#[test]
fn paragraph_split_at_root() {
    let parser = demo_parser_with(ParserConfig {
        root_paragraph_handling: true,
        ..ParserConfig::default()
    });
    assert_eq!(parser.parse("A\n\nB").unwrap(), "<p>A</p>\n<p>B</p>\n");
}

#[test]
fn optional_content_capture_toggles_on_the_default_attribute() {
    let parser = demo_parser();
    assert_eq!(
        parser.parse("[url]http://example/a?x=1[/url]").unwrap(),
        "<a href=\"http://example/a?x=1\">http://example/a?x=1</a>"
    );
    assert_eq!(
        parser.parse("[url=http://example]the [b]label[/b][/url]").unwrap(),
        "<a href=\"http://example\">the <b>label</b></a>"
    );
    // Neither a target attribute nor captured content: validation fails and
    // the markup stays literal.
    assert_eq!(parser.parse("[url][/url]").unwrap(), "[url][/url]");
}

#[test]
fn links_may_not_nest() {
    let parser = demo_parser();
    assert_eq!(
        parser.parse("[url=x]a[url=y]b[/url]c[/url]").unwrap(),
        "<a href=\"x\">a[url=y]b</a>c[/url]"
    );
}

#[test]
fn void_tags_never_take_children() {
    let parser = demo_parser();
    assert_eq!(parser.parse("x[hr]y").unwrap(), "x<hr />y");
    // The close tag has nothing to close; it stays literal.
    assert_eq!(parser.parse("[hr]x[/hr]").unwrap(), "<hr />x[/hr]");
}

#[test]
fn image_capture_renders_source() {
    let parser = demo_parser();
    assert_eq!(
        parser.parse("[img]pic.png[/img]").unwrap(),
        "<img src=\"pic.png\" />"
    );
    assert_eq!(parser.parse("[img][/img]").unwrap(), "[img][/img]");
}

#[test]
fn list_grammar_closes_items_implicitly() {
    let parser = demo_parser();
    assert_eq!(
        parser.parse("[list][*]one[*]two[*]three[/list]").unwrap(),
        "<ul><li>one</li><li>two</li><li>three</li></ul>"
    );
    assert_eq!(
        parser.parse("[list][*][b]bold[/b] item[/list]").unwrap(),
        "<ul><li><b>bold</b> item</li></ul>"
    );
}

#[test]
fn text_filters_select_by_content_type() {
    let mut parser = demo_parser();
    parser.add_text_filter("code", |s| s.replace('<', "&lt;"));
    parser.add_text_filter("block", |s| s.replace("brand", "BRAND"));
    assert_eq!(
        parser.parse("brand [code]a<b[/code] brand").unwrap(),
        "BRAND <code>a&lt;b</code> BRAND"
    );
    // Inline content has no filter registered.
    assert_eq!(parser.parse("[b]brand[/b]").unwrap(), "<b>brand</b>");
}

#[test]
fn root_filters_reach_paragraph_wrapped_text() {
    let mut parser = demo_parser_with(ParserConfig {
        root_paragraph_handling: true,
        ..ParserConfig::default()
    });
    parser.add_text_filter("block", |s| s.to_uppercase());
    assert_eq!(parser.parse("a\n\nb").unwrap(), "<p>A</p>\n<p>B</p>\n");
}

#[test]
fn strict_mode_rejects_unclosed_tags() {
    let parser = demo_parser_with(ParserConfig {
        strict: true,
        ..ParserConfig::default()
    });
    assert_eq!(
        parser.parse("[b]x"),
        Err(ParseError::UnclosedTag {
            name: "b".to_string()
        })
    );
    assert_eq!(parser.parse("[b]x[/b]").unwrap(), "<b>x</b>");
}

#[test]
fn render_and_tree_split_compose_to_parse() {
    let parser = demo_parser();
    let input = "one [b]two[/b] three";
    let tree = parser.parse_to_tree(input).unwrap();
    assert_eq!(parser.render(&tree).unwrap(), parser.parse(input).unwrap());
    // Rendering the same tree twice is stable.
    assert_eq!(parser.render(&tree).unwrap(), parser.render(&tree).unwrap());
}

#[test]
fn shared_parser_serves_multiple_threads() {
    let parser = std::sync::Arc::new(demo_parser());
    let mut handles = Vec::new();
    for i in 0..4 {
        let parser = parser.clone();
        handles.push(std::thread::spawn(move || {
            let input = format!("[b]worker {i}[/b]");
            parser.parse(&input).unwrap()
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), format!("<b>worker {i}</b>"));
    }
}
