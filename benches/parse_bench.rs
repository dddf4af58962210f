use std::sync::Arc;

use bbmark::{
    Attributes, Parser, ParserConfig, ReplaceMode, TagDef, TagHandler,
};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

const SMALL_BLOCKS: usize = 64;
const LARGE_BLOCKS: usize = 20_000;

struct Anchor;

impl TagHandler for Anchor {
    fn render(&self, attrs: &Attributes, content: &str) -> Option<String> {
        let href = attrs.value("default").unwrap_or(content);
        Some(format!("<a href=\"{href}\">{content}</a>"))
    }
}

fn bench_parser() -> Parser {
    let mut parser = Parser::new(ParserConfig::default());
    let registry = parser.registry_mut();
    registry.register(TagDef::static_replace(
        "b",
        "<b>",
        "</b>",
        "inline",
        &["block", "inline"],
    ));
    registry.register(TagDef::static_replace(
        "i",
        "<i>",
        "</i>",
        "inline",
        &["block", "inline"],
    ));
    registry.register(TagDef::with_handler(
        "url",
        ReplaceMode::Callback,
        Arc::new(Anchor),
        "link",
        &["block", "inline"],
    ));
    parser
}

fn make_blocks(blocks: usize) -> String {
    let unit = "[b]bold[/b] plain [i]slanted[/i] [url=http://example]go[/url]\n\n";
    let mut out = String::with_capacity(unit.len() * blocks);
    for _ in 0..blocks {
        out.push_str(unit);
    }
    out
}

fn make_text_heavy(bytes: usize) -> String {
    let mut out = String::with_capacity(bytes + 64);
    while out.len() < bytes {
        out.push_str("mostly plain prose with the occasional [ bracket that is not a tag. ");
    }
    out
}

fn make_backtrack_adversarial(blocks: usize) -> String {
    // Every candidate fails validation and reparses to literal text.
    let mut out = String::with_capacity(blocks * 8);
    for _ in 0..blocks {
        out.push_str("[nope]x");
    }
    out
}

fn bench_parse_small(c: &mut Criterion) {
    let parser = bench_parser();
    let input = make_blocks(SMALL_BLOCKS);
    c.bench_function("bench_parse_small", |b| {
        b.iter(|| {
            let out = parser.parse(black_box(&input)).unwrap();
            black_box(out.len());
        });
    });
}

fn bench_parse_large(c: &mut Criterion) {
    let parser = bench_parser();
    let input = make_blocks(LARGE_BLOCKS);
    c.bench_function("bench_parse_large", |b| {
        b.iter(|| {
            let out = parser.parse(black_box(&input)).unwrap();
            black_box(out.len());
        });
    });
}

fn bench_parse_text_heavy(c: &mut Criterion) {
    let parser = bench_parser();
    let input = make_text_heavy(1 << 20);
    c.bench_function("bench_parse_text_heavy", |b| {
        b.iter(|| {
            let out = parser.parse(black_box(&input)).unwrap();
            black_box(out.len());
        });
    });
}

fn bench_parse_backtrack(c: &mut Criterion) {
    let parser = bench_parser();
    let input = make_backtrack_adversarial(10_000);
    c.bench_function("bench_parse_backtrack", |b| {
        b.iter(|| {
            let out = parser.parse(black_box(&input)).unwrap();
            black_box(out.len());
        });
    });
}

fn bench_tree_only(c: &mut Criterion) {
    let parser = bench_parser();
    let input = make_blocks(LARGE_BLOCKS);
    c.bench_function("bench_tree_only", |b| {
        b.iter(|| {
            let tree = parser.parse_to_tree(black_box(&input)).unwrap();
            black_box(tree.children(tree.root()).len());
        });
    });
}

criterion_group!(
    benches,
    bench_parse_small,
    bench_parse_large,
    bench_parse_text_heavy,
    bench_parse_backtrack,
    bench_tree_only
);
criterion_main!(benches);
