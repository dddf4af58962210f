//! Tolerant bracket-tag markup parsing.
//!
//! `bbmark` converts `[tag attr=val]content[/tag]` markup into a target text
//! format (typically HTML) through a caller-supplied tag grammar: callers
//! register tag definitions, nesting rules and replacement behavior, and the
//! engine tokenizes, validates and renders arbitrary user input. Malformed
//! or unvalidatable markup never fails a parse; the offending tag degrades
//! to literal text.
//!
//! ```
//! use bbmark::{Parser, ParserConfig, TagDef};
//!
//! let mut parser = Parser::new(ParserConfig::default());
//! parser.registry_mut().register(TagDef::static_replace(
//!     "b",
//!     "<b>",
//!     "</b>",
//!     "inline",
//!     &["block", "inline"],
//! ));
//! assert_eq!(parser.parse("[b]hi[/b]").unwrap(), "<b>hi</b>");
//! assert_eq!(parser.parse("[x]hi[/x]").unwrap(), "[x]hi[/x]");
//! ```
//!
//! [`Parser::parse_to_tree`] and [`Parser::render`] split the pipeline for
//! callers that want to inspect or rewrite the tree in between.

pub mod debug;
mod lexer;
mod parser;
mod registry;
mod render;
mod transform;
mod tree;

use std::borrow::Cow;
use std::fmt;

pub use crate::registry::{
    ClosePolicy, NewlineMode, ParagraphType, ReplaceMode, TagDef, TagFlags, TagHandler,
    TagRegistry, ValidateAction,
};
pub use crate::tree::{
    Attributes, ElementData, NodeArena, NodeData, NodeId, NodeKind, TextData,
};

/// Failure of a whole parse or render call.
///
/// Recoverable syntax problems (unknown tags, failed validation, nesting
/// violations, mismatched close tags) never surface here; they degrade to
/// literal text instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// An open tag was never closed while strict mode was on, or its close
    /// policy requires an explicit close tag.
    UnclosedTag { name: String },
    /// A tag handler refused to produce output during rendering.
    Replacement { tag: String },
    /// Internal invariant violation. Surfaced as an error instead of a
    /// panic so a corrupted parse cannot take the caller down.
    Invariant(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnclosedTag { name } => write!(f, "unclosed tag [{name}]"),
            Self::Replacement { tag } => write!(f, "replacement failed for tag [{tag}]"),
            Self::Invariant(what) => write!(f, "engine invariant violated: {what}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Paragraph handling parameters.
#[derive(Clone, Debug)]
pub struct ParagraphConfig {
    /// Separator that starts a new paragraph.
    pub detect: String,
    pub start_tag: String,
    pub end_tag: String,
}

impl Default for ParagraphConfig {
    fn default() -> Self {
        Self {
            detect: "\n\n".to_string(),
            start_tag: "<p>".to_string(),
            end_tag: "</p>\n".to_string(),
        }
    }
}

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct ParserConfig {
    /// Tag names match case-sensitively. Individual tags may opt out via
    /// their `case_sensitive` flag; turning this off makes every tag
    /// case-insensitive.
    pub case_sensitive: bool,
    /// Whether `[code=a b=c]` parses as two attributes (`default` and `b`)
    /// or as one default value `a b=c`.
    pub mixed_attribute_types: bool,
    /// Revalidate elements when their close tag (explicit or implicit)
    /// arrives.
    pub validate_again: bool,
    /// Fail the parse on unclosed tags instead of auto-closing them.
    pub strict: bool,
    /// Content type of text and tags at the top level.
    pub root_content_type: String,
    /// Run paragraph handling over the root's children.
    pub root_paragraph_handling: bool,
    pub paragraphs: ParagraphConfig,
    /// Nesting depth cap; a `[` beyond it stays literal text.
    pub max_nesting: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            mixed_attribute_types: false,
            validate_again: false,
            strict: false,
            root_content_type: "block".to_string(),
            root_paragraph_handling: false,
            paragraphs: ParagraphConfig::default(),
            max_nesting: 64,
        }
    }
}

type TextFilter = Box<dyn Fn(&str) -> String + Send + Sync>;

/// A configured parsing engine.
///
/// Holds the tag registry, the configuration and the filter chains. Parsing
/// borrows the engine immutably, so one `Parser` can serve concurrent
/// parses of different inputs; all per-run state lives on the call.
pub struct Parser {
    pub config: ParserConfig,
    pub(crate) registry: TagRegistry,
    text_filters: Vec<(String, TextFilter)>,
    prefilters: Vec<TextFilter>,
    postfilters: Vec<TextFilter>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl Parser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            registry: TagRegistry::new(),
            text_filters: Vec::new(),
            prefilters: Vec::new(),
            postfilters: Vec::new(),
        }
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TagRegistry {
        &mut self.registry
    }

    /// Register a filter over the output of text nodes enclosed by the
    /// given content type. Filters for one type run in registration order.
    pub fn add_text_filter<F>(&mut self, content_type: &str, filter: F)
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.text_filters
            .push((content_type.to_string(), Box::new(filter)));
    }

    /// Register a filter over the raw input, run before lexing.
    pub fn add_prefilter<F>(&mut self, filter: F)
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.prefilters.push(Box::new(filter));
    }

    /// Register a filter over the final rendered output.
    pub fn add_postfilter<F>(&mut self, filter: F)
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.postfilters.push(Box::new(filter));
    }

    /// Parse and render in one call.
    pub fn parse(&self, input: &str) -> Result<String, ParseError> {
        let tree = self.parse_to_tree(input)?;
        self.render(&tree)
    }

    /// Parse into a transformed tree without rendering it.
    pub fn parse_to_tree(&self, input: &str) -> Result<NodeArena, ParseError> {
        let filtered = self.apply_prefilters(input);
        let mut arena = parser::ParseRun::new(self, &filtered).run()?;
        transform::run(self, &mut arena);
        Ok(arena)
    }

    /// Serialize a tree produced by [`Parser::parse_to_tree`].
    pub fn render(&self, tree: &NodeArena) -> Result<String, ParseError> {
        render::render_tree(self, tree)
    }

    pub(crate) fn canonical(&self, name: &str) -> Option<String> {
        self.registry
            .canonical_name(name, self.config.case_sensitive)
            .map(str::to_string)
    }

    fn apply_prefilters<'a>(&self, input: &'a str) -> Cow<'a, str> {
        if self.prefilters.is_empty() {
            return Cow::Borrowed(input);
        }
        let mut current = input.to_string();
        for filter in &self.prefilters {
            current = filter(&current);
        }
        Cow::Owned(current)
    }

    pub(crate) fn apply_postfilters(&self, output: String) -> String {
        let mut current = output;
        for filter in &self.postfilters {
            current = filter(&current);
        }
        current
    }

    pub(crate) fn apply_text_filters(&self, content_type: &str, text: &str) -> String {
        let mut current = Cow::Borrowed(text);
        for (registered_type, filter) in &self.text_filters {
            if registered_type == content_type {
                current = Cow::Owned(filter(&current));
            }
        }
        current.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_compose_in_registration_order() {
        let mut parser = Parser::new(ParserConfig::default());
        parser.add_text_filter("block", |s| s.replace('a', "b"));
        parser.add_text_filter("block", |s| format!("<{s}>"));
        parser.add_text_filter("inline", |s| s.to_uppercase());
        assert_eq!(parser.apply_text_filters("block", "aaa"), "<bbb>");
        assert_eq!(parser.apply_text_filters("inline", "aaa"), "AAA");
        assert_eq!(parser.apply_text_filters("other", "aaa"), "aaa");
    }

    #[test]
    fn pre_and_postfilters_wrap_the_whole_pipeline() {
        let mut parser = Parser::new(ParserConfig::default());
        parser.add_prefilter(|s| s.replace("\r\n", "\n"));
        parser.add_postfilter(|s| format!("{s}!"));
        assert_eq!(parser.parse("a\r\nb").unwrap(), "a\nb!");
    }
}
