//! Tag definitions and the registry the engine consults while parsing.
//!
//! The registry is plain bookkeeping: tags are registered up front, looked up
//! by name during a parse, and never mutated while a parse is running. Tag
//! behavior lives behind the [`TagHandler`] capability trait; static
//! replacements are a built-in implementation of that same trait so the
//! engine treats every tag uniformly.

use std::fmt;
use std::sync::Arc;

use crate::tree::Attributes;

/// Per-tag rule governing whether and when a close tag is required.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClosePolicy {
    /// The tag never takes a close tag and may be auto-closed by a sibling.
    Forbidden,
    /// A close tag may appear but is not required.
    Optional,
    /// Closed implicitly at end of input or by an enclosing close tag.
    #[default]
    Implicit,
    /// Closed implicitly only when an enclosing close tag forces it; never
    /// auto-closed to make room for a sibling.
    ImplicitOnCloseOnly,
    /// A close tag must appear; its absence fails the parse in any mode.
    MustExist,
}

/// How a newline adjacent to a tag boundary is treated in the output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NewlineMode {
    /// No special handling.
    #[default]
    Parse,
    /// Emit the newline but treat it as already consumed for paragraph
    /// break detection and empty-paragraph pruning.
    Ignore,
    /// Remove the newline from the output.
    Drop,
}

/// How an element interacts with paragraph breakup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParagraphType {
    /// The element may be split across paragraphs.
    #[default]
    AllowBreakup,
    /// The element may sit inside a paragraph but is never split.
    AllowInside,
    /// The element is never wrapped and forces a boundary on both sides.
    BlockElement,
}

/// Replacement behavior of a tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplaceMode {
    /// Wrap rendered children in fixed start/end strings.
    Static,
    /// Emit a fixed string; the element can never have children.
    StaticVoid,
    /// Capture the body verbatim (not tokenized) until the matching close
    /// tag, then hand it to the handler.
    UseContent,
    /// Capture verbatim only when none of the `usecontent_params`
    /// attributes were supplied; otherwise parse the body normally.
    UseContentOptional,
    /// Hand rendered children to the handler.
    Callback,
    /// Capture verbatim only when one of the `usecontent_params` attributes
    /// was supplied; otherwise parse the body normally.
    CallbackOptional,
    /// Invoke the handler with empty content; the element never has
    /// children.
    CallbackVoid,
}

impl ReplaceMode {
    /// Modes whose validation receives the captured body when the element
    /// holds exactly one text child.
    pub(crate) fn passes_content(self) -> bool {
        matches!(
            self,
            Self::UseContent | Self::UseContentOptional | Self::CallbackOptional
        )
    }

    pub(crate) fn is_void(self) -> bool {
        matches!(self, Self::StaticVoid | Self::CallbackVoid)
    }
}

/// Which validation pass a [`TagHandler::validate`] call belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidateAction {
    /// First validation, when the open tag is resolved.
    First,
    /// Revalidation when a close tag (or implicit close) arrives. Only
    /// issued when the parser's `validate_again` setting is on.
    Again,
}

/// Behavior of a single tag.
///
/// `validate` decides whether a candidate element is acceptable; returning
/// `false` makes the engine degrade the whole tag to literal text. `render`
/// produces the output string, or `None` to fail the render pass.
pub trait TagHandler: Send + Sync {
    fn validate(
        &self,
        _action: ValidateAction,
        _attrs: &Attributes,
        _content: Option<&str>,
    ) -> bool {
        true
    }

    fn render(&self, attrs: &Attributes, content: &str) -> Option<String>;
}

/// Built-in handler for [`ReplaceMode::Static`] and
/// [`ReplaceMode::StaticVoid`] tags.
pub(crate) struct StaticReplacer {
    pub(crate) start_tag: String,
    pub(crate) end_tag: String,
    pub(crate) void: bool,
}

impl TagHandler for StaticReplacer {
    fn validate(&self, _action: ValidateAction, attrs: &Attributes, _content: Option<&str>) -> bool {
        // Static templates have nowhere to put attribute values.
        attrs.is_empty()
    }

    fn render(&self, _attrs: &Attributes, content: &str) -> Option<String> {
        if self.void {
            if !content.is_empty() {
                return None;
            }
            return Some(self.start_tag.clone());
        }
        let mut out =
            String::with_capacity(self.start_tag.len() + content.len() + self.end_tag.len());
        out.push_str(&self.start_tag);
        out.push_str(content);
        out.push_str(&self.end_tag);
        Some(out)
    }
}

/// Typed per-tag flags, copied onto each element when its open tag is
/// resolved. Element copies may diverge from the registry afterwards.
#[derive(Clone, Debug)]
pub struct TagFlags {
    pub close_policy: ClosePolicy,
    /// Whether the tag name matches case-sensitively. Only consulted when
    /// the parser's global case-sensitivity is on.
    pub case_sensitive: bool,
    /// Occurrence budget this tag draws from, if any.
    pub occurrence_type: Option<String>,
    /// Run paragraph handling over this element's children.
    pub paragraphs: bool,
    pub paragraph_type: ParagraphType,
    /// Newline adjacent to the open tag, on the outside.
    pub newline_open_before: NewlineMode,
    /// Newline right after the open tag.
    pub newline_open_after: NewlineMode,
    /// Newline right before the close tag.
    pub newline_close_before: NewlineMode,
    /// Newline adjacent to the close tag, on the outside.
    pub newline_close_after: NewlineMode,
}

impl Default for TagFlags {
    fn default() -> Self {
        Self {
            close_policy: ClosePolicy::default(),
            case_sensitive: true,
            occurrence_type: None,
            paragraphs: false,
            paragraph_type: ParagraphType::default(),
            newline_open_before: NewlineMode::Parse,
            newline_open_after: NewlineMode::Parse,
            newline_close_before: NewlineMode::Parse,
            newline_close_after: NewlineMode::Parse,
        }
    }
}

/// A registered tag.
#[derive(Clone)]
pub struct TagDef {
    pub name: String,
    pub mode: ReplaceMode,
    pub handler: Arc<dyn TagHandler>,
    /// Attribute names that toggle the optional content-capture modes.
    pub usecontent_params: Vec<String>,
    /// Content-type label of this tag's body, used for nesting rules and
    /// for selecting text filters.
    pub content_type: String,
    /// Content types this tag may open inside.
    pub allowed_within: Vec<String>,
    /// Content types no ancestor of this tag may have.
    pub not_allowed_within: Vec<String>,
    pub flags: TagFlags,
}

impl TagDef {
    /// A tag rendered by wrapping its children in fixed start/end strings.
    pub fn static_replace(
        name: &str,
        start_tag: &str,
        end_tag: &str,
        content_type: &str,
        allowed_within: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            mode: ReplaceMode::Static,
            handler: Arc::new(StaticReplacer {
                start_tag: start_tag.to_string(),
                end_tag: end_tag.to_string(),
                void: false,
            }),
            usecontent_params: Vec::new(),
            content_type: content_type.to_string(),
            allowed_within: allowed_within.iter().map(|s| s.to_string()).collect(),
            not_allowed_within: Vec::new(),
            flags: TagFlags::default(),
        }
    }

    /// A childless tag rendered as a fixed string.
    pub fn static_void(
        name: &str,
        replacement: &str,
        content_type: &str,
        allowed_within: &[&str],
    ) -> Self {
        Self {
            mode: ReplaceMode::StaticVoid,
            handler: Arc::new(StaticReplacer {
                start_tag: replacement.to_string(),
                end_tag: String::new(),
                void: true,
            }),
            ..Self::static_replace(name, "", "", content_type, allowed_within)
        }
    }

    /// A tag driven by a caller-supplied handler.
    pub fn with_handler(
        name: &str,
        mode: ReplaceMode,
        handler: Arc<dyn TagHandler>,
        content_type: &str,
        allowed_within: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            mode,
            handler,
            usecontent_params: Vec::new(),
            content_type: content_type.to_string(),
            allowed_within: allowed_within.iter().map(|s| s.to_string()).collect(),
            not_allowed_within: Vec::new(),
            flags: TagFlags::default(),
        }
    }

    pub fn not_allowed_within(mut self, content_types: &[&str]) -> Self {
        self.not_allowed_within = content_types.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn usecontent_params(mut self, params: &[&str]) -> Self {
        self.usecontent_params = params.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn flags(mut self, flags: TagFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl fmt::Debug for TagDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagDef")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("content_type", &self.content_type)
            .field("allowed_within", &self.allowed_within)
            .field("not_allowed_within", &self.not_allowed_within)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

fn valid_tag_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'*' | b'_' | b'!' | b'+' | b'-'))
}

/// The set of registered tags plus occurrence budgets.
///
/// Registration order is observable: case-insensitive canonical lookup scans
/// in registration order and the first hit wins.
#[derive(Clone, Debug, Default)]
pub struct TagRegistry {
    codes: Vec<Arc<TagDef>>,
    max_occurrences: Vec<(String, usize)>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag. Fails (returning `false`) when the name is already
    /// taken or contains characters outside `[A-Za-z0-9*_!+-]`.
    pub fn register(&mut self, def: TagDef) -> bool {
        if !valid_tag_name(&def.name) {
            return false;
        }
        if self.codes.iter().any(|c| c.name == def.name) {
            return false;
        }
        self.codes.push(Arc::new(def));
        true
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.codes.len();
        self.codes.retain(|c| c.name != name);
        self.codes.len() != before
    }

    pub fn clear(&mut self) {
        self.codes.clear();
    }

    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<&Arc<TagDef>> {
        self.codes.iter().find(|c| c.name == name)
    }

    /// Mutable access to a registered tag's flags.
    ///
    /// Elements snapshot their definition when they open, so flag changes
    /// never affect a tree that was already parsed.
    pub fn flags_mut(&mut self, name: &str) -> Option<&mut TagFlags> {
        let def = self.codes.iter_mut().find(|c| c.name == name)?;
        Some(&mut Arc::make_mut(def).flags)
    }

    /// Assign the occurrence budget a tag draws from.
    pub fn set_occurrence_type(&mut self, name: &str, occurrence_type: &str) -> bool {
        match self.flags_mut(name) {
            Some(flags) => {
                flags.occurrence_type = Some(occurrence_type.to_string());
                true
            }
            None => false,
        }
    }

    /// Cap the total number of elements drawing from an occurrence budget.
    pub fn set_max_occurrences(&mut self, occurrence_type: &str, count: usize) {
        if let Some(entry) = self
            .max_occurrences
            .iter_mut()
            .find(|(t, _)| t == occurrence_type)
        {
            entry.1 = count;
            return;
        }
        self.max_occurrences
            .push((occurrence_type.to_string(), count));
    }

    pub fn max_occurrences(&self, occurrence_type: &str) -> Option<usize> {
        self.max_occurrences
            .iter()
            .find(|(t, _)| t == occurrence_type)
            .map(|(_, c)| *c)
    }

    /// Resolve a name to its registered casing.
    ///
    /// Exact matches always succeed. Otherwise the registry is scanned
    /// case-insensitively in registration order, and the hit counts only if
    /// case-insensitive matching is actually permitted for that tag.
    pub fn canonical_name(&self, name: &str, global_case_sensitive: bool) -> Option<&str> {
        if let Some(def) = self.codes.iter().find(|c| c.name == name) {
            return Some(&def.name);
        }
        let found = self
            .codes
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))?;
        if global_case_sensitive && found.flags.case_sensitive {
            return None;
        }
        Some(&found.name)
    }
}
