//! Tag state machine and stack resolution engine.
//!
//! One parse run owns a cursor over the input, the current lexer state and
//! the stack of open nodes (index 0 is always the root). The lexer hands
//! each literal chunk and each matched needle to the state handler, which
//! mutates the stack and tree and may switch the lexer state.
//!
//! Failed candidates never fail the parse. Every open attempt records the
//! byte offset of its `[`; when resolution fails the run restores to that
//! checkpoint, re-injects the marker as literal text and resumes lexing in
//! text state. The close-tag-name state has its own restore point just past
//! the `[/` marker.

use crate::lexer::{Lexeme, NeedleSet};
use crate::registry::{ClosePolicy, ParagraphType, ReplaceMode, ValidateAction};
use crate::tree::{NodeArena, NodeId, Query};
use crate::{ParseError, Parser};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Text,
    OpenTagName,
    CloseTagName,
    DefaultAttrValue,
    AttributeName,
    AttributeValue,
    ContentCapture,
}

pub(crate) struct ParseRun<'p> {
    parser: &'p Parser,
    text: &'p str,
    arena: NodeArena,
    /// Open-node stack. `stack[0]` is the root for the whole run.
    stack: Vec<NodeId>,
    state: State,
    needles: NeedleSet,
    cpos: usize,
    /// Active quote character while lexing a quoted attribute value.
    quote: Option<u8>,
    saved_name: String,
    saved_value: String,
    /// Ancestors to auto-close when a content capture completes.
    saved_close_count: usize,
    /// Offset of the `[/` that opened the current close-tag-name state.
    close_began: usize,
    /// Set when the current needle handler restored a checkpoint; the main
    /// loop must not advance past the needle in that case.
    reparsed: bool,
}

impl<'p> ParseRun<'p> {
    pub(crate) fn new(parser: &'p Parser, text: &'p str) -> Self {
        let arena = NodeArena::new();
        let root = arena.root();
        Self {
            parser,
            text,
            arena,
            stack: vec![root],
            state: State::Text,
            needles: NeedleSet::text_state(),
            cpos: 0,
            quote: None,
            saved_name: String::new(),
            saved_value: String::new(),
            saved_close_count: 0,
            close_began: 0,
            reparsed: false,
        }
    }

    pub(crate) fn run(mut self) -> Result<NodeArena, ParseError> {
        log::debug!(target: "bbmark.parser", "parse start: {} bytes", self.text.len());
        self.set_state(State::Text);
        loop {
            self.search_loop()?;
            if self.state != State::Text {
                // End of input inside an unterminated construct: degrade it
                // to literal text and re-lex the tail.
                self.reparse_after_current_block()?;
                continue;
            }
            break;
        }
        self.close_remaining_blocks()?;
        log::debug!(target: "bbmark.parser", "parse done");
        Ok(self.arena)
    }

    fn search_loop(&mut self) -> Result<(), ParseError> {
        let text = self.text;
        while let Some((offset, lexeme, len)) = self.needles.find(text.as_bytes(), self.cpos) {
            self.append_text(&text[self.cpos..offset])?;
            self.cpos = offset;
            self.reparsed = false;
            self.handle_needle(lexeme, len)?;
            if !self.reparsed {
                self.cpos += len;
            }
        }
        self.append_text(&text[self.cpos..])?;
        self.cpos = text.len();
        Ok(())
    }

    fn set_state(&mut self, state: State) {
        self.needles = match state {
            State::Text => NeedleSet::text_state(),
            State::OpenTagName => NeedleSet::open_name_state(),
            State::CloseTagName => {
                self.saved_name.clear();
                NeedleSet::close_name_state()
            }
            State::DefaultAttrValue => NeedleSet::default_value_state(
                self.quote,
                self.parser.config.mixed_attribute_types,
            ),
            State::AttributeName => {
                self.saved_name.clear();
                self.saved_value.clear();
                NeedleSet::attr_name_state()
            }
            State::AttributeValue => {
                self.saved_value.clear();
                NeedleSet::attr_value_state(self.quote)
            }
            State::ContentCapture => {
                let (name, tag_case_sensitive) = match self.top().ok().and_then(|id| self.arena.element(id)) {
                    Some(el) => (el.name.clone(), el.flags.case_sensitive),
                    None => (String::new(), true),
                };
                let insensitive = !tag_case_sensitive || !self.parser.config.case_sensitive;
                NeedleSet::content_capture_state(&name, insensitive)
            }
        };
        self.state = state;
        log::trace!(target: "bbmark.parser", "state {:?} at {}", state, self.cpos);
    }

    fn top(&self) -> Result<NodeId, ParseError> {
        self.stack
            .last()
            .copied()
            .ok_or(ParseError::Invariant("open-node stack is empty"))
    }

    /// Append literal text to whatever the current state is capturing.
    fn append_text(&mut self, chunk: &str) -> Result<(), ParseError> {
        if chunk.is_empty() {
            return Ok(());
        }
        match self.state {
            State::Text | State::ContentCapture => self.append_to_last_text_child(chunk),
            State::OpenTagName => {
                let top = self.top()?;
                match self.arena.element_mut(top) {
                    Some(el) => {
                        el.name.push_str(chunk);
                        Ok(())
                    }
                    None => Err(ParseError::Invariant("tag name outside an element")),
                }
            }
            State::CloseTagName | State::AttributeName => {
                self.saved_name.push_str(chunk);
                Ok(())
            }
            State::DefaultAttrValue => {
                let top = self.top()?;
                match self.arena.element_mut(top) {
                    Some(el) => {
                        el.attributes.append_to("default", chunk);
                        Ok(())
                    }
                    None => Err(ParseError::Invariant("attribute outside an element")),
                }
            }
            State::AttributeValue => {
                self.saved_value.push_str(chunk);
                Ok(())
            }
        }
    }

    fn append_to_last_text_child(&mut self, chunk: &str) -> Result<(), ParseError> {
        let top = self.top()?;
        if let Some(&last) = self.arena.children(top).last() {
            if let Some(text) = self.arena.text_mut(last) {
                text.content.push_str(chunk);
                return Ok(());
            }
        }
        let id = self.arena.alloc_text(chunk.to_string(), Some(self.cpos));
        self.arena.append_child(top, id);
        Ok(())
    }

    fn handle_needle(&mut self, lexeme: Lexeme, len: usize) -> Result<(), ParseError> {
        match self.state {
            State::Text => match lexeme {
                Lexeme::TagOpen => {
                    if self.stack.len() > self.parser.config.max_nesting {
                        return self.append_text("[");
                    }
                    let top = self.top()?;
                    let element = self.arena.alloc_element(Some(self.cpos));
                    self.arena.append_child(top, element);
                    self.stack.push(element);
                    self.set_state(State::OpenTagName);
                    Ok(())
                }
                Lexeme::CloseOpen => {
                    if self.stack.len() <= 1 {
                        return self.append_text("[/");
                    }
                    self.close_began = self.cpos;
                    self.set_state(State::CloseTagName);
                    Ok(())
                }
                _ => Err(ParseError::Invariant("unexpected needle in text state")),
            },
            State::OpenTagName => match lexeme {
                Lexeme::TagEnd => self.open_element(false),
                Lexeme::DefaultSep { quote } => {
                    self.quote = quote;
                    self.set_state(State::DefaultAttrValue);
                    Ok(())
                }
                Lexeme::Space => {
                    self.set_state(State::AttributeName);
                    Ok(())
                }
                _ => Err(ParseError::Invariant("unexpected needle in tag name")),
            },
            State::CloseTagName => self.handle_close_tag(),
            State::DefaultAttrValue => match lexeme {
                Lexeme::EscapedBackslash => self.append_text("\\"),
                Lexeme::EscapedQuote => self.append_quote_char(),
                Lexeme::QuoteSpace | Lexeme::Space => {
                    self.set_state(State::AttributeName);
                    Ok(())
                }
                Lexeme::QuoteEnd | Lexeme::TagEnd => self.open_element(true),
                // Only `]` or a space may follow the closing quote.
                Lexeme::QuoteBare => self.reparse_after_current_block(),
                _ => Err(ParseError::Invariant("unexpected needle in default value")),
            },
            State::AttributeName => match lexeme {
                Lexeme::Space => {
                    self.commit_bool_attr()?;
                    self.set_state(State::AttributeName);
                    Ok(())
                }
                Lexeme::TagEnd => {
                    self.commit_bool_attr()?;
                    self.open_element(true)
                }
                Lexeme::AttrSep { quote } => {
                    self.quote = quote;
                    self.set_state(State::AttributeValue);
                    Ok(())
                }
                _ => Err(ParseError::Invariant("unexpected needle in attribute name")),
            },
            State::AttributeValue => match lexeme {
                Lexeme::EscapedBackslash => self.append_text("\\"),
                Lexeme::EscapedQuote => self.append_quote_char(),
                Lexeme::QuoteSpace | Lexeme::Space => {
                    self.commit_attr()?;
                    self.set_state(State::AttributeName);
                    Ok(())
                }
                Lexeme::QuoteEnd | Lexeme::TagEnd => {
                    self.commit_attr()?;
                    self.open_element(true)
                }
                Lexeme::QuoteBare => self.reparse_after_current_block(),
                _ => Err(ParseError::Invariant("unexpected needle in attribute value")),
            },
            State::ContentCapture => match lexeme {
                Lexeme::CloseExact => self.finish_content_capture(),
                Lexeme::CloseFallback => self.handle_insensitive_close(len),
                _ => Err(ParseError::Invariant("unexpected needle in content capture")),
            },
        }
    }

    fn append_quote_char(&mut self) -> Result<(), ParseError> {
        match self.quote {
            Some(q) => {
                let s = (q as char).to_string();
                self.append_text(&s)
            }
            None => Err(ParseError::Invariant("escape outside a quoted value")),
        }
    }

    /// Commit a bare attribute (`[tag name]`) when one is pending.
    fn commit_bool_attr(&mut self) -> Result<(), ParseError> {
        if self.saved_name.is_empty() {
            return Ok(());
        }
        let name = std::mem::take(&mut self.saved_name);
        let top = self.top()?;
        match self.arena.element_mut(top) {
            Some(el) => {
                el.attributes.set(&name, None);
                Ok(())
            }
            None => Err(ParseError::Invariant("attribute outside an element")),
        }
    }

    fn commit_attr(&mut self) -> Result<(), ParseError> {
        let name = std::mem::take(&mut self.saved_name);
        let value = std::mem::take(&mut self.saved_value);
        let top = self.top()?;
        match self.arena.element_mut(top) {
            Some(el) => {
                el.attributes.set(&name, Some(value));
                Ok(())
            }
            None => Err(ParseError::Invariant("attribute outside an element")),
        }
    }

    /// Resolve `[/name]`.
    fn handle_close_tag(&mut self) -> Result<(), ParseError> {
        let name = std::mem::take(&mut self.saved_name);
        let mut close_count = 0;
        if !self.is_closeable(&name, &mut close_count) {
            self.set_state(State::Text);
            let literal = format!("[/{name}]");
            return self.append_text(&literal);
        }
        if !self.validate_close_tags(close_count) {
            // The frames were built under an assumption revalidation just
            // rejected; roll the innermost frame back to literal text.
            self.set_state(State::Text);
            return self.reparse_after_current_block();
        }
        self.set_state(State::Text);
        for i in 0..close_count {
            if i == close_count - 1 {
                let top = self.top()?;
                if let Some(el) = self.arena.element_mut(top) {
                    el.had_close_tag = true;
                }
            }
            self.pop_node()?;
        }
        Ok(())
    }

    /// Case-insensitive confirmation for a `[/` seen in content capture.
    fn handle_insensitive_close(&mut self, needle_len: usize) -> Result<(), ParseError> {
        let top = self.top()?;
        let name = match self.arena.element(top) {
            Some(el) => el.name.clone(),
            None => return Err(ParseError::Invariant("content capture without element")),
        };
        let bytes = self.text.as_bytes();
        let start = self.cpos + needle_len;
        let end = start + name.len() + 1;
        let confirmed = end <= bytes.len()
            && bytes[start..end - 1].eq_ignore_ascii_case(name.as_bytes())
            && bytes[end - 1] == b']';
        if !confirmed {
            return self.append_text("[/");
        }
        self.cpos += name.len() + 1;
        self.finish_content_capture()
    }

    fn finish_content_capture(&mut self) -> Result<(), ParseError> {
        let close_count = self.saved_close_count;
        let top = self.top()?;
        if !self.validate_node(top, ValidateAction::First) {
            return self.reparse_after_current_block();
        }
        if close_count > 0 {
            self.close_and_reattach(close_count)?;
        }
        self.set_state(State::Text);
        self.pop_node()
    }

    /// Resolve the pending element at the top of the stack as an open tag.
    ///
    /// `check_attrs` is set when the closing bracket was reached through
    /// attribute lexing, so the optional content-capture modes may consult
    /// the supplied attributes.
    fn open_element(&mut self, check_attrs: bool) -> Result<(), ParseError> {
        let pending = self.top()?;
        let typed_name = match self.arena.element(pending) {
            Some(el) => el.name.clone(),
            None => return Err(ParseError::Invariant("open attempt without element")),
        };
        let Some(canonical) = self.parser.canonical(&typed_name) else {
            log::trace!(target: "bbmark.parser", "unknown tag {typed_name:?}, literal");
            return self.reparse_after_current_block();
        };
        let Some(def) = self.parser.registry.get(&canonical).cloned() else {
            return Err(ParseError::Invariant("canonical name not registered"));
        };

        if let Some(occurrence_type) = def.flags.occurrence_type.as_deref() {
            if let Some(max) = self.parser.registry.max_occurrences(occurrence_type) {
                let used = self.arena.count(&Query::Occurrence(occurrence_type));
                if used >= max {
                    log::trace!(
                        target: "bbmark.parser",
                        "occurrence budget {occurrence_type:?} exhausted ({used}/{max})"
                    );
                    return self.reparse_after_current_block();
                }
            }
        }

        if let Some(el) = self.arena.element_mut(pending) {
            el.flags = def.flags.clone();
            el.code = Some(def.clone());
        }

        let mut close_count = 0;
        if !self.is_openable(&canonical, &mut close_count) {
            return self.reparse_after_current_block();
        }
        self.set_state(State::Text);

        if self.wants_content_capture(pending, &def.mode, check_attrs) {
            self.saved_close_count = close_count;
            self.set_state(State::ContentCapture);
            return Ok(());
        }

        if !self.validate_node(pending, ValidateAction::First) {
            return self.reparse_after_current_block();
        }
        if close_count > 0 {
            self.close_and_reattach(close_count)?;
        }
        if def.mode.is_void() {
            self.pop_node()?;
        }
        Ok(())
    }

    /// Whether the pending element captures its body verbatim.
    ///
    /// The optional modes invert on attribute presence: `UseContentOptional`
    /// captures unless one of its toggle attributes was supplied,
    /// `CallbackOptional` captures only when one was.
    fn wants_content_capture(
        &self,
        pending: NodeId,
        mode: &ReplaceMode,
        check_attrs: bool,
    ) -> bool {
        let toggled = match mode {
            ReplaceMode::UseContent => return true,
            ReplaceMode::CallbackOptional => true,
            ReplaceMode::UseContentOptional => false,
            _ => return false,
        };
        if !check_attrs {
            return !toggled;
        }
        let Some(el) = self.arena.element(pending) else {
            return false;
        };
        let Some(def) = el.code.as_ref() else {
            return false;
        };
        let present = def
            .usecontent_params
            .iter()
            .any(|p| el.attributes.contains(p));
        if present { toggled } else { !toggled }
    }

    fn content_type_of(&self, id: NodeId) -> Option<&str> {
        self.arena
            .element(id)?
            .code
            .as_ref()
            .map(|def| def.content_type.as_str())
    }

    /// Nesting legality of the pending element.
    fn is_openable(&mut self, canonical: &str, close_count: &mut usize) -> bool {
        let Some(def) = self.parser.registry.get(canonical) else {
            return false;
        };
        let allowed = def.allowed_within.clone();
        let not_allowed = def.not_allowed_within.clone();
        *close_count = 0;

        let depth = self.stack.len();
        if depth == 2 {
            return allowed
                .iter()
                .any(|t| t == &self.parser.config.root_content_type);
        }
        let parent_ok = match self.content_type_of(self.stack[depth - 2]) {
            Some(parent_type) => allowed.iter().any(|t| t == parent_type),
            None => false,
        };
        if !parent_ok {
            return self.is_openable_with_close(canonical, close_count);
        }
        for i in 1..depth - 1 {
            let blocked = match self.content_type_of(self.stack[i]) {
                Some(frame_type) => not_allowed.iter().any(|t| t == frame_type),
                None => false,
            };
            if blocked {
                return self.is_openable_with_close(canonical, close_count);
            }
        }
        true
    }

    /// Whether closing a contiguous prefix of the stack makes the pending
    /// element legal, and how many ancestors that takes.
    fn is_openable_with_close(&mut self, canonical: &str, close_count: &mut usize) -> bool {
        let policy = self
            .parser
            .registry
            .get(canonical)
            .map(|def| def.flags.close_policy)
            .unwrap_or_default();
        if !matches!(policy, ClosePolicy::Forbidden | ClosePolicy::Optional) {
            return false;
        }
        let Some(target) = self.find_named_node(canonical, true) else {
            return false;
        };
        let depth = self.stack.len();
        if depth < 3 {
            return false;
        }
        let validate_again = self.parser.config.validate_again;
        let mut count = 0;
        for i in (1..=depth - 2).rev() {
            count += 1;
            let frame = self.stack[i];
            if frame == target {
                *close_count = count;
                return true;
            }
            let frame_policy = match self.arena.element(frame) {
                Some(el) => el.flags.close_policy,
                None => return false,
            };
            if matches!(
                frame_policy,
                ClosePolicy::ImplicitOnCloseOnly | ClosePolicy::MustExist
            ) {
                return false;
            }
            if validate_again && !self.validate_node(frame, ValidateAction::Again) {
                return false;
            }
        }
        false
    }

    /// Nearest stack frame a close tag for `name` may refer to, with the
    /// number of frames that closing it pops.
    fn is_closeable(&mut self, name: &str, close_count: &mut usize) -> bool {
        let Some(target) = self.find_named_node(name, false) else {
            return false;
        };
        let depth = self.stack.len();
        let mut count = 0;
        for i in (1..depth).rev() {
            count += 1;
            let frame = self.stack[i];
            if frame == target {
                *close_count = count;
                return true;
            }
            let frame_policy = match self.arena.element(frame) {
                Some(el) => el.flags.close_policy,
                None => return false,
            };
            if frame_policy == ClosePolicy::MustExist {
                return false;
            }
        }
        false
    }

    fn validate_close_tags(&mut self, close_count: usize) -> bool {
        if !self.parser.config.validate_again {
            return true;
        }
        let depth = self.stack.len();
        for i in ((depth - close_count)..depth).rev() {
            let frame = self.stack[i];
            if !self.validate_node(frame, ValidateAction::Again) {
                return false;
            }
        }
        true
    }

    /// Nearest stack entry whose name matches under the case rules.
    /// `skip_top` leaves the pending element itself out of the search.
    fn find_named_node(&self, name: &str, skip_top: bool) -> Option<NodeId> {
        let canonical = self.parser.canonical(name)?;
        let tag_case_sensitive = self
            .parser
            .registry
            .get(&canonical)
            .map(|def| def.flags.case_sensitive)
            .unwrap_or(true);
        let case_sensitive = self.parser.config.case_sensitive && tag_case_sensitive;
        let mut upper = self.stack.len();
        if skip_top {
            upper -= 1;
        }
        for i in (1..upper).rev() {
            let Some(el) = self.arena.element(self.stack[i]) else {
                continue;
            };
            let matched = if case_sensitive {
                el.name == canonical
            } else {
                el.name.eq_ignore_ascii_case(&canonical)
            };
            if matched {
                return Some(self.stack[i]);
            }
        }
        None
    }

    /// Run a validation pass over an element through its handler.
    ///
    /// Content-capturing modes see the captured body when the element holds
    /// exactly one text child; a successful content validation also fences
    /// the element off from paragraph breakup.
    fn validate_node(&mut self, id: NodeId, action: ValidateAction) -> bool {
        let Some(def) = self.arena.element(id).and_then(|el| el.code.clone()) else {
            return false;
        };
        if matches!(def.mode, ReplaceMode::Static | ReplaceMode::StaticVoid) {
            return match self.arena.element(id) {
                Some(el) => el.attributes.is_empty(),
                None => false,
            };
        }
        let content_id = if def.mode.passes_content() {
            match self.arena.children(id) {
                &[only] if self.arena.text(only).is_some() => Some(only),
                _ => None,
            }
        } else {
            None
        };
        let result = {
            let Some(el) = self.arena.element(id) else {
                return false;
            };
            let content = content_id
                .and_then(|cid| self.arena.text(cid))
                .map(|t| t.content.as_str());
            def.handler.validate(action, &el.attributes, content)
        };
        if result && content_id.is_some() {
            if let Some(el) = self.arena.element_mut(id) {
                if el.flags.paragraph_type == ParagraphType::AllowBreakup {
                    el.flags.paragraph_type = ParagraphType::AllowInside;
                }
            }
        }
        result
    }

    /// Close `close_count` ancestors (deepest first) and re-attach the
    /// pending element above them.
    fn close_and_reattach(&mut self, close_count: usize) -> Result<(), ParseError> {
        let pending = self
            .stack
            .pop()
            .ok_or(ParseError::Invariant("open-node stack is empty"))?;
        for _ in 0..close_count {
            if self.stack.len() <= 1 {
                return Err(ParseError::Invariant("auto-close reached the root"));
            }
            self.stack.pop();
        }
        let new_parent = self.top()?;
        self.arena.append_child(new_parent, pending);
        self.stack.push(pending);
        Ok(())
    }

    fn pop_node(&mut self) -> Result<(), ParseError> {
        if self.stack.len() <= 1 {
            return Err(ParseError::Invariant("attempted to pop the root"));
        }
        self.stack.pop();
        Ok(())
    }

    /// Restore the checkpoint of the innermost candidate and resume in text
    /// state with its marker re-injected as literal text.
    fn reparse_after_current_block(&mut self) -> Result<(), ParseError> {
        if self.state == State::CloseTagName {
            // No stack entry to unwind; the close-tag-name state is only
            // abandoned at end of input. The partial name re-lexes as text.
            self.saved_name.clear();
            self.cpos = self.close_began + 2;
            self.set_state(State::Text);
            self.append_text("[/")?;
            self.reparsed = true;
            log::trace!(target: "bbmark.parser", "backtrack: close marker at {} is literal", self.close_began);
            return Ok(());
        }
        if self.stack.len() <= 1 {
            return Err(ParseError::Invariant("backtrack with empty stack"));
        }
        let abandoned = self
            .stack
            .pop()
            .ok_or(ParseError::Invariant("open-node stack is empty"))?;
        self.arena.detach(abandoned);
        let occurred_at = self
            .arena
            .occurred_at(abandoned)
            .ok_or(ParseError::Invariant("candidate without source position"))?;
        self.set_state(State::Text);
        self.append_text("[")?;
        self.cpos = occurred_at + 1;
        self.reparsed = true;
        log::trace!(target: "bbmark.parser", "backtrack: marker at {occurred_at} is literal");
        Ok(())
    }

    /// End-of-input handling for still-open frames.
    fn close_remaining_blocks(&mut self) -> Result<(), ParseError> {
        if self.stack.len() == 1 {
            return Ok(());
        }
        let unclosed_name = |arena: &NodeArena, id: NodeId| {
            arena
                .element(id)
                .map(|el| el.name.clone())
                .unwrap_or_default()
        };
        if self.parser.config.strict {
            let top = self.top()?;
            return Err(ParseError::UnclosedTag {
                name: unclosed_name(&self.arena, top),
            });
        }
        while self.stack.len() > 1 {
            let top = self.top()?;
            let policy = match self.arena.element(top) {
                Some(el) => el.flags.close_policy,
                None => ClosePolicy::Implicit,
            };
            if policy == ClosePolicy::MustExist {
                return Err(ParseError::UnclosedTag {
                    name: unclosed_name(&self.arena, top),
                });
            }
            self.pop_node()?;
        }
        Ok(())
    }
}
