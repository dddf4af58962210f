//! State-dependent multi-pattern search over the remaining input.
//!
//! Each parser state owns a fixed, ordered set of marker strings (needles).
//! The scanner finds the earliest occurrence of any needle past the cursor;
//! when several needles start at the same position the one listed first
//! wins, so sets are ordered from most to least specific (a quoted-value
//! closer before a bare `]`, an escaped quote before the quote itself).
//!
//! Needles are ASCII, so a match offset is always a UTF-8 boundary of the
//! input and the literal slices cut around it stay valid.

use memchr::{memchr, memchr2, memchr3};

/// Semantic role of a matched needle in the current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lexeme {
    /// `[` in text state.
    TagOpen,
    /// `[/` in text state.
    CloseOpen,
    /// `]` terminating a tag.
    TagEnd,
    /// Separator after the tag name starting the default attribute value.
    DefaultSep { quote: Option<u8> },
    /// `=` variants after an attribute name.
    AttrSep { quote: Option<u8> },
    /// A bare space.
    Space,
    /// `\\` inside a quoted value.
    EscapedBackslash,
    /// Backslash followed by the active quote character.
    EscapedQuote,
    /// Closing quote followed by a space.
    QuoteSpace,
    /// Closing quote followed by `]`.
    QuoteEnd,
    /// Closing quote followed by anything else.
    QuoteBare,
    /// Exact `[/name]` of the capturing element.
    CloseExact,
    /// `[/` fallback for case-insensitive close scanning.
    CloseFallback,
}

struct Needle {
    text: Box<str>,
    lexeme: Lexeme,
}

enum Probe {
    One(u8),
    Two(u8, u8),
    Three(u8, u8, u8),
    Scan(Vec<u8>),
}

/// An ordered needle set with a precomputed first-byte probe.
pub(crate) struct NeedleSet {
    needles: Vec<Needle>,
    probe: Probe,
}

impl NeedleSet {
    fn build(needles: Vec<(String, Lexeme)>) -> Self {
        let needles: Vec<Needle> = needles
            .into_iter()
            .map(|(text, lexeme)| {
                debug_assert!(!text.is_empty() && text.is_ascii());
                Needle {
                    text: text.into_boxed_str(),
                    lexeme,
                }
            })
            .collect();
        let mut first_bytes: Vec<u8> = Vec::new();
        for needle in &needles {
            let b = needle.text.as_bytes()[0];
            if !first_bytes.contains(&b) {
                first_bytes.push(b);
            }
        }
        let probe = match first_bytes.as_slice() {
            &[a] => Probe::One(a),
            &[a, b] => Probe::Two(a, b),
            &[a, b, c] => Probe::Three(a, b, c),
            _ => Probe::Scan(first_bytes),
        };
        Self { needles, probe }
    }

    /// Earliest needle occurrence at or after `from`.
    ///
    /// Returns `(offset, lexeme, needle_len)`.
    pub(crate) fn find(&self, bytes: &[u8], from: usize) -> Option<(usize, Lexeme, usize)> {
        let mut pos = from;
        while pos < bytes.len() {
            let rel = match &self.probe {
                Probe::One(a) => memchr(*a, &bytes[pos..]),
                Probe::Two(a, b) => memchr2(*a, *b, &bytes[pos..]),
                Probe::Three(a, b, c) => memchr3(*a, *b, *c, &bytes[pos..]),
                Probe::Scan(set) => bytes[pos..].iter().position(|b| set.contains(b)),
            };
            let hit = pos + rel?;
            for needle in &self.needles {
                if bytes[hit..].starts_with(needle.text.as_bytes()) {
                    return Some((hit, needle.lexeme, needle.text.len()));
                }
            }
            pos = hit + 1;
        }
        None
    }

    /// Text state: tag markers only.
    pub(crate) fn text_state() -> Self {
        Self::build(vec![
            ("[/".to_string(), Lexeme::CloseOpen),
            ("[".to_string(), Lexeme::TagOpen),
        ])
    }

    /// Open-tag-name state: tag end, default-value separators, attributes.
    pub(crate) fn open_name_state() -> Self {
        Self::build(vec![
            ("]".to_string(), Lexeme::TagEnd),
            (" = \"".to_string(), Lexeme::DefaultSep { quote: Some(b'"') }),
            ("=\"".to_string(), Lexeme::DefaultSep { quote: Some(b'"') }),
            (" = '".to_string(), Lexeme::DefaultSep { quote: Some(b'\'') }),
            ("='".to_string(), Lexeme::DefaultSep { quote: Some(b'\'') }),
            (" = ".to_string(), Lexeme::DefaultSep { quote: None }),
            ("=".to_string(), Lexeme::DefaultSep { quote: None }),
            (": ".to_string(), Lexeme::DefaultSep { quote: None }),
            (":".to_string(), Lexeme::DefaultSep { quote: None }),
            (" ".to_string(), Lexeme::Space),
        ])
    }

    /// Close-tag-name state: only the closing bracket ends the name.
    pub(crate) fn close_name_state() -> Self {
        Self::build(vec![("]".to_string(), Lexeme::TagEnd)])
    }

    fn quoted_value_needles(quote: u8, with_space: bool) -> Vec<(String, Lexeme)> {
        let q = quote as char;
        let mut needles = vec![
            ("\\\\".to_string(), Lexeme::EscapedBackslash),
            (format!("\\{q}"), Lexeme::EscapedQuote),
        ];
        if with_space {
            needles.push((format!("{q} "), Lexeme::QuoteSpace));
        }
        needles.push((format!("{q}]"), Lexeme::QuoteEnd));
        needles.push((q.to_string(), Lexeme::QuoteBare));
        needles
    }

    /// Default-attribute-value state.
    pub(crate) fn default_value_state(quote: Option<u8>, mixed_attributes: bool) -> Self {
        match quote {
            Some(q) => Self::build(Self::quoted_value_needles(q, mixed_attributes)),
            None if mixed_attributes => Self::build(vec![
                (" ".to_string(), Lexeme::Space),
                ("]".to_string(), Lexeme::TagEnd),
            ]),
            None => Self::build(vec![("]".to_string(), Lexeme::TagEnd)]),
        }
    }

    /// Attribute-name state.
    pub(crate) fn attr_name_state() -> Self {
        Self::build(vec![
            (" ".to_string(), Lexeme::Space),
            ("]".to_string(), Lexeme::TagEnd),
            ("=\"".to_string(), Lexeme::AttrSep { quote: Some(b'"') }),
            ("='".to_string(), Lexeme::AttrSep { quote: Some(b'\'') }),
            ("=".to_string(), Lexeme::AttrSep { quote: None }),
        ])
    }

    /// Attribute-value state.
    pub(crate) fn attr_value_state(quote: Option<u8>) -> Self {
        match quote {
            Some(q) => Self::build(Self::quoted_value_needles(q, true)),
            None => Self::build(vec![
                (" ".to_string(), Lexeme::Space),
                ("]".to_string(), Lexeme::TagEnd),
            ]),
        }
    }

    /// Content-capture state: the exact close tag of the capturing element,
    /// plus a `[/` fallback when case-insensitive close scanning applies.
    pub(crate) fn content_capture_state(name: &str, case_insensitive_close: bool) -> Self {
        let mut needles = vec![(format!("[/{name}]"), Lexeme::CloseExact)];
        if case_insensitive_close {
            needles.push(("[/".to_string(), Lexeme::CloseFallback));
        }
        Self::build(needles)
    }
}
