//! Emoji mapper — rewrites plain emoji into custom-emoji references.
//!
//! Pure text → text. Matched glyphs are wrapped as Telegram custom-emoji
//! spans (`<tg-emoji emoji-id="...">glyph</tg-emoji>`, sent with HTML parse
//! mode). Existing spans are copied verbatim and never re-wrapped, so
//! rewriting already-rewritten text is a no-op.

use std::collections::{BTreeMap, HashSet};

use unicode_segmentation::UnicodeSegmentation;

/// Glyph → platform custom-emoji id.
pub type EmojiMap = BTreeMap<String, String>;

const SPAN_OPEN: &str = "<tg-emoji";
const SPAN_CLOSE: &str = "</tg-emoji>";

/// Result of one rewrite pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteResult {
    /// The rewritten text. Equal to the input when `changed` is false.
    pub text: String,
    /// Whether any glyph was replaced.
    pub changed: bool,
    /// Number of glyphs replaced.
    pub replaced: usize,
}

impl RewriteResult {
    fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            changed: false,
            replaced: 0,
        }
    }
}

/// Rewrite every mapped glyph in `text` into a custom-emoji span.
///
/// Matching runs on grapheme boundaries: a key matches only when both its
/// start and end land on a boundary, so half of a multi-codepoint cluster
/// (a flag pair, a ZWJ sequence) never matches. When mapped glyphs share a
/// prefix, the longest key wins.
pub fn rewrite(text: &str, map: &EmojiMap) -> RewriteResult {
    if text.is_empty() || map.is_empty() {
        return RewriteResult::unchanged(text);
    }

    // Longest key first so "❤️" beats "❤" at the same position.
    let mut keys: Vec<(&str, &str)> = map
        .iter()
        .filter(|(glyph, _)| !glyph.is_empty())
        .map(|(glyph, id)| (glyph.as_str(), id.as_str()))
        .collect();
    keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let boundaries: HashSet<usize> = text
        .grapheme_indices(true)
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut out = String::with_capacity(text.len() + 64);
    let mut replaced = 0usize;
    let mut i = 0usize;

    while i < text.len() {
        let rest = &text[i..];

        // Copy an existing span through its closing tag untouched.
        if rest.starts_with(SPAN_OPEN) {
            if let Some(close) = rest.find(SPAN_CLOSE) {
                let end = i + close + SPAN_CLOSE.len();
                out.push_str(&text[i..end]);
                i = end;
                continue;
            }
        }

        if boundaries.contains(&i) {
            if let Some((glyph, id)) = keys
                .iter()
                .find(|(glyph, _)| rest.starts_with(glyph) && boundaries.contains(&(i + glyph.len())))
            {
                out.push_str("<tg-emoji emoji-id=\"");
                out.push_str(id);
                out.push_str("\">");
                out.push_str(glyph);
                out.push_str(SPAN_CLOSE);
                i += glyph.len();
                replaced += 1;
                continue;
            }
        }

        let Some(ch) = rest.chars().next() else {
            break;
        };
        out.push(ch);
        i += ch.len_utf8();
    }

    if replaced == 0 {
        return RewriteResult::unchanged(text);
    }
    RewriteResult {
        text: out,
        changed: true,
        replaced,
    }
}
