//! Post-processing: deterministic cleanup of model output before chunking.
//!
//! Even when told to output plain prose, vision models often answer in
//! Markdown: fenced blocks, `#` headings, `**bold**`, bullet markers. A speech
//! engine reads those characters aloud ("asterisk asterisk"), so they are
//! removed here. The rules are cheap, pure `&str → String` passes applied in
//! a fixed order:
//!
//! 1. Strip an outer code fence
//! 2. Normalise line endings (CRLF → LF)
//! 3. Remove heading markers and bullet / blockquote prefixes
//! 4. Remove emphasis markers (`**`, `__`, `*`, `` ` ``)
//! 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
//! 6. Collapse all whitespace runs into single spaces

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a model response.
pub fn clean_for_speech(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = strip_line_markers(&s);
    let s = strip_emphasis(&s);
    let s = remove_invisible_chars(&s);
    collapse_whitespace(&s)
}

// ── Rule 1: Strip outer fence ────────────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Heading, bullet and quote markers ───────────────────────────────

static RE_LINE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:#{1,6}[ \t]+|[-*+][ \t]+|>[ \t]*)").unwrap());

fn strip_line_markers(input: &str) -> String {
    RE_LINE_MARKER.replace_all(input, "").to_string()
}

// ── Rule 4: Emphasis markers ─────────────────────────────────────────────────

static RE_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*|__|\*|`").unwrap());

fn strip_emphasis(input: &str) -> String {
    RE_EMPHASIS.replace_all(input, "").to_string()
}

// ── Rule 5: Invisible Unicode ────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 6: Whitespace ───────────────────────────────────────────────────────

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
