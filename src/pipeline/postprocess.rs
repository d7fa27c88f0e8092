//! Post-processing: deterministic cleanup of generated text.
//!
//! Models sometimes return output that is right in substance but wrong in
//! shape: the whole deck wrapped in ` ```markdown ` fences, CRLF line
//! endings, zero-width characters, a missing Marp front matter block, or a
//! chatty preamble before the first speaker marker. The rules here fix those
//! quirks without touching content, so the prompts can stay focused on *what*
//! to generate.
//!
//! ## Rule Order
//!
//! Fences are stripped before line endings are normalised and before the
//! front matter is inspected, so the front-matter check sees the deck as the
//! renderer will.

use crate::prompts::SPEAKER_DELIMITER_PREFIX;
use once_cell::sync::Lazy;
use regex::Regex;

/// Front matter prepended to decks that come back without one.
const MARP_FRONT_MATTER: &str = "---\nmarp: true\npaginate: true\n---\n\n";

/// Clean generated prose (refined content, speaker text).
///
/// Rules (applied in order):
/// 1. Strip outer markdown fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 2
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Ensure the text ends with exactly one newline
pub fn clean_generated_text(input: &str) -> String {
    let s = strip_markdown_fences(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

/// Clean a generated Marp deck: [`clean_generated_text`] plus a guaranteed
/// `marp: true` front matter block.
pub fn clean_slide_markup(input: &str) -> String {
    ensure_marp_front_matter(&clean_generated_text(input))
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md|marp)?\r?\n(.*)\r?\n```\s*$").expect("valid regex")
});

fn strip_markdown_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 5: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 6: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{trimmed}\n")
    }
}

// ── Marp front matter ────────────────────────────────────────────────────────

/// Split `markup` into `(front_matter_body, slides_body)` if it opens with a
/// `---` … `---` block.
fn split_front_matter(markup: &str) -> Option<(&str, &str)> {
    let rest = markup.strip_prefix("---\n")?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Make sure the deck opens with front matter containing `marp: true`.
pub fn ensure_marp_front_matter(markup: &str) -> String {
    match split_front_matter(markup) {
        Some((fm, _)) if fm.lines().any(|l| l.trim() == "marp: true") => markup.to_string(),
        Some((fm, body)) => format!("---\nmarp: true\n{fm}---\n{body}"),
        None => format!("{MARP_FRONT_MATTER}{}", markup.trim_start()),
    }
}

/// Number of slides in a Marp deck.
///
/// Slides are separated by lines consisting of `---`; the front matter does
/// not count and empty chunks are ignored.
pub fn count_slides(markup: &str) -> usize {
    let normalised = normalise_line_endings(markup);
    let body = match split_front_matter(&normalised) {
        Some((_, body)) => body.to_string(),
        None => normalised,
    };

    let mut count = 0;
    let mut has_content = false;
    for line in body.lines() {
        if line.trim() == "---" {
            if has_content {
                count += 1;
            }
            has_content = false;
        } else if !line.trim().is_empty() {
            has_content = true;
        }
    }
    if has_content {
        count += 1;
    }
    count
}

// ── Speaker text ─────────────────────────────────────────────────────────────

static RE_SPEAKER_DELIMITER: Lazy<Regex> = Lazy::new(|| {
    let prefix = regex::escape(SPEAKER_DELIMITER_PREFIX.trim_end());
    Regex::new(&format!(r"(?mi)^[ \t]*{prefix}\s*\d+\][ \t]*$")).expect("valid regex")
});

/// Split speaker text into per-slide fragments.
///
/// Text before the first delimiter is model preamble and is dropped when at
/// least one delimiter is present. Empty fragments are discarded.
pub fn split_speaker_text(text: &str) -> Vec<String> {
    let text = normalise_line_endings(text);
    let mut parts = RE_SPEAKER_DELIMITER.split(&text);
    if RE_SPEAKER_DELIMITER.is_match(&text) {
        parts.next();
    }
    parts
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────
