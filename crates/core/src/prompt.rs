//! Weighted prompt parsing.
//!
//! Prompts may carry per-segment weights using a `::` delimiter, e.g.
//! `"a man and his dog::2 funny weather::3 a piece of gum"`. A prompt
//! without the delimiter passes through untouched. Parsing is
//! fail-open: there is no input that aborts task construction.

/// Result of parsing a raw prompt string.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPrompt {
    /// No delimiter present; the original string, unchanged.
    Simple(String),
    /// Weighted segments in original order, whitespace-trimmed,
    /// weights clamped to `>= 0.0`.
    Weighted(Vec<(String, f64)>),
}

/// Parse a raw prompt into [`ParsedPrompt`].
///
/// A run of two or more consecutive colons counts as a single
/// delimiter occurrence. Between delimiters, fragments accumulate into
/// the current segment; a fragment whose leading space-delimited token
/// parses as a number closes the *previous* segment with that number
/// as its weight, and the remainder of the fragment starts the next
/// segment. The final segment defaults to weight `1.0`.
pub fn parse(raw: &str) -> ParsedPrompt {
    let mut fragments = split_on_delimiter(raw);
    if fragments.len() == 1 {
        return ParsedPrompt::Simple(raw.to_string());
    }

    let mut segments = Vec::new();
    let mut current = String::new();

    for i in 0..fragments.len() {
        if fragments[i].is_empty() {
            // Skipped, but the open segment keeps accumulating.
            continue;
        }
        current.push_str(&fragments[i]);

        let mut weight = 1.0;
        if i + 1 < fragments.len() {
            match leading_number(&fragments[i + 1]) {
                Some((w, rest)) => {
                    weight = w;
                    fragments[i + 1] = rest;
                }
                // Next fragment is plain text: keep concatenating
                // without closing the segment.
                None => continue,
            }
        }

        segments.push((current.trim().to_string(), weight.max(0.0)));
        current.clear();
    }

    ParsedPrompt::Weighted(segments)
}

/// Split on runs of two or more colons. A single colon is ordinary
/// prompt text.
fn split_on_delimiter(raw: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            while chars.peek() == Some(&':') {
                chars.next();
            }
            fragments.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fragments.push(current);
    fragments
}

/// If the fragment's leading space-delimited token parses as a number,
/// return the number and the remainder of the fragment.
fn leading_number(fragment: &str) -> Option<(f64, String)> {
    match fragment.split_once(' ') {
        Some((lead, rest)) => lead.parse::<f64>().ok().map(|w| (w, rest.to_string())),
        None => fragment.parse::<f64>().ok().map(|w| (w, String::new())),
    }
}
