//! Scrubbing of externally sourced text before it reaches a prompt.
//!
//! Titles and descriptions come from third-party APIs. Anything that looks
//! like an instruction to the model is replaced with `[FILTERED]`, markup is
//! removed, and the result is capped in length.

use regex::Regex;
use std::sync::LazyLock;

/// Default cap on scrubbed text, in characters.
pub const MAX_SCRUBBED_LEN: usize = 500;

const FILTERED: &str = "[FILTERED]";

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Direct overrides
        r"(?i)ignore\s+(all\s+)?(previous|prior|above|earlier)\s+instructions?",
        r"(?i)disregard\s+(all\s+)?(previous|prior|above|earlier)?\s*instructions?",
        r"(?i)forget\s+(all\s+)?(previous|prior|above|earlier)?\s*instructions?",
        r"(?i)override\s+(all\s+)?(previous|prior|above|earlier)?\s*instructions?",
        // Role hijacking
        r"(?i)\byou\s+are\s+now\b",
        r"(?i)\bact\s+as\b",
        r"(?i)\bpretend\s+(you\s+are|to\s+be)\b",
        r"(?i)\byour\s+new\s+role\b",
        // Instruction markers
        r"(?i)\bnew\s+(instructions?|directive|task|goal|objective)\b",
        r"(?i)\bsystem\s+prompt\b",
        r"(?i)<\s*(system|instructions?|prompt)\s*>",
        r"(?i)```\s*(system|instructions?)\b",
        // Fake turn labels
        r"(?i)\b(system|assistant|human|user)\s*:\s",
        // Fund movement
        r"(?i)\bsend\s+\d[\d.,]*\s*(usdc|sol|eth|btc|usd)?\b",
        r"(?i)\btransfer\s+\d[\d.,]*\s*(usdc|sol|eth|btc|usd)?\b",
        r"(?i)\bwire\s+\d[\d.,]*\b",
        r"(?i)\bsend\s+(all|everything|funds|balance)\b",
        // Key exfiltration
        r"(?i)\b(reveal|output|print|return|show|expose)\s+(the\s+)?(private\s+key|seed|mnemonic|keypair|secret)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]{0,200}>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());

/// Scrub `text` with the default length cap.
pub fn scrub(text: &str) -> String {
    scrub_with_limit(text, MAX_SCRUBBED_LEN)
}

/// Decode entities, strip tags, neutralize injection phrases, collapse
/// whitespace and truncate to `max_len` characters.
pub fn scrub_with_limit(text: &str, max_len: usize) -> String {
    if text.is_empty() {
        return String::new();
    }

    let decoded = decode_entities(text);
    let mut out = HTML_TAG.replace_all(&decoded, " ").into_owned();
    for pattern in INJECTION_PATTERNS.iter() {
        out = pattern.replace_all(&out, FILTERED).into_owned();
    }
    let collapsed = WHITESPACE.replace_all(&out, " ");
    truncate_chars(collapsed.trim(), max_len)
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or(body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match body {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    _ => None,
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
