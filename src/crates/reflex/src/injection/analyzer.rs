//! Context, entropy and encoding analysis for injection matches
//!
//! Context is judged per match: a phrase inside quotation marks or right
//! after a negation is discussed, not issued.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use super::types::{ContextFlags, InjectionKind, Span};
use crate::Severity;

/// Bytes before a match searched for academic/testing framing
const FRAMING_WINDOW: usize = 120;

/// Bytes before a match searched for a negation
const NEGATION_WINDOW: usize = 24;

static ACADEMIC: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(r"(?i)\b(?:research(?:ers?)?|academic|educational|study|studies|paper|thesis|dissertation|discuss(?:es|ing|ion)?|analy[sz](?:e|es|is|ing))\b")
});

static TESTING: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(r"(?i)\b(?:test(?:s|ing)?|example|for\s+instance|e\.g\.|demonstration|sample|illustration|case\s+study)\b")
});

static NEGATION: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(r"(?i)\b(?:don't|do\s+not|avoid|never|should\s+not|shouldn't|must\s+not|mustn't)\b")
});

fn compile(source: &str) -> Option<Regex> {
    match Regex::new(source) {
        Ok(regex) => Some(regex),
        Err(err) => {
            tracing::error!("Context pattern failed to compile: {}", err);
            None
        }
    }
}

fn is_match(regex: &Lazy<Option<Regex>>, text: &str) -> bool {
    regex.as_ref().map(|r| r.is_match(text)).unwrap_or(false)
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Byte ranges enclosed in quotation marks, delimiters included
///
/// Straight double quotes pair up in order. Curly quotes open and close
/// explicitly. A single quote opens only at the start of the text or after
/// whitespace so apostrophes ("don't") are not mistaken for quotes.
pub fn quoted_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut open: Option<(char, usize)> = None;
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        let next = chars.peek().map(|(_, c)| *c);
        match open {
            None => {
                let opens = match ch {
                    '"' | '\u{201C}' => true,
                    '\'' | '\u{2018}' => prev.map(char::is_whitespace).unwrap_or(true),
                    _ => false,
                };
                if opens {
                    open = Some((ch, idx));
                }
            }
            Some((opener, start)) => {
                let closes = match opener {
                    '"' => ch == '"',
                    '\u{201C}' => ch == '\u{201D}',
                    '\u{2018}' => ch == '\u{2019}',
                    '\'' => ch == '\'' && !next.map(char::is_alphanumeric).unwrap_or(false),
                    _ => false,
                };
                if closes {
                    spans.push(Span {
                        start,
                        end: idx + ch.len_utf8(),
                    });
                    open = None;
                }
            }
        }
        prev = Some(ch);
    }

    spans
}

/// Inspect the surroundings of `span` within `text`
pub fn analyze_context(text: &str, span: Span, quoted: &[Span]) -> ContextFlags {
    let framing_from = floor_boundary(text, span.start.saturating_sub(FRAMING_WINDOW));
    let framing = &text[framing_from..span.end];

    let negation_from = floor_boundary(text, span.start.saturating_sub(NEGATION_WINDOW));
    let lead_in = &text[negation_from..span.start];

    ContextFlags {
        academic: is_match(&ACADEMIC, framing),
        testing: is_match(&TESTING, framing),
        quoted: quoted
            .iter()
            .any(|q| q.start <= span.start && span.end <= q.end),
        negated: is_match(&NEGATION, lead_in),
    }
}

/// Lower a base severity for benign framing
///
/// Academic or testing framing lowers one level. Quoting or negation then
/// drops critical to medium and high to low.
pub fn adjust_severity(base: Severity, context: &ContextFlags) -> Severity {
    let mut adjusted = base;

    if context.academic || context.testing {
        adjusted = adjusted.lower();
    }

    if context.quoted || context.negated {
        adjusted = match adjusted {
            Severity::Critical => Severity::Medium,
            Severity::High => Severity::Low,
            other => other,
        };
    }

    adjusted
}

/// Shannon entropy in bits per character
pub fn shannon_entropy(text: &str) -> f64 {
    let mut freq: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *freq.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let len = total as f64;
    -freq
        .values()
        .map(|&count| {
            let p = count as f64 / len;
            p * p.log2()
        })
        .sum::<f64>()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Base64,
    Hex,
}

impl Encoding {
    pub fn indicator(self) -> &'static str {
        match self {
            Encoding::Base64 => "base64_payload",
            Encoding::Hex => "hex_payload",
        }
    }
}

/// Classify a single token as an encoded payload
pub fn detect_encoding(token: &str) -> Option<Encoding> {
    let len = token.len();
    if len < 20 {
        return None;
    }

    if len % 2 == 0 && token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(Encoding::Hex);
    }

    if len % 4 == 0
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
    {
        let alpha = token.chars().filter(|c| c.is_ascii_alphabetic()).count() as f64 / len as f64;
        if alpha > 0.3 && alpha < 0.9 {
            return Some(Encoding::Base64);
        }
    }

    None
}

/// Encoded payloads among the whitespace-separated tokens of `text`
pub fn encoded_payloads(text: &str) -> Vec<Encoding> {
    let mut found: Vec<Encoding> = text.split_whitespace().filter_map(detect_encoding).collect();
    found.dedup();
    found
}

const KEYWORDS: &[&str] = &[
    "ignore",
    "disregard",
    "forget",
    "override",
    "jailbreak",
    "unrestricted",
    "bypass",
    "prompt",
    "instructions",
    "system",
    "execute",
    "decode",
    "role",
];

/// Trigger words and syntax markers present in a matched snippet
pub fn extract_indicators(kind: InjectionKind, matched: &str) -> Vec<String> {
    let lower = matched.to_lowercase();
    let mut indicators: Vec<String> = KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .map(|kw| kw.to_string())
        .collect();

    if kind == InjectionKind::DanVariant {
        indicators.push("dan".to_string());
    }
    if matched.contains("$(") || matched.contains('`') {
        indicators.push("shell_syntax".to_string());
    }
    if matched.contains("{{") || matched.contains("{%") {
        indicators.push("template_syntax".to_string());
    }
    if matched.contains("</") || matched.contains("<!--") {
        indicators.push("markup_syntax".to_string());
    }

    indicators
}
