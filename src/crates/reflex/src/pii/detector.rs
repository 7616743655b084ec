//! PII detector
//!
//! Runs every catalog pattern enabled by the configured [`PatternSet`],
//! validates candidates, scores them and resolves overlaps so each byte of
//! input belongs to at most one finding.

use super::patterns::{context_keywords, PiiPattern, CATALOG};
use super::redactor::mask_value;
use super::types::{PatternSet, PiiConfig, PiiFinding, PiiScan};
use crate::text::truncate_chars;

/// Base confidences before the context boost
const VALIDATED: f64 = 1.0;
const ANCHORED: f64 = 0.95;
const FORMAT_ONLY: f64 = 0.9;
const UNVALIDATED: f64 = 0.8;
const CONTEXT_BOOST: f64 = 0.05;

/// How far back (bytes) a context keyword may appear
const CONTEXT_WINDOW: usize = 40;

#[derive(Debug, Clone)]
struct Candidate {
    finding: PiiFinding,
    catalog_index: usize,
}

/// Stateless PII scanner; cheap to clone and safe to share
#[derive(Debug, Clone, Default)]
pub struct PiiDetector {
    config: PiiConfig,
}

impl PiiDetector {
    pub fn new(config: PiiConfig) -> Self {
        Self { config }
    }

    pub fn with_pattern_set(pattern_set: PatternSet) -> Self {
        Self::new(PiiConfig {
            pattern_set,
            ..PiiConfig::default()
        })
    }

    pub fn config(&self) -> &PiiConfig {
        &self.config
    }

    /// Findings ordered by start offset
    pub fn detect(&self, text: &str) -> Vec<PiiFinding> {
        self.scan(text).findings
    }

    pub fn contains_pii(&self, text: &str) -> bool {
        !self.detect(text).is_empty()
    }

    /// Scan `text`, truncating it to the configured ceiling first
    pub fn scan(&self, text: &str) -> PiiScan {
        let (text, truncated) = truncate_chars(text, self.config.max_input_chars);

        let mut candidates = Vec::new();
        for (index, pattern) in CATALOG.iter().enumerate() {
            if !self.config.pattern_set.includes(pattern.pii_type) {
                continue;
            }
            self.collect(text, index, pattern, &mut candidates);
        }

        PiiScan {
            findings: resolve_overlaps(candidates),
            truncated,
        }
    }

    fn collect(
        &self,
        text: &str,
        catalog_index: usize,
        pattern: &PiiPattern,
        out: &mut Vec<Candidate>,
    ) {
        for caps in pattern.regex.captures_iter(text) {
            let m = if pattern.anchored { caps.get(1) } else { caps.get(0) };
            let Some(m) = m else { continue };
            let value = m.as_str();

            let mut confidence = match (pattern.validator, self.config.enable_validation) {
                (Some(validate), true) => {
                    if !validate(value) {
                        continue;
                    }
                    VALIDATED
                }
                (Some(_), false) => UNVALIDATED,
                (None, _) if pattern.anchored => ANCHORED,
                (None, _) => FORMAT_ONLY,
            };

            if self.config.context_boost && has_context(text, m.start(), pattern) {
                confidence = (confidence + CONTEXT_BOOST).min(1.0);
            }

            if confidence < self.config.min_confidence {
                continue;
            }

            out.push(Candidate {
                finding: PiiFinding {
                    pii_type: pattern.pii_type,
                    start: m.start(),
                    end: m.end(),
                    redacted_value: mask_value(pattern.pii_type, value),
                    confidence,
                    severity: pattern.pii_type.severity(),
                },
                catalog_index,
            });
        }
    }
}

fn has_context(text: &str, start: usize, pattern: &PiiPattern) -> bool {
    let mut from = start.saturating_sub(CONTEXT_WINDOW);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let window = text[from..start].to_lowercase();
    context_keywords(pattern.pii_type)
        .iter()
        .any(|kw| window.contains(kw))
}

/// Keep the most important candidate wherever spans collide
///
/// Preference: higher severity, then the longer span, then the earlier
/// start, then catalog order.
fn resolve_overlaps(mut candidates: Vec<Candidate>) -> Vec<PiiFinding> {
    candidates.sort_by(|a, b| {
        b.finding
            .severity
            .cmp(&a.finding.severity)
            .then_with(|| b.finding.len().cmp(&a.finding.len()))
            .then_with(|| a.finding.start.cmp(&b.finding.start))
            .then_with(|| a.catalog_index.cmp(&b.catalog_index))
    });

    let mut accepted: Vec<PiiFinding> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if accepted.iter().all(|f| !f.overlaps(&candidate.finding)) {
            accepted.push(candidate.finding);
        }
    }

    accepted.sort_by_key(|f| f.start);
    accepted
}
