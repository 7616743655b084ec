//! Prompt and command injection detector

use std::cmp::Ordering;

use super::analyzer::{
    adjust_severity, analyze_context, encoded_payloads, extract_indicators, quoted_spans,
    shannon_entropy,
};
use super::patterns::CATALOG;
use super::types::{
    ContextFlags, InjectionConfig, InjectionFinding, InjectionKind, InjectionScan, Span,
};
use crate::text::truncate_chars;

const BASE_CONFIDENCE: f64 = 0.8;
const BENIGN_PENALTY: f64 = 0.3;
const ENTROPY_BOOST: f64 = 0.1;
const HIGH_ENTROPY: f64 = 4.5;
const KIND_BOOST: f64 = 0.1;
const LONG_MATCH_BOOST: f64 = 0.05;
const LONG_MATCH: usize = 50;

/// Stateless injection scanner
#[derive(Debug, Clone, Default)]
pub struct InjectionDetector {
    config: InjectionConfig,
}

impl InjectionDetector {
    pub fn new(config: InjectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InjectionConfig {
        &self.config
    }

    pub fn detect(&self, text: &str) -> Vec<InjectionFinding> {
        self.scan(text).findings
    }

    pub fn scan(&self, text: &str) -> InjectionScan {
        let (text, truncated) = truncate_chars(text, self.config.max_input_chars);

        let quoted = if self.config.context_analysis {
            quoted_spans(text)
        } else {
            Vec::new()
        };
        let high_entropy = self.config.entropy_check && shannon_entropy(text) > HIGH_ENTROPY;
        let payloads = if self.config.entropy_check {
            encoded_payloads(text)
        } else {
            Vec::new()
        };

        let mut findings = Vec::new();
        for pattern in CATALOG.iter() {
            if !self.config.mode.includes(pattern.kind) {
                continue;
            }

            for m in pattern.regex.find_iter(text) {
                let span = Span {
                    start: m.start(),
                    end: m.end(),
                };
                let context = if self.config.context_analysis {
                    analyze_context(text, span, &quoted)
                } else {
                    ContextFlags::default()
                };

                let base = pattern.kind.base_severity();
                let severity = adjust_severity(base, &context);
                if severity < self.config.severity_threshold {
                    continue;
                }

                let mut indicators = extract_indicators(pattern.kind, m.as_str());
                indicators.extend(payloads.iter().map(|e| e.indicator().to_string()));

                findings.push(InjectionFinding {
                    pattern_id: pattern.kind,
                    category: pattern.kind.category(),
                    severity,
                    base_severity: base,
                    span,
                    confidence: confidence(pattern.kind, m.len(), &context, high_entropy),
                    context,
                    indicators,
                });
            }
        }

        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.span.start.cmp(&b.span.start))
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });

        InjectionScan {
            risk_score: risk_score(&findings),
            findings,
            truncated,
        }
    }
}

fn confidence(kind: InjectionKind, match_len: usize, context: &ContextFlags, high_entropy: bool) -> f64 {
    let mut confidence = BASE_CONFIDENCE;

    if context.is_benign() {
        confidence -= BENIGN_PENALTY;
    }
    if high_entropy {
        confidence += ENTROPY_BOOST;
    }
    if matches!(
        kind,
        InjectionKind::DanVariant | InjectionKind::IgnorePrevious | InjectionKind::SystemRole
    ) {
        confidence += KIND_BOOST;
    }
    if match_len > LONG_MATCH {
        confidence += LONG_MATCH_BOOST;
    }

    confidence.clamp(0.0, 1.0)
}

/// Maximum adjusted severity score, 0 for no findings
pub fn risk_score(findings: &[InjectionFinding]) -> u8 {
    findings
        .iter()
        .map(|f| f.severity.score())
        .max()
        .unwrap_or(0)
}
