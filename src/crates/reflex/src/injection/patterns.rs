//! Injection heuristic catalog
//!
//! One regex per [`InjectionKind`]. Patterns that overlap ordinary requests
//! ("export the data", "show the config") require an attacker-shaped object
//! or destination before they fire.

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::InjectionKind;

/// Bump whenever a pattern or scoring rule changes
pub const CATALOG_VERSION: &str = "inj-2";

#[derive(Debug)]
pub struct InjectionPattern {
    pub kind: InjectionKind,
    pub regex: Regex,
}

fn source(kind: InjectionKind) -> &'static str {
    match kind {
        InjectionKind::IgnorePrevious => {
            r"(?i)\b(?:ignore|disregard|forget|override)\s+(?:(?:all|everything|the|my|your|any)\s+)*(?:(?:previous|above|prior|earlier|preceding)(?:\s+(?:and|or)\s+(?:above|below|previous|earlier))?(?:\s+(?:instructions?|prompts?|directions?|commands?|programming|guidelines?|rules))?|instructions?|prompts?|directions?|programming|guidelines?)\b"
        }
        InjectionKind::NewInstruction => {
            r"(?i)\b(?:from\s+now\s+on|henceforth|starting\s+now|now),?\s+(?:you\s+are|act\s+as|behave\s+like|your\s+role\s+is|your\s+(?:new\s+)?task\s+is)\b"
        }
        InjectionKind::SystemRole => {
            r"(?i)\b(?:pretend\s+(?:that\s+)?you\s+are|act\s+as(?:\s+if\s+you(?:'re|\s+are))?|simulate\s+being|imagine\s+you\s+are|you\s+are\s+now|you're\s+now)\s+(?:an?\s+)?(?:unrestricted|unfiltered|uncensored|(?:unrestricted\s+)?(?:assistant|ai|bot|system|chatbot|agent))\b"
        }
        InjectionKind::DirectExtraction => {
            r"(?i)\b(?:(?:show|reveal|display|print|output|repeat|tell)\s+(?:me\s+)?|what\s+(?:is|are)\s+|what's\s+)(?:your\s+(?:(?:initial|system|hidden|original)\s+)?|the\s+(?:initial|system|hidden|original)\s+)(?:prompt|instructions?|directives?|configuration|guidelines?)\b"
        }
        InjectionKind::IndirectExtraction => {
            r"(?i)\b(?:tell\s+me|explain|describe|what\s+are|list)\s+(?:what\s+you\s+were\s+told|your\s+(?:programming|rules|guidelines|constraints|limitations|restrictions))\b"
        }
        InjectionKind::RolePlay => {
            r"(?i)\b(?:let's\s+play|imagine|hypothetically|in\s+a\s+hypothetical\s+scenario|for\s+(?:educational|research|academic)\s+purposes),?\s+(?:a\s+)?(?:game|scenario|simulation|exercise|world)\b"
        }
        InjectionKind::DanVariant => {
            r"\bDAN\b|(?i:\bdo\s+anything\s+now\b|\b(?:jailbreak|unrestricted|god)\s+mode\b|\b(?:developer|admin)\s+mode\s+(?:enabled|activated|on)\b|\b(?:you\s+have|with)\s+no\s+restrictions\b)"
        }
        InjectionKind::Delimiter => {
            r"(?i)(?:</?system>|</?prompt>|</?context>|<!--\s*end|--!>|:::\s*end\s*:::|\[END\]|\{/?prompt\}|<\|im_(?:start|end)\|>)"
        }
        InjectionKind::NestedPrompt => {
            r#"(?i)\b(?:respond\s+to|execute|process|evaluate):\s*["'`][^"'`]*?\b(?:ignore|override|bypass)\b"#
        }
        InjectionKind::EncodedInstruction => {
            r"(?i)\b(?:decode|decrypt|deobfuscate|unscramble)(?:\s+\w+){0,6}?\s+(?:and\s+)?(?:then\s+)?(?:execute|run|follow|evaluate)\b"
        }
        InjectionKind::CommandInjection => {
            r"\$\([^)]*\)|`[^`]*\b(?:rm|curl|wget|nc|bash|sh|python|chmod)\b[^`]*`|(?:&&|\|\||;)\s*(?:rm|curl|wget|nc|bash|sh|python|chmod)\b|\|\s*(?:sh|bash)\b"
        }
        InjectionKind::TemplateInjection => {
            r"\{\{[^}]*\}\}|\{%[^%]*%\}|\$\{[^}]+\}|<%[^%]*%>"
        }
        InjectionKind::DataExfiltration => {
            r"(?i)\b(?:send|email|post|upload|transmit|export|forward|leak)\s+(?:(?:all|the|this|our|my|your)\s+)*(?:data|conversation|chat|history|logs|messages|secrets|credentials|prompt)\s+to\s+(?:https?://\S+|\S+@\S+\.\w+|(?:my|this|an?|the)\s+(?:external\s+)?(?:server|endpoint|url|webhook|address))|\b(?:send|post|upload|transmit|forward|leak)\b[^.\n]{0,40}?\bto\s+https?://\S+"
        }
        InjectionKind::MemoryAccess => {
            r"(?i)\b(?:show|list|display|dump|access|print)\s+(?:all\s+)?(?:(?:your|the)\s+)?(?:memory|cache|history|state|context\s+(?:window|buffer)|buffer|previous\s+conversations?)\b"
        }
    }
}

/// Every heuristic, in [`InjectionKind::ALL`] order
pub static CATALOG: Lazy<Vec<InjectionPattern>> = Lazy::new(|| {
    InjectionKind::ALL
        .iter()
        .filter_map(|&kind| match Regex::new(source(kind)) {
            Ok(regex) => Some(InjectionPattern { kind, regex }),
            Err(err) => {
                tracing::error!(pattern_id = kind.pattern_id(), "Injection pattern failed to compile: {}", err);
                None
            }
        })
        .collect()
});
