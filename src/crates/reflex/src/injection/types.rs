use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Severity;

/// Injection heuristics in the catalog
///
/// Serialized as the stable `pattern_id` (`ignore_previous`, `dan_variant`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionKind {
    IgnorePrevious,
    NewInstruction,
    SystemRole,
    DirectExtraction,
    IndirectExtraction,
    RolePlay,
    DanVariant,
    Delimiter,
    NestedPrompt,
    EncodedInstruction,
    CommandInjection,
    TemplateInjection,
    DataExfiltration,
    MemoryAccess,
}

impl InjectionKind {
    pub const ALL: [InjectionKind; 14] = [
        InjectionKind::IgnorePrevious,
        InjectionKind::NewInstruction,
        InjectionKind::SystemRole,
        InjectionKind::DirectExtraction,
        InjectionKind::IndirectExtraction,
        InjectionKind::RolePlay,
        InjectionKind::DanVariant,
        InjectionKind::Delimiter,
        InjectionKind::NestedPrompt,
        InjectionKind::EncodedInstruction,
        InjectionKind::CommandInjection,
        InjectionKind::TemplateInjection,
        InjectionKind::DataExfiltration,
        InjectionKind::MemoryAccess,
    ];

    pub fn pattern_id(self) -> &'static str {
        match self {
            InjectionKind::IgnorePrevious => "ignore_previous",
            InjectionKind::NewInstruction => "new_instruction",
            InjectionKind::SystemRole => "system_role",
            InjectionKind::DirectExtraction => "direct_extraction",
            InjectionKind::IndirectExtraction => "indirect_extraction",
            InjectionKind::RolePlay => "role_play",
            InjectionKind::DanVariant => "dan_variant",
            InjectionKind::Delimiter => "delimiter",
            InjectionKind::NestedPrompt => "nested_prompt",
            InjectionKind::EncodedInstruction => "encoded_instruction",
            InjectionKind::CommandInjection => "command_injection",
            InjectionKind::TemplateInjection => "template_injection",
            InjectionKind::DataExfiltration => "data_exfiltration",
            InjectionKind::MemoryAccess => "memory_access",
        }
    }

    /// Severity before context adjustment
    pub fn base_severity(self) -> Severity {
        use InjectionKind::*;
        match self {
            IgnorePrevious | NewInstruction | SystemRole | DanVariant => Severity::Critical,
            DirectExtraction | IndirectExtraction | Delimiter | CommandInjection
            | TemplateInjection | DataExfiltration => Severity::High,
            RolePlay | NestedPrompt | EncodedInstruction | MemoryAccess => Severity::Medium,
        }
    }

    pub fn category(self) -> InjectionCategory {
        use InjectionKind::*;
        match self {
            IgnorePrevious | NewInstruction | NestedPrompt => InjectionCategory::InstructionOverride,
            SystemRole | RolePlay | DanVariant => InjectionCategory::RoleHijack,
            DirectExtraction | IndirectExtraction | MemoryAccess => {
                InjectionCategory::PromptExtraction
            }
            Delimiter => InjectionCategory::DelimiterEscape,
            CommandInjection | TemplateInjection => InjectionCategory::CodeExecution,
            DataExfiltration => InjectionCategory::DataExfiltration,
            EncodedInstruction => InjectionCategory::Obfuscation,
        }
    }
}

impl fmt::Display for InjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pattern_id())
    }
}

/// Coarse grouping of injection kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionCategory {
    InstructionOverride,
    RoleHijack,
    PromptExtraction,
    DelimiterEscape,
    CodeExecution,
    DataExfiltration,
    Obfuscation,
}

/// Which heuristics are active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Critical heuristics only
    Strict,
    /// Critical and high heuristics
    #[default]
    Standard,
    /// Everything, including the noisier medium heuristics
    Relaxed,
}

impl DetectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionMode::Strict => "strict",
            DetectionMode::Standard => "standard",
            DetectionMode::Relaxed => "relaxed",
        }
    }

    pub fn includes(self, kind: InjectionKind) -> bool {
        match self {
            DetectionMode::Strict => kind.base_severity() == Severity::Critical,
            DetectionMode::Standard => kind.base_severity() >= Severity::High,
            DetectionMode::Relaxed => true,
        }
    }
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(DetectionMode::Strict),
            "standard" => Ok(DetectionMode::Standard),
            "relaxed" => Ok(DetectionMode::Relaxed),
            other => Err(format!("unknown injection mode: {}", other)),
        }
    }
}

/// Byte range into the scanned text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Benign-framing indicators found around one match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextFlags {
    pub academic: bool,
    pub testing: bool,
    pub quoted: bool,
    pub negated: bool,
}

impl ContextFlags {
    pub fn is_benign(&self) -> bool {
        self.academic || self.testing || self.quoted || self.negated
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionFinding {
    pub pattern_id: InjectionKind,
    pub category: InjectionCategory,

    /// Severity after context adjustment
    pub severity: Severity,
    pub base_severity: Severity,

    pub span: Span,

    /// Confidence in `[0, 1]`
    pub confidence: f64,

    #[serde(default)]
    pub context: ContextFlags,

    /// Trigger words and syntax seen in the match
    #[serde(default)]
    pub indicators: Vec<String>,
}

/// Detector output for one input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InjectionScan {
    /// Ordered by severity, then confidence, then position
    pub findings: Vec<InjectionFinding>,

    /// Highest adjusted severity score, 0 when nothing matched
    pub risk_score: u8,

    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    pub mode: DetectionMode,

    /// Lower severities of matches framed as discussion, tests or quotes
    pub context_analysis: bool,

    /// Raise confidence on high-entropy input
    pub entropy_check: bool,

    /// Findings whose adjusted severity is below this are dropped
    pub severity_threshold: Severity,

    pub max_input_chars: usize,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Standard,
            context_analysis: true,
            entropy_check: true,
            severity_threshold: Severity::Low,
            max_input_chars: 10_000,
        }
    }
}
