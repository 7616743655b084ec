use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Severity;

/// PII families in the detection catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiType {
    Ssn,
    CreditCard,
    Email,
    Phone,
    Ipv4,
    Ipv6,
    ApiKey,
    PrivateKey,
    BitcoinAddress,
    EthereumAddress,
    MacAddress,
    DriversLicense,
    Passport,
    MedicalRecordNumber,
    BankAccount,
    RoutingNumber,
    Itin,
    DateOfBirth,
}

impl PiiType {
    pub const ALL: [PiiType; 18] = [
        PiiType::Ssn,
        PiiType::CreditCard,
        PiiType::Email,
        PiiType::Phone,
        PiiType::Ipv4,
        PiiType::Ipv6,
        PiiType::ApiKey,
        PiiType::PrivateKey,
        PiiType::BitcoinAddress,
        PiiType::EthereumAddress,
        PiiType::MacAddress,
        PiiType::DriversLicense,
        PiiType::Passport,
        PiiType::MedicalRecordNumber,
        PiiType::BankAccount,
        PiiType::RoutingNumber,
        PiiType::Itin,
        PiiType::DateOfBirth,
    ];

    pub fn severity(self) -> Severity {
        match self {
            PiiType::Ssn
            | PiiType::CreditCard
            | PiiType::PrivateKey
            | PiiType::DriversLicense
            | PiiType::Passport
            | PiiType::MedicalRecordNumber
            | PiiType::BankAccount
            | PiiType::Itin => Severity::Critical,
            PiiType::ApiKey
            | PiiType::BitcoinAddress
            | PiiType::EthereumAddress
            | PiiType::RoutingNumber
            | PiiType::DateOfBirth => Severity::High,
            PiiType::Email | PiiType::Phone => Severity::Medium,
            PiiType::Ipv4 | PiiType::Ipv6 | PiiType::MacAddress => Severity::Low,
        }
    }

    /// Wire name, e.g. `SSN`, `CREDIT_CARD`
    pub fn as_str(self) -> &'static str {
        match self {
            PiiType::Ssn => "SSN",
            PiiType::CreditCard => "CREDIT_CARD",
            PiiType::Email => "EMAIL",
            PiiType::Phone => "PHONE",
            PiiType::Ipv4 => "IPV4",
            PiiType::Ipv6 => "IPV6",
            PiiType::ApiKey => "API_KEY",
            PiiType::PrivateKey => "PRIVATE_KEY",
            PiiType::BitcoinAddress => "BITCOIN_ADDRESS",
            PiiType::EthereumAddress => "ETHEREUM_ADDRESS",
            PiiType::MacAddress => "MAC_ADDRESS",
            PiiType::DriversLicense => "DRIVERS_LICENSE",
            PiiType::Passport => "PASSPORT",
            PiiType::MedicalRecordNumber => "MEDICAL_RECORD_NUMBER",
            PiiType::BankAccount => "BANK_ACCOUNT",
            PiiType::RoutingNumber => "ROUTING_NUMBER",
            PiiType::Itin => "ITIN",
            PiiType::DateOfBirth => "DATE_OF_BIRTH",
        }
    }
}

impl fmt::Display for PiiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which families a detector scans for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSet {
    /// Only critical, low-ambiguity families
    Strict,
    /// Everything except the keyword-only banking families and hardware ids
    #[default]
    Standard,
    /// All 18 families
    Relaxed,
}

impl PatternSet {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternSet::Strict => "strict",
            PatternSet::Standard => "standard",
            PatternSet::Relaxed => "relaxed",
        }
    }

    pub fn includes(self, pii_type: PiiType) -> bool {
        use PiiType::*;
        match self {
            PatternSet::Strict => matches!(
                pii_type,
                Ssn | CreditCard | ApiKey | PrivateKey | Passport | MedicalRecordNumber
            ),
            PatternSet::Standard => !matches!(
                pii_type,
                Ipv6 | MacAddress | BankAccount | RoutingNumber
            ),
            PatternSet::Relaxed => true,
        }
    }
}

impl FromStr for PatternSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(PatternSet::Strict),
            "standard" => Ok(PatternSet::Standard),
            "relaxed" => Ok(PatternSet::Relaxed),
            other => Err(format!("unknown pattern set: {}", other)),
        }
    }
}

/// One detected PII span
///
/// Carries a redacted rendering only; the raw value never leaves the
/// detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiFinding {
    #[serde(rename = "type")]
    pub pii_type: PiiType,

    /// Byte offset of the start of the match
    pub start: usize,

    /// Byte offset one past the end of the match
    pub end: usize,

    pub redacted_value: String,

    /// Confidence in `[0, 1]`
    pub confidence: f64,

    pub severity: Severity,
}

impl PiiFinding {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &PiiFinding) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Detector output for one input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PiiScan {
    pub findings: Vec<PiiFinding>,

    /// Input exceeded the size ceiling and only a prefix was scanned
    pub truncated: bool,
}

/// Detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PiiConfig {
    pub pattern_set: PatternSet,

    /// Run checksum and structure validators (Luhn, SSN ranges, ABA)
    pub enable_validation: bool,

    /// Raise confidence when a family keyword precedes the match
    pub context_boost: bool,

    /// Findings below this confidence are dropped
    pub min_confidence: f64,

    /// Size ceiling in characters
    pub max_input_chars: usize,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            pattern_set: PatternSet::Standard,
            enable_validation: true,
            context_boost: true,
            min_confidence: 0.5,
            max_input_chars: 10_000,
        }
    }
}
