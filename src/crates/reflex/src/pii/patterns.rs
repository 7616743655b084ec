//! PII pattern catalog
//!
//! Compiled once per process. Families whose raw shape is just a run of
//! digits (bank account, routing number, bare 9-digit SSN, date of birth,
//! license and passport numbers) only match after an identifying keyword;
//! the reported span is then the value alone (capture group 1).

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::PiiType;
use super::validator;

/// Bump whenever a pattern, validator or confidence rule changes so cached
/// verdicts computed with the old catalog stop matching.
pub const CATALOG_VERSION: &str = "pii-3";

/// Separator allowed between a keyword and its value: "SSN: ", "account # ",
/// "passport number is "
const KW_TAIL: &str = r"\s*(?:#|no\.?|number|num)?\s*(?:is\s*)?[:=#-]?\s*";

pub struct PiiPattern {
    pub pii_type: PiiType,
    pub regex: Regex,
    /// Span comes from capture group 1 instead of the whole match
    pub anchored: bool,
    pub validator: Option<fn(&str) -> bool>,
}

impl std::fmt::Debug for PiiPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiiPattern")
            .field("pii_type", &self.pii_type)
            .field("regex", &self.regex.as_str())
            .field("anchored", &self.anchored)
            .finish()
    }
}

fn pattern(
    pii_type: PiiType,
    source: &str,
    anchored: bool,
    validator: Option<fn(&str) -> bool>,
) -> Option<PiiPattern> {
    match Regex::new(source) {
        Ok(regex) => Some(PiiPattern {
            pii_type,
            regex,
            anchored,
            validator,
        }),
        Err(err) => {
            tracing::error!(pii_type = %pii_type, "PII pattern failed to compile: {}", err);
            None
        }
    }
}

fn keyed(keyword: &str, value: &str) -> String {
    format!(r"(?i)\b(?:{}){}({})\b", keyword, KW_TAIL, value)
}

/// Every pattern, in catalog order
pub static CATALOG: Lazy<Vec<PiiPattern>> = Lazy::new(|| {
    use PiiType::*;

    let ssn_keyword = r"ssn|social\s+security(?:\s+(?:number|no\.?))?";
    let dl_keyword = r"driver'?s?\s+licen[cs]e|DL";
    let dob_keyword =
        r"DOB|D\.O\.B|date\s+of\s+birth|birth\s*date|birthday|born(?:\s+on)?";
    let dob_value = r"(?:0[1-9]|1[0-2])[-/](?:0[1-9]|[12]\d|3[01])[-/](?:19|20)\d{2}|(?:19|20)\d{2}-(?:0[1-9]|1[0-2])-(?:0[1-9]|[12]\d|3[01])";

    [
        pattern(Ssn, r"\b\d{3}-\d{2}-\d{4}\b", false, Some(validator::ssn)),
        pattern(
            Ssn,
            &keyed(ssn_keyword, r"\d{3}[- ]?\d{2}[- ]?\d{4}"),
            true,
            Some(validator::ssn),
        ),
        pattern(
            CreditCard,
            r"\b(?:\d[ -]?){12,18}\d\b",
            false,
            Some(validator::credit_card),
        ),
        pattern(
            Email,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            false,
            Some(validator::email),
        ),
        pattern(
            Phone,
            r"(?:\+?1[-.\s]?)?(?:\(\d{3}\)\s?|\b\d{3}[-.\s])\d{3}[-.\s]\d{4}\b",
            false,
            Some(validator::phone),
        ),
        pattern(
            Ipv4,
            r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
            false,
            None,
        ),
        pattern(
            Ipv6,
            r"\b(?:[0-9A-Fa-f]{1,4}:){7}[0-9A-Fa-f]{1,4}\b",
            false,
            None,
        ),
        pattern(
            ApiKey,
            r"\b(?:AKIA[0-9A-Z]{16}|ghp_[A-Za-z0-9]{36}|github_pat_[A-Za-z0-9_]{22,}|sk_live_[A-Za-z0-9]{24,}|sk-[A-Za-z0-9]{32,}|xox[abprs]-[A-Za-z0-9-]{10,}|AIza[0-9A-Za-z_-]{35})",
            false,
            None,
        ),
        pattern(
            PrivateKey,
            r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |ENCRYPTED )?PRIVATE KEY-----",
            false,
            None,
        ),
        pattern(
            BitcoinAddress,
            r"\b(?:bc1[ac-hj-np-z02-9]{25,59}|[13][a-km-zA-HJ-NP-Z1-9]{25,34})\b",
            false,
            None,
        ),
        pattern(EthereumAddress, r"\b0x[a-fA-F0-9]{40}\b", false, None),
        pattern(
            MacAddress,
            r"\b(?:[0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}\b",
            false,
            None,
        ),
        pattern(
            DriversLicense,
            &keyed(dl_keyword, r"[A-Z]\d{7}|[A-Z]\d{12}|\d{8,9}"),
            true,
            None,
        ),
        pattern(
            Passport,
            &keyed("passport", r"[A-Z]{1,2}\d{6,9}"),
            true,
            None,
        ),
        pattern(
            MedicalRecordNumber,
            &keyed(r"MRN|medical\s+record(?:\s+number)?", r"\d{6,10}"),
            true,
            None,
        ),
        pattern(
            BankAccount,
            &keyed(r"(?:bank\s+)?(?:account|acct|a/c)", r"\d{8,17}"),
            true,
            None,
        ),
        pattern(
            RoutingNumber,
            &keyed(r"routing|ABA|RTN", r"\d{9}"),
            true,
            Some(validator::routing_number),
        ),
        pattern(Itin, r"\b9\d{2}-\d{2}-\d{4}\b", false, Some(validator::itin)),
        pattern(
            Itin,
            &keyed("ITIN", r"9\d{2}[- ]?\d{2}[- ]?\d{4}"),
            true,
            Some(validator::itin),
        ),
        pattern(DateOfBirth, &keyed(dob_keyword, dob_value), true, None),
    ]
    .into_iter()
    .flatten()
    .collect()
});

/// Number of patterns the catalog is expected to compile
pub const CATALOG_SIZE: usize = 20;

/// Words that, shortly before a match, make it more likely to be real
pub fn context_keywords(pii_type: PiiType) -> &'static [&'static str] {
    match pii_type {
        PiiType::Ssn => &["ssn", "social security"],
        PiiType::CreditCard => &["card", "credit", "visa", "mastercard", "amex", "payment"],
        PiiType::Email => &["email", "e-mail", "contact", "mail"],
        PiiType::Phone => &["phone", "call", "tel", "mobile", "cell", "fax"],
        PiiType::Ipv4 | PiiType::Ipv6 => &["ip", "host", "server", "address"],
        PiiType::ApiKey | PiiType::PrivateKey => &["key", "token", "secret", "credential"],
        PiiType::BitcoinAddress | PiiType::EthereumAddress => &["wallet", "btc", "eth", "send"],
        PiiType::MacAddress => &["mac", "device", "hardware"],
        PiiType::DriversLicense => &["license", "licence", "dmv"],
        PiiType::Passport => &["passport", "travel"],
        PiiType::MedicalRecordNumber => &["patient", "medical", "mrn"],
        PiiType::BankAccount | PiiType::RoutingNumber => &["bank", "account", "routing", "wire"],
        PiiType::Itin => &["itin", "tax"],
        PiiType::DateOfBirth => &["born", "birth", "dob", "age"],
    }
}
