//! Structural validators that turn format matches into confident findings
//!
//! Every validator receives the matched text including separators and works
//! on its digits.

fn digits(value: &str) -> Vec<u32> {
    value.chars().filter_map(|c| c.to_digit(10)).collect()
}

/// Luhn checksum over 13 to 19 digits
pub fn luhn(value: &str) -> bool {
    let digits = digits(value);
    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

/// Luhn plus a known issuer prefix (Visa, Mastercard, Amex, Discover)
pub fn credit_card(value: &str) -> bool {
    let d = digits(value);
    if !luhn(value) {
        return false;
    }

    let prefix = |n: usize| d.iter().take(n).fold(0u32, |acc, x| acc * 10 + x);
    let len = d.len();

    match d[0] {
        4 => matches!(len, 13 | 16 | 19),
        5 => (51..=55).contains(&prefix(2)) && len == 16,
        2 => (2221..=2720).contains(&prefix(4)) && len == 16,
        3 => matches!(prefix(2), 34 | 37) && len == 15,
        6 => (prefix(4) == 6011 || prefix(2) == 65) && (16..=19).contains(&len),
        _ => false,
    }
}

/// US SSN area, group and serial rules
///
/// Area 000, 666 and 900-999 are never issued; group 00 and serial 0000 are
/// invalid.
pub fn ssn(value: &str) -> bool {
    let d = digits(value);
    if d.len() != 9 {
        return false;
    }

    let area = d[0] * 100 + d[1] * 10 + d[2];
    let group = d[3] * 10 + d[4];
    let serial = d[5] * 1000 + d[6] * 100 + d[7] * 10 + d[8];

    area != 0 && area != 666 && area < 900 && group != 0 && serial != 0
}

/// ITIN: leading 9 and a group in the IRS-assigned ranges
pub fn itin(value: &str) -> bool {
    let d = digits(value);
    if d.len() != 9 || d[0] != 9 {
        return false;
    }

    let group = d[3] * 10 + d[4];
    matches!(group, 50..=65 | 70..=88 | 90..=92 | 94..=99)
}

/// Email structure: one `@`, non-empty local part, dotted domain with
/// non-empty labels and an alphabetic TLD of two or more characters
pub fn email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') || !domain.contains('.') {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.iter().any(|l| l.is_empty()) {
        return false;
    }

    labels
        .last()
        .map(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()))
        .unwrap_or(false)
}

/// North American number: 10 digits, or 11 with a leading 1, and an area
/// code of 200 or above
pub fn phone(value: &str) -> bool {
    let d = digits(value);
    let national = match d.len() {
        10 => &d[..],
        11 if d[0] == 1 => &d[1..],
        _ => return false,
    };

    let area = national[0] * 100 + national[1] * 10 + national[2];
    area >= 200
}

/// ABA routing number checksum
pub fn routing_number(value: &str) -> bool {
    let d = digits(value);
    if d.len() != 9 {
        return false;
    }

    let sum = 3 * (d[0] + d[3] + d[6]) + 7 * (d[1] + d[4] + d[7]) + (d[2] + d[5] + d[8]);
    sum % 10 == 0 && sum > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luhn() {
        assert!(luhn("4532015112830366"));
        assert!(luhn("4532-0151-1283-0366"));
        assert!(luhn("378282246310005"));
        assert!(!luhn("4532015112830367"));
        assert!(!luhn("123456"));
    }

    #[test]
    fn test_credit_card_prefixes() {
        assert!(credit_card("4111 1111 1111 1111"));
        assert!(credit_card("5555555555554444"));
        assert!(credit_card("378282246310005"));
        assert!(credit_card("6011111111111117"));
        // Luhn-valid but no issuer starts with 1
        assert!(!credit_card("1000000000000008"));
    }

    #[test]
    fn test_ssn_rules() {
        assert!(ssn("123-45-6789"));
        assert!(!ssn("000-45-6789"));
        assert!(!ssn("666-45-6789"));
        assert!(!ssn("900-45-6789"));
        assert!(!ssn("123-00-6789"));
        assert!(!ssn("123-45-0000"));
        assert!(!ssn("123-45-678"));
    }

    #[test]
    fn test_itin_groups() {
        assert!(itin("912-70-1234"));
        assert!(itin("900-50-0001"));
        assert!(!itin("912-45-1234"));
        assert!(!itin("812-70-1234"));
    }

    #[test]
    fn test_email() {
        assert!(email("user@example.com"));
        assert!(email("first.last+tag@mail.example.co.uk"));
        assert!(!email("@example.com"));
        assert!(!email("user@example"));
        assert!(!email("user@example.c"));
        assert!(!email("user@.com"));
    }

    #[test]
    fn test_phone() {
        assert!(phone("(555) 123-4567"));
        assert!(phone("+1 555 123 4567"));
        assert!(!phone("123-456-7890"));
        assert!(!phone("555-1234"));
        assert!(!phone("2 555 123 4567"));
    }

    #[test]
    fn test_routing_number() {
        assert!(routing_number("021000021"));
        assert!(routing_number("011401533"));
        assert!(!routing_number("021000022"));
        assert!(!routing_number("000000000"));
    }
}
