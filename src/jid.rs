//! Recipient address normalization.
//!
//! Raw phone input (copy-pasted, formatted, local-style) is reduced to the
//! canonical JID the messaging network addresses users by.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_SERVER: &str = "s.whatsapp.net";

/// Canonical address on the messaging network: `<digits>@<server>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: DEFAULT_SERVER.to_string(),
        }
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

/// Rewrite applied to numbers entered in a recognized local format, e.g.
/// `05xxxxxxxx` (10 digits, leading 0) becoming `9725xxxxxxxx`.
#[derive(Debug, Clone)]
pub struct LocalRule {
    pub prefix: &'static str,
    pub local_len: usize,
    pub country_code: &'static str,
}

#[derive(Debug, Clone)]
pub struct NumberRules {
    pub local_rules: Vec<LocalRule>,
    /// Numbers shorter than this after normalization are suspect. They are
    /// still attempted, only flagged.
    pub min_plausible_len: usize,
}

impl Default for NumberRules {
    fn default() -> Self {
        Self {
            local_rules: vec![LocalRule {
                prefix: "0",
                local_len: 10,
                country_code: "972",
            }],
            min_plausible_len: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedAddress {
    pub jid: Jid,
    /// Implausibly short after normalization; attempted anyway.
    pub suspect_short: bool,
}

/// Strips everything non-numeric, applies local-to-international rewrites,
/// and appends the network suffix.
pub fn normalize(raw: &str, rules: &NumberRules) -> NormalizedAddress {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    for rule in &rules.local_rules {
        if digits.len() == rule.local_len && digits.starts_with(rule.prefix) {
            digits = format!("{}{}", rule.country_code, &digits[rule.prefix.len()..]);
            break;
        }
    }

    let suspect_short = digits.len() < rules.min_plausible_len;
    if suspect_short {
        warn!(
            target: "Bridge/Jid",
            "Number {raw:?} normalized to {digits:?} which looks too short; attempting anyway"
        );
    }

    NormalizedAddress {
        jid: Jid::new(digits),
        suspect_short,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_formatting() {
        let addr = normalize("+1 (234) 567-8900", &NumberRules::default());
        assert_eq!(addr.jid.to_string(), "12345678900@s.whatsapp.net");
        assert!(!addr.suspect_short);
    }

    #[test]
    fn test_local_format_rewrite() {
        let addr = normalize("0501234567", &NumberRules::default());
        assert_eq!(addr.jid.to_string(), "972501234567@s.whatsapp.net");
    }

    #[test]
    fn test_already_international_untouched() {
        let addr = normalize("972501234567", &NumberRules::default());
        assert_eq!(addr.jid.user, "972501234567");
    }

    #[test]
    fn test_short_number_flagged_not_rejected() {
        let addr = normalize("12345", &NumberRules::default());
        assert!(addr.suspect_short);
        assert_eq!(addr.jid.user, "12345");
    }

    #[test]
    fn test_rewrite_requires_exact_local_length() {
        // 9 digits with leading zero is not the recognized local format.
        let addr = normalize("050123456", &NumberRules::default());
        assert_eq!(addr.jid.user, "050123456");
    }
}
