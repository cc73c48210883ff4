//! Merchant keys: a coarse normalization of transaction descriptions.
//!
//! Keys are advisory. They only influence which transactions share a batch,
//! never what the classifier decides for them.

use std::sync::LazyLock;

use regex::Regex;

/// One key-derivation rule.
#[derive(Debug, Clone)]
pub enum MerchantRule {
    /// Normalized description starts with one of `prefixes` (followed by a
    /// non-alphanumeric character or the end); the key is fixed.
    Prefix { prefixes: Vec<String>, key: String },
    /// Pattern whose first capture group is the key.
    Capture { name: String, pattern: Regex },
}

impl MerchantRule {
    pub fn prefix<I, S>(prefixes: I, key: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Prefix {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            key: key.into(),
        }
    }

    pub fn capture(name: impl Into<String>, pattern: Regex) -> Self {
        Self::Capture {
            name: name.into(),
            pattern,
        }
    }

    fn apply(&self, normalized: &str) -> Option<String> {
        match self {
            MerchantRule::Prefix { prefixes, key } => prefixes
                .iter()
                .any(|p| starts_with_word(normalized, p))
                .then(|| key.clone()),
            MerchantRule::Capture { pattern, .. } => pattern
                .captures(normalized)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .filter(|k| !k.is_empty()),
        }
    }
}

fn starts_with_word(haystack: &str, prefix: &str) -> bool {
    match haystack.strip_prefix(prefix) {
        Some(rest) => rest.chars().next().is_none_or(|c| !c.is_alphanumeric()),
        None => false,
    }
}

/// Derives merchant keys from an ordered rule list (first match wins).
#[derive(Debug, Clone)]
pub struct MerchantKeyExtractor {
    rules: Vec<MerchantRule>,
}

impl MerchantKeyExtractor {
    pub fn with_rules(rules: Vec<MerchantRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[MerchantRule] {
        &self.rules
    }

    /// Pure and total: empty or blank input yields an empty key.
    pub fn extract_key(&self, description: &str) -> String {
        let normalized = normalize(description);
        if normalized.is_empty() {
            return normalized;
        }

        for rule in &self.rules {
            if let Some(key) = rule.apply(&normalized) {
                return key;
            }
        }

        match normalized.split_once(' ') {
            Some((first, _)) => first.to_string(),
            None => normalized,
        }
    }
}

impl Default for MerchantKeyExtractor {
    fn default() -> Self {
        Self::with_rules(default_rules())
    }
}

/// Trim, uppercase, and collapse internal whitespace.
pub fn normalize(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

static DEFAULT_EXTRACTOR: LazyLock<MerchantKeyExtractor> =
    LazyLock::new(MerchantKeyExtractor::default);

/// Extract a key with the built-in rule set.
pub fn extract_key(description: &str) -> String {
    DEFAULT_EXTRACTOR.extract_key(description)
}

fn default_rules() -> Vec<MerchantRule> {
    vec![
        // Payment facilitators put the real merchant after the star.
        MerchantRule::capture(
            "facilitator",
            pattern(r"^(?:PAYPAL|PP|SQ|TST|SP|MP|PG)\s*\*\s*([A-Z0-9][A-Z0-9&'.-]*)"),
        ),
        MerchantRule::prefix(["UBER EATS", "UBEREATS"], "UBER EATS"),
        MerchantRule::prefix(["UBER"], "UBER"),
        MerchantRule::prefix(["AMZN", "AMAZON"], "AMAZON"),
        MerchantRule::prefix(["IFOOD", "IFD"], "IFOOD"),
        MerchantRule::prefix(["SPOTIFY"], "SPOTIFY"),
        MerchantRule::capture("star", pattern(r"^([A-Z0-9][A-Z0-9&'.-]*?)\s*\*")),
        MerchantRule::capture(
            "domain",
            pattern(r"^(?:WWW\.)?([A-Z0-9][A-Z0-9-]*)\.(?:COM|NET|ORG|IO|CO|APP|TV)\b"),
        ),
    ]
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("built-in merchant pattern must compile")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_descriptions_have_empty_keys() {
        assert_eq!(extract_key(""), "");
        assert_eq!(extract_key("   \t "), "");
    }

    #[test]
    fn known_merchants_share_a_key() {
        assert_eq!(extract_key("UBER *TRIP HELP.UBER.COM"), "UBER");
        assert_eq!(extract_key("uber   trip 1234"), "UBER");
        assert_eq!(extract_key("Uber Eats order"), "UBER EATS");
        assert_eq!(extract_key("AMZN Mktp US*2K4"), "AMAZON");
    }

    #[test]
    fn facilitator_prefix_yields_underlying_merchant() {
        assert_eq!(extract_key("PAYPAL *NETFLIX 4029357733"), "NETFLIX");
        assert_eq!(extract_key("SQ *BLUE BOTTLE"), "BLUE");
    }

    #[test]
    fn domain_descriptions_drop_the_tld() {
        assert_eq!(extract_key("NETFLIX.COM"), "NETFLIX");
        assert_eq!(extract_key("www.github.com/charge"), "GITHUB");
    }

    #[test]
    fn generic_star_notation_uses_left_side() {
        assert_eq!(extract_key("ACME*INVOICE 77"), "ACME");
    }

    #[test]
    fn falls_back_to_first_token_or_whole_string() {
        assert_eq!(extract_key("  corner bakery  "), "CORNER");
        assert_eq!(extract_key("rent"), "RENT");
    }

    #[test]
    fn prefix_rules_respect_word_boundaries() {
        // "UBERLANDIA" must not be read as UBER.
        assert_eq!(extract_key("UBERLANDIA SHOPPING"), "UBERLANDIA");
    }

    #[test]
    fn custom_rules_are_evaluated_in_order() {
        let extractor = MerchantKeyExtractor::with_rules(vec![
            MerchantRule::prefix(["COFFEE"], "CAFE"),
            MerchantRule::prefix(["COFFEE HOUSE"], "NEVER"),
        ]);
        assert_eq!(extractor.extract_key("coffee house 12"), "CAFE");
        assert_eq!(extractor.rules().len(), 2);
    }
}
