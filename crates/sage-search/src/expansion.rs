//! Acronym-based query expansion.
//!
//! Each configured pair rewrites the query in both directions: an acronym
//! found as a whole word becomes its expansion, and an expansion found as a
//! phrase becomes the upper-cased acronym. The original query is always the
//! first variant.

use regex::{NoExpand, Regex};
use tracing::{trace, warn};

struct Rule {
    pattern: Regex,
    replacement: String,
}

/// Pre-compiled acronym rewrite rules.
pub struct QueryExpander {
    rules: Vec<Rule>,
}

impl QueryExpander {
    pub fn new(pairs: &[(String, String)]) -> Self {
        let mut rules = Vec::with_capacity(pairs.len() * 2);
        for (acronym, expansion) in pairs {
            for (needle, replacement) in [
                (acronym.as_str(), expansion.clone()),
                (expansion.as_str(), acronym.to_uppercase()),
            ] {
                let source = format!(r"(?i)\b{}\b", regex::escape(needle.trim()));
                match Regex::new(&source) {
                    Ok(pattern) => rules.push(Rule {
                        pattern,
                        replacement,
                    }),
                    Err(e) => warn!(needle, error = %e, "Skipping invalid expansion rule"),
                }
            }
        }
        Self { rules }
    }

    /// Up to `max` distinct variants; variant 0 is `query` itself.
    pub fn expand(&self, query: &str, max: usize) -> Vec<String> {
        let max = max.max(1);
        let mut variants = vec![query.to_string()];

        for rule in &self.rules {
            if variants.len() >= max {
                break;
            }
            if !rule.pattern.is_match(query) {
                continue;
            }
            let variant = rule
                .pattern
                .replace_all(query, NoExpand(&rule.replacement))
                .into_owned();
            if !variants.iter().any(|v| v.eq_ignore_ascii_case(&variant)) {
                trace!(variant = %variant, "Query variant");
                variants.push(variant);
            }
        }

        variants
    }
}
