//! Tailored search terms / 定制搜索词
//!
//! A handful of terms where plain relevance ranking sends people to the
//! wrong place. The whole lowercased term must match; substrings are
//! never rewritten.

use std::collections::HashMap;

use once_cell::sync::Lazy;

static TAILORED_TERMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // Ambiguous handles people type without the @
        ("lbry", "@lbry"),
        ("lbrycast", "@lbrycast"),
        ("odysee", "@odysee"),
        ("veritasium", "@veritasium"),
        ("3blue1brown", "@3blue1brown"),
    ])
});

/// Replace a term with its curated rewrite, if one exists / 替换定制词
pub fn rewrite(s: &str) -> String {
    match TAILORED_TERMS.get(s.to_lowercase().as_str()) {
        Some(replacement) => (*replacement).to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_full_term() {
        assert_eq!(rewrite("lbry"), "@lbry");
        assert_eq!(rewrite("LBRY"), "@lbry");
    }

    #[test]
    fn test_rewrite_ignores_substrings() {
        assert_eq!(rewrite("lbry tutorial"), "lbry tutorial");
        assert_eq!(rewrite("cats"), "cats");
    }
}
