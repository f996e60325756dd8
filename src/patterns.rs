//! Pattern compilation and matching.
//!
//! Patterns are user-authored regular expressions. A bad pattern must never
//! take down a run, so compilation drops it with a warning instead of failing
//! the whole list.

use crate::error::SweepError;
use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Regex,
}

impl CompiledPattern {
    /// Compile a single pattern case-insensitively.
    pub fn new(pattern: &str) -> Result<Self, SweepError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| SweepError::PatternCompile {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
        Ok(CompiledPattern {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Unanchored search anywhere in `text`.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Compile every pattern, logging and omitting the ones that fail.
pub fn compile_many<S: AsRef<str>>(patterns: &[S]) -> Vec<CompiledPattern> {
    patterns
        .iter()
        .filter_map(|pattern| match CompiledPattern::new(pattern.as_ref()) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                log::warn!("Invalid regex skipped: {e}");
                None
            }
        })
        .collect()
}

/// Patterns from `patterns` that do not compile, with the compiler message.
pub fn invalid_patterns<S: AsRef<str>>(patterns: &[S]) -> Vec<(String, String)> {
    patterns
        .iter()
        .filter_map(|pattern| match CompiledPattern::new(pattern.as_ref()) {
            Ok(_) => None,
            Err(SweepError::PatternCompile { pattern, message }) => Some((pattern, message)),
            Err(e) => Some((pattern.as_ref().to_string(), e.to_string())),
        })
        .collect()
}

/// First pattern, in list order, that matches `text`.
pub fn match_any<'a>(compiled: &'a [CompiledPattern], text: &str) -> Option<&'a str> {
    compiled
        .iter()
        .find(|pattern| pattern.is_match(text))
        .map(CompiledPattern::as_str)
}

/// Match against each candidate in turn; the first candidate with a hit wins.
pub fn match_any_candidate<'a>(
    compiled: &'a [CompiledPattern],
    candidates: &[&str],
) -> Option<&'a str> {
    if compiled.is_empty() {
        return None;
    }
    candidates
        .iter()
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| match_any(compiled, candidate))
}

/// Convert a glob-style literal (`*` wildcard) to an equivalent regex.
pub fn glob_to_regex(pattern: &str) -> String {
    pattern
        .trim()
        .to_lowercase()
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_is_dropped() {
        assert!(compile_many(&["(+invalid"]).is_empty());

        let compiled = compile_many(&["^a", "(+invalid", "b$"]);
        let sources: Vec<&str> = compiled.iter().map(|p| p.as_str()).collect();
        assert_eq!(sources, vec!["^a", "b$"]);
    }

    #[test]
    fn test_match_is_case_insensitive_and_unanchored() {
        let compiled = compile_many(&["spamdomain\\.com"]);
        assert_eq!(
            match_any(&compiled, "X@SpamDomain.COM"),
            Some("spamdomain\\.com")
        );
        assert_eq!(match_any(&compiled, "x@other.com"), None);
    }

    #[test]
    fn test_first_pattern_in_list_order_wins() {
        let compiled = compile_many(&["foo", "o", "f"]);
        assert_eq!(match_any(&compiled, "foo"), Some("foo"));
        assert_eq!(match_any(&compiled, "of"), Some("o"));
    }

    #[test]
    fn test_match_any_candidate_skips_empty() {
        let compiled = compile_many(&["^@example\\.com$"]);
        assert_eq!(
            match_any_candidate(&compiled, &["", "@example.com"]),
            Some("^@example\\.com$")
        );
        assert_eq!(match_any_candidate(&[], &["@example.com"]), None);
    }

    #[test]
    fn test_invalid_patterns_reports_errors() {
        let invalid = invalid_patterns(&["ok", "[unclosed"]);
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].0, "[unclosed");
    }

    #[test]
    fn test_glob_to_regex() {
        assert_eq!(glob_to_regex("*@Example.com"), ".*@example\\.com");
        let compiled = compile_many(&[glob_to_regex("*@example.com")]);
        assert!(match_any(&compiled, "bob@example.com").is_some());
        assert!(match_any(&compiled, "bob@exampleXcom").is_none());
    }
}
