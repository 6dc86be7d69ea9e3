use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use crate::errors::{EngineError, EngineResult};

static PATTERN_CACHE: Lazy<DashMap<String, Arc<Regex>>> = Lazy::new(DashMap::new);

/// Wraps one job's compiled regular expression.
///
/// The matcher is a pure predicate over a scan target string: read-only after
/// compile, freely shared between threads. Compilation failures surface here,
/// before any job starts, never mid-scan.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: String,
    regex: Arc<Regex>,
}

impl PatternMatcher {
    /// Compiles `pattern`, reusing a process-wide cache of compiled
    /// expressions so identical patterns across jobs share one automaton.
    pub fn new(pattern: impl Into<String>) -> EngineResult<Self> {
        let pattern = pattern.into();

        let regex = if let Some(entry) = PATTERN_CACHE.get(&pattern) {
            Arc::clone(&entry)
        } else {
            let compiled = Arc::new(
                Regex::new(&pattern).map_err(|e| EngineError::invalid_pattern(&pattern, e))?,
            );
            PATTERN_CACHE.insert(pattern.clone(), Arc::clone(&compiled));
            compiled
        };

        Ok(Self { pattern, regex })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Tests whether the target satisfies the pattern
    pub fn is_match(&self, target: &str) -> bool {
        self.regex.is_match(target)
    }

    /// Expands capture-group references (`$1`, `$name`) in `template` using
    /// the first match of the pattern against `target`. A target with no match
    /// leaves the template untouched.
    pub fn expand(&self, target: &str, template: &str) -> String {
        match self.regex.captures(target) {
            Some(caps) => {
                let mut out = String::new();
                caps.expand(template, &mut out);
                out
            }
            None => template.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_match() {
        let matcher = PatternMatcher::new(r"\.txt$").unwrap();
        assert!(matcher.is_match("notes/todo.txt"));
        assert!(!matcher.is_match("notes/todo.md"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected_up_front() {
        let err = PatternMatcher::new("(unclosed").unwrap_err();
        assert!(matches!(err, EngineError::InvalidPattern { .. }));
        assert!(err.to_string().contains("(unclosed"));
    }

    #[test]
    fn test_expand_capture_groups() {
        let matcher = PatternMatcher::new(r"(\w+)\.csv$").unwrap();
        assert_eq!(matcher.expand("data/report.csv", "$1"), "report");
        assert_eq!(
            matcher.expand("data/report.csv", "import-$1"),
            "import-report"
        );
    }

    #[test]
    fn test_expand_without_match_keeps_template() {
        let matcher = PatternMatcher::new(r"(\w+)\.csv$").unwrap();
        assert_eq!(matcher.expand("readme.md", "$1"), "$1");
    }

    #[test]
    fn test_cache_reuses_compiled_regex() {
        let a = PatternMatcher::new(r"cache_probe_\d+").unwrap();
        let b = PatternMatcher::new(r"cache_probe_\d+").unwrap();
        assert!(Arc::ptr_eq(&a.regex, &b.regex));
    }
}
