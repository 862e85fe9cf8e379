//! Decides whether a request path is subject to CAS handling at all.

use regex::Regex;

use crate::error::Error;

/// Paths that bypass CAS handling entirely.
#[derive(Debug, Clone)]
pub enum ExcludeRule {
    /// Matches any non-empty path starting with the given prefix.
    Prefix(String),
    /// Matches any path the regex finds a match in.
    Pattern(Regex),
    /// Matches if any member matches.
    Any(Vec<ExcludeRule>),
}

impl ExcludeRule {
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Compile a regex rule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pattern does not compile.
    pub fn pattern(pattern: &str) -> Result<Self, Error> {
        Regex::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| Error::Config(format!("invalid exclude pattern {pattern:?}: {e}")))
    }

    /// Parse a comma-separated rule list.
    ///
    /// Entries prefixed with `re:` are regexes, everything else is a path prefix.
    /// Blank entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a regex entry does not compile.
    pub fn parse_list(list: &str) -> Result<Self, Error> {
        let rules = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.strip_prefix("re:") {
                Some(pattern) => Self::pattern(pattern),
                None => Ok(Self::prefix(entry)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::Any(rules))
    }

    /// Whether `path` is matched by this rule.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Prefix(prefix) => !path.is_empty() && path.starts_with(prefix.as_str()),
            Self::Pattern(regex) => regex.is_match(path),
            Self::Any(rules) => rules.iter().any(|rule| rule.matches(path)),
        }
    }
}

impl From<&str> for ExcludeRule {
    fn from(prefix: &str) -> Self {
        Self::prefix(prefix)
    }
}

impl From<String> for ExcludeRule {
    fn from(prefix: String) -> Self {
        Self::Prefix(prefix)
    }
}

impl From<Regex> for ExcludeRule {
    fn from(regex: Regex) -> Self {
        Self::Pattern(regex)
    }
}

impl<R: Into<ExcludeRule>> FromIterator<R> for ExcludeRule {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self::Any(iter.into_iter().map(Into::into).collect())
    }
}

/// Whether `path` matches `rule`.
#[must_use]
pub fn path_matches(path: &str, rule: &ExcludeRule) -> bool {
    rule.matches(path)
}

/// Whether CAS handling applies to `path`. Without a rule, every path is in scope.
#[must_use]
pub fn in_scope(path: &str, exclude: Option<&ExcludeRule>) -> bool {
    exclude.is_none_or(|rule| !rule.matches(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rule_means_everything_in_scope() {
        assert!(in_scope("/private", None));
        assert!(in_scope("", None));
    }

    #[test]
    fn literal_rule_is_a_prefix_match() {
        let rule = ExcludeRule::from("/private");
        assert!(!in_scope("/private", Some(&rule)));
        assert!(!in_scope("/private/reports", Some(&rule)));
        assert!(in_scope("/public", Some(&rule)));
        assert!(in_scope("/api/private", Some(&rule)));
    }

    #[test]
    fn empty_path_never_matches_a_prefix() {
        let rule = ExcludeRule::from("");
        assert!(in_scope("", Some(&rule)));
        assert!(!in_scope("/anything", Some(&rule)));
    }

    #[test]
    fn pattern_rule_searches_anywhere() {
        let rule = ExcludeRule::pattern(r"\.(css|js)$").unwrap();
        assert!(!in_scope("/assets/app.js", Some(&rule)));
        assert!(in_scope("/assets/app.json", Some(&rule)));
    }

    #[test]
    fn collection_matches_if_any_member_does() {
        let rule: ExcludeRule = ["/health", "/metrics"].into_iter().collect();
        assert!(path_matches("/health", &rule));
        assert!(path_matches("/metrics/prom", &rule));
        assert!(!path_matches("/private", &rule));
    }

    #[test]
    fn empty_collection_matches_nothing() {
        let rule = ExcludeRule::Any(Vec::new());
        assert!(in_scope("/private", Some(&rule)));
    }

    #[test]
    fn parse_list_mixes_prefixes_and_patterns() {
        let rule = ExcludeRule::parse_list(" /health , re:^/api/v\\d+/public ,,").unwrap();
        assert!(path_matches("/health", &rule));
        assert!(path_matches("/api/v2/public/docs", &rule));
        assert!(!path_matches("/api/v2/private", &rule));
    }

    #[test]
    fn parse_list_rejects_bad_regex() {
        assert!(matches!(
            ExcludeRule::parse_list("re:(unclosed"),
            Err(Error::Config(_))
        ));
    }
}
