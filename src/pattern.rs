use crate::error::{Result, TrawlError};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub pattern: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl SearchParams {
    pub fn new(pattern: impl Into<String>, regex: bool, case_sensitive: bool) -> Self {
        Self {
            pattern: pattern.into(),
            regex,
            case_sensitive,
        }
    }

    pub fn literal(pattern: impl Into<String>) -> Self {
        Self::new(pattern, false, true)
    }
}

/// A search expression compiled once per request. Sub-string searches are
/// compiled as escaped regular expressions so both modes share one matcher.
#[derive(Debug, Clone)]
pub struct SearchPattern {
    re: Regex,
}

impl SearchPattern {
    pub fn compile(params: &SearchParams) -> Result<Self> {
        if params.pattern.is_empty() {
            return Err(TrawlError::invalid_pattern("", "empty pattern"));
        }
        let source = if params.regex {
            params.pattern.clone()
        } else {
            regex::escape(&params.pattern)
        };
        let re = RegexBuilder::new(&source)
            .case_insensitive(!params.case_sensitive)
            .build()
            .map_err(|err| TrawlError::invalid_pattern(&params.pattern, err.to_string()))?;
        Ok(Self { re })
    }

    /// Returns the byte offset and length of the first match in `text`.
    /// Empty matches (e.g. `^`) are reported with length 1.
    pub fn find_in(&self, text: &str) -> Option<(usize, usize)> {
        self.re.find(text).map(|m| (m.start(), m.len().max(1)))
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.re.is_match(text)
    }
}

#[cfg(test)]
mod tests {
    use super::{SearchParams, SearchPattern};
    use crate::error::TrawlError;

    #[test]
    fn literal_search_escapes_regex_metacharacters() {
        let pat = SearchPattern::compile(&SearchParams::new("a.b", false, true)).unwrap();
        assert!(pat.is_match("xa.by"));
        assert!(!pat.is_match("axb"));
    }

    #[test]
    fn case_insensitive_by_flag() {
        let pat = SearchPattern::compile(&SearchParams::new("error", false, false)).unwrap();
        assert_eq!(pat.find_in("an ERROR here"), Some((3, 5)));
    }

    #[test]
    fn malformed_regex_is_rejected() {
        let err = SearchPattern::compile(&SearchParams::new("(unclosed", true, true)).unwrap_err();
        assert!(matches!(err, TrawlError::InvalidPattern { .. }));
    }

    #[test]
    fn empty_pattern_is_rejected() {
        assert!(SearchPattern::compile(&SearchParams::literal("")).is_err());
    }

    #[test]
    fn zero_width_match_reports_length_one() {
        let pat = SearchPattern::compile(&SearchParams::new("^", true, true)).unwrap();
        assert_eq!(pat.find_in("abc"), Some((0, 1)));
    }
}
