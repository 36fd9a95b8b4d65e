//! String matching policy used by header rules.
//!
//! A `StringMatch` is the configuration form: either any combination of an
//! exact value, a prefix and a regex, or the `empty` flag alone, which accepts
//! only an absent (or empty) value. It is compiled once at load time into a
//! `CompiledStringMatch` so the regex is never rebuilt on the request path.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Declarative string match policy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StringMatch {
    /// Value must equal this string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,

    /// Value must start with this string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Value must match this regular expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    /// Matches when the value is absent or empty.
    #[serde(default)]
    pub empty: bool,
}

/// Errors produced while compiling a `StringMatch`.
#[derive(Debug, thiserror::Error)]
pub enum StringMatchError {
    #[error("all patterns are empty")]
    NoPattern,
    #[error("empty conflicts with exact, prefix and regex patterns")]
    EmptyWithPattern,
    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl StringMatch {
    /// Match only when the value is absent.
    pub fn absent() -> Self {
        Self {
            empty: true,
            ..Default::default()
        }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            exact: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            prefix: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            regex: Some(pattern.into()),
            ..Default::default()
        }
    }
}

/// Compiled string matcher for efficient runtime evaluation.
#[derive(Debug, Clone)]
pub struct CompiledStringMatch {
    exact: Option<String>,
    prefix: Option<String>,
    regex: Option<Arc<Regex>>,
    empty: bool,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

impl CompiledStringMatch {
    /// Compile a StringMatch, rejecting policies that can never match a value.
    pub fn compile(spec: &StringMatch) -> Result<Self, StringMatchError> {
        let exact = non_empty(&spec.exact);
        let prefix = non_empty(&spec.prefix);
        let pattern = non_empty(&spec.regex);

        let has_pattern = exact.is_some() || prefix.is_some() || pattern.is_some();
        match (spec.empty, has_pattern) {
            (true, true) => return Err(StringMatchError::EmptyWithPattern),
            (false, false) => return Err(StringMatchError::NoPattern),
            _ => {}
        }

        let regex = pattern
            .map(|p| {
                Regex::new(&p)
                    .map(Arc::new)
                    .map_err(|source| StringMatchError::InvalidRegex { pattern: p, source })
            })
            .transpose()?;

        Ok(Self {
            exact,
            prefix,
            regex,
            empty: spec.empty,
        })
    }

    /// Whether an absent value satisfies this matcher.
    #[inline]
    pub fn allows_empty(&self) -> bool {
        self.empty
    }

    /// Check a present value against the policy.
    pub fn matches(&self, value: &str) -> bool {
        if self.empty && value.is_empty() {
            return true;
        }

        if let Some(exact) = &self.exact {
            if value == exact {
                return true;
            }
        }

        if let Some(prefix) = &self.prefix {
            if value.starts_with(prefix.as_str()) {
                return true;
            }
        }

        match &self.regex {
            Some(regex) => regex.is_match(value),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(spec: StringMatch) -> CompiledStringMatch {
        CompiledStringMatch::compile(&spec).unwrap()
    }

    #[test]
    fn test_exact() {
        let matcher = compile(StringMatch::exact("v1"));
        assert!(matcher.matches("v1"));
        assert!(!matcher.matches("v10"));
        assert!(!matcher.matches(""));
    }

    #[test]
    fn test_prefix() {
        let matcher = compile(StringMatch::prefix("Bearer "));
        assert!(matcher.matches("Bearer abc"));
        assert!(!matcher.matches("Basic abc"));
    }

    #[test]
    fn test_regex() {
        let matcher = compile(StringMatch::regex(r"^v\d+$"));
        assert!(matcher.matches("v2"));
        assert!(!matcher.matches("version2"));
    }

    #[test]
    fn test_any_pattern_may_match() {
        let matcher = compile(StringMatch {
            exact: Some("a".to_string()),
            prefix: Some("pre".to_string()),
            regex: Some("z$".to_string()),
            empty: false,
        });
        assert!(matcher.matches("a"));
        assert!(matcher.matches("prefix"));
        assert!(matcher.matches("buzz"));
        assert!(!matcher.matches("other"));
    }

    #[test]
    fn test_empty_flag() {
        let matcher = compile(StringMatch::absent());
        assert!(matcher.allows_empty());
        assert!(matcher.matches(""));
        assert!(!matcher.matches("x"));
    }

    #[test]
    fn test_no_pattern_rejected() {
        let err = CompiledStringMatch::compile(&StringMatch::default()).unwrap_err();
        assert!(matches!(err, StringMatchError::NoPattern));

        // Empty strings count as unset
        let err = CompiledStringMatch::compile(&StringMatch::exact("")).unwrap_err();
        assert!(matches!(err, StringMatchError::NoPattern));
    }

    #[test]
    fn test_empty_with_pattern_rejected() {
        for spec in [
            StringMatch::exact("v1"),
            StringMatch::prefix("v"),
            StringMatch::regex("^v"),
        ] {
            let spec = StringMatch {
                empty: true,
                ..spec
            };
            let err = CompiledStringMatch::compile(&spec).unwrap_err();
            assert!(matches!(err, StringMatchError::EmptyWithPattern));
        }
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = CompiledStringMatch::compile(&StringMatch::regex("(")).unwrap_err();
        assert!(matches!(err, StringMatchError::InvalidRegex { .. }));
    }

    #[test]
    fn test_string_match_serde() {
        let yaml = "exact: v1\nempty: false";
        let spec: StringMatch = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec, StringMatch::exact("v1"));

        let yaml = "empty: true";
        let spec: StringMatch = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec, StringMatch::absent());
    }
}
