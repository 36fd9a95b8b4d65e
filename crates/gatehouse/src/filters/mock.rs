//! Mock filter: answers matching requests with a canned response.
//!
//! Rules are evaluated in declaration order and the first rule whose path and
//! header tests both pass is applied. Nothing reorders them.
//!
//! Path test:
//! - neither `path` nor `pathPrefix` set: always passes
//! - request path equals `path`: passes
//! - otherwise passes iff `pathPrefix` is set and the path starts with it
//!
//! Header test (`headers`, keyed by header name):
//! - no header rules: always passes
//! - a single header rule is satisfied when any request value matches, or,
//!   for an `empty` matcher, only when the header is absent
//! - `matchAllHeaders: true` requires every header rule, otherwise one suffices

use super::{Filter, FilterDeps, Kind, Outcome};
use crate::config::{parse_duration, FilterSpec};
use crate::context::{Context, HttpRequest};
use crate::error::ConfigError;
use crate::predicate::{CompiledStringMatch, StringMatch};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

pub static KIND: Kind = Kind {
    name: "Mock",
    description: "Mock mocks the response.",
    results: &[Outcome::Mocked],
};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MockSpec {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// One match-and-respond entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(rename = "match")]
    pub match_config: MatchRule,
    #[serde(alias = "code")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// Textual delay such as `500ms`; unparsable text means no delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, alias = "headerRules", skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, StringMatch>,
    #[serde(default)]
    pub match_all_headers: bool,
}

/// A rule ready for evaluation.
#[derive(Debug)]
pub struct CompiledRule {
    index: usize,
    path: Option<String>,
    path_prefix: Option<String>,
    header_rules: Vec<(HeaderName, CompiledStringMatch)>,
    match_all_headers: bool,
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
    delay: Duration,
}

impl CompiledRule {
    fn compile(filter: &str, index: usize, rule: &Rule) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRule {
            filter: filter.to_string(),
            rule: index,
            reason,
        };

        let path = non_empty_path(rule.match_config.path.as_deref()).map_err(invalid)?;
        let path_prefix =
            non_empty_path(rule.match_config.path_prefix.as_deref()).map_err(invalid)?;

        let mut header_rules = Vec::with_capacity(rule.match_config.headers.len());
        for (name, spec) in &rule.match_config.headers {
            let header_name = HeaderName::try_from(name.as_str())
                .map_err(|e| invalid(format!("invalid header name '{name}': {e}")))?;
            let matcher = CompiledStringMatch::compile(spec).map_err(|source| {
                ConfigError::InvalidHeaderMatch {
                    filter: filter.to_string(),
                    rule: index,
                    header: name.clone(),
                    source,
                }
            })?;
            header_rules.push((header_name, matcher));
        }

        let status = StatusCode::from_u16(rule.status_code)
            .map_err(|_| invalid(format!("invalid status code {}", rule.status_code)))?;

        let mut headers = Vec::with_capacity(rule.headers.len());
        for (name, value) in &rule.headers {
            let header_name = HeaderName::try_from(name.as_str())
                .map_err(|e| invalid(format!("invalid response header '{name}': {e}")))?;
            let header_value = HeaderValue::try_from(value.as_str())
                .map_err(|e| invalid(format!("invalid value for header '{name}': {e}")))?;
            headers.push((header_name, header_value));
        }

        let delay = match rule.delay.as_deref().filter(|d| !d.is_empty()) {
            None => Duration::ZERO,
            Some(text) => parse_duration(text).unwrap_or_else(|e| {
                warn!(filter, rule = index, "ignoring delay: {}", e);
                Duration::ZERO
            }),
        };

        Ok(Self {
            index,
            path,
            path_prefix,
            header_rules,
            match_all_headers: rule.match_config.match_all_headers,
            status,
            headers,
            body: Bytes::from(rule.body.clone()),
            delay,
        })
    }

    /// Position of the rule in the configured list.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn matches(&self, req: &HttpRequest) -> bool {
        self.matches_path(req.path()) && self.matches_headers(req)
    }

    fn matches_path(&self, path: &str) -> bool {
        if self.path.is_none() && self.path_prefix.is_none() {
            return true;
        }

        if self.path.as_deref() == Some(path) {
            return true;
        }

        match &self.path_prefix {
            Some(prefix) => path.starts_with(prefix.as_str()),
            None => false,
        }
    }

    fn matches_headers(&self, req: &HttpRequest) -> bool {
        if self.header_rules.is_empty() {
            return true;
        }

        for (name, matcher) in &self.header_rules {
            if matches_one_header(req, name, matcher) {
                if !self.match_all_headers {
                    return true;
                }
            } else if self.match_all_headers {
                return false;
            }
        }

        self.match_all_headers
    }
}

fn matches_one_header(req: &HttpRequest, name: &HeaderName, matcher: &CompiledStringMatch) -> bool {
    let mut values = req.header_values(name).iter().peekable();
    if values.peek().is_none() {
        return matcher.allows_empty();
    }
    if matcher.allows_empty() {
        return false;
    }

    values
        .filter_map(|v| v.to_str().ok())
        .any(|v| matcher.matches(v))
}

fn non_empty_path(path: Option<&str>) -> Result<Option<String>, String> {
    match path {
        None | Some("") => Ok(None),
        Some(p) if p.starts_with('/') => Ok(Some(p.to_string())),
        Some(p) => Err(format!("path '{p}' must start with '/'")),
    }
}

/// Mock filter instance.
pub struct Mock {
    name: String,
    rules: Vec<CompiledRule>,
}

impl Mock {
    pub fn new(name: impl Into<String>, spec: MockSpec) -> Result<Self, ConfigError> {
        let name = name.into();
        let rules = spec
            .rules
            .iter()
            .enumerate()
            .map(|(index, rule)| CompiledRule::compile(&name, index, rule))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { name, rules })
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// First rule, in declaration order, matching the request.
    pub fn find_rule(&self, req: &HttpRequest) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.matches(req))
    }

    /// Write the rule's response, then hold the request for the rule's delay.
    ///
    /// The wait ends early if the request is cancelled; the response written
    /// before the wait is kept either way.
    pub async fn apply(&self, ctx: &mut Context, rule: &CompiledRule) {
        ctx.response.set_status(rule.status);
        for (name, value) in &rule.headers {
            ctx.response.set_header(name.clone(), value.clone());
        }
        ctx.response.set_body(rule.body.clone());

        if rule.delay.is_zero() {
            return;
        }

        debug!(filter = %self.name, "delay for {:?} ...", rule.delay);
        tokio::select! {
            _ = ctx.request.cancellation().cancelled() => {
                debug!(filter = %self.name, "request cancelled in the middle of delay mocking");
            }
            _ = tokio::time::sleep(rule.delay) => {}
        }
    }
}

#[async_trait]
impl Filter for Mock {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static Kind {
        &KIND
    }

    async fn handle(&self, ctx: &mut Context) -> Outcome {
        match self.find_rule(&ctx.request) {
            Some(rule) => {
                debug!(filter = %self.name, rule = rule.index, "request matched mock rule");
                self.apply(ctx, rule).await;
                Outcome::Mocked
            }
            None => Outcome::Pass,
        }
    }
}

pub(crate) fn create(spec: &FilterSpec, _deps: &FilterDeps) -> Result<Box<dyn Filter>, ConfigError> {
    let mock_spec: MockSpec = spec.decode()?;
    Ok(Box::new(Mock::new(spec.name.clone(), mock_spec)?))
}
