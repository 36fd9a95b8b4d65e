//! Configuration errors.
//!
//! Every error here is raised while a configuration generation is being built,
//! never while a request is in flight. A rejected generation leaves the
//! previously published one in service.

use crate::predicate::StringMatchError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("pipeline name must not be empty")]
    EmptyPipelineName,

    #[error("duplicate pipeline '{0}'")]
    DuplicatePipeline(String),

    #[error("entry pipeline '{0}' is not defined")]
    UnknownEntry(String),

    #[error("duplicate filter '{filter}' in pipeline '{pipeline}'")]
    DuplicateFilter { pipeline: String, filter: String },

    #[error("filter '{filter}' has unknown kind '{kind}'")]
    UnknownKind { filter: String, kind: String },

    #[error("invalid spec for filter '{filter}': {source}")]
    InvalidSpec {
        filter: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("filter '{filter}' rule {rule}: {reason}")]
    InvalidRule {
        filter: String,
        rule: usize,
        reason: String,
    },

    #[error("filter '{filter}' rule {rule} header '{header}': {source}")]
    InvalidHeaderMatch {
        filter: String,
        rule: usize,
        header: String,
        #[source]
        source: StringMatchError,
    },

    #[error("bridge '{0}' does not define any destination")]
    NoDestinations(String),

    #[error("bridge '{filter}' has invalid destination '{destination}'")]
    InvalidDestination { filter: String, destination: String },

    #[error("pipelines route to each other by default: {}", .0.join(" -> "))]
    BridgeCycle(Vec<String>),

    #[error("proxy '{filter}' has invalid upstream url '{url}': {reason}")]
    InvalidUpstream {
        filter: String,
        url: String,
        reason: String,
    },
}
