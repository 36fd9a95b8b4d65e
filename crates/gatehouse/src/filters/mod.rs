//! Pipeline filters.
//!
//! A filter inspects and mutates the request context, then returns an
//! [`Outcome`] that the enclosing pipeline uses for flow control:
//!
//! - **Mock** (`mock`): matches ordered rules and synthesizes a canned response
//! - **Bridge** (`bridge`): hands the request to another named pipeline
//! - **Proxy** (`proxy`): forwards the request to an upstream HTTP server
//!
//! Filter kinds are registered on an explicit [`FilterRegistry`] built at
//! startup and passed to whoever compiles pipelines.

pub mod bridge;
pub mod mock;
pub mod proxy;

use crate::client::HttpClient;
use crate::config::FilterSpec;
use crate::context::Context;
use crate::error::ConfigError;
use crate::mux::MuxMapper;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use bridge::{Bridge, BridgeSpec, BRIDGE_DEST_HEADER, MAX_BRIDGE_HOPS};
pub use mock::{Mock, MockSpec};
pub use proxy::{Proxy, ProxySpec};

/// Result of running a filter, consumed by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Continue with the next filter.
    Pass,
    /// A mock rule produced the response.
    Mocked,
    /// The requested destination is not configured or has no live handler.
    DestinationNotFound,
    /// The destination handler reported a failure.
    InvokeDestinationFailed,
    /// The upstream could not be reached.
    ProxyFailed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pass => "",
            Outcome::Mocked => "mocked",
            Outcome::DestinationNotFound => "destinationNotFound",
            Outcome::InvokeDestinationFailed => "invokeDestinationFailed",
            Outcome::ProxyFailed => "proxyFailed",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }

    /// Outcomes that mean the request was not served as intended.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::DestinationNotFound | Outcome::InvokeDestinationFailed | Outcome::ProxyFailed
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a filter kind.
#[derive(Debug)]
pub struct Kind {
    pub name: &'static str,
    pub description: &'static str,
    /// Non-empty outcomes this kind may return.
    pub results: &'static [Outcome],
}

#[async_trait]
pub trait Filter: Send + Sync {
    /// Instance name from configuration.
    fn name(&self) -> &str;

    fn kind(&self) -> &'static Kind;

    async fn handle(&self, ctx: &mut Context) -> Outcome;
}

/// Collaborators injected into filters when they are built.
#[derive(Clone)]
pub struct FilterDeps {
    /// Resolves destination names for bridges.
    pub mux: Arc<dyn MuxMapper>,
    /// Shared upstream client for proxies.
    pub client: HttpClient,
}

/// Constructor for one filter kind.
pub type FilterFactory = fn(&FilterSpec, &FilterDeps) -> Result<Box<dyn Filter>, ConfigError>;

/// Registry of known filter kinds.
pub struct FilterRegistry {
    kinds: HashMap<&'static str, (&'static Kind, FilterFactory)>,
}

impl FilterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Registry with the built-in Mock, Bridge and Proxy kinds.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(&mock::KIND, mock::create);
        registry.register(&bridge::KIND, bridge::create);
        registry.register(&proxy::KIND, proxy::create);
        registry
    }

    /// Register a kind; a later registration under the same name replaces it.
    pub fn register(&mut self, kind: &'static Kind, factory: FilterFactory) {
        self.kinds.insert(kind.name, (kind, factory));
    }

    pub fn kind(&self, name: &str) -> Option<&'static Kind> {
        self.kinds.get(name).map(|(kind, _)| *kind)
    }

    /// Build a filter instance from its spec.
    pub fn create(
        &self,
        spec: &FilterSpec,
        deps: &FilterDeps,
    ) -> Result<Box<dyn Filter>, ConfigError> {
        let (_, factory) =
            self.kinds
                .get(spec.kind.as_str())
                .ok_or_else(|| ConfigError::UnknownKind {
                    filter: spec.name.clone(),
                    kind: spec.kind.clone(),
                })?;
        factory(spec, deps)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::client::create_http_client;
    use crate::mux::Handler;

    /// Deps backed by a fixed handler map.
    pub fn deps_with(handlers: HashMap<String, Arc<dyn Handler>>) -> FilterDeps {
        FilterDeps {
            mux: Arc::new(handlers),
            client: create_http_client(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_strings() {
        assert_eq!(Outcome::Pass.as_str(), "");
        assert_eq!(Outcome::Mocked.as_str(), "mocked");
        assert_eq!(Outcome::DestinationNotFound.as_str(), "destinationNotFound");
        assert_eq!(
            Outcome::InvokeDestinationFailed.to_string(),
            "invokeDestinationFailed"
        );
        assert!(Outcome::Pass.is_pass());
        assert!(!Outcome::Mocked.is_failure());
        assert!(Outcome::DestinationNotFound.is_failure());
    }

    #[test]
    fn test_registry_defaults() {
        let registry = FilterRegistry::with_defaults();
        assert_eq!(registry.kind("Mock").unwrap().results, &[Outcome::Mocked]);
        assert!(registry.kind("Bridge").is_some());
        assert!(registry.kind("Proxy").is_some());
        assert!(registry.kind("Unknown").is_none());
    }

    #[test]
    fn test_registry_unknown_kind() {
        let registry = FilterRegistry::new();
        let spec: FilterSpec = serde_yaml::from_str("name: m\nkind: Mock\n").unwrap();
        let deps = test_support::deps_with(HashMap::new());
        let err = registry.create(&spec, &deps).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownKind { .. }));
    }
}
