//! Bridge filter: routes a request from one pipeline into another.
//!
//! An upstream filter names the target in the `X-Easegress-Bridge-Dest`
//! header. The bridge checks the name against its configured destinations,
//! strips the header and dispatches to the handler the mux resolves for it.
//! Without the header the first configured destination is used.
//!
//! ```text
//! Start ─┬─ no header ──────────────► default = destinations[0] ─┐
//!        └─ header ─┬─ configured ──► strip header ──────────────┼─► lookup ─┬─ found ──► dispatch
//!                   └─ unknown ─────► 503 destinationNotFound    │           └─ missing ► 503 destinationNotFound
//! ```

use super::{Filter, FilterDeps, Kind, Outcome};
use crate::config::FilterSpec;
use crate::context::{Context, HttpRequest};
use crate::error::ConfigError;
use crate::mux::MuxMapper;
use async_trait::async_trait;
use hyper::header::HeaderName;
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Deepest bridge nesting a single request may reach. Dispatch past this
/// depth is refused so a routing cycle cannot exhaust the stack.
pub const MAX_BRIDGE_HOPS: u32 = 16;

/// Header carrying the caller's destination preference.
pub static BRIDGE_DEST_HEADER: HeaderName = HeaderName::from_static("x-easegress-bridge-dest");

pub static KIND: Kind = Kind {
    name: "Bridge",
    description: "Bridge routes requests from one pipeline to other pipelines under the same server.",
    results: &[Outcome::DestinationNotFound, Outcome::InvokeDestinationFailed],
};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSpec {
    pub destinations: Vec<String>,
}

pub struct Bridge {
    name: String,
    destinations: Vec<String>,
    mux: Arc<dyn MuxMapper>,
}

impl Bridge {
    /// Build a bridge. The destination list must be non-empty and every
    /// entry free of whitespace.
    pub fn new(
        name: impl Into<String>,
        spec: BridgeSpec,
        mux: Arc<dyn MuxMapper>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if spec.destinations.is_empty() {
            return Err(ConfigError::NoDestinations(name));
        }
        if let Some(bad) = spec
            .destinations
            .iter()
            .find(|d| d.is_empty() || d.contains([' ', '\t']))
        {
            return Err(ConfigError::InvalidDestination {
                filter: name,
                destination: bad.clone(),
            });
        }

        Ok(Self {
            name,
            destinations: spec.destinations,
            mux,
        })
    }

    /// Pick the destination for a request, consuming the signal header when
    /// it names a configured destination. `None` means the header named
    /// something unknown; the header is then left in place.
    pub fn resolve(&self, req: &mut HttpRequest) -> Option<&str> {
        let signal = req
            .headers()
            .get(&BRIDGE_DEST_HEADER)
            .map(|v| v.to_str().ok());

        match signal {
            None | Some(Some("")) => {
                let default = self.destinations[0].as_str();
                warn!(
                    filter = %self.name,
                    "destination not defined, will choose the first dest: {}", default
                );
                Some(default)
            }
            Some(None) => {
                error!(filter = %self.name, "dest not found: value is not valid text");
                None
            }
            Some(Some(wanted)) => {
                let found = self
                    .destinations
                    .iter()
                    .find(|d| d.as_str() == wanted)
                    .map(String::as_str);
                match found {
                    Some(dest) => {
                        req.remove_header(&BRIDGE_DEST_HEADER);
                        Some(dest)
                    }
                    None => {
                        error!(filter = %self.name, "dest not found: {}", wanted);
                        None
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Filter for Bridge {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static Kind {
        &KIND
    }

    async fn handle(&self, ctx: &mut Context) -> Outcome {
        let Some(dest) = self.resolve(&mut ctx.request) else {
            ctx.response.set_status(StatusCode::SERVICE_UNAVAILABLE);
            return Outcome::DestinationNotFound;
        };

        let Some(handler) = self.mux.get_handler(dest) else {
            error!(filter = %self.name, "failed to get running object {}", dest);
            ctx.response.set_status(StatusCode::SERVICE_UNAVAILABLE);
            return Outcome::DestinationNotFound;
        };

        if ctx.bridge_hops() >= MAX_BRIDGE_HOPS {
            error!(
                filter = %self.name,
                destination = dest,
                hops = ctx.bridge_hops(),
                "bridge loop detected, refusing to dispatch"
            );
            ctx.response.set_status(StatusCode::LOOP_DETECTED);
            return Outcome::InvokeDestinationFailed;
        }

        debug!(filter = %self.name, destination = dest, "bridging request");
        ctx.enter_bridge();
        let result = handler.handle(ctx).await;
        ctx.leave_bridge();

        match result {
            Ok(()) => Outcome::Pass,
            Err(e) => {
                error!(filter = %self.name, destination = dest, "destination failed: {}", e);
                Outcome::InvokeDestinationFailed
            }
        }
    }
}

pub(crate) fn create(spec: &FilterSpec, deps: &FilterDeps) -> Result<Box<dyn Filter>, ConfigError> {
    let bridge_spec: BridgeSpec = spec.decode()?;
    Ok(Box::new(Bridge::new(
        spec.name.clone(),
        bridge_spec,
        Arc::clone(&deps.mux),
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::{DispatchError, Handler};
    use bytes::Bytes;
    use hyper::Request;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records calls and whether the signal header reached it.
    #[derive(Default)]
    struct Recorder {
        calls: AtomicUsize,
        saw_signal: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn handle(&self, ctx: &mut Context) -> Result<(), DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ctx.request.headers().contains_key(&BRIDGE_DEST_HEADER) {
                self.saw_signal.fetch_add(1, Ordering::SeqCst);
            }
            if self.fail {
                return Err(DispatchError::Handler("boom".to_string()));
            }
            ctx.response.set_status(StatusCode::ACCEPTED);
            Ok(())
        }
    }

    fn bridge(destinations: &[&str], handlers: &[(&str, Arc<Recorder>)]) -> Bridge {
        let map: HashMap<String, Arc<dyn Handler>> = handlers
            .iter()
            .map(|(name, h)| (name.to_string(), Arc::clone(h) as Arc<dyn Handler>))
            .collect();
        Bridge::new(
            "bridge",
            BridgeSpec {
                destinations: destinations.iter().map(|d| d.to_string()).collect(),
            },
            Arc::new(map),
        )
        .unwrap()
    }

    fn ctx(signal: Option<&str>) -> Context {
        let mut builder = Request::builder().uri("http://example.com/");
        if let Some(dest) = signal {
            builder = builder.header("X-Easegress-Bridge-Dest", dest);
        }
        Context::new(HttpRequest::new(builder.body(Bytes::new()).unwrap()))
    }

    #[test]
    fn test_default_destination() {
        let b = bridge(&["a", "b"], &[]);
        let mut c = ctx(None);
        assert_eq!(b.resolve(&mut c.request), Some("a"));
    }

    #[test]
    fn test_empty_signal_uses_default() {
        let b = bridge(&["a", "b"], &[]);
        let mut c = ctx(Some(""));
        assert_eq!(b.resolve(&mut c.request), Some("a"));
    }

    #[tokio::test]
    async fn test_signal_routes_and_is_stripped() {
        let a = Arc::new(Recorder::default());
        let b_handler = Arc::new(Recorder::default());
        let b = bridge(&["a", "b"], &[("a", a.clone()), ("b", b_handler.clone())]);

        let mut c = ctx(Some("b"));
        let outcome = b.handle(&mut c).await;

        assert_eq!(outcome, Outcome::Pass);
        assert_eq!(outcome.as_str(), "");
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        assert_eq!(b_handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_handler.saw_signal.load(Ordering::SeqCst), 0);
        assert!(!c.request.headers().contains_key(&BRIDGE_DEST_HEADER));
        assert_eq!(c.response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_unknown_signal() {
        let a = Arc::new(Recorder::default());
        let b = bridge(&["a", "b"], &[("a", a.clone())]);

        let mut c = ctx(Some("c"));
        let outcome = b.handle(&mut c).await;

        assert_eq!(outcome, Outcome::DestinationNotFound);
        assert_eq!(c.response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_handler() {
        let b = bridge(&["a", "b"], &[]);

        let mut c = ctx(Some("a"));
        let outcome = b.handle(&mut c).await;

        assert_eq!(outcome, Outcome::DestinationNotFound);
        assert_eq!(c.response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_default_dispatch() {
        let a = Arc::new(Recorder::default());
        let b = bridge(&["a", "b"], &[("a", a.clone())]);

        let mut c = ctx(None);
        assert_eq!(b.handle(&mut c).await, Outcome::Pass);
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_failure() {
        let a = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let b = bridge(&["a"], &[("a", a.clone())]);

        let mut c = ctx(Some("a"));
        assert_eq!(b.handle(&mut c).await, Outcome::InvokeDestinationFailed);
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hop_limit_refuses_dispatch() {
        let a = Arc::new(Recorder::default());
        let b = bridge(&["a"], &[("a", a.clone())]);

        let mut c = ctx(None);
        for _ in 0..MAX_BRIDGE_HOPS {
            c.enter_bridge();
        }
        assert_eq!(b.handle(&mut c).await, Outcome::InvokeDestinationFailed);
        assert_eq!(c.response.status(), StatusCode::LOOP_DETECTED);
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hops_restored_after_dispatch() {
        let a = Arc::new(Recorder::default());
        let b = bridge(&["a"], &[("a", a.clone())]);

        let mut c = ctx(None);
        assert_eq!(b.handle(&mut c).await, Outcome::Pass);
        assert_eq!(c.bridge_hops(), 0);
    }

    #[test]
    fn test_empty_destinations_rejected() {
        let err = Bridge::new(
            "bridge",
            BridgeSpec::default(),
            Arc::new(HashMap::<String, Arc<dyn Handler>>::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::NoDestinations(ref name) if name == "bridge"));
    }

    #[test]
    fn test_whitespace_destination_rejected() {
        let err = Bridge::new(
            "bridge",
            BridgeSpec {
                destinations: vec!["ok".to_string(), "not ok".to_string()],
            },
            Arc::new(HashMap::<String, Arc<dyn Handler>>::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::InvalidDestination { .. }));
    }
}
