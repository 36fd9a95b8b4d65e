//! Destination handlers and the registry bridges resolve them through.
//!
//! # Generations
//! ```text
//! Config ──build──► Arc<PipelineMux> (generation N) ──published──► Server
//!                        │
//!                        └─ pipelines ─► filters ─► Bridge ─► WeakMux ─┐
//!                                                                     │
//!                        ▲────────────────────────────────────────────┘
//! ```
//! Bridges hold only a weak reference back to the mux of their own
//! generation. A request keeps its generation alive by holding the
//! `Arc<PipelineMux>` it captured at start, so lookups never observe a newer
//! generation mid-request and a replaced generation is freed once idle.

use crate::client::HttpClient;
use crate::config::Config;
use crate::context::Context;
use crate::error::ConfigError;
use crate::filters::{bridge, BridgeSpec, FilterDeps, FilterRegistry, Outcome};
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use tracing::info;

/// Error reported by a destination handler.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("pipeline '{pipeline}' ended with '{outcome}'")]
    Pipeline { pipeline: String, outcome: Outcome },
    #[error("{0}")]
    Handler(String),
}

/// Something a bridge can hand a request to.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut Context) -> Result<(), DispatchError>;
}

/// Maps a destination name to its handler.
pub trait MuxMapper: Send + Sync {
    fn get_handler(&self, name: &str) -> Option<Arc<dyn Handler>>;
}

impl MuxMapper for HashMap<String, Arc<dyn Handler>> {
    fn get_handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.get(name).cloned()
    }
}

/// One published generation of pipelines.
pub struct PipelineMux {
    entry: String,
    pipelines: OnceLock<HashMap<String, Arc<Pipeline>>>,
}

impl PipelineMux {
    /// Compile every pipeline in `config` into a new generation.
    pub fn build(
        config: &Config,
        registry: &FilterRegistry,
        client: HttpClient,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        check_default_routes(config)?;

        let mux = Arc::new(Self {
            entry: config.entry.clone(),
            pipelines: OnceLock::new(),
        });
        let deps = FilterDeps {
            mux: Arc::new(WeakMux(Arc::downgrade(&mux))),
            client,
        };

        let mut pipelines = HashMap::with_capacity(config.pipelines.len());
        for pipeline_config in &config.pipelines {
            let pipeline = Pipeline::from_config(pipeline_config, registry, &deps)?;
            pipelines.insert(pipeline_config.name.clone(), Arc::new(pipeline));
        }

        info!(
            pipelines = pipelines.len(),
            entry = %config.entry,
            "Pipeline generation built"
        );

        // Freshly created, so the cell is always empty here
        let _ = mux.pipelines.set(pipelines);
        Ok(mux)
    }

    /// Pipeline serving the listener.
    pub fn entry(&self) -> Option<Arc<Pipeline>> {
        self.pipeline(&self.entry)
    }

    pub fn pipeline(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.get()?.get(name).cloned()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.get().map_or(0, HashMap::len)
    }
}

/// Reject generations in which pipelines opening with a bridge reach each
/// other through their default destinations. A request entering such a loop
/// is dispatched forever without ever reaching a filter that could stop it.
fn check_default_routes(config: &Config) -> Result<(), ConfigError> {
    let mut defaults: HashMap<&str, String> = HashMap::new();
    for pipeline in &config.pipelines {
        let Some(first) = pipeline.filters.first() else {
            continue;
        };
        if first.kind != bridge::KIND.name {
            continue;
        }
        let spec: BridgeSpec = first.decode()?;
        if let Some(dest) = spec.destinations.into_iter().next() {
            defaults.insert(pipeline.name.as_str(), dest);
        }
    }

    for pipeline in &config.pipelines {
        let mut route = vec![pipeline.name.clone()];
        let mut current = pipeline.name.as_str();
        while let Some(dest) = defaults.get(current) {
            if let Some(start) = route.iter().position(|name| name == dest) {
                let mut cycle = route.split_off(start);
                cycle.push(dest.clone());
                return Err(ConfigError::BridgeCycle(cycle));
            }
            route.push(dest.clone());
            current = dest.as_str();
        }
    }

    Ok(())
}

impl MuxMapper for PipelineMux {
    fn get_handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.pipeline(name).map(|p| p as Arc<dyn Handler>)
    }
}

/// Back-reference from filters to the generation that owns them.
struct WeakMux(Weak<PipelineMux>);

impl MuxMapper for WeakMux {
    fn get_handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.0.upgrade()?.get_handler(name)
    }
}
