//! Ordered filter chain.
//!
//! Filters run in declaration order; the first non-empty outcome ends the
//! pipeline and becomes its result.

use crate::config::PipelineConfig;
use crate::context::Context;
use crate::error::ConfigError;
use crate::filters::{Filter, FilterDeps, FilterRegistry, Outcome};
use crate::mux::{DispatchError, Handler};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

pub struct Pipeline {
    name: String,
    filters: Vec<Box<dyn Filter>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, filters: Vec<Box<dyn Filter>>) -> Self {
        Self {
            name: name.into(),
            filters,
        }
    }

    pub fn from_config(
        config: &PipelineConfig,
        registry: &FilterRegistry,
        deps: &FilterDeps,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut filters = Vec::with_capacity(config.filters.len());

        for spec in &config.filters {
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateFilter {
                    pipeline: config.name.clone(),
                    filter: spec.name.clone(),
                });
            }
            filters.push(registry.create(spec, deps)?);
        }

        Ok(Self::new(config.name.clone(), filters))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&self, ctx: &mut Context) -> Outcome {
        for filter in &self.filters {
            let outcome = filter.handle(ctx).await;
            if !outcome.is_pass() {
                debug!(
                    pipeline = %self.name,
                    filter = filter.name(),
                    kind = filter.kind().name,
                    outcome = %outcome,
                    "pipeline stopped"
                );
                return outcome;
            }
        }
        Outcome::Pass
    }
}

#[async_trait]
impl Handler for Pipeline {
    async fn handle(&self, ctx: &mut Context) -> Result<(), DispatchError> {
        let outcome = self.run(ctx).await;
        if outcome.is_failure() {
            return Err(DispatchError::Pipeline {
                pipeline: self.name.clone(),
                outcome,
            });
        }
        Ok(())
    }
}
