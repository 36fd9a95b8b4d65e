//! Gatehouse: an HTTP pipeline server with mock and bridge filters.
//!
//! Requests enter the configured entry pipeline and flow through its filters
//! in order. Mock filters answer matching requests with canned responses,
//! bridge filters hand requests to other pipelines, and proxy filters forward
//! them to an upstream server.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod filters;
pub mod mux;
pub mod pipeline;
pub mod predicate;
pub mod server;

pub use config::Config;
pub use context::{Context, HttpRequest, HttpResponse};
pub use error::ConfigError;
pub use filters::{Filter, FilterRegistry, Outcome};
pub use mux::{DispatchError, Handler, MuxMapper, PipelineMux};
pub use pipeline::Pipeline;
pub use server::Server;
