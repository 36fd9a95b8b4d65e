//! HTTP server: accepts connections, buffers each request and runs it through
//! the entry pipeline of the currently published generation.

use crate::client::{create_http_client, HttpClient};
use crate::config::Config;
use crate::context::{Context, HttpRequest};
use crate::error::ConfigError;
use crate::filters::FilterRegistry;
use crate::mux::PipelineMux;
use arc_swap::ArcSwap;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Server {
    mux: ArcSwap<PipelineMux>,
    registry: FilterRegistry,
    client: HttpClient,
    shutdown: CancellationToken,
}

impl Server {
    /// Build a server with the built-in filter kinds.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Self::with_registry(config, FilterRegistry::with_defaults())
    }

    pub fn with_registry(config: &Config, registry: FilterRegistry) -> Result<Self, ConfigError> {
        let client = create_http_client();
        let mux = PipelineMux::build(config, &registry, client.clone())?;
        Ok(Self {
            mux: ArcSwap::new(mux),
            registry,
            client,
            shutdown: CancellationToken::new(),
        })
    }

    /// Build and publish a new generation. On error the current one stays live.
    pub fn reload(&self, config: &Config) -> Result<(), ConfigError> {
        let mux = PipelineMux::build(config, &self.registry, self.client.clone())?;
        self.mux.store(mux);
        info!(entry = %config.entry, "Configuration reloaded");
        Ok(())
    }

    /// Currently published generation.
    pub fn snapshot(&self) -> Arc<PipelineMux> {
        self.mux.load_full()
    }

    /// Cancelling this token stops the accept loop and every in-flight request.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one request through the entry pipeline.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                let mut resp = Response::new(Full::new(Bytes::new()));
                *resp.status_mut() = StatusCode::BAD_REQUEST;
                return resp;
            }
        };

        // Cancelled when the request finishes, the connection drops or the
        // server shuts down.
        let token = self.shutdown.child_token();
        let _guard = token.clone().drop_guard();

        let request = HttpRequest::with_cancellation(Request::from_parts(parts, body), token);
        let mut ctx = Context::new(request);

        let mux = self.snapshot();
        match mux.entry() {
            Some(pipeline) => {
                let outcome = pipeline.run(&mut ctx).await;
                debug!(
                    pipeline = pipeline.name(),
                    path = ctx.request.path(),
                    outcome = %outcome,
                    status = ctx.response.status().as_u16(),
                    "request handled"
                );
            }
            None => {
                error!("Entry pipeline missing from published generation");
                ctx.response.set_status(StatusCode::SERVICE_UNAVAILABLE);
            }
        }

        ctx.response.into_hyper()
    }

    /// Accept connections until the shutdown token is cancelled.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), anyhow::Error> {
        info!("Listening on http://{}", listener.local_addr()?);
        info!("Serving {} pipelines", self.snapshot().pipeline_count());

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutting down listener");
                    return Ok(());
                }
                accepted = listener.accept() => accepted?,
            };

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let shutdown = server.shutdown.clone();
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });

                let conn = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(conn);
                tokio::select! {
                    res = conn.as_mut() => {
                        if let Err(err) = res {
                            error!("Error serving HTTP connection from {}: {}", remote_addr, err);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        if let Err(err) = conn.await {
                            debug!("Connection from {} closed during shutdown: {}", remote_addr, err);
                        }
                    }
                }
            });
        }
    }
}
