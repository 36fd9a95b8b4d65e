//! Proxy filter: forwards the request to a single upstream and copies the
//! upstream response into the context.

use super::{Filter, FilterDeps, Kind, Outcome};
use crate::client::HttpClient;
use crate::config::FilterSpec;
use crate::context::Context;
use crate::error::ConfigError;
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::header::HOST;
use hyper::{Request, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

pub static KIND: Kind = Kind {
    name: "Proxy",
    description: "Proxy forwards requests to an upstream HTTP server.",
    results: &[Outcome::ProxyFailed],
};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    /// Upstream base URL, e.g. `http://127.0.0.1:9000`.
    pub url: String,
}

pub struct Proxy {
    name: String,
    upstream: String,
    client: HttpClient,
}

impl Proxy {
    pub fn new(
        name: impl Into<String>,
        spec: ProxySpec,
        client: HttpClient,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let invalid = |reason: &str| ConfigError::InvalidUpstream {
            filter: name.clone(),
            url: spec.url.clone(),
            reason: reason.to_string(),
        };

        let uri: Uri = spec.url.parse().map_err(|_| invalid("not a valid URI"))?;
        if uri.scheme_str() != Some("http") {
            return Err(invalid("only http upstreams are supported"));
        }
        if uri.authority().is_none() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            upstream: spec.url.trim_end_matches('/').to_string(),
            name,
            client,
        })
    }

    fn upstream_request(&self, ctx: &Context) -> Result<Request<Full<bytes::Bytes>>, hyper::http::Error> {
        let req = &ctx.request;
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut builder = Request::builder()
            .method(req.method().clone())
            .uri(format!("{}{}", self.upstream, path));

        for (key, value) in req.headers() {
            if key != HOST {
                builder = builder.header(key, value);
            }
        }

        builder.body(Full::new(req.body().clone()))
    }

    fn fail(&self, ctx: &mut Context) -> Outcome {
        ctx.response.set_status(StatusCode::BAD_GATEWAY);
        Outcome::ProxyFailed
    }
}

#[async_trait]
impl Filter for Proxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static Kind {
        &KIND
    }

    async fn handle(&self, ctx: &mut Context) -> Outcome {
        let upstream_req = match self.upstream_request(ctx) {
            Ok(req) => req,
            Err(e) => {
                error!(filter = %self.name, "failed to build upstream request: {}", e);
                return self.fail(ctx);
            }
        };

        debug!(filter = %self.name, uri = %upstream_req.uri(), "forwarding");

        let response = match self.client.request(upstream_req).await {
            Ok(response) => response,
            Err(e) => {
                error!(filter = %self.name, "failed to forward request to upstream: {}", e);
                return self.fail(ctx);
            }
        };

        let (parts, body) = response.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                error!(filter = %self.name, "failed to collect upstream response body: {}", e);
                return self.fail(ctx);
            }
        };

        ctx.response.set_status(parts.status);
        *ctx.response.headers_mut() = parts.headers;
        ctx.response.set_body(body);
        Outcome::Pass
    }
}

pub(crate) fn create(spec: &FilterSpec, deps: &FilterDeps) -> Result<Box<dyn Filter>, ConfigError> {
    let proxy_spec: ProxySpec = spec.decode()?;
    Ok(Box::new(Proxy::new(
        spec.name.clone(),
        proxy_spec,
        deps.client.clone(),
    )?))
}
