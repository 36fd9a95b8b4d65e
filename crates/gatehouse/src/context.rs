//! Per-request context shared by every filter in a pipeline.
//!
//! The request body is buffered before the pipeline runs, so filters see a
//! plain `Bytes` payload. The response starts as an empty `200 OK` and is
//! mutated in place by whichever filter produces it.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use tokio_util::sync::CancellationToken;

/// Inbound request as seen by filters.
#[derive(Debug)]
pub struct HttpRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    cancel: CancellationToken,
}

impl HttpRequest {
    pub fn new(req: Request<Bytes>) -> Self {
        Self::with_cancellation(req, CancellationToken::new())
    }

    /// Build a request whose lifetime is tied to `cancel`.
    pub fn with_cancellation(req: Request<Bytes>, cancel: CancellationToken) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            cancel,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// All values carried for `name`, in arrival order.
    pub fn header_values<'a>(
        &'a self,
        name: &HeaderName,
    ) -> hyper::header::GetAll<'a, HeaderValue> {
        self.headers.get_all(name)
    }

    /// Remove every value for `name`.
    pub fn remove_header(&mut self, name: &HeaderName) {
        self.headers.remove(name);
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Fires when the request is abandoned or the server shuts down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Response being assembled for the client.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

impl HttpResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Set a header, replacing any existing values.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Replace the payload.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Convert into a hyper response. Content-Length is left to hyper.
    pub fn into_hyper(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Request/response pair handed to each filter.
#[derive(Debug)]
pub struct Context {
    pub request: HttpRequest,
    pub response: HttpResponse,
    bridge_hops: u32,
}

impl Context {
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            response: HttpResponse::default(),
            bridge_hops: 0,
        }
    }

    /// Number of bridges the request is currently nested in.
    pub fn bridge_hops(&self) -> u32 {
        self.bridge_hops
    }

    pub(crate) fn enter_bridge(&mut self) {
        self.bridge_hops += 1;
    }

    pub(crate) fn leave_bridge(&mut self) {
        self.bridge_hops = self.bridge_hops.saturating_sub(1);
    }
}
