//! Hyper service enforcing request signatures.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use apisign_auth::{ParameterSet, SignError};
use apisign_core::{SignGate, Verdict};
use bytes::Bytes;
use http_body_util::BodyExt;
use tracing::{debug, error};

use crate::body::ApiResponseBody;
use crate::dispatch::ApiHandler;
use crate::response::{REQUEST_ID_HEADER, error_to_response, json_response};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Hyper `Service` that verifies every request before handing it to `H`.
pub struct SignHttpService<H: ApiHandler> {
    handler: Arc<H>,
    gate: Arc<SignGate>,
}

impl<H: ApiHandler> SignHttpService<H> {
    /// Create a service guarding `handler` with `gate`.
    pub fn new(handler: Arc<H>, gate: Arc<SignGate>) -> Self {
        Self { handler, gate }
    }

    /// The gate shared by every connection of this service.
    #[must_use]
    pub fn gate(&self) -> &Arc<SignGate> {
        &self.gate
    }
}

impl<H: ApiHandler> Clone for SignHttpService<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<H: ApiHandler> fmt::Debug for SignHttpService<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignHttpService")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl<H, B> hyper::service::Service<http::Request<B>> for SignHttpService<H>
where
    H: ApiHandler,
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: fmt::Display,
{
    type Response = http::Response<ApiResponseBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        let gate = Arc::clone(&self.gate);
        let request_id = uuid::Uuid::new_v4().to_string();

        Box::pin(async move {
            if is_health_check(req.method(), req.uri().path()) {
                return Ok(health_check_response(&gate, &request_id));
            }
            let response = process_request(req, handler.as_ref(), gate, &request_id).await;
            Ok(add_common_headers(response, &request_id))
        })
    }
}

/// Run one request through the verification pipeline.
async fn process_request<H, B>(
    req: http::Request<B>,
    handler: &H,
    gate: Arc<SignGate>,
    request_id: &str,
) -> http::Response<ApiResponseBody>
where
    H: ApiHandler,
    B: http_body::Body<Data = Bytes>,
    B::Error: fmt::Display,
{
    let (parts, body) = req.into_parts();

    // 1. Collect body.
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(request_id, error = %e, "Failed to read request body");
            return invalid_body_response(request_id);
        }
    };

    // 2. Merge form and query parameters.
    let params = request_params(&parts, &body);

    // 3. Verify off the async workers; app lookups may block.
    let (params, verdict) = match verify_blocking(gate, params).await {
        Ok(verified) => verified,
        Err(err) => return error_to_response(&err, request_id),
    };

    debug!(
        request_id,
        method = %parts.method,
        path = parts.uri.path(),
        ?verdict,
        "Forwarding request"
    );

    // 4. Hand the untouched request to the API.
    let mut req = http::Request::from_parts(parts, body);
    req.extensions_mut().insert(params);
    req.extensions_mut().insert(verdict);
    handler.handle(req, request_id.to_owned()).await
}

async fn verify_blocking(
    gate: Arc<SignGate>,
    params: ParameterSet,
) -> Result<(ParameterSet, Verdict), SignError> {
    tokio::task::spawn_blocking(move || gate.verify(&params).map(|verdict| (params, verdict)))
        .await
        .map_err(|e| {
            error!(error = %e, "Verification task failed");
            SignError::Internal("VerifyFailed".to_owned())
        })?
}

/// Build the parameter set from a url-encoded body, then the query string.
///
/// Body values come first, so a name sent in both places reads the body value.
/// Every field of the body is kept, whatever its encoding, so all of it is
/// covered by the signature.
fn request_params(parts: &http::request::Parts, body: &Bytes) -> ParameterSet {
    let mut params = ParameterSet::new();

    if is_form(&parts.headers) {
        params.extend_from_bytes(body);
    }
    params.extend_from_query(parts.uri.query().unwrap_or_default());

    params
}

/// 400 response for a body that could not be read.
fn invalid_body_response(request_id: &str) -> http::Response<ApiResponseBody> {
    let body = serde_json::json!({
        "code": "InvalidRequest",
        "message": "Failed to read request body",
    });
    json_response(http::StatusCode::BAD_REQUEST, &body, request_id)
}

fn is_form(headers: &http::HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
}

fn is_health_check(method: &http::Method, path: &str) -> bool {
    method == http::Method::GET && path == "/health"
}

fn health_check_response(gate: &SignGate, request_id: &str) -> http::Response<ApiResponseBody> {
    let body = serde_json::json!({
        "status": "running",
        "sign_enabled": gate.is_enabled(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    json_response(http::StatusCode::OK, &body, request_id)
}

/// Headers added to every response, including ones built by the handler.
fn add_common_headers(
    mut response: http::Response<ApiResponseBody>,
    request_id: &str,
) -> http::Response<ApiResponseBody> {
    let headers = response.headers_mut();

    if let Ok(hv) = http::HeaderValue::from_str(request_id) {
        headers.entry(REQUEST_ID_HEADER).or_insert(hv);
    }
    headers.insert("server", http::HeaderValue::from_static("apisign"));

    response
}
