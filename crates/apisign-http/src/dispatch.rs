//! Handler trait for the protected API.

use std::future::Future;
use std::pin::Pin;

use apisign_auth::ParameterSet;
use apisign_core::Verdict;
use bytes::Bytes;

use crate::body::ApiResponseBody;
use crate::response::json_response;

/// Future returned by [`ApiHandler::handle`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = http::Response<ApiResponseBody>> + Send>>;

/// The API sitting behind the signature gate.
///
/// Only requests the gate let through reach the handler. The request is the
/// one the client sent, with the body already buffered. Its extensions carry
/// the [`ParameterSet`] that was verified and the gate's [`Verdict`].
pub trait ApiHandler: Send + Sync + 'static {
    /// Handle a request that passed the gate.
    fn handle(&self, req: http::Request<Bytes>, request_id: String) -> HandlerFuture;
}

/// Handler that answers with the parameters it received. Bytes that are not
/// UTF-8 are shown as replacement characters.
#[derive(Debug, Clone, Default)]
pub struct EchoHandler;

impl ApiHandler for EchoHandler {
    fn handle(&self, req: http::Request<Bytes>, request_id: String) -> HandlerFuture {
        Box::pin(async move {
            let params: serde_json::Map<String, serde_json::Value> = req
                .extensions()
                .get::<ParameterSet>()
                .map(|params| {
                    params
                        .iter()
                        .map(|(name, values)| {
                            let values: Vec<_> =
                                values.iter().map(|v| String::from_utf8_lossy(v)).collect();
                            (
                                String::from_utf8_lossy(name).into_owned(),
                                serde_json::json!(values),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default();

            let verdict = match req.extensions().get::<Verdict>() {
                Some(Verdict::Verified { app_id }) => {
                    serde_json::json!({ "verified": true, "app_id": app_id })
                }
                Some(Verdict::Bypassed(reason)) => {
                    serde_json::json!({ "verified": false, "bypass": reason.to_string() })
                }
                None => serde_json::json!({ "verified": false }),
            };

            let body = serde_json::json!({
                "method": req.method().as_str(),
                "path": req.uri().path(),
                "verdict": verdict,
                "params": params,
            });
            json_response(http::StatusCode::OK, &body, &request_id)
        })
    }
}
