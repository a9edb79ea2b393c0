//! JSON response formatting.

use apisign_auth::SignError;

use crate::body::ApiResponseBody;

/// Content type of every JSON response.
pub const CONTENT_TYPE: &str = "application/json";

/// Header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Serialize a verification error:
///
/// ```json
/// {"code": "SignExpired", "message": "Request has expired!"}
/// ```
#[must_use]
pub fn error_to_json(error: &SignError) -> serde_json::Value {
    serde_json::json!({
        "code": error.code(),
        "message": error.to_string(),
    })
}

/// Convert a [`SignError`] into a complete HTTP error response.
#[must_use]
pub fn error_to_response(error: &SignError, request_id: &str) -> http::Response<ApiResponseBody> {
    json_response(error.status_code(), &error_to_json(error), request_id)
}

/// Build a JSON response with the given status.
#[must_use]
pub fn json_response(
    status: http::StatusCode,
    value: &serde_json::Value,
    request_id: &str,
) -> http::Response<ApiResponseBody> {
    let mut response = http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, CONTENT_TYPE)
        .body(ApiResponseBody::json(value))
        .expect("valid JSON response");

    if let Ok(hv) = http::HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, hv);
    }

    response
}
