//! HTTP front for apisign.
//!
//! [`SignHttpService`] is a hyper `Service` that collects each request body,
//! builds the request's parameter set from the query string and any
//! url-encoded form body, runs the [`SignGate`](apisign_core::SignGate) and
//! either forwards the untouched request to an [`ApiHandler`] or answers with
//! a JSON error.
//!
//! - **Handler trait**: the boundary between transport and the protected API
//! - **Service**: hyper `Service` running the verification pipeline
//! - **Response helpers**: JSON success/error formatting

pub mod body;
pub mod dispatch;
pub mod response;
pub mod service;

pub use body::ApiResponseBody;
pub use dispatch::{ApiHandler, EchoHandler};
pub use service::SignHttpService;
