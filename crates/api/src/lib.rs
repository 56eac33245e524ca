//! HTTP client for the easel coordination server.
//!
//! [`client::ApiClient`] wraps the wire endpoints (registration, task
//! acquisition, artifact upload, failure reporting, telemetry);
//! [`report`] layers the outcome-routing policy on top: a task the
//! worker believes failed is never reported as a success, and a failed
//! success upload cascades into a failure report so the server never
//! silently loses track of a task.

pub mod client;
pub mod metadata;
pub mod report;

pub use client::{ApiClient, ApiError};
pub use metadata::{ClientMetadata, ServerAck};
