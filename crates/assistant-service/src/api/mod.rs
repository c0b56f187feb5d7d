//! HTTP handlers for the device-facing surface.

pub mod query_api;
pub mod quota_api;

pub use query_api::query;
pub use quota_api::{get_quota, QuotaResponse};

/// GET /heartbeat
pub async fn heartbeat() -> &'static str {
    "bobby"
}
