//! Shared response envelope types for API handlers.
//!
//! All API responses use a `{ "data": ... }` envelope. Use
//! [`DataResponse`] instead of ad-hoc `serde_json::json!({ "data": ... })`
//! to get compile-time type safety and consistent serialization.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Envelope for bare acknowledgements (`delete`, `reset`, `pause`, ...):
/// `{ "data": { "acknowledged": true } }`.
pub fn ack() -> DataResponse<serde_json::Value> {
    DataResponse {
        data: serde_json::json!({ "acknowledged": true }),
    }
}
