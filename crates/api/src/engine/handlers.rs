//! Built-in perpetual task handlers.
//!
//! Each handler backs one task type: it validates the caller-supplied
//! context at create time and shapes the run descriptor pushed to the
//! assigned delegate. Adding a monitoring capability means adding a
//! handler here (or in a downstream crate) and registering it in
//! [`builtin_handlers`] -- the dispatch core never changes.

use std::sync::Arc;

use relay_core::error::CoreError;
use relay_core::perpetual::{PerpetualHandlerRegistry, PerpetualTaskHandler};
use serde_json::json;

/// Watches an HTTP endpoint from the delegate's side of the network.
///
/// Context: `{"url": "https://...", "expected_status": 200}` (status
/// optional, defaults to 200).
pub struct EndpointWatchHandler;

impl PerpetualTaskHandler for EndpointWatchHandler {
    fn task_type(&self) -> &'static str {
        "endpoint_watch"
    }

    fn validate(&self, context: &serde_json::Value) -> Result<(), CoreError> {
        let url = context
            .get("url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| CoreError::Validation("endpoint_watch requires a 'url'".into()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(CoreError::Validation(
                "endpoint_watch 'url' must be an http(s) URL".into(),
            ));
        }
        if let Some(status) = context.get("expected_status") {
            let valid = status.as_i64().is_some_and(|s| (100..600).contains(&s));
            if !valid {
                return Err(CoreError::Validation(
                    "endpoint_watch 'expected_status' must be an HTTP status code".into(),
                ));
            }
        }
        Ok(())
    }

    fn run_params(&self, context: &serde_json::Value) -> serde_json::Value {
        json!({
            "url": context.get("url"),
            "expected_status": context.get("expected_status").cloned().unwrap_or(json!(200)),
        })
    }
}

/// Samples host resource usage (cpu / memory / disk) on the delegate.
///
/// Context: `{"mounts": ["/", "/data"]}` (optional; defaults to `/`).
pub struct ResourceUsageHandler;

impl PerpetualTaskHandler for ResourceUsageHandler {
    fn task_type(&self) -> &'static str {
        "resource_usage"
    }

    fn validate(&self, context: &serde_json::Value) -> Result<(), CoreError> {
        if let Some(mounts) = context.get("mounts") {
            let all_strings = mounts
                .as_array()
                .is_some_and(|m| m.iter().all(|p| p.as_str().is_some_and(|s| !s.is_empty())));
            if !all_strings {
                return Err(CoreError::Validation(
                    "resource_usage 'mounts' must be an array of non-empty paths".into(),
                ));
            }
        }
        Ok(())
    }

    fn run_params(&self, context: &serde_json::Value) -> serde_json::Value {
        json!({
            "mounts": context.get("mounts").cloned().unwrap_or(json!(["/"])),
        })
    }
}

/// Registry with every built-in handler, wired once at startup.
pub fn builtin_handlers() -> PerpetualHandlerRegistry {
    let mut registry = PerpetualHandlerRegistry::new();
    registry
        .register(Arc::new(EndpointWatchHandler))
        .expect("endpoint_watch registered twice");
    registry
        .register(Arc::new(ResourceUsageHandler))
        .expect("resource_usage registered twice");
    registry
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
