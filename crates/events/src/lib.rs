//! Relay in-process event bus.
//!
//! Carries dispatch lifecycle events between the engine and interested
//! observers inside one manager process:
//!
//! - [`EventBus`] -- publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`DispatchEvent`] -- the canonical event envelope (task, delegate,
//!   and perpetual-task lifecycle).
//!
//! The bus is intentionally not durable: cross-replica truth lives in
//! the task store, and a subscriber that lags simply observes a gap.

pub mod bus;

pub use bus::{DispatchEvent, EventBus};
