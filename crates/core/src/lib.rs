//! Relay core domain layer.
//!
//! Dependency-light building blocks shared by the storage and API crates:
//! id/time aliases, domain errors, the capability-based delivery filter,
//! the wait/notify correlation registry, the perpetual-task handler
//! registry, and the clock abstraction used for deterministic tests.

pub mod clock;
pub mod error;
pub mod filter;
pub mod outcome;
pub mod perpetual;
pub mod task_events;
pub mod types;
pub mod wait;
