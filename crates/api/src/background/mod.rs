//! Long-lived background maintenance tasks.

pub mod wait_cleanup;
