//! Domain-level error type shared across the workspace.

/// Errors produced by domain logic (validation, lookups, auth).
///
/// Transport-specific mapping to HTTP status codes lives in the API
/// crate; this enum only captures the domain meaning.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An entity lookup failed.
    #[error("{entity} {id} not found")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    /// Caller-supplied input failed validation.
    #[error("{0}")]
    Validation(String),

    /// The requested transition conflicts with current state.
    #[error("{0}")]
    Conflict(String),

    /// A credential was missing, malformed, or did not match.
    #[error("{0}")]
    Unauthorized(String),

    /// An unrecoverable internal condition.
    #[error("{0}")]
    Internal(String),
}
