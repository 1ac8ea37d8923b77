//! Pluggable handlers for perpetual task types.
//!
//! Perpetual tasks are long-lived monitoring assignments; each type is
//! backed by a handler that validates the caller-supplied context at
//! create time and builds the run descriptor pushed to the assigned
//! delegate. New monitoring capabilities are added by registering a
//! handler under a new type key -- the dispatch core never changes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CoreError;

/// Per-type behaviour for a perpetual task.
pub trait PerpetualTaskHandler: Send + Sync {
    /// The type key this handler is registered under.
    fn task_type(&self) -> &'static str;

    /// Validate the opaque client context supplied at create time.
    fn validate(&self, context: &serde_json::Value) -> Result<(), CoreError>;

    /// Build the run parameters pushed to the delegate on assignment.
    fn run_params(&self, context: &serde_json::Value) -> serde_json::Value;
}

/// Registry mapping a task-type key to its handler.
///
/// Populated once at startup and then read-only, so plain `HashMap`
/// lookups suffice -- no interior mutability.
pub struct PerpetualHandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn PerpetualTaskHandler>>,
}

impl PerpetualHandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its type key.
    ///
    /// Registering two handlers for the same key is a wiring bug;
    /// returns `Conflict` so startup fails loudly instead of silently
    /// shadowing one of them.
    pub fn register(
        &mut self,
        handler: Arc<dyn PerpetualTaskHandler>,
    ) -> Result<(), CoreError> {
        let key = handler.task_type();
        if self.handlers.contains_key(key) {
            return Err(CoreError::Conflict(format!(
                "A perpetual task handler is already registered for type '{key}'"
            )));
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Look up the handler for a type key.
    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn PerpetualTaskHandler>> {
        self.handlers.get(task_type)
    }

    /// All registered type keys, sorted for stable output.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

impl Default for PerpetualHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
