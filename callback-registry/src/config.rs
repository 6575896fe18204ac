//! Registry configuration types
//!
//! The registry needs very little configuration: sizing of the entry table
//! and whether individual invocations are traced. Workload settings live in
//! the application layer (callback-registry-cli).

use serde::{Deserialize, Serialize};

/// Configuration for a [`CallbackRegistry`](crate::CallbackRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Number of entries to reserve up front
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Emit a `trace!` line for every invocation
    #[serde(default)]
    pub trace_calls: bool,
}

fn default_initial_capacity() -> usize {
    64
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
            trace_calls: false,
        }
    }
}

impl RegistryConfig {
    /// Create a new registry configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the number of entries reserved up front
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Builder method: enable or disable per-call tracing
    pub fn with_call_tracing(mut self, enabled: bool) -> Self {
        self.trace_calls = enabled;
        self
    }
}
