//! Error types for otter-bridge
//!
//! Script-visible failures never show up here: they travel as thrown
//! [`Value`](crate::value::Value)s through the context exception sink. These
//! errors cover configuration and runtime-level context management.

use thiserror::Error;

use crate::context::ContextId;

/// Errors that can occur during bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Context configuration could not be parsed
    #[error("Invalid context configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    /// No context with this id is registered
    #[error("Context {0} not found")]
    ContextNotFound(ContextId),

    /// The context was already torn down
    #[error("Context {0} has been disposed")]
    ContextDisposed(ContextId),
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            BridgeError::ContextNotFound(ContextId(3)).to_string(),
            "Context 3 not found"
        );
        assert_eq!(
            BridgeError::ContextDisposed(ContextId(9)).to_string(),
            "Context 9 has been disposed"
        );
    }
}
