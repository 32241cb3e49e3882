//! Unified error types for kiln

use thiserror::Error;

/// Unified error type for all kiln operations
#[derive(Error, Debug)]
pub enum KilnError {
    // Caller errors
    #[error("Invalid input: {0}")]
    UserInput(String),

    // Safety gate
    #[error("Safety violation: {0}")]
    SafetyViolation(String),

    // Step execution
    #[error("{}", format_execution(.message, .exit_code))]
    Execution {
        message: String,
        exit_code: Option<i32>,
    },

    // Language model
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Task cancelled: {0}")]
    Cancelled(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

fn format_execution(message: &str, exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("Execution failed (exit code {}): {}", code, message),
        None => format!("Execution failed: {}", message),
    }
}

impl KilnError {
    /// Step-level failure without an exit code
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            exit_code: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Language model failures, kept distinguishable so callers can tell an
/// unreachable endpoint from a missing model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("cannot reach provider at {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type alias using KilnError
pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_message_includes_exit_code() {
        let err = KilnError::Execution {
            message: "boom".to_string(),
            exit_code: Some(2),
        };
        assert_eq!(err.to_string(), "Execution failed (exit code 2): boom");
        assert_eq!(KilnError::execution("io").to_string(), "Execution failed: io");
    }

    #[test]
    fn test_provider_errors_are_distinguishable() {
        let err: KilnError = ProviderError::ModelNotFound("llama3".to_string()).into();
        assert!(matches!(
            err,
            KilnError::Provider(ProviderError::ModelNotFound(_))
        ));
        assert!(!err.is_cancelled());
    }
}
