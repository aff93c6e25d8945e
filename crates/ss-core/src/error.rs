//! Error types for separation processing

use thiserror::Error;

/// Separation error types
#[derive(Error, Debug)]
pub enum SepError {
    /// Tensor has the wrong rank or is too short along an axis
    #[error("Invalid shape: expected {expected}, got {got}")]
    InvalidShape { expected: String, got: String },

    /// Two tensors disagree on a shared dimension
    #[error("Shape mismatch on {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Non-positive size, unknown choice name, inconsistent layer lists
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Processing failed (FFT backend etc.)
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SepError {
    /// Build an `InvalidShape` from anything printable
    pub fn invalid_shape(expected: impl Into<String>, got: impl std::fmt::Debug) -> Self {
        SepError::InvalidShape {
            expected: expected.into(),
            got: format!("{:?}", got),
        }
    }

    /// Build an `InvalidConfiguration`
    pub fn config(msg: impl Into<String>) -> Self {
        SepError::InvalidConfiguration(msg.into())
    }
}

/// Result type for separation operations
pub type SepResult<T> = Result<T, SepError>;

/// Fail with `InvalidConfiguration` when `value` is zero.
pub fn ensure_positive(name: &str, value: usize) -> SepResult<()> {
    if value == 0 {
        return Err(SepError::config(format!("`{}` must be positive, got 0", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_positive() {
        assert!(ensure_positive("hop_size", 1).is_ok());
        let err = ensure_positive("hop_size", 0).unwrap_err();
        assert!(matches!(err, SepError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("hop_size"));
    }

    #[test]
    fn test_shape_messages() {
        let err = SepError::invalid_shape("rank 3", [2, 3]);
        assert_eq!(err.to_string(), "Invalid shape: expected rank 3, got [2, 3]");

        let err = SepError::ShapeMismatch {
            what: "embedding dimension",
            expected: 20,
            got: 16,
        };
        assert!(err.to_string().contains("embedding dimension"));
    }
}
