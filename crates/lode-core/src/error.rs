use thiserror::Error;

/// Top-level error type for the lode retrieval system.
///
/// Provider failures are isolated per item by the pipelines that call them;
/// only the structural variants (`Corruption`, `CorruptStore`, `Validation`,
/// `Config`) are expected to reach the top level.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LodeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// An embedding or distillation call failed.
    #[error("Provider error: {message}")]
    Provider { message: String, transient: bool },

    #[error("Timed out after {secs}s waiting for {operation}")]
    Timeout { operation: String, secs: u64 },

    /// A vector does not match the dimension already fixed by the index.
    #[error("Dimension mismatch: index holds {expected}-d vectors, got {actual}-d")]
    Corruption { expected: usize, actual: usize },

    /// The on-disk index/mapping pair cannot be reconciled.
    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LodeError {
    /// Shorthand for a provider failure that should never be retried.
    pub fn provider(message: impl Into<String>) -> Self {
        LodeError::Provider {
            message: message.into(),
            transient: false,
        }
    }

    /// Shorthand for a provider failure that may succeed on a later attempt.
    pub fn transient(message: impl Into<String>) -> Self {
        LodeError::Provider {
            message: message.into(),
            transient: true,
        }
    }

    /// Returns true for conditions that must abort an ingestion run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LodeError::Corruption { .. } | LodeError::CorruptStore(_))
    }

    /// Returns true for failures a retry could plausibly fix.
    pub fn is_transient(&self) -> bool {
        match self {
            LodeError::Provider { transient, .. } => *transient,
            LodeError::Timeout { .. } => true,
            _ => false,
        }
    }
}

impl From<toml::de::Error> for LodeError {
    fn from(err: toml::de::Error) -> Self {
        LodeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for LodeError {
    fn from(err: toml::ser::Error) -> Self {
        LodeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LodeError {
    fn from(err: serde_json::Error) -> Self {
        LodeError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for LodeError {
    fn from(err: bincode::Error) -> Self {
        LodeError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for LodeError {
    fn from(err: csv::Error) -> Self {
        LodeError::Storage(format!("error log: {}", err))
    }
}

/// A specialized `Result` type for lode operations.
pub type Result<T> = std::result::Result<T, LodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LodeError::Corruption {
            expected: 3072,
            actual: 1536,
        };
        assert_eq!(
            err.to_string(),
            "Dimension mismatch: index holds 3072-d vectors, got 1536-d"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = LodeError::Timeout {
            operation: "embedding".to_string(),
            secs: 30,
        };
        assert_eq!(err.to_string(), "Timed out after 30s waiting for embedding");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(LodeError::Corruption {
            expected: 2,
            actual: 3
        }
        .is_fatal());
        assert!(LodeError::CorruptStore("x".into()).is_fatal());
        assert!(!LodeError::provider("bad input").is_fatal());
        assert!(!LodeError::Validation("k".into()).is_fatal());
    }

    #[test]
    fn test_transient_classification() {
        assert!(LodeError::transient("503").is_transient());
        assert!(!LodeError::provider("400").is_transient());
        assert!(LodeError::Timeout {
            operation: "distill".into(),
            secs: 5
        }
        .is_transient());
        assert!(!LodeError::Validation("k".into()).is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LodeError = io_err.into();
        assert!(matches!(err, LodeError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let lode_err: LodeError = err.unwrap_err().into();
        assert!(matches!(lode_err, LodeError::Serialization(_)));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let lode_err: LodeError = err.unwrap_err().into();
        assert!(matches!(lode_err, LodeError::Config(_)));
    }
}
