use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultShiftError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into VaultShiftError automatically

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid version format '{input}': {reason}")]
    InvalidVersionFormat { input: String, reason: String },

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}

/// Failure reported by a file or state store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("'{0}' was not found")]
    NotFound(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(path.into())
        } else {
            StoreError::Io {
                path: path.into(),
                source,
            }
        }
    }
}

/// Failure of a single upgrade operation.
///
/// Never escapes the operation boundary: the upgrade manager records it as a
/// failed operation result and moves on to the next operation.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("{message}")]
    Execution { message: String, detail: String },

    /// A field that had content before the operation ran came back empty.
    #[error("Critical data loss: {message}")]
    CriticalDataLoss { message: String },
}

impl OperationError {
    pub fn execution(message: impl Into<String>) -> Self {
        OperationError::Execution {
            message: message.into(),
            detail: String::new(),
        }
    }

    pub fn with_detail(message: impl Into<String>, detail: impl Into<String>) -> Self {
        OperationError::Execution {
            message: message.into(),
            detail: detail.into(),
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, OperationError::CriticalDataLoss { .. })
    }
}

impl From<StoreError> for OperationError {
    fn from(err: StoreError) -> Self {
        OperationError::with_detail("File store failure", format!("{err:?}"))
    }
}

impl From<VaultShiftError> for OperationError {
    fn from(err: VaultShiftError) -> Self {
        OperationError::with_detail(err.to_string(), format!("{err:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_io_maps_not_found() {
        let err = StoreError::io("a/b.md", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, StoreError::NotFound(ref p) if p == "a/b.md"));

        let err = StoreError::io("a/b.md", io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn test_operation_error_conversions() {
        let err: OperationError = StoreError::Other("disk full".into()).into();
        match err {
            OperationError::Execution { message, detail } => {
                assert_eq!(message, "File store failure");
                assert!(detail.contains("disk full"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let critical = OperationError::CriticalDataLoss {
            message: "settings emptied".into(),
        };
        assert!(critical.is_critical());
        assert_eq!(critical.to_string(), "Critical data loss: settings emptied");
    }
}
