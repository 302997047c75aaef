//! Error types and result definitions

use thiserror::Error;

/// Result type alias for hybrid query operations
pub type Result<T> = std::result::Result<T, HybridError>;

/// Main error type for the hybrid query engine
#[derive(Error, Debug)]
pub enum HybridError {
    /// Malformed graph-pattern or DSL text, rejected before any I/O
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A DSL label could not be turned into a graph pattern
    #[error("Unresolved label: {0}")]
    UnresolvedLabel(String),

    /// A DSL connective has no entry in the connective mapping
    #[error("Unknown connective: {0}")]
    UnknownConnective(String),

    /// No virtualized table is registered under this name
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// A virtualized table with this name is already registered
    #[error("Duplicate table: {0}")]
    DuplicateTable(String),

    /// Declared and observed datatypes disagree
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// The backend cannot express a pushed-down predicate natively
    #[error("Unsupported predicate: {0}")]
    UnsupportedPredicate(String),

    /// Registered column names are missing from the backend schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Connection or authentication failure against a backend
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A backend read exceeded its configured timeout
    #[error("Backend timeout: {0}")]
    BackendTimeout(String),

    /// The triple store rejected or failed a request
    #[error("Triple store error: {0}")]
    TripleStore(String),

    /// The query was cancelled by its caller
    #[error("Query cancelled")]
    Cancelled,

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Umbrella error surfaced for any failed hybrid query
    #[error("Hybrid query failed: {cause}")]
    HybridQueryFailed {
        /// The failure that aborted the query
        cause: Box<HybridError>,
    },
}

impl HybridError {
    /// Wraps this error in `HybridQueryFailed` unless it already is one.
    pub fn into_query_failure(self) -> Self {
        match self {
            failed @ HybridError::HybridQueryFailed { .. } => failed,
            other => HybridError::HybridQueryFailed { cause: Box::new(other) },
        }
    }

    /// The innermost error below any `HybridQueryFailed` wrappers.
    pub fn root_cause(&self) -> &HybridError {
        let mut current = self;
        while let HybridError::HybridQueryFailed { cause } = current {
            current = cause;
        }
        current
    }

    /// Whether this failure comes from backend I/O.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self.root_cause(),
            HybridError::BackendUnavailable(_) | HybridError::BackendTimeout(_)
        )
    }
}

impl From<std::io::Error> for HybridError {
    fn from(err: std::io::Error) -> Self {
        HybridError::BackendUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for HybridError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HybridError::BackendTimeout(err.to_string())
        } else {
            HybridError::BackendUnavailable(err.to_string())
        }
    }
}

impl From<arrow::error::ArrowError> for HybridError {
    fn from(err: arrow::error::ArrowError) -> Self {
        HybridError::SchemaMismatch(err.to_string())
    }
}

impl From<bincode::Error> for HybridError {
    fn from(err: bincode::Error) -> Self {
        HybridError::BackendUnavailable(format!("malformed historian frame: {}", err))
    }
}

impl From<serde_json::Error> for HybridError {
    fn from(err: serde_json::Error) -> Self {
        HybridError::Config(err.to_string())
    }
}

impl From<regex::Error> for HybridError {
    fn from(err: regex::Error) -> Self {
        HybridError::Config(format!("invalid token rule: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HybridError::UnknownConnective("..".to_string());
        assert_eq!(format!("{}", err), "Unknown connective: ..");
    }

    #[test]
    fn test_query_failure_wraps_once() {
        let err = HybridError::BackendTimeout("historian".to_string())
            .into_query_failure()
            .into_query_failure();
        assert!(matches!(err.root_cause(), HybridError::BackendTimeout(_)));
        match err {
            HybridError::HybridQueryFailed { cause } => {
                assert!(matches!(*cause, HybridError::BackendTimeout(_)));
            }
            other => panic!("expected HybridQueryFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_backend_failure_classification() {
        assert!(HybridError::BackendUnavailable("x".into()).into_query_failure().is_backend_failure());
        assert!(!HybridError::ParseError("x".into()).is_backend_failure());
    }
}
