//! Address book error types
//!
//! One taxonomy shared by every backend, with transient/permanent
//! classification so callers know what a reconnect can fix.

use thiserror::Error;

use crate::record::Record;

/// Which server-side search limit cut a result set short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// The server stopped after returning the maximum number of entries.
    Size,
    /// The server ran out of time before the search finished.
    Time,
}

impl LimitKind {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Size => "size",
            LimitKind::Time => "time",
        }
    }
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error that can occur during address book operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Connection errors
    /// The directory server cannot be reached.
    #[error("connection unavailable: {message}")]
    ConnectionUnavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Encrypted transport was required but could not be negotiated.
    #[error("TLS unavailable: {message}")]
    TlsUnavailable { message: String },

    /// The address book is in offline mode and the request needs the server.
    #[error("repository offline")]
    RepositoryOffline,

    // Authentication errors
    /// Invalid credentials provided.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// The server refuses anonymous access.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The requested authentication method is not offered.
    #[error("unsupported authentication method: {method}")]
    UnsupportedAuthMethod { method: String },

    /// The bound identity may not perform the operation.
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    // Configuration errors
    /// Backend configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Data errors
    /// The identity has no entry on the server.
    #[error("not found: {identifier}")]
    NotFound { identifier: String },

    /// The identity is already taken on the server.
    #[error("already exists: {identifier}")]
    AlreadyExists { identifier: String },

    /// The query expression failed to parse or compile.
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    /// A search hit a server limit; the entries received before it are kept.
    #[error("search {kind} limit exceeded after {} results", .partial.len())]
    SearchLimitExceeded { kind: LimitKind, partial: Vec<Record> },

    /// The record cannot be expressed on the server (e.g. an empty list).
    #[error("structural error: {message}")]
    StructuralError { message: String },

    // Protocol errors
    /// Any other result code reported by the server.
    #[error("protocol error {code}: {message}")]
    ProtocolError { code: u32, message: String },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    // Internal errors
    /// Internal error.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConnectorError {
    /// Check if this error is transient and a reconnect may fix it.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::ConnectionUnavailable { .. })
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionUnavailable { .. } => "CONNECTION_UNAVAILABLE",
            ConnectorError::TlsUnavailable { .. } => "TLS_UNAVAILABLE",
            ConnectorError::RepositoryOffline => "REPOSITORY_OFFLINE",
            ConnectorError::AuthenticationFailed => "AUTH_FAILED",
            ConnectorError::AuthenticationRequired => "AUTH_REQUIRED",
            ConnectorError::UnsupportedAuthMethod { .. } => "UNSUPPORTED_AUTH_METHOD",
            ConnectorError::PermissionDenied { .. } => "PERMISSION_DENIED",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::NotFound { .. } => "NOT_FOUND",
            ConnectorError::AlreadyExists { .. } => "ALREADY_EXISTS",
            ConnectorError::InvalidQuery { .. } => "INVALID_QUERY",
            ConnectorError::SearchLimitExceeded {
                kind: LimitKind::Size,
                ..
            } => "SIZE_LIMIT_EXCEEDED",
            ConnectorError::SearchLimitExceeded {
                kind: LimitKind::Time,
                ..
            } => "TIME_LIMIT_EXCEEDED",
            ConnectorError::StructuralError { .. } => "STRUCTURAL_ERROR",
            ConnectorError::ProtocolError { .. } => "PROTOCOL_ERROR",
            ConnectorError::Cancelled => "CANCELLED",
            ConnectorError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Records delivered before the error, if the error carries any.
    pub fn partial_results(&self) -> &[Record] {
        match self {
            ConnectorError::SearchLimitExceeded { partial, .. } => partial,
            _ => &[],
        }
    }

    // Convenience constructors

    /// Create a connection unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection unavailable error with source.
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::ConnectionUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        ConnectorError::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a structural error.
    pub fn structural(message: impl Into<String>) -> Self {
        ConnectorError::StructuralError {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        ConnectorError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ConnectorError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with source.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for address book operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let err = ConnectorError::unavailable("server down");
        assert!(err.is_transient());
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_permanent_errors() {
        let permanent_errors = vec![
            ConnectorError::AuthenticationFailed,
            ConnectorError::AuthenticationRequired,
            ConnectorError::TlsUnavailable {
                message: "no StartTLS".to_string(),
            },
            ConnectorError::NotFound {
                identifier: "uid=x,dc=example".to_string(),
            },
            ConnectorError::structural("empty list"),
            ConnectorError::ProtocolError {
                code: 53,
                message: "unwilling".to_string(),
            },
            ConnectorError::Cancelled,
        ];

        for err in permanent_errors {
            assert!(
                err.is_permanent(),
                "Expected {} to be permanent",
                err.error_code()
            );
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ConnectorError::AuthenticationFailed.error_code(),
            "AUTH_FAILED"
        );
        assert_eq!(
            ConnectorError::SearchLimitExceeded {
                kind: LimitKind::Time,
                partial: vec![],
            }
            .error_code(),
            "TIME_LIMIT_EXCEEDED"
        );
        assert_eq!(
            ConnectorError::invalid_query("x").error_code(),
            "INVALID_QUERY"
        );
    }

    #[test]
    fn test_error_display() {
        let err = ConnectorError::ProtocolError {
            code: 80,
            message: "other".to_string(),
        };
        assert_eq!(err.to_string(), "protocol error 80: other");

        let err = ConnectorError::SearchLimitExceeded {
            kind: LimitKind::Size,
            partial: vec![Record::contact(), Record::contact()],
        };
        assert_eq!(err.to_string(), "search size limit exceeded after 2 results");
        assert_eq!(err.partial_results().len(), 2);
    }

    #[test]
    fn test_error_with_source() {
        let source_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ConnectorError::unavailable_with_source("connect failed", source_err);

        assert!(err.is_transient());
        if let ConnectorError::ConnectionUnavailable { source, .. } = &err {
            assert!(source.is_some());
        } else {
            panic!("Expected ConnectionUnavailable variant");
        }
    }
}
