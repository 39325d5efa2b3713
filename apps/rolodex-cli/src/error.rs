//! CLI error types and exit codes

use rolodex_connector::error::ConnectorError;
use thiserror::Error;

/// Exit codes for the CLI
/// - 0: Success
/// - 1: General error
/// - 2: Authentication required or failed
/// - 3: Directory unreachable
/// - 4: Invalid input
/// - 5: Server error
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("No directory given. Pass --url or set ROLODEX_LDAP_URL, or use --demo.")]
    NoDirectory,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::NoDirectory | CliError::Validation(_) => 4,
            CliError::Output(_) => 1,
            CliError::Connector(e) => match e {
                ConnectorError::AuthenticationFailed
                | ConnectorError::AuthenticationRequired
                | ConnectorError::UnsupportedAuthMethod { .. }
                | ConnectorError::PermissionDenied { .. } => 2,
                ConnectorError::ConnectionUnavailable { .. }
                | ConnectorError::TlsUnavailable { .. }
                | ConnectorError::RepositoryOffline => 3,
                ConnectorError::InvalidConfiguration { .. }
                | ConnectorError::InvalidQuery { .. }
                | ConnectorError::NotFound { .. }
                | ConnectorError::AlreadyExists { .. }
                | ConnectorError::StructuralError { .. } => 4,
                ConnectorError::SearchLimitExceeded { .. } | ConnectorError::ProtocolError { .. } => {
                    5
                }
                ConnectorError::Cancelled | ConnectorError::Internal { .. } => 1,
            },
        }
    }

    /// Print the error to stderr with appropriate formatting
    pub fn print(&self) {
        let use_color = std::env::var("NO_COLOR").is_err();

        if use_color {
            eprintln!("\x1b[31mError:\x1b[0m {self}");
        } else {
            eprintln!("Error: {self}");
        }

        if let Some(suggestion) = self.suggestion() {
            if use_color {
                eprintln!("\n\x1b[33mSuggestion:\x1b[0m {suggestion}");
            } else {
                eprintln!("\nSuggestion: {suggestion}");
            }
        }
    }

    fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::Connector(ConnectorError::ConnectionUnavailable { .. }) => {
                Some("Check the host and port in the URL and that the server is running.")
            }
            CliError::Connector(ConnectorError::TlsUnavailable { .. }) => {
                Some("Use --tls when_possible to fall back to an unencrypted connection.")
            }
            CliError::Connector(ConnectorError::AuthenticationRequired) => {
                Some("Pass --bind-dn and --password.")
            }
            CliError::Connector(ConnectorError::SearchLimitExceeded { .. }) => {
                Some("Narrow the query or raise --size-limit.")
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Output(format!("JSON error: {e}"))
    }
}
