use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::domain::identifier::TicketId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Authentication,
    Api,
    Network,
    Validation,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Api => "api",
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("network error: {message}")]
    Network { message: String, timed_out: bool },
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("unexpected error while {context}: {source}")]
    Unexpected {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Configuration(_) => ErrorKind::Configuration,
            AppError::Authentication { .. } => ErrorKind::Authentication,
            AppError::Api { .. } => ErrorKind::Api,
            AppError::Network { .. } => ErrorKind::Network,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Io(_) | AppError::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }

    /// HTTP status carried by the error, if the remote service answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Authentication { status, .. } | AppError::Api { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn unexpected(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        AppError::Unexpected {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Rewrites remote failures so the caller can tell which backend and
    /// issue they belong to. A 404 becomes an explicit "issue is gone" error.
    pub fn for_issue(self, backend: &str, id: &TicketId) -> Self {
        match self {
            AppError::Api { status: 404, .. } => AppError::Api {
                status: 404,
                message: format!(
                    "{backend} issue {id} was not found; it may have been deleted or moved, \
                     or the configured account cannot see it"
                ),
                retry_after: None,
            },
            AppError::Api {
                status,
                message,
                retry_after,
            } => AppError::Api {
                status,
                message: format!("{backend} issue {id}: {message}"),
                retry_after,
            },
            AppError::Authentication { status, message } => AppError::Authentication {
                status,
                message: format!("{backend} rejected the credentials for issue {id}: {message}"),
            },
            other => other,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_and_wrapped_errors_are_unexpected() {
        let io = AppError::from(io::Error::other("disk"));
        assert_eq!(io.kind(), ErrorKind::Unexpected);

        let wrapped = AppError::unexpected("parsing response", "bad json");
        assert_eq!(wrapped.kind(), ErrorKind::Unexpected);
        assert!(wrapped.to_string().contains("bad json"));
        assert!(wrapped.to_string().contains("parsing response"));
    }

    #[test]
    fn not_found_names_the_issue() {
        let err = AppError::Api {
            status: 404,
            message: "Not Found".to_string(),
            retry_after: None,
        }
        .for_issue("Redmine", &TicketId::new("1234"));

        assert_eq!(err.kind(), ErrorKind::Api);
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("Redmine issue 1234"));
    }

    #[test]
    fn network_errors_pass_through_untouched() {
        let err = AppError::Network {
            message: "connection refused".to_string(),
            timed_out: false,
        }
        .for_issue("Backlog", &TicketId::new("PROJ-1"));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.to_string(), "network error: connection refused");
    }
}
