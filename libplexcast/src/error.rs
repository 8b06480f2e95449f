//! Error types for Plexcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlexcastError>;

#[derive(Error, Debug)]
pub enum PlexcastError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Duplicate connection: {0}")]
    DuplicateConnection(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),
}

impl PlexcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PlexcastError::Validation(_)
            | PlexcastError::Permission(_)
            | PlexcastError::InvalidState(_)
            | PlexcastError::NotFound(_)
            | PlexcastError::DuplicateConnection(_) => 3,
            PlexcastError::Config(_) | PlexcastError::Database(_) => 2,
            PlexcastError::Connection(_) | PlexcastError::Publish(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },
}

/// Failure reported by a platform publisher.
///
/// The variant decides how the scheduler reacts: transient kinds go through
/// backoff, everything else fails the queue item on the spot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Content rejected: {0}")]
    ContentRejected(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Platform server error: {0}")]
    Server(String),

    /// The platform may have accepted the post but did not confirm it
    #[error("Delivery unconfirmed: {0}")]
    Unconfirmed(String),

    /// Local storage failed before the publisher was called
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PublishError {
    /// Transient failures that are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublishError::Network(_)
                | PublishError::RateLimit(_)
                | PublishError::Timeout(_)
                | PublishError::Server(_)
                | PublishError::Storage(_)
        )
    }

    /// Failures caused by expired or invalid credentials
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, PublishError::Authentication(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_validation() {
        let error = PlexcastError::Validation("Content cannot be empty".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_state_and_permission() {
        assert_eq!(PlexcastError::Permission("x".into()).exit_code(), 3);
        assert_eq!(PlexcastError::InvalidState("x".into()).exit_code(), 3);
        assert_eq!(PlexcastError::DuplicateConnection("x".into()).exit_code(), 3);
    }

    #[test]
    fn test_exit_code_config_and_database() {
        let config_error = ConfigError::MissingField("database.path".to_string());
        assert_eq!(PlexcastError::Config(config_error).exit_code(), 2);

        let db_error = DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));
        assert_eq!(PlexcastError::Database(db_error).exit_code(), 2);
    }

    #[test]
    fn test_exit_code_publish() {
        let error = PlexcastError::Publish(PublishError::Network("reset".to_string()));
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_error_message_formatting() {
        let error = PlexcastError::Publish(PublishError::RateLimit("Too many requests".into()));
        assert_eq!(
            error.to_string(),
            "Publish error: Rate limit exceeded: Too many requests"
        );

        let error = PlexcastError::Validation("Target platforms cannot be empty".into());
        assert_eq!(
            error.to_string(),
            "Validation error: Target platforms cannot be empty"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PublishError::Network("x".into()).is_retryable());
        assert!(PublishError::RateLimit("x".into()).is_retryable());
        assert!(PublishError::Timeout("x".into()).is_retryable());
        assert!(PublishError::Server("502".into()).is_retryable());
        assert!(PublishError::Storage("database is locked".into()).is_retryable());

        assert!(!PublishError::Authentication("x".into()).is_retryable());
        assert!(!PublishError::PermissionDenied("x".into()).is_retryable());
        assert!(!PublishError::ContentRejected("x".into()).is_retryable());
        assert!(!PublishError::NotSupported("x".into()).is_retryable());
        assert!(!PublishError::Unconfirmed("no receipt".into()).is_retryable());
    }

    #[test]
    fn test_credential_failure_classification() {
        assert!(PublishError::Authentication("token expired".into()).is_credential_failure());
        assert!(!PublishError::PermissionDenied("scope".into()).is_credential_failure());
        assert!(!PublishError::Network("x".into()).is_credential_failure());
    }

    #[test]
    fn test_error_conversion_from_publish_error() {
        let plexcast_error: PlexcastError = PublishError::Timeout("30s".into()).into();
        match plexcast_error {
            PlexcastError::Publish(PublishError::Timeout(_)) => {}
            _ => panic!("Expected PlexcastError::Publish"),
        }
    }

    #[test]
    fn test_publish_error_clone() {
        // Cloned into queue items as last_error bookkeeping
        let original = PublishError::Network("Connection failed".to_string());
        let cloned = original.clone();
        assert_eq!(original, cloned);
    }
}
