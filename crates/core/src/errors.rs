//! Error types for the adusers core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed {
        version: u32,
        detail: String,
    },

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    HashError(#[from] bcrypt::BcryptError),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DatabaseError {
    /// Whether SQLite rejected the statement on a UNIQUE, CHECK or NOT NULL
    /// constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::SqliteError(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Native error object reported by a user/option store.
///
/// Carries a machine-readable `code` (e.g. `existing_user_login`) and one or
/// more human-readable messages. The repository logs it, and depending on the
/// operation either returns it to the caller or wraps it in a
/// [`RepositoryError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {}", .messages.join("; "))]
pub struct StoreError {
    pub code: String,
    pub messages: Vec<String>,
}

impl StoreError {
    pub const EXISTING_USER_LOGIN: &'static str = "existing_user_login";
    pub const EXISTING_USER_EMAIL: &'static str = "existing_user_email";
    pub const EMPTY_USER_LOGIN: &'static str = "empty_user_login";
    pub const INVALID_USER_ID: &'static str = "invalid_user_id";
    pub const INVALID_FIELD: &'static str = "invalid_field";
    pub const DB_ERROR: &'static str = "db_error";

    /// Build an error with a single message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            messages: vec![message.into()],
        }
    }

    /// All messages attached to this error.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::new(StoreError::DB_ERROR, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Repository errors
// ---------------------------------------------------------------------------

/// Errors raised by the identity repository.
///
/// Only user creation escalates store failures into this type; updates return
/// the bare [`StoreError`] as a value.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The store refused to create the user (duplicate login, invalid data).
    #[error("can not create user '{login}': {source}")]
    CreateUser {
        login: String,
        #[source]
        source: StoreError,
    },
}
