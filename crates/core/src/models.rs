//! Domain types shared across the repository, the stores, and the CLI.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric identifier of a local user record.
pub type UserId = i64;

/// Identifier of a tenant partition (one per site in a multi-site install).
pub type TenantId = String;

/// Partition used by single-site deployments.
pub const DEFAULT_TENANT: &str = "main";

/// All metadata of a user: key -> one or many values.
pub type UserMeta = BTreeMap<String, Vec<String>>;

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A local user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: UserId,
    pub login: String,
    pub email: String,
    /// bcrypt hash of the password; never the plaintext.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub registered_at: DateTime<Utc>,
}

/// Login name and plaintext password as received from the directory.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// A directory account on its way into (or already mirrored in) the local
/// store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    /// Local user id once the account has been provisioned.
    pub id: Option<UserId>,
    pub login: String,
    pub credentials: Credentials,
}

impl DirectoryUser {
    /// A not-yet-provisioned user.
    pub fn pending(credentials: Credentials) -> Self {
        Self {
            id: None,
            login: credentials.login.clone(),
            credentials,
        }
    }

    /// A user already linked to the local record `id`.
    pub fn existing(id: UserId, credentials: Credentials) -> Self {
        Self {
            id: Some(id),
            ..Self::pending(credentials)
        }
    }
}

/// Column used by [`UserLookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Id(UserId),
    Login(String),
    Email(String),
}

impl UserLookup {
    /// Name of the field being matched (`id`, `login`, `email`).
    pub fn field(&self) -> &'static str {
        match self {
            UserLookup::Id(_) => "id",
            UserLookup::Login(_) => "login",
            UserLookup::Email(_) => "email",
        }
    }
}

/// The value being matched: the numeric id, the login or the email.
impl fmt::Display for UserLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserLookup::Id(id) => write!(f, "{}", id),
            UserLookup::Login(value) | UserLookup::Email(value) => f.write_str(value),
        }
    }
}

/// Filter for [`crate::store::UserStore::find_by_meta`]. A `None` value
/// matches every user that has the key at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaQuery {
    pub key: String,
    pub value: Option<String>,
}

/// Fields accepted by the profile update path besides email, password and
/// display name.
pub const EXTRA_USER_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "nickname",
    "description",
    "user_url",
];

/// Structured update of a user record.
///
/// Only the fields that are `Some` (or present in `extra`) are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub id: UserId,
    pub email: Option<String>,
    pub password: Option<String>,
    pub display_name: Option<String>,
    /// Forward-compatible profile fields; see [`EXTRA_USER_FIELDS`].
    pub extra: BTreeMap<String, String>,
}

impl UserUpdate {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// True when no field besides the id is set.
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.password.is_none()
            && self.display_name.is_none()
            && self.extra.is_empty()
    }
}

/// Outcome of writing a single metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaUpdate {
    /// The key did not exist and a row was added.
    Added(i64),
    /// An existing value was replaced.
    Updated,
    /// The stored value already equals the new one.
    Unchanged,
    /// The store reported an error (already logged).
    Failed,
}

impl MetaUpdate {
    pub fn is_success(&self) -> bool {
        matches!(self, MetaUpdate::Added(_) | MetaUpdate::Updated)
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// A configuration row in a tenant's option table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OptionRow {
    pub name: String,
    pub value: String,
}

impl OptionRow {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
