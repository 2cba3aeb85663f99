//! Store boundary used by the identity repository and the uninstall sweeper.
//!
//! Two backends ship with the crate: [`crate::db::Database`] (SQLite) and
//! [`MemoryStore`] (in-process, used by tests and embedders). Anything else that
//! can answer these calls can be injected instead.

pub mod memory;

pub use memory::MemoryStore;

use crate::errors::StoreError;
use crate::models::{
    MetaQuery, MetaUpdate, OptionRow, TenantId, UserId, UserLookup, UserMeta, UserRecord,
    UserUpdate, EXTRA_USER_FIELDS,
};

/// Persistence primitives for user records and their metadata.
#[cfg_attr(test, mockall::automock)]
pub trait UserStore {
    /// Fetch a single user by id, login or email.
    fn find_by(&self, lookup: &UserLookup) -> Result<Option<UserRecord>, StoreError>;

    /// All users carrying the metadata key (and value, when given), ordered
    /// by ascending user id.
    fn find_by_meta(&self, query: &MetaQuery) -> Result<Vec<UserRecord>, StoreError>;

    /// All metadata of a user. Unknown users yield an empty map.
    fn user_meta(&self, user_id: UserId) -> Result<UserMeta, StoreError>;

    /// Replace every value of `key` for the user with `value`, adding the key
    /// if it is missing.
    fn update_user_meta(
        &self,
        user_id: UserId,
        key: &str,
        value: &str,
    ) -> Result<MetaUpdate, StoreError>;

    /// Create a user with the given login and plaintext password.
    fn create_user(&self, login: &str, password: &str) -> Result<UserId, StoreError>;

    /// Apply a partial update to an existing user.
    fn update_user(&self, update: &UserUpdate) -> Result<UserId, StoreError>;
}

/// Per-tenant key-value option table.
#[cfg_attr(test, mockall::automock)]
pub trait OptionStore {
    /// Every tenant partition known to the store.
    fn partitions(&self) -> Result<Vec<TenantId>, StoreError>;

    /// Rows whose name starts with `prefix` (literal match), ordered by name.
    fn options_with_prefix(
        &self,
        partition: &str,
        prefix: &str,
    ) -> Result<Vec<OptionRow>, StoreError>;

    /// Delete rows whose name starts with `prefix`; returns the count removed.
    fn delete_options_with_prefix(&self, partition: &str, prefix: &str)
        -> Result<usize, StoreError>;

    /// Select then delete every row matching any of `prefixes` and return the
    /// removed rows.
    ///
    /// The default implementation is not atomic: a concurrent writer between
    /// the select and the delete of a prefix can leave rows out of the
    /// returned backup. Stores with transactions should override it.
    fn purge_prefixes(
        &self,
        partition: &str,
        prefixes: &[String],
    ) -> Result<Vec<OptionRow>, StoreError> {
        let mut removed = Vec::new();
        for prefix in prefixes {
            removed.extend(self.options_with_prefix(partition, prefix)?);
            self.delete_options_with_prefix(partition, prefix)?;
        }
        Ok(removed)
    }
}

impl<T: UserStore + ?Sized> UserStore for &T {
    fn find_by(&self, lookup: &UserLookup) -> Result<Option<UserRecord>, StoreError> {
        (**self).find_by(lookup)
    }

    fn find_by_meta(&self, query: &MetaQuery) -> Result<Vec<UserRecord>, StoreError> {
        (**self).find_by_meta(query)
    }

    fn user_meta(&self, user_id: UserId) -> Result<UserMeta, StoreError> {
        (**self).user_meta(user_id)
    }

    fn update_user_meta(
        &self,
        user_id: UserId,
        key: &str,
        value: &str,
    ) -> Result<MetaUpdate, StoreError> {
        (**self).update_user_meta(user_id, key, value)
    }

    fn create_user(&self, login: &str, password: &str) -> Result<UserId, StoreError> {
        (**self).create_user(login, password)
    }

    fn update_user(&self, update: &UserUpdate) -> Result<UserId, StoreError> {
        (**self).update_user(update)
    }
}

impl<T: OptionStore + ?Sized> OptionStore for &T {
    fn partitions(&self) -> Result<Vec<TenantId>, StoreError> {
        (**self).partitions()
    }

    fn options_with_prefix(
        &self,
        partition: &str,
        prefix: &str,
    ) -> Result<Vec<OptionRow>, StoreError> {
        (**self).options_with_prefix(partition, prefix)
    }

    fn delete_options_with_prefix(
        &self,
        partition: &str,
        prefix: &str,
    ) -> Result<usize, StoreError> {
        (**self).delete_options_with_prefix(partition, prefix)
    }

    fn purge_prefixes(
        &self,
        partition: &str,
        prefixes: &[String],
    ) -> Result<Vec<OptionRow>, StoreError> {
        (**self).purge_prefixes(partition, prefixes)
    }
}

/// Reject `extra` keys the profile update path does not know.
pub(crate) fn check_extra_fields(update: &UserUpdate) -> Result<(), StoreError> {
    match update
        .extra
        .keys()
        .find(|key| !EXTRA_USER_FIELDS.contains(&key.as_str()))
    {
        Some(key) => Err(StoreError::new(
            StoreError::INVALID_FIELD,
            format!("unknown user field '{}'", key),
        )),
        None => Ok(()),
    }
}

/// Reject empty logins the way user creation does.
pub(crate) fn check_login(login: &str) -> Result<(), StoreError> {
    if login.trim().is_empty() {
        return Err(StoreError::new(
            StoreError::EMPTY_USER_LOGIN,
            "Cannot create a user with an empty login name.",
        ));
    }
    Ok(())
}
