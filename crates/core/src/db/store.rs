//! [`UserStore`] and [`OptionStore`] on top of the SQLite [`Database`].

use tracing::{debug, info};

use super::queries::{delete_options_with_prefix, select_options_with_prefix};
use super::Database;
use crate::errors::{DatabaseError, StoreError};
use crate::models::{
    MetaQuery, MetaUpdate, OptionRow, TenantId, UserId, UserLookup, UserMeta, UserRecord,
    UserUpdate,
};
use crate::store::{check_extra_fields, check_login, OptionStore, UserStore};

fn invalid_user(user_id: UserId) -> StoreError {
    StoreError::new(
        StoreError::INVALID_USER_ID,
        format!("Invalid user ID {}.", user_id),
    )
}

fn existing_email() -> StoreError {
    StoreError::new(
        StoreError::EXISTING_USER_EMAIL,
        "Sorry, that email address is already used!",
    )
}

fn existing_login() -> StoreError {
    StoreError::new(
        StoreError::EXISTING_USER_LOGIN,
        "Sorry, that username already exists!",
    )
}

impl Database {
    fn user_exists(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.get_user(&UserLookup::Id(user_id))?.is_some())
    }
}

impl UserStore for Database {
    fn find_by(&self, lookup: &UserLookup) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.get_user(lookup)?)
    }

    fn find_by_meta(&self, query: &MetaQuery) -> Result<Vec<UserRecord>, StoreError> {
        Ok(self.list_users_by_meta(query)?)
    }

    fn user_meta(&self, user_id: UserId) -> Result<UserMeta, StoreError> {
        Ok(self.list_user_meta(user_id)?)
    }

    fn update_user_meta(
        &self,
        user_id: UserId,
        key: &str,
        value: &str,
    ) -> Result<MetaUpdate, StoreError> {
        if !self.user_exists(user_id)? {
            return Err(invalid_user(user_id));
        }
        Ok(self.upsert_user_meta(user_id, key, value)?)
    }

    fn create_user(&self, login: &str, password: &str) -> Result<UserId, StoreError> {
        check_login(login)?;
        if self.get_user(&UserLookup::Login(login.to_string()))?.is_some() {
            return Err(existing_login());
        }

        match self.insert_user(login, password) {
            Ok(id) => Ok(id),
            // Lost a race against another writer for the same login.
            Err(e) if e.is_constraint_violation() => Err(existing_login()),
            Err(e) => Err(e.into()),
        }
    }

    fn update_user(&self, update: &UserUpdate) -> Result<UserId, StoreError> {
        check_extra_fields(update)?;
        if !self.user_exists(update.id)? {
            return Err(invalid_user(update.id));
        }
        if let Some(ref email) = update.email {
            if self.is_email_taken(email, Some(update.id))? {
                return Err(existing_email());
            }
        }

        match self.apply_user_update(update) {
            Ok(()) => Ok(update.id),
            // Another writer took the email after the check above.
            Err(e) if e.is_constraint_violation() => Err(existing_email()),
            Err(e) => Err(e.into()),
        }
    }
}

impl OptionStore for Database {
    fn partitions(&self) -> Result<Vec<TenantId>, StoreError> {
        Ok(self.list_tenants()?)
    }

    fn options_with_prefix(
        &self,
        partition: &str,
        prefix: &str,
    ) -> Result<Vec<OptionRow>, StoreError> {
        let conn = self.conn();
        Ok(select_options_with_prefix(&conn, partition, prefix)?)
    }

    fn delete_options_with_prefix(
        &self,
        partition: &str,
        prefix: &str,
    ) -> Result<usize, StoreError> {
        let conn = self.conn();
        Ok(delete_options_with_prefix(&conn, partition, prefix)?)
    }

    /// Select and delete every prefix of one partition in a single
    /// transaction, so the returned rows are exactly the rows removed.
    fn purge_prefixes(
        &self,
        partition: &str,
        prefixes: &[String],
    ) -> Result<Vec<OptionRow>, StoreError> {
        let removed = self.transaction(|conn| -> Result<Vec<OptionRow>, DatabaseError> {
            let mut removed = Vec::new();
            for prefix in prefixes {
                let rows = select_options_with_prefix(conn, partition, prefix)?;
                let deleted = delete_options_with_prefix(conn, partition, prefix)?;
                debug!(partition, prefix = %prefix, deleted, "purged option prefix");
                removed.extend(rows);
            }
            Ok(removed)
        })?;
        info!(partition, rows = removed.len(), "purged partition options");
        Ok(removed)
    }
}
