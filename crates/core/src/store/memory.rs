//! In-memory implementation of the store traits.
//!
//! Mirrors the SQLite store's semantics (unique logins and emails, bcrypt
//! hashed passwords, multi-valued metadata, per-tenant option tables) without
//! touching disk.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::debug;

use super::{check_extra_fields, check_login, OptionStore, UserStore};
use crate::errors::StoreError;
use crate::models::{
    MetaQuery, MetaUpdate, OptionRow, TenantId, UserId, UserLookup, UserMeta, UserRecord,
    UserUpdate, DEFAULT_TENANT,
};

/// Lowest cost bcrypt accepts; keeps the fake fast.
const MEMORY_HASH_COST: u32 = 4;

#[derive(Debug, Clone)]
struct MetaRow {
    user_id: UserId,
    key: String,
    value: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_user_id: UserId,
    next_meta_id: i64,
    users: BTreeMap<UserId, UserRecord>,
    meta: Vec<MetaRow>,
    options: BTreeMap<TenantId, BTreeMap<String, String>>,
}

/// Thread-safe in-memory store holding users, metadata and options.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store with only the default tenant partition.
    pub fn new() -> Self {
        let mut state = MemoryState {
            next_user_id: 1,
            next_meta_id: 1,
            ..Default::default()
        };
        state.options.insert(DEFAULT_TENANT.to_string(), BTreeMap::new());
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("memory store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Register a tenant partition. Existing partitions are left untouched.
    pub fn add_tenant(&self, tenant: &str) {
        self.state().options.entry(tenant.to_string()).or_default();
    }

    /// Insert or replace an option row, creating the partition if needed.
    pub fn set_option(&self, tenant: &str, name: &str, value: &str) {
        self.state()
            .options
            .entry(tenant.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    /// Read a single option value.
    pub fn get_option(&self, tenant: &str, name: &str) -> Option<String> {
        self.state()
            .options
            .get(tenant)
            .and_then(|table| table.get(name).cloned())
    }
}

fn hash_password(password: &str) -> Result<String, StoreError> {
    bcrypt::hash(password, MEMORY_HASH_COST)
        .map_err(|e| StoreError::new(StoreError::DB_ERROR, e.to_string()))
}

fn invalid_user(user_id: UserId) -> StoreError {
    StoreError::new(
        StoreError::INVALID_USER_ID,
        format!("Invalid user ID {}.", user_id),
    )
}

impl MemoryState {
    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        !email.is_empty()
            && self
                .users
                .values()
                .any(|u| u.email.eq_ignore_ascii_case(email) && Some(u.id) != except)
    }

    fn set_meta(&mut self, user_id: UserId, key: &str, value: &str) -> MetaUpdate {
        let exists = self
            .meta
            .iter()
            .any(|row| row.user_id == user_id && row.key == key);

        if !exists {
            let id = self.next_meta_id;
            self.next_meta_id += 1;
            self.meta.push(MetaRow {
                user_id,
                key: key.to_string(),
                value: value.to_string(),
            });
            return MetaUpdate::Added(id);
        }

        let mut changed = false;
        for row in self
            .meta
            .iter_mut()
            .filter(|row| row.user_id == user_id && row.key == key && row.value != value)
        {
            row.value = value.to_string();
            changed = true;
        }
        if changed {
            MetaUpdate::Updated
        } else {
            MetaUpdate::Unchanged
        }
    }
}

impl UserStore for MemoryStore {
    fn find_by(&self, lookup: &UserLookup) -> Result<Option<UserRecord>, StoreError> {
        let state = self.state();
        let found = match lookup {
            UserLookup::Id(id) => state.users.get(id).cloned(),
            UserLookup::Login(login) if !login.is_empty() => {
                state.users.values().find(|u| &u.login == login).cloned()
            }
            UserLookup::Email(email) if !email.is_empty() => state
                .users
                .values()
                .find(|u| u.email.eq_ignore_ascii_case(email))
                .cloned(),
            _ => None,
        };
        Ok(found)
    }

    fn find_by_meta(&self, query: &MetaQuery) -> Result<Vec<UserRecord>, StoreError> {
        let state = self.state();
        let ids: BTreeSet<UserId> = state
            .meta
            .iter()
            .filter(|row| row.key == query.key)
            .filter(|row| query.value.as_deref().map_or(true, |v| row.value == v))
            .map(|row| row.user_id)
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| state.users.get(&id).cloned())
            .collect())
    }

    fn user_meta(&self, user_id: UserId) -> Result<UserMeta, StoreError> {
        let state = self.state();
        let mut meta = UserMeta::new();
        for row in state.meta.iter().filter(|row| row.user_id == user_id) {
            meta.entry(row.key.clone()).or_default().push(row.value.clone());
        }
        Ok(meta)
    }

    fn update_user_meta(
        &self,
        user_id: UserId,
        key: &str,
        value: &str,
    ) -> Result<MetaUpdate, StoreError> {
        let mut state = self.state();
        if !state.users.contains_key(&user_id) {
            return Err(invalid_user(user_id));
        }
        Ok(state.set_meta(user_id, key, value))
    }

    fn create_user(&self, login: &str, password: &str) -> Result<UserId, StoreError> {
        check_login(login)?;
        let password_hash = hash_password(password)?;

        let mut state = self.state();
        if state.users.values().any(|u| u.login == login) {
            return Err(StoreError::new(
                StoreError::EXISTING_USER_LOGIN,
                "Sorry, that username already exists!",
            ));
        }

        let id = state.next_user_id;
        state.next_user_id += 1;
        state.users.insert(
            id,
            UserRecord {
                id,
                login: login.to_string(),
                email: String::new(),
                password_hash,
                display_name: login.to_string(),
                registered_at: Utc::now(),
            },
        );
        debug!(id, login, "created user in memory store");
        Ok(id)
    }

    fn update_user(&self, update: &UserUpdate) -> Result<UserId, StoreError> {
        check_extra_fields(update)?;
        let password_hash = update.password.as_deref().map(hash_password).transpose()?;

        let mut state = self.state();
        if !state.users.contains_key(&update.id) {
            return Err(invalid_user(update.id));
        }
        if let Some(ref email) = update.email {
            if state.email_taken(email, Some(update.id)) {
                return Err(StoreError::new(
                    StoreError::EXISTING_USER_EMAIL,
                    "Sorry, that email address is already used!",
                ));
            }
        }

        if let Some(user) = state.users.get_mut(&update.id) {
            if let Some(ref email) = update.email {
                user.email = email.clone();
            }
            if let Some(hash) = password_hash {
                user.password_hash = hash;
            }
            if let Some(ref name) = update.display_name {
                user.display_name = name.clone();
            }
        }
        for (key, value) in &update.extra {
            state.set_meta(update.id, key, value);
        }
        Ok(update.id)
    }
}

impl OptionStore for MemoryStore {
    fn partitions(&self) -> Result<Vec<TenantId>, StoreError> {
        Ok(self.state().options.keys().cloned().collect())
    }

    fn options_with_prefix(
        &self,
        partition: &str,
        prefix: &str,
    ) -> Result<Vec<OptionRow>, StoreError> {
        let state = self.state();
        Ok(state
            .options
            .get(partition)
            .map(|table| {
                table
                    .iter()
                    .filter(|(name, _)| name.starts_with(prefix))
                    .map(|(name, value)| OptionRow::new(name.as_str(), value.as_str()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn delete_options_with_prefix(
        &self,
        partition: &str,
        prefix: &str,
    ) -> Result<usize, StoreError> {
        let mut state = self.state();
        let Some(table) = state.options.get_mut(partition) else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|name, _| !name.starts_with(prefix));
        Ok(before - table.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_find_user() {
        let store = MemoryStore::new();
        let id = store.create_user("jdoe", "secret").unwrap();
        assert_eq!(id, 1);

        let user = store.find_by(&UserLookup::Login("jdoe".into())).unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.display_name, "jdoe");
        assert!(bcrypt::verify("secret", &user.password_hash).unwrap());

        assert!(store.find_by(&UserLookup::Id(99)).unwrap().is_none());
        assert!(store.find_by(&UserLookup::Email(String::new())).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_login_rejected() {
        let store = MemoryStore::new();
        store.create_user("jdoe", "a").unwrap();
        let err = store.create_user("jdoe", "b").unwrap_err();
        assert_eq!(err.code, StoreError::EXISTING_USER_LOGIN);

        let err = store.create_user("  ", "b").unwrap_err();
        assert_eq!(err.code, StoreError::EMPTY_USER_LOGIN);
    }

    #[test]
    fn test_update_user_email_uniqueness() {
        let store = MemoryStore::new();
        let a = store.create_user("alice", "a").unwrap();
        let b = store.create_user("bob", "b").unwrap();

        store
            .update_user(&UserUpdate::new(a).with_email("shared@example.com"))
            .unwrap();
        let err = store
            .update_user(&UserUpdate::new(b).with_email("SHARED@example.com"))
            .unwrap_err();
        assert_eq!(err.code, StoreError::EXISTING_USER_EMAIL);

        // Re-saving your own email is fine.
        store
            .update_user(&UserUpdate::new(a).with_email("shared@example.com"))
            .unwrap();
    }

    #[test]
    fn test_update_user_extra_fields() {
        let store = MemoryStore::new();
        let id = store.create_user("alice", "a").unwrap();

        store
            .update_user(&UserUpdate::new(id).with_extra("first_name", "Alice"))
            .unwrap();
        let meta = store.user_meta(id).unwrap();
        assert_eq!(meta["first_name"], vec!["Alice".to_string()]);

        let err = store
            .update_user(&UserUpdate::new(id).with_extra("is_admin", "1"))
            .unwrap_err();
        assert_eq!(err.code, StoreError::INVALID_FIELD);
    }

    #[test]
    fn test_meta_update_outcomes() {
        let store = MemoryStore::new();
        let id = store.create_user("alice", "a").unwrap();

        assert!(matches!(
            store.update_user_meta(id, "k", "v").unwrap(),
            MetaUpdate::Added(_)
        ));
        assert_eq!(store.update_user_meta(id, "k", "v").unwrap(), MetaUpdate::Unchanged);
        assert_eq!(store.update_user_meta(id, "k", "w").unwrap(), MetaUpdate::Updated);

        let err = store.update_user_meta(42, "k", "v").unwrap_err();
        assert_eq!(err.code, StoreError::INVALID_USER_ID);
    }

    #[test]
    fn test_find_by_meta_filters_and_orders() {
        let store = MemoryStore::new();
        let a = store.create_user("alice", "a").unwrap();
        let b = store.create_user("bob", "b").unwrap();
        store.update_user_meta(b, "guid", "x").unwrap();
        store.update_user_meta(a, "guid", "x").unwrap();
        store.update_user_meta(a, "other", "y").unwrap();

        let all = store
            .find_by_meta(&MetaQuery { key: "guid".into(), value: None })
            .unwrap();
        assert_eq!(all.iter().map(|u| u.id).collect::<Vec<_>>(), vec![a, b]);

        let none = store
            .find_by_meta(&MetaQuery { key: "guid".into(), value: Some("z".into()) })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_option_prefix_is_literal() {
        let store = MemoryStore::new();
        store.set_option(DEFAULT_TENANT, "adi2_bov_x", "1");
        store.set_option(DEFAULT_TENANT, "adi2Xbov_y", "2");

        let rows = store.options_with_prefix(DEFAULT_TENANT, "adi2_bov_").unwrap();
        assert_eq!(rows, vec![OptionRow::new("adi2_bov_x", "1")]);

        let removed = store.delete_options_with_prefix(DEFAULT_TENANT, "adi2_").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_option(DEFAULT_TENANT, "adi2Xbov_y").as_deref(), Some("2"));
        assert_eq!(store.delete_options_with_prefix("missing", "adi2_").unwrap(), 0);
    }
}
