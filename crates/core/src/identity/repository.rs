//! Read/write access to local user records and their directory identity.
//!
//! [`UserRepository`] is the single entry point the authentication and
//! provisioning flows use to touch the user store. All error translation
//! happens here:
//!
//! - lookups never fail; a miss (or a store failure, which is logged) is `None`
//! - [`UserRepository::create`] escalates store errors into
//!   [`RepositoryError::CreateUser`]
//! - [`UserRepository::update`] logs store errors and hands the
//!   [`StoreError`] back as a value; property updates only log

use tracing::{debug, error, warn};

use crate::errors::{RepositoryError, StoreError};
use crate::models::{
    DirectoryUser, MetaQuery, MetaUpdate, UserId, UserLookup, UserMeta, UserRecord, UserUpdate,
};
use crate::store::UserStore;

/// Meta key holding the directory logon name (`sAMAccountName`).
pub const META_KEY_SAMACCOUNTNAME: &str = "samaccountname";

/// Meta key holding the directory object GUID (`objectGUID`).
pub const META_KEY_OBJECT_GUID: &str = "objectguid";

/// Repository over an injected [`UserStore`].
pub struct UserRepository<S> {
    store: S,
    prefix: String,
}

impl<S: UserStore> UserRepository<S> {
    /// Build a repository whose reserved meta keys are namespaced with
    /// `prefix` (e.g. `adi2_` gives `adi2_objectguid`).
    pub fn new(store: S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// `key` with the namespace prefix applied.
    pub fn meta_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    // -- lookups ------------------------------------------------------------

    pub fn find_by_id(&self, id: UserId) -> Option<UserRecord> {
        self.find_by_key(UserLookup::Id(id))
    }

    pub fn find_by_username(&self, username: &str) -> Option<UserRecord> {
        self.find_by_key(UserLookup::Login(username.to_string()))
    }

    pub fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        self.find_by_key(UserLookup::Email(email.to_string()))
    }

    fn find_by_key(&self, lookup: UserLookup) -> Option<UserRecord> {
        match self.store.find_by(&lookup) {
            Ok(user) => user,
            Err(e) => {
                error!(
                    field = lookup.field(),
                    value = %lookup,
                    error = %e,
                    "user lookup failed for {} '{}'",
                    lookup.field(),
                    lookup
                );
                None
            }
        }
    }

    /// Users carrying `key`; when `value` is given only those whose value
    /// matches. Ordered by ascending user id.
    pub fn find_by_meta_key(&self, key: &str, value: Option<&str>) -> Vec<UserRecord> {
        let query = MetaQuery {
            key: key.to_string(),
            value: value.map(str::to_string),
        };
        match self.store.find_by_meta(&query) {
            Ok(users) => users,
            Err(e) => {
                error!(key, error = %e, "user meta lookup failed");
                Vec::new()
            }
        }
    }

    /// All metadata of a user, e.g. `{"first_name": ["Jane"]}`.
    pub fn find_user_meta(&self, user_id: UserId) -> UserMeta {
        match self.store.user_meta(user_id) {
            Ok(meta) => meta,
            Err(e) => {
                error!(user_id, error = %e, "reading user meta failed");
                UserMeta::new()
            }
        }
    }

    pub fn find_by_sam_account_name(&self, sam_account_name: &str) -> Option<UserRecord> {
        let key = self.meta_key(META_KEY_SAMACCOUNTNAME);
        self.find_by_meta_key(&key, Some(sam_account_name))
            .into_iter()
            .next()
    }

    pub fn find_by_object_guid(&self, guid: &str) -> Option<UserRecord> {
        let key = self.meta_key(META_KEY_OBJECT_GUID);
        self.find_by_meta_key(&key, Some(guid)).into_iter().next()
    }

    pub fn is_email_existing(&self, email: &str) -> bool {
        self.find_by_email(email).is_some()
    }

    // -- metadata writes ----------------------------------------------------

    /// Write a metadata value. Store failures are logged and reported as
    /// [`MetaUpdate::Failed`].
    pub fn update_meta_key(&self, user_id: UserId, key: &str, value: &str) -> MetaUpdate {
        match self.store.update_user_meta(user_id, key, value) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(user_id, key, error = %e, "failed to write user meta");
                MetaUpdate::Failed
            }
        }
    }

    pub fn update_sam_account_name(&self, user_id: UserId, sam_account_name: &str) {
        let key = self.meta_key(META_KEY_SAMACCOUNTNAME);
        self.update_meta_key(user_id, &key, sam_account_name);
    }

    pub fn update_object_guid(&self, user_id: UserId, guid: &str) {
        let key = self.meta_key(META_KEY_OBJECT_GUID);
        self.update_meta_key(user_id, &key, guid);
    }

    /// Mirror both directory identifiers onto the user.
    pub fn link_directory_identity(&self, user_id: UserId, sam_account_name: &str, guid: &str) {
        self.update_sam_account_name(user_id, sam_account_name);
        self.update_object_guid(user_id, guid);
        debug!(user_id, sam_account_name, guid, "linked directory identity");
    }

    // -- record writes ------------------------------------------------------

    pub fn update_email(&self, user_id: UserId, email: &str) {
        self.update_property(UserUpdate::new(user_id).with_email(email));
    }

    pub fn update_password(&self, user_id: UserId, password: &str) {
        self.update_property(UserUpdate::new(user_id).with_password(password));
    }

    /// Write a single field. Failures are logged with the user's display
    /// name and never surface to the caller.
    fn update_property(&self, update: UserUpdate) {
        if let Err(e) = self.store.update_user(&update) {
            // Best effort; a second failure here stays silent.
            let display_name = self
                .store
                .find_by(&UserLookup::Id(update.id))
                .ok()
                .flatten()
                .map(|user| user.display_name)
                .unwrap_or_default();
            error!(
                user_id = update.id,
                display_name = %display_name,
                messages = ?e.messages(),
                "could not update user '{}' ({})",
                display_name,
                update.id
            );
        }
    }

    /// Create the local account for a directory user and return its id.
    pub fn create(&self, user: &DirectoryUser) -> Result<UserId, RepositoryError> {
        match self
            .store
            .create_user(&user.login, user.credentials.password())
        {
            Ok(id) => {
                debug!(login = %user.login, id, "created user '{}'", user.login);
                Ok(id)
            }
            Err(e) => {
                error!(
                    login = %user.login,
                    code = %e.code,
                    messages = ?e.messages(),
                    "can not create user '{}'",
                    user.login
                );
                Err(RepositoryError::CreateUser {
                    login: user.login.clone(),
                    source: e,
                })
            }
        }
    }

    /// Apply `data` to the user. A store failure is logged and returned as
    /// the error value; callers that care must inspect the result.
    pub fn update(&self, user: &DirectoryUser, data: &UserUpdate) -> Result<UserId, StoreError> {
        let result = self.store.update_user(data);
        if let Err(ref e) = result {
            let user_id = user.id.unwrap_or(data.id);
            error!(
                login = %user.login,
                user_id,
                messages = ?e.messages(),
                "could not update user '{}' ({})",
                user.login,
                user_id
            );
        }
        result
    }
}
