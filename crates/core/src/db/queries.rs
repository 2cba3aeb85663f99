//! Typed query helpers for every table in the adusers database.
//!
//! Option-table helpers are also exposed as free functions over a plain
//! [`Connection`] so they can run inside [`Database::transaction`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{
    MetaQuery, MetaUpdate, OptionRow, TenantId, UserId, UserLookup, UserMeta, UserRecord,
    UserUpdate,
};

const USER_COLUMNS: &str = "id, login, email, password_hash, display_name, registered_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    let registered_at: String = row.get(5)?;
    Ok(UserRecord {
        id: row.get(0)?,
        login: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        display_name: row.get(4)?,
        registered_at: parse_datetime(&registered_at),
    })
}

impl Database {
    // -- users --------------------------------------------------------------

    /// Insert a new user with a freshly hashed password. Blank logins and
    /// duplicate logins are rejected by the schema.
    pub(crate) fn insert_user(&self, login: &str, password: &str) -> Result<UserId, DatabaseError> {
        let hash = self.hash_password(password)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (login, email, password_hash, display_name, registered_at)
             VALUES (?1, '', ?2, ?1, ?3)",
            params![login, hash, now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, login, "inserted user");
        Ok(id)
    }

    /// Fetch a user by id, login, or (case-insensitive) email. Empty logins
    /// and emails never match.
    pub fn get_user(&self, lookup: &UserLookup) -> Result<Option<UserRecord>, DatabaseError> {
        let conn = self.conn();
        let user = match lookup {
            UserLookup::Id(id) => conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![id],
                    user_from_row,
                )
                .optional()?,
            UserLookup::Login(login) if !login.is_empty() => conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE login = ?1"),
                    params![login],
                    user_from_row,
                )
                .optional()?,
            UserLookup::Email(email) if !email.is_empty() => conn
                .query_row(
                    &format!(
                        "SELECT {USER_COLUMNS} FROM users WHERE email = ?1 COLLATE NOCASE
                         ORDER BY id LIMIT 1"
                    ),
                    params![email],
                    user_from_row,
                )
                .optional()?,
            _ => None,
        };
        Ok(user)
    }

    /// Whether any user other than `except` already uses `email`.
    pub fn is_email_taken(&self, email: &str, except: Option<UserId>) -> Result<bool, DatabaseError> {
        if email.is_empty() {
            return Ok(false);
        }
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE email = ?1 COLLATE NOCASE AND id IS NOT ?2",
            params![email, except],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Users carrying a metadata key (optionally with a given value), ordered
    /// by id.
    pub fn list_users_by_meta(&self, query: &MetaQuery) -> Result<Vec<UserRecord>, DatabaseError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE id IN (
                 SELECT user_id FROM user_meta
                 WHERE meta_key = ?1 AND (?2 IS NULL OR meta_value = ?2)
             )
             ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map(params![query.key, query.value], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Apply a partial update in a single transaction. Extra profile fields
    /// are stored as user metadata. A non-empty email already used by
    /// another user fails with a constraint violation.
    pub(crate) fn apply_user_update(&self, update: &UserUpdate) -> Result<(), DatabaseError> {
        if update.is_empty() {
            debug!(user_id = update.id, "empty user update, nothing to apply");
            return Ok(());
        }

        let password_hash = update
            .password
            .as_deref()
            .map(|pw| self.hash_password(pw))
            .transpose()?;

        self.transaction(|conn| -> Result<(), DatabaseError> {
            if let Some(ref email) = update.email {
                conn.execute(
                    "UPDATE users SET email = ?1 WHERE id = ?2",
                    params![email, update.id],
                )?;
            }
            if let Some(ref hash) = password_hash {
                conn.execute(
                    "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                    params![hash, update.id],
                )?;
            }
            if let Some(ref name) = update.display_name {
                conn.execute(
                    "UPDATE users SET display_name = ?1 WHERE id = ?2",
                    params![name, update.id],
                )?;
            }
            for (key, value) in &update.extra {
                set_user_meta(conn, update.id, key, value)?;
            }
            Ok(())
        })?;
        debug!(user_id = update.id, "applied user update");
        Ok(())
    }

    // -- user_meta ----------------------------------------------------------

    /// All metadata rows of a user grouped by key, values in insertion order.
    pub fn list_user_meta(&self, user_id: UserId) -> Result<UserMeta, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT meta_key, meta_value FROM user_meta WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut meta = UserMeta::new();
        for row in rows {
            let (key, value) = row?;
            meta.entry(key).or_default().push(value);
        }
        Ok(meta)
    }

    /// Set every value of `key` for the user, adding the key if missing.
    pub fn upsert_user_meta(
        &self,
        user_id: UserId,
        key: &str,
        value: &str,
    ) -> Result<MetaUpdate, DatabaseError> {
        let conn = self.conn();
        set_user_meta(&conn, user_id, key, value)
    }

    // -- tenants ------------------------------------------------------------

    /// Register a tenant partition; existing ids are ignored.
    pub fn add_tenant(&self, tenant: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO tenants (id, created_at) VALUES (?1, ?2)",
            params![tenant, now],
        )?;
        debug!(tenant, "registered tenant");
        Ok(())
    }

    /// All tenant ids, sorted.
    pub fn list_tenants(&self) -> Result<Vec<TenantId>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM tenants ORDER BY id")?;
        let tenants = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tenants)
    }

    // -- options ------------------------------------------------------------

    /// Insert or replace an option value. The tenant must exist.
    pub fn set_option(&self, tenant: &str, name: &str, value: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO options (tenant_id, option_name, option_value) VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id, option_name) DO UPDATE SET option_value = excluded.option_value",
            params![tenant, name, value],
        )?;
        debug!(tenant, name, "set option");
        Ok(())
    }

    /// Read a single option value.
    pub fn get_option(&self, tenant: &str, name: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT option_value FROM options WHERE tenant_id = ?1 AND option_name = ?2",
                params![tenant, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Count all option rows of a tenant.
    pub fn count_options(&self, tenant: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM options WHERE tenant_id = ?1",
            params![tenant],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers (usable inside transactions)
// ---------------------------------------------------------------------------

pub(crate) fn set_user_meta(
    conn: &Connection,
    user_id: UserId,
    key: &str,
    value: &str,
) -> Result<MetaUpdate, DatabaseError> {
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user_meta WHERE user_id = ?1 AND meta_key = ?2",
        params![user_id, key],
        |row| row.get(0),
    )?;

    if existing == 0 {
        conn.execute(
            "INSERT INTO user_meta (user_id, meta_key, meta_value) VALUES (?1, ?2, ?3)",
            params![user_id, key, value],
        )?;
        return Ok(MetaUpdate::Added(conn.last_insert_rowid()));
    }

    let changed = conn.execute(
        "UPDATE user_meta SET meta_value = ?3
         WHERE user_id = ?1 AND meta_key = ?2 AND meta_value <> ?3",
        params![user_id, key, value],
    )?;
    Ok(if changed > 0 {
        MetaUpdate::Updated
    } else {
        MetaUpdate::Unchanged
    })
}

/// Rows of `tenant` whose name starts with `prefix`. The comparison is
/// literal and case-sensitive (no LIKE wildcards).
pub(crate) fn select_options_with_prefix(
    conn: &Connection,
    tenant: &str,
    prefix: &str,
) -> Result<Vec<OptionRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT option_name, option_value FROM options
         WHERE tenant_id = ?1 AND substr(option_name, 1, length(?2)) = ?2
         ORDER BY option_name",
    )?;
    let rows = stmt
        .query_map(params![tenant, prefix], |row| {
            Ok(OptionRow {
                name: row.get(0)?,
                value: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn delete_options_with_prefix(
    conn: &Connection,
    tenant: &str,
    prefix: &str,
) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM options WHERE tenant_id = ?1 AND substr(option_name, 1, length(?2)) = ?2",
        params![tenant, prefix],
    )?;
    Ok(removed)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_user_crud() {
        let db = setup_db();
        let id = db.insert_user("jdoe", "secret").unwrap();

        let user = db.get_user(&UserLookup::Id(id)).unwrap().unwrap();
        assert_eq!(user.login, "jdoe");
        assert_eq!(user.display_name, "jdoe");
        assert_eq!(user.email, "");
        assert!(bcrypt::verify("secret", &user.password_hash).unwrap());

        db.apply_user_update(
            &UserUpdate::new(id)
                .with_email("John.Doe@Example.com")
                .with_display_name("John Doe")
                .with_password("changed"),
        )
        .unwrap();

        let user = db
            .get_user(&UserLookup::Email("john.doe@example.com".into()))
            .unwrap()
            .unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.display_name, "John Doe");
        assert!(bcrypt::verify("changed", &user.password_hash).unwrap());

        assert!(db.get_user(&UserLookup::Id(999)).unwrap().is_none());
        assert!(db.get_user(&UserLookup::Login(String::new())).unwrap().is_none());
    }

    #[test]
    fn test_email_taken() {
        let db = setup_db();
        let a = db.insert_user("alice", "pw").unwrap();
        let b = db.insert_user("bob", "pw").unwrap();
        db.apply_user_update(&UserUpdate::new(a).with_email("a@example.com"))
            .unwrap();

        assert!(db.is_email_taken("A@example.com", Some(b)).unwrap());
        assert!(!db.is_email_taken("a@example.com", Some(a)).unwrap());
        assert!(!db.is_email_taken("", None).unwrap());
    }

    #[test]
    fn test_schema_rejects_duplicate_email_and_blank_login() {
        let db = setup_db();
        let a = db.insert_user("alice", "pw").unwrap();
        let b = db.insert_user("bob", "pw").unwrap();
        db.apply_user_update(&UserUpdate::new(a).with_email("shared@example.com"))
            .unwrap();

        let err = db
            .apply_user_update(&UserUpdate::new(b).with_email("SHARED@example.com"))
            .unwrap_err();
        assert!(err.is_constraint_violation());

        let owner = db
            .get_user(&UserLookup::Email("shared@example.com".into()))
            .unwrap()
            .unwrap();
        assert_eq!(owner.id, a);
        assert_eq!(db.get_user(&UserLookup::Id(b)).unwrap().unwrap().email, "");

        let err = db.insert_user("", "pw").unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_empty_update_is_a_no_op() {
        let db = setup_db();
        let id = db.insert_user("jdoe", "pw").unwrap();
        let before = db.get_user(&UserLookup::Id(id)).unwrap().unwrap();
        db.apply_user_update(&UserUpdate::new(id)).unwrap();
        let after = db.get_user(&UserLookup::Id(id)).unwrap().unwrap();
        assert_eq!(before.password_hash, after.password_hash);
    }

    #[test]
    fn test_user_meta() {
        let db = setup_db();
        let id = db.insert_user("jdoe", "pw").unwrap();

        assert!(matches!(
            db.upsert_user_meta(id, "adi2_samaccountname", "jdoe").unwrap(),
            MetaUpdate::Added(_)
        ));
        assert_eq!(
            db.upsert_user_meta(id, "adi2_samaccountname", "jdoe").unwrap(),
            MetaUpdate::Unchanged
        );
        assert_eq!(
            db.upsert_user_meta(id, "adi2_samaccountname", "john").unwrap(),
            MetaUpdate::Updated
        );

        // Multi-valued keys come back grouped.
        db.conn()
            .execute(
                "INSERT INTO user_meta (user_id, meta_key, meta_value) VALUES (?1, 'tag', 'a'), (?1, 'tag', 'b')",
                params![id],
            )
            .unwrap();

        let meta = db.list_user_meta(id).unwrap();
        assert_eq!(meta["adi2_samaccountname"], vec!["john".to_string()]);
        assert_eq!(meta["tag"], vec!["a".to_string(), "b".to_string()]);
        assert!(db.list_user_meta(999).unwrap().is_empty());
    }

    #[test]
    fn test_users_by_meta() {
        let db = setup_db();
        let a = db.insert_user("alice", "pw").unwrap();
        let b = db.insert_user("bob", "pw").unwrap();
        db.upsert_user_meta(b, "adi2_objectguid", "g-1").unwrap();
        db.upsert_user_meta(a, "adi2_objectguid", "g-1").unwrap();
        db.upsert_user_meta(a, "adi2_samaccountname", "alice").unwrap();

        let by_key = db
            .list_users_by_meta(&MetaQuery {
                key: "adi2_objectguid".into(),
                value: None,
            })
            .unwrap();
        assert_eq!(by_key.iter().map(|u| u.id).collect::<Vec<_>>(), vec![a, b]);

        let by_value = db
            .list_users_by_meta(&MetaQuery {
                key: "adi2_samaccountname".into(),
                value: Some("alice".into()),
            })
            .unwrap();
        assert_eq!(by_value.len(), 1);
        assert_eq!(by_value[0].login, "alice");

        let missing = db
            .list_users_by_meta(&MetaQuery {
                key: "adi2_objectguid".into(),
                value: Some("nope".into()),
            })
            .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_tenants_and_options() {
        let db = setup_db();
        db.add_tenant("site-2").unwrap();
        db.add_tenant("site-2").unwrap();
        assert_eq!(db.list_tenants().unwrap(), vec!["main", "site-2"]);

        db.set_option("site-2", "adi2_bov_port", "389").unwrap();
        db.set_option("site-2", "adi2_bov_port", "636").unwrap();
        assert_eq!(
            db.get_option("site-2", "adi2_bov_port").unwrap().as_deref(),
            Some("636")
        );
        assert_eq!(db.count_options("site-2").unwrap(), 1);

        // Unknown tenants are rejected by the foreign key.
        assert!(db.set_option("nowhere", "x", "y").is_err());
    }

    #[test]
    fn test_option_prefix_is_literal() {
        let db = setup_db();
        db.set_option("main", "adi2_p_n_1", "Default").unwrap();
        db.set_option("main", "adi2Xp_n_2", "Other").unwrap();
        db.set_option("main", "ADI2_p_n_3", "Upper").unwrap();

        let conn = db.conn();
        let rows = select_options_with_prefix(&conn, "main", "adi2_p_n_").unwrap();
        assert_eq!(rows, vec![OptionRow::new("adi2_p_n_1", "Default")]);

        let removed = delete_options_with_prefix(&conn, "main", "adi2_").unwrap();
        assert_eq!(removed, 1);
    }
}
