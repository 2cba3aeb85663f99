//! End-to-end tests for directory-driven provisioning against a real SQLite
//! database on disk.

use tempfile::TempDir;

use adusers_core::config::AppConfig;
use adusers_core::db::Database;
use adusers_core::errors::{RepositoryError, StoreError};
use adusers_core::identity::UserRepository;
use adusers_core::models::{Credentials, DirectoryUser, UserUpdate, DEFAULT_TENANT};
use adusers_core::uninstall::UninstallSweeper;

// ===========================================================================
// Helpers
// ===========================================================================

fn open_db(dir: &TempDir) -> Database {
    let db = Database::new(dir.path().join("adusers.db"))
        .expect("open db")
        .with_hash_cost(4);
    db.initialize().expect("migrate");
    db
}

/// What an authentication hook does on every successful directory login.
fn sign_in(
    repo: &UserRepository<&Database>,
    login: &str,
    password: &str,
    guid: &str,
    email: &str,
) -> i64 {
    let id = match repo
        .find_by_object_guid(guid)
        .or_else(|| repo.find_by_sam_account_name(login))
    {
        Some(user) => user.id,
        None => repo
            .create(&DirectoryUser::pending(Credentials::new(login, password)))
            .expect("create user"),
    };
    repo.link_directory_identity(id, login, guid);
    repo.update_email(id, email);
    repo.update_password(id, password);
    id
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn test_first_login_provisions_and_links_user() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let repo = UserRepository::new(&db, "adi2_");

    let id = sign_in(&repo, "jdoe", "Secret1", "guid-jdoe", "jdoe@example.com");

    let user = repo.find_by_id(id).expect("user exists");
    assert_eq!(user.login, "jdoe");
    assert_eq!(user.email, "jdoe@example.com");
    assert!(bcrypt::verify("Secret1", &user.password_hash).unwrap());
    assert!(repo.is_email_existing("JDOE@example.com"));

    let meta = repo.find_user_meta(id);
    assert_eq!(meta["adi2_samaccountname"], vec!["jdoe".to_string()]);
    assert_eq!(meta["adi2_objectguid"], vec!["guid-jdoe".to_string()]);
}

#[test]
fn test_second_login_reuses_record_and_syncs_password() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let repo = UserRepository::new(&db, "adi2_");

    let first = sign_in(&repo, "jdoe", "Secret1", "guid-jdoe", "jdoe@example.com");
    let second = sign_in(&repo, "jdoe", "Rotated2", "guid-jdoe", "john@example.com");
    assert_eq!(first, second);

    let user = repo.find_by_username("jdoe").unwrap();
    assert_eq!(user.email, "john@example.com");
    assert!(bcrypt::verify("Rotated2", &user.password_hash).unwrap());
    assert!(!repo.is_email_existing("jdoe@example.com"));
}

#[test]
fn test_renamed_directory_account_is_found_by_guid() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let repo = UserRepository::new(&db, "adi2_");

    let id = sign_in(&repo, "jdoe", "pw", "guid-1", "jdoe@example.com");
    repo.update_sam_account_name(id, "john.doe");

    assert!(repo.find_by_sam_account_name("jdoe").is_none());
    assert_eq!(repo.find_by_sam_account_name("john.doe").map(|u| u.id), Some(id));
    assert_eq!(repo.find_by_object_guid("guid-1").map(|u| u.id), Some(id));
}

#[test]
fn test_duplicate_login_raises_create_error() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let repo = UserRepository::new(&db, "adi2_");

    let user = DirectoryUser::pending(Credentials::new("jdoe", "pw"));
    repo.create(&user).unwrap();

    match repo.create(&user) {
        Err(RepositoryError::CreateUser { login, source }) => {
            assert_eq!(login, "jdoe");
            assert_eq!(source.code, StoreError::EXISTING_USER_LOGIN);
        }
        other => panic!("expected CreateUser error, got {:?}", other),
    }
}

#[test]
fn test_update_returns_store_error_as_value() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let repo = UserRepository::new(&db, "adi2_");

    let alice = repo
        .create(&DirectoryUser::pending(Credentials::new("alice", "pw")))
        .unwrap();
    let bob = repo
        .create(&DirectoryUser::pending(Credentials::new("bob", "pw")))
        .unwrap();
    repo.update_email(alice, "shared@example.com");

    let bob_user = DirectoryUser::existing(bob, Credentials::new("bob", "pw"));
    let result = repo.update(
        &bob_user,
        &UserUpdate::new(bob)
            .with_email("shared@example.com")
            .with_display_name("Bob"),
    );
    assert_eq!(result.unwrap_err().code, StoreError::EXISTING_USER_EMAIL);
    assert_eq!(repo.find_by_id(bob).unwrap().display_name, "bob");

    let result = repo.update(
        &bob_user,
        &UserUpdate::new(bob)
            .with_display_name("Bob Builder")
            .with_extra("first_name", "Bob"),
    );
    assert_eq!(result, Ok(bob));
    assert_eq!(repo.find_by_id(bob).unwrap().display_name, "Bob Builder");
    assert_eq!(repo.find_user_meta(bob)["first_name"], vec!["Bob".to_string()]);
}

#[test]
fn test_uninstall_leaves_users_and_foreign_options() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let repo = UserRepository::new(&db, "adi2_");
    let id = sign_in(&repo, "jdoe", "pw", "guid-1", "jdoe@example.com");

    db.add_tenant("site-2").unwrap();
    db.set_option(DEFAULT_TENANT, "adi2_bov_port", "636").unwrap();
    db.set_option(DEFAULT_TENANT, "adi2_fl_bt_jdoe", "1700000000").unwrap();
    db.set_option("site-2", "adi2_pov_1_port", "389").unwrap();
    db.set_option("site-2", "adi2_pop_1_port", "3").unwrap();
    db.set_option("site-2", "template", "twentytwenty").unwrap();

    let config: AppConfig = toml::from_str(
        r#"
[namespace]
prefix = "adi2_"
[tenancy]
multisite = true
"#,
    )
    .unwrap();
    let backup = UninstallSweeper::from_config(&db, &config).sweep().unwrap();

    assert_eq!(backup[DEFAULT_TENANT].len(), 2);
    assert_eq!(backup["site-2"].len(), 2);
    assert_eq!(db.count_options(DEFAULT_TENANT).unwrap(), 0);
    assert_eq!(db.count_options("site-2").unwrap(), 1);

    // User metadata is not an option row and survives.
    assert_eq!(repo.find_by_object_guid("guid-1").map(|u| u.id), Some(id));
}
