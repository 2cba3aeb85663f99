//! adusers command-line management tool.
//!
//! Provides subcommands for inspecting and provisioning directory-linked
//! users, seeding tenant options, generating / validating configuration
//! files, and running the uninstall sweep.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use dialoguer::{Confirm, Password};
use tracing::info;
use tracing_subscriber::EnvFilter;

use adusers_core::config::AppConfig;
use adusers_core::db::Database;
use adusers_core::identity::UserRepository;
use adusers_core::models::{Credentials, DirectoryUser, UserRecord};
use adusers_core::uninstall::{UninstallBackup, UninstallSweeper};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// adusers command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "adusers",
    version,
    about = "Manage local users linked to Active Directory accounts"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "/etc/adusers/config.toml")]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./adusers.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Inspect and provision users.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage tenant partitions.
    Tenant {
        #[command(subcommand)]
        action: TenantAction,
    },

    /// Manage option rows.
    Option {
        #[command(subcommand)]
        action: OptionAction,
    },

    /// Remove every integration option from the default tenant, or from
    /// every tenant partition when `tenancy.multisite` is enabled.
    Uninstall {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,

        /// Also write the removed rows as JSON to this file.
        #[arg(long)]
        backup: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum UserAction {
    /// Show a user by numeric id, login, or email.
    Show {
        /// Id, login or email.
        user: String,
    },
    /// Find the user linked to a directory logon name.
    FindSam {
        sam_account_name: String,
    },
    /// Find the user linked to a directory object GUID.
    FindGuid {
        guid: String,
    },
    /// List all metadata of a user.
    Meta {
        id: i64,
    },
    /// Create a local user.
    Create {
        login: String,
        /// Environment variable holding the password (prompted otherwise).
        #[arg(long)]
        password_env: Option<String>,
    },
    /// Link a user to a directory account.
    Link {
        id: i64,
        #[arg(long)]
        sam: String,
        #[arg(long)]
        guid: String,
    },
    /// Change a user's email address.
    SetEmail {
        id: i64,
        email: String,
    },
    /// Change a user's password.
    SetPassword {
        id: i64,
        /// Environment variable holding the password (prompted otherwise).
        #[arg(long)]
        password_env: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum TenantAction {
    /// Register a tenant partition.
    Add {
        id: String,
    },
    /// List tenant partitions.
    List,
}

#[derive(Subcommand, Debug)]
enum OptionAction {
    /// Set an option value in a tenant partition.
    Set {
        tenant: String,
        name: String,
        value: String,
    },
    /// Read an option value.
    Get {
        tenant: String,
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    // The config may not exist yet (init / validate), so logging falls back
    // to "warn" until one is loaded.
    let level = cli
        .log_level
        .clone()
        .or_else(|| {
            AppConfig::load_from_file(&cli.config)
                .ok()
                .map(|c| c.general.log_level)
        })
        .unwrap_or_else(|| "warn".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        command => {
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;

            match command {
                Commands::User { action } => cmd_user(&db, &config, action),
                Commands::Tenant { action } => cmd_tenant(&db, action),
                Commands::Option { action } => cmd_option(&db, action),
                Commands::Uninstall { yes, backup } => {
                    cmd_uninstall(&db, &config, yes, backup.as_deref())
                }
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_validate(path).context("failed to load configuration file")
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let db = Database::new(config.database_path())
        .context("failed to open database")?
        .with_hash_cost(config.store.password_hash_cost);
    db.initialize().context("failed to initialize database")?;
    Ok(db)
}

fn read_password(env_name: Option<&str>) -> Result<String> {
    match env_name {
        Some(name) => std::env::var(name)
            .with_context(|| format!("environment variable '{}' is not set", name)),
        None => Password::new()
            .with_prompt("Password")
            .with_confirmation("Repeat password", "Passwords do not match")
            .interact()
            .context("failed to read password"),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# adusers configuration
# Every section is optional; the values below are the defaults.

[general]
log_level = "info"
data_dir = "/var/lib/adusers"

[namespace]
# Prefix of every user meta key and option name owned by the integration.
prefix = "adi2_"

[store]
database_file = "adusers.db"
password_hash_cost = 12

[tenancy]
# Sweep every tenant partition on uninstall, not only the default one.
multisite = false
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the data directory and namespace prefix");
    println!(
        "  2. Validate with: adusers validate --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Database      : {}", config.database_path().display());
    println!("  Namespace     : {}", config.namespace.prefix);
    println!("  Hash cost     : {}", config.store.password_hash_cost);
    println!(
        "  Multisite     : {}",
        if config.tenancy.multisite { "yes" } else { "no" }
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_user(db: &Database, config: &AppConfig, action: UserAction) -> Result<()> {
    let repo = UserRepository::new(db, config.namespace.prefix.as_str());

    match action {
        UserAction::Show { user } => {
            let found = match user.parse::<i64>() {
                Ok(id) => repo.find_by_id(id),
                Err(_) if user.contains('@') => repo.find_by_email(&user),
                Err(_) => repo.find_by_username(&user),
            };
            print_user(found.as_ref(), &user)
        }

        UserAction::FindSam { sam_account_name } => print_user(
            repo.find_by_sam_account_name(&sam_account_name).as_ref(),
            &sam_account_name,
        ),

        UserAction::FindGuid { guid } => {
            print_user(repo.find_by_object_guid(&guid).as_ref(), &guid)
        }

        UserAction::Meta { id } => {
            let meta = repo.find_user_meta(id);
            if meta.is_empty() {
                println!("No metadata for user {}.", id);
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Key", "Value"]);
            for (key, values) in &meta {
                for value in values {
                    table.add_row(vec![Cell::new(key), Cell::new(value)]);
                }
            }
            println!("{}", table);
            Ok(())
        }

        UserAction::Create {
            login,
            password_env,
        } => {
            let password = read_password(password_env.as_deref())?;
            let user = DirectoryUser::pending(Credentials::new(login.as_str(), password));
            let id = repo.create(&user).context("failed to create user")?;
            println!("Created user '{}' with id {}", login, id);
            Ok(())
        }

        UserAction::Link { id, sam, guid } => {
            ensure_user(&repo, id)?;
            repo.link_directory_identity(id, &sam, &guid);
            println!("Linked user {} to '{}' ({})", id, sam, guid);
            Ok(())
        }

        UserAction::SetEmail { id, email } => {
            ensure_user(&repo, id)?;
            repo.update_email(id, &email);
            match repo.find_by_id(id) {
                Some(user) if user.email == email => {
                    println!("Email of user {} set to {}", id, email)
                }
                _ => anyhow::bail!("email of user {} was not changed (see log)", id),
            }
            Ok(())
        }

        UserAction::SetPassword { id, password_env } => {
            ensure_user(&repo, id)?;
            let password = read_password(password_env.as_deref())?;
            repo.update_password(id, &password);
            println!("Password of user {} updated", id);
            Ok(())
        }
    }
}

fn ensure_user(repo: &UserRepository<&Database>, id: i64) -> Result<()> {
    if repo.find_by_id(id).is_none() {
        anyhow::bail!("user {} not found", id);
    }
    Ok(())
}

fn print_user(user: Option<&UserRecord>, query: &str) -> Result<()> {
    let Some(user) = user else {
        println!("No user found for '{}'.", query);
        return Ok(());
    };

    println!("User {}", user.id);
    println!("=====");
    println!();
    println!("  Login        : {}", user.login);
    println!(
        "  Email        : {}",
        if user.email.is_empty() { "-" } else { user.email.as_str() }
    );
    println!("  Display name : {}", user.display_name);
    println!("  Registered   : {}", user.registered_at.to_rfc3339());
    Ok(())
}

fn cmd_tenant(db: &Database, action: TenantAction) -> Result<()> {
    match action {
        TenantAction::Add { id } => {
            db.add_tenant(&id).context("failed to add tenant")?;
            println!("Tenant '{}' registered", id);
        }
        TenantAction::List => {
            let tenants = db.list_tenants().context("failed to list tenants")?;
            for tenant in &tenants {
                let count = db.count_options(tenant).context("failed to count options")?;
                println!("{:<24} {} option(s)", tenant, count);
            }
        }
    }
    Ok(())
}

fn cmd_option(db: &Database, action: OptionAction) -> Result<()> {
    match action {
        OptionAction::Set {
            tenant,
            name,
            value,
        } => {
            db.set_option(&tenant, &name, &value)
                .with_context(|| format!("failed to set option in tenant '{}'", tenant))?;
            println!("{}.{} = {}", tenant, name, value);
        }
        OptionAction::Get { tenant, name } => {
            match db.get_option(&tenant, &name).context("failed to read option")? {
                Some(value) => println!("{}", value),
                None => anyhow::bail!("option '{}' not set in tenant '{}'", name, tenant),
            }
        }
    }
    Ok(())
}

fn cmd_uninstall(
    db: &Database,
    config: &AppConfig,
    yes: bool,
    backup_path: Option<&Path>,
) -> Result<()> {
    let sweeper = UninstallSweeper::from_config(db, config);
    let partitions = sweeper.partitions().context("failed to list tenants")?;

    println!("Options with these prefixes will be deleted:");
    for prefix in sweeper.prefixes() {
        println!("  {}*", prefix);
    }
    println!("Tenant partitions: {}", partitions.join(", "));
    println!();

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Delete all integration options?")
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("Uninstall cancelled. Nothing was deleted.");
            return Ok(());
        }
    }

    let backup = sweeper.sweep().context("uninstall sweep failed")?;
    print_backup(&backup);

    if let Some(path) = backup_path {
        let json = serde_json::to_string_pretty(&backup).context("failed to encode backup")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write backup to {}", path.display()))?;
        info!(path = %path.display(), "wrote uninstall backup");
        println!("Backup written to {}", path.display());
    }

    Ok(())
}

fn print_backup(backup: &UninstallBackup) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Tenant", "Option", "Value"]);

    let mut total = 0;
    for (tenant, rows) in backup {
        for row in rows {
            table.add_row(vec![
                Cell::new(tenant),
                Cell::new(&row.name),
                Cell::new(truncate(&row.value, 60)),
            ]);
        }
        total += rows.len();
    }

    if total == 0 {
        println!("No integration options found.");
    } else {
        println!("{}", table);
        println!("{} option(s) removed", total);
    }
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
