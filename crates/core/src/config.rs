//! TOML-based configuration for adusers.
//!
//! Every section is optional; missing sections and fields fall back to the
//! defaults below so that an empty file is a valid single-site setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging and data directory.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Key namespace shared by user metadata and option rows.
    #[serde(default)]
    pub namespace: NamespaceConfig,

    /// SQLite store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Multi-tenant settings.
    #[serde(default)]
    pub tenancy: TenancyConfig,
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory holding the database file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/adusers")
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

/// Prefix prepended to every metadata key and option name owned by the
/// integration. Changing it orphans existing rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "adi2_".into()
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file name, relative to `general.data_dir`.
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// bcrypt cost used when hashing passwords.
    #[serde(default = "default_hash_cost")]
    pub password_hash_cost: u32,
}

fn default_database_file() -> String {
    "adusers.db".into()
}
fn default_hash_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            password_hash_cost: default_hash_cost(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tenancy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// When set, the uninstall sweep visits every tenant partition instead
    /// of only the default one.
    #[serde(default)]
    pub multisite: bool,
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "namespace.prefix".into(),
                detail: "namespace prefix must not be empty".into(),
            });
        }
        if self.namespace.prefix.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                field: "namespace.prefix".into(),
                detail: "namespace prefix must not contain whitespace".into(),
            });
        }
        if self.store.database_file.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "store.database_file".into(),
                detail: "database file name must not be empty".into(),
            });
        }
        if !(4..=31).contains(&self.store.password_hash_cost) {
            return Err(ConfigError::InvalidValue {
                field: "store.password_hash_cost".into(),
                detail: "bcrypt cost must be between 4 and 31".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Full path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.general.data_dir.join(&self.store.database_file)
    }
}
