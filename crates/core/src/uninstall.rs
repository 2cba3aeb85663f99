//! Removal of every option row owned by the integration.
//!
//! The sweep visits each tenant partition, collects the rows matching any of
//! the namespaced [`OPTION_PREFIXES`] into an in-memory backup, deletes them,
//! and finally logs the backup as JSON. The backup is not persisted by the
//! sweeper itself; the CLI can write it to a file.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::StoreError;
use crate::models::{OptionRow, TenantId, DEFAULT_TENANT};
use crate::store::OptionStore;

/// Per-site configuration values.
pub const BLOG_CONFIGURATION_PREFIX: &str = "bov_";
/// Failed login attempt counters.
pub const FAILED_LOGIN_ATTEMPTS_PREFIX: &str = "fl_la_";
/// Failed login lockout timestamps.
pub const FAILED_LOGIN_BLOCKED_TIME_PREFIX: &str = "fl_bt_";
/// Per-profile configuration values.
pub const PROFILE_CONFIGURATION_VALUE_PREFIX: &str = "pov_";
/// Per-profile configuration permissions.
pub const PROFILE_CONFIGURATION_PERMISSION_PREFIX: &str = "pop_";
/// Profile names.
pub const PROFILE_NAME_PREFIX: &str = "p_n_";
/// Profile descriptions.
pub const PROFILE_DESCRIPTION_PREFIX: &str = "p_d_";

/// Every option prefix purged on uninstall, without the namespace. These
/// literals must stay stable across releases.
pub const OPTION_PREFIXES: [&str; 7] = [
    BLOG_CONFIGURATION_PREFIX,
    FAILED_LOGIN_ATTEMPTS_PREFIX,
    FAILED_LOGIN_BLOCKED_TIME_PREFIX,
    PROFILE_CONFIGURATION_VALUE_PREFIX,
    PROFILE_CONFIGURATION_PERMISSION_PREFIX,
    PROFILE_NAME_PREFIX,
    PROFILE_DESCRIPTION_PREFIX,
];

/// Rows removed from each partition, keyed by partition id.
pub type UninstallBackup = BTreeMap<TenantId, Vec<OptionRow>>;

/// [`OPTION_PREFIXES`] with `namespace` prepended.
pub fn namespaced_prefixes(namespace: &str) -> Vec<String> {
    OPTION_PREFIXES
        .iter()
        .map(|prefix| format!("{}{}", namespace, prefix))
        .collect()
}

/// One-shot purge of integration options.
pub struct UninstallSweeper<S> {
    store: S,
    prefixes: Vec<String>,
    multisite: bool,
}

impl<S: OptionStore> UninstallSweeper<S> {
    /// Sweeper for a single-site deployment using `namespace`.
    pub fn new(store: S, namespace: &str) -> Self {
        Self {
            store,
            prefixes: namespaced_prefixes(namespace),
            multisite: false,
        }
    }

    /// Sweeper configured from the namespace and tenancy sections.
    pub fn from_config(store: S, config: &AppConfig) -> Self {
        Self::new(store, &config.namespace.prefix).multisite(config.tenancy.multisite)
    }

    /// Visit every partition the store knows instead of only the default one.
    pub fn multisite(mut self, enabled: bool) -> Self {
        self.multisite = enabled;
        self
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Partitions the sweep will visit.
    pub fn partitions(&self) -> Result<Vec<TenantId>, StoreError> {
        if self.multisite {
            self.store.partitions()
        } else {
            Ok(vec![DEFAULT_TENANT.to_string()])
        }
    }

    /// Back up and delete every matching row of every partition.
    ///
    /// Whether each partition is purged atomically depends on the store's
    /// [`OptionStore::purge_prefixes`]. A store error aborts the sweep;
    /// partitions already visited stay purged and their backups have been
    /// logged.
    pub fn sweep(&self) -> Result<UninstallBackup, StoreError> {
        let partitions = self.partitions()?;
        info!(
            partitions = partitions.len(),
            prefixes = self.prefixes.len(),
            multisite = self.multisite,
            "starting uninstall sweep"
        );

        let mut backup = UninstallBackup::new();
        for partition in partitions {
            let rows = self.store.purge_prefixes(&partition, &self.prefixes)?;
            info!(partition = %partition, rows = rows.len(), "removed integration options");
            log_partition_backup(&partition, &rows);
            backup.insert(partition, rows);
        }

        info!(
            rows = backup.values().map(Vec::len).sum::<usize>(),
            "uninstall sweep complete"
        );
        Ok(backup)
    }
}

fn log_partition_backup(partition: &str, rows: &[OptionRow]) {
    match serde_json::to_string(rows) {
        Ok(json) => info!(partition, backup = %json, "uninstall backup"),
        Err(e) => warn!(partition, error = %e, "could not serialize uninstall backup"),
    }
}
