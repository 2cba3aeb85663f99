//! adusers core library.
//!
//! Persistence glue between a local user store and an Active Directory
//! integration: configuration, the store traits with SQLite and in-memory
//! backends, the identity repository that mirrors directory accounts onto
//! local users, and the uninstall sweeper.

pub mod config;
pub mod db;
pub mod errors;
pub mod identity;
pub mod models;
pub mod store;
pub mod uninstall;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use identity::UserRepository;
pub use store::{MemoryStore, OptionStore, UserStore};
pub use uninstall::UninstallSweeper;
