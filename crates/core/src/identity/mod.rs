//! Directory identity persistence.
//!
//! Maps an external directory account (logon name, object GUID) onto a local
//! user record through namespaced user metadata.

pub mod repository;

pub use repository::{UserRepository, META_KEY_OBJECT_GUID, META_KEY_SAMACCOUNTNAME};
