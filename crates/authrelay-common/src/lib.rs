//! # authrelay-common
//!
//! Shared types for the authrelay crates.
//!
//! This crate provides the pieces an authenticated client is composed from:
//! - [`Credential`]: an opaque bearer token that never leaks through `Debug`
//! - [`CredentialStore`]: where the current credential lives
//! - [`AuthConfig`]: endpoints, timeouts and refresh settings, loadable from TOML
//!
//! ## Example
//!
//! ```
//! use authrelay_common::{AuthConfig, CredentialStore, MemoryCredentialStore};
//!
//! let config = AuthConfig::new("https://api.example.com").with_access_token("tok1");
//!
//! let store = MemoryCredentialStore::new();
//! if let Some(token) = config.access_token.clone() {
//!     store.replace(token.into());
//! }
//!
//! assert_eq!(store.current().unwrap().expose(), "tok1");
//! ```

/// Client configuration and TOML loading.
pub mod config;
/// Credentials and credential stores.
pub mod credential;

pub use config::{AuthConfig, ConfigError, RefreshMethod};
pub use credential::{Credential, CredentialStore, MemoryCredentialStore};
