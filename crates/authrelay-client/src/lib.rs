//! # authrelay-client
//!
//! Bearer authentication for a shared [`reqwest`] client.
//!
//! This crate keeps requests authenticated without callers having to think
//! about credentials:
//! - Every request that carries no `Authorization` header gets
//!   `Authorization: Bearer <credential>` from a [`CredentialStore`]
//! - A `403 Forbidden` response triggers one credential refresh through a
//!   [`CredentialRefresher`] and one retry of the same request
//! - The hooks live on a [`SharedClient`] and are installed and ejected by an
//!   [`AuthInterceptor`] guard
//!
//! ## Example
//!
//! ```no_run
//! use authrelay_client::AuthInterceptor;
//! use authrelay_common::AuthConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AuthConfig::new("https://api.example.com")
//!     .with_refresh_url("/refresh")
//!     .with_access_token("tok1");
//!
//! let auth = AuthInterceptor::from_config(&config)?;
//!
//! // Use the client exactly like an unmodified one.
//! let response = auth
//!     .client()
//!     .get("https://api.example.com/users")
//!     .send()
//!     .await?;
//! println!("Users: {}", response.text().await?);
//! # Ok(())
//! # }
//! ```
//!
//! [`CredentialStore`]: authrelay_common::CredentialStore

pub mod bearer;
pub mod error;
pub mod hooks;
pub mod interceptor;
pub mod refresher;

pub use bearer::{AuthRetried, BearerHeader, RefreshOnForbidden};
pub use error::AuthError;
pub use hooks::{HookId, SharedClient, Stage};
pub use interceptor::AuthInterceptor;
pub use refresher::{CredentialRefresher, FnRefresher, HttpRefresher, refresher_fn};
