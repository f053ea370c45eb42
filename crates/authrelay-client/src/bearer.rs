//! Bearer credential hooks.
//!
//! Two middlewares cooperate to keep requests authenticated:
//!
//! - [`BearerHeader`] runs at [`Stage::Request`](crate::Stage::Request) and
//!   adds `Authorization: Bearer <credential>` to any request that does not
//!   already carry an `Authorization` header.
//! - [`RefreshOnForbidden`] runs at [`Stage::Response`](crate::Stage::Response).
//!   When a request is answered with `403 Forbidden` it obtains a new
//!   credential from its [`CredentialRefresher`], rewrites the header and
//!   sends the request again, once.
//!
//! The lifecycle of one call is:
//!
//! ```text
//! INITIAL -> SENT -> DONE
//! INITIAL -> SENT -(403, not retried)-> REFRESHING -> RETRIED -> DONE
//! ```
//!
//! The outcome of the retry replaces the original 403 whatever it is. A
//! second 403 is returned to the caller as-is.

use std::sync::Arc;

use async_trait::async_trait;
use http::Extensions;
use http::header::{AUTHORIZATION, HeaderValue};
use log::{debug, warn};
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next};

use authrelay_common::{Credential, CredentialStore};

use crate::error::AuthError;
use crate::refresher::CredentialRefresher;

/// Token sent when the store holds no credential.
///
/// The request still goes out so the server can reject it.
pub const ABSENT_CREDENTIAL: &str = "undefined";

/// Builds the `Authorization` header value for `credential`.
///
/// The value is marked sensitive so it is left out of debug output.
///
/// # Errors
///
/// Returns [`AuthError::InvalidCredential`] if the token contains characters
/// that cannot appear in an HTTP header.
///
/// # Examples
///
/// ```
/// use authrelay_client::bearer::bearer_header_value;
/// use authrelay_common::Credential;
///
/// let value = bearer_header_value(Some(&Credential::new("tok1"))).unwrap();
/// assert_eq!(value, "Bearer tok1");
///
/// let value = bearer_header_value(None).unwrap();
/// assert_eq!(value, "Bearer undefined");
/// ```
pub fn bearer_header_value(credential: Option<&Credential>) -> Result<HeaderValue, AuthError> {
    let token = credential.map_or(ABSENT_CREDENTIAL, Credential::expose);
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Marks a call whose request has already been refreshed and resent.
///
/// Lives in the per-call [`Extensions`]. While present, [`RefreshOnForbidden`]
/// passes every outcome straight through, including a 403 coming back from a
/// retry issued by another `RefreshOnForbidden` further down the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthRetried;

/// Request-stage hook that attaches the current credential.
pub struct BearerHeader {
    store: Arc<dyn CredentialStore>,
}

impl BearerHeader {
    /// Creates a hook reading credentials from `store`.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Middleware for BearerHeader {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        if !req.headers().contains_key(AUTHORIZATION) {
            let value = bearer_header_value(self.store.current().as_ref())?;
            req.headers_mut().insert(AUTHORIZATION, value);
        }
        next.run(req, extensions).await
    }
}

/// Response-stage hook that refreshes the credential and retries once on 403.
pub struct RefreshOnForbidden {
    refresher: Arc<dyn CredentialRefresher>,
}

impl RefreshOnForbidden {
    /// Creates a hook obtaining new credentials from `refresher`.
    pub fn new(refresher: Arc<dyn CredentialRefresher>) -> Self {
        Self { refresher }
    }

    async fn send_with_refresh<'a>(
        &'a self,
        req: Request,
        extensions: &'a mut Extensions,
        next: Next<'a>,
    ) -> reqwest_middleware::Result<Response> {
        if extensions.get::<AuthRetried>().is_some() {
            return next.run(req, extensions).await;
        }

        // Streaming bodies cannot be cloned, and therefore cannot be resent.
        let replay = req.try_clone();
        let response = next.clone().run(req, extensions).await?;
        // A hook further in may already have refreshed and resent this call.
        if response.status() != StatusCode::FORBIDDEN || extensions.get::<AuthRetried>().is_some()
        {
            return Ok(response);
        }

        let Some(mut replay) = replay else {
            warn!(
                "{} was rejected with 403 but its body cannot be resent",
                response.url()
            );
            return Ok(response);
        };

        extensions.insert(AuthRetried);
        debug!(
            "{} {} rejected with 403, refreshing credential",
            replay.method(),
            replay.url()
        );

        let credential = self
            .refresher
            .refresh()
            .await
            .inspect_err(|e| warn!("Credential refresh failed: {e}"))?;
        replay
            .headers_mut()
            .insert(AUTHORIZATION, bearer_header_value(Some(&credential))?);

        next.run(replay, extensions).await
    }
}

#[async_trait]
impl Middleware for RefreshOnForbidden {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        self.send_with_refresh(req, extensions, next).await
    }
}
