//! Registration of the bearer hooks on a [`SharedClient`].
//!
//! [`AuthInterceptor`] is a guard: creating it installs [`BearerHeader`] and
//! [`RefreshOnForbidden`] on the client, dropping it ejects them. Whatever owns
//! the client's lifecycle (an application context, a session, a UI component)
//! holds the guard for as long as requests should be authenticated.
//!
//! Both hooks close over the store and refresher the guard was given. When
//! either dependency is replaced, [`AuthInterceptor::rebind`] swaps the old
//! pair for a new one in a single step.

use std::fmt;
use std::sync::Arc;

use log::debug;
use reqwest_middleware::Middleware;

use authrelay_common::{AuthConfig, CredentialStore, MemoryCredentialStore};

use crate::bearer::{BearerHeader, RefreshOnForbidden};
use crate::error::AuthError;
use crate::hooks::{HookId, SharedClient, Stage};
use crate::refresher::{CredentialRefresher, HttpRefresher};

/// Keeps the bearer hooks installed on a [`SharedClient`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use authrelay_client::{AuthInterceptor, HttpRefresher, SharedClient};
/// use authrelay_common::{CredentialStore, MemoryCredentialStore};
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = SharedClient::new(reqwest::Client::new());
/// let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::with_credential("tok1"));
/// let refresher = Arc::new(HttpRefresher::new(
///     client.http().clone(),
///     "https://api.example.com/refresh".parse()?,
///     Arc::clone(&store),
/// ));
///
/// let auth = AuthInterceptor::attach(&client, store, refresher);
/// let users = auth.client().get("https://api.example.com/users").send().await?;
/// println!("{}", users.status());
///
/// drop(auth); // hooks ejected; `client` is a plain client again
/// # Ok(())
/// # }
/// ```
pub struct AuthInterceptor {
    client: SharedClient,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn CredentialRefresher>,
    hooks: Vec<HookId>,
}

impl fmt::Debug for AuthInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInterceptor")
            .field("client", &self.client)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl AuthInterceptor {
    /// Installs the bearer hooks on `client`.
    pub fn attach(
        client: &SharedClient,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn CredentialRefresher>,
    ) -> Self {
        let hooks = client.swap(&[], hooks_for(&store, &refresher));
        debug!("Bearer hooks attached");
        Self {
            client: client.clone(),
            store,
            refresher,
            hooks,
        }
    }

    /// Builds a client, store and HTTP refresher from `config` and attaches.
    ///
    /// The store is seeded with `config.access_token`. The refresher shares the
    /// client's transport, and with it the cookie store.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        config.validate()?;

        let client = SharedClient::from_config(config)?;
        let store: Arc<dyn CredentialStore> = match &config.access_token {
            Some(token) => Arc::new(MemoryCredentialStore::with_credential(token.clone())),
            None => Arc::new(MemoryCredentialStore::new()),
        };
        let refresher = HttpRefresher::from_config(config, client.http().clone(), Arc::clone(&store))?;

        Ok(Self::attach(&client, store, Arc::new(refresher)))
    }

    /// The client the hooks are installed on.
    #[must_use]
    pub const fn client(&self) -> &SharedClient {
        &self.client
    }

    /// The store the request-stage hook reads from.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// The refresher the response-stage hook calls.
    #[must_use]
    pub const fn refresher(&self) -> &Arc<dyn CredentialRefresher> {
        &self.refresher
    }

    /// Returns `true` while the hooks are installed.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.hooks.is_empty()
    }

    /// Ejects both hooks. Calls already in flight are not affected.
    ///
    /// Detaching twice is a no-op.
    pub fn detach(&mut self) {
        if self.hooks.is_empty() {
            return;
        }
        self.client.swap(&self.hooks, Vec::new());
        self.hooks.clear();
        debug!("Bearer hooks detached");
    }

    /// Re-installs the hooks with new dependencies.
    ///
    /// Does nothing and returns `false` when the hooks are installed and both
    /// `store` and `refresher` are the ones already in use. Otherwise the old
    /// hooks, if any, are replaced atomically and `true` is returned: every
    /// call starting afterwards sees only the new pair.
    pub fn rebind(
        &mut self,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn CredentialRefresher>,
    ) -> bool {
        if self.is_attached()
            && Arc::ptr_eq(&self.store, &store)
            && Arc::ptr_eq(&self.refresher, &refresher)
        {
            return false;
        }

        self.hooks = self.client.swap(&self.hooks, hooks_for(&store, &refresher));
        self.store = store;
        self.refresher = refresher;
        debug!("Bearer hooks rebound");
        true
    }
}

impl Drop for AuthInterceptor {
    fn drop(&mut self) {
        self.detach();
    }
}

fn hooks_for(
    store: &Arc<dyn CredentialStore>,
    refresher: &Arc<dyn CredentialRefresher>,
) -> Vec<(Stage, Arc<dyn Middleware>)> {
    let request: Arc<dyn Middleware> = Arc::new(BearerHeader::new(Arc::clone(store)));
    let response: Arc<dyn Middleware> = Arc::new(RefreshOnForbidden::new(Arc::clone(refresher)));
    vec![(Stage::Request, request), (Stage::Response, response)]
}
