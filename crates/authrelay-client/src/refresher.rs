//! Credential refreshers.
//!
//! A [`CredentialRefresher`] obtains a replacement credential once the server
//! has rejected the current one. [`HttpRefresher`] calls a refresh endpoint
//! that answers with a JSON body such as `{"accessToken": "..."}`, which is
//! the usual shape for cookie-session backed APIs. [`refresher_fn`] adapts any
//! async closure.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Method, Url};

use authrelay_common::{AuthConfig, Credential, CredentialStore, RefreshMethod};

use crate::error::AuthError;

/// Obtains a new credential.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Contacts the credential issuer and returns a fresh credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer cannot be reached or refuses to issue
    /// a credential.
    async fn refresh(&self) -> Result<Credential, AuthError>;
}

/// Refreshes credentials from an HTTP endpoint.
///
/// On success the new credential is written into the store before it is
/// returned, so later requests pick it up without refreshing again.
///
/// The refresh call is made on the raw transport. It never passes through the
/// authentication hooks, so a rejected refresh cannot trigger another refresh.
pub struct HttpRefresher {
    http: reqwest::Client,
    endpoint: Url,
    method: Method,
    token_field: String,
    store: Arc<dyn CredentialStore>,
}

impl fmt::Debug for HttpRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRefresher")
            .field("endpoint", &self.endpoint.as_str())
            .field("method", &self.method)
            .field("token_field", &self.token_field)
            .finish_non_exhaustive()
    }
}

impl HttpRefresher {
    /// Creates a refresher that `GET`s `endpoint` and reads `accessToken`.
    pub fn new(http: reqwest::Client, endpoint: Url, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            http,
            endpoint,
            method: Method::GET,
            token_field: "accessToken".to_string(),
            store,
        }
    }

    /// Creates a refresher from the refresh settings in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh endpoint cannot be resolved.
    pub fn from_config(
        config: &AuthConfig,
        http: reqwest::Client,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, AuthError> {
        Ok(Self::new(http, config.refresh_endpoint()?, store)
            .with_method(method_for(config.refresh_method))
            .with_token_field(config.token_field.clone()))
    }

    /// Sets the HTTP method of the refresh call.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the JSON field the new token is read from.
    #[must_use]
    pub fn with_token_field(mut self, token_field: impl Into<String>) -> Self {
        self.token_field = token_field.into();
        self
    }

    /// The refresh endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialRefresher for HttpRefresher {
    async fn refresh(&self) -> Result<Credential, AuthError> {
        debug!("Refreshing credential via {} {}", self.method, self.endpoint);

        let response = self
            .http
            .request(self.method.clone(), self.endpoint.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|e| {
                warn!("Failed to read refresh error body: {e}");
                String::new()
            });
            return Err(AuthError::RefreshRejected { status, message });
        }

        let body: serde_json::Value = serde_json::from_str(&response.text().await?)?;
        let credential = body
            .get(&self.token_field)
            .and_then(serde_json::Value::as_str)
            .map(Credential::new)
            .filter(|credential| !credential.is_empty())
            .ok_or_else(|| AuthError::MissingToken {
                field: self.token_field.clone(),
            })?;

        self.store.replace(credential.clone());
        debug!("Credential refreshed via {}", self.endpoint);
        Ok(credential)
    }
}

fn method_for(method: RefreshMethod) -> Method {
    match method {
        RefreshMethod::Get => Method::GET,
        RefreshMethod::Post => Method::POST,
    }
}

/// A [`CredentialRefresher`] backed by an async closure.
///
/// Built with [`refresher_fn`].
pub struct FnRefresher<F> {
    refresh: F,
}

/// Wraps an async closure as a [`CredentialRefresher`].
///
/// # Examples
///
/// ```
/// use authrelay_client::{AuthError, CredentialRefresher, refresher_fn};
/// use authrelay_common::Credential;
///
/// # async fn example() -> Result<(), AuthError> {
/// let refresher = refresher_fn(|| async { Ok(Credential::new("tok2")) });
/// assert_eq!(refresher.refresh().await?.expose(), "tok2");
/// # Ok(())
/// # }
/// ```
pub const fn refresher_fn<F, Fut>(refresh: F) -> FnRefresher<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Credential, AuthError>> + Send,
{
    FnRefresher { refresh }
}

#[async_trait]
impl<F, Fut> CredentialRefresher for FnRefresher<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Credential, AuthError>> + Send,
{
    async fn refresh(&self) -> Result<Credential, AuthError> {
        (self.refresh)().await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use authrelay_common::MemoryCredentialStore;
    use reqwest::StatusCode;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn refresher_for(mock_server: &MockServer, store: Arc<dyn CredentialStore>) -> HttpRefresher {
        let endpoint = Url::parse(&format!("{}/refresh", mock_server.uri())).unwrap();
        HttpRefresher::new(reqwest::Client::new(), endpoint, store)
    }

    #[tokio::test]
    async fn test_refresh_updates_store() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "tok2",
                "roles": [2001]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credential("tok1"));
        let refresher = refresher_for(&mock_server, store.clone());

        let credential = refresher.refresh().await.unwrap();
        assert_eq!(credential.expose(), "tok2");
        assert_eq!(store.current().unwrap().expose(), "tok2");
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_string("no session"))
            .mount(&mock_server)
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credential("tok1"));
        let refresher = refresher_for(&mock_server, store.clone());

        let error = refresher.refresh().await.unwrap_err();
        assert!(matches!(
            &error,
            AuthError::RefreshRejected { status, message }
                if *status == StatusCode::UNAUTHORIZED && message == "no session"
        ));
        // A failed refresh leaves the store alone.
        assert_eq!(store.current().unwrap().expose(), "tok1");
    }

    #[tokio::test]
    async fn test_refresh_missing_token() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": ""
            })))
            .mount(&mock_server)
            .await;

        let refresher = refresher_for(&mock_server, Arc::new(MemoryCredentialStore::new()));
        let error = refresher.refresh().await.unwrap_err();
        assert!(matches!(error, AuthError::MissingToken { field } if field == "accessToken"));
    }

    #[tokio::test]
    async fn test_refresh_invalid_json() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&mock_server)
            .await;

        let refresher = refresher_for(&mock_server, Arc::new(MemoryCredentialStore::new()));
        let error = refresher.refresh().await.unwrap_err();
        assert!(matches!(error, AuthError::SerializationError(_)));
    }

    #[tokio::test]
    async fn test_refresh_from_config() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "tok3"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = AuthConfig::new(mock_server.uri())
            .with_refresh_url("/auth/token")
            .with_refresh_method(RefreshMethod::Post)
            .with_token_field("token");
        let store = Arc::new(MemoryCredentialStore::new());
        let refresher =
            HttpRefresher::from_config(&config, reqwest::Client::new(), store.clone()).unwrap();

        assert_eq!(
            refresher.endpoint().as_str(),
            format!("{}/auth/token", mock_server.uri())
        );
        assert_eq!(refresher.refresh().await.unwrap().expose(), "tok3");
        assert_eq!(store.current().unwrap().expose(), "tok3");
    }

    #[test]
    fn test_from_config_rejects_unresolvable_endpoint() {
        let config = AuthConfig::default();
        let result = HttpRefresher::from_config(
            &config,
            reqwest::Client::new(),
            Arc::new(MemoryCredentialStore::new()),
        );
        assert!(matches!(result, Err(AuthError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_refresh_sends_session_cookie() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(204).insert_header("set-cookie", "jwt=session; Path=/"),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/refresh"))
            .and(wiremock::matchers::header("cookie", "jwt=session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "tok2"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .unwrap();
        http.post(format!("{}/login", mock_server.uri()))
            .send()
            .await
            .unwrap();

        let endpoint = Url::parse(&format!("{}/refresh", mock_server.uri())).unwrap();
        let refresher = HttpRefresher::new(http, endpoint, Arc::new(MemoryCredentialStore::new()));
        assert_eq!(refresher.refresh().await.unwrap().expose(), "tok2");
    }

    #[tokio::test]
    async fn test_refresher_fn() {
        let refresher = refresher_fn(|| async { Ok(Credential::new("from-closure")) });
        assert_eq!(refresher.refresh().await.unwrap().expose(), "from-closure");
    }
}
