//! Client configuration.
//!
//! Configuration can be built in code or loaded from TOML.
//!
//! ## Example Configuration
//!
//! ```toml
//! base_url = "https://api.example.com"
//! refresh_url = "/refresh"
//! refresh_method = "get"
//! token_field = "accessToken"
//! timeout_seconds = 30
//! send_cookies = true
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use log::debug;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors raised while loading or validating an [`AuthConfig`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for [`AuthConfig`].
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A configured URL does not parse.
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        /// The offending URL as written in the configuration.
        url: String,
        /// The underlying parse failure.
        #[source]
        source: url::ParseError,
    },

    /// Any other inconsistent setting.
    #[error("Configuration error: {0}")]
    Invalid(String),
}

/// HTTP method used to call the refresh endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMethod {
    /// `GET` with no body. Session cookies identify the caller.
    #[default]
    Get,
    /// `POST` with an empty body.
    Post,
}

impl RefreshMethod {
    /// The method name as it appears on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for RefreshMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for the authenticated client and its refresh endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Base URL that relative request and refresh URLs resolve against.
    pub base_url: Option<String>,
    /// Refresh endpoint, absolute or relative to `base_url`.
    pub refresh_url: String,
    /// Credential to seed the store with.
    ///
    /// Will not be serialized to prevent accidental exposure.
    #[serde(skip_serializing)]
    pub access_token: Option<SecretString>,
    /// Request timeout in seconds. `None` disables the timeout.
    pub timeout_seconds: Option<u64>,
    /// Method used for the refresh call.
    pub refresh_method: RefreshMethod,
    /// JSON field of the refresh response that carries the new token.
    pub token_field: String,
    /// Whether the underlying client keeps and sends cookies.
    ///
    /// Refresh endpoints commonly identify the session through an
    /// HTTP-only cookie set at login.
    pub send_cookies: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            refresh_url: "/refresh".to_string(),
            access_token: None,
            timeout_seconds: Some(30),
            refresh_method: RefreshMethod::Get,
            token_field: "accessToken".to_string(),
            send_cookies: true,
        }
    }
}

impl AuthConfig {
    /// Creates a configuration for a service rooted at `base_url`.
    ///
    /// # Examples
    ///
    /// ```
    /// use authrelay_common::AuthConfig;
    ///
    /// let config = AuthConfig::new("https://api.example.com")
    ///     .with_refresh_url("/auth/refresh")
    ///     .with_access_token("tok1");
    ///
    /// assert_eq!(
    ///     config.refresh_endpoint().unwrap().as_str(),
    ///     "https://api.example.com/auth/refresh"
    /// );
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Default::default()
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the refresh endpoint.
    #[must_use]
    pub fn with_refresh_url(mut self, refresh_url: impl Into<String>) -> Self {
        self.refresh_url = refresh_url.into();
        self
    }

    /// Sets the initial access token.
    ///
    /// The token is stored securely using `SecretString`.
    #[must_use]
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(SecretString::from(access_token.into()));
        self
    }

    /// Sets the request timeout. `None` means no timeout.
    #[must_use]
    pub const fn with_timeout_seconds(mut self, timeout_seconds: Option<u64>) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Sets the refresh method.
    #[must_use]
    pub const fn with_refresh_method(mut self, refresh_method: RefreshMethod) -> Self {
        self.refresh_method = refresh_method;
        self
    }

    /// Sets the JSON field holding the refreshed token.
    #[must_use]
    pub fn with_token_field(mut self, token_field: impl Into<String>) -> Self {
        self.token_field = token_field.into();
        self
    }

    /// Enables or disables the cookie store.
    #[must_use]
    pub const fn with_send_cookies(mut self, send_cookies: bool) -> Self {
        self.send_cookies = send_cookies;
        self
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML or fails
    /// [`validate`](Self::validate).
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - Deserialization fails
    /// - Validation fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading auth configuration from {}", path.display());
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Checks that URLs parse and required fields are set.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(base_url) = &self.base_url {
            parse_url(base_url)?;
        }

        if self.token_field.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "token_field must not be empty".to_string(),
            ));
        }

        self.refresh_endpoint()?;
        Ok(())
    }

    /// Resolves the refresh endpoint against `base_url` when it is relative.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL does not parse, or is relative while no
    /// base URL is configured.
    pub fn refresh_endpoint(&self) -> Result<Url, ConfigError> {
        match Url::parse(&self.refresh_url) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base_url = self.base_url.as_deref().ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "refresh_url '{}' is relative but no base_url is set",
                        self.refresh_url
                    ))
                })?;
                parse_url(base_url)?
                    .join(&self.refresh_url)
                    .map_err(|source| ConfigError::InvalidUrl {
                        url: self.refresh_url.clone(),
                        source,
                    })
            }
            Err(source) => Err(ConfigError::InvalidUrl {
                url: self.refresh_url.clone(),
                source,
            }),
        }
    }
}

fn parse_url(url: &str) -> Result<Url, ConfigError> {
    Url::parse(url).map_err(|source| ConfigError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}
