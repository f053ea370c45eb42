use std::fmt;
use std::sync::{PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};

/// An opaque bearer token.
///
/// The token is held in a [`SecretString`] so it is zeroed on drop and never
/// shows up in `Debug` output. Call [`Credential::expose`] when the raw value
/// is genuinely needed, e.g. to build an `Authorization` header.
///
/// # Examples
///
/// ```
/// use authrelay_common::Credential;
///
/// let credential = Credential::new("tok1");
/// assert_eq!(credential.expose(), "tok1");
/// assert_eq!(format!("{credential:?}"), "Credential([REDACTED])");
/// ```
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    /// Wraps a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    /// Returns the raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Returns `true` if the token is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<SecretString> for Credential {
    fn from(secret: SecretString) -> Self {
        Self(secret)
    }
}

/// Holds the currently known credential.
///
/// Readers (the request-stage hook) only ever call [`current`](Self::current).
/// Writers are whatever obtains new credentials: a login flow, or a
/// credential refresher after a successful refresh round trip.
pub trait CredentialStore: Send + Sync {
    /// The credential to present on the next request, if any.
    fn current(&self) -> Option<Credential>;

    /// Replaces the held credential.
    fn replace(&self, credential: Credential);

    /// Forgets the held credential.
    fn clear(&self);
}

/// A process-local [`CredentialStore`].
///
/// # Examples
///
/// ```
/// use authrelay_common::{CredentialStore, MemoryCredentialStore};
///
/// let store = MemoryCredentialStore::with_credential("tok1");
/// assert_eq!(store.current().map(|c| c.expose().to_owned()), Some("tok1".into()));
///
/// store.replace("tok2".into());
/// assert_eq!(store.current().map(|c| c.expose().to_owned()), Some("tok2".into()));
///
/// store.clear();
/// assert!(store.current().is_none());
/// ```
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `credential`.
    pub fn with_credential(credential: impl Into<Credential>) -> Self {
        Self {
            slot: RwLock::new(Some(credential.into())),
        }
    }
}

// A panic while holding the lock cannot leave an `Option<Credential>` half
// written, so poisoned guards are used as-is.
impl CredentialStore for MemoryCredentialStore {
    fn current(&self) -> Option<Credential> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, credential: Credential) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);
    }

    fn clear(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
