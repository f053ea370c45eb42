//! A shared HTTP client whose middleware can be installed and ejected at runtime.
//!
//! [`reqwest_middleware::ClientWithMiddleware`] fixes its middleware stack when
//! it is built. [`SharedClient`] instead keeps a registry of hooks and reads it
//! when a call is sent, so hooks can come and go while the client is in use.
//! A request builder created before a hook was ejected no longer runs it.
//!
//! Hooks belong to a [`Stage`]. The chain for a call is every response-stage
//! hook in installation order, then every request-stage hook in installation
//! order, then the transport. Request-stage hooks therefore see the request
//! last before it is sent (including any retry a response-stage hook issues),
//! and response-stage hooks see the outcome first.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use http::Extensions;
use log::debug;
use reqwest::{IntoUrl, Method, Request, Response};
use reqwest_middleware::{ClientWithMiddleware, Middleware, Next, RequestBuilder};

use authrelay_common::AuthConfig;

use crate::error::AuthError;

/// Where in the chain a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Runs just before the transport; sees and may rewrite outgoing requests.
    Request,
    /// Runs outermost; sees the outcome of everything below it.
    Response,
}

/// Handle returned by [`SharedClient::install`], used to eject the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId {
    stage: Stage,
    seq: u64,
}

impl HookId {
    /// The stage the hook was installed at.
    #[must_use]
    pub const fn stage(self) -> Stage {
        self.stage
    }
}

#[derive(Default)]
struct Registry {
    request: BTreeMap<u64, Arc<dyn Middleware>>,
    response: BTreeMap<u64, Arc<dyn Middleware>>,
}

impl Registry {
    fn stage(&self, stage: Stage) -> &BTreeMap<u64, Arc<dyn Middleware>> {
        match stage {
            Stage::Request => &self.request,
            Stage::Response => &self.response,
        }
    }

    fn stage_mut(&mut self, stage: Stage) -> &mut BTreeMap<u64, Arc<dyn Middleware>> {
        match stage {
            Stage::Request => &mut self.request,
            Stage::Response => &mut self.response,
        }
    }

    fn chain(&self) -> Vec<Arc<dyn Middleware>> {
        self.response
            .values()
            .chain(self.request.values())
            .cloned()
            .collect()
    }
}

type SharedRegistry = Arc<RwLock<Registry>>;

// Registry updates are single map operations; a poisoned lock still holds
// a consistent registry.
fn read_registry(registry: &RwLock<Registry>) -> RwLockReadGuard<'_, Registry> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

/// The only middleware of the client handed out by [`SharedClient::request`].
///
/// Takes the chain installed at the moment the call is sent and runs the call
/// through it.
struct LiveHooks {
    http: reqwest::Client,
    registry: SharedRegistry,
}

#[async_trait]
impl Middleware for LiveHooks {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        _next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let chain = read_registry(&self.registry).chain();
        ClientWithMiddleware::new(self.http.clone(), chain)
            .execute_with_extensions(req, extensions)
            .await
    }
}

struct Inner {
    http: reqwest::Client,
    live: ClientWithMiddleware,
    registry: SharedRegistry,
    next_seq: AtomicU64,
}

/// An HTTP client shared by every part of an application.
///
/// Cloning is cheap and every clone refers to the same client: hooks installed
/// through one clone apply to calls made through all of them.
///
/// # Examples
///
/// ```no_run
/// use authrelay_client::SharedClient;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = SharedClient::new(reqwest::Client::new());
/// let response = client.get("https://api.example.com/users").send().await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SharedClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for SharedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedClient")
            .field("request_hooks", &self.hook_count(Stage::Request))
            .field("response_hooks", &self.hook_count(Stage::Response))
            .finish_non_exhaustive()
    }
}

impl Default for SharedClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl SharedClient {
    /// Wraps an existing transport. No hooks are installed.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        let registry = SharedRegistry::default();
        let live_hooks: Arc<dyn Middleware> = Arc::new(LiveHooks {
            http: http.clone(),
            registry: Arc::clone(&registry),
        });
        Self {
            inner: Arc::new(Inner {
                live: ClientWithMiddleware::new(http.clone(), vec![live_hooks]),
                http,
                registry,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Builds the transport from `config`.
    ///
    /// `timeout_seconds` of `None` means no timeout (useful for slow
    /// endpoints or long-running requests). The cookie store is enabled when
    /// `send_cookies` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let mut builder = reqwest::Client::builder().cookie_store(config.send_cookies);
        if let Some(timeout) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        Ok(Self::new(builder.build()?))
    }

    /// The raw transport, bypassing every hook.
    ///
    /// Clones of the returned client share its connection pool and cookie
    /// store.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Returns `true` if both handles refer to the same client.
    #[must_use]
    pub fn same_client(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Installs a hook at `stage`.
    pub fn install(&self, stage: Stage, hook: Arc<dyn Middleware>) -> HookId {
        let id = self.allocate(stage);
        self.write().stage_mut(stage).insert(id.seq, hook);
        debug!("Installed {stage:?}-stage hook #{}", id.seq);
        id
    }

    /// Ejects a hook. Returns `false` if it was not installed.
    pub fn eject(&self, id: HookId) -> bool {
        let removed = self.write().stage_mut(id.stage).remove(&id.seq).is_some();
        if removed {
            debug!("Ejected {:?}-stage hook #{}", id.stage, id.seq);
        }
        removed
    }

    /// Ejects `old` and installs `new` under a single lock.
    ///
    /// A call already in flight keeps the chain it started with; a call
    /// started afterwards sees only `new`. No call ever observes a mix.
    /// Returns the ids of the new hooks, in the order given.
    pub fn swap(&self, old: &[HookId], new: Vec<(Stage, Arc<dyn Middleware>)>) -> Vec<HookId> {
        let ids: Vec<HookId> = new.iter().map(|(stage, _)| self.allocate(*stage)).collect();

        let mut registry = self.write();
        for id in old {
            registry.stage_mut(id.stage).remove(&id.seq);
        }
        for (id, (stage, hook)) in ids.iter().zip(new) {
            registry.stage_mut(stage).insert(id.seq, hook);
        }
        drop(registry);

        debug!("Swapped {} hook(s) for {}", old.len(), ids.len());
        ids
    }

    /// Number of hooks installed at `stage`.
    #[must_use]
    pub fn hook_count(&self, stage: Stage) -> usize {
        self.read().stage(stage).len()
    }

    /// A client with the currently installed hooks.
    ///
    /// The returned client is frozen: later installs and ejects do not
    /// affect it.
    #[must_use]
    pub fn snapshot(&self) -> ClientWithMiddleware {
        let chain = self.read().chain();
        ClientWithMiddleware::new(self.inner.http.clone(), chain)
    }

    /// Starts building a request.
    ///
    /// The hooks that run are the ones installed when the request is sent,
    /// not when the builder is created.
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.inner.live.request(method, url)
    }

    /// Convenience method to make a `GET` request to a URL.
    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Convenience method to make a `POST` request to a URL.
    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Convenience method to make a `PUT` request to a URL.
    pub fn put<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Convenience method to make a `PATCH` request to a URL.
    pub fn patch<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Convenience method to make a `DELETE` request to a URL.
    pub fn delete<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Sends a prepared request through the installed hooks.
    ///
    /// # Errors
    ///
    /// Returns whatever the transport or a hook fails with.
    pub async fn execute(&self, request: Request) -> reqwest_middleware::Result<Response> {
        self.inner.live.execute(request).await
    }

    fn allocate(&self, stage: Stage) -> HookId {
        HookId {
            stage,
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        read_registry(&self.inner.registry)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    type Journal = Arc<Mutex<Vec<&'static str>>>;

    struct Record {
        name: &'static str,
        journal: Journal,
    }

    #[async_trait]
    impl Middleware for Record {
        async fn handle(
            &self,
            req: Request,
            extensions: &mut Extensions,
            next: Next<'_>,
        ) -> reqwest_middleware::Result<Response> {
            self.journal.lock().unwrap().push(self.name);
            next.run(req, extensions).await
        }
    }

    struct Tag(&'static str);

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(
            &self,
            mut req: Request,
            extensions: &mut Extensions,
            next: Next<'_>,
        ) -> reqwest_middleware::Result<Response> {
            req.headers_mut()
                .insert("x-tag", http::HeaderValue::from_static(self.0));
            next.run(req, extensions).await
        }
    }

    fn record(name: &'static str, journal: &Journal) -> Arc<dyn Middleware> {
        Arc::new(Record {
            name,
            journal: Arc::clone(journal),
        })
    }

    async fn ok_server() -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        mock_server
    }

    #[test]
    fn test_install_and_eject() {
        let client = SharedClient::default();
        let journal = Journal::default();

        let request_hook = client.install(Stage::Request, record("a", &journal));
        let response_hook = client.install(Stage::Response, record("b", &journal));
        assert_eq!(request_hook.stage(), Stage::Request);
        assert_eq!(response_hook.stage(), Stage::Response);
        assert_eq!(client.hook_count(Stage::Request), 1);
        assert_eq!(client.hook_count(Stage::Response), 1);

        assert!(client.eject(request_hook));
        assert!(!client.eject(request_hook));
        assert_eq!(client.hook_count(Stage::Request), 0);
        assert_eq!(client.hook_count(Stage::Response), 1);
    }

    #[test]
    fn test_clones_share_registry() {
        let client = SharedClient::default();
        let other = client.clone();
        let journal = Journal::default();

        let id = other.install(Stage::Request, record("a", &journal));
        assert!(client.same_client(&other));
        assert_eq!(client.hook_count(Stage::Request), 1);
        assert!(client.eject(id));
        assert_eq!(other.hook_count(Stage::Request), 0);

        assert!(!client.same_client(&SharedClient::default()));
    }

    #[test]
    fn test_swap_replaces_hooks() {
        let client = SharedClient::default();
        let journal = Journal::default();

        let old = vec![
            client.install(Stage::Request, record("a", &journal)),
            client.install(Stage::Response, record("b", &journal)),
        ];
        let new = client.swap(
            &old,
            vec![
                (Stage::Request, record("c", &journal)),
                (Stage::Response, record("d", &journal)),
            ],
        );

        assert_eq!(new.len(), 2);
        assert_eq!(new[0].stage(), Stage::Request);
        assert_eq!(new[1].stage(), Stage::Response);
        assert!(old.iter().all(|id| !new.contains(id)));
        assert_eq!(client.hook_count(Stage::Request), 1);
        assert_eq!(client.hook_count(Stage::Response), 1);
        assert!(!client.eject(old[0]));
        assert!(client.eject(new[0]));
    }

    #[tokio::test]
    async fn test_response_hooks_run_before_request_hooks() {
        let mock_server = ok_server().await;
        let client = SharedClient::default();
        let journal = Journal::default();

        client.install(Stage::Request, record("request-1", &journal));
        client.install(Stage::Response, record("response-1", &journal));
        client.install(Stage::Request, record("request-2", &journal));
        client.install(Stage::Response, record("response-2", &journal));

        let response = client
            .get(format!("{}/ping", mock_server.uri()))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        assert_eq!(
            *journal.lock().unwrap(),
            vec!["response-1", "response-2", "request-1", "request-2"]
        );
    }

    #[tokio::test]
    async fn test_snapshot_is_frozen() {
        let mock_server = ok_server().await;
        let client = SharedClient::default();
        let journal = Journal::default();

        let id = client.install(Stage::Request, record("old", &journal));
        let frozen = client.snapshot();
        client.swap(&[id], vec![(Stage::Request, record("new", &journal))]);

        frozen
            .get(format!("{}/ping", mock_server.uri()))
            .send()
            .await
            .unwrap();
        client
            .get(format!("{}/ping", mock_server.uri()))
            .send()
            .await
            .unwrap();

        assert_eq!(*journal.lock().unwrap(), vec!["old", "new"]);
    }

    #[tokio::test]
    async fn test_ejected_hook_no_longer_runs() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("x-tag", "on"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let client = SharedClient::default();
        let id = client.install(Stage::Request, Arc::new(Tag("on")));
        let url = format!("{}/ping", mock_server.uri());

        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 200);

        client.eject(id);
        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 204);
    }

    #[tokio::test]
    async fn test_builder_sees_hooks_installed_at_send_time() {
        let mock_server = ok_server().await;
        let client = SharedClient::default();
        let journal = Journal::default();
        let url = format!("{}/ping", mock_server.uri());

        let id = client.install(Stage::Request, record("old", &journal));
        let early = client.get(&url);
        let swapped = client.swap(&[id], vec![(Stage::Request, record("new", &journal))]);
        early.send().await.unwrap();

        let late = client.get(&url);
        client.swap(&swapped, Vec::new());
        late.send().await.unwrap();

        assert_eq!(*journal.lock().unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn test_execute_prepared_request() {
        let mock_server = ok_server().await;
        let client = SharedClient::default();
        let journal = Journal::default();
        client.install(Stage::Request, record("seen", &journal));

        let request = client
            .http()
            .get(format!("{}/ping", mock_server.uri()))
            .build()
            .unwrap();
        let response = client.execute(request).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(*journal.lock().unwrap(), vec!["seen"]);
    }

    #[test]
    fn test_from_config() {
        let config = AuthConfig::new("https://api.example.com").with_timeout_seconds(None);
        let client = SharedClient::from_config(&config).unwrap();
        assert_eq!(client.hook_count(Stage::Request), 0);
        assert_eq!(client.hook_count(Stage::Response), 0);
    }
}
