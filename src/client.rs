//! Client configuration.
//!
//! A [`Client`] is an immutable bag of configuration plus the shared
//! resources (dispatcher, connection pool, cache) that calls created from
//! it use. Clients are cheap to clone; clones share those resources.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Authenticator, NoAuthentication};
use crate::cache::Cache;
use crate::call::Call;
use crate::chain::Interceptor;
use crate::connection::{ConnectionPool, Dns, SystemDns};
use crate::cookie::{CookieJar, NoCookies};
use crate::dispatcher::Dispatcher;
use crate::listener::{noop_factory, EventListenerFactory};
use crate::request::Request;

/// Application-layer protocols the engine can speak. HTTP/2 and beyond
/// require an external framing codec and are not available in-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http11,
}

pub(crate) struct ClientRef {
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) network_interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) connection_pool: Arc<ConnectionPool>,
    pub(crate) cache: Option<Arc<Cache>>,
    pub(crate) cookie_jar: Arc<dyn CookieJar>,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) proxy_authenticator: Arc<dyn Authenticator>,
    pub(crate) follow_redirects: bool,
    pub(crate) follow_ssl_redirects: bool,
    pub(crate) retry_on_connection_failure: bool,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) protocols: Vec<Protocol>,
    pub(crate) dns: Arc<dyn Dns>,
    pub(crate) event_listener_factory: EventListenerFactory,
}

/// The request execution engine's entry point.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientRef>,
}

impl Client {
    /// A client with default configuration.
    pub fn new() -> Client {
        Client::builder().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Bind `request` into a one-shot [`Call`].
    pub fn call(&self, request: Request) -> Call {
        Call::new(self.clone(), request, false)
    }

    /// A call whose pipeline skips the network interceptors, as used for
    /// protocol upgrades.
    pub fn websocket_call(&self, request: Request) -> Call {
        Call::new(self.clone(), request, true)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn connection_pool(&self) -> &Arc<ConnectionPool> {
        &self.inner.connection_pool
    }

    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.inner.cache.as_ref()
    }

    pub fn follow_redirects(&self) -> bool {
        self.inner.follow_redirects
    }

    pub fn follow_ssl_redirects(&self) -> bool {
        self.inner.follow_ssl_redirects
    }

    pub fn retry_on_connection_failure(&self) -> bool {
        self.inner.retry_on_connection_failure
    }

    pub fn connect_timeout(&self) -> Duration {
        self.inner.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.inner.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.inner.write_timeout
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.inner.protocols
    }

    /// Cancel every call registered with this client's dispatcher,
    /// queued or in flight.
    pub fn cancel_all(&self) {
        self.inner.dispatcher.cancel_all();
    }

    /// Cancel the calls whose request carries `tag` (by handle identity;
    /// see [`RequestBuilder::tag_arc`](crate::RequestBuilder::tag_arc)).
    pub fn cancel_tagged(&self, tag: &Arc<dyn std::any::Any + Send + Sync>) {
        let dispatcher = &self.inner.dispatcher;
        for call in dispatcher
            .queued_calls()
            .into_iter()
            .chain(dispatcher.running_calls())
        {
            if call.tag_matches(tag) {
                call.cancel();
            }
        }
    }

    /// A builder sharing this client's dispatcher, pool and cache, for
    /// derived clients with adjusted options.
    pub fn new_builder(&self) -> ClientBuilder {
        ClientBuilder {
            interceptors: self.inner.interceptors.clone(),
            network_interceptors: self.inner.network_interceptors.clone(),
            dispatcher: Some(self.inner.dispatcher.clone()),
            connection_pool: Some(self.inner.connection_pool.clone()),
            cache: self.inner.cache.clone(),
            cookie_jar: self.inner.cookie_jar.clone(),
            authenticator: self.inner.authenticator.clone(),
            proxy_authenticator: self.inner.proxy_authenticator.clone(),
            follow_redirects: self.inner.follow_redirects,
            follow_ssl_redirects: self.inner.follow_ssl_redirects,
            retry_on_connection_failure: self.inner.retry_on_connection_failure,
            connect_timeout: self.inner.connect_timeout,
            read_timeout: self.inner.read_timeout,
            write_timeout: self.inner.write_timeout,
            protocols: self.inner.protocols.clone(),
            dns: self.inner.dns.clone(),
            event_listener_factory: self.inner.event_listener_factory.clone(),
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}

/// Accumulates client configuration; see the option docs for defaults.
pub struct ClientBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
    network_interceptors: Vec<Arc<dyn Interceptor>>,
    dispatcher: Option<Arc<Dispatcher>>,
    connection_pool: Option<Arc<ConnectionPool>>,
    cache: Option<Arc<Cache>>,
    cookie_jar: Arc<dyn CookieJar>,
    authenticator: Arc<dyn Authenticator>,
    proxy_authenticator: Arc<dyn Authenticator>,
    follow_redirects: bool,
    follow_ssl_redirects: bool,
    retry_on_connection_failure: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    protocols: Vec<Protocol>,
    dns: Arc<dyn Dns>,
    event_listener_factory: EventListenerFactory,
}

impl ClientBuilder {
    pub fn new() -> ClientBuilder {
        ClientBuilder {
            interceptors: Vec::new(),
            network_interceptors: Vec::new(),
            dispatcher: None,
            connection_pool: None,
            cache: None,
            cookie_jar: Arc::new(NoCookies),
            authenticator: Arc::new(NoAuthentication),
            proxy_authenticator: Arc::new(NoAuthentication),
            follow_redirects: true,
            follow_ssl_redirects: true,
            retry_on_connection_failure: true,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            protocols: vec![Protocol::Http11],
            dns: Arc::new(SystemDns),
            event_listener_factory: noop_factory(),
        }
    }

    /// Observe or rewrite the application's logical request/response. Runs
    /// once per call, before any engine stage.
    pub fn add_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Observe or rewrite exactly the bytes that go on the wire. May run
    /// multiple times per call across retries and redirects.
    pub fn add_network_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.network_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn connection_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.connection_pool = Some(pool);
        self
    }

    pub fn cache(mut self, cache: Cache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn cookie_jar(mut self, jar: impl CookieJar + 'static) -> Self {
        self.cookie_jar = Arc::new(jar);
        self
    }

    /// Reacts to 401 challenges from the origin server.
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// Reacts to 407 challenges from a proxy.
    pub fn proxy_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.proxy_authenticator = Arc::new(authenticator);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Whether redirects may change scheme between https and http.
    pub fn follow_ssl_redirects(mut self, follow: bool) -> Self {
        self.follow_ssl_redirects = follow;
        self
    }

    pub fn retry_on_connection_failure(mut self, retry: bool) -> Self {
        self.retry_on_connection_failure = retry;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Protocol preference order. Must not be empty.
    pub fn protocols(mut self, protocols: Vec<Protocol>) -> Self {
        assert!(!protocols.is_empty(), "protocols must not be empty");
        self.protocols = protocols;
        self
    }

    pub fn dns(mut self, dns: impl Dns + 'static) -> Self {
        self.dns = Arc::new(dns);
        self
    }

    pub fn event_listener_factory(mut self, factory: EventListenerFactory) -> Self {
        self.event_listener_factory = factory;
        self
    }

    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(ClientRef {
                interceptors: self.interceptors,
                network_interceptors: self.network_interceptors,
                dispatcher: self.dispatcher.unwrap_or_else(|| Arc::new(Dispatcher::new())),
                connection_pool: self
                    .connection_pool
                    .unwrap_or_else(|| Arc::new(ConnectionPool::default())),
                cache: self.cache,
                cookie_jar: self.cookie_jar,
                authenticator: self.authenticator,
                proxy_authenticator: self.proxy_authenticator,
                follow_redirects: self.follow_redirects,
                follow_ssl_redirects: self.follow_ssl_redirects,
                retry_on_connection_failure: self.retry_on_connection_failure,
                connect_timeout: self.connect_timeout,
                read_timeout: self.read_timeout,
                write_timeout: self.write_timeout,
                protocols: self.protocols,
                dns: self.dns,
                event_listener_factory: self.event_listener_factory,
            }),
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let client = Client::new();
        assert!(client.follow_redirects());
        assert!(client.follow_ssl_redirects());
        assert!(client.retry_on_connection_failure());
        assert_eq!(client.connect_timeout(), Duration::from_secs(10));
        assert_eq!(client.protocols(), [Protocol::Http11]);
        assert!(client.cache().is_none());
    }

    #[test]
    fn derived_client_shares_resources() {
        let client = Client::new();
        let derived = client.new_builder().follow_redirects(false).build();
        assert!(Arc::ptr_eq(client.dispatcher(), derived.dispatcher()));
        assert!(Arc::ptr_eq(client.connection_pool(), derived.connection_pool()));
        assert!(!derived.follow_redirects());
        assert!(client.follow_redirects());
    }

    #[test]
    #[should_panic(expected = "protocols must not be empty")]
    fn empty_protocols_rejected() {
        Client::builder().protocols(Vec::new());
    }
}
