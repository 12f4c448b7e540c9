//! Client-side HTTP/1.1 request execution engine.
//!
//! An immutable [`Request`] is bound to a [`Client`] as a one-shot
//! [`Call`], driven through an ordered pipeline of interceptors that
//! implement the protocol semantics, and answered with a [`Response`]
//! whose body streams off the connection.
//!
//! The pipeline, outermost first:
//!
//! * user application interceptors observe the logical request;
//! * retry/follow-up handling absorbs recoverable failures and chases
//!   redirects, auth challenges, and 408/503/421 retries;
//! * the bridge fills in protocol headers, carries cookies, and makes
//!   gzip transfer transparent;
//! * the cache serves, validates, or stores responses per RFC 7234;
//! * connect acquires a pooled or fresh connection;
//! * user network interceptors observe the exact wire request;
//! * the terminal stage performs one request/response exchange.
//!
//! # Example
//!
//! ```no_run
//! use callwire::{Client, Request};
//!
//! # fn main() -> Result<(), callwire::Error> {
//! let client = Client::new();
//! let request = Request::get("http://example.test/hello").build()?;
//!
//! let response = client.call(request).execute()?;
//! assert!(response.is_successful());
//! let text = response.into_body().expect("body").string()?;
//! println!("{}", text);
//! # Ok(())
//! # }
//! ```
//!
//! Asynchronous execution goes through [`Call::enqueue`] and the
//! [`Dispatcher`], which bounds concurrent calls globally and per host.
//!
//! # The http crate
//!
//! Based on the [http crate](https://crates.io/crates/http) - a unified
//! HTTP API for Rust. Urls are [`http::Uri`], methods [`http::Method`],
//! statuses [`http::StatusCode`].
//!
//! # Scope
//!
//! The engine speaks HTTP/1.1 over plain TCP. TLS sockets, HTTP/2
//! framing, on-disk cache storage and cookie persistence are external
//! collaborators behind the [`CacheStore`], [`CookieJar`] and [`Dns`]
//! interfaces.

mod auth;
mod body;
mod cache;
mod cache_control;
mod call;
mod chain;
mod client;
mod connection;
mod cookie;
mod dispatcher;
mod error;
mod ext;
mod headers;
mod listener;
mod pipeline;
mod request;
mod response;
mod util;

#[cfg(test)]
mod test;

pub use auth::{basic_credentials, Authenticator, NoAuthentication};
pub use body::{RequestBody, ResponseBody};
pub use cache::{Cache, CacheRecord, CacheStats, CacheStore, MemoryCacheStore};
pub use cache_control::{CacheControl, CacheControlBuilder};
pub use call::{Call, Callback};
pub use chain::{Chain, Interceptor};
pub use client::{Client, ClientBuilder, Protocol};
pub use connection::{Address, ConnectionPool, Dns, SystemDns};
pub use cookie::{Cookie, CookieJar, MemoryCookieJar, NoCookies};
pub use dispatcher::{Dispatcher, Executor};
pub use error::Error;
pub use headers::{Headers, HeadersBuilder};
pub use listener::{EventListener, EventListenerFactory};
pub use request::{Request, RequestBuilder};
pub use response::{Challenge, Response, ResponseBuilder};

pub use http;
