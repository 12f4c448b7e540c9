//! The immutable request value and its builder.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use http::uri::Scheme;
use http::{Method, Uri};

use crate::body::RequestBody;
use crate::cache_control::CacheControl;
use crate::ext::{MethodExt, UriExt};
use crate::headers::{Headers, HeadersBuilder};
use crate::Error;

/// An HTTP request. Immutable; a request with a byte-backed (or absent)
/// body can be transmitted any number of times.
#[derive(Clone)]
pub struct Request {
    url: Uri,
    method: Method,
    headers: Headers,
    body: Option<Arc<RequestBody>>,
    tag: Option<Arc<dyn Any + Send + Sync>>,
    // Parsed on first access. Shared between clones since the headers are
    // identical.
    cache_control: Arc<OnceLock<CacheControl>>,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    /// Shorthand for a GET of `url`.
    pub fn get<T>(url: T) -> RequestBuilder
    where
        Uri: TryFrom<T>,
        <Uri as TryFrom<T>>::Error: fmt::Display,
    {
        RequestBuilder::new().url(url)
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The last header value for `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_deref()
    }

    pub(crate) fn body_arc(&self) -> Option<&Arc<RequestBody>> {
        self.body.as_ref()
    }

    /// The opaque tag attached at build time, if any.
    pub fn tag(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.tag.as_ref()
    }

    pub fn is_https(&self) -> bool {
        self.url.is_https()
    }

    /// The cache directives of this request, parsed from its headers on
    /// first access.
    pub fn cache_control(&self) -> &CacheControl {
        self.cache_control
            .get_or_init(|| CacheControl::parse(&self.headers))
    }

    /// A builder seeded from this request.
    pub fn new_builder(&self) -> RequestBuilder {
        RequestBuilder {
            url: Some(self.url.clone()),
            method: self.method.clone(),
            headers: self.headers.new_builder(),
            body: self.body.clone(),
            tag: self.tag.clone(),
            error: None,
        }
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        fn same_arc<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
        }
        self.url == other.url
            && self.method == other.method
            && self.headers == other.headers
            && same_arc(&self.body, &other.body)
            && same_arc(&self.tag, &other.tag)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers.len())
            .field("body", &self.body)
            .finish()
    }
}

/// Accumulates request state and produces an immutable [`Request`].
///
/// Validation happens in [`build()`]: url scheme, method/body agreement and
/// header syntax errors are all reported there so construction can stay
/// fluent.
///
/// [`build()`]: RequestBuilder::build
pub struct RequestBuilder {
    url: Option<Uri>,
    method: Method,
    headers: HeadersBuilder,
    body: Option<Arc<RequestBody>>,
    tag: Option<Arc<dyn Any + Send + Sync>>,
    error: Option<Error>,
}

impl RequestBuilder {
    pub fn new() -> RequestBuilder {
        RequestBuilder {
            url: None,
            method: Method::GET,
            headers: Headers::builder(),
            body: None,
            tag: None,
            error: None,
        }
    }

    /// Set the target url.
    ///
    /// Only `http` and `https` urls execute. A `ws`/`wss` url is silently
    /// rewritten to `http`/`https` for the plain request path; other
    /// schemes fail at `build()`.
    pub fn url<T>(mut self, url: T) -> Self
    where
        Uri: TryFrom<T>,
        <Uri as TryFrom<T>>::Error: fmt::Display,
    {
        let uri = match Uri::try_from(url) {
            Ok(v) => v,
            Err(e) => {
                self.error.get_or_insert(Error::BadUrl(e.to_string()));
                return self;
            }
        };
        match normalize_scheme(uri) {
            Ok(uri) => self.url = Some(uri),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Set the method and body together, validating agreement at build.
    ///
    /// A DELETE without an explicit body is given a zero-length body so
    /// the wire carries `Content-Length: 0`, matching what most servers
    /// observe from other clients.
    pub fn method(mut self, method: &str, body: Option<RequestBody>) -> Self {
        let method = match Method::from_bytes(method.as_bytes()) {
            Ok(m) if !method.is_empty() => m,
            _ => {
                self.error
                    .get_or_insert(Error::InvalidMethod(method.to_string()));
                return self;
            }
        };
        let body = match (&method, body) {
            (m, None) if *m == Method::DELETE => Some(RequestBody::empty()),
            (_, b) => b,
        };
        self.method = method;
        self.body = body.map(Arc::new);
        self
    }

    pub fn get(self) -> Self {
        self.method("GET", None)
    }

    pub fn head(self) -> Self {
        self.method("HEAD", None)
    }

    pub fn post(self, body: RequestBody) -> Self {
        self.method("POST", Some(body))
    }

    pub fn put(self, body: RequestBody) -> Self {
        self.method("PUT", Some(body))
    }

    pub fn patch(self, body: RequestBody) -> Self {
        self.method("PATCH", Some(body))
    }

    pub fn delete(self, body: Option<RequestBody>) -> Self {
        self.method("DELETE", body)
    }

    /// Set a header, replacing any prior values for the name.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers = self.headers.set(name, value);
        self
    }

    /// Add a header without removing prior values for the name.
    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers = self.headers.add(name, value);
        self
    }

    /// Remove all headers with this name.
    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers = self.headers.remove_all(name);
        self
    }

    /// Replace all headers.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers.new_builder();
        self
    }

    /// Set this request's `Cache-Control` header, replacing any present.
    /// An empty directive set removes the header entirely.
    pub fn cache_control(mut self, cache_control: CacheControl) -> Self {
        let serialized = cache_control.to_string();
        self.headers = if serialized.is_empty() {
            self.headers.remove_all("Cache-Control")
        } else {
            self.headers.set("Cache-Control", &*serialized)
        };
        self
    }

    /// Attach an opaque tag, consumed by value. To cancel calls by tag,
    /// use [`tag_arc`](RequestBuilder::tag_arc) and keep a clone of the
    /// handle; see [`Client::cancel_tagged`](crate::Client::cancel_tagged).
    pub fn tag<T: Any + Send + Sync>(self, tag: T) -> Self {
        self.tag_arc(Arc::new(tag))
    }

    /// Attach a shared tag handle. Tag comparisons are by handle
    /// identity, not value.
    pub fn tag_arc(mut self, tag: Arc<dyn Any + Send + Sync>) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Validate and produce the request.
    pub fn build(self) -> Result<Request, Error> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let url = self.url.ok_or(Error::MissingUrl)?;
        let headers = self.headers.build()?;

        if self.body.is_some() && !self.method.permits_request_body() {
            return Err(Error::MethodForbidsBody(self.method));
        }
        if self.body.is_none() && self.method.requires_request_body() {
            return Err(Error::MethodRequiresBody(self.method));
        }

        Ok(Request {
            url,
            method: self.method,
            headers,
            body: self.body,
            tag: self.tag,
            cache_control: Arc::new(OnceLock::new()),
        })
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        RequestBuilder::new()
    }
}

/// Accept http/https, rewrite ws/wss, reject the rest.
fn normalize_scheme(uri: Uri) -> Result<Uri, Error> {
    let scheme = match uri.scheme_str() {
        Some(s) => s,
        None => return Err(Error::BadUrl(format!("url has no scheme: {}", uri))),
    };
    let replacement = match scheme {
        "http" | "https" => return Ok(uri),
        "ws" => Scheme::HTTP,
        "wss" => Scheme::HTTPS,
        other => return Err(Error::UnsupportedScheme(other.to_string())),
    };
    let mut parts = uri.into_parts();
    parts.scheme = Some(replacement);
    Uri::from_parts(parts).map_err(|e| Error::BadUrl(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_round_trip_is_value_equal() {
        let request = Request::get("http://x.test/a")
            .header("x-token", "t1")
            .add_header("x-token", "t2")
            .tag("trace-7")
            .build()
            .unwrap();

        let again = request.new_builder().build().unwrap();
        assert_eq!(request, again);
    }

    #[test]
    fn ws_scheme_is_normalized() {
        let request = Request::get("ws://x.test/chat").build().unwrap();
        assert_eq!(request.url().scheme_str(), Some("http"));

        let request = Request::get("wss://x.test/chat").build().unwrap();
        assert_eq!(request.url().scheme_str(), Some("https"));
        assert!(request.is_https());
    }

    #[test]
    fn unsupported_scheme_rejected() {
        let err = Request::get("ftp://x.test/f").build().unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme(s) if s == "ftp"));
    }

    #[test]
    fn get_with_body_rejected() {
        let err = Request::builder()
            .url("http://x.test/")
            .method("GET", Some(RequestBody::from("nope")))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MethodForbidsBody(m) if m == Method::GET));
    }

    #[test]
    fn post_without_body_rejected() {
        let err = Request::builder()
            .url("http://x.test/")
            .method("POST", None)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MethodRequiresBody(m) if m == Method::POST));
    }

    #[test]
    fn delete_gets_zero_length_sentinel() {
        let request = Request::builder()
            .url("http://x.test/r")
            .delete(None)
            .build()
            .unwrap();
        let body = request.body().unwrap();
        assert_eq!(body.content_length(), Some(0));
    }

    #[test]
    fn cache_control_header_round_trip() {
        let cc = CacheControl::builder().no_cache().build();
        let request = Request::get("http://x.test/")
            .cache_control(cc.clone())
            .build()
            .unwrap();
        assert_eq!(request.header("cache-control"), Some("no-cache"));
        assert_eq!(*request.cache_control(), cc);

        // Empty directives remove the header.
        let request = request
            .new_builder()
            .cache_control(CacheControl::default())
            .build()
            .unwrap();
        assert_eq!(request.header("cache-control"), None);
    }

    #[test]
    fn missing_url_fails_build() {
        let err = Request::builder().build().unwrap_err();
        assert!(matches!(err, Error::MissingUrl));
    }

    #[test]
    fn bad_url_is_remembered() {
        let err = Request::get("http://exa mple/").build().unwrap_err();
        assert!(matches!(err, Error::BadUrl(_)));
    }
}
