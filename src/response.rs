//! The response value and its builder.

use std::fmt;
use std::sync::OnceLock;

use http::{StatusCode, Version};

use crate::body::ResponseBody;
use crate::cache_control::CacheControl;
use crate::headers::{Headers, HeadersBuilder};
use crate::request::Request;

/// An HTTP response.
///
/// The header portion is immutable. The body is a one-shot stream: read it
/// once, then it is gone, and closing it is what releases the underlying
/// connection. Responses produced by redirects and auth retries hang off
/// [`prior_response`](Response::prior_response) with their bodies stripped.
pub struct Response {
    request: Request,
    status: StatusCode,
    message: String,
    version: Version,
    headers: Headers,
    body: Option<ResponseBody>,
    network_response: Option<Box<Response>>,
    cache_response: Option<Box<Response>>,
    prior_response: Option<Box<Response>>,
    sent_request_at_millis: u64,
    received_response_at_millis: u64,
    cache_control: OnceLock<CacheControl>,
}

impl Response {
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::new()
    }

    /// The request that produced this response. After redirects this is
    /// not the application's original request.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> u16 {
        self.status.as_u16()
    }

    /// The reason phrase as received from the server.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The last header value for `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> Option<&ResponseBody> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut ResponseBody> {
        self.body.as_mut()
    }

    /// Consume the response, yielding its body.
    pub fn into_body(self) -> Option<ResponseBody> {
        self.body
    }

    /// The raw response from the network, before cache merging. `None` when
    /// the response was served entirely from cache.
    pub fn network_response(&self) -> Option<&Response> {
        self.network_response.as_deref()
    }

    /// The stored response this one was served or validated from.
    pub fn cache_response(&self) -> Option<&Response> {
        self.cache_response.as_deref()
    }

    /// The previous hop of a redirect or auth-retry chain. Prior responses
    /// never have a body.
    pub fn prior_response(&self) -> Option<&Response> {
        self.prior_response.as_deref()
    }

    pub fn sent_request_at_millis(&self) -> u64 {
        self.sent_request_at_millis
    }

    pub fn received_response_at_millis(&self) -> u64 {
        self.received_response_at_millis
    }

    pub fn is_successful(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.code(), 300 | 301 | 302 | 303 | 307 | 308)
    }

    /// The cache directives of this response, parsed on first access.
    pub fn cache_control(&self) -> &CacheControl {
        self.cache_control
            .get_or_init(|| CacheControl::parse(&self.headers))
    }

    /// Authentication challenges from `WWW-Authenticate` (401) or
    /// `Proxy-Authenticate` (407).
    pub fn challenges(&self) -> Vec<Challenge> {
        let name = match self.code() {
            401 => "www-authenticate",
            407 => "proxy-authenticate",
            _ => return Vec::new(),
        };
        self.headers
            .values(name)
            .into_iter()
            .filter_map(Challenge::parse)
            .collect()
    }

    /// A builder carrying over every field of this response, body included.
    pub fn new_builder(self) -> ResponseBuilder {
        ResponseBuilder {
            request: Some(self.request),
            status: Some(self.status),
            message: self.message,
            version: self.version,
            headers: self.headers.new_builder(),
            body: self.body,
            network_response: self.network_response,
            cache_response: self.cache_response,
            prior_response: self.prior_response,
            sent_request_at_millis: self.sent_request_at_millis,
            received_response_at_millis: self.received_response_at_millis,
        }
    }

    /// This response without its body, for prior/network/cache links.
    pub(crate) fn strip_body(mut self) -> Response {
        self.body = None;
        self
    }

    /// A body-less, link-less copy of the header portion, used to label a
    /// final response with the raw server response it came from.
    pub(crate) fn meta_copy(&self) -> Response {
        Response {
            request: self.request.clone(),
            status: self.status,
            message: self.message.clone(),
            version: self.version,
            headers: self.headers.clone(),
            body: None,
            network_response: None,
            cache_response: None,
            prior_response: None,
            sent_request_at_millis: self.sent_request_at_millis,
            received_response_at_millis: self.received_response_at_millis,
            cache_control: OnceLock::new(),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", self.request.url())
            .field("headers", &self.headers.len())
            .finish()
    }
}

/// A single scheme/realm pair from an authenticate header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    scheme: String,
    realm: Option<String>,
}

impl Challenge {
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    // "Basic realm=\"files\", charset=\"UTF-8\"" -> scheme + realm. Multiple
    // challenges per header value are not split apart; the first scheme wins.
    fn parse(value: &str) -> Option<Challenge> {
        let mut parts = value.trim().splitn(2, char::is_whitespace);
        let scheme = parts.next()?.to_string();
        if scheme.is_empty() {
            return None;
        }
        let realm = parts.next().and_then(|rest| {
            rest.split(',').find_map(|param| {
                let mut kv = param.trim().splitn(2, '=');
                match kv.next()?.trim() {
                    "realm" => Some(kv.next()?.trim().trim_matches('"').to_string()),
                    _ => None,
                }
            })
        });
        Some(Challenge { scheme, realm })
    }
}

/// Builds a [`Response`].
///
/// # Panics
///
/// `build()` panics when `request` or `status` was never set, when a header
/// name/value was invalid, or when the linked-response invariants are
/// broken (both `network_response` and `cache_response` carrying a body, or
/// a `prior_response` with a body).
pub struct ResponseBuilder {
    request: Option<Request>,
    status: Option<StatusCode>,
    message: String,
    version: Version,
    headers: HeadersBuilder,
    body: Option<ResponseBody>,
    network_response: Option<Box<Response>>,
    cache_response: Option<Box<Response>>,
    prior_response: Option<Box<Response>>,
    sent_request_at_millis: u64,
    received_response_at_millis: u64,
}

impl ResponseBuilder {
    pub fn new() -> ResponseBuilder {
        ResponseBuilder {
            request: None,
            status: None,
            message: String::new(),
            version: Version::HTTP_11,
            headers: Headers::builder(),
            body: None,
            network_response: None,
            cache_response: None,
            prior_response: None,
            sent_request_at_millis: 0,
            received_response_at_millis: 0,
        }
    }

    pub fn request(mut self, request: Request) -> Self {
        self.request = Some(request);
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers.new_builder();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers = self.headers.set(name, value);
        self
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers = self.headers.add(name, value);
        self
    }

    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers = self.headers.remove_all(name);
        self
    }

    pub fn body(mut self, body: Option<ResponseBody>) -> Self {
        self.body = body;
        self
    }

    /// Transform the body carried over from [`Response::new_builder`],
    /// e.g. to wrap it in a decoder.
    pub fn map_body(mut self, f: impl FnOnce(Option<ResponseBody>) -> Option<ResponseBody>) -> Self {
        self.body = f(self.body);
        self
    }

    pub fn network_response(mut self, response: Option<Response>) -> Self {
        self.network_response = response.map(Box::new);
        self
    }

    pub fn cache_response(mut self, response: Option<Response>) -> Self {
        self.cache_response = response.map(Box::new);
        self
    }

    pub fn prior_response(mut self, response: Option<Response>) -> Self {
        self.prior_response = response.map(|r| Box::new(r.strip_body()));
        self
    }

    pub fn sent_request_at_millis(mut self, millis: u64) -> Self {
        self.sent_request_at_millis = millis;
        self
    }

    pub fn received_response_at_millis(mut self, millis: u64) -> Self {
        self.received_response_at_millis = millis;
        self
    }

    pub fn build(self) -> Response {
        let request = self.request.expect("response requires a request");
        let status = self.status.expect("response requires a status");
        let headers = self.headers.build().expect("valid response headers");

        let network_has_body = self
            .network_response
            .as_ref()
            .map_or(false, |r| r.body.is_some());
        let cache_has_body = self
            .cache_response
            .as_ref()
            .map_or(false, |r| r.body.is_some());
        assert!(
            !(network_has_body && cache_has_body),
            "at most one of network_response and cache_response may have a body"
        );
        if let Some(prior) = &self.prior_response {
            assert!(prior.body.is_none(), "prior responses must not have a body");
        }

        Response {
            request,
            status,
            message: self.message,
            version: self.version,
            headers,
            body: self.body,
            network_response: self.network_response,
            cache_response: self.cache_response,
            prior_response: self.prior_response,
            sent_request_at_millis: self.sent_request_at_millis,
            received_response_at_millis: self.received_response_at_millis,
            cache_control: OnceLock::new(),
        }
    }
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        ResponseBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Request::get("http://x.test/").build().unwrap()
    }

    fn response(status: u16) -> Response {
        Response::builder()
            .request(request())
            .status(StatusCode::from_u16(status).unwrap())
            .message("OK")
            .build()
    }

    #[test]
    fn success_and_redirect_classification() {
        assert!(response(200).is_successful());
        assert!(!response(302).is_successful());
        assert!(response(302).is_redirect());
        assert!(response(308).is_redirect());
        assert!(!response(304).is_redirect());
    }

    #[test]
    fn prior_response_loses_its_body() {
        let prior = Response::builder()
            .request(request())
            .status(StatusCode::FOUND)
            .body(Some(ResponseBody::from_bytes(None, b"redirect".to_vec())))
            .build();

        let response = Response::builder()
            .request(request())
            .status(StatusCode::OK)
            .prior_response(Some(prior))
            .build();

        assert!(response.prior_response().unwrap().body().is_none());
        assert_eq!(response.prior_response().unwrap().code(), 302);
    }

    #[test]
    #[should_panic(expected = "at most one")]
    fn two_linked_bodies_rejected() {
        let with_body = |status: StatusCode| {
            Response::builder()
                .request(request())
                .status(status)
                .body(Some(ResponseBody::from_bytes(None, b"x".to_vec())))
                .build()
        };
        Response::builder()
            .request(request())
            .status(StatusCode::OK)
            .network_response(Some(with_body(StatusCode::NOT_MODIFIED)))
            .cache_response(Some(with_body(StatusCode::OK)))
            .build();
    }

    #[test]
    fn challenges_parse_scheme_and_realm() {
        let response = Response::builder()
            .request(request())
            .status(StatusCode::UNAUTHORIZED)
            .header("WWW-Authenticate", "Basic realm=\"files\", charset=\"UTF-8\"")
            .build();

        let challenges = response.challenges();
        assert_eq!(challenges.len(), 1);
        assert_eq!(challenges[0].scheme(), "Basic");
        assert_eq!(challenges[0].realm(), Some("files"));
    }

    #[test]
    fn challenges_empty_for_other_statuses() {
        assert!(response(200).challenges().is_empty());
    }

    #[test]
    fn new_builder_carries_fields() {
        let response = Response::builder()
            .request(request())
            .status(StatusCode::OK)
            .header("etag", "\"v1\"")
            .sent_request_at_millis(5)
            .received_response_at_millis(9)
            .build();

        let rebuilt = response.new_builder().build();
        assert_eq!(rebuilt.code(), 200);
        assert_eq!(rebuilt.header("etag"), Some("\"v1\""));
        assert_eq!(rebuilt.sent_request_at_millis(), 5);
        assert_eq!(rebuilt.received_response_at_millis(), 9);
    }
}
