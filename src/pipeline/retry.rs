//! Follow-ups and failure recovery.
//!
//! This stage owns the per-call resource claim against the connection
//! pool. Each iteration hands the current request to the rest of the
//! pipeline; what comes back is either a response to inspect for
//! follow-up intent (redirect, auth challenge, 408/503 retry, 421
//! recovery) or a failure to classify as recoverable or fatal.

use std::io::Read;
use std::sync::Arc;

use http::{Method, Uri};
use log::debug;

use crate::call::Call;
use crate::chain::{Chain, Interceptor};
use crate::client::Client;
use crate::connection::{Address, StreamAllocation, Timeouts};
use crate::ext::{StatusExt, UriExt};
use crate::request::Request;
use crate::response::Response;
use crate::Error;

/// Hard cap on engine-initiated follow-ups per call. Chrome follows 21
/// redirects; Firefox, curl and wget follow 20.
const MAX_FOLLOW_UPS: u32 = 20;

/// Stop draining an abandoned follow-up body past this point and close
/// the connection instead of reading to exhaustion.
const MAX_DRAIN_BYTES: u64 = 256 * 1024;

pub(crate) struct RetryAndFollowUp;

impl Interceptor for RetryAndFollowUp {
    fn intercept(&self, chain: &mut Chain<'_>) -> Result<Response, Error> {
        let call = chain.call().clone();
        let client = call.client().clone();
        let mut request = chain.request().clone();

        let mut allocation = new_allocation(&client, &request)?;
        call.register_allocation(allocation.clone());

        let mut prior: Option<Response> = None;
        let mut follow_ups: u32 = 0;
        let mut connect_retries: u32 = 0;
        let mut stale_retries: u32 = 0;

        loop {
            if call.is_canceled() {
                allocation.release();
                return Err(Error::Canceled);
            }

            // A stage below may have handed back an unconsumed exchange
            // (a short-circuiting network interceptor); it must not leak
            // into this attempt.
            drop(chain.take_exchange());
            chain.set_allocation(allocation.clone());
            let response = match chain.proceed_internal(request.clone()) {
                Ok(response) => response,
                Err(e) => {
                    // A connect attempt already walked every resolved
                    // address, so one repeat is all that is worth; stale
                    // pooled connections can come up a few times in a row.
                    let may_retry = match &e {
                        Error::Connect(_) => {
                            connect_retries += 1;
                            connect_retries <= 1
                        }
                        Error::StaleConnection => {
                            stale_retries += 1;
                            stale_retries <= 5
                        }
                        _ => false,
                    };
                    if may_retry && recoverable(&e, &call, &client, &request) {
                        debug!("recovering from: {}", e);
                        continue;
                    }
                    allocation.release();
                    return Err(e);
                }
            };

            // Thread the redirect/auth chain through prior_response.
            let response = match prior.take() {
                Some(p) => response.new_builder().prior_response(Some(p)).build(),
                None => response,
            };

            let next = match follow_up_request(&response, &client, &allocation)? {
                Some(next) => next,
                None => return Ok(response),
            };

            follow_ups += 1;
            if follow_ups > MAX_FOLLOW_UPS {
                allocation.release();
                return Err(Error::TooManyFollowUps(follow_ups));
            }
            debug!(
                "follow-up {}: {} {} -> {} {}",
                follow_ups,
                response.status(),
                response.request().url(),
                next.method(),
                next.url()
            );

            prior = Some(drain(response));

            let next_address = Address::from_url(next.url())?;
            if *allocation.address() != next_address {
                allocation.release();
                allocation = new_allocation(&client, &next)?;
                call.register_allocation(allocation.clone());
            }

            request = next;
        }
    }
}

fn new_allocation(client: &Client, request: &Request) -> Result<Arc<StreamAllocation>, Error> {
    let address = Address::from_url(request.url())?;
    Ok(Arc::new(StreamAllocation::new(
        client.connection_pool().clone(),
        client.inner.dns.clone(),
        address,
        Timeouts {
            connect: client.connect_timeout(),
            read: client.read_timeout(),
            write: client.write_timeout(),
        },
    )))
}

/// Whether an I/O failure may be absorbed by trying again.
fn recoverable(error: &Error, call: &Call, client: &Client, request: &Request) -> bool {
    if call.is_canceled() {
        return false;
    }
    if !client.retry_on_connection_failure() {
        return false;
    }
    match error {
        // No request bytes reached the wire.
        Error::Connect(_) => true,
        // The idle-reused connection died under us; safe if the body can
        // be transmitted again.
        Error::StaleConnection => request.body().map_or(true, |b| b.can_replay()),
        _ => false,
    }
}

/// Decide the engine-initiated next request for `response`, or `None` to
/// surface the response to the caller.
fn follow_up_request(
    response: &Response,
    client: &Client,
    allocation: &Arc<StreamAllocation>,
) -> Result<Option<Request>, Error> {
    let request = response.request();
    match response.code() {
        401 => Ok(client.inner.authenticator.authenticate(response)),
        407 => Ok(client.inner.proxy_authenticator.authenticate(response)),

        300 | 301 | 302 | 303 | 307 | 308 => build_redirect(response, client),

        408 => {
            // Repeating a timeout is unlikely to help.
            if !client.retry_on_connection_failure() {
                return Ok(None);
            }
            if request.body().map_or(false, |b| !b.can_replay()) {
                return Ok(None);
            }
            if response.prior_response().map(Response::code) == Some(408) {
                return Ok(None);
            }
            if retry_after(response).unwrap_or(0) > 0 {
                return Ok(None);
            }
            Ok(Some(request.clone()))
        }

        503 => {
            if response.prior_response().map(Response::code) == Some(503) {
                return Ok(None);
            }
            // Only retry when the server says it is ready right now.
            if retry_after(response) == Some(0) {
                return Ok(Some(request.clone()));
            }
            Ok(None)
        }

        421 => {
            if request.body().map_or(false, |b| !b.can_replay()) {
                return Ok(None);
            }
            // Misdirected request: repeat it, but not on this connection.
            allocation.no_reuse();
            Ok(Some(request.clone()))
        }

        _ => Ok(None),
    }
}

fn build_redirect(response: &Response, client: &Client) -> Result<Option<Request>, Error> {
    if !client.follow_redirects() {
        return Ok(None);
    }
    let request = response.request();
    let location = match response.header("Location") {
        Some(l) if !l.trim().is_empty() => l,
        _ => return Ok(None),
    };
    let url = resolve_location(request.url(), location)?;
    match url.scheme_str() {
        Some("http") | Some("https") => {}
        // Redirects to other protocols are not followed.
        _ => return Ok(None),
    }

    let same_scheme = url.scheme_str() == request.url().scheme_str();
    if !same_scheme && !client.follow_ssl_redirects() {
        return Ok(None);
    }

    let mut builder = request.new_builder();
    if response.status().retains_method_on_redirect() {
        // 307/308 repeat the method and body unchanged.
        if request.body().map_or(false, |b| !b.can_replay()) {
            return Ok(None);
        }
    } else if !matches!(*request.method(), Method::GET | Method::HEAD) {
        builder = builder
            .method("GET", None)
            .remove_header("Transfer-Encoding")
            .remove_header("Content-Length")
            .remove_header("Content-Type");
    }

    // Credentials do not travel to another host.
    if !same_connection(request.url(), &url) {
        builder = builder.remove_header("Authorization").remove_header("Cookie");
    }

    Ok(Some(builder.url(url).build()?))
}

fn same_connection(a: &Uri, b: &Uri) -> bool {
    a.scheme_str() == b.scheme_str()
        && a.host().map(str::to_ascii_lowercase) == b.host().map(str::to_ascii_lowercase)
        && a.effective_port() == b.effective_port()
}

/// `Retry-After` in whole seconds. Date forms yield `None`, which callers
/// treat as "do not retry".
fn retry_after(response: &Response) -> Option<u64> {
    response
        .header("Retry-After")
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Consume what is left of a follow-up response's body so the connection
/// can go back to the pool, within reason.
fn drain(mut response: Response) -> Response {
    if let Some(body) = response.body_mut() {
        let mut sink = [0u8; 8192];
        let mut drained: u64 = 0;
        loop {
            match body.read(&mut sink) {
                Ok(0) => break,
                Ok(n) => {
                    drained += n as u64;
                    if drained > MAX_DRAIN_BYTES {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    }
    response
}

/// Resolve a `Location` value against the request url: absolute,
/// scheme-relative, absolute-path and relative-path forms.
fn resolve_location(base: &Uri, location: &str) -> Result<Uri, Error> {
    let location = location.trim();
    // Fragments are client-side only.
    let location = location.split('#').next().unwrap_or("");
    let malformed = || Error::BadLocationHeader(location.to_string());

    if location.contains("://") {
        return location.parse::<Uri>().map_err(|_| malformed());
    }

    let scheme = base.scheme_str().ok_or_else(malformed)?;
    let authority = base.authority().ok_or_else(malformed)?.as_str();

    let combined = if let Some(rest) = location.strip_prefix("//") {
        format!("{}://{}", scheme, rest)
    } else if location.starts_with('/') {
        format!("{}://{}{}", scheme, authority, location)
    } else {
        let base_path = base.path();
        let dir = match base_path.rfind('/') {
            Some(i) => &base_path[..=i],
            None => "/",
        };
        let (rel_path, query) = match location.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (location, None),
        };
        let mut path = normalize_path(&format!("{}{}", dir, rel_path));
        if let Some(q) = query {
            path.push('?');
            path.push_str(q);
        }
        format!("{}://{}{}", scheme, authority, path)
    };
    combined.parse::<Uri>().map_err(|_| malformed())
}

/// Collapse `.` and `..` segments.
fn normalize_path(path: &str) -> String {
    let trailing_slash = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut out = String::with_capacity(path.len());
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() || trailing_slash {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn response_with(status: u16, headers: &[(&str, &str)]) -> Response {
        let request = Request::get("http://x.test/a/b").build().unwrap();
        let mut builder = Response::builder()
            .request(request)
            .status(StatusCode::from_u16(status).unwrap());
        for (n, v) in headers {
            builder = builder.add_header(n, v);
        }
        builder.build()
    }

    #[test]
    fn resolve_absolute_location() {
        let base: Uri = "http://x.test/a/b".parse().unwrap();
        let url = resolve_location(&base, "http://y.test/c").unwrap();
        assert_eq!(url.to_string(), "http://y.test/c");
    }

    #[test]
    fn resolve_absolute_path() {
        let base: Uri = "http://x.test/a/b?q=1".parse().unwrap();
        let url = resolve_location(&base, "/c?d=2").unwrap();
        assert_eq!(url.to_string(), "http://x.test/c?d=2");
    }

    #[test]
    fn resolve_relative_path() {
        let base: Uri = "http://x.test/a/b".parse().unwrap();
        assert_eq!(
            resolve_location(&base, "c").unwrap().to_string(),
            "http://x.test/a/c"
        );
        assert_eq!(
            resolve_location(&base, "../c").unwrap().to_string(),
            "http://x.test/c"
        );
    }

    #[test]
    fn resolve_scheme_relative() {
        let base: Uri = "http://x.test/a".parse().unwrap();
        assert_eq!(
            resolve_location(&base, "//y.test/z").unwrap().to_string(),
            "http://y.test/z"
        );
    }

    #[test]
    fn resolve_strips_fragment() {
        let base: Uri = "http://x.test/a/b".parse().unwrap();
        assert_eq!(
            resolve_location(&base, "/c#frag").unwrap().to_string(),
            "http://x.test/c"
        );
    }

    #[test]
    fn redirect_302_coerces_post_to_get() {
        let request = Request::builder()
            .url("http://x.test/a")
            .post("payload".into())
            .header("Content-Type", "text/plain")
            .build()
            .unwrap();
        let response = Response::builder()
            .request(request)
            .status(StatusCode::FOUND)
            .header("Location", "/b")
            .build();

        let client = Client::new();
        let next = build_redirect(&response, &client).unwrap().unwrap();
        assert_eq!(*next.method(), Method::GET);
        assert!(next.body().is_none());
        assert_eq!(next.header("Content-Type"), None);
        assert_eq!(next.url().to_string(), "http://x.test/b");
    }

    #[test]
    fn redirect_307_preserves_method_and_body() {
        let request = Request::builder()
            .url("http://x.test/a")
            .post("q".into())
            .build()
            .unwrap();
        let response = Response::builder()
            .request(request)
            .status(StatusCode::TEMPORARY_REDIRECT)
            .header("Location", "http://x.test/r")
            .build();

        let client = Client::new();
        let next = build_redirect(&response, &client).unwrap().unwrap();
        assert_eq!(*next.method(), Method::POST);
        let body = next.body().unwrap();
        assert_eq!(body.content_length(), Some(1));
    }

    #[test]
    fn cross_host_redirect_strips_credentials() {
        let request = Request::get("http://x.test/a")
            .header("Authorization", "Basic abc")
            .header("Cookie", "sid=1")
            .build()
            .unwrap();
        let response = Response::builder()
            .request(request)
            .status(StatusCode::MOVED_PERMANENTLY)
            .header("Location", "http://y.test/a")
            .build();

        let client = Client::new();
        let next = build_redirect(&response, &client).unwrap().unwrap();
        assert_eq!(next.header("Authorization"), None);
        assert_eq!(next.header("Cookie"), None);
    }

    #[test]
    fn same_host_redirect_keeps_credentials() {
        let request = Request::get("http://x.test/a")
            .header("Authorization", "Basic abc")
            .build()
            .unwrap();
        let response = Response::builder()
            .request(request)
            .status(StatusCode::MOVED_PERMANENTLY)
            .header("Location", "/b")
            .build();

        let client = Client::new();
        let next = build_redirect(&response, &client).unwrap().unwrap();
        assert_eq!(next.header("Authorization"), Some("Basic abc"));
    }

    #[test]
    fn redirect_without_location_is_final() {
        let client = Client::new();
        let response = response_with(302, &[]);
        assert!(build_redirect(&response, &client).unwrap().is_none());
    }

    #[test]
    fn redirects_disabled() {
        let client = Client::builder().follow_redirects(false).build();
        let response = response_with(302, &[("Location", "/b")]);
        assert!(build_redirect(&response, &client).unwrap().is_none());
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(retry_after(&response_with(503, &[("Retry-After", "0")])), Some(0));
        assert_eq!(retry_after(&response_with(503, &[("Retry-After", "30")])), Some(30));
        assert_eq!(
            retry_after(&response_with(503, &[("Retry-After", "Fri, 31 Dec 1999 23:59:59 GMT")])),
            None
        );
        assert_eq!(retry_after(&response_with(503, &[])), None);
    }

    #[test]
    fn normalize_path_segments() {
        assert_eq!(normalize_path("/a/b/../c"), "/a/c");
        assert_eq!(normalize_path("/a/./b"), "/a/b");
        assert_eq!(normalize_path("/../../x"), "/x");
        assert_eq!(normalize_path("/a/"), "/a/");
        assert_eq!(normalize_path(""), "/");
    }
}
