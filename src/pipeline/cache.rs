//! Stored-response reuse.
//!
//! For each request the stage computes one of four outcomes from the
//! request directives and the stored candidate's freshness: serve the
//! store, go to the network, validate the store with a conditional
//! request, or fail an `only-if-cached` request with a synthesized 504.
//! Network responses that qualify are teed into the store as their body
//! is consumed.

use std::io::{self, Read};
use std::sync::Arc;

use http::Method;
use log::debug;

use crate::body::ResponseBody;
use crate::cache::{Cache, CacheRecord};
use crate::cache_control::CacheControl;
use crate::chain::{Chain, Interceptor};
use crate::ext::MethodExt;
use crate::headers::Headers;
use crate::request::Request;
use crate::response::Response;
use crate::util::now_millis;
use crate::Error;

/// Heuristic freshness for validator-only responses is one tenth of the
/// resource's age, capped here.
const MAX_HEURISTIC_MILLIS: u64 = 24 * 3600 * 1000;

pub(crate) struct CacheStage;

impl Interceptor for CacheStage {
    fn intercept(&self, chain: &mut Chain<'_>) -> Result<Response, Error> {
        let request = chain.request().clone();
        let cache = chain.call().client().cache().cloned();
        let now = now_millis();

        let candidate = cache.as_ref().and_then(|c| lookup(c, &request));
        let strategy = Strategy::compute(now, &request, candidate.as_ref());

        if let Some(cache) = &cache {
            let network = matches!(strategy, Strategy::Network | Strategy::Conditional(_));
            let hit = matches!(strategy, Strategy::Cached);
            cache.track_response(network, hit);
        }

        let network_request = match strategy {
            Strategy::Unsatisfiable => {
                debug!("only-if-cached with no usable stored response: 504");
                return Ok(synthesize_unsatisfiable(request, now));
            }
            Strategy::Cached => {
                let record = candidate.expect("cached strategy has a record");
                debug!("cache hit for {}", request.url());
                return Ok(serve_cached(&record, &request));
            }
            Strategy::Network => request.clone(),
            Strategy::Conditional(ref conditional) => conditional.clone(),
        };

        let conditional = matches!(strategy, Strategy::Conditional(_));
        let network_response = chain.proceed(network_request)?;

        if conditional {
            let record = candidate.as_ref().expect("conditional strategy has a record");
            if network_response.code() == 304 {
                let cache = cache.as_ref().expect("conditional strategy requires a cache");
                cache.track_conditional_hit();
                debug!("validated stored response for {}", request.url());
                let updated = revalidated_record(record, &network_response);
                cache.update(&Cache::key(request.url()), updated.clone());
                return Ok(validated_response(&updated, &request, network_response));
            }
            // The candidate lost; it is not returned and not kept.
            debug!("stored response for {} superseded", request.url());
        }

        if let Some(cache) = &cache {
            if request.method().invalidates_cache() && network_response.is_successful() {
                cache.remove(&Cache::key(request.url()));
            }
        }

        // Any candidate still around here was either never consulted or
        // just superseded by a non-304 response; it is discarded, not
        // attached.
        let meta = network_response.meta_copy();
        let response = network_response
            .new_builder()
            .network_response(Some(meta))
            .cache_response(None)
            .build();

        if let Some(cache) = cache {
            if should_store(&request, &response) {
                return Ok(tee_into_cache(cache, &request, response));
            }
        }
        Ok(response)
    }
}

/// The two-valued verdict: which of (network request, stored response)
/// participate in satisfying the call.
enum Strategy {
    /// No usable stored response; go to the network.
    Network,
    /// The stored response is fresh enough to serve as-is.
    Cached,
    /// Ask the server whether the stored response is still good.
    Conditional(Request),
    /// `only-if-cached` and the store cannot satisfy it.
    Unsatisfiable,
}

impl Strategy {
    fn compute(now: u64, request: &Request, record: Option<&CacheRecord>) -> Strategy {
        let strategy = Strategy::compute_ignoring_only_if_cached(now, request, record);
        // A request forbidden to touch the network turns every
        // network-needing outcome into a synthesized failure.
        if !matches!(strategy, Strategy::Cached) && request.cache_control().only_if_cached() {
            return Strategy::Unsatisfiable;
        }
        strategy
    }

    fn compute_ignoring_only_if_cached(
        now: u64,
        request: &Request,
        record: Option<&CacheRecord>,
    ) -> Strategy {
        let Some(record) = record else {
            return Strategy::Network;
        };

        let request_cc = request.cache_control();
        if request_cc.no_cache() || has_conditions(request) {
            return Strategy::Network;
        }

        let response_cc = CacheControl::parse(&record.headers);
        if response_cc.no_store() {
            return Strategy::Network;
        }
        if response_cc.immutable() {
            return Strategy::Cached;
        }

        let age = age_millis(record, now);
        let mut fresh = freshness_lifetime_millis(record);
        if let Some(request_max_age) = request_cc.max_age() {
            fresh = fresh.min(duration_millis(request_max_age));
        }
        let min_fresh = request_cc.min_fresh().map(duration_millis).unwrap_or(0);
        let mut max_stale = 0;
        if !response_cc.must_revalidate() {
            if let Some(stale) = request_cc.max_stale() {
                max_stale = duration_millis(stale);
            }
        }

        if !response_cc.no_cache()
            && age.saturating_add(min_fresh) < fresh.saturating_add(max_stale)
        {
            return Strategy::Cached;
        }

        // Find a validator to send the server.
        let (name, value) = if let Some(etag) = record.headers.get("etag") {
            ("If-None-Match", etag.to_string())
        } else if let Some(last_modified) = record.headers.get("last-modified") {
            ("If-Modified-Since", last_modified.to_string())
        } else if let Some(date) = record.headers.get("date") {
            ("If-Modified-Since", date.to_string())
        } else {
            return Strategy::Network;
        };

        match request.new_builder().header(name, &value).build() {
            Ok(conditional) => Strategy::Conditional(conditional),
            Err(_) => Strategy::Network,
        }
    }
}

/// The request carries its own validators; the response would not be
/// usable without application-level handling of a 304.
fn has_conditions(request: &Request) -> bool {
    request.header("If-Modified-Since").is_some() || request.header("If-None-Match").is_some()
}

/// Effective age per RFC 7234 4.2.3, in milliseconds.
fn age_millis(record: &CacheRecord, now: u64) -> u64 {
    let received = record.received_response_at_millis;
    let apparent = match record.headers.date("date").map(system_time_millis) {
        Some(served) => received.saturating_sub(served),
        None => 0,
    };
    let age_header = record
        .headers
        .get("age")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
        .unwrap_or(0);

    let received_age = apparent.max(age_header);
    let response_duration = received.saturating_sub(record.sent_request_at_millis);
    let resident = now.saturating_sub(received);
    received_age
        .saturating_add(response_duration)
        .saturating_add(resident)
}

/// Freshness lifetime per RFC 7234 4.2.1: s-maxage, max-age, Expires,
/// then the last-modified heuristic.
fn freshness_lifetime_millis(record: &CacheRecord) -> u64 {
    let cc = CacheControl::parse(&record.headers);
    if let Some(s_max_age) = cc.s_max_age() {
        return duration_millis(s_max_age);
    }
    if let Some(max_age) = cc.max_age() {
        return duration_millis(max_age);
    }

    let served = record
        .headers
        .date("date")
        .map(system_time_millis)
        .unwrap_or(record.received_response_at_millis);

    if let Some(expires) = record.headers.date("expires").map(system_time_millis) {
        return expires.saturating_sub(served);
    }

    if let Some(last_modified) = record.headers.date("last-modified").map(system_time_millis) {
        // Heuristic freshness only applies to responses without explicit
        // expiration, and query urls are too dynamic for it.
        if !record.url.contains('?') {
            let age_at_serve = served.saturating_sub(last_modified);
            return (age_at_serve / 10).min(MAX_HEURISTIC_MILLIS);
        }
    }

    0
}

fn duration_millis(d: std::time::Duration) -> u64 {
    d.as_secs().saturating_mul(1000)
}

fn system_time_millis(t: std::time::SystemTime) -> u64 {
    t.duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Fetch the stored record for this request if its varying headers match.
fn lookup(cache: &Arc<Cache>, request: &Request) -> Option<CacheRecord> {
    if *request.method() != Method::GET {
        return None;
    }
    let record = cache.get(&Cache::key(request.url()))?;
    for name in record.vary_headers.names() {
        if request.headers().values(name) != record.vary_headers.values(name) {
            debug!("stored response varies on {}, mismatch", name);
            return None;
        }
    }
    Some(record)
}

fn synthesize_unsatisfiable(request: Request, now: u64) -> Response {
    Response::builder()
        .request(request)
        .status(http::StatusCode::GATEWAY_TIMEOUT)
        .message("Unsatisfiable Request (only-if-cached)")
        .body(Some(ResponseBody::empty()))
        .sent_request_at_millis(now)
        .received_response_at_millis(now)
        .build()
}

fn record_to_response(record: &CacheRecord, request: &Request, with_body: bool) -> Response {
    let mut builder = Response::builder()
        .request(request.clone())
        .status(record.status)
        .message(&record.message)
        .version(record.version)
        .headers(record.headers.clone())
        .sent_request_at_millis(record.sent_request_at_millis)
        .received_response_at_millis(record.received_response_at_millis);
    if with_body {
        builder = builder.body(Some(ResponseBody::from_bytes(
            record.headers.get("content-type"),
            (*record.body).clone(),
        )));
    }
    builder.build()
}

fn serve_cached(record: &CacheRecord, request: &Request) -> Response {
    let stripped = record_to_response(record, request, false);
    record_to_response(record, request, true)
        .new_builder()
        .cache_response(Some(stripped))
        .build()
}

/// Merge stored and 304 headers per RFC 7234 4.3.4 and refresh the
/// timing metadata. The stored body is retained.
fn revalidated_record(record: &CacheRecord, network: &Response) -> CacheRecord {
    CacheRecord {
        headers: combine_headers(&record.headers, network.headers()),
        sent_request_at_millis: network.sent_request_at_millis(),
        received_response_at_millis: network.received_response_at_millis(),
        ..record.clone()
    }
}

fn validated_response(record: &CacheRecord, request: &Request, network: Response) -> Response {
    let network_meta = network.meta_copy();
    record_to_response(record, request, true)
        .new_builder()
        .cache_response(Some(record_to_response(record, request, false)))
        .network_response(Some(network_meta))
        .build()
}

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers describing the stored body; the validating response cannot
/// change these.
const NOT_UPDATED: &[&str] = &[
    "content-length",
    "content-encoding",
    "transfer-encoding",
    "content-range",
    "trailer",
    "vary",
];

fn updatable(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !HOP_BY_HOP.contains(&lower.as_str()) && !NOT_UPDATED.contains(&lower.as_str())
}

fn combine_headers(cached: &Headers, network: &Headers) -> Headers {
    let mut builder = Headers::builder();
    for (name, value) in cached.iter() {
        // Dropped 1xx warnings are a freshness signal that no longer applies.
        if name.as_str().eq_ignore_ascii_case("warning")
            && value.to_str().map_or(false, |v| v.starts_with('1'))
        {
            continue;
        }
        if updatable(name.as_str()) && network.contains(name.as_str()) {
            continue;
        }
        builder = builder.add(name.clone(), value.clone());
    }
    for (name, value) in network.iter() {
        if updatable(name.as_str()) {
            builder = builder.add(name.clone(), value.clone());
        }
    }
    builder.build().expect("combining valid headers")
}

fn should_store(request: &Request, response: &Response) -> bool {
    if *request.method() != Method::GET {
        return false;
    }
    if response
        .headers()
        .values("vary")
        .iter()
        .any(|v| v.trim() == "*")
    {
        return false;
    }
    if !matches!(
        response.code(),
        200 | 203 | 204 | 300 | 301 | 308 | 404 | 405 | 410 | 414 | 501
    ) {
        return false;
    }
    if response.cache_control().no_store() || request.cache_control().no_store() {
        return false;
    }
    true
}

/// The request header values nominated by the response's `Vary`.
fn vary_headers(response_headers: &Headers, request: &Request) -> Headers {
    let mut builder = Headers::builder();
    for value in response_headers.values("vary") {
        for name in value.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            for request_value in request.headers().get_all(name) {
                builder = builder.add(name, request_value.clone());
            }
        }
    }
    builder.build().unwrap_or_default()
}

/// Wrap the response body so a complete, successful read commits the
/// entry; anything less aborts it.
fn tee_into_cache(cache: Arc<Cache>, request: &Request, response: Response) -> Response {
    let template = CacheRecord {
        url: request.url().to_string(),
        request_method: request.method().to_string(),
        vary_headers: vary_headers(response.headers(), request),
        status: response.status(),
        message: response.message().to_string(),
        version: response.version(),
        headers: response.headers().clone(),
        body: Arc::new(Vec::new()),
        sent_request_at_millis: response.sent_request_at_millis(),
        received_response_at_millis: response.received_response_at_millis(),
    };
    let key = Cache::key(request.url());

    response
        .new_builder()
        .map_body(|body| {
            body.map(|inner| {
                let content_type = inner.content_type().map(str::to_string);
                let content_length = inner.content_length();
                ResponseBody::new(
                    content_type.as_deref(),
                    content_length,
                    CacheWritingSource {
                        inner,
                        buf: Vec::new(),
                        cache,
                        key,
                        template: Some(template),
                    },
                )
            })
        })
        .build()
}

struct CacheWritingSource {
    inner: ResponseBody,
    buf: Vec<u8>,
    cache: Arc<Cache>,
    key: String,
    /// Present until committed; dropped without commit on failure.
    template: Option<CacheRecord>,
}

impl Read for CacheWritingSource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = match self.inner.read(out) {
            Ok(n) => n,
            Err(e) => {
                // A broken read aborts the entry.
                self.template = None;
                return Err(e);
            }
        };
        if n == 0 {
            if let Some(mut record) = self.template.take() {
                record.body = Arc::new(std::mem::take(&mut self.buf));
                debug!("committing {} bytes to cache for {}", record.body.len(), record.url);
                self.cache.put(&self.key, record);
            }
        } else {
            self.buf.extend_from_slice(&out[..n]);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{StatusCode, Version};

    fn record(headers: &[(&str, &str)], sent: u64, received: u64) -> CacheRecord {
        let mut builder = Headers::builder();
        for (n, v) in headers {
            builder = builder.add(*n, *v);
        }
        CacheRecord {
            url: "http://x.test/".to_string(),
            request_method: "GET".to_string(),
            vary_headers: Headers::default(),
            status: StatusCode::OK,
            message: "OK".to_string(),
            version: Version::HTTP_11,
            headers: builder.build().unwrap(),
            body: Arc::new(b"cached".to_vec()),
            sent_request_at_millis: sent,
            received_response_at_millis: received,
        }
    }

    fn get(url: &str) -> Request {
        Request::get(url).build().unwrap()
    }

    #[test]
    fn no_candidate_goes_to_network() {
        let request = get("http://x.test/");
        assert!(matches!(
            Strategy::compute(1000, &request, None),
            Strategy::Network
        ));
    }

    #[test]
    fn only_if_cached_without_candidate_is_unsatisfiable() {
        let request = Request::get("http://x.test/")
            .cache_control(CacheControl::FORCE_CACHE)
            .build()
            .unwrap();
        assert!(matches!(
            Strategy::compute(1000, &request, None),
            Strategy::Unsatisfiable
        ));
    }

    #[test]
    fn fresh_max_age_serves_cache() {
        let request = get("http://x.test/");
        // Stored 10 seconds ago with a minute of freshness.
        let record = record(&[("cache-control", "max-age=60")], 0, 0);
        let strategy = Strategy::compute(10_000, &request, Some(&record));
        assert!(matches!(strategy, Strategy::Cached));
    }

    #[test]
    fn expired_max_age_with_etag_goes_conditional() {
        let request = get("http://x.test/");
        let record = record(&[("cache-control", "max-age=1"), ("etag", "\"v1\"")], 0, 0);
        let strategy = Strategy::compute(10_000, &request, Some(&record));
        let Strategy::Conditional(conditional) = strategy else {
            panic!("expected conditional")
        };
        assert_eq!(conditional.header("If-None-Match"), Some("\"v1\""));
    }

    #[test]
    fn expired_with_last_modified_goes_conditional() {
        let request = get("http://x.test/");
        let record = record(
            &[
                ("cache-control", "max-age=1"),
                ("last-modified", "Sun, 06 Nov 1994 08:49:37 GMT"),
            ],
            0,
            0,
        );
        let strategy = Strategy::compute(10_000, &request, Some(&record));
        let Strategy::Conditional(conditional) = strategy else {
            panic!("expected conditional")
        };
        assert_eq!(
            conditional.header("If-Modified-Since"),
            Some("Sun, 06 Nov 1994 08:49:37 GMT")
        );
    }

    #[test]
    fn expired_without_validator_goes_to_network() {
        let request = get("http://x.test/");
        let record = record(&[("cache-control", "max-age=1")], 0, 0);
        assert!(matches!(
            Strategy::compute(10_000, &request, Some(&record)),
            Strategy::Network
        ));
    }

    #[test]
    fn request_no_cache_bypasses_store() {
        let request = Request::get("http://x.test/")
            .cache_control(CacheControl::FORCE_NETWORK)
            .build()
            .unwrap();
        let record = record(&[("cache-control", "max-age=60")], 0, 0);
        assert!(matches!(
            Strategy::compute(1000, &request, Some(&record)),
            Strategy::Network
        ));
    }

    #[test]
    fn response_no_cache_forces_validation() {
        let request = get("http://x.test/");
        let record = record(
            &[("cache-control", "no-cache, max-age=60"), ("etag", "\"v\"")],
            0,
            0,
        );
        assert!(matches!(
            Strategy::compute(1000, &request, Some(&record)),
            Strategy::Conditional(_)
        ));
    }

    #[test]
    fn max_stale_serves_expired() {
        let request = Request::get("http://x.test/")
            .header("Cache-Control", "max-stale=3600")
            .build()
            .unwrap();
        let record = record(&[("cache-control", "max-age=1")], 0, 0);
        assert!(matches!(
            Strategy::compute(10_000, &request, Some(&record)),
            Strategy::Cached
        ));
    }

    #[test]
    fn must_revalidate_defeats_max_stale() {
        let request = Request::get("http://x.test/")
            .header("Cache-Control", "max-stale=3600")
            .build()
            .unwrap();
        let record = record(
            &[("cache-control", "max-age=1, must-revalidate"), ("etag", "\"v\"")],
            0,
            0,
        );
        assert!(matches!(
            Strategy::compute(10_000, &request, Some(&record)),
            Strategy::Conditional(_)
        ));
    }

    #[test]
    fn min_fresh_requires_margin() {
        let request = Request::get("http://x.test/")
            .header("Cache-Control", "min-fresh=50")
            .build()
            .unwrap();
        // 60s lifetime, 20s old, needs 50s margin left: 20 + 50 >= 60.
        let record = record(&[("cache-control", "max-age=60"), ("etag", "\"v\"")], 0, 0);
        assert!(matches!(
            Strategy::compute(20_000, &request, Some(&record)),
            Strategy::Conditional(_)
        ));
    }

    #[test]
    fn immutable_always_serves() {
        let request = get("http://x.test/");
        let record = record(&[("cache-control", "immutable")], 0, 0);
        assert!(matches!(
            Strategy::compute(u64::MAX / 2, &request, Some(&record)),
            Strategy::Cached
        ));
    }

    #[test]
    fn age_header_counts_against_freshness() {
        let request = get("http://x.test/");
        // Fresh for 60s but already 59s old when received.
        let record = record(&[("cache-control", "max-age=60"), ("age", "59")], 0, 0);
        let strategy = Strategy::compute(2_000, &request, Some(&record));
        assert!(matches!(strategy, Strategy::Network));
    }

    #[test]
    fn heuristic_freshness_from_last_modified() {
        let request = get("http://x.test/");
        // Served at epoch hour 10, modified at epoch: 1h of age at serve
        // time gives 6 minutes of heuristic freshness.
        let record = record(
            &[
                ("date", "Thu, 01 Jan 1970 01:00:00 GMT"),
                ("last-modified", "Thu, 01 Jan 1970 00:00:00 GMT"),
            ],
            3_600_000,
            3_600_000,
        );
        assert_eq!(freshness_lifetime_millis(&record), 360_000);

        // Within the heuristic window: served from cache.
        assert!(matches!(
            Strategy::compute(3_600_000 + 60_000, &request, Some(&record)),
            Strategy::Cached
        ));
        // Past it: validate with If-Modified-Since.
        assert!(matches!(
            Strategy::compute(3_600_000 + 600_000, &request, Some(&record)),
            Strategy::Conditional(_)
        ));
    }

    #[test]
    fn combine_headers_network_wins_except_body_fields() {
        let cached = Headers::of([
            ("Content-Length", "6"),
            ("Content-Encoding", "gzip"),
            ("ETag", "\"v1\""),
            ("Warning", "113 - \"heuristic\""),
        ]);
        let network = Headers::of([("ETag", "\"v2\""), ("Content-Length", "999")]);

        let combined = combine_headers(&cached, &network);
        assert_eq!(combined.get("etag"), Some("\"v2\""));
        assert_eq!(combined.get("content-length"), Some("6"));
        assert_eq!(combined.get("content-encoding"), Some("gzip"));
        assert_eq!(combined.get("warning"), None);
    }

    #[test]
    fn storable_statuses() {
        let request = get("http://x.test/");
        let ok = |code: u16, headers: &[(&str, &str)]| {
            let mut builder = Response::builder()
                .request(request.clone())
                .status(StatusCode::from_u16(code).unwrap());
            for (n, v) in headers {
                builder = builder.header(n, v);
            }
            should_store(&request, &builder.build())
        };
        assert!(ok(200, &[]));
        assert!(ok(301, &[]));
        assert!(ok(404, &[]));
        assert!(!ok(302, &[]));
        assert!(!ok(500, &[]));
        assert!(!ok(200, &[("Cache-Control", "no-store")]));
        assert!(!ok(200, &[("Vary", "*")]));
    }

    #[test]
    fn vary_mismatch_misses() {
        let cache = Arc::new(Cache::in_memory());
        let mut record = record(&[("cache-control", "max-age=60")], 0, 0);
        record.vary_headers = Headers::of([("accept-language", "de")]);
        cache.put("http://x.test/", record);

        let miss = Request::get("http://x.test/")
            .header("Accept-Language", "en")
            .build()
            .unwrap();
        assert!(lookup(&cache, &miss).is_none());

        let hit = Request::get("http://x.test/")
            .header("Accept-Language", "de")
            .build()
            .unwrap();
        assert!(lookup(&cache, &hit).is_some());
    }
}
