//! Cache-Control directive set.
//!
//! A parsed, immutable view of the `Cache-Control` header (plus the legacy
//! `Pragma: no-cache`). Parsing is forgiving: unknown directives are
//! skipped and unparseable values leave the directive unset, per
//! RFC 7234's instruction to ignore what is not understood.

use std::fmt;
use std::time::Duration;

use crate::headers::Headers;

/// Parsed cache directives from a request or response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    no_cache: bool,
    no_store: bool,
    max_age: Option<Duration>,
    s_max_age: Option<Duration>,
    private: bool,
    public: bool,
    must_revalidate: bool,
    max_stale: Option<Duration>,
    min_fresh: Option<Duration>,
    only_if_cached: bool,
    no_transform: bool,
    immutable: bool,
}

impl CacheControl {
    /// Require a network response, bypassing any stored one.
    pub const FORCE_NETWORK: CacheControl = CacheControl {
        no_cache: true,
        no_store: false,
        max_age: None,
        s_max_age: None,
        private: false,
        public: false,
        must_revalidate: false,
        max_stale: None,
        min_fresh: None,
        only_if_cached: false,
        no_transform: false,
        immutable: false,
    };

    /// Require a stored response regardless of staleness; never touch the
    /// network. Unsatisfiable requests get a synthesized 504.
    pub const FORCE_CACHE: CacheControl = CacheControl {
        no_cache: false,
        no_store: false,
        max_age: None,
        s_max_age: None,
        private: false,
        public: false,
        must_revalidate: false,
        max_stale: Some(Duration::MAX),
        min_fresh: None,
        only_if_cached: true,
        no_transform: false,
        immutable: false,
    };

    pub fn builder() -> CacheControlBuilder {
        CacheControlBuilder(CacheControl::default())
    }

    /// Parse the directives found in `Cache-Control` headers.
    ///
    /// `Pragma: no-cache` on a message without any `Cache-Control` header
    /// has the same effect as `Cache-Control: no-cache`.
    pub fn parse(headers: &Headers) -> CacheControl {
        let mut cc = CacheControl::default();
        let mut saw_cache_control = false;

        for value in headers.values("cache-control") {
            saw_cache_control = true;
            for (name, arg) in directives(value) {
                match name.as_str() {
                    "no-cache" => cc.no_cache = true,
                    "no-store" => cc.no_store = true,
                    "max-age" => cc.max_age = parse_seconds(arg),
                    "s-maxage" => cc.s_max_age = parse_seconds(arg),
                    "private" => cc.private = true,
                    "public" => cc.public = true,
                    "must-revalidate" => cc.must_revalidate = true,
                    // Valueless max-stale accepts any amount of staleness.
                    "max-stale" => {
                        cc.max_stale = match arg {
                            Some(_) => parse_seconds(arg),
                            None => Some(Duration::MAX),
                        }
                    }
                    "min-fresh" => cc.min_fresh = parse_seconds(arg),
                    "only-if-cached" => cc.only_if_cached = true,
                    "no-transform" => cc.no_transform = true,
                    "immutable" => cc.immutable = true,
                    _ => {}
                }
            }
        }

        if !saw_cache_control {
            if let Some(pragma) = headers.get("pragma") {
                if pragma.to_ascii_lowercase().contains("no-cache") {
                    cc.no_cache = true;
                }
            }
        }

        cc
    }

    pub fn no_cache(&self) -> bool {
        self.no_cache
    }

    pub fn no_store(&self) -> bool {
        self.no_store
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    pub fn s_max_age(&self) -> Option<Duration> {
        self.s_max_age
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn must_revalidate(&self) -> bool {
        self.must_revalidate
    }

    pub fn max_stale(&self) -> Option<Duration> {
        self.max_stale
    }

    pub fn min_fresh(&self) -> Option<Duration> {
        self.min_fresh
    }

    pub fn only_if_cached(&self) -> bool {
        self.only_if_cached
    }

    pub fn no_transform(&self) -> bool {
        self.no_transform
    }

    pub fn immutable(&self) -> bool {
        self.immutable
    }

    /// True when no directive is set; serializing yields nothing.
    pub fn is_empty(&self) -> bool {
        *self == CacheControl::default()
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = Separator::default();
        if self.no_cache {
            write!(f, "{}no-cache", sep.next())?;
        }
        if self.no_store {
            write!(f, "{}no-store", sep.next())?;
        }
        if let Some(v) = self.max_age {
            write!(f, "{}max-age={}", sep.next(), v.as_secs())?;
        }
        if let Some(v) = self.s_max_age {
            write!(f, "{}s-maxage={}", sep.next(), v.as_secs())?;
        }
        if self.private {
            write!(f, "{}private", sep.next())?;
        }
        if self.public {
            write!(f, "{}public", sep.next())?;
        }
        if self.must_revalidate {
            write!(f, "{}must-revalidate", sep.next())?;
        }
        if let Some(v) = self.max_stale {
            if v == Duration::MAX {
                write!(f, "{}max-stale", sep.next())?;
            } else {
                write!(f, "{}max-stale={}", sep.next(), v.as_secs())?;
            }
        }
        if let Some(v) = self.min_fresh {
            write!(f, "{}min-fresh={}", sep.next(), v.as_secs())?;
        }
        if self.only_if_cached {
            write!(f, "{}only-if-cached", sep.next())?;
        }
        if self.no_transform {
            write!(f, "{}no-transform", sep.next())?;
        }
        if self.immutable {
            write!(f, "{}immutable", sep.next())?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Separator(bool);

impl Separator {
    fn next(&mut self) -> &'static str {
        if self.0 {
            ", "
        } else {
            self.0 = true;
            ""
        }
    }
}

/// Builder for request-side cache directives.
#[derive(Debug, Default)]
pub struct CacheControlBuilder(CacheControl);

impl CacheControlBuilder {
    pub fn no_cache(mut self) -> Self {
        self.0.no_cache = true;
        self
    }

    pub fn no_store(mut self) -> Self {
        self.0.no_store = true;
        self
    }

    pub fn max_age(mut self, v: Duration) -> Self {
        self.0.max_age = Some(v);
        self
    }

    pub fn max_stale(mut self, v: Duration) -> Self {
        self.0.max_stale = Some(v);
        self
    }

    pub fn min_fresh(mut self, v: Duration) -> Self {
        self.0.min_fresh = Some(v);
        self
    }

    pub fn only_if_cached(mut self) -> Self {
        self.0.only_if_cached = true;
        self
    }

    pub fn no_transform(mut self) -> Self {
        self.0.no_transform = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.0.immutable = true;
        self
    }

    pub fn build(self) -> CacheControl {
        self.0
    }
}

/// Split a header value into `(name, argument)` directives. Quoted
/// arguments are unquoted; whitespace is trimmed; empty parts skipped.
fn directives(value: &str) -> impl Iterator<Item = (String, Option<&str>)> {
    value.split(',').filter_map(|part| {
        let part = part.trim();
        if part.is_empty() {
            return None;
        }
        let mut kv = part.splitn(2, '=');
        let name = kv.next()?.trim().to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }
        let arg = kv.next().map(|v| v.trim().trim_matches('"'));
        Some((name, arg))
    })
}

fn parse_seconds(arg: Option<&str>) -> Option<Duration> {
    arg.and_then(|v| v.parse::<u64>().ok()).map(Duration::from_secs)
}
