//! Cookies and the cookie jar interface.
//!
//! The engine never persists cookies itself. The bridge asks the
//! configured [`CookieJar`] for cookies before a request goes to the
//! network and hands back every `Set-Cookie` it sees. Jars must be
//! internally thread-safe; the engine holds no locks across jar calls.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::DateTime;
use http::Uri;

use crate::ext::UriExt;

/// A single HTTP cookie with the attributes relevant to sending it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    expires_at: Option<SystemTime>,
    domain: Option<String>,
    path: String,
    secure: bool,
    http_only: bool,
}

impl Cookie {
    pub fn new(name: &str, value: &str) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: value.to_string(),
            expires_at: None,
            domain: None,
            path: "/".to_string(),
            secure: false,
            http_only: false,
        }
    }

    /// Parse a `Set-Cookie` header value. Returns `None` when there is no
    /// `name=value` pair to speak of. Unknown attributes are skipped.
    pub fn parse(set_cookie: &str) -> Option<Cookie> {
        let mut parts = set_cookie.split(';');

        let pair = parts.next()?;
        let eq = pair.find('=')?;
        let name = pair[..eq].trim();
        let value = pair[eq + 1..].trim().trim_matches('"');
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie::new(name, value);
        for attr in parts {
            let mut kv = attr.splitn(2, '=');
            let key = kv.next().unwrap_or("").trim().to_ascii_lowercase();
            let val = kv.next().map(str::trim);
            match (key.as_str(), val) {
                ("expires", Some(v)) => {
                    if cookie.expires_at.is_none() {
                        cookie.expires_at = parse_http_date(v);
                    }
                }
                // Max-Age wins over Expires.
                ("max-age", Some(v)) => {
                    if let Ok(secs) = v.parse::<i64>() {
                        cookie.expires_at = Some(if secs <= 0 {
                            SystemTime::UNIX_EPOCH
                        } else {
                            SystemTime::now() + Duration::from_secs(secs as u64)
                        });
                    }
                }
                ("domain", Some(v)) => {
                    cookie.domain = Some(v.trim_start_matches('.').to_ascii_lowercase());
                }
                ("path", Some(v)) if v.starts_with('/') => cookie.path = v.to_string(),
                ("secure", _) => cookie.secure = true,
                ("httponly", _) => cookie.http_only = true,
                _ => {}
            }
        }
        Some(cookie)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn http_only(&self) -> bool {
        self.http_only
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.expires_at {
            Some(at) => at <= now,
            None => false,
        }
    }

    /// Whether this cookie should be sent on a request for `url`.
    pub fn matches(&self, url: &Uri) -> bool {
        if self.secure && !url.is_https() {
            return false;
        }
        if let Some(domain) = &self.domain {
            let host = match url.host_str() {
                Some(h) => h.to_ascii_lowercase(),
                None => return false,
            };
            if host != *domain && !host.ends_with(&format!(".{}", domain)) {
                return false;
            }
        }
        let path = url.request_target();
        path.starts_with(&self.path)
    }
}

fn parse_http_date(v: &str) -> Option<SystemTime> {
    let parsed = DateTime::parse_from_rfc2822(v).ok()?;
    let secs = parsed.timestamp();
    if secs < 0 {
        return Some(SystemTime::UNIX_EPOCH);
    }
    SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(secs as u64))
}

/// Where cookies come from and go to. Implementations must be thread-safe.
pub trait CookieJar: Send + Sync {
    /// Cookies to attach to a request for `url`, in the order they should
    /// appear in the `Cookie` header.
    fn load_for_request(&self, url: &Uri) -> Vec<Cookie>;

    /// Called once per network response that carried `Set-Cookie` headers.
    fn save_from_response(&self, url: &Uri, cookies: Vec<Cookie>);
}

/// The default jar: never sends, never stores.
pub struct NoCookies;

impl CookieJar for NoCookies {
    fn load_for_request(&self, _url: &Uri) -> Vec<Cookie> {
        Vec::new()
    }

    fn save_from_response(&self, _url: &Uri, _cookies: Vec<Cookie>) {}
}

/// A process-local jar keyed by host. Good enough for tests and tools;
/// real persistence belongs to an external store.
#[derive(Default)]
pub struct MemoryCookieJar {
    store: Mutex<HashMap<String, Vec<Cookie>>>,
}

impl MemoryCookieJar {
    pub fn new() -> MemoryCookieJar {
        MemoryCookieJar::default()
    }
}

impl CookieJar for MemoryCookieJar {
    fn load_for_request(&self, url: &Uri) -> Vec<Cookie> {
        let host = match url.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return Vec::new(),
        };
        let now = SystemTime::now();
        let store = self.store.lock().expect("cookie jar lock");
        store
            .get(&host)
            .map(|cookies| {
                cookies
                    .iter()
                    .filter(|c| !c.is_expired(now) && c.matches(url))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn save_from_response(&self, url: &Uri, cookies: Vec<Cookie>) {
        let host = match url.host_str() {
            Some(h) => h.to_ascii_lowercase(),
            None => return,
        };
        let mut store = self.store.lock().expect("cookie jar lock");
        let slot = store.entry(host).or_default();
        for cookie in cookies {
            slot.retain(|c| !(c.name == cookie.name && c.path == cookie.path));
            slot.push(cookie);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_name_value() {
        let c = Cookie::parse("sid=abc123").unwrap();
        assert_eq!(c.name(), "sid");
        assert_eq!(c.value(), "abc123");
        assert_eq!(c.path(), "/");
        assert!(!c.secure());
    }

    #[test]
    fn parse_attributes() {
        let c = Cookie::parse("sid=x; Path=/app; Domain=.x.test; Secure; HttpOnly").unwrap();
        assert_eq!(c.path(), "/app");
        assert_eq!(c.domain(), Some("x.test"));
        assert!(c.secure());
        assert!(c.http_only());
    }

    #[test]
    fn max_age_zero_expires_immediately() {
        let c = Cookie::parse("sid=x; Max-Age=0").unwrap();
        assert!(c.is_expired(SystemTime::now()));
    }

    #[test]
    fn parse_rejects_nameless() {
        assert!(Cookie::parse("=value").is_none());
        assert!(Cookie::parse("no-equals-here").is_none());
    }

    #[test]
    fn secure_cookie_needs_https() {
        let c = Cookie::parse("sid=x; Secure").unwrap();
        assert!(!c.matches(&"http://x.test/".parse().unwrap()));
        assert!(c.matches(&"https://x.test/".parse().unwrap()));
    }

    #[test]
    fn memory_jar_round_trip() {
        let jar = MemoryCookieJar::new();
        let url: Uri = "http://x.test/a".parse().unwrap();

        jar.save_from_response(&url, vec![Cookie::new("a", "1"), Cookie::new("b", "2")]);
        let loaded = jar.load_for_request(&url);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name(), "a");

        // Replacement by name+path.
        jar.save_from_response(&url, vec![Cookie::new("a", "9")]);
        let loaded = jar.load_for_request(&url);
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|c| c.name() == "a" && c.value() == "9"));

        // Different host sees nothing.
        let other: Uri = "http://y.test/".parse().unwrap();
        assert!(jar.load_for_request(&other).is_empty());
    }
}
