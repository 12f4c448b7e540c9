//! Insertion-ordered header multimap.
//!
//! Lookups are case-insensitive. A name may appear multiple times; the
//! relative order of all entries is the order they were added in. This is
//! the representation the rest of the engine relies on: the bridge emits
//! cookies in insertion order, and the cache keys vary-matching on the
//! exact header values that were sent.

use std::fmt;
use std::time::{Duration, SystemTime};

use chrono::DateTime;
use http::{HeaderName, HeaderValue};

use crate::Error;

/// An immutable, ordered list of name/value pairs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl Headers {
    /// A new empty builder.
    pub fn builder() -> HeadersBuilder {
        HeadersBuilder {
            entries: Vec::new(),
            error: None,
        }
    }

    /// Headers from a list of name/value string pairs.
    ///
    /// Panics on names or values that are not valid HTTP. Intended for
    /// literals; use [`Headers::builder()`] for runtime input.
    pub fn of<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Headers {
        let mut builder = Headers::builder();
        for (name, value) in pairs {
            builder = builder.add(name, value);
        }
        builder.build().expect("static header pairs")
    }

    /// The last value for `name`, or `None`. Values that are not valid
    /// UTF-8 are treated as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.to_str().ok())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a HeaderValue> + 'a
    where
        'b: 'a,
    {
        self.entries
            .iter()
            .filter(move |(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// All values for `name` as strings, in insertion order.
    pub fn values<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        self.get_all(name).filter_map(|v| v.to_str().ok()).collect()
    }

    /// Whether any entry exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get_all(name).next().is_some()
    }

    /// The value of `name` parsed as an HTTP date.
    pub fn date(&self, name: &str) -> Option<SystemTime> {
        let raw = self.get(name)?;
        let parsed = DateTime::parse_from_rfc2822(raw).ok()?;
        let secs = parsed.timestamp();
        if secs < 0 {
            return None;
        }
        SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(secs as u64))
    }

    /// Iterate all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n, v))
    }

    /// Distinct header names, in first-appearance order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (n, _) in &self.entries {
            if !names.iter().any(|seen| seen.eq_ignore_ascii_case(n.as_str())) {
                names.push(n.as_str());
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A builder seeded with a copy of these headers.
    pub fn new_builder(&self) -> HeadersBuilder {
        HeadersBuilder {
            entries: self.entries.clone(),
            error: None,
        }
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (n, v) in &self.entries {
            map.entry(&n.as_str(), &v.to_str().unwrap_or("<binary>"));
        }
        map.finish()
    }
}

/// Accumulates header entries and produces [`Headers`].
///
/// Invalid names or values are remembered and surface from [`build()`],
/// so chained construction stays infallible until the end.
///
/// [`build()`]: HeadersBuilder::build
#[derive(Debug, Default)]
pub struct HeadersBuilder {
    entries: Vec<(HeaderName, HeaderValue)>,
    error: Option<Error>,
}

impl HeadersBuilder {
    /// Append an entry, keeping any previous entries for the same name.
    pub fn add<K, V>(mut self, name: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        match convert(name, value) {
            Ok(entry) => self.entries.push(entry),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Set the only entry for a name, removing all previous ones. The new
    /// entry goes at the end.
    pub fn set<K, V>(mut self, name: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        match convert(name, value) {
            Ok((name, value)) => {
                self.entries.retain(|(n, _)| n != &name);
                self.entries.push((name, value));
            }
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Remove every entry matching `name` (case-insensitive).
    pub fn remove_all(mut self, name: &str) -> Self {
        self.entries
            .retain(|(n, _)| !n.as_str().eq_ignore_ascii_case(name));
        self
    }

    /// Produce the immutable header list, or the first conversion error.
    pub fn build(self) -> Result<Headers, Error> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(Headers {
            entries: self.entries,
        })
    }
}

fn convert<K, V>(name: K, value: V) -> Result<(HeaderName, HeaderValue), Error>
where
    HeaderName: TryFrom<K>,
    <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
    HeaderValue: TryFrom<V>,
    <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
{
    let name = HeaderName::try_from(name)
        .map_err(|e| Error::BadHeader(e.into().to_string()))?;
    let value = HeaderValue::try_from(value)
        .map_err(|e| Error::BadHeader(e.into().to_string()))?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_preserved() {
        let headers = Headers::of([("b", "1"), ("a", "2"), ("b", "3")]);
        let order: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(order, ["b", "a", "b"]);
    }

    #[test]
    fn get_is_case_insensitive_and_returns_last() {
        let headers = Headers::of([("Set-Cookie", "a=1"), ("set-cookie", "b=2")]);
        assert_eq!(headers.get("SET-COOKIE"), Some("b=2"));
        assert_eq!(headers.values("set-cookie"), ["a=1", "b=2"]);
    }

    #[test]
    fn set_replaces_all() {
        let headers = Headers::of([("x", "1"), ("x", "2"), ("y", "3")])
            .new_builder()
            .set("X", "9")
            .build()
            .unwrap();
        assert_eq!(headers.values("x"), ["9"]);
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn remove_all_removes_by_name() {
        let headers = Headers::of([("x", "1"), ("y", "2"), ("X", "3")])
            .new_builder()
            .remove_all("x")
            .build()
            .unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("y"), Some("2"));
    }

    #[test]
    fn invalid_name_surfaces_at_build() {
        let result = Headers::builder().add("bad\0name", "v").build();
        assert!(matches!(result, Err(Error::BadHeader(_))));
    }

    #[test]
    fn date_parses_imf_fixdate() {
        let headers = Headers::of([("Date", "Sun, 06 Nov 1994 08:49:37 GMT")]);
        let date = headers.date("date").unwrap();
        let secs = date
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(secs, 784111777);
    }

    #[test]
    fn names_are_distinct_in_order() {
        let headers = Headers::of([("b", "1"), ("a", "2"), ("B", "3")]);
        assert_eq!(headers.names(), ["b", "a"]);
    }
}
