//! Extension traits over the http crate types.

use http::uri::Scheme;
use http::{Method, StatusCode, Uri};

pub(crate) trait MethodExt {
    /// Whether a request body is allowed for this method.
    fn permits_request_body(&self) -> bool;
    /// Whether a request body must be present for this method.
    fn requires_request_body(&self) -> bool;
    /// Whether a successful response to this method invalidates a cached
    /// entry for the same url.
    fn invalidates_cache(&self) -> bool;
}

impl MethodExt for Method {
    fn permits_request_body(&self) -> bool {
        !matches!(*self, Method::GET | Method::HEAD)
    }

    fn requires_request_body(&self) -> bool {
        match self.as_str() {
            "POST" | "PUT" | "PATCH" | "PROPPATCH" | "REPORT" => true,
            _ => false,
        }
    }

    fn invalidates_cache(&self) -> bool {
        matches!(*self, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
            || self.as_str() == "MOVE"
    }
}

pub(crate) trait StatusExt {
    /// 307 and 308 redirect without changing the method or dropping the body.
    fn retains_method_on_redirect(&self) -> bool;
    /// 1xx responses that are not the final response.
    fn is_informational(&self) -> bool;
}

impl StatusExt for StatusCode {
    fn retains_method_on_redirect(&self) -> bool {
        matches!(
            *self,
            StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
        )
    }

    fn is_informational(&self) -> bool {
        self.as_u16() >= 100 && self.as_u16() < 200
    }
}

pub(crate) trait UriExt {
    /// Host for connecting. Uris without an authority have no host.
    fn host_str(&self) -> Option<&str>;
    /// Explicit port, or the scheme default.
    fn effective_port(&self) -> u16;
    fn is_https(&self) -> bool;
    /// The value for a `Host` header: `host` or `host:port` when the port
    /// differs from the scheme default.
    fn host_header(&self) -> Option<String>;
    /// Path plus query, defaulting to `/`.
    fn request_target(&self) -> &str;
}

impl UriExt for Uri {
    fn host_str(&self) -> Option<&str> {
        self.host()
    }

    fn effective_port(&self) -> u16 {
        if let Some(port) = self.port_u16() {
            return port;
        }
        if self.is_https() {
            443
        } else {
            80
        }
    }

    fn is_https(&self) -> bool {
        self.scheme() == Some(&Scheme::HTTPS)
    }

    fn host_header(&self) -> Option<String> {
        let host = self.host()?;
        let default = if self.is_https() { 443 } else { 80 };
        match self.port_u16() {
            Some(port) if port != default => Some(format!("{}:{}", host, port)),
            _ => Some(host.to_string()),
        }
    }

    fn request_target(&self) -> &str {
        self.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_body_tables() {
        assert!(!Method::GET.permits_request_body());
        assert!(!Method::HEAD.permits_request_body());
        assert!(Method::DELETE.permits_request_body());
        assert!(!Method::DELETE.requires_request_body());
        assert!(Method::POST.requires_request_body());
        assert!(Method::from_bytes(b"PROPPATCH").unwrap().requires_request_body());
        assert!(Method::from_bytes(b"REPORT").unwrap().requires_request_body());
    }

    #[test]
    fn host_header_omits_default_port() {
        let uri: Uri = "http://x.test:80/a".parse().unwrap();
        assert_eq!(uri.host_header().unwrap(), "x.test");

        let uri: Uri = "http://x.test:8080/a".parse().unwrap();
        assert_eq!(uri.host_header().unwrap(), "x.test:8080");

        let uri: Uri = "https://x.test/a".parse().unwrap();
        assert_eq!(uri.host_header().unwrap(), "x.test");
        assert_eq!(uri.effective_port(), 443);
    }

    #[test]
    fn request_target_defaults_to_root() {
        let uri: Uri = "http://x.test".parse().unwrap();
        assert_eq!(uri.request_target(), "/");
    }
}
