//! Reacting to 401 and 407 challenges.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;

use crate::request::Request;
use crate::response::Response;

/// Produces a credentialed follow-up request for a challenge response, or
/// `None` to give up and surface the 401/407 to the caller.
///
/// The same trait serves both roles: the client's `authenticator` sees 401
/// responses from the origin server, its `proxy_authenticator` sees 407
/// responses from the proxy. Implementations must be thread-safe and should
/// return `None` when they recognize their own credentials in the failed
/// request, otherwise the engine keeps retrying until the follow-up limit.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, response: &Response) -> Option<Request>;
}

/// The default: never answers a challenge.
pub struct NoAuthentication;

impl Authenticator for NoAuthentication {
    fn authenticate(&self, _response: &Response) -> Option<Request> {
        None
    }
}

/// RFC 7617 Basic credentials: `Basic base64(username:password)`.
pub fn basic_credentials(username: &str, password: &str) -> String {
    let encoded = BASE64_STANDARD.encode(format!("{}:{}", username, password));
    format!("Basic {}", encoded)
}
