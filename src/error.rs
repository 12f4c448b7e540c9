use std::fmt;
use std::io;

use http::{Method, StatusCode};

/// Error type for callwire
#[derive(Debug)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum Error {
    /// Transport-level failure: read, write, or timeout mid-exchange.
    Io(io::Error),
    /// Name resolution or connection establishment failed. Always safe to
    /// retry since no request bytes went out.
    Connect(io::Error),
    /// A pooled connection died before yielding a response. Recoverable on
    /// a fresh connection.
    StaleConnection,
    BadHeader(String),
    UnsupportedScheme(String),
    MethodForbidsBody(Method),
    MethodRequiresBody(Method),
    MissingUrl,
    BadUrl(String),
    InvalidMethod(String),
    HttpParseFail(String),
    HttpParseTooManyHeaders,
    ResponseInvalidStatus,
    BodyLargerThanContentLength,
    BodyStreamConsumed,

    /// The engine followed 20 redirects/auth retries without reaching a
    /// final response.
    TooManyFollowUps(u32),
    BadLocationHeader(String),
    /// A response promised no body (HEAD, 204, 205) but carried one.
    UnexpectedBody(StatusCode),
    /// The server replied with something the protocol does not allow here.
    Protocol(&'static str),
    /// `https` request without a TLS-capable transport configured.
    HttpsNotSupported,

    /// The call was canceled. One-way latch; observable from any thread.
    Canceled,

    /// `execute()` or `enqueue()` on a call that already ran.
    AlreadyExecuted,
    /// An interceptor called `proceed` more than once on the same chain.
    ChainProceedTwice,
    /// The terminal interceptor called `proceed`.
    ChainExhausted,
    /// A network interceptor redirected to a different host while a
    /// connection was held.
    ChainHostChanged,
}

impl Error {
    /// True when the underlying cause is the cancel latch.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// True for transport failures, including timeouts.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Connect(_) | Error::StaleConnection)
    }

    pub(crate) fn is_timeout(&self) -> bool {
        match self {
            Error::Io(e) | Error::Connect(e) => {
                matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
            }
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<httparse::Error> for Error {
    fn from(value: httparse::Error) -> Self {
        Error::HttpParseFail(value.to_string())
    }
}

impl From<http::Error> for Error {
    fn from(value: http::Error) -> Self {
        Error::BadHeader(value.to_string())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::Connect(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(v) => write!(f, "io: {}", v),
            Error::Connect(v) => write!(f, "connect: {}", v),
            Error::StaleConnection => {
                write!(f, "pooled connection closed before the response")
            }
            Error::BadHeader(v) => write!(f, "bad header: {}", v),
            Error::UnsupportedScheme(v) => write!(f, "unsupported scheme: {}", v),
            Error::MethodForbidsBody(m) => write!(f, "method {} must not have a request body", m),
            Error::MethodRequiresBody(m) => write!(f, "method {} must have a request body", m),
            Error::MissingUrl => write!(f, "request has no url"),
            Error::BadUrl(v) => write!(f, "bad url: {}", v),
            Error::InvalidMethod(v) => write!(f, "invalid http method: {}", v),
            Error::HttpParseFail(v) => write!(f, "http parse fail: {}", v),
            Error::HttpParseTooManyHeaders => write!(f, "http parse resulted in too many headers"),
            Error::ResponseInvalidStatus => write!(f, "http response invalid status"),
            Error::BodyLargerThanContentLength => {
                write!(f, "attempt to write larger body than content-length")
            }
            Error::BodyStreamConsumed => write!(f, "one-shot request body already consumed"),
            Error::TooManyFollowUps(n) => write!(f, "too many follow-up requests: {}", n),
            Error::BadLocationHeader(v) => write!(f, "location header is malformed: {}", v),
            Error::UnexpectedBody(s) => write!(f, "response {} must not have a body", s),
            Error::Protocol(v) => write!(f, "protocol: {}", v),
            Error::HttpsNotSupported => {
                write!(f, "https requires an external tls transport, none is configured")
            }
            Error::Canceled => write!(f, "canceled"),
            Error::AlreadyExecuted => write!(f, "call already executed"),
            Error::ChainProceedTwice => {
                write!(f, "interceptor must call proceed() exactly once")
            }
            Error::ChainExhausted => {
                write!(f, "the terminal interceptor must not call proceed()")
            }
            Error::ChainHostChanged => {
                write!(f, "network interceptor must retain the same host and port")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_is_classified() {
        let e = Error::from(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
        assert!(e.is_io());
        assert!(e.is_timeout());
        assert!(!e.is_canceled());
    }

    #[test]
    fn from_httparse_error() {
        let error: Error = httparse::Error::HeaderName.into();
        assert!(matches!(error, Error::HttpParseFail(_)));
    }

    #[test]
    fn display_is_terse() {
        assert_eq!(Error::Canceled.to_string(), "canceled");
        assert_eq!(
            Error::TooManyFollowUps(21).to_string(),
            "too many follow-up requests: 21"
        );
    }
}
