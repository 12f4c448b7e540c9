//! Request and response bodies.
//!
//! A [`RequestBody`] is either byte-backed, in which case the engine may
//! transmit it again on retries and redirects, or a one-shot stream that
//! can be sent at most once. A [`ResponseBody`] is always a one-shot
//! stream; closing (dropping) it is what releases the underlying
//! connection back to the pool.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Mutex;

use crate::Error;

/// The payload of an outgoing request.
pub struct RequestBody {
    inner: Inner,
}

enum Inner {
    Bytes {
        media_type: Option<String>,
        content: Vec<u8>,
    },
    Stream {
        media_type: Option<String>,
        length: Option<u64>,
        source: Mutex<Option<Box<dyn Read + Send>>>,
    },
}

impl RequestBody {
    /// A byte-backed body. These can be re-transmitted.
    pub fn new(media_type: Option<&str>, content: impl Into<Vec<u8>>) -> RequestBody {
        RequestBody {
            inner: Inner::Bytes {
                media_type: media_type.map(str::to_string),
                content: content.into(),
            },
        }
    }

    /// A streaming body read from `source`.
    ///
    /// `length` of `None` means the size is unknown and the request is sent
    /// with `Transfer-Encoding: chunked`. Streaming bodies are one-shot:
    /// they cannot be replayed after a connection failure or redirect.
    pub fn streaming(
        media_type: Option<&str>,
        length: Option<u64>,
        source: impl Read + Send + 'static,
    ) -> RequestBody {
        RequestBody {
            inner: Inner::Stream {
                media_type: media_type.map(str::to_string),
                length,
                source: Mutex::new(Some(Box::new(source))),
            },
        }
    }

    /// The zero-length body. `Content-Length: 0` on the wire.
    pub fn empty() -> RequestBody {
        RequestBody::new(None, Vec::new())
    }

    pub fn content_type(&self) -> Option<&str> {
        match &self.inner {
            Inner::Bytes { media_type, .. } => media_type.as_deref(),
            Inner::Stream { media_type, .. } => media_type.as_deref(),
        }
    }

    /// Size in bytes, or `None` when unknown ahead of transmission.
    pub fn content_length(&self) -> Option<u64> {
        match &self.inner {
            Inner::Bytes { content, .. } => Some(content.len() as u64),
            Inner::Stream { length, .. } => *length,
        }
    }

    /// Whether this body can be transmitted more than once.
    pub fn can_replay(&self) -> bool {
        matches!(self.inner, Inner::Bytes { .. })
    }

    /// Write the body to `sink`, returning the number of bytes written.
    ///
    /// Streaming bodies consume their source; a second call returns
    /// [`Error::BodyStreamConsumed`].
    pub fn write_to(&self, sink: &mut dyn Write) -> Result<u64, Error> {
        match &self.inner {
            Inner::Bytes { content, .. } => {
                sink.write_all(content)?;
                Ok(content.len() as u64)
            }
            Inner::Stream { source, .. } => {
                let mut taken = source
                    .lock()
                    .expect("request body source lock")
                    .take()
                    .ok_or(Error::BodyStreamConsumed)?;
                Ok(io::copy(&mut taken, sink)?)
            }
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Bytes { content, .. } => {
                write!(f, "RequestBody::Bytes({})", content.len())
            }
            Inner::Stream { length, .. } => {
                write!(f, "RequestBody::Stream({:?})", length)
            }
        }
    }
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        RequestBody::new(Some("text/plain; charset=utf-8"), value.as_bytes().to_vec())
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        RequestBody::new(Some("text/plain; charset=utf-8"), value.into_bytes())
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        RequestBody::new(None, value)
    }
}

impl From<&[u8]> for RequestBody {
    fn from(value: &[u8]) -> Self {
        RequestBody::new(None, value.to_vec())
    }
}

/// The payload of a response. Single-consumption.
pub struct ResponseBody {
    content_type: Option<String>,
    content_length: Option<u64>,
    source: Box<dyn Read + Send>,
}

impl ResponseBody {
    pub fn new(
        content_type: Option<&str>,
        content_length: Option<u64>,
        source: impl Read + Send + 'static,
    ) -> ResponseBody {
        ResponseBody {
            content_type: content_type.map(str::to_string),
            content_length,
            source: Box::new(source),
        }
    }

    /// A zero-length body.
    pub fn empty() -> ResponseBody {
        ResponseBody::new(None, Some(0), io::empty())
    }

    /// A byte-backed body, used for synthesized and cached responses.
    pub fn from_bytes(content_type: Option<&str>, content: Vec<u8>) -> ResponseBody {
        let len = content.len() as u64;
        ResponseBody::new(content_type, Some(len), io::Cursor::new(content))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Size in bytes when the server declared one. Absent for chunked and
    /// decompressed bodies.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Read the remaining body to a byte vector, consuming it.
    pub fn bytes(mut self) -> Result<Vec<u8>, Error> {
        let mut out = match self.content_length {
            Some(n) => Vec::with_capacity(n.min(64 * 1024) as usize),
            None => Vec::new(),
        };
        self.source.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Read the remaining body as UTF-8 text, consuming it.
    pub fn string(self) -> Result<String, Error> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes).map_err(|_| Error::Protocol("response body is not utf-8"))
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.source.read(buf)
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseBody({:?})", self.content_length)
    }
}
