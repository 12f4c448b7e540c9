//! HTTP/1.1 codec: drives exactly one request/response exchange.
//!
//! Writing is incremental against the socket; reading accumulates into a
//! buffer that `httparse` is retried on until the full status line and
//! headers are in. Leftover buffered bytes carry over into the body
//! stream. When the body stream ends cleanly the connection goes back to
//! the pool; dropping the stream early closes the connection, since the
//! stream position would be unknown.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use http::{Method, StatusCode, Version};
use log::{debug, trace};

use crate::body::{RequestBody, ResponseBody};
use crate::ext::{StatusExt, UriExt};
use crate::headers::Headers;
use crate::request::Request;
use crate::Error;

use super::{CloseReason, Connection, StreamAllocation};

/// Max number of headers to parse from an HTTP response
pub(crate) const MAX_RESPONSE_HEADERS: usize = 128;

/// How long to wait for the interim response to `Expect: 100-continue`
/// before sending the body anyway.
const EXPECT_100_TIMEOUT: Duration = Duration::from_secs(1);

/// Status line and headers of a response, before a body is bound.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: StatusCode,
    pub message: String,
    pub version: Version,
    pub headers: Headers,
}

pub(crate) struct Http1Codec {
    connection: Option<Connection>,
    allocation: Arc<StreamAllocation>,
    buf: Vec<u8>,
    response_started: bool,
    close_reasons: Vec<CloseReason>,
}

impl Http1Codec {
    pub(crate) fn new(connection: Connection, allocation: Arc<StreamAllocation>) -> Http1Codec {
        Http1Codec {
            connection: Some(connection),
            allocation,
            buf: Vec::new(),
            response_started: false,
            close_reasons: Vec::new(),
        }
    }

    /// Where the held connection points, while one is held.
    pub(crate) fn address(&self) -> Option<&super::Address> {
        self.connection.as_ref().map(|c| &c.address)
    }

    fn stream(&self) -> Arc<TcpStream> {
        self.connection
            .as_ref()
            .expect("codec has a connection")
            .stream
            .clone()
    }

    fn is_reused_connection(&self) -> bool {
        self.connection
            .as_ref()
            .map_or(false, |c| !c.is_fresh())
    }

    /// Map a raw I/O failure to the engine's classification: canceled wins,
    /// timeouts stay timeouts, and anything else on an idle-reused
    /// connection that never produced a response byte is a stale reuse.
    fn wire_error(&self, e: io::Error) -> Error {
        if self.allocation.is_canceled() {
            return Error::Canceled;
        }
        if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
            return Error::Io(e);
        }
        if self.is_reused_connection() && !self.response_started {
            debug!("reused connection failed before response: {}", e);
            return Error::StaleConnection;
        }
        Error::Io(e)
    }

    /// Emit the request line and headers.
    pub(crate) fn write_request_headers(&mut self, request: &Request) -> Result<(), Error> {
        let mut prelude = Vec::with_capacity(256);
        write!(
            prelude,
            "{} {} {:?}\r\n",
            request.method(),
            request.url().request_target(),
            Version::HTTP_11
        )
        .expect("write to vec");
        for (name, value) in request.headers().iter() {
            prelude.extend_from_slice(name.as_str().as_bytes());
            prelude.extend_from_slice(b": ");
            prelude.extend_from_slice(value.as_bytes());
            prelude.extend_from_slice(b"\r\n");
        }
        prelude.extend_from_slice(b"\r\n");

        if value_has_token(request.header("connection"), "close") {
            self.close_reasons.push(CloseReason::ClientConnectionClose);
        }

        trace!(
            "write request prelude {} {} ({} bytes)",
            request.method(),
            request.url(),
            prelude.len()
        );
        let stream = self.stream();
        (&*stream).write_all(&prelude).map_err(|e| self.wire_error(e))
    }

    /// Stream the request body, framed by `Content-Length` when the size
    /// is known and chunked otherwise.
    pub(crate) fn write_request_body(&mut self, body: &RequestBody) -> Result<(), Error> {
        let stream = self.stream();
        match body.content_length() {
            Some(declared) => {
                let mut sink: &TcpStream = &stream;
                let written = body.write_to(&mut sink).map_err(|e| match e {
                    Error::Io(io) => self.wire_error(io),
                    other => other,
                })?;
                if written > declared {
                    return Err(Error::BodyLargerThanContentLength);
                }
                if written < declared {
                    return Err(Error::Protocol("request body shorter than content-length"));
                }
            }
            None => {
                let mut chunked = ChunkedWriter { sink: &*stream };
                body.write_to(&mut chunked).map_err(|e| match e {
                    Error::Io(io) => self.wire_error(io),
                    other => other,
                })?;
                chunked.finish().map_err(|e| self.wire_error(e))?;
            }
        }
        Ok(())
    }

    /// Flush buffered request bytes to the wire.
    pub(crate) fn finish_request(&mut self) -> Result<(), Error> {
        let stream = self.stream();
        (&*stream).flush().map_err(|e| self.wire_error(e))
    }

    /// Read one response's status line and headers, blocking as needed.
    pub(crate) fn read_response_headers(&mut self) -> Result<RawResponse, Error> {
        loop {
            if let Some((used, raw)) = try_parse_response(&self.buf)? {
                self.buf.drain(..used);
                debug!("read response {} {:?}", raw.status, raw.version);
                if !raw.status.is_informational() {
                    self.note_final_response(&raw);
                }
                return Ok(raw);
            }
            self.fill()?;
        }
    }

    /// Await the interim response to `Expect: 100-continue` under a short
    /// deadline. `None` means the server stayed silent and the body should
    /// be sent anyway.
    pub(crate) fn read_interim_response(&mut self) -> Result<Option<RawResponse>, Error> {
        let stream = self.stream();
        let deadline = EXPECT_100_TIMEOUT.min(self.allocation.timeouts().read);
        stream.set_read_timeout(Some(deadline))?;
        let result = self.read_response_headers();
        stream.set_read_timeout(Some(self.allocation.timeouts().read))?;

        match result {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The server sent a final response where only a 100 was legal. The
    /// stream position after it is ambiguous, so the connection must close.
    pub(crate) fn note_not_100(&mut self) {
        self.close_reasons.push(CloseReason::Not100Continue);
    }

    pub(crate) fn close_reason(&self) -> Option<&'static str> {
        self.close_reasons.first().map(|r| r.explain())
    }

    fn note_final_response(&mut self, raw: &RawResponse) {
        if raw.version == Version::HTTP_10
            && !value_has_token(raw.headers.get("connection"), "keep-alive")
        {
            self.close_reasons.push(CloseReason::Http10);
        }
        if value_has_token(raw.headers.get("connection"), "close") {
            self.close_reasons.push(CloseReason::ServerConnectionClose);
        }
    }

    fn fill(&mut self) -> Result<(), Error> {
        let stream = self.stream();
        let mut chunk = [0u8; 8192];
        let n = (&*stream).read(&mut chunk).map_err(|e| self.wire_error(e))?;
        if n == 0 {
            if self.allocation.is_canceled() {
                return Err(Error::Canceled);
            }
            if self.is_reused_connection() && !self.response_started {
                return Err(Error::StaleConnection);
            }
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before a full response",
            )));
        }
        self.response_started = true;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Bind the response body stream, consuming the codec. Body completion
    /// or drop is what releases the connection.
    pub(crate) fn open_response_body(
        mut self,
        method: &Method,
        raw: &RawResponse,
    ) -> Result<ResponseBody, Error> {
        let reader = match BodyReader::for_response(method, raw.status, &raw.headers) {
            Ok(v) => v,
            Err(e) => {
                self.abandon();
                return Err(e);
            }
        };

        if matches!(reader, BodyReader::CloseDelimited) {
            self.close_reasons.push(CloseReason::CloseDelimitedBody);
        }
        let reusable = self.close_reasons.is_empty();
        if let Some(reason) = self.close_reasons.first() {
            debug!("connection will not be reused: {}", reason.explain());
        }

        let content_type = raw.headers.get("content-type").map(str::to_string);
        let content_length = match &reader {
            BodyReader::LengthDelimited(n) => Some(*n),
            BodyReader::NoBody => Some(0),
            _ => None,
        };

        if matches!(reader, BodyReader::NoBody) {
            // No bytes follow; the exchange is already complete.
            let connection = self.connection.take().expect("codec has a connection");
            self.allocation.release_connection(connection, reusable);
            return Ok(ResponseBody::new(content_type.as_deref(), Some(0), io::empty()));
        }

        let source = Http1BodySource {
            connection: self.connection.take(),
            allocation: self.allocation.clone(),
            buf: std::mem::take(&mut self.buf),
            pos: 0,
            reader,
            reusable,
            done: false,
        };
        Ok(ResponseBody::new(
            content_type.as_deref(),
            content_length,
            source,
        ))
    }

    /// Tear down without binding a body. Used on failed exchanges.
    pub(crate) fn abandon(mut self) {
        if let Some(connection) = self.connection.take() {
            self.allocation.release_connection(connection, false);
        }
    }
}

/// How the response body ends.
#[derive(Debug)]
enum BodyReader {
    /// `Content-Length` bytes remain.
    LengthDelimited(u64),
    /// `Transfer-Encoding: chunked` framing.
    Chunked(ChunkPhase),
    /// HTTP/1.0 semantics: the socket closing ends the body.
    CloseDelimited,
    /// The response promises no body at all.
    NoBody,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ChunkPhase {
    Size,
    Data(u64),
    DataCrLf,
    Trailers,
}

impl BodyReader {
    fn for_response(method: &Method, status: StatusCode, headers: &Headers) -> Result<BodyReader, Error> {
        let chunked = value_has_token(headers.get("transfer-encoding"), "chunked");
        let content_length = match headers.get("content-length") {
            Some(v) => Some(
                v.trim()
                    .parse::<u64>()
                    .map_err(|_| Error::BadHeader(format!("content-length: {}", v)))?,
            ),
            None => None,
        };

        if *method == Method::HEAD || status == StatusCode::NOT_MODIFIED {
            return Ok(BodyReader::NoBody);
        }
        if matches!(status.as_u16(), 204 | 205) {
            if chunked || content_length.map_or(false, |n| n > 0) {
                return Err(Error::UnexpectedBody(status));
            }
            return Ok(BodyReader::NoBody);
        }
        if chunked {
            return Ok(BodyReader::Chunked(ChunkPhase::Size));
        }
        if let Some(n) = content_length {
            return Ok(BodyReader::LengthDelimited(n));
        }
        Ok(BodyReader::CloseDelimited)
    }
}

/// The one-shot stream behind a [`ResponseBody`]. Owns the connection for
/// the remainder of the exchange.
struct Http1BodySource {
    connection: Option<Connection>,
    allocation: Arc<StreamAllocation>,
    buf: Vec<u8>,
    pos: usize,
    reader: BodyReader,
    reusable: bool,
    done: bool,
}

impl Http1BodySource {
    /// Serve from the header-read leftover first, then the socket.
    fn read_raw(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buf.len() {
            let n = (self.buf.len() - self.pos).min(out.len());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        let stream = self
            .connection
            .as_ref()
            .expect("body source has a connection")
            .stream
            .clone();
        (&*stream).read(out)
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read_raw(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    /// Read up to and including a `\n`, without it (and a trailing `\r`).
    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::with_capacity(16);
        loop {
            match self.next_byte()? {
                None => return Err(self.eof_error()),
                Some(b'\n') => break,
                Some(b) => line.push(b),
            }
            if line.len() > 1024 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "chunk metadata line too long",
                ));
            }
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }

    fn eof_error(&self) -> io::Error {
        if self.allocation.is_canceled() {
            io::Error::new(io::ErrorKind::Other, "canceled")
        } else {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid response body",
            )
        }
    }

    /// The body ended cleanly; settle the connection's fate.
    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        // Bytes buffered past the body end mean the stream position is off.
        let clean = self.pos >= self.buf.len();
        if let Some(connection) = self.connection.take() {
            self.allocation
                .release_connection(connection, self.reusable && clean);
        }
    }

    fn read_chunked(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            let phase = match &mut self.reader {
                BodyReader::Chunked(p) => p,
                _ => unreachable!("read_chunked on non-chunked reader"),
            };
            match *phase {
                ChunkPhase::Size => {
                    let line = self.read_line()?;
                    let size = parse_chunk_size(&line)?;
                    let phase = match &mut self.reader {
                        BodyReader::Chunked(p) => p,
                        _ => unreachable!(),
                    };
                    if size == 0 {
                        *phase = ChunkPhase::Trailers;
                    } else {
                        *phase = ChunkPhase::Data(size);
                    }
                }
                ChunkPhase::Data(remaining) => {
                    let want = (remaining.min(out.len() as u64)) as usize;
                    let n = self.read_raw(&mut out[..want])?;
                    if n == 0 {
                        return Err(self.eof_error());
                    }
                    let phase = match &mut self.reader {
                        BodyReader::Chunked(p) => p,
                        _ => unreachable!(),
                    };
                    let left = remaining - n as u64;
                    *phase = if left == 0 {
                        ChunkPhase::DataCrLf
                    } else {
                        ChunkPhase::Data(left)
                    };
                    return Ok(n);
                }
                ChunkPhase::DataCrLf => {
                    let line = self.read_line()?;
                    if !line.is_empty() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "chunk data not followed by crlf",
                        ));
                    }
                    let phase = match &mut self.reader {
                        BodyReader::Chunked(p) => p,
                        _ => unreachable!(),
                    };
                    *phase = ChunkPhase::Size;
                }
                ChunkPhase::Trailers => {
                    // Trailer headers are read and discarded.
                    loop {
                        let line = self.read_line()?;
                        if line.is_empty() {
                            break;
                        }
                    }
                    self.finish();
                    return Ok(0);
                }
            }
        }
    }
}

impl Read for Http1BodySource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.done || out.is_empty() {
            return Ok(0);
        }
        match self.reader {
            BodyReader::NoBody => {
                self.finish();
                Ok(0)
            }
            BodyReader::LengthDelimited(remaining) => {
                if remaining == 0 {
                    self.finish();
                    return Ok(0);
                }
                let want = (remaining.min(out.len() as u64)) as usize;
                let n = self.read_raw(&mut out[..want])?;
                if n == 0 {
                    return Err(self.eof_error());
                }
                let left = remaining - n as u64;
                self.reader = BodyReader::LengthDelimited(left);
                if left == 0 {
                    self.finish();
                }
                Ok(n)
            }
            BodyReader::Chunked(_) => self.read_chunked(out),
            BodyReader::CloseDelimited => {
                let n = self.read_raw(out)?;
                if n == 0 {
                    if self.allocation.is_canceled() {
                        return Err(io::Error::new(io::ErrorKind::Other, "canceled"));
                    }
                    self.finish();
                }
                Ok(n)
            }
        }
    }
}

impl Drop for Http1BodySource {
    fn drop(&mut self) {
        if !self.done {
            // Abandoned mid body; the connection cannot be reused.
            if let Some(connection) = self.connection.take() {
                self.allocation.release_connection(connection, false);
            }
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> io::Result<u64> {
    let text = std::str::from_utf8(line)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk length is not ascii"))?;
    // Chunk extensions after ';' are ignored.
    let hex = text.split(';').next().unwrap_or("").trim();
    u64::from_str_radix(hex, 16)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk length is not a number"))
}

/// Chunked transfer encoding on the write side. Each `write` becomes one
/// chunk; `finish` emits the terminator.
struct ChunkedWriter<W: Write> {
    sink: W,
}

impl<W: Write> ChunkedWriter<W> {
    fn finish(&mut self) -> io::Result<()> {
        self.sink.write_all(b"0\r\n\r\n")?;
        self.sink.flush()
    }
}

impl<W: Write> Write for ChunkedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        write!(self.sink, "{:x}\r\n", buf.len())?;
        self.sink.write_all(buf)?;
        self.sink.write_all(b"\r\n")?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Whether a comma-separated header value contains `token`.
fn value_has_token(value: Option<&str>, token: &str) -> bool {
    match value {
        Some(v) => v
            .split(',')
            .any(|part| part.trim().eq_ignore_ascii_case(token)),
        None => false,
    }
}

fn try_parse_response(input: &[u8]) -> Result<Option<(usize, RawResponse)>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    let used = match response.parse(input) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => return Err(Error::HttpParseTooManyHeaders),
        Err(e) => return Err(e.into()),
    };

    let version = match response.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(Error::HttpParseFail("unsupported response version".to_string())),
    };
    let code = response.code.ok_or(Error::ResponseInvalidStatus)?;
    let status = StatusCode::from_u16(code).map_err(|_| Error::ResponseInvalidStatus)?;
    let message = response.reason.unwrap_or("").to_string();

    let mut builder = Headers::builder();
    for h in response.headers.iter() {
        builder = builder.add(h.name, h.value);
    }

    Ok(Some((
        used,
        RawResponse {
            status,
            message,
            version,
            headers: builder.build()?,
        },
    )))
}
