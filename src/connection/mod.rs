//! Connections, the per-call resource claim, and name resolution.
//!
//! A [`StreamAllocation`] is one logical hop's claim against the
//! connection pool: it finds or opens a connection, hands it to the
//! HTTP/1.1 codec for a single exchange, and carries the cancel latch.
//! Cancellation works by shutting down the in-flight socket so that
//! blocked reads and writes fail promptly; the engine never polls a flag
//! from inside blocking I/O.

use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http::Uri;
use log::debug;

use crate::ext::UriExt;
use crate::Error;

pub(crate) mod http1;
mod pool;

pub use pool::ConnectionPool;

/// Reasons an HTTP/1.1 connection cannot be used for another exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// HTTP/1.0 requires each request-response to end with a close.
    Http10,

    /// Client sent `connection: close`.
    ClientConnectionClose,

    /// Server sent `connection: close`.
    ServerConnectionClose,

    /// When doing expect-100 the server sent a final response before the
    /// body went out. The stream position is ambiguous afterwards.
    Not100Continue,

    /// Response body is close delimited. We do not know how much body data
    /// to receive; the socket closing is what ends it.
    CloseDelimitedBody,
}

impl CloseReason {
    pub(crate) fn explain(&self) -> &'static str {
        match self {
            CloseReason::Http10 => "version is http1.0",
            CloseReason::ClientConnectionClose => "client sent Connection: close",
            CloseReason::ServerConnectionClose => "server sent Connection: close",
            CloseReason::Not100Continue => "got non-100 response before sending body",
            CloseReason::CloseDelimitedBody => "response body is close delimited",
        }
    }
}

/// Where a connection goes: scheme flavor, host and effective port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    https: bool,
    host: String,
    port: u16,
}

impl Address {
    pub(crate) fn from_url(url: &Uri) -> Result<Address, Error> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::BadUrl(format!("url has no host: {}", url)))?;
        Ok(Address {
            https: url.is_https(),
            host: host.to_ascii_lowercase(),
            port: url.effective_port(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_https(&self) -> bool {
        self.https
    }
}

/// Resolves a host name to socket addresses. Implementations must be
/// thread-safe. The default uses the system resolver.
pub trait Dns: Send + Sync {
    fn lookup(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, Error>;
}

/// `getaddrinfo` through the standard library.
pub struct SystemDns;

impl Dns for SystemDns {
    fn lookup(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, Error> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(Error::Connect)?
            .collect();
        if addrs.is_empty() {
            return Err(Error::Connect(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses for {}", host),
            )));
        }
        Ok(addrs)
    }
}

/// A live socket plus the reuse bookkeeping the pool needs.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) address: Address,
    pub(crate) stream: Arc<TcpStream>,
    pub(crate) idle_since: Instant,
    /// Exchanges completed on this connection. Non-zero means the server
    /// could have dropped it while idle, which retry treats as recoverable.
    pub(crate) exchanges: u32,
}

impl Connection {
    /// Open a new connection for `address`, trying each resolved socket
    /// address in order.
    pub(crate) fn connect(
        address: &Address,
        dns: &dyn Dns,
        timeouts: &Timeouts,
    ) -> Result<Connection, Error> {
        if address.https {
            return Err(Error::HttpsNotSupported);
        }

        let addrs = dns.lookup(&address.host, address.port)?;
        let mut last_err: Option<std::io::Error> = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeouts.connect) {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(Error::Connect)?;
                    stream
                        .set_read_timeout(Some(timeouts.read))
                        .map_err(Error::Connect)?;
                    stream
                        .set_write_timeout(Some(timeouts.write))
                        .map_err(Error::Connect)?;
                    debug!("connected {}:{} via {}", address.host, address.port, addr);
                    return Ok(Connection {
                        address: address.clone(),
                        stream: Arc::new(stream),
                        idle_since: Instant::now(),
                        exchanges: 0,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::Connect(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no route attempted")
        })))
    }

    pub(crate) fn is_fresh(&self) -> bool {
        self.exchanges == 0
    }
}

/// The connect/read/write deadlines for one call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

/// One call's claim over the connection pool.
///
/// Created by the retry stage, re-created when a follow-up changes hosts,
/// and released on every terminal exit. The cancel latch lives here so
/// `Call::cancel()` can reach the in-flight socket.
pub(crate) struct StreamAllocation {
    pool: Arc<ConnectionPool>,
    dns: Arc<dyn Dns>,
    address: Address,
    timeouts: Timeouts,
    canceled: AtomicBool,
    /// Cleared to force-close the connection at release time (421 recovery).
    reuse_allowed: AtomicBool,
    active: Mutex<Option<Arc<TcpStream>>>,
}

impl StreamAllocation {
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        dns: Arc<dyn Dns>,
        address: Address,
        timeouts: Timeouts,
    ) -> StreamAllocation {
        StreamAllocation {
            pool,
            dns,
            address,
            timeouts,
            canceled: AtomicBool::new(false),
            reuse_allowed: AtomicBool::new(true),
            active: Mutex::new(None),
        }
    }

    pub(crate) fn address(&self) -> &Address {
        &self.address
    }

    pub(crate) fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Find a pooled connection or open a new one, registering its socket
    /// for cancellation.
    pub(crate) fn acquire(&self) -> Result<Connection, Error> {
        if self.is_canceled() {
            return Err(Error::Canceled);
        }

        let connection = match self.pool.take(&self.address) {
            Some(pooled) => {
                debug!("reuse pooled connection to {}", self.address.host);
                pooled.stream.set_read_timeout(Some(self.timeouts.read))?;
                pooled.stream.set_write_timeout(Some(self.timeouts.write))?;
                pooled
            }
            None => Connection::connect(&self.address, &*self.dns, &self.timeouts)?,
        };

        *self.active.lock().expect("allocation lock") = Some(connection.stream.clone());

        // Lost a race with cancel() while connecting.
        if self.is_canceled() {
            let _ = connection.stream.shutdown(Shutdown::Both);
            return Err(Error::Canceled);
        }

        Ok(connection)
    }

    /// Give the connection back after a finished exchange. `reusable` is
    /// false when the protocol demands a close.
    pub(crate) fn release_connection(&self, mut connection: Connection, reusable: bool) {
        *self.active.lock().expect("allocation lock") = None;
        // The no-reuse latch applies to the connection being released, not
        // to whatever this allocation acquires next.
        let reusable =
            reusable && self.reuse_allowed.swap(true, Ordering::SeqCst) && !self.is_canceled();
        if reusable {
            connection.exchanges += 1;
            connection.idle_since = Instant::now();
            self.pool.offer(connection);
        } else {
            let _ = connection.stream.shutdown(Shutdown::Both);
        }
    }

    /// Forbid reuse of whatever connection this allocation currently runs
    /// on. Used for 421 recovery.
    pub(crate) fn no_reuse(&self) {
        self.reuse_allowed.store(false, Ordering::SeqCst);
    }

    /// Release the claim entirely. Idempotent.
    pub(crate) fn release(&self) {
        *self.active.lock().expect("allocation lock") = None;
    }

    /// Flip the cancel latch and unblock any in-flight I/O.
    pub(crate) fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        if let Some(stream) = self.active.lock().expect("allocation lock").as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_from_url() {
        let url: Uri = "http://X.Test:8080/a?b=1".parse().unwrap();
        let address = Address::from_url(&url).unwrap();
        assert_eq!(address.host(), "x.test");
        assert_eq!(address.port(), 8080);
        assert!(!address.is_https());

        let url: Uri = "https://x.test/".parse().unwrap();
        let address = Address::from_url(&url).unwrap();
        assert_eq!(address.port(), 443);
        assert!(address.is_https());
    }

    #[test]
    fn https_needs_external_transport() {
        let url: Uri = "https://x.test/".parse().unwrap();
        let address = Address::from_url(&url).unwrap();
        let timeouts = Timeouts {
            connect: Duration::from_millis(100),
            read: Duration::from_millis(100),
            write: Duration::from_millis(100),
        };
        let err = Connection::connect(&address, &SystemDns, &timeouts).unwrap_err();
        assert!(matches!(err, Error::HttpsNotSupported));
    }
}
