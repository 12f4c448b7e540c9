//! Keep-alive connection pool.
//!
//! Idle connections are held per address and evicted least-recently-used
//! when the idle cap is exceeded or their keep-alive window passes.
//! Cleanup runs opportunistically on every take/offer, so no timer thread
//! is needed for correctness.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;

use super::{Address, Connection};

pub struct ConnectionPool {
    max_idle: usize,
    keep_alive: Duration,
    idle: Mutex<Vec<Connection>>,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        ConnectionPool::new(5, Duration::from_secs(5 * 60))
    }
}

impl ConnectionPool {
    /// A pool holding up to `max_idle` idle connections, each for at most
    /// `keep_alive` after its last exchange.
    pub fn new(max_idle: usize, keep_alive: Duration) -> ConnectionPool {
        ConnectionPool {
            max_idle,
            keep_alive,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Number of currently idle connections.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("pool lock").len()
    }

    /// Close and drop every idle connection.
    pub fn evict_all(&self) {
        let mut idle = self.idle.lock().expect("pool lock");
        idle.clear();
    }

    /// Take an idle connection for `address`, most recently parked first.
    pub(crate) fn take(&self, address: &Address) -> Option<Connection> {
        let now = Instant::now();
        let mut idle = self.idle.lock().expect("pool lock");
        Self::expire(&mut idle, now, self.keep_alive);

        let pos = idle.iter().rposition(|c| &c.address == address)?;
        Some(idle.remove(pos))
    }

    /// Park a reusable connection.
    pub(crate) fn offer(&self, connection: Connection) {
        let now = Instant::now();
        let mut idle = self.idle.lock().expect("pool lock");
        Self::expire(&mut idle, now, self.keep_alive);

        idle.push(connection);
        while idle.len() > self.max_idle {
            // Index 0 is the least recently parked.
            let evicted = idle.remove(0);
            debug!("evict idle connection to {}", evicted.address.host());
        }
    }

    fn expire(idle: &mut Vec<Connection>, now: Instant, keep_alive: Duration) {
        idle.retain(|c| now.duration_since(c.idle_since) < keep_alive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{SystemDns, Timeouts};
    use std::net::TcpListener;

    fn local_connection(listener: &TcpListener) -> Connection {
        let addr = listener.local_addr().unwrap();
        let address = Address::from_url(
            &format!("http://127.0.0.1:{}/", addr.port()).parse().unwrap(),
        )
        .unwrap();
        let timeouts = Timeouts {
            connect: Duration::from_secs(1),
            read: Duration::from_secs(1),
            write: Duration::from_secs(1),
        };
        Connection::connect(&address, &SystemDns, &timeouts).unwrap()
    }

    #[test]
    fn take_matches_address() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let pool = ConnectionPool::default();
        let conn = local_connection(&listener);
        let address = conn.address.clone();

        pool.offer(conn);
        assert_eq!(pool.idle_count(), 1);

        let other = Address::from_url(&"http://other.test/".parse().unwrap()).unwrap();
        assert!(pool.take(&other).is_none());
        assert!(pool.take(&address).is_some());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn idle_cap_evicts_oldest() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let pool = ConnectionPool::new(2, Duration::from_secs(60));

        for _ in 0..3 {
            pool.offer(local_connection(&listener));
        }
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn keep_alive_expiry() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let pool = ConnectionPool::new(5, Duration::from_millis(0));
        let conn = local_connection(&listener);
        let address = conn.address.clone();

        pool.offer(conn);
        assert!(pool.take(&address).is_none());
    }
}
