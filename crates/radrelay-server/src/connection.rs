//! Per-client backend connection multiplexing
//!
//! Each client address gets its own ephemeral UDP socket connected to
//! the backend, so backend responses can be routed back to the right
//! client. The table is cleared on reload; orphaned reader tasks fail
//! on their next receive and exit.

use crate::lifecycle::Counters;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One client's dedicated link to the backend
pub struct Connection {
    client: SocketAddr,
    backend: Arc<UdpSocket>,
}

impl Connection {
    pub fn client(&self) -> SocketAddr {
        self.client
    }

    pub fn backend(&self) -> &Arc<UdpSocket> {
        &self.backend
    }
}

/// Client address to backend connection map.
///
/// The dial happens under the table lock so concurrent packets from a
/// new client produce exactly one connection.
pub struct ConnectionTable {
    backend_addr: SocketAddr,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    counters: Arc<Counters>,
}

impl ConnectionTable {
    pub fn new(backend_addr: SocketAddr, counters: Arc<Counters>) -> Self {
        ConnectionTable {
            backend_addr,
            connections: Mutex::new(HashMap::new()),
            counters,
        }
    }

    /// Look up the connection for a client, dialing the backend when
    /// none exists. The second element is true when this call created
    /// the connection. Returns None when the dial fails; the failure
    /// is counted against the client-failure threshold.
    pub async fn get_or_create(&self, client: SocketAddr) -> Option<(Arc<Connection>, bool)> {
        let key = client.to_string();
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(&key) {
            return Some((Arc::clone(existing), false));
        }
        let backend = match dial(self.backend_addr).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(client = %client, error = %e, "unable to connect to backend");
                self.counters.record_client_failure();
                return None;
            }
        };
        debug!(client = %client, backend = %self.backend_addr, "new client connection");
        let connection = Arc::new(Connection {
            client,
            backend: Arc::new(backend),
        });
        connections.insert(key, Arc::clone(&connection));
        Some((connection, true))
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Drop every connection (reload path)
    pub async fn clear(&self) {
        let mut connections = self.connections.lock().await;
        let dropped = connections.len();
        connections.clear();
        if dropped > 0 {
            debug!(dropped, "cleared connection table");
        }
    }
}

async fn dial(backend: SocketAddr) -> std::io::Result<UdpSocket> {
    let wildcard: IpAddr = if backend.is_ipv4() {
        Ipv4Addr::UNSPECIFIED.into()
    } else {
        Ipv6Addr::UNSPECIFIED.into()
    };
    let socket = UdpSocket::bind(SocketAddr::new(wildcard, 0)).await?;
    socket.connect(backend).await?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    #[tokio::test]
    async fn test_create_then_reuse() {
        let (_backend, addr) = backend().await;
        let table = ConnectionTable::new(addr, Arc::new(Counters::new()));
        let client: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        let (first, created) = table.get_or_create(client).await.unwrap();
        assert!(created);
        let (second, created) = table.get_or_create(client).await.unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_clients_get_distinct_connections() {
        let (_backend, addr) = backend().await;
        let table = ConnectionTable::new(addr, Arc::new(Counters::new()));

        table
            .get_or_create("127.0.0.1:40001".parse().unwrap())
            .await
            .unwrap();
        table
            .get_or_create("127.0.0.1:40002".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(table.len().await, 2);
    }

    #[tokio::test]
    async fn test_clear_empties_table() {
        let (_backend, addr) = backend().await;
        let table = ConnectionTable::new(addr, Arc::new(Counters::new()));
        table
            .get_or_create("127.0.0.1:40003".parse().unwrap())
            .await
            .unwrap();
        table.clear().await;
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn test_roundtrip_through_connection() {
        let (backend, addr) = backend().await;
        let table = ConnectionTable::new(addr, Arc::new(Counters::new()));
        let (connection, _) = table
            .get_or_create("127.0.0.1:40004".parse().unwrap())
            .await
            .unwrap();

        connection.backend().send(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = backend.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        backend.send_to(b"pong", from).await.unwrap();
        let n = connection.backend().recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }
}
