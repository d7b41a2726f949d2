//! UDP relay loops
//!
//! Proxy mode reads client datagrams, authorizes them and forwards the
//! raw bytes over the client's backend connection; one spawned reader
//! per connection relays backend responses back. Accounting mode only
//! ingests datagrams into the accounting hook and never relays.
//! Per-packet errors are logged and the loop continues; only socket
//! teardown ends a loop.

use crate::connection::{Connection, ConnectionTable};
use crate::envelope::PacketEnvelope;
use crate::pipeline::{AuthMode, AuthorizationPipeline, ReasonCode};
use radrelay_proto::Packet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

pub struct RelayService {
    socket: Arc<UdpSocket>,
    table: Arc<ConnectionTable>,
    pipeline: Arc<AuthorizationPipeline>,
    no_reject: bool,
}

impl RelayService {
    pub fn new(
        socket: Arc<UdpSocket>,
        table: Arc<ConnectionTable>,
        pipeline: Arc<AuthorizationPipeline>,
        no_reject: bool,
    ) -> Self {
        RelayService {
            socket,
            table,
            pipeline,
            no_reject,
        }
    }

    /// Client-facing proxy loop
    pub async fn run_proxy(&self) {
        let mut buffer = [0u8; Packet::MAX_PACKET_SIZE];
        loop {
            let (n, client) = match self.socket.recv_from(&mut buffer).await {
                Ok(read) => read,
                Err(e) => {
                    warn!(error = %e, "client read failed");
                    continue;
                }
            };
            self.handle_request(buffer[..n].to_vec(), client).await;
        }
    }

    async fn handle_request(&self, data: Vec<u8>, client: SocketAddr) {
        let Some((connection, created)) = self.table.get_or_create(client).await else {
            return;
        };
        if created {
            self.spawn_backend_reader(connection.clone());
        }
        let mut envelope = PacketEnvelope::new(data, Some(client));
        match self.pipeline.authorize(Some(&mut envelope), AuthMode::Pre) {
            ReasonCode::Success => {
                if let Err(e) = connection.backend().send(envelope.raw()).await {
                    warn!(client = %client, error = %e, "backend write failed");
                }
            }
            // never answer a sender that failed the secret check
            ReasonCode::BadSecret => {
                debug!(client = %client, "dropped (bad secret)");
            }
            reason => {
                debug!(client = %client, ?reason, "unauthorized");
                if !self.no_reject {
                    self.send_reject(&envelope, client).await;
                }
            }
        }
    }

    async fn send_reject(&self, envelope: &PacketEnvelope, client: SocketAddr) {
        let Some(bytes) = self.pipeline.reject_for(envelope) else {
            return;
        };
        if let Err(e) = self.socket.send_to(&bytes, client).await {
            warn!(client = %client, error = %e, "reject write failed");
        }
    }

    /// Relay backend responses for one connection back to its client.
    /// Post checks are audit-only; a failed check is logged but the
    /// response is still relayed.
    fn spawn_backend_reader(&self, connection: Arc<Connection>) {
        let socket = Arc::clone(&self.socket);
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            let client = connection.client();
            let mut buffer = [0u8; Packet::MAX_PACKET_SIZE];
            loop {
                let n = match connection.backend().recv(&mut buffer).await {
                    Ok(n) => n,
                    Err(e) => {
                        debug!(client = %client, error = %e, "backend reader exiting");
                        return;
                    }
                };
                let mut envelope = PacketEnvelope::new(buffer[..n].to_vec(), Some(client));
                let verdict = pipeline.authorize(Some(&mut envelope), AuthMode::Post);
                if verdict != ReasonCode::Success {
                    warn!(client = %client, ?verdict, "postauth check failed");
                }
                if let Err(e) = socket.send_to(&buffer[..n], client).await {
                    warn!(client = %client, error = %e, "client write failed");
                }
            }
        });
    }

    /// Accounting ingestion loop; nothing is relayed
    pub async fn run_accounting(&self) {
        let mut buffer = [0u8; Packet::MAX_PACKET_SIZE];
        loop {
            let (n, client) = match self.socket.recv_from(&mut buffer).await {
                Ok(read) => read,
                Err(e) => {
                    warn!(error = %e, "accounting read failed");
                    continue;
                }
            };
            let mut envelope = PacketEnvelope::new(buffer[..n].to_vec(), Some(client));
            self.pipeline.account(&mut envelope);
        }
    }
}
