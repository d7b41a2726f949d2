//! End-to-end relay tests
//!
//! These drive a full relay over real UDP sockets: a fake backend, a
//! client socket and the relay service wired together the same way the
//! worker binary does it, with secrets and module state loaded from a
//! temporary lib directory.

use radrelay_server::lifecycle::spawn_threshold_monitor;
use radrelay_server::{
    create_module, AuthMode, AuthorizationPipeline, ConnectionTable, Counters, LogBuffer,
    ModuleContext, PacketEnvelope, ReasonCode, RelayService, SecretResolver, Termination,
};
use radrelay_proto::{Attribute, AttributeType, Code, Packet};
use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

fn write_lib_dir(dir: &Path, clients: Option<&str>, manifest: Option<&str>) {
    let mut secrets = fs::File::create(dir.join("secrets")).unwrap();
    writeln!(secrets, "127.0.0.1 sharedkey").unwrap();
    if let Some(contents) = clients {
        fs::write(dir.join("clients"), contents).unwrap();
    }
    if let Some(contents) = manifest {
        fs::write(dir.join("manifest"), contents).unwrap();
    }
}

fn build_pipeline(lib_dir: &Path, modules: &[&str]) -> AuthorizationPipeline {
    let resolver = SecretResolver::from_lib_dir(lib_dir).unwrap();
    let mut pipeline = AuthorizationPipeline::new(resolver);
    let ctx = ModuleContext {
        lib_dir: lib_dir.to_path_buf(),
        log_dir: lib_dir.to_path_buf(),
        instance: "test".to_string(),
        logbuf: Arc::new(LogBuffer::new()),
        backing: Vec::new(),
    };
    for name in modules {
        let mut module = create_module(name).unwrap();
        module.setup(&ctx).unwrap();
        pipeline.register(Arc::from(module));
    }
    pipeline
}

struct Harness {
    backend: UdpSocket,
    client: UdpSocket,
    relay_addr: SocketAddr,
}

async fn start_relay(pipeline: AuthorizationPipeline, no_reject: bool, accounting: bool) -> Harness {
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let relay_addr = socket.local_addr().unwrap();
    let table = Arc::new(ConnectionTable::new(backend_addr, Arc::new(Counters::new())));
    let service = RelayService::new(socket, table, Arc::new(pipeline), no_reject);
    tokio::spawn(async move {
        if accounting {
            service.run_accounting().await
        } else {
            service.run_proxy().await
        }
    });
    Harness {
        backend,
        client: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        relay_addr,
    }
}

fn access_request(secret: &[u8], user: &str, mac: &str) -> Vec<u8> {
    let mut packet = Packet::new(Code::AccessRequest, secret);
    packet.add_attribute(Attribute::string(AttributeType::UserName as u8, user).unwrap());
    packet.add_attribute(Attribute::string(AttributeType::CallingStationId as u8, mac).unwrap());
    packet.encode().unwrap()
}

async fn recv(socket: &UdpSocket) -> Option<Vec<u8>> {
    let mut buf = [0u8; Packet::MAX_PACKET_SIZE];
    match tokio::time::timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await {
        Ok(Ok((n, _))) => Some(buf[..n].to_vec()),
        _ => None,
    }
}

#[tokio::test]
async fn test_valid_secret_full_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    write_lib_dir(dir.path(), None, None);
    let h = start_relay(build_pipeline(dir.path(), &[]), false, false).await;

    let request = access_request(b"sharedkey", "alice", "aa:bb:cc:dd:ee:ff");
    h.client.send_to(&request, h.relay_addr).await.unwrap();
    let mut buf = [0u8; Packet::MAX_PACKET_SIZE];
    let (n, from) = h.backend.recv_from(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], request.as_slice());

    // backend answers; relay routes it back to the original client
    let accept = Packet::parse(&request, b"sharedkey")
        .unwrap()
        .response(Code::AccessAccept)
        .encode()
        .unwrap();
    h.backend.send_to(&accept, from).await.unwrap();
    assert_eq!(recv(&h.client).await.unwrap(), accept);
}

#[tokio::test]
async fn test_bad_secret_gets_no_answer_at_all() {
    let dir = tempfile::tempdir().unwrap();
    write_lib_dir(dir.path(), None, None);
    let h = start_relay(build_pipeline(dir.path(), &[]), false, false).await;

    let request = access_request(b"wrongkey", "alice", "aa:bb:cc:dd:ee:ff");
    h.client.send_to(&request, h.relay_addr).await.unwrap();
    assert!(recv(&h.backend).await.is_none());
    assert!(recv(&h.client).await.is_none());
}

#[tokio::test]
async fn test_whitelist_miss_synthesizes_reject() {
    let dir = tempfile::tempdir().unwrap();
    write_lib_dir(dir.path(), None, Some("alice.aabbccddeeff\n"));
    let h = start_relay(build_pipeline(dir.path(), &["whitelist"]), false, false).await;

    let request = access_request(b"sharedkey", "mallory", "aa:bb:cc:dd:ee:ff");
    h.client.send_to(&request, h.relay_addr).await.unwrap();
    assert!(recv(&h.backend).await.is_none());

    let reject = recv(&h.client).await.unwrap();
    let parsed = Packet::parse(&reject, b"sharedkey").unwrap();
    assert_eq!(parsed.code, Code::AccessReject);
    assert_eq!(
        parsed.identifier,
        Packet::parse(&request, b"sharedkey").unwrap().identifier
    );
}

#[tokio::test]
async fn test_whitelist_miss_with_no_reject_stays_silent() {
    let dir = tempfile::tempdir().unwrap();
    write_lib_dir(dir.path(), None, Some("alice.aabbccddeeff\n"));
    let h = start_relay(build_pipeline(dir.path(), &["whitelist"]), true, false).await;

    h.client
        .send_to(
            &access_request(b"sharedkey", "mallory", "aa:bb:cc:dd:ee:ff"),
            h.relay_addr,
        )
        .await
        .unwrap();
    assert!(recv(&h.backend).await.is_none());
    assert!(recv(&h.client).await.is_none());
}

#[tokio::test]
async fn test_whitelisted_user_passes() {
    let dir = tempfile::tempdir().unwrap();
    write_lib_dir(dir.path(), None, Some("alice.aabbccddeeff\n"));
    let h = start_relay(build_pipeline(dir.path(), &["whitelist"]), false, false).await;

    let request = access_request(b"sharedkey", "Alice", "AA:BB:CC:DD:EE:FF");
    h.client.send_to(&request, h.relay_addr).await.unwrap();
    assert_eq!(recv(&h.backend).await.unwrap(), request);
}

#[tokio::test]
async fn test_overlapping_client_prefixes_both_accept() {
    let dir = tempfile::tempdir().unwrap();
    write_lib_dir(dir.path(), Some("127. outer\n127.0. inner\n"), None);
    let pipeline = build_pipeline(dir.path(), &[]);

    // both candidate secrets for a 127.0.x sender must verify
    for secret in [b"outer".as_slice(), b"inner".as_slice()] {
        let mut envelope = PacketEnvelope::new(
            access_request(secret, "alice", "aa:bb:cc:dd:ee:ff"),
            Some("127.0.0.1:40000".parse().unwrap()),
        );
        envelope.ensure_parsed(secret);
        assert_eq!(
            pipeline.authorize(Some(&mut envelope), AuthMode::Pre),
            ReasonCode::Success
        );
    }

    let mut envelope = PacketEnvelope::new(
        access_request(b"neither", "alice", "aa:bb:cc:dd:ee:ff"),
        Some("127.0.0.1:40000".parse().unwrap()),
    );
    envelope.ensure_parsed(b"neither");
    assert_eq!(
        pipeline.authorize(Some(&mut envelope), AuthMode::Pre),
        ReasonCode::BadSecret
    );
}

#[tokio::test]
async fn test_accounting_mode_never_relays() {
    let dir = tempfile::tempdir().unwrap();
    write_lib_dir(dir.path(), None, None);
    let h = start_relay(build_pipeline(dir.path(), &["stats"]), false, true).await;

    let mut packet = Packet::new(Code::AccountingRequest, b"sharedkey");
    packet.add_attribute(Attribute::string(AttributeType::UserName as u8, "alice").unwrap());
    h.client
        .send_to(&packet.encode().unwrap(), h.relay_addr)
        .await
        .unwrap();
    assert!(recv(&h.backend).await.is_none());
    assert!(recv(&h.client).await.is_none());
}

#[tokio::test]
async fn test_reload_picks_up_manifest_changes() {
    let dir = tempfile::tempdir().unwrap();
    write_lib_dir(dir.path(), None, Some("alice.aabbccddeeff\n"));
    let pipeline = build_pipeline(dir.path(), &["whitelist"]);

    let make_envelope = || {
        let mut envelope = PacketEnvelope::new(
            access_request(b"sharedkey", "bob", "11:22:33:44:55:66"),
            Some("127.0.0.1:40000".parse().unwrap()),
        );
        envelope.ensure_parsed(b"sharedkey");
        envelope
    };
    let mut envelope = make_envelope();
    assert_eq!(
        pipeline.authorize(Some(&mut envelope), AuthMode::Pre),
        ReasonCode::PreAuthFailed
    );

    fs::write(dir.path().join("manifest"), "bob.112233445566\n").unwrap();
    pipeline.reload();
    let mut envelope = make_envelope();
    assert_eq!(
        pipeline.authorize(Some(&mut envelope), AuthMode::Pre),
        ReasonCode::Success
    );
}

#[tokio::test]
async fn test_connection_ceiling_requests_termination() {
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let table = Arc::new(ConnectionTable::new(
        backend.local_addr().unwrap(),
        Arc::new(Counters::new()),
    ));
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    let sampled = Arc::clone(&table);
    spawn_threshold_monitor(
        Termination::Connections,
        Duration::from_millis(20),
        2,
        move || {
            let table = Arc::clone(&sampled);
            async move { table.len().await as u64 }
        },
        tx,
    );

    for port in [41001u16, 41002, 41003] {
        let client = format!("127.0.0.1:{}", port).parse().unwrap();
        table.get_or_create(client).await.unwrap();
    }
    assert_eq!(table.len().await, 3);

    let reason = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap();
    assert_eq!(reason, Some(Termination::Connections));
}

#[tokio::test]
async fn test_unparsed_traffic_passes_through_whitelist() {
    // mid-negotiation reads that are not full packets must not be
    // blocked by module checks
    let dir = tempfile::tempdir().unwrap();
    write_lib_dir(dir.path(), None, Some("alice.aabbccddeeff\n"));
    let h = start_relay(build_pipeline(dir.path(), &["whitelist"]), false, false).await;

    h.client.send_to(b"garbage", h.relay_addr).await.unwrap();
    assert_eq!(recv(&h.backend).await.unwrap(), b"garbage".to_vec());
}
