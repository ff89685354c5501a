//! Integration tests for the NPS login client
//!
//! An in-process fake NPS listens on 127.0.0.1 and speaks real MS-CHAPv2:
//! it checks the NT-Response against the password it knows, answers with
//! MS-CHAP2-Success or MS-CHAP-Error, and signs its replies with the shared
//! secret. Each test drives the public client API against one or two of them.

use async_trait::async_trait;
use radius_client::{
    AuditLogger, AuthCode, CancelToken, Config, DatagramSocket, FailoverCoordinator, PlaintextSecrets,
    RadiusClient, ServerEntry, ServerRole, ServerSettings, SocketFactory, Transport, cancellation,
};
use radius_proto::auth::calculate_response_authenticator;
use radius_proto::message_auth::{self, MessageAuthStatus};
use radius_proto::mschapv2::{Mschap2Response, generate_authenticator_response, generate_nt_response};
use radius_proto::{
    Attribute, AttributeType, Code, MICROSOFT_VENDOR_ID, MicrosoftAttribute, Packet, VendorAttribute,
};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

const SECRET: &str = "testing123";
const PASSWORD: &str = "Corr3ct-Horse";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behavior {
    /// Verify the MS-CHAPv2 response and accept or reject
    Answer,
    Silent,
    /// Ignore the first N datagrams, then answer
    DropFirst(usize),
    Challenge,
    /// Send a reply with the wrong identifier before the real one
    StrayFirst,
    /// Sign replies with a different secret
    WrongSecret,
}

struct FakeNps {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
    task: JoinHandle<()>,
}

impl FakeNps {
    async fn spawn(behavior: Behavior, accept_attributes: Vec<Attribute>) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        let task = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let data = buf[..len].to_vec();
                let count = {
                    let mut seen = seen.lock().unwrap();
                    seen.push(data.clone());
                    seen.len()
                };

                match behavior {
                    Behavior::Silent => continue,
                    Behavior::DropFirst(n) if count <= n => continue,
                    _ => {}
                }

                let request = Packet::decode(&data).unwrap();
                assert_eq!(
                    message_auth::verify_request(&data, SECRET.as_bytes()).unwrap(),
                    MessageAuthStatus::Valid
                );

                let reply = match behavior {
                    Behavior::Challenge => Packet::new(Code::AccessChallenge, request.identifier, [0u8; 16]),
                    _ => answer(&request, &accept_attributes),
                };
                let secret: &[u8] = match behavior {
                    Behavior::WrongSecret => b"not-the-secret",
                    _ => SECRET.as_bytes(),
                };

                if behavior == Behavior::StrayFirst {
                    let mut stray = reply.clone();
                    stray.identifier = request.identifier.wrapping_add(1);
                    let bytes = sign(stray, &request, secret);
                    socket.send_to(&bytes, from).await.unwrap();
                }

                let bytes = sign(reply, &request, secret);
                socket.send_to(&bytes, from).await.unwrap();
            }
        });

        FakeNps { addr, requests, task }
    }

    fn entry(&self) -> ServerEntry {
        ServerEntry {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            secret: SECRET.to_string(),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeNps {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Build the reply a real NPS would send for this request and `PASSWORD`
fn answer(request: &Packet, accept_attributes: &[Attribute]) -> Packet {
    let username = request
        .find_attribute(AttributeType::UserName as u8)
        .and_then(|a| a.as_string().ok())
        .unwrap();
    let auth_challenge: [u8; 16] = request
        .find_vendor_attribute(MICROSOFT_VENDOR_ID, MicrosoftAttribute::ChapChallenge.as_u8())
        .unwrap()
        .value
        .try_into()
        .unwrap();
    let response = Mschap2Response::from_bytes(
        &request
            .find_vendor_attribute(MICROSOFT_VENDOR_ID, MicrosoftAttribute::Chap2Response.as_u8())
            .unwrap()
            .value,
    )
    .unwrap();

    let expected = generate_nt_response(&auth_challenge, &response.peer_challenge, &username, PASSWORD);
    if expected == response.nt_response {
        let mut reply = Packet::new(Code::AccessAccept, request.identifier, [0u8; 16]);
        for attr in accept_attributes {
            reply.add_attribute(attr.clone());
        }
        let mut success = vec![response.ident];
        success.extend_from_slice(
            generate_authenticator_response(
                PASSWORD,
                &response.nt_response,
                &response.peer_challenge,
                &auth_challenge,
                &username,
            )
            .as_bytes(),
        );
        reply.add_attribute(vsa(MicrosoftAttribute::Chap2Success, success));
        reply
    } else {
        let mut reply = Packet::new(Code::AccessReject, request.identifier, [0u8; 16]);
        let mut error = vec![response.ident];
        error.extend_from_slice(b"E=691 R=0 C=00112233445566778899aabbccddeeff V=3 M=Authentication failure");
        reply.add_attribute(vsa(MicrosoftAttribute::ChapError, error));
        reply
    }
}

fn vsa(kind: MicrosoftAttribute, value: Vec<u8>) -> Attribute {
    VendorAttribute::microsoft(kind, value).unwrap().to_attribute().unwrap()
}

fn sign(mut reply: Packet, request: &Packet, secret: &[u8]) -> Vec<u8> {
    message_auth::sign_reply(&mut reply, &request.authenticator, secret).unwrap();
    reply.authenticator = calculate_response_authenticator(&reply, &request.authenticator, secret).unwrap();
    reply.encode().unwrap()
}

fn quick(primary: ServerEntry) -> Config {
    let mut config = Config::new(primary);
    config.timeout_ms = 150;
    config.retries = 3;
    config
}

fn settings(nps: &FakeNps) -> ServerSettings {
    ServerSettings::new(nps.addr.ip().to_string(), nps.addr.port(), SECRET).with_timeout(Duration::from_millis(150))
}

fn coordinator() -> FailoverCoordinator {
    FailoverCoordinator::new(Arc::new(PlaintextSecrets))
}

/// Failure injected by the counting socket factory
#[derive(Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    /// The first N binds fail
    Bind(usize),
    /// Every send to this address fails
    SendTo(SocketAddr),
    /// Every receive fails
    Recv,
}

/// Socket factory that tracks how many sockets are alive
struct CountingFactory {
    open: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
    binds: AtomicUsize,
    fault: Fault,
}

struct CountingSocket {
    inner: UdpSocket,
    open: Arc<AtomicUsize>,
    fault: Fault,
}

impl Drop for CountingSocket {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatagramSocket for CountingSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        if self.fault == Fault::SendTo(target) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "network unreachable"));
        }
        self.inner.send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        if self.fault == Fault::Recv {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "port unreachable"));
        }
        self.inner.recv_from(buf).await
    }
}

#[async_trait]
impl SocketFactory for CountingFactory {
    async fn bind(&self, local: SocketAddr) -> io::Result<Box<dyn DatagramSocket>> {
        let attempt = self.binds.fetch_add(1, Ordering::SeqCst);
        if let Fault::Bind(failures) = self.fault
            && attempt < failures
        {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "no free ports"));
        }

        let inner = UdpSocket::bind(local).await?;
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSocket {
            inner,
            open: self.open.clone(),
            fault: self.fault,
        }))
    }
}

fn counting_client() -> (RadiusClient, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    faulty_client(Fault::None)
}

fn faulty_client(fault: Fault) -> (RadiusClient, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let factory = CountingFactory {
        open: Arc::new(AtomicUsize::new(0)),
        opened: Arc::new(AtomicUsize::new(0)),
        binds: AtomicUsize::new(0),
        fault,
    };
    let open = factory.open.clone();
    let opened = factory.opened.clone();
    let client = RadiusClient::with_transport(Transport::with_factory(Arc::new(factory)));
    (client, open, opened)
}

#[tokio::test]
async fn test_accept_with_groups() {
    let nps = FakeNps::spawn(
        Behavior::Answer,
        vec![
            Attribute::string(AttributeType::FilterId as u8, "NetAdmins").unwrap(),
            Attribute::string(
                AttributeType::Class as u8,
                "CN=Firewall Admins,OU=Groups,DC=corp,DC=example",
            )
            .unwrap(),
            Attribute::string(AttributeType::ReplyMessage as u8, "Group:Auditors").unwrap(),
        ],
    )
    .await;

    let outcome = coordinator()
        .authenticate(&quick(nps.entry()), "alice", PASSWORD)
        .await;

    assert!(outcome.result.success, "{}", outcome.result.message);
    assert_eq!(outcome.result.code, AuthCode::AccessAccept);
    assert_eq!(outcome.used_server, ServerRole::Primary);
    assert_eq!(
        outcome.result.groups,
        Some(vec![
            "NetAdmins".to_string(),
            "Firewall Admins".to_string(),
            "Auditors".to_string()
        ])
    );
    assert_eq!(nps.request_count(), 1);

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["used_server"], "primary");
    assert_eq!(json["result"]["code"], "ACCESS_ACCEPT");
    assert_eq!(json["result"]["attributes"]["Filter-Id"][0], "NetAdmins");
}

#[tokio::test]
async fn test_wrong_password_rejected_with_chap_error() {
    let nps = FakeNps::spawn(Behavior::Answer, vec![]).await;

    let outcome = coordinator()
        .authenticate(&quick(nps.entry()), "alice", "wrong-password")
        .await;

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.code, AuthCode::AccessReject);
    assert_eq!(outcome.result.message, "Invalid username or password");
    assert!(outcome.result.groups.is_none());
}

#[tokio::test]
async fn test_reject_is_authoritative() {
    let primary = FakeNps::spawn(Behavior::Answer, vec![]).await;
    let secondary = FakeNps::spawn(Behavior::Answer, vec![]).await;
    let mut config = quick(primary.entry());
    config.secondary = Some(secondary.entry());

    let outcome = coordinator().authenticate(&config, "alice", "wrong-password").await;

    assert_eq!(outcome.result.code, AuthCode::AccessReject);
    assert_eq!(outcome.used_server, ServerRole::Primary);
    assert_eq!(secondary.request_count(), 0);
}

#[tokio::test]
async fn test_primary_timeout_fails_over_to_secondary() {
    let primary = FakeNps::spawn(Behavior::Silent, vec![]).await;
    let secondary = FakeNps::spawn(
        Behavior::Answer,
        vec![Attribute::string(AttributeType::FilterId as u8, "NetAdmins").unwrap()],
    )
    .await;
    let mut config = quick(primary.entry());
    config.secondary = Some(secondary.entry());

    let outcome = coordinator().authenticate(&config, "alice", PASSWORD).await;

    assert!(outcome.result.success);
    assert_eq!(outcome.used_server, ServerRole::Secondary);
    assert_eq!(primary.request_count(), 3);
    assert_eq!(secondary.request_count(), 1);
}

#[tokio::test]
async fn test_silent_server_sends_exactly_retries_then_times_out() {
    let nps = FakeNps::spawn(Behavior::Silent, vec![]).await;
    let mut config = quick(nps.entry());
    config.retries = 4;
    config.timeout_ms = 100;

    let started = Instant::now();
    let outcome = coordinator().authenticate(&config, "alice", PASSWORD).await;

    assert_eq!(outcome.result.code, AuthCode::Timeout);
    assert_eq!(outcome.used_server, ServerRole::Primary);
    assert_eq!(nps.request_count(), 4);
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[tokio::test]
async fn test_retransmissions_are_identical() {
    let nps = FakeNps::spawn(Behavior::DropFirst(2), vec![]).await;

    let outcome = coordinator()
        .authenticate(&quick(nps.entry()), "alice", PASSWORD)
        .await;

    assert!(outcome.result.success, "{}", outcome.result.message);
    let requests = nps.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r == &requests[0]));
}

#[tokio::test]
async fn test_forged_reply_is_decode_error_and_not_retried() {
    let nps = FakeNps::spawn(Behavior::WrongSecret, vec![]).await;

    let outcome = coordinator()
        .authenticate(&quick(nps.entry()), "alice", PASSWORD)
        .await;

    assert_eq!(outcome.result.code, AuthCode::DecodeError);
    assert!(outcome.result.attributes.is_none());
    assert_eq!(nps.request_count(), 1);
}

#[tokio::test]
async fn test_decode_error_fails_over() {
    let primary = FakeNps::spawn(Behavior::WrongSecret, vec![]).await;
    let secondary = FakeNps::spawn(Behavior::Answer, vec![]).await;
    let mut config = quick(primary.entry());
    config.secondary = Some(secondary.entry());

    let outcome = coordinator().authenticate(&config, "alice", PASSWORD).await;

    assert!(outcome.result.success);
    assert_eq!(outcome.used_server, ServerRole::Secondary);
}

#[tokio::test]
async fn test_stray_identifier_is_ignored() {
    let nps = FakeNps::spawn(Behavior::StrayFirst, vec![]).await;

    let outcome = coordinator()
        .authenticate(&quick(nps.entry()), "alice", PASSWORD)
        .await;

    assert!(outcome.result.success, "{}", outcome.result.message);
    assert_eq!(nps.request_count(), 1);
}

#[tokio::test]
async fn test_challenge_is_unsupported() {
    let nps = FakeNps::spawn(Behavior::Challenge, vec![]).await;

    let outcome = coordinator()
        .authenticate(&quick(nps.entry()), "alice", PASSWORD)
        .await;

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.code, AuthCode::AccessChallenge);
    assert_eq!(nps.request_count(), 1);
}

#[tokio::test]
async fn test_non_authoritative_primary_fails_over() {
    #[derive(Clone, Copy, Debug)]
    enum PrimaryFailure {
        Challenge,
        Unsendable,
        Unbindable,
    }

    let cases = [
        (PrimaryFailure::Challenge, AuthCode::AccessChallenge, 1),
        (PrimaryFailure::Unsendable, AuthCode::ConnectionError, 0),
        (PrimaryFailure::Unbindable, AuthCode::SocketError, 0),
    ];

    for (failure, primary_code, primary_requests) in cases {
        let behavior = match failure {
            PrimaryFailure::Challenge => Behavior::Challenge,
            _ => Behavior::Silent,
        };
        let primary = FakeNps::spawn(behavior, vec![]).await;
        let secondary = FakeNps::spawn(Behavior::Answer, vec![]).await;
        let fault = match failure {
            PrimaryFailure::Challenge => Fault::None,
            PrimaryFailure::Unsendable => Fault::SendTo(primary.addr),
            PrimaryFailure::Unbindable => Fault::Bind(1),
        };
        let (client, open, _) = faulty_client(fault);

        let dir = tempfile::tempdir().unwrap();
        let audit_path = dir.path().join("audit.log");
        let audit = AuditLogger::new(Some(audit_path.to_str().unwrap().to_string())).unwrap();

        let mut config = quick(primary.entry());
        config.secondary = Some(secondary.entry());
        let outcome = coordinator()
            .with_client(client)
            .with_audit(Arc::new(audit))
            .authenticate(&config, "alice", PASSWORD)
            .await;

        assert!(outcome.result.success, "{:?}: {}", failure, outcome.result.message);
        assert_eq!(outcome.used_server, ServerRole::Secondary, "{:?}", failure);
        assert_eq!(primary.request_count(), primary_requests, "{:?}", failure);
        assert_eq!(secondary.request_count(), 1, "{:?}", failure);
        assert_eq!(open.load(Ordering::SeqCst), 0, "{:?}", failure);

        let contents = std::fs::read_to_string(&audit_path).unwrap();
        let failover: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(failover["event_type"], "failover", "{:?}", failure);
        assert_eq!(failover["code"], primary_code.as_str(), "{:?}", failure);
    }
}

#[tokio::test]
async fn test_no_socket_left_open() {
    let (client, open, opened) = counting_client();

    let answering = FakeNps::spawn(Behavior::Answer, vec![]).await;
    let silent = FakeNps::spawn(Behavior::Silent, vec![]).await;
    let forged = FakeNps::spawn(Behavior::WrongSecret, vec![]).await;

    for nps in [&answering, &silent, &forged] {
        let settings = settings(nps).with_retries(2);
        client
            .authenticate(&settings, "alice", PASSWORD, &CancelToken::never())
            .await;
        assert_eq!(open.load(Ordering::SeqCst), 0);
    }
    assert_eq!(opened.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_send_failure_closes_socket() {
    let nps = FakeNps::spawn(Behavior::Answer, vec![]).await;
    let (client, open, opened) = faulty_client(Fault::SendTo(nps.addr));

    let result = client
        .authenticate(&settings(&nps).with_retries(3), "alice", PASSWORD, &CancelToken::never())
        .await;

    assert_eq!(result.code, AuthCode::ConnectionError);
    assert!(!result.success);
    assert_eq!(nps.request_count(), 0);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(open.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_receive_error_is_socket_error_and_closes_socket() {
    let nps = FakeNps::spawn(Behavior::Answer, vec![]).await;
    let (client, open, opened) = faulty_client(Fault::Recv);

    let result = client
        .authenticate(&settings(&nps).with_retries(3), "alice", PASSWORD, &CancelToken::never())
        .await;

    assert_eq!(result.code, AuthCode::SocketError);
    assert!(!result.success);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(open.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancellation_closes_socket() {
    let (client, open, opened) = counting_client();
    let nps = FakeNps::spawn(Behavior::Silent, vec![]).await;
    let settings = settings(&nps).with_timeout(Duration::from_secs(5));
    let (handle, token) = cancellation();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let result = client.authenticate(&settings, "alice", PASSWORD, &token).await;

    assert_eq!(result.code, AuthCode::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(open.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dropped_future_closes_socket() {
    let (client, open, _) = counting_client();
    let nps = FakeNps::spawn(Behavior::Silent, vec![]).await;
    let settings = settings(&nps).with_timeout(Duration::from_secs(5));

    let never = CancelToken::never();
    let timed = tokio::time::timeout(
        Duration::from_millis(50),
        client.authenticate(&settings, "alice", PASSWORD, &never),
    )
    .await;

    assert!(timed.is_err());
    assert_eq!(open.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_config_file_and_audit_log() {
    let nps = FakeNps::spawn(
        Behavior::Answer,
        vec![Attribute::string(AttributeType::FilterId as u8, "NetAdmins").unwrap()],
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("nps-auth.json");
    let audit_path = dir.path().join("audit.log");

    let mut config = quick(nps.entry());
    config.audit_log_path = Some(audit_path.to_str().unwrap().to_string());
    config.to_file(&config_path).unwrap();

    let config = Config::from_file(&config_path).unwrap();
    let audit = AuditLogger::new(config.audit_log_path.clone()).unwrap();
    let outcome = coordinator()
        .with_audit(Arc::new(audit))
        .authenticate(&config, "alice", PASSWORD)
        .await;
    assert!(outcome.result.success);

    let contents = std::fs::read_to_string(&audit_path).unwrap();
    let entry: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(entry["event_type"], "auth_success");
    assert_eq!(entry["username"], "alice");
    assert_eq!(entry["used_server"], "primary");
    assert_eq!(entry["code"], "ACCESS_ACCEPT");
    assert_eq!(entry["groups"][0], "NetAdmins");
    assert!(!contents.contains(PASSWORD));
}
