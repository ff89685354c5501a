//! UDP transport for one RADIUS exchange
//!
//! One attempt owns one socket. The encoded request is sent, then the
//! receive loop waits until a per-send deadline for a datagram from the
//! server carrying the request's identifier. Anything else is a stray and
//! is dropped without consuming the deadline. On timeout the identical
//! bytes are sent again, up to `retries` sends in total.
//!
//! The socket is dropped on every exit path, including cancellation and the
//! caller dropping the future.

use crate::result::AuthCode;
use async_trait::async_trait;
use radius_proto::Packet;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind UDP socket: {0}")]
    Bind(io::Error),
    #[error("Failed to send to {target} after {attempts} attempts: {source}")]
    Send {
        target: String,
        attempts: u32,
        source: io::Error,
    },
    #[error("Socket error: {0}")]
    Socket(io::Error),
    #[error("No response from {target} after {attempts} attempts")]
    Timeout { target: String, attempts: u32 },
    #[error("Authentication cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn code(&self) -> AuthCode {
        match self {
            TransportError::Bind(_) | TransportError::Socket(_) => AuthCode::SocketError,
            TransportError::Send { .. } => AuthCode::ConnectionError,
            TransportError::Timeout { .. } => AuthCode::Timeout,
            TransportError::Cancelled => AuthCode::Cancelled,
        }
    }
}

/// The datagram half of a UDP socket
#[async_trait]
pub trait DatagramSocket: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

/// Opens sockets for the transport and resolves server addresses
#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn bind(&self, local: SocketAddr) -> io::Result<Box<dyn DatagramSocket>>;

    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

#[async_trait]
impl DatagramSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }
}

/// Real sockets from tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSocketFactory;

#[async_trait]
impl SocketFactory for TokioSocketFactory {
    async fn bind(&self, local: SocketAddr) -> io::Result<Box<dyn DatagramSocket>> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Box::new(socket))
    }
}

/// Cancels in-flight authentications when triggered
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Observed by in-flight authentications
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    /// A token nobody can trigger
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        CancelToken(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is gone
    pub async fn cancelled(&mut self) {
        if self.0.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(Arc::new(tx)), CancelToken(rx))
}

/// Parameters of one exchange
#[derive(Debug, Clone)]
pub struct Exchange<'a> {
    pub host: &'a str,
    pub port: u16,
    pub identifier: u8,
    pub timeout: Duration,
    /// Total sends, at least 1
    pub retries: u32,
}

/// A reply that matched the request identifier and came from the server
#[derive(Debug, Clone)]
pub struct Reply {
    pub data: Vec<u8>,
    pub from: SocketAddr,
    /// Send number that drew the reply, starting at 1
    pub attempt: u32,
}

enum SendFailure {
    Bind(io::Error),
    Io(io::Error),
}

enum Wait {
    Reply(Vec<u8>, SocketAddr),
    TimedOut,
}

#[derive(Clone)]
pub struct Transport {
    factory: Arc<dyn SocketFactory>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self::with_factory(Arc::new(TokioSocketFactory))
    }

    pub fn with_factory(factory: Arc<dyn SocketFactory>) -> Self {
        Transport { factory }
    }

    /// Send `request` and wait for the matching reply
    pub async fn exchange(
        &self,
        exchange: &Exchange<'_>,
        request: &[u8],
        cancel: &CancelToken,
    ) -> Result<Reply, TransportError> {
        let mut cancel = cancel.clone();
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(host = exchange.host, identifier = exchange.identifier, "Exchange cancelled");
                Err(TransportError::Cancelled)
            }
            result = self.run(exchange, request) => result,
        }
    }

    async fn run(&self, exchange: &Exchange<'_>, request: &[u8]) -> Result<Reply, TransportError> {
        let target = format!("{}:{}", exchange.host, exchange.port);
        let retries = exchange.retries.max(1);
        let mut socket: Option<Box<dyn DatagramSocket>> = None;
        let mut sent_to: Vec<SocketAddr> = Vec::new();
        let mut last_send_error: Option<io::Error> = None;

        for attempt in 1..=retries {
            match self.send_once(&mut socket, exchange, request).await {
                Ok(addr) => {
                    last_send_error = None;
                    if !sent_to.contains(&addr) {
                        sent_to.push(addr);
                    }
                    debug!(server = %addr, identifier = exchange.identifier, attempt, "Sent Access-Request");
                }
                Err(SendFailure::Bind(e)) => return Err(TransportError::Bind(e)),
                Err(SendFailure::Io(e)) => {
                    warn!(server = %target, attempt, retries, error = %e, "Send failed");
                    last_send_error = Some(e);
                    continue;
                }
            }

            let Some(ref sock) = socket else {
                continue;
            };
            match wait_for_reply(sock.as_ref(), exchange, &sent_to).await? {
                Wait::Reply(data, from) => {
                    return Ok(Reply {
                        data,
                        from,
                        attempt,
                    });
                }
                Wait::TimedOut => {
                    if attempt < retries {
                        warn!(server = %target, identifier = exchange.identifier, attempt, retries, "No response, retransmitting");
                    }
                }
            }
        }

        match last_send_error {
            Some(source) => Err(TransportError::Send {
                target,
                attempts: retries,
                source,
            }),
            None => {
                warn!(server = %target, identifier = exchange.identifier, attempts = retries, "No response from server");
                Err(TransportError::Timeout {
                    target,
                    attempts: retries,
                })
            }
        }
    }

    /// Resolve the server and send once, binding the socket on first use
    ///
    /// Resolution happens on every send so a failure is retried like any
    /// other send failure. It shares the per-send timeout.
    async fn send_once(
        &self,
        socket: &mut Option<Box<dyn DatagramSocket>>,
        exchange: &Exchange<'_>,
        request: &[u8],
    ) -> Result<SocketAddr, SendFailure> {
        let resolved = tokio::time::timeout(exchange.timeout, self.factory.resolve(exchange.host, exchange.port))
            .await
            .map_err(|_| {
                SendFailure::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("resolving {} timed out", exchange.host),
                ))
            })?
            .map_err(SendFailure::Io)?;
        let addr = resolved.into_iter().next().ok_or_else(|| {
            SendFailure::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", exchange.host),
            ))
        })?;

        if socket.is_none() {
            let local = if addr.is_ipv4() {
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
            } else {
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
            };
            let bound = self.factory.bind(local).await.map_err(SendFailure::Bind)?;
            *socket = Some(bound);
        }

        if let Some(sock) = socket.as_ref() {
            sock.send_to(request, addr).await.map_err(SendFailure::Io)?;
        }
        Ok(addr)
    }
}

/// Receive until a matching reply arrives or the per-send deadline passes
async fn wait_for_reply(
    socket: &dyn DatagramSocket,
    exchange: &Exchange<'_>,
    expected_sources: &[SocketAddr],
) -> Result<Wait, TransportError> {
    let deadline = Instant::now() + exchange.timeout;
    let mut buf = vec![0u8; Packet::MAX_PACKET_SIZE];

    loop {
        let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => return Ok(Wait::TimedOut),
            Ok(Err(e)) => return Err(TransportError::Socket(e)),
            Ok(Ok(received)) => received,
        };

        if !expected_sources.contains(&from) {
            debug!(source = %from, "Ignoring datagram from unexpected source");
            continue;
        }
        if Packet::peek_identifier(&buf[..len]) != Some(exchange.identifier) {
            debug!(
                source = %from,
                expected = exchange.identifier,
                received = ?Packet::peek_identifier(&buf[..len]),
                "Ignoring reply with mismatched identifier"
            );
            continue;
        }

        return Ok(Wait::Reply(buf[..len].to_vec(), from));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exchange(port: u16, identifier: u8, retries: u32) -> Exchange<'static> {
        Exchange {
            host: "127.0.0.1",
            port,
            identifier,
            timeout: Duration::from_millis(100),
            retries,
        }
    }

    fn datagram(identifier: u8) -> Vec<u8> {
        Packet::new(radius_proto::Code::AccessAccept, identifier, [0u8; 16])
            .encode()
            .unwrap()
    }

    struct FailingFactory;

    #[async_trait]
    impl SocketFactory for FailingFactory {
        async fn bind(&self, _local: SocketAddr) -> io::Result<Box<dyn DatagramSocket>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "no sockets"))
        }
    }

    struct UnsendableSocket(Arc<AtomicUsize>);

    #[async_trait]
    impl DatagramSocket for UnsendableSocket {
        async fn send_to(&self, _buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::Other, "network unreachable"))
        }

        async fn recv_from(&self, _buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            std::future::pending().await
        }
    }

    struct UnsendableFactory(Arc<AtomicUsize>);

    #[async_trait]
    impl SocketFactory for UnsendableFactory {
        async fn bind(&self, _local: SocketAddr) -> io::Result<Box<dyn DatagramSocket>> {
            Ok(Box::new(UnsendableSocket(self.0.clone())))
        }
    }

    /// Resolver that never answers
    struct StalledResolver(Arc<AtomicUsize>);

    #[async_trait]
    impl SocketFactory for StalledResolver {
        async fn bind(&self, local: SocketAddr) -> io::Result<Box<dyn DatagramSocket>> {
            Ok(Box::new(UdpSocket::bind(local).await?))
        }

        async fn resolve(&self, _host: &str, _port: u16) -> io::Result<Vec<SocketAddr>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_reply_is_returned() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let (_, from) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&datagram(buf[1]), from).await.unwrap();
        });

        let reply = Transport::new()
            .exchange(&exchange(port, 33, 3), &datagram(33), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(reply.attempt, 1);
        assert_eq!(reply.data[1], 33);
    }

    #[tokio::test]
    async fn test_stray_identifier_ignored() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let (_, from) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&datagram(buf[1].wrapping_add(1)), from).await.unwrap();
            server.send_to(&datagram(buf[1]), from).await.unwrap();
        });

        let reply = Transport::new()
            .exchange(&exchange(port, 7, 1), &datagram(7), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(reply.data[1], 7);
    }

    #[tokio::test]
    async fn test_bind_failure_is_socket_error() {
        let err = Transport::with_factory(Arc::new(FailingFactory))
            .exchange(&exchange(1812, 1, 3), &datagram(1), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Bind(_)));
        assert_eq!(err.code(), AuthCode::SocketError);
    }

    #[tokio::test]
    async fn test_send_failure_retried_then_connection_error() {
        let sends = Arc::new(AtomicUsize::new(0));
        let err = Transport::with_factory(Arc::new(UnsendableFactory(sends.clone())))
            .exchange(&exchange(1812, 1, 4), &datagram(1), &CancelToken::never())
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthCode::ConnectionError);
        assert_eq!(sends.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stalled_resolution_bounded_by_timeout() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();
        let err = Transport::with_factory(Arc::new(StalledResolver(lookups.clone())))
            .exchange(&exchange(1812, 1, 3), &datagram(1), &CancelToken::never())
            .await
            .unwrap_err();

        assert_eq!(err.code(), AuthCode::ConnectionError);
        assert_eq!(lookups.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            TransportError::Send { source, attempts, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.kind(), io::ErrorKind::TimedOut);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let err = Transport::new()
            .exchange(&exchange(port, 1, 2), &datagram(1), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { attempts: 2, .. }));
        drop(server);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let (handle, token) = cancellation();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let mut slow = exchange(port, 1, 3);
        slow.timeout = Duration::from_secs(10);
        let err = Transport::new()
            .exchange(&slow, &datagram(1), &token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), AuthCode::Cancelled);
        drop(server);
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let (handle, token) = cancellation();
        handle.cancel();
        let err = Transport::with_factory(Arc::new(FailingFactory))
            .exchange(&exchange(1812, 1, 1), &datagram(1), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }
}
