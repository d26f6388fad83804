//! Single-shot UDP request/response exchange
//!
//! A transaction owns its socket for exactly one exchange: bind, send one
//! payload, read one datagram, drop the socket. The socket lives inside
//! `execute`, so it is released on success, error and timeout alike.

use crate::error::StatusError;
use log::debug;
use shared::Endpoint;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

/// Largest payload a UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// One request to one remote, answered by at most one datagram
#[derive(Debug, Clone)]
pub struct UdpTransaction {
    remote: SocketAddr,
    bind_addr: SocketAddr,
    payload: Arc<[u8]>,
}

impl UdpTransaction {
    /// Creates a transaction for an already resolved remote address
    pub fn new(
        remote: SocketAddr,
        bind_addr: SocketAddr,
        payload: impl Into<Arc<[u8]>>,
    ) -> Result<Self, StatusError> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(StatusError::EmptyPayload);
        }

        Ok(Self {
            remote,
            bind_addr,
            payload,
        })
    }

    /// Resolves the endpoint's host and creates a transaction for it.
    ///
    /// When the name resolves to several addresses, one of the same family
    /// as `bind_addr` is preferred so the exchange can actually be sent.
    /// A wildcard `bind_addr` is switched to the wildcard of the remote's
    /// family, so `0.0.0.0` can still reach an IPv6-only master.
    pub async fn resolve(
        endpoint: &Endpoint,
        bind_addr: SocketAddr,
        payload: impl Into<Arc<[u8]>>,
    ) -> Result<Self, StatusError> {
        let addrs: Vec<SocketAddr> = lookup_host((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| StatusError::AddressResolution {
                endpoint: endpoint.clone(),
                source: Some(Arc::new(e)),
            })?
            .collect();

        let remote = addrs
            .iter()
            .find(|addr| addr.is_ipv4() == bind_addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| StatusError::AddressResolution {
                endpoint: endpoint.clone(),
                source: None,
            })?;

        Self::new(remote, bind_addr_for(remote, bind_addr), payload)
    }

    /// Address the request is sent to
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Local address the socket binds to for the exchange
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Sends the payload and waits for the first datagram back.
    ///
    /// The bind, send and receive all race `deadline`; whichever finishes
    /// first decides the outcome. Any later datagram is never read.
    pub async fn execute(self, deadline: Duration) -> Result<Vec<u8>, StatusError> {
        let remote = self.remote;

        match timeout(deadline, self.exchange()).await {
            Ok(result) => result,
            Err(_) => {
                debug!("No reply from {} after {:?}", remote, deadline);
                Err(StatusError::Timeout {
                    remote,
                    after: deadline,
                })
            }
        }
    }

    async fn exchange(&self) -> Result<Vec<u8>, StatusError> {
        // Ephemeral socket, dropped when the exchange returns
        let socket = UdpSocket::bind(self.bind_addr)
            .await
            .map_err(|e| StatusError::socket_bind(self.bind_addr, e))?;

        socket
            .send_to(&self.payload, self.remote)
            .await
            .map_err(|e| StatusError::transport(self.remote, e))?;
        debug!(
            "Sent {} bytes to {} from {:?}",
            self.payload.len(),
            self.remote,
            socket.local_addr().ok()
        );

        // First datagram wins, whoever sent it
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = socket
            .recv_from(&mut buffer)
            .await
            .map_err(|e| StatusError::transport(self.remote, e))?;
        debug!("Received {} bytes from {}", len, from);

        buffer.truncate(len);
        Ok(buffer)
    }
}

/// Local address to bind for talking to `remote`.
///
/// Explicit bind addresses are kept as given. A wildcard follows the remote's
/// address family, keeping its port.
fn bind_addr_for(remote: SocketAddr, bind_addr: SocketAddr) -> SocketAddr {
    if !bind_addr.ip().is_unspecified() || remote.is_ipv4() == bind_addr.is_ipv4() {
        return bind_addr;
    }

    let wildcard = if remote.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    };
    SocketAddr::new(wildcard, bind_addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    /// Answers the first datagram with `reply`, then exits
    async fn spawn_responder(reply: Option<Vec<u8>>) -> SocketAddr {
        let socket = UdpSocket::bind(loopback()).await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            if let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                let reply = reply.unwrap_or_else(|| buf[..len].to_vec());
                let _ = socket.send_to(&reply, peer).await;
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let remote = spawn_responder(None).await;
        let transaction =
            UdpTransaction::new(remote, loopback(), &shared::REQUEST_PAYLOAD[..]).unwrap();

        let reply = transaction.execute(Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply, shared::REQUEST_PAYLOAD.to_vec());
    }

    #[tokio::test]
    async fn test_empty_datagram_is_not_an_error() {
        let remote = spawn_responder(Some(Vec::new())).await;
        let transaction = UdpTransaction::new(remote, loopback(), vec![1u8, 2, 3]).unwrap();

        let reply = assert_ok!(transaction.execute(Duration::from_secs(2)).await);
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_only_first_datagram_is_read() {
        let socket = UdpSocket::bind(loopback()).await.unwrap();
        let remote = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            if let Ok((_, peer)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(b"first", peer).await;
                let _ = socket.send_to(b"second", peer).await;
            }
        });

        let transaction = UdpTransaction::new(remote, loopback(), vec![0x08]).unwrap();
        let reply = transaction.execute(Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply, b"first".to_vec());
    }

    #[tokio::test]
    async fn test_silent_remote_times_out() {
        // Bound but never answers
        let silent = UdpSocket::bind(loopback()).await.unwrap();
        let remote = silent.local_addr().unwrap();

        let transaction = UdpTransaction::new(remote, loopback(), vec![0x08]).unwrap();
        let err = assert_err!(transaction.execute(Duration::from_millis(100)).await);

        match err {
            StatusError::Timeout { remote: r, after } => {
                assert_eq!(r, remote);
                assert_eq!(after, Duration::from_millis(100));
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let remote: SocketAddr = "127.0.0.1:22023".parse().unwrap();
        let result = UdpTransaction::new(remote, loopback(), Vec::new());
        assert!(matches!(result, Err(StatusError::EmptyPayload)));
    }

    #[tokio::test]
    async fn test_bind_failure() {
        // 192.0.2.0/24 is reserved for documentation and never local
        let bind: SocketAddr = "192.0.2.1:0".parse().unwrap();
        let remote: SocketAddr = "127.0.0.1:22023".parse().unwrap();
        let transaction = UdpTransaction::new(remote, bind, vec![0x08]).unwrap();

        let err = transaction.execute(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StatusError::SocketBind { addr, .. } if addr == bind));
    }

    #[tokio::test]
    async fn test_resolve_numeric_host() {
        let endpoint = Endpoint::new("127.0.0.1", 22023);
        let transaction = UdpTransaction::resolve(&endpoint, loopback(), vec![0x08])
            .await
            .unwrap();
        assert_eq!(transaction.remote(), "127.0.0.1:22023".parse().unwrap());
    }

    #[tokio::test]
    async fn test_wildcard_bind_follows_remote_family() {
        let wildcard: SocketAddr = "0.0.0.0:0".parse().unwrap();

        let v6 = UdpTransaction::resolve(&Endpoint::new("::1", 22023), wildcard, vec![0x08])
            .await
            .unwrap();
        assert_eq!(v6.remote(), "[::1]:22023".parse().unwrap());
        assert_eq!(v6.bind_addr(), "[::]:0".parse().unwrap());

        let v4 = UdpTransaction::resolve(&Endpoint::new("127.0.0.1", 22023), wildcard, vec![0x08])
            .await
            .unwrap();
        assert_eq!(v4.bind_addr(), wildcard);
    }

    #[test]
    fn test_explicit_bind_kept() {
        let remote: SocketAddr = "[::1]:22023".parse().unwrap();
        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        assert_eq!(bind_addr_for(remote, bind), bind);

        let wildcard6: SocketAddr = "[::]:5000".parse().unwrap();
        let remote4: SocketAddr = "127.0.0.1:22023".parse().unwrap();
        assert_eq!(bind_addr_for(remote4, wildcard6), "0.0.0.0:5000".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_failure() {
        let endpoint = Endpoint::new("host.invalid", 22023);
        let err = UdpTransaction::resolve(&endpoint, loopback(), vec![0x08])
            .await
            .unwrap_err();
        assert!(matches!(err, StatusError::AddressResolution { .. }));
    }
}
