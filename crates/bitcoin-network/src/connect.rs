//! Connection factories.
//!
//! An [`Acceptor`] wraps a bound listener and yields inbound sockets; a
//! [`Connector`] dials outbound endpoints under a timeout. Sessions own the
//! factories and turn their sockets into channels.

use crate::authority::Authority;
use crate::error::{NetworkError, NetworkResult};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Listener for inbound connections.
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    /// Bind the configured listen port on all interfaces.
    pub async fn bind(port: u16) -> NetworkResult<Self> {
        let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = TcpListener::bind(address).await.map_err(|e| {
            debug!(port, error = %e, "listener bind failed");
            NetworkError::ListenFailed
        })?;

        Ok(Self { listener })
    }

    /// The port actually bound (resolves port zero).
    pub fn local_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or_default()
    }

    /// Wait for the next inbound connection.
    pub async fn accept(&self) -> NetworkResult<(TcpStream, Authority)> {
        let (stream, address) = self.listener.accept().await.map_err(|e| {
            debug!(error = %e, "accept failed");
            NetworkError::AcceptFailed
        })?;

        Ok((stream, Authority::from(address)))
    }
}

/// Dialer for outbound connections.
#[derive(Debug, Clone, Copy)]
pub struct Connector {
    timeout: Duration,
}

impl Connector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Dial the authority, bounded by the connect timeout.
    pub async fn connect(&self, authority: &Authority) -> NetworkResult<TcpStream> {
        let address = authority.to_socket_addr();

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(address))
            .await
            .map_err(|_| NetworkError::OperationTimeout)?
            .map_err(|e| {
                debug!(peer = %authority, error = %e, "connect failed");
                match NetworkError::from_io(&e) {
                    // Refusals are ordinary dial outcomes, not local faults.
                    NetworkError::OperationFailed => NetworkError::ConnectFailed,
                    other => other,
                }
            })?;

        debug!(peer = %authority, "connected");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_yields_peer_authority() {
        let acceptor = Acceptor::bind(0).await.unwrap();
        let port = acceptor.local_port();
        assert_ne!(port, 0);

        let connector = Connector::new(Duration::from_secs(5));
        let target: Authority = format!("127.0.0.1:{}", port).parse().unwrap();

        let (accepted, dialed) =
            tokio::join!(acceptor.accept(), connector.connect(&target));

        let (_stream, authority) = accepted.unwrap();
        assert!(dialed.is_ok());
        assert_eq!(authority.ip(), target.ip());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to obtain a port that refuses connections.
        let acceptor = Acceptor::bind(0).await.unwrap();
        let port = acceptor.local_port();
        drop(acceptor);

        let connector = Connector::new(Duration::from_secs(5));
        let target: Authority = format!("127.0.0.1:{}", port).parse().unwrap();

        assert_eq!(connector.connect(&target).await.err(), Some(NetworkError::ConnectFailed));
    }
}
