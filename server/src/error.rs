//! Error taxonomy for the status pipeline
//!
//! Errors are `Clone` so one refresh failure can be handed to every caller
//! waiting on it. I/O sources are shared through `Arc` for that reason.

use shared::Endpoint;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum StatusError {
    #[error("could not resolve {endpoint}")]
    AddressResolution {
        endpoint: Endpoint,
        #[source]
        source: Option<Arc<io::Error>>,
    },

    #[error("request payload is empty")]
    EmptyPayload,

    #[error("could not bind UDP socket to {addr}")]
    SocketBind {
        addr: SocketAddr,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("UDP exchange with {remote} failed")]
    Transport {
        remote: SocketAddr,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("no reply from {remote} within {after:?}")]
    Timeout { remote: SocketAddr, after: Duration },

    #[error("status refresh failed at {endpoint}")]
    Aggregation {
        endpoint: Endpoint,
        #[source]
        source: Box<StatusError>,
    },

    #[error("status refresh aborted: {0}")]
    RefreshAborted(String),
}

impl StatusError {
    pub(crate) fn socket_bind(addr: SocketAddr, err: io::Error) -> Self {
        StatusError::SocketBind {
            addr,
            source: Arc::new(err),
        }
    }

    pub(crate) fn transport(remote: SocketAddr, err: io::Error) -> Self {
        StatusError::Transport {
            remote,
            source: Arc::new(err),
        }
    }

    /// Innermost transaction error behind an aggregation failure
    pub fn root_cause(&self) -> &StatusError {
        match self {
            StatusError::Aggregation { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True when the endpoint ran out of time, during lookup or exchange
    pub fn is_timeout(&self) -> bool {
        match self.root_cause() {
            StatusError::Timeout { .. } => true,
            StatusError::AddressResolution {
                source: Some(source),
                ..
            } => source.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_aggregation_exposes_root_cause() {
        let remote: SocketAddr = "127.0.0.1:22023".parse().unwrap();
        let err = StatusError::Aggregation {
            endpoint: Endpoint::new("127.0.0.1", 22023),
            source: Box::new(StatusError::Timeout {
                remote,
                after: Duration::from_secs(3),
            }),
        };

        assert!(err.is_timeout());
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "status refresh failed at 127.0.0.1:22023");
        assert!(err.root_cause().to_string().contains("127.0.0.1:22023"));
    }

    #[test]
    fn test_transport_error_keeps_io_source() {
        let remote: SocketAddr = "10.0.0.1:22023".parse().unwrap();
        let err = StatusError::transport(
            remote,
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );

        let cloned = err.clone();
        assert_eq!(cloned.source().unwrap().to_string(), "refused");
        assert!(!cloned.is_timeout());
    }

    #[test]
    fn test_timed_out_lookup_counts_as_timeout() {
        let endpoint = Endpoint::new("master.example", 22023);
        let slow = StatusError::AddressResolution {
            endpoint: endpoint.clone(),
            source: Some(Arc::new(io::Error::new(io::ErrorKind::TimedOut, "slow"))),
        };
        let missing = StatusError::AddressResolution {
            endpoint,
            source: None,
        };

        assert!(slow.is_timeout());
        assert!(!missing.is_timeout());
    }
}
