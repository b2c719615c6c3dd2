//! Where a node can be reached: a TCP socket address or a Unix domain socket.

use serde::Deserialize;
use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
};

/// Cluster-wide choice of transport for state-history streaming and rodeos
/// queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Unix,
}

/// A single reachable interface of one node.
///
/// Turned into transport-specific request parameters by
/// [`NodeClient`](crate::client::NodeClient) and into command-line arguments
/// for processes that must dial it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl Endpoint {
    /// Loopback TCP endpoint on `port`.
    pub fn local(port: u16) -> Self {
        Endpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    /// Unix domain socket endpoint at `path`.
    pub fn unix(path: impl AsRef<Path>) -> Self {
        Endpoint::Unix(path.as_ref().to_path_buf())
    }

    /// Request URL for `path` (no leading slash). For Unix sockets the
    /// authority is a placeholder; the socket path travels out-of-band in the
    /// connector.
    pub fn url(&self, path: &str) -> String {
        match self {
            Endpoint::Tcp(addr) => format!("http://{addr}/{path}"),
            Endpoint::Unix(_) => format!("http://localhost/{path}"),
        }
    }

    /// The value handed to a launched process that must dial this endpoint:
    /// `host:port` for TCP, the socket path otherwise.
    pub fn connect_arg(&self) -> String {
        match self {
            Endpoint::Tcp(addr) => addr.to_string(),
            Endpoint::Unix(path) => path.display().to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_url_carries_authority() {
        let endpoint = Endpoint::local(8880);
        assert_eq!(
            endpoint.url("v1/chain/get_info"),
            "http://127.0.0.1:8880/v1/chain/get_info"
        );
        assert_eq!(endpoint.connect_arg(), "127.0.0.1:8880");
    }

    #[test]
    fn unix_url_uses_placeholder_authority() {
        let endpoint = Endpoint::unix("/var/lib/rodeos0/rodeos0.sock");
        assert_eq!(
            endpoint.url("v1/chain/get_info"),
            "http://localhost/v1/chain/get_info"
        );
        assert_eq!(endpoint.connect_arg(), "/var/lib/rodeos0/rodeos0.sock");
    }
}
