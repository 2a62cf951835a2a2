//! Listening endpoint setup.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::TcpListener;

use crate::error::ServerError;

/// Resolves the configured host and port to a bind address.
///
/// A host containing `:` is an IPv6 literal (brackets optional). Anything
/// else is IPv4: the empty string binds every interface, a dotted quad is
/// used as-is, and a name is resolved to its first IPv4 address.
///
/// # Errors
///
/// Returns [`ServerError::Resolve`] if the host is neither a valid literal
/// of its family nor a name with an IPv4 address.
pub async fn resolve_listen_addr(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let unresolved = || ServerError::Resolve {
        host: host.to_string(),
        port,
    };

    if host.contains(':') {
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        let ip: Ipv6Addr = literal.parse().map_err(|_| unresolved())?;
        return Ok(SocketAddr::from((ip, port)));
    }
    if host.is_empty() {
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddr::from((ip, port)));
    }

    let mut candidates = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| unresolved())?;
    candidates.find(SocketAddr::is_ipv4).ok_or_else(unresolved)
}

/// Binds the listening socket for inspectors.
///
/// # Errors
///
/// [`ServerError::Resolve`] from [`resolve_listen_addr`], or
/// [`ServerError::Bind`] if the OS refuses the address.
pub async fn bind_listener(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let addr = resolve_listen_addr(host, port).await?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    tracing::info!(addr = %listener.local_addr()?, "listening for inspectors");
    Ok(listener)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_host_binds_all_ipv4() {
        let Ok(addr) = resolve_listen_addr("", 9000).await else {
            panic!("empty host must resolve");
        };
        assert_eq!(addr, SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9000)));
    }

    #[tokio::test]
    async fn colon_selects_ipv6() {
        for host in ["::1", "[::1]", "::"] {
            let Ok(addr) = resolve_listen_addr(host, 9000).await else {
                panic!("{host} must resolve");
            };
            assert!(addr.is_ipv6(), "{host} resolved to {addr}");
        }
    }

    #[tokio::test]
    async fn dotted_quad_is_ipv4() {
        let Ok(addr) = resolve_listen_addr("127.0.0.1", 1).await else {
            panic!("literal must resolve");
        };
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 1)));
    }

    #[tokio::test]
    async fn malformed_ipv6_is_rejected() {
        assert!(matches!(
            resolve_listen_addr("fe80::zz", 9000).await,
            Err(ServerError::Resolve { .. })
        ));
    }

    #[tokio::test]
    async fn bind_reports_local_port() {
        let Ok(listener) = bind_listener("127.0.0.1", 0).await else {
            panic!("bind on ephemeral port failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local address");
        };
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let Ok(first) = bind_listener("127.0.0.1", 0).await else {
            panic!("bind failed");
        };
        let Ok(addr) = first.local_addr() else {
            panic!("no local address");
        };
        assert!(matches!(
            bind_listener("127.0.0.1", addr.port()).await,
            Err(ServerError::Bind { .. })
        ));
    }
}
