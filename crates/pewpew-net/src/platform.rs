//! Socket setup shared by the server and the client.
//!
//! [`SocketConfig`] holds the per-connection options (TCP_NODELAY and
//! keepalive) and the listener options (`SO_REUSEADDR`, dual-stack IPv6).
//! `socket2` applies the ones tokio does not expose.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

/// Listen backlog for the relay socket.
const BACKLOG: i32 = 128;

/// Socket options applied to every accepted or dialed connection.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive probes. Default: true.
    pub keepalive_enabled: bool,
    /// Idle time before the first probe. Default: 60s.
    pub keepalive_idle: Duration,
    /// Interval between probes. Default: 10s.
    pub keepalive_interval: Duration,
    /// Unanswered probes before the peer is declared dead. Default: 3.
    pub keepalive_retries: u32,
    /// Set `SO_REUSEADDR` on the listener. Default: off on Windows only.
    pub reuse_addr: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            keepalive_retries: 3,
            reuse_addr: !cfg!(target_os = "windows"),
        }
    }
}

/// Apply [`SocketConfig`] to a connected stream.
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);

        // Not settable on macOS.
        #[cfg(any(target_os = "linux", target_os = "windows"))]
        let keepalive = keepalive.with_retries(config.keepalive_retries);

        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

/// Bind a listener on `addr`.
///
/// IPv6 listeners accept IPv4 clients too (dual-stack).
pub async fn create_listener(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}

/// Combine a configured host and port into a bind address.
///
/// `host` must be an IP literal (`0.0.0.0`, `::`, `127.0.0.1`, ...).
pub fn resolve_bind_address(host: &str, port: u16) -> Result<SocketAddr, std::net::AddrParseError> {
    let ip: IpAddr = host.trim_matches(|c| c == '[' || c == ']').parse()?;
    Ok(SocketAddr::new(ip, port))
}

/// `0.0.0.0:<port>`.
pub fn ipv4_bind_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}
