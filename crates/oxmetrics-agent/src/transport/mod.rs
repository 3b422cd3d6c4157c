//! Delivery of one batch to the server.

pub mod grpc;
pub mod http;

use crate::error::DispatchError;
use async_trait::async_trait;
use oxmetrics_common::types::Metric;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

pub use grpc::GrpcTransport;
pub use http::HttpTransport;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs (`"http"`, `"grpc"`).
    fn name(&self) -> &'static str;

    /// Delivers `metrics` in one request. The server applies them all or
    /// none.
    async fn send(&self, metrics: &[Metric]) -> Result<(), DispatchError>;
}

/// Removes a leading `scheme://` and any trailing path.
pub(crate) fn host_port(address: &str) -> &str {
    let rest = address
        .split_once("://")
        .map_or(address, |(_, rest)| rest);
    rest.split('/').next().unwrap_or(rest)
}

/// The local address the OS picks for traffic towards `server`.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub async fn outbound_ip(server: &str) -> io::Result<IpAddr> {
    let target = tokio::net::lookup_host(host_port(server))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {server}")))?;
    let local: SocketAddr = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(target).await?;
    Ok(socket.local_addr()?.ip())
}
