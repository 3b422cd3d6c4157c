use super::Transport;
use crate::error::DispatchError;
use async_trait::async_trait;
use oxmetrics_common::grpc::signing_bytes;
use oxmetrics_common::hashing::Hasher;
use oxmetrics_common::proto::metrics_client::MetricsClient;
use oxmetrics_common::proto::{self, UpdateRequest, UpdatesRequest};
use oxmetrics_common::types::Metric;
use oxmetrics_common::{HASH_METADATA, REAL_IP_METADATA};
use std::net::IpAddr;
use tonic::codec::CompressionEncoding;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;

/// Unary `Update` for a single metric, client-streaming `Updates` otherwise.
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    hasher: Hasher,
    real_ip: Option<IpAddr>,
}

impl GrpcTransport {
    /// Builds the client without connecting; the channel connects on first
    /// use and reconnects after failures.
    pub fn connect_lazy(
        address: &str,
        hasher: Hasher,
        real_ip: Option<IpAddr>,
    ) -> Result<Self, DispatchError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let channel = Endpoint::from_shared(uri)?.connect_lazy();
        Ok(Self::new(channel, hasher, real_ip))
    }

    pub fn new(channel: Channel, hasher: Hasher, real_ip: Option<IpAddr>) -> Self {
        let client = MetricsClient::new(channel)
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);
        Self {
            client,
            hasher,
            real_ip,
        }
    }

    fn decorate<T>(&self, request: &mut Request<T>, wire: &[proto::Metric]) -> Result<(), DispatchError> {
        let metadata = request.metadata_mut();
        if self.hasher.enabled() {
            let tag = self.hasher.hash(&signing_bytes(wire));
            metadata.insert(HASH_METADATA, ascii(tag)?);
        }
        if let Some(ip) = self.real_ip {
            metadata.insert(REAL_IP_METADATA, ascii(ip.to_string())?);
        }
        Ok(())
    }
}

fn ascii(value: String) -> Result<AsciiMetadataValue, DispatchError> {
    AsciiMetadataValue::try_from(value)
        .map_err(|e| DispatchError::Grpc(tonic::Status::internal(e.to_string())))
}

#[async_trait]
impl Transport for GrpcTransport {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn send(&self, metrics: &[Metric]) -> Result<(), DispatchError> {
        let wire: Vec<proto::Metric> = metrics.iter().map(proto::Metric::from).collect();
        let mut client = self.client.clone();

        if let [single] = wire.as_slice() {
            let mut request = Request::new(UpdateRequest {
                metric: Some(single.clone()),
            });
            self.decorate(&mut request, &wire)?;
            client.update(request).await?;
        } else {
            let messages: Vec<UpdatesRequest> = wire
                .iter()
                .cloned()
                .map(|m| UpdatesRequest { metric: Some(m) })
                .collect();
            let mut request = Request::new(futures::stream::iter(messages));
            self.decorate(&mut request, &wire)?;
            client.updates(request).await?;
        }
        tracing::debug!(count = metrics.len(), "Batch delivered over gRPC");
        Ok(())
    }
}
