use crate::error::IngestError;
use crate::ingest::MetricsController;
use crate::middleware::ip_gate::admit;
use futures::Stream;
use ipnet::IpNet;
use oxmetrics_common::grpc::signing_bytes;
use oxmetrics_common::hashing::Hasher;
use oxmetrics_common::proto::metrics_server::{Metrics, MetricsServer};
use oxmetrics_common::proto::{
    self, CheckStorageResponse, Empty, UpdateRequest, UpdatesRequest, ValueRequest, ValueResponse,
    ValuesResponse,
};
use oxmetrics_common::types::{Metric, MetricKey};
use oxmetrics_common::{HASH_METADATA, REAL_IP_METADATA};
use std::pin::Pin;
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};

/// gRPC face of the ingest controller.
///
/// The IP gate and the HMAC check are applied per call from request metadata,
/// mirroring the HTTP middleware.
pub struct MetricsService {
    controller: MetricsController,
    hasher: Hasher,
    trusted_subnet: Option<IpNet>,
}

impl MetricsService {
    pub fn new(controller: MetricsController, hasher: Hasher, trusted_subnet: Option<IpNet>) -> Self {
        Self {
            controller,
            hasher,
            trusted_subnet,
        }
    }

    /// Wraps the service in the generated server with gzip both ways.
    pub fn into_server(self) -> MetricsServer<Self> {
        MetricsServer::new(self)
            .accept_compressed(CompressionEncoding::Gzip)
            .send_compressed(CompressionEncoding::Gzip)
    }

    fn admit(&self, metadata: &MetadataMap) -> Result<(), Status> {
        let Some(subnet) = &self.trusted_subnet else {
            return Ok(());
        };
        let advertised = metadata
            .get(REAL_IP_METADATA)
            .map(|v| v.to_str().unwrap_or_default());
        admit(subnet, advertised).map(|_| ()).map_err(|e| {
            tracing::warn!(error = %e, "gRPC call rejected by IP gate");
            Status::from(e)
        })
    }

    fn verify(&self, metadata: &MetadataMap, metrics: &[proto::Metric]) -> Result<(), Status> {
        if !self.hasher.enabled() {
            return Ok(());
        }
        let Some(tag) = metadata.get(HASH_METADATA) else {
            return Ok(());
        };
        let tag = tag
            .to_str()
            .map_err(|_| Status::invalid_argument("hashsha256 metadata is not valid text"))?;
        if self.hasher.verify(&signing_bytes(metrics), tag) {
            Ok(())
        } else {
            Err(IngestError::Integrity.into())
        }
    }
}

type BoxValuesStream = Pin<Box<dyn Stream<Item = Result<ValuesResponse, Status>> + Send>>;

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn update(&self, request: Request<UpdateRequest>) -> Result<Response<Empty>, Status> {
        self.admit(request.metadata())?;
        let (metadata, _, message) = request.into_parts();
        let wire = message
            .metric
            .ok_or_else(|| Status::invalid_argument("metric is required"))?;
        self.verify(&metadata, std::slice::from_ref(&wire))?;

        let metric = Metric::try_from(wire).map_err(IngestError::from)?;
        self.controller.update(metric).await?;
        Ok(Response::new(Empty {}))
    }

    async fn updates(
        &self,
        request: Request<Streaming<UpdatesRequest>>,
    ) -> Result<Response<Empty>, Status> {
        self.admit(request.metadata())?;
        let (metadata, _, mut stream) = request.into_parts();

        let mut wire = Vec::new();
        while let Some(message) = stream.message().await? {
            let metric = message
                .metric
                .ok_or_else(|| Status::invalid_argument("metric is required"))?;
            wire.push(metric);
        }
        self.verify(&metadata, &wire)?;

        let metrics = wire
            .into_iter()
            .map(Metric::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(IngestError::from)?;
        self.controller.update_batch(&metrics).await?;
        tracing::debug!(count = metrics.len(), "gRPC batch applied");
        Ok(Response::new(Empty {}))
    }

    async fn value(&self, request: Request<ValueRequest>) -> Result<Response<ValueResponse>, Status> {
        self.admit(request.metadata())?;
        let key = MetricKey::try_from(request.into_inner()).map_err(IngestError::from)?;
        let metric = self.controller.value(&key).await?;
        Ok(Response::new(ValueResponse {
            metric: Some(proto::Metric::from(&metric)),
        }))
    }

    type ValuesStream = BoxValuesStream;

    async fn values(&self, request: Request<Empty>) -> Result<Response<Self::ValuesStream>, Status> {
        self.admit(request.metadata())?;
        let metrics = self.controller.values().await;
        let stream = futures::stream::iter(metrics.into_iter().map(|m| {
            Ok(ValuesResponse {
                metric: Some(proto::Metric::from(&m)),
            })
        }));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn check_storage(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<CheckStorageResponse>, Status> {
        self.admit(request.metadata())?;
        let ok = match self.controller.check().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Storage check failed");
                false
            }
        };
        Ok(Response::new(CheckStorageResponse { ok }))
    }
}
