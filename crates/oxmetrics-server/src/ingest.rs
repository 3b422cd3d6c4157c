//! Transport-independent ingest and query logic shared by the HTTP handlers
//! and the gRPC service.

use crate::error::{IngestError, Result};
use oxmetrics_common::codec;
use oxmetrics_common::error::CodecError;
use oxmetrics_common::types::{Metric, MetricKey, MetricKind, MetricValue};
use oxmetrics_storage::memory::MetricStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct MetricsController {
    store: Arc<MetricStore>,
}

impl MetricsController {
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// Stores one metric and returns it as stored (counters carry the new
    /// total).
    pub async fn update(&self, metric: Metric) -> Result<Metric> {
        check_finite(&metric)?;
        let stored = self.store.apply(&metric).await;
        tracing::debug!(id = %stored.id, kind = %stored.kind(), "Metric updated");
        Ok(stored)
    }

    /// Stores a batch. Every element is validated before the first one is
    /// applied.
    pub async fn update_batch(&self, metrics: &[Metric]) -> Result<()> {
        for (index, metric) in metrics.iter().enumerate() {
            check_finite(metric).map_err(|e| match e {
                IngestError::Validation(source) => IngestError::Validation(CodecError::BatchElement {
                    index,
                    source: Box::new(source),
                }),
                other => other,
            })?;
        }
        self.store.apply_batch(metrics).await;
        tracing::debug!(count = metrics.len(), "Batch applied");
        Ok(())
    }

    pub async fn value(&self, key: &MetricKey) -> Result<Metric> {
        self.store
            .get(key)
            .await
            .ok_or_else(|| IngestError::not_found(key.kind, key.id.clone()))
    }

    /// Every stored metric, gauges first.
    pub async fn values(&self) -> Vec<Metric> {
        self.store.list().await
    }

    pub async fn check(&self) -> Result<()> {
        Ok(self.store.check().await?)
    }

    /// `POST /update/`: JSON metric in, stored JSON metric out.
    pub async fn update_json(&self, body: &[u8]) -> Result<Vec<u8>> {
        let metric = codec::parse_single(body)?;
        let stored = self.update(metric).await?;
        Ok(codec::encode_single(&stored)?)
    }

    /// `POST /updates/`: JSON array in, `{}` out.
    pub async fn updates_json(&self, body: &[u8]) -> Result<Vec<u8>> {
        let metrics = codec::parse_batch(body)?;
        self.update_batch(&metrics).await?;
        Ok(b"{}".to_vec())
    }

    /// `POST /value/`: JSON key in, stored JSON metric out.
    pub async fn value_json(&self, body: &[u8]) -> Result<Vec<u8>> {
        let key = codec::parse_key(body)?;
        let metric = self.value(&key).await?;
        Ok(codec::encode_single(&metric)?)
    }

    /// `POST /update/{type}/{name}/{value}`.
    pub async fn update_text(&self, kind: &str, name: &str, raw: &str) -> Result<()> {
        let kind = parse_kind(kind)?;
        if name.is_empty() {
            return Err(IngestError::MissingName);
        }
        let value = codec::parse_text_value(kind, raw)?;
        self.update(Metric {
            id: name.to_string(),
            value,
        })
        .await?;
        Ok(())
    }

    /// `GET /value/{type}/{name}`: the canonical text form of the value.
    pub async fn value_text(&self, kind: &str, name: &str) -> Result<String> {
        let kind = parse_kind(kind)?;
        let metric = self.value(&MetricKey::new(name, kind)).await?;
        Ok(codec::format_value(&metric.value))
    }
}

fn parse_kind(raw: &str) -> Result<MetricKind> {
    raw.parse::<MetricKind>()
        .map_err(|_| IngestError::Validation(CodecError::UnknownType(raw.to_string())))
}

/// JSON cannot carry NaN or infinities, so neither may any other transport.
fn check_finite(metric: &Metric) -> Result<()> {
    match metric.value {
        MetricValue::Gauge(v) if !v.is_finite() => Err(IngestError::Validation(CodecError::BadValue {
            raw: v.to_string(),
            kind: MetricKind::Gauge.as_str(),
        })),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> MetricsController {
        MetricsController::new(Arc::new(MetricStore::new(None)))
    }

    #[tokio::test]
    async fn json_update_echoes_counter_total() {
        let c = controller();
        c.update_json(br#"{"id":"hits","type":"counter","delta":5}"#)
            .await
            .unwrap();
        let out = c
            .update_json(br#"{"id":"hits","type":"counter","delta":7}"#)
            .await
            .unwrap();
        assert_eq!(out, br#"{"id":"hits","type":"counter","delta":12}"#);
    }

    #[tokio::test]
    async fn text_round_trip() {
        let c = controller();
        c.update_text("gauge", "temp", "3.5").await.unwrap();
        c.update_text("gauge", "temp", "4.25").await.unwrap();
        assert_eq!(c.value_text("gauge", "temp").await.unwrap(), "4.25");
    }

    #[tokio::test]
    async fn errors_map_to_kinds() {
        let c = controller();
        assert!(matches!(
            c.update_text("histogram", "x", "1").await,
            Err(IngestError::Validation(CodecError::UnknownType(_)))
        ));
        assert!(matches!(
            c.update_text("counter", "x", "1.5").await,
            Err(IngestError::Validation(CodecError::BadValue { .. }))
        ));
        assert!(matches!(
            c.value_text("counter", "x").await,
            Err(IngestError::NotFound { .. })
        ));
        assert!(matches!(
            c.update(Metric::gauge("nan", f64::NAN)).await,
            Err(IngestError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn invalid_batch_element_changes_nothing() {
        let c = controller();
        let err = c
            .update_batch(&[Metric::counter("a", 1), Metric::gauge("b", f64::INFINITY)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Validation(CodecError::BatchElement { index: 1, .. })
        ));
        assert!(c.values().await.is_empty());
    }
}
