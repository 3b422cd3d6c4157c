//! Conversions between the domain model and the protobuf messages.

use crate::error::CodecError;
use crate::proto;
use crate::types::{Metric, MetricKey, MetricKind, MetricValue};
use prost::Message;

impl From<MetricKind> for proto::MType {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => proto::MType::Counter,
            MetricKind::Gauge => proto::MType::Gauge,
        }
    }
}

fn kind_from_wire(raw: i32) -> Result<MetricKind, CodecError> {
    match proto::MType::try_from(raw) {
        Ok(proto::MType::Counter) => Ok(MetricKind::Counter),
        Ok(proto::MType::Gauge) => Ok(MetricKind::Gauge),
        _ => Err(CodecError::UnknownType(raw.to_string())),
    }
}

impl From<&Metric> for proto::Metric {
    fn from(m: &Metric) -> Self {
        let (delta, value) = match m.value {
            MetricValue::Counter(d) => (d, 0.0),
            MetricValue::Gauge(v) => (0, v),
        };
        proto::Metric {
            id: m.id.clone(),
            r#type: proto::MType::from(m.kind()) as i32,
            delta,
            value,
        }
    }
}

impl TryFrom<proto::Metric> for Metric {
    type Error = CodecError;

    fn try_from(m: proto::Metric) -> Result<Self, Self::Error> {
        if m.id.is_empty() {
            return Err(CodecError::EmptyId);
        }
        let value = match kind_from_wire(m.r#type)? {
            MetricKind::Counter => MetricValue::Counter(m.delta),
            MetricKind::Gauge => MetricValue::Gauge(m.value),
        };
        Ok(Metric { id: m.id, value })
    }
}

impl TryFrom<proto::ValueRequest> for MetricKey {
    type Error = CodecError;

    fn try_from(req: proto::ValueRequest) -> Result<Self, Self::Error> {
        if req.id.is_empty() {
            return Err(CodecError::EmptyId);
        }
        Ok(MetricKey::new(req.id, kind_from_wire(req.r#type)?))
    }
}

/// Bytes covered by the `hashsha256` metadata of an update call: the
/// protobuf encodings of the sent metrics, concatenated in send order.
pub fn signing_bytes<'a>(metrics: impl IntoIterator<Item = &'a proto::Metric>) -> Vec<u8> {
    let mut out = Vec::new();
    for m in metrics {
        out.extend(m.encode_to_vec());
    }
    out
}
