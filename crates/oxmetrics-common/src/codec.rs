//! JSON and text wire forms of [`Metric`].
//!
//! The JSON shape is `{"id": .., "type": "counter"|"gauge", "delta": .., "value": ..}`
//! where `delta` belongs to counters and `value` to gauges. The text form is
//! used by the path-style REST endpoints.

use crate::error::{CodecError, Result};
use crate::types::{Metric, MetricKey, MetricKind, MetricValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct MetricJson {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
}

impl MetricJson {
    fn key(&self) -> Result<MetricKey> {
        if self.id.is_empty() {
            return Err(CodecError::EmptyId);
        }
        let kind = self
            .kind
            .parse::<MetricKind>()
            .map_err(|_| CodecError::UnknownType(self.kind.clone()))?;
        Ok(MetricKey::new(self.id.clone(), kind))
    }

    fn into_metric(self) -> Result<Metric> {
        let key = self.key()?;
        if self.delta.is_some() && self.value.is_some() {
            return Err(CodecError::ConflictingValues { id: key.id });
        }
        let value = match key.kind {
            MetricKind::Counter => self.delta.map(MetricValue::Counter),
            MetricKind::Gauge => self.value.map(MetricValue::Gauge),
        };
        match value {
            Some(value) => Ok(Metric { id: key.id, value }),
            None => Err(CodecError::MissingValue {
                id: key.id,
                kind: key.kind.as_str(),
            }),
        }
    }
}

impl From<&Metric> for MetricJson {
    fn from(m: &Metric) -> Self {
        let (delta, value) = match m.value {
            MetricValue::Counter(d) => (Some(d), None),
            MetricValue::Gauge(v) => (None, Some(v)),
        };
        Self {
            id: m.id.clone(),
            kind: m.kind().as_str().to_string(),
            delta,
            value,
        }
    }
}

/// Decodes and validates one JSON metric.
pub fn parse_single(bytes: &[u8]) -> Result<Metric> {
    let raw: MetricJson = serde_json::from_slice(bytes)?;
    raw.into_metric()
}

/// Decodes a JSON array of metrics. Any invalid element fails the whole batch.
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<Metric>> {
    let raw: Vec<MetricJson> = serde_json::from_slice(bytes)?;
    raw.into_iter()
        .enumerate()
        .map(|(index, m)| {
            m.into_metric().map_err(|e| CodecError::BatchElement {
                index,
                source: Box::new(e),
            })
        })
        .collect()
}

/// Decodes a read request, which names a metric but carries no value.
pub fn parse_key(bytes: &[u8]) -> Result<MetricKey> {
    let raw: MetricJson = serde_json::from_slice(bytes)?;
    raw.key()
}

pub fn encode_single(metric: &Metric) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&MetricJson::from(metric))?)
}

pub fn encode_batch(metrics: &[Metric]) -> Result<Vec<u8>> {
    let raw: Vec<MetricJson> = metrics.iter().map(MetricJson::from).collect();
    Ok(serde_json::to_vec(&raw)?)
}

/// Parses the `{value}` segment of `/update/{type}/{name}/{value}`.
///
/// # Examples
///
/// ```
/// use oxmetrics_common::codec::parse_text_value;
/// use oxmetrics_common::types::{MetricKind, MetricValue};
///
/// assert_eq!(parse_text_value(MetricKind::Counter, "7").unwrap(), MetricValue::Counter(7));
/// assert_eq!(parse_text_value(MetricKind::Gauge, "4.25").unwrap(), MetricValue::Gauge(4.25));
/// assert!(parse_text_value(MetricKind::Counter, "4.25").is_err());
/// ```
pub fn parse_text_value(kind: MetricKind, raw: &str) -> Result<MetricValue> {
    let bad = || CodecError::BadValue {
        raw: raw.to_string(),
        kind: kind.as_str(),
    };
    match kind {
        MetricKind::Counter => raw.parse::<i64>().map(MetricValue::Counter).map_err(|_| bad()),
        MetricKind::Gauge => {
            let v = raw.parse::<f64>().map_err(|_| bad())?;
            // JSON cannot carry NaN or infinities, so they are refused at the door.
            if !v.is_finite() {
                return Err(bad());
            }
            Ok(MetricValue::Gauge(v))
        }
    }
}

/// Canonical text rendering: counters as decimal integers, gauges in the
/// shortest form that parses back to the same double.
///
/// # Examples
///
/// ```
/// use oxmetrics_common::codec::format_value;
/// use oxmetrics_common::types::MetricValue;
///
/// assert_eq!(format_value(&MetricValue::Counter(12)), "12");
/// assert_eq!(format_value(&MetricValue::Gauge(4.25)), "4.25");
/// assert_eq!(format_value(&MetricValue::Gauge(3.0)), "3");
/// ```
pub fn format_value(value: &MetricValue) -> String {
    match value {
        MetricValue::Counter(d) => d.to_string(),
        MetricValue::Gauge(v) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_counter_and_gauge() {
        let c = parse_single(br#"{"id":"hits","type":"counter","delta":5}"#).unwrap();
        assert_eq!(c, Metric::counter("hits", 5));

        let g = parse_single(br#"{"id":"temp","type":"gauge","value":3.5}"#).unwrap();
        assert_eq!(g, Metric::gauge("temp", 3.5));
    }

    #[test]
    fn rejects_field_that_belongs_to_other_kind() {
        let err = parse_single(br#"{"id":"hits","type":"counter","value":1.0}"#).unwrap_err();
        assert!(matches!(err, CodecError::MissingValue { .. }));
    }

    #[test]
    fn rejects_both_delta_and_value() {
        let err =
            parse_single(br#"{"id":"x","type":"gauge","delta":1,"value":1.0}"#).unwrap_err();
        assert!(matches!(err, CodecError::ConflictingValues { .. }));
    }

    #[test]
    fn rejects_empty_id_and_unknown_type() {
        assert!(matches!(
            parse_single(br#"{"id":"","type":"gauge","value":1}"#).unwrap_err(),
            CodecError::EmptyId
        ));
        assert!(matches!(
            parse_single(br#"{"id":"a","type":"histogram","value":1}"#).unwrap_err(),
            CodecError::UnknownType(t) if t == "histogram"
        ));
        assert!(matches!(
            parse_single(br#"{"type":"gauge","value":1}"#).unwrap_err(),
            CodecError::EmptyId
        ));
    }

    #[test]
    fn batch_fails_on_any_invalid_element() {
        let body = br#"[{"id":"a","type":"counter","delta":1},{"id":"b","type":"gauge"}]"#;
        match parse_batch(body).unwrap_err() {
            CodecError::BatchElement { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn batch_keeps_order() {
        let body = br#"[{"id":"a","type":"counter","delta":1},{"id":"b","type":"gauge","value":2.5},{"id":"a","type":"counter","delta":4}]"#;
        let batch = parse_batch(body).unwrap();
        assert_eq!(
            batch,
            vec![
                Metric::counter("a", 1),
                Metric::gauge("b", 2.5),
                Metric::counter("a", 4)
            ]
        );
    }

    #[test]
    fn encoded_metric_parses_back() {
        for m in [
            Metric::counter("PollCount", i64::MAX),
            Metric::counter("neg", -3),
            Metric::gauge("RandomValue", 0.123_456_789_012_345_67),
            Metric::gauge("tiny", 5e-324),
        ] {
            let bytes = encode_single(&m).unwrap();
            assert_eq!(parse_single(&bytes).unwrap(), m);
        }
    }

    #[test]
    fn encoded_counter_omits_value_field() {
        let bytes = encode_single(&Metric::counter("hits", 2)).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["type"], "counter");
        assert_eq!(v["delta"], 2);
        assert!(v.get("value").is_none());
    }

    #[test]
    fn key_ignores_value_fields() {
        let key = parse_key(br#"{"id":"missing","type":"gauge"}"#).unwrap();
        assert_eq!(key, MetricKey::new("missing", MetricKind::Gauge));
    }

    #[test]
    fn text_gauge_rejects_non_finite() {
        assert!(parse_text_value(MetricKind::Gauge, "NaN").is_err());
        assert!(parse_text_value(MetricKind::Gauge, "inf").is_err());
        assert!(parse_text_value(MetricKind::Gauge, "abc").is_err());
    }

    #[test]
    fn gauge_formatting_round_trips() {
        for v in [0.1, 1e21, 123_456.789, -0.5, 1.0 / 3.0] {
            let text = format_value(&MetricValue::Gauge(v));
            assert_eq!(text.parse::<f64>().unwrap(), v);
        }
    }
}
