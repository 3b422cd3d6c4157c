use serde::{Deserialize, Serialize};

/// The two metric families.
///
/// # Examples
///
/// ```
/// use oxmetrics_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(MetricKind::Gauge.to_string(), "gauge");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            _ => Err(format!("unknown metric type: {s}")),
        }
    }
}

/// Payload of a metric. The variant fixes the kind, so a counter can never
/// carry a float and a gauge can never carry a delta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Increment to add to the stored counter.
    Counter(i64),
    /// Replacement value for the stored gauge.
    Gauge(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }
}

/// A single named sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

/// Identity of a metric without a value, as used by read requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub id: String,
    pub kind: MetricKind,
}

impl MetricKey {
    pub fn new(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}
