use crate::error::Result;
use crate::{Persister, Restored, Snapshot};
use async_trait::async_trait;
use oxmetrics_common::types::MetricKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// One line of the snapshot file.
#[derive(Debug, Serialize, Deserialize)]
struct Record {
    name: String,
    #[serde(rename = "type")]
    kind: MetricKind,
    value: String,
}

/// Newline-delimited JSON snapshot file, rewritten in full on every save.
pub struct FilePersister {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn encode(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(snapshot.len() * 48);
    for (name, delta) in snapshot.sorted_counters() {
        serde_json::to_writer(
            &mut out,
            &Record {
                name: name.to_string(),
                kind: MetricKind::Counter,
                value: delta.to_string(),
            },
        )?;
        out.push(b'\n');
    }
    for (name, value) in snapshot.sorted_gauges() {
        serde_json::to_writer(
            &mut out,
            &Record {
                name: name.to_string(),
                kind: MetricKind::Gauge,
                value: value.to_string(),
            },
        )?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Applies one line to `snapshot`. Returns false if the line is malformed.
fn decode_line(line: &str, snapshot: &mut Snapshot) -> bool {
    let Ok(record) = serde_json::from_str::<Record>(line) else {
        return false;
    };
    if record.name.is_empty() {
        return false;
    }
    match record.kind {
        MetricKind::Counter => match record.value.parse::<i64>() {
            Ok(v) => {
                let entry = snapshot.counters.entry(record.name).or_insert(0);
                *entry = entry.wrapping_add(v);
                true
            }
            Err(_) => false,
        },
        MetricKind::Gauge => match record.value.parse::<f64>() {
            Ok(v) if v.is_finite() => {
                snapshot.gauges.insert(record.name, v);
                true
            }
            _ => false,
        },
    }
}

#[async_trait]
impl Persister for FilePersister {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let body = encode(snapshot)?;
        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, body).await?;
        tracing::debug!(path = %self.path.display(), count = snapshot.len(), "Snapshot written");
        Ok(())
    }

    async fn restore(&self) -> Result<Restored> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No snapshot file, starting empty");
                return Ok(Restored::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut restored = Restored::default();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if !decode_line(line, &mut restored.snapshot) {
                tracing::warn!(line = lineno + 1, "Skipping malformed snapshot record");
                restored.skipped += 1;
            }
        }
        Ok(restored)
    }

    async fn check(&self) -> Result<()> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
