use crate::error::{Result, StorageError};
use crate::{Persister, Restored, Snapshot};
use async_trait::async_trait;
use oxmetrics_common::retry::{Retry, RetryError};
use sea_orm::sea_query::{Alias, InsertStatement, OnConflict, Query};
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement, TransactionTrait, Value,
};
use std::time::Duration;

const COUNTERS_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS counters (id TEXT PRIMARY KEY, value BIGINT NOT NULL)";
const GAUGES_SCHEMA: &str =
    "CREATE TABLE IF NOT EXISTS gauges (id TEXT PRIMARY KEY, value DOUBLE PRECISION NOT NULL)";

const CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Relational persister: one upserted row per metric in `counters` and
/// `gauges`. Works against any backend SeaORM connects to by DSN.
pub struct DatabasePersister {
    db: DatabaseConnection,
    retry: Retry<StorageError>,
}

impl DatabasePersister {
    /// Connects to `dsn` and creates the tables if they are missing.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let db = Database::connect(dsn).await?;
        Self::from_connection(db).await
    }

    pub async fn from_connection(db: DatabaseConnection) -> Result<Self> {
        db.execute_unprepared(COUNTERS_SCHEMA).await?;
        db.execute_unprepared(GAUGES_SCHEMA).await?;
        tracing::info!(backend = ?db.get_database_backend(), "Database persister ready");
        Ok(Self {
            db,
            retry: Retry::default().retry_if(StorageError::is_transient),
        })
    }

    /// Overrides the retry policy used for save and restore.
    pub fn with_retry(mut self, retry: Retry<StorageError>) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend(&self) -> DbBackend {
        self.db.get_database_backend()
    }

    async fn save_once(&self, snapshot: &Snapshot) -> Result<()> {
        let backend = self.backend();
        let counters = snapshot.sorted_counters();
        let gauges = snapshot.sorted_gauges();

        let txn = self.db.begin().await?;
        if !counters.is_empty() {
            let stmt = upsert(
                "counters",
                counters.into_iter().map(|(id, v)| (id, Value::from(v))),
            )?;
            txn.execute(backend.build(&stmt)).await?;
        }
        if !gauges.is_empty() {
            let stmt = upsert(
                "gauges",
                gauges.into_iter().map(|(id, v)| (id, Value::from(v))),
            )?;
            txn.execute(backend.build(&stmt)).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn restore_once(&self) -> Result<Restored> {
        let backend = self.backend();
        let mut restored = Restored::default();

        let rows = self
            .db
            .query_all(Statement::from_string(
                backend,
                "SELECT id, value FROM counters",
            ))
            .await?;
        for row in rows {
            match (row.try_get::<String>("", "id"), row.try_get::<i64>("", "value")) {
                (Ok(id), Ok(value)) if !id.is_empty() => {
                    restored.snapshot.counters.insert(id, value);
                }
                _ => restored.skipped += 1,
            }
        }

        let rows = self
            .db
            .query_all(Statement::from_string(
                backend,
                "SELECT id, value FROM gauges",
            ))
            .await?;
        for row in rows {
            match (row.try_get::<String>("", "id"), row.try_get::<f64>("", "value")) {
                (Ok(id), Ok(value)) if !id.is_empty() && value.is_finite() => {
                    restored.snapshot.gauges.insert(id, value);
                }
                _ => restored.skipped += 1,
            }
        }
        Ok(restored)
    }
}

/// Multi-row `INSERT .. ON CONFLICT (id) DO UPDATE SET value = excluded.value`.
/// The in-memory store already holds totals, so the row is always replaced.
fn upsert<'a>(
    table: &str,
    rows: impl IntoIterator<Item = (&'a str, Value)>,
) -> Result<InsertStatement> {
    let mut stmt = Query::insert();
    stmt.into_table(Alias::new(table))
        .columns([Alias::new("id"), Alias::new("value")]);
    for (id, value) in rows {
        stmt.values([id.into(), value.into()])
            .map_err(|e| StorageError::Query(e.to_string()))?;
    }
    stmt.on_conflict(
        OnConflict::column(Alias::new("id"))
            .update_column(Alias::new("value"))
            .to_owned(),
    );
    Ok(stmt)
}

fn flatten(err: RetryError<StorageError>) -> StorageError {
    match err {
        RetryError::Failed(e) => e,
        timed_out @ RetryError::TimedOut { .. } => {
            StorageError::Database(sea_orm::DbErr::Custom(timed_out.to_string()))
        }
    }
}

#[async_trait]
impl Persister for DatabasePersister {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        self.retry
            .run(|_| self.save_once(snapshot))
            .await
            .map_err(flatten)?;
        tracing::debug!(count = snapshot.len(), "Snapshot upserted");
        Ok(())
    }

    async fn restore(&self) -> Result<Restored> {
        self.retry.run(|_| self.restore_once()).await.map_err(flatten)
    }

    async fn check(&self) -> Result<()> {
        match tokio::time::timeout(CHECK_TIMEOUT, self.db.ping()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StorageError::CheckTimeout),
        }
    }

    async fn close(&self) -> Result<()> {
        self.db.clone().close().await?;
        Ok(())
    }
}
