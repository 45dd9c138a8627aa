//! Table store
//!
//! The reconciler's only door to the external database. `TableStore` is the
//! injection seam: production uses `PgTableStore` over a shared bounded
//! connection pool, tests substitute an in-memory fake. No caller gets
//! exclusive access to the database beyond the statement it issues.

use crate::error::Error;
use crate::translate::TableSpec;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Convergence actions against the external database for one table.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Drop the table if it exists. Idempotent.
    async fn drop_table(&self, table: &TableSpec) -> Result<(), Error>;

    /// Create the table with exactly the spec's columns, as one statement.
    async fn create_table(&self, table: &TableSpec) -> Result<(), Error>;

    /// Columns actually present for the table right now, keyed by column name
    /// with the reported data type as value. `None` if the table does not
    /// exist. Never cached; always re-derived from the database.
    async fn current_columns(
        &self,
        table: &TableSpec,
    ) -> Result<Option<BTreeMap<String, String>>, Error>;
}

/// Production store over a deadpool connection pool.
///
/// Pool acquisition is bounded by the pool's configured wait timeout, so
/// exhaustion surfaces as a retryable `Error::Pool` instead of blocking a
/// worker indefinitely. Each statement additionally runs under
/// `statement_timeout`.
pub struct PgTableStore {
    pool: Pool,
    statement_timeout: Duration,
}

impl PgTableStore {
    pub fn new(pool: Pool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        match tokio::time::timeout(self.statement_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout(self.statement_timeout)),
        }
    }
}

#[async_trait]
impl TableStore for PgTableStore {
    async fn drop_table(&self, table: &TableSpec) -> Result<(), Error> {
        let client = self.pool.get().await?;
        let sql = table.drop_sql();
        debug!(table = %table.name, %sql, "dropping table");
        self.bounded(client.execute(sql.as_str(), &[])).await?;
        Ok(())
    }

    async fn create_table(&self, table: &TableSpec) -> Result<(), Error> {
        let client = self.pool.get().await?;
        let sql = table.create_sql();
        debug!(table = %table.name, %sql, "creating table");
        self.bounded(client.execute(sql.as_str(), &[])).await?;
        Ok(())
    }

    async fn current_columns(
        &self,
        table: &TableSpec,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let client = self.pool.get().await?;
        let rows = self
            .bounded(client.query(
                "SELECT column_name, data_type
                 FROM information_schema.columns
                 WHERE table_schema = 'public' AND table_name = $1
                 ORDER BY ordinal_position",
                &[&table.name.as_str()],
            ))
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut columns = BTreeMap::new();
        for row in rows {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            columns.insert(name, data_type);
        }
        Ok(Some(columns))
    }
}
