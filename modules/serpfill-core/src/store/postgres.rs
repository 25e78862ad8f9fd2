// Postgres adapters for the dimension tables and the bulk-copy target.

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

use super::{BulkBackend, BulkTransaction, DimensionScan, DimensionStore, NewEntry};
use crate::cache::Dimension;
use crate::error::StoreError;
use crate::session::CopyTarget;

/// Open a pool and make sure the server answers.
///
/// Two connections are enough: one is held by the open bulk-copy
/// transaction, the other serves cache inserts.
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!("Connected to database");
    Ok(pool)
}

/// A persons or hosts table.
pub struct PgDimensionStore {
    pool: PgPool,
    dimension: Dimension,
}

impl PgDimensionStore {
    pub fn new(pool: PgPool, dimension: Dimension) -> Self {
        Self { pool, dimension }
    }
}

#[async_trait]
impl DimensionStore for PgDimensionStore {
    async fn scan(&mut self) -> Result<DimensionScan, StoreError> {
        let sql = format!("SELECT id::int8, name FROM {}", self.dimension.table());
        let mut rows = sqlx::query(&sql).fetch(&self.pool);
        let mut scan = DimensionScan::default();

        while let Some(row) = rows.try_next().await? {
            match (row.try_get::<i64, _>(0), row.try_get::<String, _>(1)) {
                (Ok(id), Ok(name)) => scan.rows.push((id, name)),
                (Err(e), _) | (_, Err(e)) => {
                    debug!(table = self.dimension.table(), error = %e, "Skipping undecodable row");
                    scan.skipped += 1;
                }
            }
        }

        Ok(scan)
    }

    async fn insert(&mut self, entry: &NewEntry) -> Result<i64, StoreError> {
        let id = match entry {
            NewEntry::Person { name } => {
                sqlx::query_scalar::<_, i64>(
                    "INSERT INTO persons (name) VALUES ($1) RETURNING id::int8",
                )
                .bind(name)
                .fetch_one(&self.pool)
                .await?
            }
            NewEntry::Host {
                name,
                registrable,
                suffix,
            } => {
                sqlx::query_scalar::<_, i64>(
                    "INSERT INTO hosts (name, tld, suffix) VALUES ($1, $2, $3) RETURNING id::int8",
                )
                .bind(name)
                .bind(registrable)
                .bind(suffix)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(id)
    }
}

/// Opens one transaction per chunk and streams rows with `COPY ... FROM STDIN`.
pub struct PgBulkBackend {
    pool: PgPool,
}

impl PgBulkBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BulkBackend for PgBulkBackend {
    async fn begin(&mut self, target: &CopyTarget) -> Result<Box<dyn BulkTransaction>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query_scalar::<_, i64>("SELECT txid_current()")
            .fetch_one(&mut *tx)
            .await?;

        // Zero-row COPY so a missing table or column fails here, not on the first flush.
        let statement = target.copy_statement();
        tx.copy_in_raw(&statement).await?.finish().await?;

        Ok(Box::new(PgBulkTransaction {
            tx: Some(tx),
            statement,
            id,
        }))
    }
}

struct PgBulkTransaction {
    tx: Option<Transaction<'static, Postgres>>,
    statement: String,
    id: i64,
}

impl PgBulkTransaction {
    fn live(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::Rejected(format!("transaction {} already finished", self.id)))
    }
}

#[async_trait]
impl BulkTransaction for PgBulkTransaction {
    fn id(&self) -> i64 {
        self.id
    }

    async fn copy_rows(&mut self, data: &[u8]) -> Result<u64, StoreError> {
        let statement = self.statement.clone();
        let tx = self.live()?;

        let mut copy = tx.copy_in_raw(&statement).await?;
        copy.send(data).await?;
        Ok(copy.finish().await?)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::Rejected(format!("transaction {} already finished", self.id)))?;
        tx.commit().await?;
        Ok(())
    }
}
