// Trait seams between the pipeline and the backing store.
//
// DimensionStore backs an identifier cache (persons, hosts).
// BulkBackend/BulkTransaction back the bulk-load session.
//
// Production wires in the Postgres adapters; tests use the in-memory
// doubles from `crate::testing`, so the pipeline runs without a database.

pub mod postgres;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::session::CopyTarget;

/// A row to insert into a dimension table on cache miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewEntry {
    Person {
        name: String,
    },
    Host {
        name: String,
        /// Registrable domain (eTLD+1), stored in the `tld` column.
        registrable: String,
        suffix: String,
    },
}

impl NewEntry {
    pub fn name(&self) -> &str {
        match self {
            NewEntry::Person { name } | NewEntry::Host { name, .. } => name,
        }
    }
}

/// Result of a full-table scan. Rows that failed to decode are only counted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DimensionScan {
    pub rows: Vec<(i64, String)>,
    pub skipped: usize,
}

#[async_trait]
pub trait DimensionStore: Send {
    /// Read every (id, name) pair of the dimension table.
    async fn scan(&mut self) -> Result<DimensionScan, StoreError>;

    /// Insert one entry and return its generated id.
    async fn insert(&mut self, entry: &NewEntry) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait BulkBackend: Send {
    /// Begin a transaction prepared to bulk-copy into `target`.
    async fn begin(&mut self, target: &CopyTarget) -> Result<Box<dyn BulkTransaction>, StoreError>;
}

#[async_trait]
pub trait BulkTransaction: Send {
    /// Store-assigned transaction id.
    fn id(&self) -> i64;

    /// Stream rows already encoded in text COPY format. Returns rows written.
    async fn copy_rows(&mut self, data: &[u8]) -> Result<u64, StoreError>;

    /// Commit. Dropping a transaction without committing rolls it back.
    async fn commit(&mut self) -> Result<(), StoreError>;
}
