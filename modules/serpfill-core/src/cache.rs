//! In-memory name → id caches for dimension tables.
//!
//! A cache is filled once from a full scan of its table and then grows by
//! insert-on-miss. Entries are never evicted, so for the length of a run the
//! cache holds every row of the table that this process knows about. Names
//! are lowercased before every lookup and insert.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::{debug, info};

use crate::error::{LoadError, ResolutionError};
use crate::store::{DimensionStore, NewEntry};

/// The dimension tables the pipeline resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Persons,
    Hosts,
}

impl Dimension {
    pub fn table(self) -> &'static str {
        match self {
            Dimension::Persons => "persons",
            Dimension::Hosts => "hosts",
        }
    }

    /// Build the row to insert for a normalized name.
    pub fn derive(self, name: &str) -> Result<NewEntry, ResolutionError> {
        match self {
            Dimension::Persons => Ok(NewEntry::Person {
                name: name.to_string(),
            }),
            Dimension::Hosts => derive_host(name),
        }
    }
}

/// Hosts carry their registrable domain and public suffix, taken from the
/// Public Suffix List. IP literals are their own registrable domain.
pub fn derive_host(name: &str) -> Result<NewEntry, ResolutionError> {
    let host = name.trim_start_matches('[').trim_end_matches(']');
    if host.parse::<IpAddr>().is_ok() {
        return Ok(NewEntry::Host {
            name: name.to_string(),
            registrable: name.to_string(),
            suffix: String::new(),
        });
    }

    let registrable = psl::domain_str(name).ok_or_else(|| ResolutionError::Derive {
        dimension: Dimension::Hosts.table(),
        name: name.to_string(),
        reason: "no registrable domain".to_string(),
    })?;
    let suffix = psl::suffix_str(name).unwrap_or_default();

    Ok(NewEntry::Host {
        name: name.to_string(),
        registrable: registrable.to_string(),
        suffix: suffix.to_string(),
    })
}

pub fn normalize(raw: &str) -> String {
    raw.to_lowercase()
}

/// Counts from the initial table scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

pub struct IdentifierCache {
    dimension: Dimension,
    store: Box<dyn DimensionStore>,
    ids: HashMap<String, i64>,
    inserts: usize,
}

impl IdentifierCache {
    pub fn new(dimension: Dimension, store: Box<dyn DimensionStore>) -> Self {
        Self {
            dimension,
            store,
            ids: HashMap::new(),
            inserts: 0,
        }
    }

    /// Preload the whole table. Undecodable rows are counted and skipped;
    /// only a failure of the scan itself is an error.
    pub async fn load(&mut self) -> Result<LoadReport, LoadError> {
        info!(table = self.dimension.table(), "Loading dimension");

        let scan = self.store.scan().await.map_err(|source| LoadError {
            dimension: self.dimension.table(),
            source,
        })?;

        let report = LoadReport {
            loaded: scan.rows.len(),
            skipped: scan.skipped,
        };
        self.ids.reserve(scan.rows.len());
        for (id, name) in scan.rows {
            self.ids.insert(normalize(&name), id);
        }

        info!(
            table = self.dimension.table(),
            loaded = report.loaded,
            skipped = report.skipped,
            distinct = self.ids.len(),
            "Dimension loaded"
        );
        Ok(report)
    }

    /// Cache lookup only. Never touches the store.
    pub fn lookup(&self, raw: &str) -> Option<i64> {
        self.ids.get(&normalize(raw)).copied()
    }

    /// Return the id for `raw`, inserting a new row on miss. Nothing is
    /// cached when derivation or the insert fails.
    pub async fn resolve(&mut self, raw: &str) -> Result<i64, ResolutionError> {
        let name = normalize(raw);
        if let Some(id) = self.ids.get(&name) {
            return Ok(*id);
        }
        if name.is_empty() {
            return Err(ResolutionError::EmptyName {
                dimension: self.dimension.table(),
            });
        }

        let entry = self.dimension.derive(&name)?;
        let id = self
            .store
            .insert(&entry)
            .await
            .map_err(|source| ResolutionError::Insert {
                dimension: self.dimension.table(),
                name: name.clone(),
                source,
            })?;

        debug!(table = self.dimension.table(), name = name.as_str(), id, "Inserted dimension row");
        self.inserts += 1;
        self.ids.insert(name, id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Successful insert-on-miss operations this run.
    pub fn inserts(&self) -> usize {
        self.inserts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDimensionStore;

    async fn loaded(dimension: Dimension, store: &MemoryDimensionStore) -> IdentifierCache {
        let mut cache = IdentifierCache::new(dimension, Box::new(store.clone()));
        cache.load().await.unwrap();
        cache
    }

    #[tokio::test]
    async fn load_normalizes_names_and_counts_bad_rows() {
        let store = MemoryDimensionStore::with_rows([(1, "Jane Doe"), (2, "JOHN SMITH")])
            .with_undecodable(3);
        let mut cache = IdentifierCache::new(Dimension::Persons, Box::new(store.clone()));

        let report = cache.load().await.unwrap();

        assert_eq!(report, LoadReport { loaded: 2, skipped: 3 });
        assert_eq!(cache.lookup("jane doe"), Some(1));
        assert_eq!(cache.lookup("John Smith"), Some(2));
        assert_eq!(cache.lookup("nobody"), None);
    }

    #[tokio::test]
    async fn load_failure_is_reported() {
        let store = MemoryDimensionStore::new().failing_scan();
        let mut cache = IdentifierCache::new(Dimension::Persons, Box::new(store));
        let err = cache.load().await.unwrap_err();
        assert_eq!(err.dimension, "persons");
    }

    #[tokio::test]
    async fn cached_names_resolve_without_writes() {
        let store = MemoryDimensionStore::with_rows([(42, "jane doe")]);
        let mut cache = loaded(Dimension::Persons, &store).await;

        assert_eq!(cache.resolve("Jane Doe").await.unwrap(), 42);
        assert_eq!(cache.resolve("JANE DOE").await.unwrap(), 42);
        assert!(store.inserted().is_empty());
        assert_eq!(cache.inserts(), 0);
    }

    #[tokio::test]
    async fn misses_insert_exactly_once() {
        let store = MemoryDimensionStore::new();
        let mut cache = loaded(Dimension::Hosts, &store).await;

        let first = cache.resolve("WWW.Example.co.uk").await.unwrap();
        let second = cache.resolve("www.example.co.uk").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            store.inserted(),
            vec![NewEntry::Host {
                name: "www.example.co.uk".into(),
                registrable: "example.co.uk".into(),
                suffix: "co.uk".into(),
            }]
        );
        assert_eq!(cache.inserts(), 1);
        assert_eq!(cache.lookup("www.example.co.uk"), Some(first));
    }

    #[tokio::test]
    async fn derivation_failure_caches_nothing() {
        let store = MemoryDimensionStore::new();
        let mut cache = loaded(Dimension::Hosts, &store).await;

        let err = cache.resolve("co.uk").await.unwrap_err();
        assert!(matches!(err, ResolutionError::Derive { .. }));
        assert!(store.inserted().is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn constraint_violation_surfaces_as_resolution_error() {
        // Another writer inserted the row after our preload.
        let store = MemoryDimensionStore::new();
        let mut cache = loaded(Dimension::Persons, &store).await;
        store.add_row(9, "late arrival");

        let err = cache.resolve("late arrival").await.unwrap_err();
        assert!(matches!(err, ResolutionError::Insert { .. }));
        assert_eq!(cache.lookup("late arrival"), None);
    }

    #[tokio::test]
    async fn empty_names_are_never_inserted() {
        let store = MemoryDimensionStore::new();
        let mut cache = loaded(Dimension::Persons, &store).await;
        assert!(matches!(
            cache.resolve("").await,
            Err(ResolutionError::EmptyName { .. })
        ));
        assert!(store.inserted().is_empty());
    }

    #[test]
    fn host_derivation_uses_public_suffixes() {
        assert_eq!(
            derive_host("blog.example.com").unwrap(),
            NewEntry::Host {
                name: "blog.example.com".into(),
                registrable: "example.com".into(),
                suffix: "com".into(),
            }
        );
        assert_eq!(
            derive_host("10.0.0.1").unwrap(),
            NewEntry::Host {
                name: "10.0.0.1".into(),
                registrable: "10.0.0.1".into(),
                suffix: String::new(),
            }
        );
    }
}
