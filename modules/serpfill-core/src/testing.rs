// In-memory stores for tests.
//
// Both doubles are cheap to clone and share their state, so a test can box
// one clone into the pipeline and keep another to assert on afterwards.
// No database, no Docker.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::session::CopyTarget;
use crate::store::{BulkBackend, BulkTransaction, DimensionScan, DimensionStore, NewEntry};

// ---------------------------------------------------------------------------
// MemoryDimensionStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DimensionState {
    rows: Vec<(i64, String)>,
    undecodable: usize,
    fail_scan: bool,
    next_id: i64,
    inserted: Vec<NewEntry>,
}

/// A dimension table with a unique constraint on `name`.
#[derive(Clone, Default)]
pub struct MemoryDimensionStore {
    state: Arc<Mutex<DimensionState>>,
}

impl MemoryDimensionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows<'a>(rows: impl IntoIterator<Item = (i64, &'a str)>) -> Self {
        let store = Self::new();
        for (id, name) in rows {
            store.add_row(id, name);
        }
        store
    }

    /// Pretend the table also holds `count` rows that fail to decode.
    pub fn with_undecodable(self, count: usize) -> Self {
        self.state.lock().unwrap().undecodable = count;
        self
    }

    pub fn failing_scan(self) -> Self {
        self.state.lock().unwrap().fail_scan = true;
        self
    }

    /// Write a row directly, as a concurrent writer would.
    pub fn add_row(&self, id: i64, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.rows.push((id, name.to_string()));
        state.next_id = state.next_id.max(id);
    }

    /// Entries inserted through `DimensionStore::insert`, in order.
    pub fn inserted(&self) -> Vec<NewEntry> {
        self.state.lock().unwrap().inserted.clone()
    }
}

#[async_trait]
impl DimensionStore for MemoryDimensionStore {
    async fn scan(&mut self) -> Result<DimensionScan, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_scan {
            return Err(StoreError::Rejected("relation does not exist".to_string()));
        }
        Ok(DimensionScan {
            rows: state.rows.clone(),
            skipped: state.undecodable,
        })
    }

    async fn insert(&mut self, entry: &NewEntry) -> Result<i64, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.rows.iter().any(|(_, name)| name == entry.name()) {
            return Err(StoreError::Rejected(format!(
                "duplicate key value violates unique constraint: {}",
                entry.name()
            )));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.rows.push((id, entry.name().to_string()));
        state.inserted.push(entry.clone());
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// MemoryBulkBackend
// ---------------------------------------------------------------------------

/// Everything one transaction saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnRecord {
    pub id: i64,
    pub statement: String,
    /// Decoded rows; `None` is SQL NULL.
    pub rows: Vec<Vec<Option<String>>>,
    pub copy_calls: usize,
    pub committed: bool,
}

#[derive(Default)]
struct BulkState {
    txns: Vec<TxnRecord>,
    begin_budget: Option<usize>,
    fail_commit: bool,
    fail_copy: bool,
}

#[derive(Clone, Default)]
pub struct MemoryBulkBackend {
    state: Arc<Mutex<BulkState>>,
}

impl MemoryBulkBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `n` successful `begin` calls, then fail every one after.
    pub fn failing_begin_after(self, n: usize) -> Self {
        self.state.lock().unwrap().begin_budget = Some(n);
        self
    }

    pub fn failing_commit(self) -> Self {
        self.state.lock().unwrap().fail_commit = true;
        self
    }

    pub fn failing_copy(self) -> Self {
        self.state.lock().unwrap().fail_copy = true;
        self
    }

    pub fn transactions(&self) -> Vec<TxnRecord> {
        self.state.lock().unwrap().txns.clone()
    }

    /// Rows of committed transactions, in commit order.
    pub fn committed_rows(&self) -> Vec<Vec<Option<String>>> {
        self.state
            .lock()
            .unwrap()
            .txns
            .iter()
            .filter(|t| t.committed)
            .flat_map(|t| t.rows.clone())
            .collect()
    }
}

#[async_trait]
impl BulkBackend for MemoryBulkBackend {
    async fn begin(&mut self, target: &CopyTarget) -> Result<Box<dyn BulkTransaction>, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(budget) = state.begin_budget.as_mut() {
            if *budget == 0 {
                return Err(StoreError::Rejected("connection refused".to_string()));
            }
            *budget -= 1;
        }

        let id = 1000 + state.txns.len() as i64;
        state.txns.push(TxnRecord {
            id,
            statement: target.copy_statement(),
            ..TxnRecord::default()
        });

        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            index: state.txns.len() - 1,
            id,
            finished: false,
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<BulkState>>,
    index: usize,
    id: i64,
    finished: bool,
}

#[async_trait]
impl BulkTransaction for MemoryTransaction {
    fn id(&self) -> i64 {
        self.id
    }

    async fn copy_rows(&mut self, data: &[u8]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_copy {
            return Err(StoreError::Rejected("COPY aborted".to_string()));
        }
        if self.finished {
            return Err(StoreError::Rejected("transaction already finished".to_string()));
        }

        let text = std::str::from_utf8(data)
            .map_err(|e| StoreError::Rejected(format!("invalid COPY payload: {e}")))?;
        let rows = decode_copy_text(text);
        let written = rows.len() as u64;

        let txn = &mut state.txns[self.index];
        txn.copy_calls += 1;
        txn.rows.extend(rows);
        Ok(written)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commit {
            return Err(StoreError::Rejected("could not serialize access".to_string()));
        }
        if self.finished {
            return Err(StoreError::Rejected("transaction already finished".to_string()));
        }
        self.finished = true;
        state.txns[self.index].committed = true;
        Ok(())
    }
}

/// Parse text COPY format back into rows.
pub fn decode_copy_text(text: &str) -> Vec<Vec<Option<String>>> {
    text.lines()
        .map(|line| {
            line.split('\t')
                .map(|field| (field != "\\N").then(|| unescape(field)))
                .collect()
        })
        .collect()
}

fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

