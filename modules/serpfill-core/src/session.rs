//! Chunked bulk-copy transactions.
//!
//! A session is `Closed` or `Open`. While open it owns exactly one
//! transaction with a copy statement bound to the target table. Rows are
//! encoded into a bounded buffer and streamed into the transaction whenever
//! the buffer grows past the flush threshold. `reopen` commits the chunk and
//! starts the next one; any failure there ends the run.

use std::mem;

use tracing::debug;

use crate::error::SessionError;
use crate::row::{encode_row, CopyValue};
use crate::store::{BulkBackend, BulkTransaction};

/// Table and column list of a bulk copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    table: String,
    columns: Vec<String>,
}

impl CopyTarget {
    pub fn new<C: Into<String>>(
        table: impl Into<String>,
        columns: impl IntoIterator<Item = C>,
    ) -> Self {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn copy_statement(&self) -> String {
        format!(
            "COPY {} ({}) FROM STDIN",
            self.table,
            self.columns.join(", ")
        )
    }
}

enum SessionState {
    Closed,
    Open {
        txn: Box<dyn BulkTransaction>,
        target: CopyTarget,
        buffer: Vec<u8>,
        chunk_rows: usize,
    },
}

pub struct BulkLoadSession {
    backend: Box<dyn BulkBackend>,
    flush_bytes: usize,
    state: SessionState,
    last_target: Option<CopyTarget>,
    committed_rows: u64,
    chunks: u64,
}

impl BulkLoadSession {
    pub fn new(backend: Box<dyn BulkBackend>, flush_bytes: usize) -> Self {
        Self {
            backend,
            flush_bytes: flush_bytes.max(1),
            state: SessionState::Closed,
            last_target: None,
            committed_rows: 0,
            chunks: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open { .. })
    }

    /// Id of the open transaction.
    pub fn transaction_id(&self) -> Option<i64> {
        match &self.state {
            SessionState::Open { txn, .. } => Some(txn.id()),
            SessionState::Closed => None,
        }
    }

    /// Rows appended since the current transaction was opened.
    pub fn chunk_rows(&self) -> usize {
        match &self.state {
            SessionState::Open { chunk_rows, .. } => *chunk_rows,
            SessionState::Closed => 0,
        }
    }

    pub fn committed_rows(&self) -> u64 {
        self.committed_rows
    }

    pub fn chunks_committed(&self) -> u64 {
        self.chunks
    }

    /// Begin a transaction bound to `target`. On failure the session stays closed.
    pub async fn open(&mut self, target: &CopyTarget) -> Result<(), SessionError> {
        if self.is_open() {
            return Err(SessionError::AlreadyOpen {
                table: target.table().to_string(),
            });
        }

        let txn = self
            .backend
            .begin(target)
            .await
            .map_err(|source| SessionError::Transaction {
                table: target.table().to_string(),
                source,
            })?;

        debug!(table = target.table(), txn = txn.id(), "Opened bulk-copy transaction");
        self.last_target = Some(target.clone());
        self.state = SessionState::Open {
            txn,
            target: target.clone(),
            buffer: Vec::with_capacity(self.flush_bytes.min(1 << 20)),
            chunk_rows: 0,
        };
        Ok(())
    }

    /// Queue one row. `SessionError::Insert` rejects only this row; any
    /// other error has already closed the session.
    pub async fn append(&mut self, values: &[CopyValue<'_>]) -> Result<(), SessionError> {
        let SessionState::Open {
            txn,
            target,
            buffer,
            chunk_rows,
        } = &mut self.state
        else {
            return Err(SessionError::NotOpen {
                table: table_name(&self.last_target),
            });
        };

        if values.len() != target.columns().len() {
            return Err(SessionError::Insert(format!(
                "{} values for {} columns of {}",
                values.len(),
                target.columns().len(),
                target.table()
            )));
        }
        encode_row(values, buffer).map_err(SessionError::Insert)?;
        *chunk_rows += 1;

        if buffer.len() < self.flush_bytes {
            return Ok(());
        }

        match txn.copy_rows(&buffer[..]).await {
            Ok(written) => {
                debug!(table = target.table(), txn = txn.id(), rows = written, "Streamed rows");
                buffer.clear();
                Ok(())
            }
            Err(source) => {
                let table = target.table().to_string();
                self.state = SessionState::Closed;
                Err(SessionError::Copy { table, source })
            }
        }
    }

    /// Flush queued rows and commit. A no-op when closed; commits an empty
    /// transaction when no rows were appended. Returns rows committed.
    pub async fn commit(&mut self) -> Result<u64, SessionError> {
        let SessionState::Open {
            mut txn,
            target,
            buffer,
            chunk_rows,
        } = mem::replace(&mut self.state, SessionState::Closed)
        else {
            return Ok(0);
        };

        let commit_err = |source| SessionError::Commit {
            table: target.table().to_string(),
            source,
        };

        if !buffer.is_empty() {
            txn.copy_rows(&buffer).await.map_err(commit_err)?;
        }
        txn.commit().await.map_err(commit_err)?;

        let rows = chunk_rows as u64;
        self.committed_rows += rows;
        self.chunks += 1;
        debug!(table = target.table(), txn = txn.id(), rows, "Committed chunk");
        Ok(rows)
    }

    /// Drop the open transaction without committing. The store rolls it back.
    pub fn abort(&mut self) {
        if let SessionState::Open { txn, target, .. } =
            mem::replace(&mut self.state, SessionState::Closed)
        {
            debug!(table = target.table(), txn = txn.id(), "Abandoned bulk-copy transaction");
        }
    }

    /// Commit the current chunk and open the next one on the same target.
    pub async fn reopen(&mut self) -> Result<u64, SessionError> {
        let target = match &self.state {
            SessionState::Open { target, .. } => target.clone(),
            SessionState::Closed => {
                return Err(SessionError::NotOpen {
                    table: table_name(&self.last_target),
                })
            }
        };

        let rows = self.commit().await?;
        self.open(&target).await?;
        Ok(rows)
    }
}

fn table_name(target: &Option<CopyTarget>) -> String {
    target
        .as_ref()
        .map(|t| t.table().to_string())
        .unwrap_or_else(|| "<unbound>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBulkBackend;

    fn target() -> CopyTarget {
        CopyTarget::new("new_results", ["personid", "url"])
    }

    fn row(id: i64) -> [CopyValue<'static>; 2] {
        [CopyValue::Int(id), CopyValue::Text("https://example.com")]
    }

    #[test]
    fn copy_statement_lists_columns() {
        assert_eq!(
            target().copy_statement(),
            "COPY new_results (personid, url) FROM STDIN"
        );
    }

    #[tokio::test]
    async fn append_requires_open_session() {
        let backend = MemoryBulkBackend::new();
        let mut session = BulkLoadSession::new(Box::new(backend.clone()), 1 << 20);

        let err = session.append(&row(1)).await.unwrap_err();
        assert!(matches!(err, SessionError::NotOpen { .. }));
        assert!(err.is_fatal());
        assert!(backend.transactions().is_empty());
    }

    #[tokio::test]
    async fn commit_writes_rows_and_closes() {
        let backend = MemoryBulkBackend::new();
        let mut session = BulkLoadSession::new(Box::new(backend.clone()), 1 << 20);

        session.open(&target()).await.unwrap();
        session.append(&row(1)).await.unwrap();
        session.append(&row(2)).await.unwrap();
        assert_eq!(session.chunk_rows(), 2);
        assert_eq!(session.commit().await.unwrap(), 2);

        assert!(!session.is_open());
        let txns = backend.transactions();
        assert_eq!(txns.len(), 1);
        assert!(txns[0].committed);
        assert_eq!(txns[0].rows[1], vec![Some("2".to_string()), Some("https://example.com".to_string())]);
        assert_eq!(session.committed_rows(), 2);
    }

    #[tokio::test]
    async fn reopen_switches_transactions() {
        let backend = MemoryBulkBackend::new();
        let mut session = BulkLoadSession::new(Box::new(backend.clone()), 1 << 20);

        session.open(&target()).await.unwrap();
        let first = session.transaction_id();
        session.append(&row(1)).await.unwrap();
        session.reopen().await.unwrap();

        assert!(session.is_open());
        assert_ne!(session.transaction_id(), first);
        assert_eq!(session.chunk_rows(), 0);
        assert_eq!(backend.transactions()[0].rows.len(), 1);
    }

    #[tokio::test]
    async fn empty_and_repeated_commits_are_safe() {
        let backend = MemoryBulkBackend::new();
        let mut session = BulkLoadSession::new(Box::new(backend.clone()), 1 << 20);

        session.open(&target()).await.unwrap();
        assert_eq!(session.commit().await.unwrap(), 0);
        assert_eq!(session.commit().await.unwrap(), 0);

        let txns = backend.transactions();
        assert_eq!(txns.len(), 1);
        assert!(txns[0].committed);
        assert_eq!(txns[0].copy_calls, 0);
    }

    #[tokio::test]
    async fn wrong_arity_rejects_only_that_row() {
        let backend = MemoryBulkBackend::new();
        let mut session = BulkLoadSession::new(Box::new(backend.clone()), 1 << 20);

        session.open(&target()).await.unwrap();
        let err = session.append(&[CopyValue::Int(1)]).await.unwrap_err();
        assert!(!err.is_fatal());
        session.append(&row(2)).await.unwrap();
        session.commit().await.unwrap();

        assert_eq!(backend.transactions()[0].rows.len(), 1);
    }

    #[tokio::test]
    async fn buffer_streams_past_flush_threshold() {
        let backend = MemoryBulkBackend::new();
        let mut session = BulkLoadSession::new(Box::new(backend.clone()), 16);

        session.open(&target()).await.unwrap();
        for id in 0..3 {
            session.append(&row(id)).await.unwrap();
        }
        assert_eq!(backend.transactions()[0].copy_calls, 3);
        session.commit().await.unwrap();

        let txns = backend.transactions();
        assert_eq!(txns[0].copy_calls, 3);
        assert_eq!(txns[0].rows.len(), 3);
    }

    #[tokio::test]
    async fn failed_begin_leaves_session_closed() {
        let backend = MemoryBulkBackend::new().failing_begin_after(0);
        let mut session = BulkLoadSession::new(Box::new(backend), 1 << 20);

        let err = session.open(&target()).await.unwrap_err();
        assert!(matches!(err, SessionError::Transaction { .. }));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn failed_commit_is_fatal_and_closes() {
        let backend = MemoryBulkBackend::new().failing_commit();
        let mut session = BulkLoadSession::new(Box::new(backend.clone()), 1 << 20);

        session.open(&target()).await.unwrap();
        session.append(&row(1)).await.unwrap();
        let err = session.commit().await.unwrap_err();

        assert!(matches!(err, SessionError::Commit { .. }));
        assert!(!session.is_open());
        assert!(!backend.transactions()[0].committed);
    }

    #[tokio::test]
    async fn abort_discards_the_open_chunk() {
        let backend = MemoryBulkBackend::new();
        let mut session = BulkLoadSession::new(Box::new(backend.clone()), 1 << 20);

        session.open(&target()).await.unwrap();
        session.append(&row(1)).await.unwrap();
        session.abort();

        assert!(!session.is_open());
        assert!(backend.committed_rows().is_empty());
        session.open(&target()).await.unwrap();
    }

    #[tokio::test]
    async fn failed_stream_is_fatal_and_closes() {
        let backend = MemoryBulkBackend::new().failing_copy();
        let mut session = BulkLoadSession::new(Box::new(backend.clone()), 1);

        session.open(&target()).await.unwrap();
        let err = session.append(&row(1)).await.unwrap_err();

        assert!(matches!(err, SessionError::Copy { .. }));
        assert!(err.is_fatal());
        assert!(!session.is_open());
        assert!(matches!(
            session.append(&row(2)).await,
            Err(SessionError::NotOpen { .. })
        ));
        assert!(!backend.transactions()[0].committed);
    }

    #[tokio::test]
    async fn open_twice_is_rejected() {
        let backend = MemoryBulkBackend::new();
        let mut session = BulkLoadSession::new(Box::new(backend), 1 << 20);
        session.open(&target()).await.unwrap();
        assert!(matches!(
            session.open(&target()).await,
            Err(SessionError::AlreadyOpen { .. })
        ));
    }
}
