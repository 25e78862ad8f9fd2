//! Typed errors for the ingestion pipeline.
//!
//! Each concern gets its own enum. Callers that must choose between
//! skipping and aborting use the `is_fatal()` classification instead of
//! matching on variants.

use std::io;

use thiserror::Error;

/// Failures reported by a backing-store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Raised by stores that enforce constraints without SQL (in-memory doubles).
    #[error("store rejected operation: {0}")]
    Rejected(String),
}

/// The initial full-table scan of a dimension failed.
#[derive(Debug, Error)]
#[error("loading {dimension} failed: {source}")]
pub struct LoadError {
    pub dimension: &'static str,
    #[source]
    pub source: StoreError,
}

/// A name could not be turned into an identifier.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("empty {dimension} name")]
    EmptyName { dimension: &'static str },

    #[error("cannot derive {dimension} attributes for '{name}': {reason}")]
    Derive {
        dimension: &'static str,
        name: String,
        reason: String,
    },

    #[error("inserting {dimension} '{name}' failed: {source}")]
    Insert {
        dimension: &'static str,
        name: String,
        #[source]
        source: StoreError,
    },
}

/// A raw input line that cannot be split into a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("expected at least {expected} fields, found {found}")]
    TooFewFields { expected: usize, found: usize },

    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// A system or type tag missing from the code tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("unknown system tag '{0}'")]
    UnknownSystem(String),

    #[error("unknown type tag '{tag}' for system '{system}'")]
    UnknownQueryType { system: String, tag: String },
}

/// Failures of the bulk-load session state machine.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("bulk-load session for {table} is not open")]
    NotOpen { table: String },

    #[error("bulk-load session for {table} is already open")]
    AlreadyOpen { table: String },

    #[error("could not open bulk-copy transaction on {table}: {source}")]
    Transaction {
        table: String,
        #[source]
        source: StoreError,
    },

    /// Per-row rejection. The session stays open.
    #[error("row rejected: {0}")]
    Insert(String),

    #[error("streaming rows into {table} failed: {source}")]
    Copy {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("commit on {table} failed: {source}")]
    Commit {
        table: String,
        #[source]
        source: StoreError,
    },
}

impl SessionError {
    /// Everything except a per-row rejection ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Insert(_))
    }
}

/// Invalid ingestion settings, detected before any file is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{0}' listed twice")]
    DuplicateColumn(String),

    #[error("at least one target column is required")]
    NoColumns,

    #[error("'{0}' is not a valid SQL identifier")]
    InvalidIdentifier(String),

    #[error("field separator must not be empty")]
    EmptySeparator,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("unknown insert-error policy '{0}' (expected 'skip' or 'abort')")]
    UnknownPolicy(String),

    #[error("host ids are configured but no hosts cache was provided")]
    MissingHostCache,
}

/// Errors surfaced by the ingestion controller to its caller.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("row rejected and insert-error policy is abort: {0}")]
    RowRejected(String),

    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("reading {path} failed: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl IngestError {
    /// Open and read failures only cost the current file.
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::Session(e) => e.is_fatal(),
            IngestError::RowRejected(_) => true,
            IngestError::Open { .. } | IngestError::Read { .. } => false,
        }
    }
}
