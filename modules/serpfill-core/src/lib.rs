pub mod cache;
pub mod codes;
pub mod config;
pub mod error;
pub mod file_config;
pub mod ingest;
pub mod progress;
pub mod record;
pub mod row;
pub mod session;
pub mod source;
pub mod stats;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cache::{Dimension, IdentifierCache, LoadReport};
pub use codes::CodeTables;
pub use config::{AppConfig, IngestConfig, InsertErrorPolicy};
pub use error::{
    CodeError, ConfigError, IngestError, LoadError, RecordError, ResolutionError, SessionError,
    StoreError,
};
pub use ingest::{Ingestor, LineOutcome, SkipReason};
pub use row::Column;
pub use session::{BulkLoadSession, CopyTarget};
pub use stats::IngestStats;
