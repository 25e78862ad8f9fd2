//! The per-line ingestion loop.
//!
//! Each line is parsed, its actor looked up, its URL validated, its host
//! resolved and its codes mapped, in that order, before the row is appended
//! to the open bulk-copy chunk. Per-record failures only bump a counter.
//! A host resolved for a record that is later dropped stays in the cache.

use std::io::BufRead;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};
use url::Url;

use crate::cache::IdentifierCache;
use crate::codes::CodeTables;
use crate::config::{IngestConfig, InsertErrorPolicy, ResolutionSteps};
use crate::error::{ConfigError, IngestError, SessionError};
use crate::progress;
use crate::record::{decode_line, parse_actor_key, parse_line};
use crate::row::ResolvedRow;
use crate::session::{BulkLoadSession, CopyTarget};
use crate::source::{input_files, open_input, Decoders};
use crate::stats::IngestStats;
use crate::store::BulkBackend;

/// Why a line produced no row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Malformed,
    UnknownActor,
    BadUrl,
    EmptyHost,
    HostFailed,
    UnknownCode,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Appended,
    Skipped(SkipReason),
}

pub struct Ingestor {
    config: IngestConfig,
    steps: ResolutionSteps,
    target: CopyTarget,
    codes: CodeTables,
    persons: IdentifierCache,
    hosts: Option<IdentifierCache>,
    session: BulkLoadSession,
    decoders: Decoders,
    stats: IngestStats,
    started: Instant,
    current_file: String,
}

impl Ingestor {
    /// Caches are expected to be loaded already. `hosts` is required when
    /// the column set includes the host id.
    pub fn new(
        config: IngestConfig,
        codes: CodeTables,
        persons: IdentifierCache,
        hosts: Option<IdentifierCache>,
        backend: Box<dyn BulkBackend>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let steps = config.steps();
        if steps.resolve_host && hosts.is_none() {
            return Err(ConfigError::MissingHostCache);
        }

        Ok(Self {
            steps,
            target: config.copy_target(),
            session: BulkLoadSession::new(backend, config.flush_bytes),
            config,
            codes,
            persons,
            hosts,
            decoders: Decoders::default(),
            stats: IngestStats::default(),
            started: Instant::now(),
            current_file: String::new(),
        })
    }

    /// Replace the extension → decoder registry used by `ingest_file`.
    pub fn with_decoders(mut self, decoders: Decoders) -> Self {
        self.decoders = decoders;
        self
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn session(&self) -> &BulkLoadSession {
        &self.session
    }

    pub fn persons(&self) -> &IdentifierCache {
        &self.persons
    }

    pub fn hosts(&self) -> Option<&IdentifierCache> {
        self.hosts.as_ref()
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest a file, or every visible file directly inside a directory.
    ///
    /// In directory mode a file that cannot be opened or read is logged and
    /// skipped. Anything fatal stops the walk.
    pub async fn ingest_path(&mut self, path: &Path) -> Result<&IngestStats, IngestError> {
        let files = input_files(path).map_err(|source| IngestError::Open {
            path: path.display().to_string(),
            source,
        })?;

        if !path.is_dir() {
            self.ingest_file(path).await?;
            return Ok(&self.stats);
        }

        info!(dir = %path.display(), files = files.len(), "Ingesting directory");
        for file in &files {
            match self.ingest_file(file).await {
                Ok(()) => {}
                Err(e) if !e.is_fatal() => {
                    warn!(file = %file.display(), error = %e, "Skipping file");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(&self.stats)
    }

    pub async fn ingest_file(&mut self, path: &Path) -> Result<(), IngestError> {
        self.current_file = path.display().to_string();
        let reader = open_input(path, &self.decoders).map_err(|source| IngestError::Open {
            path: self.current_file.clone(),
            source,
        })?;
        self.stats.files += 1;
        info!(file = self.current_file.as_str(), ordinal = self.stats.files, "Ingesting file");
        self.ingest_reader(reader).await
    }

    /// Run every line of `reader` through one fresh session. Rows read
    /// before a read failure are committed before the failure is returned.
    pub async fn ingest_reader<R: BufRead>(&mut self, mut reader: R) -> Result<(), IngestError> {
        let before = self.stats.clone();
        self.session.open(&self.target).await?;

        let mut line = Vec::with_capacity(1024);
        let mut read_error = None;
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if let Err(e) = self.process_line(&line).await {
                        self.session.abort();
                        return Err(e);
                    }
                }
                Err(e) => {
                    read_error = Some(e);
                    break;
                }
            }
        }

        self.session.commit().await?;
        self.sync_commit_counters();
        self.report_progress();

        let delta = self.stats.since(&before);
        info!(
            file = self.current_file.as_str(),
            lines = delta.lines,
            inserted = delta.inserted,
            skipped = delta.skipped(),
            "File complete"
        );

        match read_error {
            Some(source) => Err(IngestError::Read {
                path: self.current_file.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    /// Process one raw line against the open session.
    pub async fn process_line(&mut self, raw: &[u8]) -> Result<LineOutcome, IngestError> {
        self.stats.lines += 1;
        if self.stats.lines % self.config.stats_every == 0 {
            self.report_progress();
        }

        let record = match decode_line(raw).and_then(|line| parse_line(line, &self.config.separator)) {
            Ok(record) => record,
            Err(e) => {
                debug!(line = self.stats.lines, error = %e, "Malformed line");
                self.stats.parse_errors += 1;
                return Ok(LineOutcome::Skipped(SkipReason::Malformed));
            }
        };
        if record.over_length {
            self.stats.over_length += 1;
        }

        let key = parse_actor_key(record.key);
        let person_id = if self.config.insert_missing_persons {
            self.persons.resolve(&key.name).await.ok()
        } else {
            self.persons.lookup(&key.name)
        };
        let Some(person_id) = person_id else {
            self.stats.bad_lookups += 1;
            return Ok(LineOutcome::Skipped(SkipReason::UnknownActor));
        };

        let Ok(url) = Url::parse(record.url) else {
            self.stats.bad_urls += 1;
            return Ok(LineOutcome::Skipped(SkipReason::BadUrl));
        };
        let Some(host) = url.host_str().filter(|h| !h.is_empty()) else {
            self.stats.empty_hosts += 1;
            return Ok(LineOutcome::Skipped(SkipReason::EmptyHost));
        };

        let host_id = match self.hosts.as_mut().filter(|_| self.steps.resolve_host) {
            Some(hosts) => match hosts.resolve(host).await {
                Ok(id) => Some(id),
                Err(e) => {
                    debug!(host, error = %e, "Host resolution failed");
                    self.stats.host_errors += 1;
                    return Ok(LineOutcome::Skipped(SkipReason::HostFailed));
                }
            },
            None => None,
        };

        let Ok((system, query_type)) = self.codes.resolve(record.system, &key.type_tag) else {
            self.stats.unknown_codes += 1;
            return Ok(LineOutcome::Skipped(SkipReason::UnknownCode));
        };

        let row = ResolvedRow {
            person_id,
            query_type,
            system,
            url: record.url,
            title: record.title.filter(|_| self.steps.capture_title),
            snippet: record.snippet.filter(|_| self.steps.capture_snippet),
            host_id,
        };

        match self.session.append(&row.values(&self.config.columns)).await {
            Ok(()) => {}
            Err(SessionError::Insert(reason)) => {
                self.stats.exec_errors += 1;
                if self.config.on_insert_error == InsertErrorPolicy::Abort {
                    return Err(IngestError::RowRejected(reason));
                }
                warn!(line = self.stats.lines, reason = reason.as_str(), "Row rejected");
                return Ok(LineOutcome::Skipped(SkipReason::Rejected));
            }
            Err(e) => return Err(e.into()),
        }
        self.stats.inserted += 1;

        if self.session.chunk_rows() >= self.config.chunk_size {
            self.session.reopen().await?;
            self.sync_commit_counters();
        }
        Ok(LineOutcome::Appended)
    }

    pub fn report_progress(&self) {
        progress::report(&self.stats, self.started.elapsed(), &self.current_file);
    }

    fn sync_commit_counters(&mut self) {
        self.stats.committed_rows = self.session.committed_rows();
        self.stats.chunks = self.session.chunks_committed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Dimension;
    use crate::row::Column;
    use crate::testing::{MemoryBulkBackend, MemoryDimensionStore};

    fn persons(rows: &[(i64, &str)]) -> (IdentifierCache, MemoryDimensionStore) {
        let store = MemoryDimensionStore::with_rows(rows.iter().copied());
        (IdentifierCache::new(Dimension::Persons, Box::new(store.clone())), store)
    }

    fn narrow_config() -> IngestConfig {
        IngestConfig::builder()
            .table("new_results")
            .columns(vec![Column::PersonId, Column::QueryType, Column::System, Column::Url])
            .build()
    }

    async fn ingestor(config: IngestConfig, backend: &MemoryBulkBackend) -> Ingestor {
        let (mut persons, _) = persons(&[(7, "Ann Lee")]);
        persons.load().await.unwrap();
        Ingestor::new(config, CodeTables::builtin(), persons, None, Box::new(backend.clone())).unwrap()
    }

    #[tokio::test]
    async fn host_column_requires_a_host_cache() {
        let (persons, _) = persons(&[]);
        let result = Ingestor::new(
            IngestConfig::default(),
            CodeTables::builtin(),
            persons,
            None,
            Box::new(MemoryBulkBackend::new()),
        );
        assert!(matches!(result, Err(ConfigError::MissingHostCache)));
    }

    #[tokio::test]
    async fn each_failure_bumps_its_own_counter() {
        let backend = MemoryBulkBackend::new();
        let mut ingestor = ingestor(narrow_config(), &backend).await;
        ingestor.session.open(&ingestor.target.clone()).await.unwrap();

        let cases: [(&str, LineOutcome); 6] = [
            ("ann lee facebook:::b", LineOutcome::Skipped(SkipReason::Malformed)),
            ("bob ray facebook:::b:::https://x.org", LineOutcome::Skipped(SkipReason::UnknownActor)),
            ("ann lee facebook:::b:::not a url", LineOutcome::Skipped(SkipReason::BadUrl)),
            ("ann lee facebook:::b:::mailto:a@x.org", LineOutcome::Skipped(SkipReason::EmptyHost)),
            ("ann lee facebook:::z:::https://x.org", LineOutcome::Skipped(SkipReason::UnknownCode)),
            ("ANN LEE facebook:::b:::https://x.org", LineOutcome::Appended),
        ];
        for (line, expected) in cases {
            assert_eq!(ingestor.process_line(line.as_bytes()).await.unwrap(), expected, "{line}");
        }

        let stats = ingestor.stats();
        assert_eq!(stats.lines, 6);
        assert_eq!(stats.parse_errors, 1);
        assert_eq!(stats.bad_lookups, 1);
        assert_eq!(stats.bad_urls, 1);
        assert_eq!(stats.empty_hosts, 1);
        assert_eq!(stats.unknown_codes, 1);
        assert_eq!(stats.inserted, 1);
    }

    #[tokio::test]
    async fn missing_persons_are_inserted_when_enabled() {
        let backend = MemoryBulkBackend::new();
        let config = IngestConfig::builder()
            .table("new_results")
            .columns(vec![Column::PersonId, Column::Url])
            .insert_missing_persons(true)
            .build();
        let (mut persons, store) = persons(&[(7, "ann lee")]);
        persons.load().await.unwrap();
        let mut ingestor =
            Ingestor::new(config, CodeTables::builtin(), persons, None, Box::new(backend.clone()))
                .unwrap();

        let input = "new person facebook:::b:::https://x.org\nnew person tiktok:::b:::https://y.org\n";
        ingestor.ingest_reader(input.as_bytes()).await.unwrap();

        assert_eq!(store.inserted().len(), 1);
        assert_eq!(ingestor.stats().inserted, 2);
        assert_eq!(ingestor.persons().inserts(), 1);
    }

    #[tokio::test]
    async fn fatal_error_abandons_the_open_chunk() {
        let backend = MemoryBulkBackend::new();
        let config = IngestConfig::builder()
            .table("new_results")
            .columns(vec![Column::PersonId, Column::Url, Column::Title])
            .on_insert_error(InsertErrorPolicy::Abort)
            .build();
        let mut ingestor = ingestor(config, &backend).await;

        let input = "ann lee facebook:::b:::https://x.org\nann lee facebook:::b:::https://y.org:::nul\0title\n";
        let err = ingestor.ingest_reader(input.as_bytes()).await.unwrap_err();

        assert!(matches!(err, IngestError::RowRejected(_)));
        assert!(!ingestor.session().is_open());
        assert!(backend.committed_rows().is_empty());
    }
}
