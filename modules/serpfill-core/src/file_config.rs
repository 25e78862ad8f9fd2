use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::codes::CodeTables;
use crate::config::{IngestConfig, InsertErrorPolicy};
use crate::row::Column;

/// TOML-backed configuration loaded from disk.
/// The database URL stays in the environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub ingest: IngestOverrides,
    #[serde(default)]
    pub codes: CodesConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub table: Option<String>,
    pub columns: Option<Vec<Column>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestOverrides {
    pub separator: Option<String>,
    pub stats_every: Option<u64>,
    pub chunk_size: Option<usize>,
    pub flush_bytes: Option<usize>,
    pub on_insert_error: Option<InsertErrorPolicy>,
    pub insert_missing_persons: Option<bool>,
}

/// Replacement code tables. When `systems` is empty the built-in tables apply.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodesConfig {
    #[serde(default)]
    pub systems: BTreeMap<String, SystemConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    pub id: i32,
    pub query_types: BTreeMap<String, i32>,
}

impl FileConfig {
    /// Overlay every value present in the file onto `config`.
    pub fn apply_to(&self, config: &mut IngestConfig) {
        if let Some(table) = &self.target.table {
            config.table = table.clone();
        }
        if let Some(columns) = &self.target.columns {
            config.columns = columns.clone();
        }

        let o = &self.ingest;
        if let Some(separator) = &o.separator {
            config.separator = separator.clone();
        }
        if let Some(n) = o.stats_every {
            config.stats_every = n;
        }
        if let Some(n) = o.chunk_size {
            config.chunk_size = n;
        }
        if let Some(n) = o.flush_bytes {
            config.flush_bytes = n;
        }
        if let Some(policy) = o.on_insert_error {
            config.on_insert_error = policy;
        }
        if let Some(flag) = o.insert_missing_persons {
            config.insert_missing_persons = flag;
        }
    }

    pub fn code_tables(&self) -> CodeTables {
        if self.codes.systems.is_empty() {
            return CodeTables::builtin();
        }
        self.codes
            .systems
            .iter()
            .fold(CodeTables::new(), |tables, (tag, system)| {
                tables.with_system(
                    tag.as_str(),
                    system.id,
                    system.query_types.iter().map(|(k, v)| (k.as_str(), *v)),
                )
            })
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<FileConfig> {
    Ok(toml::from_str(content)?)
}
