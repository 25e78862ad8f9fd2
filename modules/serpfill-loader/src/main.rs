use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use serpfill_core::file_config::load_config;
use serpfill_core::row::parse_columns;
use serpfill_core::store::postgres::{connect, PgBulkBackend, PgDimensionStore};
use serpfill_core::{
    AppConfig, CodeTables, Dimension, IdentifierCache, IngestConfig, Ingestor, InsertErrorPolicy,
};

#[derive(Parser)]
#[command(name = "serpfill", about = "Bulk-load scraped search results into Postgres")]
struct Cli {
    /// File or directory of result files (.gz, .bz2, .zst or plain text)
    path: PathBuf,

    /// Postgres URL [default: DATABASE_URL from the environment or .env]
    #[arg(long)]
    database_url: Option<String>,

    /// Log progress every N lines [default: 10000]
    #[arg(long)]
    stats_every: Option<u64>,

    /// Rows per committed transaction [default: 1000]
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Field separator [default: :::]
    #[arg(long)]
    separator: Option<String>,

    /// Results table [default: new_results_full]
    #[arg(long)]
    table: Option<String>,

    /// Comma-separated target columns, e.g. personid,qt,se,url [default: all]
    #[arg(long)]
    columns: Option<String>,

    /// Path to config TOML file
    #[arg(long)]
    config: Option<PathBuf>,

    /// What a rejected row does: skip or abort [default: skip]
    #[arg(long)]
    on_insert_error: Option<InsertErrorPolicy>,

    /// Insert actors missing from the persons table
    #[arg(long)]
    insert_missing_persons: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Defaults, then the config file, then flags.
    fn ingest_settings(&self) -> Result<(IngestConfig, CodeTables)> {
        let mut config = IngestConfig::default();
        let mut codes = CodeTables::builtin();

        if let Some(path) = &self.config {
            info!(config = %path.display(), "Loading config");
            let file = load_config(path)?;
            file.apply_to(&mut config);
            codes = file.code_tables();
        }

        if let Some(n) = self.stats_every {
            config.stats_every = n;
        }
        if let Some(n) = self.chunk_size {
            config.chunk_size = n;
        }
        if let Some(separator) = &self.separator {
            config.separator = separator.clone();
        }
        if let Some(table) = &self.table {
            config.table = table.clone();
        }
        if let Some(columns) = &self.columns {
            config.columns = parse_columns(columns).context("Invalid --columns")?;
        }
        if let Some(policy) = self.on_insert_error {
            config.on_insert_error = policy;
        }
        if self.insert_missing_persons {
            config.insert_missing_persons = true;
        }

        config.validate().context("Invalid ingest settings")?;
        Ok((config, codes))
    }
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("serpfill=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    info!("serpfill starting...");

    let (config, codes) = cli.ingest_settings()?;
    let app = AppConfig::with_override(cli.database_url.clone())?;
    app.log_redacted();

    let pool = connect(&app.database_url)
        .await
        .context("Failed to connect to database")?;

    let mut persons = IdentifierCache::new(
        Dimension::Persons,
        Box::new(PgDimensionStore::new(pool.clone(), Dimension::Persons)),
    );
    persons.load().await?;

    let hosts = if config.steps().resolve_host {
        let mut hosts = IdentifierCache::new(
            Dimension::Hosts,
            Box::new(PgDimensionStore::new(pool.clone(), Dimension::Hosts)),
        );
        hosts.load().await?;
        Some(hosts)
    } else {
        None
    };

    info!(
        table = config.table.as_str(),
        chunk_size = config.chunk_size,
        policy = %config.on_insert_error,
        "Starting ingest"
    );
    let mut ingestor = Ingestor::new(
        config,
        codes,
        persons,
        hosts,
        Box::new(PgBulkBackend::new(pool.clone())),
    )?;

    let stats = ingestor
        .ingest_path(&cli.path)
        .await
        .with_context(|| format!("Ingest of {} failed", cli.path.display()))?
        .clone();

    info!(
        persons_inserted = ingestor.persons().inserts(),
        hosts_inserted = ingestor.hosts().map_or(0, |h| h.inserts()),
        "Ingest run complete. {stats}"
    );

    pool.close().await;
    Ok(())
}
