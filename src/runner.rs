//! High-level runner API for the taxi data ingester.
//!
//! This module provides a simplified public interface that encapsulates
//! resolving and downloading the source, connecting to PostgreSQL, and
//! driving the chunked loader with a progress reporter.
//!
//! This is the primary API for external users and for the CLI.

use anyhow::{Context, Result, bail};
use reqwest::Client;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_INDEX_LABEL, DEFAULT_MONTH, DEFAULT_PG_DATABASE, DEFAULT_PG_HOST,
    DEFAULT_PG_PASSWORD, DEFAULT_PG_PORT, DEFAULT_PG_USER, DEFAULT_TARGET_TABLE, DEFAULT_YEAR,
};
use crate::db::pool::PoolArgsBuilder;
use crate::db::{self as db_pool, Pool, SchemaInferrer};
use crate::formats::{ChunkedCsvReader, DelimitedConfig};
use crate::io::{SourceUri, download_to_temp, open_source, taxi_source_url};
use crate::loader::ChunkedLoader;
use crate::telemetry::{TelemetryEvent, spawn_progress_reporter};

pub use crate::db::{ColumnOverrides, SqlType};
pub use crate::error::IngestError;

/// Arguments for running an ingestion
#[derive(Debug, Clone)]
pub struct IngestArgs {
    // Connection configuration
    pub pg_user: String,
    pub pg_pass: String,
    pub pg_host: String,
    pub pg_port: u16,
    pub pg_db: String,

    // Source configuration
    pub year: u16,
    pub month: u8,
    /// Overrides the monthly taxi URL derived from `year` and `month`
    pub source_uri: Option<String>,

    // Destination configuration
    pub target_table: String,
    pub chunk_size: NonZeroUsize,
    pub overrides: ColumnOverrides,
    /// Name of the row index column; `None` writes no index
    pub index_label: Option<String>,

    // Options
    pub quiet: bool,

    // Test-only: inject a pre-created pool (for SQLite testing)
    #[cfg(test)]
    pub test_pool: Option<Pool>,
}

impl Default for IngestArgs {
    fn default() -> Self {
        Self {
            pg_user: DEFAULT_PG_USER.to_string(),
            pg_pass: DEFAULT_PG_PASSWORD.to_string(),
            pg_host: DEFAULT_PG_HOST.to_string(),
            pg_port: DEFAULT_PG_PORT,
            pg_db: DEFAULT_PG_DATABASE.to_string(),
            year: DEFAULT_YEAR,
            month: DEFAULT_MONTH,
            source_uri: None,
            target_table: DEFAULT_TARGET_TABLE.to_string(),
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
            overrides: ColumnOverrides::taxi_defaults(),
            index_label: Some(DEFAULT_INDEX_LABEL.to_string()),
            quiet: false,
            #[cfg(test)]
            test_pool: None,
        }
    }
}

impl IngestArgs {
    /// Source location: the explicit override, else the monthly taxi file
    pub fn resolved_source(&self) -> String {
        match &self.source_uri {
            Some(uri) => uri.clone(),
            None => taxi_source_url(self.year, self.month),
        }
    }

    /// Reject arguments that cannot describe a run
    pub fn validate(&self) -> Result<()> {
        if self.target_table.trim().is_empty() {
            bail!("Target table name must not be empty");
        }
        if self.source_uri.is_none() && !(1..=12).contains(&self.month) {
            bail!("Month must be between 1 and 12, got {}", self.month);
        }
        if let Some(label) = &self.index_label
            && label.trim().is_empty()
        {
            bail!("Index label must not be empty");
        }
        Ok(())
    }
}

/// Result of a completed ingestion
#[derive(Debug)]
pub struct IngestResult {
    pub run_id: String,
    pub source: String,
    pub table: String,
    pub columns: Vec<String>,
    pub chunks: usize,
    pub rows: u64,
    pub duration: Duration,
}

impl IngestResult {
    pub fn rows_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 { self.rows as f64 / secs } else { 0.0 }
    }
}

/// Run an ingestion with the specified arguments
///
/// Downloads the source when it is remote, replaces `target_table` with a
/// table shaped after the first chunk, and appends every chunk in order.
/// A failure aborts the run; chunks appended before it stay in the table.
/// The underlying [`IngestError`] can be recovered with
/// `err.downcast_ref::<IngestError>()`.
///
/// # Example
///
/// ```no_run
/// use ny_taxi_ingest::runner::{IngestArgs, run_ingest};
///
/// # async fn example() -> anyhow::Result<()> {
/// let args = IngestArgs {
///     year: 2021,
///     month: 3,
///     quiet: true,
///     ..Default::default()
/// };
///
/// let result = run_ingest(args).await?;
/// println!("Loaded {} rows in {:?}", result.rows, result.duration);
/// # Ok(())
/// # }
/// ```
pub async fn run_ingest(args: IngestArgs) -> Result<IngestResult> {
    let run_id = Uuid::new_v4().to_string();
    let span = info_span!("ingest", run_id = %run_id);
    run(args, run_id).instrument(span).await
}

async fn run(args: IngestArgs, run_id: String) -> Result<IngestResult> {
    #[cfg_attr(not(test), allow(unused_mut))]
    let mut args = args;
    let start_time = Instant::now();
    args.validate()?;

    let source = args.resolved_source();
    info!("Starting ingestion of {} into {}", source, args.target_table);

    // Create connection pool (or use test pool if provided)
    #[cfg(test)]
    let mut pool = match args.test_pool.take() {
        Some(test_pool) => test_pool,
        None => connect(&args).await?,
    };

    #[cfg(not(test))]
    let mut pool = connect(&args).await?;

    // Resolve the source to a local file; a download lives until the run ends
    let parsed_uri = SourceUri::parse(&source)?;
    let (local_path, _download) = match &parsed_uri {
        SourceUri::Local(path) => (path.clone(), None),
        SourceUri::Http(url) => {
            let downloaded = download_to_temp(&Client::new(), url).await?;
            info!("Downloaded {} bytes", downloaded.bytes());
            (downloaded.path().to_path_buf(), Some(downloaded))
        }
    };

    let chunks = open_chunks(&local_path, args.chunk_size)?;
    let columns = chunks.header().to_vec();
    info!("Source columns: {}", columns.join(", "));

    let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<TelemetryEvent>();
    let prog_jh = spawn_progress_reporter(args.quiet, telemetry_rx);

    let inferrer = SchemaInferrer::new(args.overrides, args.index_label);
    let mut loader = ChunkedLoader::new(&mut pool, inferrer).with_telemetry(telemetry_tx);
    let outcome = loader.ingest(chunks, &args.target_table).await;
    debug!("Loader finished in state {:?}", loader.state());

    // Dropping the loader closes the telemetry channel
    drop(loader);
    if let Some(jh) = prog_jh {
        let _ = jh.await;
    }

    if let Err(err) = &outcome {
        match err.line() {
            Some(line) => warn!("Source line {} could not be loaded", line),
            None if err.is_connectivity() => warn!("Lost the destination mid-run"),
            None => {}
        }
        warn!("Chunks appended before the failure remain in {}", args.target_table);
    }

    let summary = outcome.with_context(|| {
        format!(
            "Ingestion of {} into '{}' failed",
            source, args.target_table
        )
    })?;
    let duration = start_time.elapsed();

    info!(
        "Ingestion complete: {} chunks, {} rows in {:.2}s",
        summary.chunks,
        summary.rows,
        duration.as_secs_f64()
    );

    Ok(IngestResult {
        run_id,
        source,
        table: summary.table,
        columns: summary
            .schema
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        chunks: summary.chunks,
        rows: summary.rows,
        duration,
    })
}

async fn connect(args: &IngestArgs) -> Result<Pool> {
    let pool_args = PoolArgsBuilder::default()
        .host(&args.pg_host)
        .port(args.pg_port)
        .username(&args.pg_user)
        .password(&args.pg_pass)
        .database(&args.pg_db)
        .build()?;
    db_pool::pool::pool(pool_args).await
}

fn open_chunks(
    path: &Path,
    chunk_size: NonZeroUsize,
) -> Result<ChunkedCsvReader<Box<dyn std::io::Read + Send>>> {
    let config = DelimitedConfig::for_path(&path.to_string_lossy());
    let reader = open_source(path)?;
    ChunkedCsvReader::new(reader, &config, chunk_size)
        .with_context(|| format!("Failed to read header of {}", path.display()))
}
