//! Chunked loader: creates the destination table from the first chunk and
//! appends every chunk, in source order, to it.
//!
//! Reading and writing strictly alternate. The loader pulls one chunk from
//! the source, coerces it against the schema locked from the first chunk,
//! appends it, drops it, and only then pulls the next one.

use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::db::{Schema, SchemaInferrer, TableSink, Value};
use crate::error::{IngestError, Result};
use crate::formats::Chunk;
use crate::telemetry::TelemetryEvent;

/// Progress of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    NotStarted,
    TableCreating,
    Inserting,
    Done,
    Failed,
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub table: String,
    pub schema: Schema,
    /// Chunks pulled from the source, including an empty first chunk
    pub chunks: usize,
    pub rows: u64,
}

pub struct ChunkedLoader<'a, S: TableSink> {
    sink: &'a mut S,
    inferrer: SchemaInferrer,
    telemetry_tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
    state: LoadState,
}

impl<'a, S: TableSink> ChunkedLoader<'a, S> {
    pub fn new(sink: &'a mut S, inferrer: SchemaInferrer) -> Self {
        Self {
            sink,
            inferrer,
            telemetry_tx: None,
            state: LoadState::NotStarted,
        }
    }

    pub fn with_telemetry(mut self, telemetry_tx: mpsc::UnboundedSender<TelemetryEvent>) -> Self {
        self.telemetry_tx = Some(telemetry_tx);
        self
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Ingest every chunk into `table`, replacing any table of that name
    ///
    /// The first error aborts the run and is returned as-is; chunks appended
    /// before it stay in the table.
    pub async fn ingest<I>(&mut self, chunks: I, table: &str) -> Result<IngestSummary>
    where
        I: IntoIterator<Item = Result<Chunk>>,
    {
        let result = self.run(chunks.into_iter(), table).await;
        if result.is_err() {
            self.state = LoadState::Failed;
        }
        result
    }

    async fn run<I>(&mut self, mut chunks: I, table: &str) -> Result<IngestSummary>
    where
        I: Iterator<Item = Result<Chunk>>,
    {
        self.state = LoadState::TableCreating;

        let first = chunks
            .next()
            .ok_or_else(|| IngestError::data_format("source yielded no chunks"))??;

        let schema = self.inferrer.infer_from_chunk(&first)?;

        // Coerced before the table is replaced, so bad data leaves an existing table intact
        let first_started = Instant::now();
        let first_rows = Self::encode_chunk(&schema, first)?;

        self.sink.replace_table(table, &schema).await?;
        info!("Table {} created", table);
        self.emit(TelemetryEvent::TableCreated {
            table: table.to_string(),
            columns: schema.width(),
        });

        self.state = LoadState::Inserting;
        let mut total_rows = self
            .write_rows(table, &schema, first_rows, first_started)
            .await?;
        let mut total_chunks = 1;
        info!("Inserted first chunk: {}", total_rows);

        for chunk in chunks {
            let rows = self.append_chunk(table, &schema, chunk?).await?;
            total_rows += rows;
            total_chunks += 1;
            info!("Inserted chunk: {}", rows);
        }

        info!("Done ingesting to {}", table);
        self.emit(TelemetryEvent::Completed {
            table: table.to_string(),
        });
        self.state = LoadState::Done;

        Ok(IngestSummary {
            table: table.to_string(),
            schema,
            chunks: total_chunks,
            rows: total_rows,
        })
    }

    /// Coerce and append one chunk
    async fn append_chunk(&mut self, table: &str, schema: &Schema, chunk: Chunk) -> Result<u64> {
        let started = Instant::now();
        let rows = Self::encode_chunk(schema, chunk)?;
        self.write_rows(table, schema, rows, started).await
    }

    /// Coerce a chunk against the locked schema; the raw records are dropped
    fn encode_chunk(schema: &Schema, chunk: Chunk) -> Result<Vec<Vec<Value>>> {
        debug!(chunk = chunk.index, rows = chunk.len(), "encoding chunk");
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        schema.encode_chunk(&chunk)
    }

    /// Append encoded rows; empty chunks never reach the sink
    async fn write_rows(
        &mut self,
        table: &str,
        schema: &Schema,
        rows: Vec<Vec<Value>>,
        started: Instant,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let written = self.sink.append_rows(table, schema, &rows).await?;
        self.emit(TelemetryEvent::ChunkInserted {
            rows: written,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        Ok(written)
    }

    fn emit(&self, event: TelemetryEvent) {
        if let Some(tx) = &self.telemetry_tx {
            let _ = tx.send(event);
        }
    }
}
