use std::io::Read;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::error::{IngestError, Result};
use crate::formats::reader::{Chunk, DelimitedConfig, Record};

const PREALLOCATED_RECORDS: usize = 8192;

/// Lazy, forward-only reader that yields a delimited source as chunks of at
/// most `chunk_size` records.
///
/// Only the chunk being handed out is resident. The header row is read
/// eagerly on construction and shared by every chunk.
pub struct ChunkedCsvReader<R: Read> {
    reader: csv::Reader<R>,
    header: Arc<[String]>,
    chunk_size: NonZeroUsize,
    next_chunk: u64,
    next_row: u64,
    finished: bool,
}

impl<R: Read> ChunkedCsvReader<R> {
    pub fn new(source: R, config: &DelimitedConfig, chunk_size: NonZeroUsize) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(config.delimiter)
            .quote(config.quote)
            .has_headers(true)
            .from_reader(source);

        let header: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        if header.is_empty() {
            return Err(IngestError::data_format("source has no header row"));
        }

        Ok(Self {
            reader,
            header: Arc::from(header),
            chunk_size,
            next_chunk: 0,
            next_row: 0,
            finished: false,
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    fn read_chunk(&mut self) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(self.chunk_size.get().min(PREALLOCATED_RECORDS));
        let mut raw = csv::StringRecord::new();

        while records.len() < self.chunk_size.get() {
            if !self.reader.read_record(&mut raw)? {
                self.finished = true;
                break;
            }
            let line = raw.position().map(|p| p.line()).unwrap_or_default();
            records.push(Record {
                fields: raw.iter().map(|s| s.to_string()).collect(),
                line,
            });
        }

        Ok(records)
    }
}

impl<R: Read> Iterator for ChunkedCsvReader<R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished && self.next_chunk > 0 {
            return None;
        }

        let records = match self.read_chunk() {
            Ok(records) => records,
            Err(e) => {
                self.finished = true;
                // Keep the iterator fused after a parse failure
                self.next_chunk = self.next_chunk.max(1);
                return Some(Err(e));
            }
        };

        // An empty dataset still yields one (empty) chunk so the table can be
        // created. Afterwards, an exhausted source ends the sequence.
        if records.is_empty() && self.next_chunk > 0 {
            return None;
        }

        let chunk = Chunk {
            index: self.next_chunk,
            first_row: self.next_row,
            header: Arc::clone(&self.header),
            records,
        };
        self.next_chunk += 1;
        self.next_row += chunk.len() as u64;

        Some(Ok(chunk))
    }
}
