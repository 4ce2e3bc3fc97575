use std::sync::Arc;

/// A single record (row) from the file
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub fields: Vec<String>,
    /// 1-based line the record starts on, header included
    pub line: u64,
}

/// A bounded batch of consecutive records, in source order
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 0-based sequence number of this chunk
    pub index: u64,
    /// 0-based position of the first record within the whole dataset
    pub first_row: u64,
    pub header: Arc<[String]>,
    pub records: Vec<Record>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records paired with their dataset-wide row position
    pub fn indexed_records(&self) -> impl Iterator<Item = (u64, &Record)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, record)| (self.first_row + i as u64, record))
    }
}

/// Configuration for delimited file reading (CSV, TSV, etc.)
#[derive(Debug, Clone)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

impl DelimitedConfig {
    pub fn csv() -> Self {
        Self::default()
    }

    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            quote: b'"',
        }
    }

    /// Pick the dialect from a file name, ignoring a trailing `.gz`
    pub fn for_path(path: &str) -> Self {
        let lower = path.to_lowercase();
        let stem = lower.strip_suffix(".gz").unwrap_or(&lower);
        if stem.ends_with(".tsv") || stem.ends_with(".tab") {
            Self::tsv()
        } else {
            Self::csv()
        }
    }
}
