//! Delimited text (CSV, TSV) chunked reader

pub mod reader;
