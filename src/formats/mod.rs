//! File format parsers and readers

pub mod delimited;
pub mod reader;

pub use delimited::reader::ChunkedCsvReader;
pub use reader::{Chunk, DelimitedConfig, Record};
