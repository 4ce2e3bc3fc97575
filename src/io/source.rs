use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::config::{GZIP_MAGIC, READ_BUFFER_SIZE};

/// Open a local source for reading, decompressing gzip transparently
///
/// Compression is detected from the leading bytes rather than the file
/// extension, so a misnamed `.csv` that holds gzip data still decodes.
pub fn open_source(path: &Path) -> Result<Box<dyn Read + Send>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

    if is_gzip(&mut reader).with_context(|| format!("Failed to read {}", path.display()))? {
        let decoder = MultiGzDecoder::new(reader);
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, decoder)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Peek at the buffered bytes without consuming them
fn is_gzip<R: BufRead>(reader: &mut R) -> std::io::Result<bool> {
    let buf = reader.fill_buf()?;
    Ok(buf.starts_with(&GZIP_MAGIC))
}
