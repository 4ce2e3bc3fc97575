use anyhow::{Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};
use url::Url;

use crate::config::DOWNLOAD_BUFFER;

/// A remote source saved to local disk; removed when dropped
#[derive(Debug)]
pub struct DownloadedFile {
    // Held so the directory outlives the reader
    _dir: TempDir,
    path: PathBuf,
    bytes: u64,
}

impl DownloadedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Stream `url` into a fresh temporary directory under its remote file name
///
/// The body is written as it arrives, so memory use does not grow with the
/// size of the file.
pub async fn download_to_temp(client: &Client, url: &Url) -> Result<DownloadedFile> {
    let filename = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.csv")
        .to_string();

    let dir = tempfile::Builder::new()
        .prefix("ny-taxi-ingest-")
        .tempdir()
        .context("Failed to create temporary directory")?;
    let path = dir.path().join(&filename);

    info!("Downloading {}", url);
    let mut resp = client
        .get(url.as_str())
        .send()
        .await
        .with_context(|| format!("Failed to request {}", url))?
        .error_for_status()
        .with_context(|| format!("Download of {} failed", url))?;

    if let Some(len) = resp.content_length() {
        debug!("Content length: {} bytes", len);
    }

    let file = File::create(&path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFFER, file);

    let mut bytes = 0u64;
    while let Some(chunk) = resp
        .chunk()
        .await
        .with_context(|| format!("Failed while reading body of {}", url))?
    {
        writer.write_all(&chunk).await?;
        bytes += chunk.len() as u64;
    }
    writer.flush().await?;

    debug!("Wrote {}", path.display());

    Ok(DownloadedFile {
        _dir: dir,
        path,
        bytes,
    })
}
