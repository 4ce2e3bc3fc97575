use anyhow::{Result, anyhow};
use std::path::PathBuf;
use url::Url;

use crate::config::TAXI_URL_PREFIX;

/// Represents a parsed source URI
#[derive(Debug, Clone, PartialEq)]
pub enum SourceUri {
    Local(PathBuf),
    Http(Url),
}

impl SourceUri {
    /// Parse a URI string into a SourceUri
    pub fn parse(uri: &str) -> Result<Self> {
        if uri.trim().is_empty() {
            return Err(anyhow!("Source URI is empty"));
        }

        // Try parsing as URL first
        if let Ok(url) = Url::parse(uri) {
            match url.scheme() {
                "http" | "https" => {
                    if url.host_str().is_none() {
                        return Err(anyhow!("URL missing host: {}", uri));
                    }
                    Ok(SourceUri::Http(url))
                }
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|_| anyhow!("Invalid file:// URI: {}", uri))?;
                    Ok(SourceUri::Local(path))
                }
                // Windows drive letters parse as a one-letter scheme
                scheme if scheme.len() == 1 => Ok(SourceUri::Local(PathBuf::from(uri))),
                scheme => Err(anyhow!("Unsupported URI scheme: {}", scheme)),
            }
        } else {
            // Treat as local file path
            Ok(SourceUri::Local(PathBuf::from(uri)))
        }
    }
}

impl std::fmt::Display for SourceUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceUri::Local(path) => write!(f, "{}", path.display()),
            SourceUri::Http(url) => write!(f, "{}", url),
        }
    }
}

/// Monthly yellow taxi trip file: `<prefix>/yellow_tripdata_YYYY-MM.csv.gz`
pub fn taxi_source_url(year: u16, month: u8) -> String {
    format!(
        "{}/yellow_tripdata_{:04}-{:02}.csv.gz",
        TAXI_URL_PREFIX, year, month
    )
}
