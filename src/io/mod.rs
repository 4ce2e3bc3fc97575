//! Source resolution: URI parsing, remote download and local decoding

pub mod download;
pub mod source;
pub mod uri;

pub use download::{DownloadedFile, download_to_temp};
pub use source::open_source;
pub use uri::{SourceUri, taxi_source_url};
