//! Configuration constants for the ingester
//!
//! This module centralizes the tunable parameters and the documented
//! command-line defaults used throughout the application.

use std::time::Duration;

// ============================================================================
// Command Defaults
// ============================================================================

pub const DEFAULT_PG_USER: &str = "root";

pub const DEFAULT_PG_PASSWORD: &str = "root";

pub const DEFAULT_PG_HOST: &str = "localhost";

pub const DEFAULT_PG_PORT: u16 = 5432;

pub const DEFAULT_PG_DATABASE: &str = "ny_taxi";

pub const DEFAULT_YEAR: u16 = 2021;

pub const DEFAULT_MONTH: u8 = 1;

pub const DEFAULT_TARGET_TABLE: &str = "yellow_taxi_data";

/// Rows per chunk read from the source and appended in one transaction
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Name of the leading row-position column written with every row
pub const DEFAULT_INDEX_LABEL: &str = "index";

// ============================================================================
// Column Type Overrides (taxi dataset)
// ============================================================================

/// Columns kept as nullable text regardless of their content
pub const DEFAULT_TEXT_COLUMNS: &[&str] = &["store_and_fwd_flag"];

/// Columns parsed from text into timestamps
pub const DEFAULT_TIMESTAMP_COLUMNS: &[&str] = &["tpep_pickup_datetime", "tpep_dropoff_datetime"];

/// Raw field values read as NULL in every column
pub const NULL_MARKERS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "NULL", "null", "None", "<NA>", "#N/A",
];

// ============================================================================
// Source Configuration
// ============================================================================

/// Release host for the monthly yellow-taxi extracts
pub const TAXI_URL_PREFIX: &str =
    "https://github.com/DataTalksClub/nyc-tlc-data/releases/download/yellow";

/// Buffer size for reading decoded source bytes
///
/// Set to 1MB so the CSV parser refills rarely on multi-gigabyte inputs
/// while staying far below one chunk's worth of rows.
pub const READ_BUFFER_SIZE: usize = 1024 * 1024; // 1 MB

/// Write buffer for streaming a remote source to its temporary file
pub const DOWNLOAD_BUFFER: usize = 4 * 1024 * 1024; // 4 MB

/// Leading bytes of every gzip member
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// ============================================================================
// Connection Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for individual INSERT and DDL statements
///
/// A chunk of 100k rows is split into several statements; each of them must
/// finish within this bound or the run aborts with a connectivity error.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(180); // 3 minutes

// ============================================================================
// Insert Configuration
// ============================================================================

/// Upper bound on rows carried by one multi-row INSERT statement
pub const INSERT_BATCH_ROWS: usize = 1000;

/// PostgreSQL accepts at most this many bind parameters per statement
pub const MAX_BIND_PARAMS: usize = 65_535;

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER`
pub const SQLITE_MAX_BIND_PARAMS: usize = 32_766;
