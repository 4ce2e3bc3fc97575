use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::config::{DEFAULT_TEXT_COLUMNS, DEFAULT_TIMESTAMP_COLUMNS, NULL_MARKERS};
use crate::error::{IngestError, Result};
use crate::formats::{Chunk, Record};

/// SQL data type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    BigInt,
    DoublePrecision,
    Text,
    Timestamp,
}

impl SqlType {
    /// Returns the Postgres type name
    pub fn to_postgres(&self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::BigInt => "BIGINT",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
            SqlType::Text => "TEXT",
            SqlType::Timestamp => "TIMESTAMP WITHOUT TIME ZONE",
        }
    }

    /// Find the most specific common type that accommodates both types
    pub fn common_type(&self, other: &SqlType) -> SqlType {
        use SqlType::*;
        match (self, other) {
            (a, b) if a == b => *a,
            (BigInt, DoublePrecision) | (DoublePrecision, BigInt) => DoublePrecision,
            _ => Text,
        }
    }
}

/// A typed cell ready to be bound into an INSERT statement
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    BigInt(i64),
    Double(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Coerce a raw field into `sql_type`, or describe why it cannot be
    fn from_field(raw: &str, sql_type: SqlType) -> std::result::Result<Value, String> {
        if is_null(raw) {
            return Ok(Value::Null);
        }
        let trimmed = raw.trim();

        match sql_type {
            SqlType::Text => Ok(Value::Text(raw.to_string())),
            SqlType::Boolean => parse_bool(trimmed)
                .map(Value::Boolean)
                .ok_or_else(|| mismatch(raw, sql_type, "'true' or 'false'")),
            SqlType::BigInt => parse_integral(trimmed)
                .map(Value::BigInt)
                .ok_or_else(|| mismatch(raw, sql_type, "a whole number")),
            SqlType::DoublePrecision => trimmed
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| mismatch(raw, sql_type, "a number")),
            SqlType::Timestamp => parse_timestamp(trimmed)
                .map(Value::Timestamp)
                .ok_or_else(|| {
                    mismatch(raw, sql_type, "a timestamp such as '2021-01-01 00:30:10'")
                }),
        }
    }
}

fn mismatch(raw: &str, sql_type: SqlType, expected: &str) -> String {
    format!(
        "cannot convert '{}' to {} (expected {})",
        raw,
        sql_type.to_postgres(),
        expected
    )
}

/// Whether a raw field reads as NULL
pub fn is_null(raw: &str) -> bool {
    let trimmed = raw.trim();
    NULL_MARKERS.contains(&trimmed)
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Integers, plus floats with no fractional part ("3.0")
fn parse_integral(value: &str) -> Option<i64> {
    if let Ok(v) = value.parse::<i64>() {
        return Some(v);
    }
    let v = value.parse::<f64>().ok()?;
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

/// Parse the timestamp layouts PostgreSQL and the taxi extracts use
///
/// Values carrying a UTC offset are converted to UTC and stored without it.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let offset_formats = [
        "%Y-%m-%d %H:%M:%S%.f%:z", // 2021-01-01 00:30:10+00:00
        "%Y-%m-%dT%H:%M:%S%.f%:z", // 2021-01-01T00:30:10+00:00
        "%Y-%m-%d %H:%M:%S%.f%z",  // 2021-01-01 00:30:10+0000
        "%Y-%m-%dT%H:%M:%S%.f%z",  // 2021-01-01T00:30:10+0000
    ];

    for format in &offset_formats {
        if let Ok(ts) = DateTime::parse_from_str(value, format) {
            return Some(ts.naive_utc());
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.naive_utc());
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S",    // 2021-01-01 00:30:10
        "%Y-%m-%dT%H:%M:%S",    // 2021-01-01T00:30:10 (ISO 8601)
        "%Y-%m-%d %H:%M:%S%.f", // With fractional seconds
        "%Y-%m-%dT%H:%M:%S%.f", // ISO 8601 with fractional seconds
        "%Y-%m-%d %H:%M",       // Without seconds
        "%Y-%m-%dT%H:%M",       // ISO 8601 without seconds
        "%m/%d/%Y %H:%M:%S",    // US format with time
        "%m/%d/%Y %I:%M:%S %p", // US format, 12-hour clock
        "%d-%m-%Y %H:%M:%S",    // European format with time
    ];

    for format in &formats {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts);
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Declared column types, applied identically to every chunk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnOverrides {
    types: BTreeMap<String, SqlType>,
}

impl ColumnOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides for the yellow-taxi extracts
    pub fn taxi_defaults() -> Self {
        let mut overrides = Self::new();
        for name in DEFAULT_TEXT_COLUMNS {
            overrides.set(*name, SqlType::Text);
        }
        for name in DEFAULT_TIMESTAMP_COLUMNS {
            overrides.set(*name, SqlType::Timestamp);
        }
        overrides
    }

    pub fn set(&mut self, column: impl Into<String>, sql_type: SqlType) -> &mut Self {
        self.types.insert(column.into(), sql_type);
        self
    }

    pub fn get(&self, column: &str) -> Option<SqlType> {
        self.types.get(column).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SqlType)> {
        self.types.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// A column in a schema
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
}

/// The table layout: an optional row-position column followed by the data columns
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub index_label: Option<String>,
    pub columns: Vec<Column>,
}

impl Schema {
    /// Column names in table order, index column first
    pub fn column_names(&self) -> Vec<&str> {
        self.index_label
            .iter()
            .map(|s| s.as_str())
            .chain(self.columns.iter().map(|c| c.name.as_str()))
            .collect()
    }

    /// Column types in table order, index column first
    pub fn column_types(&self) -> Vec<SqlType> {
        self.index_label
            .iter()
            .map(|_| SqlType::BigInt)
            .chain(self.columns.iter().map(|c| c.sql_type))
            .collect()
    }

    /// Number of values in an encoded row
    pub fn width(&self) -> usize {
        self.columns.len() + usize::from(self.index_label.is_some())
    }

    /// Coerce one record into typed values in table order
    pub fn encode_record(&self, record: &Record, row: u64) -> Result<Vec<Value>> {
        if record.fields.len() != self.columns.len() {
            return Err(IngestError::data_format_at(
                record.line,
                format!(
                    "expected {} fields, found {}",
                    self.columns.len(),
                    record.fields.len()
                ),
            ));
        }

        let mut values = Vec::with_capacity(self.width());
        if self.index_label.is_some() {
            values.push(Value::BigInt(row as i64));
        }

        for (field, column) in record.fields.iter().zip(&self.columns) {
            let value = Value::from_field(field, column.sql_type).map_err(|e| {
                IngestError::data_format_at(record.line, format!("column '{}': {}", column.name, e))
            })?;
            values.push(value);
        }

        Ok(values)
    }

    /// Coerce every record of a chunk
    pub fn encode_chunk(&self, chunk: &Chunk) -> Result<Vec<Vec<Value>>> {
        chunk
            .indexed_records()
            .map(|(row, record)| self.encode_record(record, row))
            .collect()
    }
}

/// Schema inferrer for analyzing the first chunk and generating DDL
#[derive(Debug, Clone)]
pub struct SchemaInferrer {
    pub overrides: ColumnOverrides,
    pub index_label: Option<String>,
}

impl SchemaInferrer {
    pub fn new(overrides: ColumnOverrides, index_label: Option<String>) -> Self {
        Self {
            overrides,
            index_label,
        }
    }

    /// Infer the type of a single value
    fn infer_value_type(value: &str) -> Option<SqlType> {
        if is_null(value) {
            return None;
        }
        let trimmed = value.trim();

        if parse_bool(trimmed).is_some() {
            return Some(SqlType::Boolean);
        }

        if trimmed.parse::<i64>().is_ok() {
            return Some(SqlType::BigInt);
        }

        if trimmed.parse::<f64>().is_ok() {
            return Some(SqlType::DoublePrecision);
        }

        Some(SqlType::Text)
    }

    /// Infer column type from multiple values
    fn infer_column_type<'a>(values: impl Iterator<Item = &'a str>) -> SqlType {
        values
            .filter_map(Self::infer_value_type)
            .reduce(|current, next| current.common_type(&next))
            .unwrap_or(SqlType::Text)
    }

    /// Infer the table schema from the first chunk
    ///
    /// Overridden columns take their declared type; everything else is
    /// inferred from the chunk's values.
    pub fn infer_from_chunk(&self, chunk: &Chunk) -> Result<Schema> {
        let mut seen = HashSet::new();
        for name in chunk.header.iter() {
            if !seen.insert(name.as_str()) {
                return Err(IngestError::data_format(format!(
                    "duplicate column '{}' in header",
                    name
                )));
            }
        }

        for (name, _) in self.overrides.iter() {
            if !seen.contains(name) {
                return Err(IngestError::data_format(format!(
                    "declared column '{}' not found in header",
                    name
                )));
            }
        }

        if let Some(label) = &self.index_label
            && seen.contains(label.as_str())
        {
            return Err(IngestError::data_format(format!(
                "index label '{}' collides with a source column",
                label
            )));
        }

        let columns = chunk
            .header
            .iter()
            .enumerate()
            .map(|(col_idx, name)| {
                let sql_type = self.overrides.get(name).unwrap_or_else(|| {
                    Self::infer_column_type(
                        chunk
                            .records
                            .iter()
                            .filter_map(|r| r.fields.get(col_idx).map(|s| s.as_str())),
                    )
                });
                Column {
                    name: name.clone(),
                    sql_type,
                }
            })
            .collect();

        Ok(Schema {
            index_label: self.index_label.clone(),
            columns,
        })
    }

    /// Generate the statements that replace `table_name` with an empty table
    pub fn generate_ddl(table_name: &str, schema: &Schema) -> Vec<String> {
        let table = quote_ident(table_name);
        let mut statements = vec![format!("DROP TABLE IF EXISTS {}", table)];

        let column_defs: Vec<String> = schema
            .column_names()
            .into_iter()
            .zip(schema.column_types())
            .map(|(name, sql_type)| format!("  {} {}", quote_ident(name), sql_type.to_postgres()))
            .collect();

        statements.push(format!(
            "CREATE TABLE {} (\n{}\n)",
            table,
            column_defs.join(",\n")
        ));

        if let Some(label) = &schema.index_label {
            statements.push(format!(
                "CREATE INDEX {} ON {} ({})",
                quote_ident(&format!("ix_{}_{}", table_name, label)),
                table,
                quote_ident(label)
            ));
        }

        statements
    }
}

/// Double-quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
