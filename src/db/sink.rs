use async_trait::async_trait;

use super::schema::{Schema, Value, quote_ident};
use crate::config::{MAX_BIND_PARAMS, SQLITE_MAX_BIND_PARAMS};
use crate::error::Result;

/// Destination for an ingestion run: one relational table, written by a
/// single writer.
#[async_trait]
pub trait TableSink: Send {
    /// Replace any existing table named `table` with an empty table of `schema`
    async fn replace_table(&mut self, table: &str, schema: &Schema) -> Result<()>;

    /// Append `rows` (encoded against `schema`) and return how many were written
    async fn append_rows(&mut self, table: &str, schema: &Schema, rows: &[Vec<Value>])
    -> Result<u64>;
}

/// Placeholder syntax of the target driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `$1, $2, ...` (PostgreSQL)
    Numbered,
    /// `?, ?, ...` (SQLite)
    #[cfg_attr(not(test), allow(dead_code))]
    Positional,
}

impl Placeholder {
    /// Most bind parameters one statement may carry
    pub fn max_bind_params(self) -> usize {
        match self {
            Placeholder::Numbered => MAX_BIND_PARAMS,
            Placeholder::Positional => SQLITE_MAX_BIND_PARAMS,
        }
    }
}

/// Rows per INSERT statement, bounded by the driver's bind parameter limit
pub fn rows_per_statement(batch_rows: usize, width: usize, placeholder: Placeholder) -> usize {
    let by_params = placeholder.max_bind_params() / width.max(1);
    batch_rows.min(by_params).max(1)
}

/// Build a multi-row INSERT: INSERT INTO "t" ("a", "b") VALUES ($1, $2), ($3, $4), ...
pub fn insert_sql(
    table: &str,
    schema: &Schema,
    num_rows: usize,
    placeholder: Placeholder,
) -> String {
    let column_list: Vec<String> = schema
        .column_names()
        .into_iter()
        .map(quote_ident)
        .collect();

    let width = schema.width();
    let mut value_groups = Vec::with_capacity(num_rows);
    let mut param_idx = 1;

    for _ in 0..num_rows {
        let placeholders: Vec<String> = (0..width)
            .map(|_| {
                let p = match placeholder {
                    Placeholder::Numbered => format!("${}", param_idx),
                    Placeholder::Positional => "?".to_string(),
                };
                param_idx += 1;
                p
            })
            .collect();
        value_groups.push(format!("({})", placeholders.join(", ")));
    }

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        column_list.join(", "),
        value_groups.join(", ")
    )
}
