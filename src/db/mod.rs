//! Database layer - schema inference, the table sink seam, and PostgreSQL connections

pub mod pool;
pub mod schema;
pub mod sink;

pub use pool::Pool;
pub use schema::{ColumnOverrides, Schema, SchemaInferrer, SqlType, Value};
pub use sink::TableSink;
