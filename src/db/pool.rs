//! Adapter between bb8 and the sqlx::Postgres driver, and the table sink
//! built on top of it.
use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use derive_builder::Builder;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, info};

use super::schema::{Schema, SchemaInferrer, SqlType, Value};
use super::sink::{Placeholder, TableSink, insert_sql, rows_per_statement};
use crate::config::{CONNECT_TIMEOUT, INSERT_BATCH_ROWS, PING_TIMEOUT, QUERY_TIMEOUT};
use crate::error::{IngestError, Result};

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, PgArguments>;

#[cfg(test)]
type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Inner pool variants
#[derive(Debug, Clone)]
enum PoolInner {
    Postgres(bb8::Pool<ConnectionManager>),
    #[cfg(test)]
    Sqlite(sqlx::SqlitePool),
}

/// Destination handle: a single-writer connection pool plus insert tuning
#[derive(Debug, Clone)]
pub struct Pool {
    inner: PoolInner,
    insert_batch_rows: usize,
}

#[derive(Builder)]
pub struct PoolArgs {
    #[builder(setter(into))]
    host: String,
    #[builder(default = "5432")]
    port: u16,
    #[builder(setter(into))]
    username: String,
    #[builder(setter(into))]
    password: String,
    #[builder(setter(into))]
    database: String,
    #[builder(default = "1")]
    max_pool_size: u32,
    #[builder(default = "INSERT_BATCH_ROWS")]
    insert_batch_rows: usize,
}

pub async fn pool(args: PoolArgs) -> anyhow::Result<Pool> {
    let PoolArgs {
        host,
        port,
        username,
        password,
        database,
        max_pool_size,
        insert_batch_rows,
    } = args;
    let connect_options = PgConnectOptions::new()
        .host(&host)
        .port(port)
        .username(&username)
        .password(&password)
        .database(&database);

    let conn_manager = ConnectionManager::new(connect_options);

    // One idle connection is opened eagerly so an unreachable server fails
    // here rather than on the first write.
    let bb8_pool = bb8::Builder::new()
        .min_idle(Some(1))
        .max_size(max_pool_size)
        .connection_timeout(CONNECT_TIMEOUT)
        .build(conn_manager)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to PostgreSQL at {}:{}/{} as '{}'",
                host, port, database, username
            )
        })?;

    info!(%host, port, %database, "connected to PostgreSQL");

    Ok(Pool {
        inner: PoolInner::Postgres(bb8_pool),
        insert_batch_rows,
    })
}

impl Pool {
    /// Create an in-memory SQLite pool for testing
    ///
    /// Limited to one connection: every connection to `sqlite::memory:` is
    /// a separate database.
    #[cfg(test)]
    pub async fn sqlite_in_memory() -> Result<Self, sqlx::Error> {
        let sqlite_pool = sqlx::sqlite::SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Pool {
            inner: PoolInner::Sqlite(sqlite_pool),
            insert_batch_rows: INSERT_BATCH_ROWS,
        })
    }

    /// Access the SQLite pool backing a test pool
    #[cfg(test)]
    pub fn as_sqlite(&self) -> Option<&sqlx::SqlitePool> {
        match &self.inner {
            PoolInner::Sqlite(pool) => Some(pool),
            PoolInner::Postgres(_) => None,
        }
    }

    #[cfg(test)]
    pub fn with_insert_batch_rows(mut self, rows: usize) -> Self {
        self.insert_batch_rows = rows;
        self
    }

    /// Run `statements` in one transaction
    async fn execute_in_transaction(&self, table: &str, statements: &[String]) -> Result<()> {
        match &self.inner {
            PoolInner::Postgres(pool) => {
                let mut conn = pool.get().await?;
                let mut tx = conn.begin().await?;
                for sql in statements {
                    debug!(%sql, "executing statement");
                    let statement = sqlx::query(sql.as_str()).execute(&mut *tx);
                    tokio::time::timeout(QUERY_TIMEOUT, statement)
                        .await
                        .map_err(|_| IngestError::write_timeout(table, QUERY_TIMEOUT))??;
                }
                tx.commit().await?;
                Ok(())
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                for sql in statements {
                    sqlx::query(sql.as_str()).execute(&mut *tx).await?;
                }
                tx.commit().await?;
                Ok(())
            }
        }
    }

    /// Insert encoded rows with multi-row INSERT statements in one transaction
    async fn insert_rows(&self, table: &str, schema: &Schema, rows: &[Vec<Value>]) -> Result<u64> {
        let types = schema.column_types();
        let width = schema.width();

        match &self.inner {
            PoolInner::Postgres(pool) => {
                let mut conn = pool.get().await?;
                let mut tx = conn.begin().await?;
                let per_statement =
                    rows_per_statement(self.insert_batch_rows, width, Placeholder::Numbered);

                for batch in rows.chunks(per_statement) {
                    let sql = insert_sql(table, schema, batch.len(), Placeholder::Numbered);
                    let mut query = sqlx::query(&sql);
                    for row in batch {
                        for (value, sql_type) in row.iter().zip(&types) {
                            query = bind_pg(query, value, *sql_type);
                        }
                    }

                    debug!(table, rows = batch.len(), "insert statement");
                    tokio::time::timeout(QUERY_TIMEOUT, query.execute(&mut *tx))
                        .await
                        .map_err(|_| IngestError::write_timeout(table, QUERY_TIMEOUT))??;
                }

                tx.commit().await?;
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                let per_statement =
                    rows_per_statement(self.insert_batch_rows, width, Placeholder::Positional);

                for batch in rows.chunks(per_statement) {
                    let sql = insert_sql(table, schema, batch.len(), Placeholder::Positional);
                    let mut query = sqlx::query(&sql);
                    for row in batch {
                        for (value, sql_type) in row.iter().zip(&types) {
                            query = bind_sqlite(query, value, *sql_type);
                        }
                    }
                    query.execute(&mut *tx).await?;
                }

                tx.commit().await?;
            }
        }

        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl TableSink for Pool {
    async fn replace_table(&mut self, table: &str, schema: &Schema) -> Result<()> {
        let ddl = SchemaInferrer::generate_ddl(table, schema);
        self.execute_in_transaction(table, &ddl).await
    }

    async fn append_rows(
        &mut self,
        table: &str,
        schema: &Schema,
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        self.insert_rows(table, schema, rows).await
    }
}

/// Bind a single value with its native Postgres type
fn bind_pg<'q>(query: PgQuery<'q>, value: &'q Value, sql_type: SqlType) -> PgQuery<'q> {
    match value {
        Value::Null => match sql_type {
            // Typed NULLs so the parameter type matches the column
            SqlType::Boolean => query.bind(None::<bool>),
            SqlType::BigInt => query.bind(None::<i64>),
            SqlType::DoublePrecision => query.bind(None::<f64>),
            SqlType::Text => query.bind(None::<String>),
            SqlType::Timestamp => query.bind(None::<NaiveDateTime>),
        },
        Value::Boolean(v) => query.bind(*v),
        Value::BigInt(v) => query.bind(*v),
        Value::Double(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Timestamp(v) => query.bind(*v),
    }
}

#[cfg(test)]
fn bind_sqlite<'q>(
    query: SqliteQuery<'q>,
    value: &'q Value,
    sql_type: SqlType,
) -> SqliteQuery<'q> {
    match value {
        Value::Null => match sql_type {
            SqlType::Boolean => query.bind(None::<bool>),
            SqlType::BigInt => query.bind(None::<i64>),
            SqlType::DoublePrecision => query.bind(None::<f64>),
            SqlType::Text => query.bind(None::<String>),
            SqlType::Timestamp => query.bind(None::<NaiveDateTime>),
        },
        Value::Boolean(v) => query.bind(*v),
        Value::BigInt(v) => query.bind(*v),
        Value::Double(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Timestamp(v) => query.bind(*v),
    }
}

// Wrap the connect options so that we can implement the bb8::ManageConnection trait.
#[derive(Debug)]
pub struct ConnectionManager {
    connect_options: PgConnectOptions,
}

impl ConnectionManager {
    /// Create a new `ConnectionManager` with the specified connect options.
    pub fn new(connect_options: PgConnectOptions) -> Self {
        Self { connect_options }
    }
}

impl bb8::ManageConnection for ConnectionManager {
    type Connection = PgConnection;
    type Error = sqlx::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        tokio::time::timeout(CONNECT_TIMEOUT, self.connect_options.connect())
            .await
            .map_err(|_| sqlx::Error::PoolTimedOut)?
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        tokio::time::timeout(PING_TIMEOUT, sqlx::Connection::ping(conn))
            .await
            // Convert tokio timeouts into sqlx pool timeouts.
            // bb8 will open a fresh connection on ping failure.
            .map_err(|_| sqlx::Error::PoolTimedOut)
            // Make sure that we also look at the actual ping result
            .and_then(|result| result)?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        // sqlx::PgConnection provides no non-async way to check for closed/broken connections.
        false
    }
}
