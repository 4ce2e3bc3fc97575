//! Integration tests for end-to-end ingestion runs
//!
//! These tests use SQLite in-memory databases and real CSV files (plain and
//! gzip-compressed) to drive `run_ingest` the way the CLI does.

#[cfg(test)]
mod tests {
    use crate::{
        db::{ColumnOverrides, Pool, SqlType},
        error::IngestError,
        runner::{IngestArgs, IngestResult, run_ingest},
    };
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::num::NonZeroUsize;
    use tempfile::TempDir;
    use tokio::fs::File;
    use tokio::io::AsyncWriteExt;

    const TAXI_HEADER: &str = concat!(
        "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,",
        "passenger_count,trip_distance,store_and_fwd_flag,fare_amount\n"
    );

    // ============ Test Helpers ============

    /// One taxi-shaped row; `i` drives every value
    fn taxi_row(i: usize) -> String {
        format!(
            "{},2021-01-01 00:{:02}:{:02},2021-01-01 01:{:02}:{:02},{},{}.25,{},{}.5\n",
            i % 2 + 1,
            i / 60 % 60,
            i % 60,
            i / 60 % 60,
            i % 60,
            i % 4,
            i,
            if i % 3 == 0 { "Y" } else { "N" },
            i * 2
        )
    }

    fn taxi_csv(num_rows: usize) -> String {
        let mut data = TAXI_HEADER.to_string();
        for i in 0..num_rows {
            data.push_str(&taxi_row(i));
        }
        data
    }

    /// Helper to create a test file with the given content
    async fn create_file(dir: &TempDir, filename: &str, content: &[u8]) -> String {
        let path = dir.path().join(filename);
        let mut file = File::create(&path).await.unwrap();
        file.write_all(content).await.unwrap();
        file.flush().await.unwrap();
        path.to_str().unwrap().to_string()
    }

    fn gzip(content: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn args_for(pool: &Pool, source: &str, table: &str, chunk_size: usize) -> IngestArgs {
        IngestArgs {
            source_uri: Some(source.to_string()),
            target_table: table.to_string(),
            chunk_size: NonZeroUsize::new(chunk_size).unwrap(),
            quiet: true,
            test_pool: Some(pool.clone()),
            ..Default::default()
        }
    }

    async fn ingest(pool: &Pool, source: &str, table: &str, chunk_size: usize) -> IngestResult {
        run_ingest(args_for(pool, source, table, chunk_size))
            .await
            .unwrap()
    }

    fn ingest_error(err: &anyhow::Error) -> &IngestError {
        err.downcast_ref::<IngestError>()
            .expect("failure should carry an IngestError")
    }

    /// Helper to query table row count
    async fn get_table_count(pool: &Pool, table_name: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", table_name);
        let (count,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(pool.as_sqlite().unwrap())
            .await
            .unwrap();
        count
    }

    /// Column names in table order
    async fn get_columns(pool: &Pool, table_name: &str) -> Vec<String> {
        let sql = format!(
            "SELECT name FROM pragma_table_info('{}') ORDER BY cid",
            table_name
        );
        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .fetch_all(pool.as_sqlite().unwrap())
            .await
            .unwrap();
        rows.into_iter().map(|(name,)| name).collect()
    }

    /// (index, text column) pairs ordered by the row index
    async fn get_indexed_text(pool: &Pool, table_name: &str, column: &str) -> Vec<(i64, String)> {
        let sql = format!(
            "SELECT \"index\", \"{}\" FROM \"{}\" ORDER BY \"index\"",
            column, table_name
        );
        sqlx::query_as(&sql)
            .fetch_all(pool.as_sqlite().unwrap())
            .await
            .unwrap()
    }

    // ============ Tests ============

    #[tokio::test]
    async fn test_five_rows_in_chunks_of_two() {
        let dir = TempDir::new().unwrap();
        let csv = create_file(
            &dir,
            "letters.csv",
            b"id,tpep_pickup_datetime,tpep_dropoff_datetime,store_and_fwd_flag\n\
              A,2021-01-01 00:00:00,2021-01-01 00:10:00,N\n\
              B,2021-01-01 00:01:00,2021-01-01 00:11:00,N\n\
              C,2021-01-01 00:02:00,2021-01-01 00:12:00,Y\n\
              D,2021-01-01 00:03:00,2021-01-01 00:13:00,N\n\
              E,2021-01-01 00:04:00,2021-01-01 00:14:00,\n",
        )
        .await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let result = ingest(&pool, &csv, "letters", 2).await;

        assert_eq!(result.chunks, 3);
        assert_eq!(result.rows, 5);
        assert_eq!(result.table, "letters");
        assert_eq!(get_table_count(&pool, "letters").await, 5);

        let ids = get_indexed_text(&pool, "letters", "id").await;
        assert_eq!(
            ids,
            vec![
                (0, "A".to_string()),
                (1, "B".to_string()),
                (2, "C".to_string()),
                (3, "D".to_string()),
                (4, "E".to_string()),
            ]
        );

        // Empty field stored as NULL
        let (nulls,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM \"letters\" WHERE \"store_and_fwd_flag\" IS NULL",
        )
        .fetch_one(pool.as_sqlite().unwrap())
        .await
        .unwrap();
        assert_eq!(nulls, 1);
    }

    #[tokio::test]
    async fn test_row_count_and_order_independent_of_chunk_size() {
        let dir = TempDir::new().unwrap();
        let csv = create_file(&dir, "trips.csv", taxi_csv(37).as_bytes()).await;

        for chunk_size in [1, 4, 10, 36, 37, 100_000] {
            let pool = Pool::sqlite_in_memory().await.unwrap();
            let result = ingest(&pool, &csv, "trips", chunk_size).await;

            assert_eq!(result.rows, 37, "chunk size {}", chunk_size);
            assert_eq!(result.chunks, 37usize.div_ceil(chunk_size));
            assert_eq!(get_table_count(&pool, "trips").await, 37);

            let sql = "SELECT \"index\", \"fare_amount\" FROM \"trips\" ORDER BY \"index\"";
            let rows: Vec<(i64, f64)> = sqlx::query_as(sql)
                .fetch_all(pool.as_sqlite().unwrap())
                .await
                .unwrap();
            let expected: Vec<(i64, f64)> =
                (0..37).map(|i| (i as i64, (i * 2) as f64 + 0.5)).collect();
            assert_eq!(rows, expected, "chunk size {}", chunk_size);
        }
    }

    #[tokio::test]
    async fn test_column_set_matches_source_header() {
        let dir = TempDir::new().unwrap();
        let csv = create_file(&dir, "trips.csv", taxi_csv(5).as_bytes()).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let result = ingest(&pool, &csv, "trips", 2).await;

        let expected: Vec<String> = std::iter::once("index")
            .chain(TAXI_HEADER.trim_end().split(','))
            .map(str::to_string)
            .collect();
        assert_eq!(get_columns(&pool, "trips").await, expected);
        assert_eq!(result.columns, expected);
    }

    #[tokio::test]
    async fn test_column_types_follow_overrides_and_inference() {
        let dir = TempDir::new().unwrap();
        let csv = create_file(&dir, "trips.csv", taxi_csv(3).as_bytes()).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        ingest(&pool, &csv, "trips", 2).await;

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info('trips') ORDER BY cid")
                .fetch_all(pool.as_sqlite().unwrap())
                .await
                .unwrap();
        let types: std::collections::HashMap<String, String> = rows.into_iter().collect();

        assert_eq!(types["index"], "BIGINT");
        assert_eq!(types["VendorID"], "BIGINT");
        assert_eq!(types["tpep_pickup_datetime"], "TIMESTAMP WITHOUT TIME ZONE");
        assert_eq!(types["trip_distance"], "DOUBLE PRECISION");
        assert_eq!(types["store_and_fwd_flag"], "TEXT");
    }

    #[tokio::test]
    async fn test_rerun_replaces_table() {
        let dir = TempDir::new().unwrap();
        let csv = create_file(&dir, "trips.csv", taxi_csv(8).as_bytes()).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        ingest(&pool, &csv, "trips", 3).await;
        ingest(&pool, &csv, "trips", 5).await;

        assert_eq!(get_table_count(&pool, "trips").await, 8);
    }

    #[tokio::test]
    async fn test_existing_table_with_other_shape_is_replaced() {
        let dir = TempDir::new().unwrap();
        let csv = create_file(&dir, "trips.csv", taxi_csv(4).as_bytes()).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        sqlx::query("CREATE TABLE \"trips\" (legacy TEXT)")
            .execute(pool.as_sqlite().unwrap())
            .await
            .unwrap();
        sqlx::query("INSERT INTO \"trips\" VALUES ('stale')")
            .execute(pool.as_sqlite().unwrap())
            .await
            .unwrap();

        ingest(&pool, &csv, "trips", 10).await;

        assert_eq!(get_table_count(&pool, "trips").await, 4);
        assert!(!get_columns(&pool, "trips").await.contains(&"legacy".to_string()));
    }

    #[tokio::test]
    async fn test_bad_first_chunk_keeps_existing_table() {
        let dir = TempDir::new().unwrap();
        let mut data = TAXI_HEADER.to_string();
        data.push_str("1,not-a-time,2021-01-01 00:10:00,1,1.5,N,7.0\n");
        let csv = create_file(&dir, "trips.csv", data.as_bytes()).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        sqlx::query("CREATE TABLE \"trips\" (legacy TEXT)")
            .execute(pool.as_sqlite().unwrap())
            .await
            .unwrap();
        sqlx::query("INSERT INTO \"trips\" VALUES ('keep me')")
            .execute(pool.as_sqlite().unwrap())
            .await
            .unwrap();

        let err = run_ingest(args_for(&pool, &csv, "trips", 10))
            .await
            .unwrap_err();

        assert!(ingest_error(&err).is_data_format());
        assert_eq!(ingest_error(&err).line(), Some(2));
        assert_eq!(get_columns(&pool, "trips").await, vec!["legacy".to_string()]);
        assert_eq!(get_table_count(&pool, "trips").await, 1);
    }

    #[tokio::test]
    async fn test_header_only_source_creates_empty_table() {
        let dir = TempDir::new().unwrap();
        let csv = create_file(&dir, "empty.csv", TAXI_HEADER.as_bytes()).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let result = ingest(&pool, &csv, "trips", 10).await;

        assert_eq!(result.rows, 0);
        assert_eq!(result.chunks, 1);
        assert_eq!(get_table_count(&pool, "trips").await, 0);
        assert_eq!(get_columns(&pool, "trips").await.len(), 8);
    }

    #[tokio::test]
    async fn test_exact_multiple_of_chunk_size() {
        let dir = TempDir::new().unwrap();
        let csv = create_file(&dir, "trips.csv", taxi_csv(12).as_bytes()).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let result = ingest(&pool, &csv, "trips", 4).await;

        assert_eq!(result.chunks, 3);
        assert_eq!(get_table_count(&pool, "trips").await, 12);
    }

    #[tokio::test]
    async fn test_malformed_timestamp_keeps_earlier_chunks() {
        let dir = TempDir::new().unwrap();
        let mut data = taxi_csv(4);
        data.push_str("1,yesterday,2021-01-01 01:00:00,1,1.0,N,3.5\n");
        data.push_str(&taxi_row(5));
        let csv = create_file(&dir, "trips.csv", data.as_bytes()).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let err = run_ingest(args_for(&pool, &csv, "trips", 2))
            .await
            .unwrap_err();

        let ingest_err = ingest_error(&err);
        assert!(ingest_err.is_data_format());
        // Header is line 1, so the fifth data row sits on line 6
        assert_eq!(ingest_err.line(), Some(6));
        assert!(format!("{:#}", err).contains("yesterday"));

        // Chunks [0,1] and [2,3] were committed before the failing chunk
        assert_eq!(get_table_count(&pool, "trips").await, 4);
    }

    #[tokio::test]
    async fn test_type_drift_after_first_chunk_is_rejected() {
        let dir = TempDir::new().unwrap();
        let content = "a,b\n1,x\n2,y\nthree,z\n";
        let csv = create_file(&dir, "drift.csv", content.as_bytes()).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let mut args = args_for(&pool, &csv, "drift", 2);
        args.overrides = ColumnOverrides::new();

        let err = run_ingest(args).await.unwrap_err();
        assert!(ingest_error(&err).is_data_format());
        assert_eq!(get_table_count(&pool, "drift").await, 2);
    }

    #[tokio::test]
    async fn test_override_for_missing_column_is_rejected() {
        let dir = TempDir::new().unwrap();
        let csv = create_file(&dir, "plain.csv", b"a,b\n1,2\n").await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        // Default overrides name taxi columns absent from this file
        let err = run_ingest(args_for(&pool, &csv, "plain", 10))
            .await
            .unwrap_err();
        assert!(ingest_error(&err).is_data_format());
    }

    #[tokio::test]
    async fn test_gzip_source() {
        let dir = TempDir::new().unwrap();
        let csv = create_file(&dir, "trips.csv.gz", &gzip(&taxi_csv(9))).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let result = ingest(&pool, &csv, "trips", 4).await;

        assert_eq!(result.rows, 9);
        assert_eq!(result.chunks, 3);
        assert_eq!(get_table_count(&pool, "trips").await, 9);
    }

    #[tokio::test]
    async fn test_tsv_source_without_index() {
        let dir = TempDir::new().unwrap();
        let tsv = create_file(&dir, "plain.tsv", b"name\tscore\nann\t1.5\nbob\t2\n").await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let mut args = args_for(&pool, &tsv, "scores", 1);
        args.overrides = ColumnOverrides::new();
        args.overrides.set("name", SqlType::Text);
        args.index_label = None;

        let result = run_ingest(args).await.unwrap();
        assert_eq!(result.columns, vec!["name".to_string(), "score".to_string()]);

        let rows: Vec<(String, f64)> =
            sqlx::query_as("SELECT \"name\", \"score\" FROM \"scores\" ORDER BY \"score\"")
                .fetch_all(pool.as_sqlite().unwrap())
                .await
                .unwrap();
        assert_eq!(rows, vec![("ann".to_string(), 1.5), ("bob".to_string(), 2.0)]);
    }

    #[tokio::test]
    async fn test_file_uri_source() {
        let dir = TempDir::new().unwrap();
        let csv = create_file(&dir, "trips.csv", taxi_csv(3).as_bytes()).await;
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let uri = url::Url::from_file_path(&csv).unwrap().to_string();
        let result = ingest(&pool, &uri, "trips", 2).await;

        assert_eq!(result.rows, 3);
    }

    #[tokio::test]
    async fn test_missing_source_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.csv");
        let pool = Pool::sqlite_in_memory().await.unwrap();

        let result = run_ingest(args_for(&pool, missing.to_str().unwrap(), "trips", 2)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_table_name_rejected() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let result = run_ingest(args_for(&pool, "/tmp/whatever.csv", "", 2)).await;
        assert!(result.is_err());
    }
}
