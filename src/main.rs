use clap::Parser;
use ny_taxi_ingest::runner::{IngestArgs, IngestResult, run_ingest};
use std::num::NonZeroUsize;

/// Ingest the NYC yellow taxi trip data for one month into PostgreSQL
#[derive(Parser, Clone, Debug)]
#[command(version, about)]
struct Args {
    /// PostgreSQL username
    #[arg(long, default_value = "root")]
    pg_user: String,

    /// PostgreSQL password
    #[arg(long, default_value = "root")]
    pg_pass: String,

    /// PostgreSQL host
    #[arg(long, default_value = "localhost")]
    pg_host: String,

    /// PostgreSQL port
    #[arg(long, default_value_t = 5432)]
    pg_port: u16,

    /// PostgreSQL database name
    #[arg(long, default_value = "ny_taxi")]
    pg_db: String,

    /// Year of the taxi data
    #[arg(long, default_value_t = 2021)]
    year: u16,

    /// Month of the taxi data
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=12))]
    month: u8,

    /// Rows per chunk to ingest
    #[arg(long, default_value = "100000")]
    chunksize: NonZeroUsize,

    /// Target table name
    #[arg(long, default_value = "yellow_taxi_data")]
    target_table: String,

    /// Read from this path or URL instead of the monthly taxi file
    /// (local path, file://, http(s)://)
    #[arg(long)]
    source_uri: Option<String>,

    /// Columns kept as nullable text (comma-separated, empty to clear)
    #[arg(long, value_delimiter = ',', default_value = "store_and_fwd_flag")]
    text_columns: Vec<String>,

    /// Columns parsed as timestamps (comma-separated, empty to clear)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "tpep_pickup_datetime,tpep_dropoff_datetime"
    )]
    parse_dates: Vec<String>,

    /// Name of the row index column
    #[arg(long, default_value = "index")]
    index_label: String,

    /// Do not write the row index column
    #[arg(long)]
    no_index: bool,

    /// Show the plan without downloading or loading data
    #[arg(long)]
    dry_run: bool,

    /// Quiet mode - minimal output, only show summary
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing based on quiet mode
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if args.quiet {
        EnvFilter::new("ny_taxi_ingest=warn,sqlx=off")
    } else {
        EnvFilter::new("ny_taxi_ingest=info,sqlx=off")
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let ingest_args = cli::build_ingest_args(&args)?;

    if !args.quiet {
        println!("NY Taxi Ingest");
        println!("==============");
        println!("Source: {}", ingest_args.resolved_source());
        println!(
            "Destination: {}:{}/{} table {}",
            ingest_args.pg_host, ingest_args.pg_port, ingest_args.pg_db, ingest_args.target_table
        );
        println!("Chunk size: {}", ingest_args.chunk_size);
        println!();
    }

    // Handle dry-run mode
    if args.dry_run {
        print!("{}", cli::render_plan(&ingest_args));
        println!();
        println!("To execute, run without --dry-run");
        return Ok(());
    }

    let result = run_ingest(ingest_args).await?;
    print!("{}", cli::render_summary(&result));

    Ok(())
}

/// CLI utility functions for turning command-line arguments into a run
mod cli {
    use super::*;
    use anyhow::bail;
    use ny_taxi_ingest::runner::{ColumnOverrides, SqlType};
    use std::fmt::Write;

    /// Build overrides from the comma-separated column lists
    ///
    /// Empty names are skipped so `--text-columns=` clears the list.
    pub fn parse_overrides(
        text_columns: &[String],
        parse_dates: &[String],
    ) -> anyhow::Result<ColumnOverrides> {
        let mut overrides = ColumnOverrides::new();

        for (columns, sql_type) in [
            (text_columns, SqlType::Text),
            (parse_dates, SqlType::Timestamp),
        ] {
            for column in columns.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
                if let Some(existing) = overrides.get(column) {
                    bail!(
                        "Column '{}' is declared both as {:?} and {:?}",
                        column,
                        existing,
                        sql_type
                    );
                }
                overrides.set(column, sql_type);
            }
        }

        Ok(overrides)
    }

    pub fn build_ingest_args(args: &Args) -> anyhow::Result<IngestArgs> {
        let ingest_args = IngestArgs {
            pg_user: args.pg_user.clone(),
            pg_pass: args.pg_pass.clone(),
            pg_host: args.pg_host.clone(),
            pg_port: args.pg_port,
            pg_db: args.pg_db.clone(),
            year: args.year,
            month: args.month,
            source_uri: args.source_uri.clone(),
            target_table: args.target_table.clone(),
            chunk_size: args.chunksize,
            overrides: parse_overrides(&args.text_columns, &args.parse_dates)?,
            index_label: (!args.no_index).then(|| args.index_label.clone()),
            quiet: args.quiet,
        };
        ingest_args.validate()?;
        Ok(ingest_args)
    }

    /// Describe what a run would do; the password is never shown
    pub fn render_plan(args: &IngestArgs) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "DRY RUN MODE - No data will be loaded");
        let _ = writeln!(out);
        let _ = writeln!(out, "Configuration:");
        let _ = writeln!(out, "  Source: {}", args.resolved_source());
        let _ = writeln!(
            out,
            "  Connection: postgresql://{}:***@{}:{}/{}",
            args.pg_user, args.pg_host, args.pg_port, args.pg_db
        );
        let _ = writeln!(out, "  Table: {} (replaced)", args.target_table);
        let _ = writeln!(out, "  Chunk size: {}", args.chunk_size);
        match &args.index_label {
            Some(label) => {
                let _ = writeln!(out, "  Index column: {}", label);
            }
            None => {
                let _ = writeln!(out, "  Index column: none");
            }
        }
        if !args.overrides.is_empty() {
            let _ = writeln!(out, "  Column types:");
            for (column, sql_type) in args.overrides.iter() {
                let _ = writeln!(out, "    {} -> {}", column, sql_type.to_postgres());
            }
        }
        out
    }

    pub fn render_summary(result: &IngestResult) -> String {
        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "Ingest Summary");
        let _ = writeln!(out, "==============");
        let _ = writeln!(out, "Run ID: {}", result.run_id);
        let _ = writeln!(out, "Source: {}", result.source);
        let _ = writeln!(out, "Table: {}", result.table);
        let _ = writeln!(out, "Columns: {}", result.columns.len());
        let _ = writeln!(out, "Chunks: {}", result.chunks);
        let _ = writeln!(out, "Rows: {}", result.rows);
        let _ = writeln!(out, "Duration: {:.2}s", result.duration.as_secs_f64());
        let _ = writeln!(out, "Throughput: {:.2} rows/sec", result.rows_per_sec());
        out
    }
}
