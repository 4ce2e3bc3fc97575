use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Telemetry events sent from the loader to the progress reporter
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// Destination table was (re)created from the first chunk
    TableCreated { table: String, columns: usize },
    /// A chunk was appended to the table
    ChunkInserted { rows: u64, duration_ms: u64 },
    /// Every chunk has been appended
    Completed { table: String },
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    /// Destination table, known once it has been created
    pub table: Option<String>,
    pub columns: usize,
    pub completed: bool,
    pub chunks_inserted: usize,
    pub rows_inserted: u64,
    pub chunk_durations_ms: Vec<u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::TableCreated { table, columns } => {
                self.table = Some(table.clone());
                self.columns = *columns;
            }
            TelemetryEvent::ChunkInserted { rows, duration_ms } => {
                self.chunks_inserted += 1;
                self.rows_inserted += rows;
                self.chunk_durations_ms.push(*duration_ms);
            }
            TelemetryEvent::Completed { table } => {
                self.table.get_or_insert_with(|| table.clone());
                self.completed = true;
            }
        }
    }

    /// Calculate percentile from chunk write durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.chunk_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.chunk_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>) {
        (self.percentile(50.0), self.percentile(90.0))
    }

    /// One-line status shown next to the spinner
    fn progress_message(&self, elapsed: Duration) -> String {
        let Some(table) = &self.table else {
            return "Reading first chunk...".to_string();
        };
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            self.rows_inserted as f64 / secs
        } else {
            0.0
        };
        let mut msg = format!(
            "{} ({} columns) | Chunks: {} | Rows: {} ({:.0}/s)",
            table, self.columns, self.chunks_inserted, self.rows_inserted, rate
        );
        if let (Some(p50), Some(p90)) = self.get_percentiles() {
            msg.push_str(&format!(" | Chunk Time p50: {}ms, p90: {}ms", p50, p90));
        }
        msg
    }
}

/// Drive a spinner from telemetry events until every sender is dropped
///
/// Returns `None` when `quiet` is set; the receiver is dropped and the
/// loader's sends become no-ops.
pub fn spawn_progress_reporter(
    quiet: bool,
    mut telemetry_rx: mpsc::UnboundedReceiver<TelemetryEvent>,
) -> Option<JoinHandle<ProgressStats>> {
    if quiet {
        return None;
    }

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(200));

    Some(tokio::spawn(async move {
        let started = Instant::now();
        let mut stats = ProgressStats::new();

        while let Some(event) = telemetry_rx.recv().await {
            stats.update(&event);
            bar.set_message(stats.progress_message(started.elapsed()));
        }

        let msg = stats.progress_message(started.elapsed());
        if stats.completed {
            bar.finish_with_message(msg);
        } else {
            bar.abandon_with_message(format!("{} (aborted)", msg));
        }
        stats
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_follow_events() {
        let mut stats = ProgressStats::new();
        stats.update(&TelemetryEvent::TableCreated {
            table: "t".to_string(),
            columns: 3,
        });
        stats.update(&TelemetryEvent::ChunkInserted {
            rows: 2,
            duration_ms: 10,
        });
        stats.update(&TelemetryEvent::ChunkInserted {
            rows: 1,
            duration_ms: 30,
        });

        assert_eq!(stats.table.as_deref(), Some("t"));
        assert_eq!(stats.columns, 3);
        assert!(!stats.completed);
        assert_eq!(stats.chunks_inserted, 2);
        assert_eq!(stats.rows_inserted, 3);

        stats.update(&TelemetryEvent::Completed {
            table: "t".to_string(),
        });
        assert!(stats.completed);
    }

    #[test]
    fn test_percentiles() {
        let mut stats = ProgressStats::new();
        assert_eq!(stats.get_percentiles(), (None, None));

        for duration_ms in 1..=10 {
            stats.update(&TelemetryEvent::ChunkInserted {
                rows: 1,
                duration_ms,
            });
        }

        assert_eq!(stats.percentile(50.0), Some(5));
        assert_eq!(stats.percentile(90.0), Some(9));
        assert_eq!(stats.percentile(0.0), Some(1));
        assert_eq!(stats.percentile(100.0), Some(10));
    }

    #[test]
    fn test_progress_message() {
        let mut stats = ProgressStats::new();
        assert_eq!(
            stats.progress_message(Duration::from_secs(1)),
            "Reading first chunk..."
        );

        stats.update(&TelemetryEvent::TableCreated {
            table: "t".to_string(),
            columns: 2,
        });
        assert_eq!(
            stats.progress_message(Duration::from_secs(1)),
            "t (2 columns) | Chunks: 0 | Rows: 0 (0/s)"
        );

        stats.update(&TelemetryEvent::ChunkInserted {
            rows: 100,
            duration_ms: 40,
        });
        assert_eq!(
            stats.progress_message(Duration::from_secs(2)),
            "t (2 columns) | Chunks: 1 | Rows: 100 (50/s) | Chunk Time p50: 40ms, p90: 40ms"
        );
    }

    #[tokio::test]
    async fn test_quiet_reporter_is_not_spawned() {
        let (_tx, rx) = mpsc::unbounded_channel();
        assert!(spawn_progress_reporter(true, rx).is_none());
    }

    #[tokio::test]
    async fn test_reporter_returns_final_stats() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_progress_reporter(false, rx).unwrap();

        tx.send(TelemetryEvent::ChunkInserted {
            rows: 3,
            duration_ms: 1,
        })
        .unwrap();
        tx.send(TelemetryEvent::Completed {
            table: "t".to_string(),
        })
        .unwrap();
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.rows_inserted, 3);
        assert!(stats.completed);
        assert_eq!(stats.table.as_deref(), Some("t"));
    }
}
