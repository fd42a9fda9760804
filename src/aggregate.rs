//! Result aggregation and output writing.
//!
//! Consumes the dispatcher's unordered result stream, re-sorts by input
//! index, and writes JSON + CSV output. An interrupted run flushes the
//! same files under a distinguishable `_partial` suffix.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dispatch::{FetchOutcome, TaskResult};
use crate::fetch::RestaurantRecord;

/// Log a progress line every this many results.
const PROGRESS_EVERY: usize = 10;

/// CSV columns, in output order.
const CSV_HEADER: &[&str] = &[
    "name",
    "address",
    "price",
    "category",
    "rating",
    "url",
    "image_count",
];

/// Files produced by a flush.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
}

/// Accumulates task results and writes run output.
pub struct ResultAggregator {
    output_dir: PathBuf,
    stem: String,
    records: Vec<(usize, RestaurantRecord)>,
    failures: Vec<(usize, String, String)>,
}

impl ResultAggregator {
    pub fn new(output_dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            stem: stem.into(),
            records: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Consume the result stream until the dispatcher closes it.
    pub async fn run(mut self, mut rx: mpsc::Receiver<TaskResult>) -> Self {
        while let Some(result) = rx.recv().await {
            self.record(result);
        }
        self
    }

    /// Record one task result.
    pub fn record(&mut self, result: TaskResult) {
        match result.outcome {
            FetchOutcome::Success(record) => {
                self.records.push((result.index, record));
            }
            FetchOutcome::Failure(reason) => {
                warn!("{} failed: {reason}", result.url);
                self.failures.push((result.index, result.url, reason));
            }
        }

        let total = self.records.len() + self.failures.len();
        if total % PROGRESS_EVERY == 0 {
            info!(
                "progress: {} collected, {} failed",
                self.records.len(),
                self.failures.len()
            );
        }
    }

    pub fn succeeded(&self) -> usize {
        self.records.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Write JSON and CSV output, re-sorted by input index.
    ///
    /// `partial` marks output flushed after an interruption; the files get
    /// a `_partial` suffix so a complete run never overwrites them and
    /// vice versa.
    pub fn flush(&mut self, partial: bool) -> Result<OutputPaths> {
        self.records.sort_by_key(|(index, _)| *index);

        let suffix = if partial { "_partial" } else { "" };
        let json_path = self.output_dir.join(format!("{}{suffix}.json", self.stem));
        let csv_path = self.output_dir.join(format!("{}{suffix}.csv", self.stem));

        if !self.output_dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.output_dir)
                .with_context(|| format!("creating {}", self.output_dir.display()))?;
        }

        let records: Vec<&RestaurantRecord> =
            self.records.iter().map(|(_, record)| record).collect();

        let json = serde_json::to_string_pretty(&records).context("serializing records")?;
        fs::write(&json_path, json)
            .with_context(|| format!("writing {}", json_path.display()))?;

        write_csv(&csv_path, &records)
            .with_context(|| format!("writing {}", csv_path.display()))?;

        info!(
            "wrote {} records to {} and {}",
            records.len(),
            json_path.display(),
            csv_path.display()
        );

        Ok(OutputPaths {
            json: json_path,
            csv: csv_path,
        })
    }
}

fn write_csv(path: &Path, records: &[&RestaurantRecord]) -> Result<()> {
    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", CSV_HEADER.join(","))?;
    for record in records {
        let row = [
            record.name.as_str(),
            record.address.as_str(),
            record.price.as_str(),
            record.category.as_str(),
            record.rating.as_str(),
            record.url.as_str(),
            &record.image_count.to_string(),
        ]
        .iter()
        .map(|cell| csv_escape(cell))
        .collect::<Vec<_>>()
        .join(",");
        writeln!(file, "{row}")?;
    }
    Ok(())
}

/// Quote a CSV cell when it contains a separator, quote, or newline.
fn csv_escape(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') || cell.contains('\r') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
