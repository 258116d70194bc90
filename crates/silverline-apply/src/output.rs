use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use silverline_core::{PartitionResult, Record, RecordBatch, RecordId};

use crate::atomic::{non_empty_parent, sync_dir};
use crate::errors::PublishError;
use crate::metrics::RunMetrics;

/// Extra quarantine column listing the rules a record failed.
pub const FAILED_RULES_COLUMN: &str = "_failed_rules";

/// Filesystem layout of published run outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    data_root: PathBuf,
}

/// Locations and sizes of the files a run published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedOutputs {
    pub silver: PathBuf,
    pub quarantine: PathBuf,
    pub metrics: PathBuf,
    pub report: PathBuf,
    pub silver_bytes: u64,
    pub quarantine_bytes: u64,
}

impl OutputLayout {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn silver_path(&self, dataset_id: &str, run_id: &str) -> PathBuf {
        self.run_file("silver", dataset_id, run_id, "csv")
    }

    pub fn quarantine_path(&self, dataset_id: &str, run_id: &str) -> PathBuf {
        self.run_file("quarantine", dataset_id, run_id, "csv")
    }

    pub fn metrics_path(&self, dataset_id: &str, run_id: &str) -> PathBuf {
        self.run_file("metrics", dataset_id, run_id, "json")
    }

    pub fn report_path(&self, dataset_id: &str, run_id: &str) -> PathBuf {
        self.run_file("reports", dataset_id, run_id, "md")
    }

    pub fn staging_dir(&self, run_id: &str) -> PathBuf {
        self.data_root.join("staging").join(run_id)
    }

    fn run_file(&self, area: &str, dataset_id: &str, run_id: &str, ext: &str) -> PathBuf {
        self.data_root
            .join(area)
            .join(dataset_id)
            .join(format!("run_{run_id}.{ext}"))
    }

    /// The metrics file is renamed last, so its presence marks a complete publish.
    pub fn is_published(&self, dataset_id: &str, run_id: &str) -> bool {
        self.metrics_path(dataset_id, run_id).is_file()
    }

    /// Describe outputs already published for a run, if any.
    pub fn existing(&self, dataset_id: &str, run_id: &str) -> Option<PublishedOutputs> {
        if !self.is_published(dataset_id, run_id) {
            return None;
        }
        let silver = self.silver_path(dataset_id, run_id);
        let quarantine = self.quarantine_path(dataset_id, run_id);
        let size = |path: &Path| fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
        Some(PublishedOutputs {
            silver_bytes: size(&silver),
            quarantine_bytes: size(&quarantine),
            silver,
            quarantine,
            metrics: self.metrics_path(dataset_id, run_id),
            report: self.report_path(dataset_id, run_id),
        })
    }

    /// Stage every output under the run's staging directory, then rename the
    /// files into place with metrics last. On failure nothing stays visible.
    pub fn publish(
        &self,
        batch: &RecordBatch,
        partition: &PartitionResult,
        metrics: &RunMetrics,
        report: &str,
    ) -> Result<PublishedOutputs, PublishError> {
        let dataset_id = metrics.dataset_id.as_str();
        let run_id = metrics.run_id.as_str();
        check_component(dataset_id)?;
        check_component(run_id)?;

        let staging = self.staging_dir(run_id);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let result = self.stage_and_commit(&staging, batch, partition, metrics, report);
        if let Err(err) = fs::remove_dir_all(&staging) {
            tracing::warn!(event = "staging_cleanup_failed", run_id, error = %err);
        }
        let outputs = result?;

        tracing::info!(
            event = "outputs_published",
            run_id,
            dataset_id,
            silver_bytes = outputs.silver_bytes,
            quarantine_bytes = outputs.quarantine_bytes
        );
        Ok(outputs)
    }

    fn stage_and_commit(
        &self,
        staging: &Path,
        batch: &RecordBatch,
        partition: &PartitionResult,
        metrics: &RunMetrics,
        report: &str,
    ) -> Result<PublishedOutputs, PublishError> {
        let by_id: HashMap<RecordId, &Record> =
            batch.records().iter().map(|record| (record.id, record)).collect();

        let staged_silver = staging.join("silver.csv");
        let silver_bytes =
            write_partition_csv(&staged_silver, batch.columns(), &partition.clean_records, &by_id, None)?;
        let staged_quarantine = staging.join("quarantine.csv");
        let quarantine_bytes = write_partition_csv(
            &staged_quarantine,
            batch.columns(),
            &partition.quarantine_records,
            &by_id,
            Some(partition),
        )?;
        let staged_report = staging.join("report.md");
        write_synced(&staged_report, report.as_bytes())?;
        let staged_metrics = staging.join("metrics.json");
        write_synced(&staged_metrics, &serde_json::to_vec_pretty(metrics)?)?;
        sync_dir(staging)?;

        let outputs = PublishedOutputs {
            silver: self.silver_path(&metrics.dataset_id, &metrics.run_id),
            quarantine: self.quarantine_path(&metrics.dataset_id, &metrics.run_id),
            metrics: self.metrics_path(&metrics.dataset_id, &metrics.run_id),
            report: self.report_path(&metrics.dataset_id, &metrics.run_id),
            silver_bytes,
            quarantine_bytes,
        };

        let moves = [
            (staged_silver, outputs.silver.clone()),
            (staged_quarantine, outputs.quarantine.clone()),
            (staged_report, outputs.report.clone()),
            (staged_metrics, outputs.metrics.clone()),
        ];
        let mut committed: Vec<&Path> = Vec::new();
        for (from, to) in &moves {
            if let Err(err) = commit_file(from, to) {
                roll_back(&committed);
                return Err(err.into());
            }
            committed.push(to);
        }

        Ok(outputs)
    }
}

fn check_component(value: &str) -> Result<(), PublishError> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(PublishError::InvalidPath(value.to_string()))
    }
}

fn commit_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = non_empty_parent(to) {
        fs::create_dir_all(parent)?;
    }
    fs::rename(from, to)?;
    if let Some(parent) = non_empty_parent(to) {
        sync_dir(parent)?;
    }
    Ok(())
}

fn roll_back(committed: &[&Path]) {
    for path in committed.iter().rev() {
        if let Err(err) = fs::remove_file(path) {
            tracing::error!(event = "publish_rollback_failed", path = %path.display(), error = %err);
        }
    }
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// Write one partition as CSV in record order; returns bytes written.
fn write_partition_csv(
    path: &Path,
    columns: &[String],
    records: &[RecordId],
    by_id: &HashMap<RecordId, &Record>,
    reasons: Option<&PartitionResult>,
) -> Result<u64, PublishError> {
    let counting = CountingWriter::new(BufWriter::new(File::create(path)?));
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(counting);

    let mut header: Vec<&str> = columns.iter().map(String::as_str).collect();
    if reasons.is_some() {
        header.push(FAILED_RULES_COLUMN);
    }
    writer.write_record(&header)?;

    for id in records {
        let Some(record) = by_id.get(id) else {
            return Err(PublishError::MissingRecord(*id));
        };
        let mut row: Vec<String> = record
            .values
            .iter()
            .map(|value| value.clone().unwrap_or_default())
            .collect();
        if let Some(partition) = reasons {
            let failed = partition
                .failing_rules(*id)
                .map(|rules| {
                    rules
                        .iter()
                        .map(|rule| rule.as_str())
                        .collect::<Vec<_>>()
                        .join(";")
                })
                .unwrap_or_default();
            row.push(failed);
        }
        writer.write_record(&row)?;
    }

    writer.flush()?;
    let counting = writer.into_inner().map_err(|err| err.into_error())?;
    let bytes = counting.bytes_written();
    let file = counting.inner.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    Ok(bytes)
}

struct CountingWriter<W: Write> {
    inner: W,
    bytes: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    fn bytes_written(&self) -> u64 {
        self.bytes
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let size = self.inner.write(buf)?;
        self.bytes = self.bytes.saturating_add(size as u64);
        Ok(size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use silverline_core::RuleId;

    use super::*;
    use crate::metrics::METRICS_VERSION;

    fn metrics(run_id: &str) -> RunMetrics {
        RunMetrics {
            metrics_version: METRICS_VERSION.to_string(),
            run_id: run_id.to_string(),
            dataset_id: "orders".to_string(),
            total: 2,
            passed: 1,
            failed: 1,
            pass_rate: 0.5,
            pii_fields_masked: 0,
            masked_columns: Vec::new(),
            processing_time_ms: 1,
            rule_failures: BTreeMap::new(),
            evaluation_faults: 0,
            rule_origin: "fallback".to_string(),
            warnings: Vec::new(),
        }
    }

    fn fixture() -> (RecordBatch, PartitionResult) {
        let batch = RecordBatch::from_rows(
            vec!["id".to_string(), "amount".to_string()],
            vec![
                vec!["1".to_string(), "10".to_string()],
                vec!["2".to_string(), String::new()],
            ],
        )
        .expect("batch");
        let partition = PartitionResult {
            clean_records: vec![RecordId(1)],
            quarantine_records: vec![RecordId(2)],
            quarantine_reasons: BTreeMap::from([(
                RecordId(2),
                BTreeSet::from([RuleId::new("a"), RuleId::new("b")]),
            )]),
            pass_rate: 0.5,
            rule_failures: BTreeMap::new(),
        };
        (batch, partition)
    }

    #[test]
    fn publishes_all_outputs_and_clears_staging() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = OutputLayout::new(dir.path());
        let (batch, partition) = fixture();

        let outputs = layout
            .publish(&batch, &partition, &metrics("r1"), "# report")
            .expect("publish");

        let silver = fs::read_to_string(&outputs.silver).expect("silver");
        assert_eq!(silver, "id,amount\n1,10\n");
        assert_eq!(outputs.silver_bytes, silver.len() as u64);
        let quarantine = fs::read_to_string(&outputs.quarantine).expect("quarantine");
        assert_eq!(quarantine, "id,amount,_failed_rules\n2,,a;b\n");
        assert!(layout.is_published("orders", "r1"));
        assert!(!layout.staging_dir("r1").exists());
        assert_eq!(layout.existing("orders", "r1"), Some(outputs));
    }

    #[test]
    fn rejects_path_like_ids_without_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = OutputLayout::new(dir.path());
        let (batch, partition) = fixture();

        let err = layout
            .publish(&batch, &partition, &metrics("../escape"), "")
            .unwrap_err();
        assert!(matches!(err, PublishError::InvalidPath(_)));
        assert!(!dir.path().join("silver").exists());
    }

    #[test]
    fn failed_commit_leaves_nothing_visible() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = OutputLayout::new(dir.path());
        let (batch, partition) = fixture();
        // A directory where the metrics file should land makes the last rename fail.
        fs::create_dir_all(layout.metrics_path("orders", "r2").join("blocker")).expect("blocker");

        let result = layout.publish(&batch, &partition, &metrics("r2"), "# report");
        assert!(result.is_err());
        assert!(!layout.silver_path("orders", "r2").exists());
        assert!(!layout.quarantine_path("orders", "r2").exists());
        assert!(!layout.report_path("orders", "r2").exists());
        assert!(!layout.staging_dir("r2").exists());
    }
}
