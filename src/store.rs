//! Result cache — durable, append-only store of executed trials.
//!
//! One JSON record per line. Appends write a single complete line and sync;
//! a process killed mid-write leaves at most one torn trailing line, which
//! the reader skips with a warning. History is never rewritten: duplicate
//! keys are tolerated and `lookup` answers with the latest usable record.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::model::TrialRecord;
use crate::report;

pub struct ResultStore {
    path: PathBuf,
    primary_metric: String,
    export_path: Option<PathBuf>,
}

impl ResultStore {
    pub fn open(path: impl Into<PathBuf>, primary_metric: &str) -> Self {
        ResultStore {
            path: path.into(),
            primary_metric: primary_metric.to_string(),
            export_path: None,
        }
    }

    /// Enable best-effort markdown export after each append. Export failure
    /// never fails the trial.
    pub fn with_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = Some(path.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All readable records, oldest first. Malformed lines (including a torn
    /// trailing record from a crashed run) are skipped, never fatal.
    pub fn load(&self) -> Vec<TrialRecord> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "cannot read result cache");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TrialRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        %err,
                        "skipping malformed cache record"
                    );
                }
            }
        }
        records
    }

    /// Latest usable record for this key: no error and a strictly positive
    /// primary metric. Cached failures are invisible, so a configuration
    /// that failed once is retried rather than poisoned forever.
    pub fn lookup(&self, cache_key: &str) -> Option<TrialRecord> {
        self.load()
            .into_iter()
            .rev()
            .find(|r| r.is_usable(&self.primary_metric) && r.cache_key() == cache_key)
    }

    /// Durable append of one record. Never overwrites prior history.
    pub fn append(&self, record: &TrialRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let mut line = serde_json::to_string(record).context("serializing trial record")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to {}", self.path.display()))?;
        file.flush()?;
        file.sync_all()
            .with_context(|| format!("syncing {}", self.path.display()))?;

        self.export_best_effort();
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.load().len()
    }

    fn export_best_effort(&self) {
        let Some(export_path) = &self.export_path else {
            return;
        };
        let records = self.load();
        if let Err(err) = report::write_markdown(&records, &self.primary_metric, export_path) {
            warn!(path = %export_path.display(), %err, "result export failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InfraConfig, ServiceConfig, TrialSpec};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn spec(ram_gb: u32) -> TrialSpec {
        let mut config = ServiceConfig::new();
        config.insert("maxmemory_policy".into(), "allkeys-lru".into());
        TrialSpec {
            service: "redis".into(),
            cloud: "selectel".into(),
            infra: InfraConfig::single(4, ram_gb, "fast", 50),
            config,
        }
    }

    fn record(spec: &TrialSpec, ops: f64, error: Option<&str>) -> TrialRecord {
        let mut metrics = BTreeMap::new();
        if error.is_none() {
            metrics.insert("ops_per_sec".into(), ops);
        }
        TrialRecord {
            timestamp: Utc::now(),
            service: spec.service.clone(),
            cloud: spec.cloud.clone(),
            infra: spec.infra.clone(),
            config: spec.config.clone(),
            metrics,
            timings: BTreeMap::new(),
            error: error.map(|e| e.to_string()),
            error_kind: error.map(|_| "benchmark".to_string()),
        }
    }

    #[test]
    fn append_then_lookup_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = ResultStore::open(tmp.path().join("results.jsonl"), "ops_per_sec");

        let spec = spec(16);
        store.append(&record(&spec, 90000.0, None)).unwrap();

        let hit = store.lookup(&spec.cache_key()).unwrap();
        assert_eq!(hit.metrics["ops_per_sec"], 90000.0);
        assert!(store.lookup(&self::spec(32).cache_key()).is_none());
    }

    #[test]
    fn failed_records_are_invisible_to_lookup() {
        let tmp = TempDir::new().unwrap();
        let store = ResultStore::open(tmp.path().join("results.jsonl"), "ops_per_sec");

        let spec = spec(16);
        store
            .append(&record(&spec, 0.0, Some("benchmark timed out")))
            .unwrap();
        assert!(store.lookup(&spec.cache_key()).is_none());
        assert_eq!(store.count(), 1, "failure is persisted, just not usable");
    }

    #[test]
    fn zero_metric_records_are_invisible_to_lookup() {
        let tmp = TempDir::new().unwrap();
        let store = ResultStore::open(tmp.path().join("results.jsonl"), "ops_per_sec");

        let spec = spec(16);
        store.append(&record(&spec, 0.0, None)).unwrap();
        assert!(store.lookup(&spec.cache_key()).is_none());
    }

    #[test]
    fn latest_record_wins_and_history_is_kept() {
        let tmp = TempDir::new().unwrap();
        let store = ResultStore::open(tmp.path().join("results.jsonl"), "ops_per_sec");

        let spec = spec(16);
        store.append(&record(&spec, 80000.0, None)).unwrap();
        store.append(&record(&spec, 95000.0, None)).unwrap();

        assert_eq!(store.count(), 2);
        let hit = store.lookup(&spec.cache_key()).unwrap();
        assert_eq!(hit.metrics["ops_per_sec"], 95000.0);
    }

    #[test]
    fn torn_trailing_record_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("results.jsonl");
        let store = ResultStore::open(&path, "ops_per_sec");

        let spec = spec(16);
        store.append(&record(&spec, 90000.0, None)).unwrap();

        // Simulate a crash mid-append.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"timestamp\":\"2026-08-01T0").unwrap();
        drop(file);

        let records = store.load();
        assert_eq!(records.len(), 1);
        assert!(store.lookup(&spec.cache_key()).is_some());
    }

    #[test]
    fn export_failure_does_not_fail_append() {
        let tmp = TempDir::new().unwrap();
        let store = ResultStore::open(tmp.path().join("results.jsonl"), "ops_per_sec")
            .with_export(tmp.path().join("no-such-dir").join("x").join("RESULTS.md"));

        let spec = spec(16);
        store.append(&record(&spec, 90000.0, None)).unwrap();
        assert_eq!(store.count(), 1);
    }
}
