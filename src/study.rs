//! Study storage — the persistent optimization session.
//!
//! A study is an append-only log of (parameter assignment, score)
//! observations, keyed by (service, cloud, mode, metric). The metric is part
//! of the identity: resuming under a different optimization target opens a
//! different file, so incomparable objective histories can never silently
//! mix.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::ParamValue;
use crate::space::Mode;

/// Study identity. Every field participates in the storage key.
#[derive(Debug, Clone)]
pub struct StudyKey {
    pub service: String,
    pub cloud: String,
    pub mode: Mode,
    pub metric: String,
}

impl StudyKey {
    pub fn study_name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.service,
            self.cloud,
            self.mode.as_str(),
            self.metric
        )
    }
}

/// One completed trial as the oracle sees it: the raw parameter assignment
/// (dependent parameters under their qualified names) and the
/// direction-adjusted score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub params: BTreeMap<String, ParamValue>,
    pub value: f64,
}

/// Create-or-resume observation log backed by one JSONL file per study key.
pub struct Study {
    path: PathBuf,
    name: String,
    observations: Vec<Observation>,
}

impl Study {
    pub fn open(dir: &Path, key: &StudyKey) -> Result<Study> {
        Self::open_named(dir, &key.study_name())
    }

    /// Open under an explicit name (`--study-name` override).
    pub fn open_named(dir: &Path, name: &str) -> Result<Study> {
        let name = name.to_string();
        let path = dir.join(format!("{name}.study.jsonl"));

        let mut observations = Vec::new();
        match fs::read_to_string(&path) {
            Ok(data) => {
                for (lineno, line) in data.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Observation>(line) {
                        Ok(obs) => observations.push(obs),
                        Err(err) => warn!(
                            study = %name,
                            line = lineno + 1,
                            %err,
                            "skipping malformed study observation"
                        ),
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("reading study {}", path.display()))
            }
        }

        Ok(Study {
            path,
            name,
            observations,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Highest score seen so far (scores are direction-adjusted, so higher
    /// is always better).
    pub fn best(&self) -> Option<&Observation> {
        self.observations
            .iter()
            .max_by(|a, b| a.value.total_cmp(&b.value))
    }

    /// Durable append of one observation.
    pub fn record(&mut self, params: BTreeMap<String, ParamValue>, value: f64) -> Result<()> {
        let obs = Observation {
            timestamp: Utc::now(),
            params,
            value,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(&obs).context("serializing observation")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        file.sync_all()?;

        self.observations.push(obs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(metric: &str) -> StudyKey {
        StudyKey {
            service: "redis".into(),
            cloud: "selectel".into(),
            mode: Mode::Config,
            metric: metric.into(),
        }
    }

    fn params(io_threads: i64) -> BTreeMap<String, ParamValue> {
        let mut p = BTreeMap::new();
        p.insert("io_threads".to_string(), ParamValue::Int(io_threads));
        p
    }

    #[test]
    fn create_then_resume_round_trip() {
        let tmp = TempDir::new().unwrap();

        let mut study = Study::open(tmp.path(), &key("ops_per_sec")).unwrap();
        assert!(study.observations().is_empty());
        study.record(params(1), 80000.0).unwrap();
        study.record(params(4), 95000.0).unwrap();

        let resumed = Study::open(tmp.path(), &key("ops_per_sec")).unwrap();
        assert_eq!(resumed.observations().len(), 2);
        assert_eq!(resumed.best().unwrap().value, 95000.0);
    }

    #[test]
    fn metric_is_part_of_study_identity() {
        let tmp = TempDir::new().unwrap();

        let mut throughput = Study::open(tmp.path(), &key("ops_per_sec")).unwrap();
        throughput.record(params(1), 80000.0).unwrap();

        // Different metric, different file: histories never mix.
        let latency = Study::open(tmp.path(), &key("p99_latency_ms")).unwrap();
        assert!(latency.observations().is_empty());
    }

    #[test]
    fn malformed_observation_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();

        let mut study = Study::open(tmp.path(), &key("ops_per_sec")).unwrap();
        study.record(params(1), 80000.0).unwrap();

        let path = tmp.path().join("redis-selectel-config-ops_per_sec.study.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json\n").unwrap();
        drop(file);

        let resumed = Study::open(tmp.path(), &key("ops_per_sec")).unwrap();
        assert_eq!(resumed.observations().len(), 1);
    }
}
