//! Core data model: parameter values, trial specs, persisted trial records.
//!
//! The cache key is the canonical JSON serialization of the full
//! (cloud, infra, config) triple. Struct fields serialize in declaration
//! order and `ServiceConfig` is a `BTreeMap`, so two specs that differ only
//! in mapping insertion order always produce the same key.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Parameter values ─────────────────────────────────────────────────────────

/// A single sampled parameter value. Categorical domains are lists of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

/// Service-level settings applied in place to a running deployment.
/// `BTreeMap` keeps serialization canonical without extra work.
pub type ServiceConfig = BTreeMap<String, ParamValue>;

// ─── Infrastructure ───────────────────────────────────────────────────────────

/// The subset of parameters whose change requires destroying and recreating
/// the deployment. Fixed, validated schema — never a loose mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    pub topology: String,
    pub cpu: u32,
    pub ram_gb: u32,
    pub disk_type: String,
    pub disk_size_gb: u32,
    pub nodes: u32,
}

impl InfraConfig {
    pub fn single(cpu: u32, ram_gb: u32, disk_type: &str, disk_size_gb: u32) -> Self {
        InfraConfig {
            topology: "single".to_string(),
            cpu,
            ram_gb,
            disk_type: disk_type.to_string(),
            disk_size_gb,
            nodes: 1,
        }
    }

    /// Compact one-line summary for logs and report tables.
    pub fn summary(&self) -> String {
        format!(
            "{} {}x{}cpu/{}gb {}:{}gb",
            self.topology, self.nodes, self.cpu, self.ram_gb, self.disk_type, self.disk_size_gb
        )
    }
}

// ─── Trial spec & cache key ───────────────────────────────────────────────────

/// Immutable description of one trial: what to deploy and how to configure it.
/// Fully determines the expected outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialSpec {
    pub service: String,
    pub cloud: String,
    pub infra: InfraConfig,
    pub config: ServiceConfig,
}

impl TrialSpec {
    /// Canonical, order-independent serialization of the full triple.
    /// Identical specs yield identical keys regardless of how the config
    /// map was built.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).expect("trial spec serializes")
    }
}

// ─── Persisted trial record ───────────────────────────────────────────────────

/// One executed trial, as persisted in the result cache. Created at trial
/// end and never mutated afterwards. A record is usable for cache hits only
/// if it has no error and a strictly positive primary metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub cloud: String,
    pub infra: InfraConfig,
    pub config: ServiceConfig,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub timings: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl TrialRecord {
    pub fn cache_key(&self) -> String {
        TrialSpec {
            service: self.service.clone(),
            cloud: self.cloud.clone(),
            infra: self.infra.clone(),
            config: self.config.clone(),
        }
        .cache_key()
    }

    /// Whether this record may satisfy a cache lookup: an error or a
    /// non-positive primary metric disqualifies it, so failed configurations
    /// are retried rather than permanently poisoned.
    pub fn is_usable(&self, primary_metric: &str) -> bool {
        self.error.is_none() && self.metrics.get(primary_metric).copied().unwrap_or(0.0) > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_order(reversed: bool) -> TrialSpec {
        let mut config = ServiceConfig::new();
        if reversed {
            config.insert("persistence".into(), "rdb".into());
            config.insert("io_threads".into(), 4.into());
            config.insert("maxmemory_policy".into(), "allkeys-lru".into());
        } else {
            config.insert("maxmemory_policy".into(), "allkeys-lru".into());
            config.insert("io_threads".into(), 4.into());
            config.insert("persistence".into(), "rdb".into());
        }
        TrialSpec {
            service: "redis".into(),
            cloud: "selectel".into(),
            infra: InfraConfig::single(4, 16, "fast", 50),
            config,
        }
    }

    #[test]
    fn cache_key_is_insertion_order_independent() {
        assert_eq!(spec_with_order(false).cache_key(), spec_with_order(true).cache_key());
    }

    #[test]
    fn cache_key_distinguishes_infra() {
        let a = spec_with_order(false);
        let mut b = spec_with_order(false);
        b.infra.ram_gb = 32;
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn param_value_round_trips_untagged() {
        let values = vec![
            ParamValue::Int(8),
            ParamValue::Float(1.5),
            ParamValue::Str("allkeys-lru".into()),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[8,1.5,"allkeys-lru"]"#);
        let back: Vec<ParamValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn record_usability_requires_success_and_positive_metric() {
        let spec = spec_with_order(false);
        let mut record = TrialRecord {
            timestamp: Utc::now(),
            service: spec.service.clone(),
            cloud: spec.cloud.clone(),
            infra: spec.infra.clone(),
            config: spec.config.clone(),
            metrics: BTreeMap::new(),
            timings: BTreeMap::new(),
            error: None,
            error_kind: None,
        };
        assert!(!record.is_usable("ops_per_sec"), "missing metric");

        record.metrics.insert("ops_per_sec".into(), 0.0);
        assert!(!record.is_usable("ops_per_sec"), "zero metric");

        record.metrics.insert("ops_per_sec".into(), 90000.0);
        assert!(record.is_usable("ops_per_sec"));

        record.error = Some("benchmark timed out".into());
        assert!(!record.is_usable("ops_per_sec"), "errored record");
    }
}
