//! Error taxonomy.
//!
//! Two families with different propagation rules: [`TrialError`] covers the
//! expected failure modes of one trial (flaky clouds, flaky benchmarks) and is
//! caught at the orchestrator boundary, where it prunes the trial and lets the
//! study continue. [`SpaceError`] covers misconfiguration of the search itself
//! and aborts the study immediately.

use thiserror::Error;

/// A recoverable, per-trial failure. Converted to a pruned trial by the
/// orchestrator; never aborts the study loop.
#[derive(Debug, Error)]
pub enum TrialError {
    /// The broker could not produce a reachable deployment.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// Service configuration could not be applied to the live deployment.
    #[error("config apply failed: {0}")]
    ConfigApply(String),

    /// The service did not report ready within the timeout.
    #[error("service not ready: {0}")]
    NotReady(String),

    /// The benchmark tool failed or timed out.
    #[error("benchmark execution failed: {0}")]
    Benchmark(String),

    /// Benchmark output could not be parsed. Carries the offending snippet.
    #[error("unparseable benchmark output: {message}")]
    Parse { message: String, snippet: String },
}

impl TrialError {
    /// Stable kind tag, persisted with failed trial records.
    pub fn kind(&self) -> &'static str {
        match self {
            TrialError::Provisioning(_) => "provisioning",
            TrialError::ConfigApply(_) => "config_apply",
            TrialError::NotReady(_) => "not_ready",
            TrialError::Benchmark(_) => "benchmark",
            TrialError::Parse { .. } => "parse",
        }
    }
}

/// A fatal search-space or bookkeeping error. A misconfigured space cannot be
/// pruned around; these propagate out of the study loop.
#[derive(Debug, Error)]
pub enum SpaceError {
    #[error("unknown cloud '{0}'")]
    UnknownCloud(String),

    #[error("unknown metric '{metric}' for service '{service}'")]
    UnknownMetric { service: String, metric: String },

    #[error("duplicate parameter '{0}' in search space")]
    DuplicateParam(String),

    #[error("parameter '{0}' has an empty value domain")]
    EmptyDomain(String),

    #[error("'{0}' is not a recognized infrastructure parameter")]
    UnknownInfraParam(String),

    #[error("parameter '{name}' registered with conflicting value domains")]
    DomainConflict { name: String },

    #[error("parameter '{name}': expected {expected} value")]
    WrongValueType { name: String, expected: &'static str },

    #[error("invalid infrastructure for {cloud}: {reason}")]
    InvalidInfra { cloud: String, reason: String },
}
