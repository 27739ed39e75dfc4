//! Trial orchestrator — drives one trial end-to-end and owns the study loop.
//!
//! Per-trial state machine:
//! sample → cache check → (hit: done) → provision → benchmark →
//! (scored: done | failed: pruned).
//!
//! The cache check is the central efficiency guarantee: an identical
//! (cloud, infra, config) triple is benchmarked at most once across the
//! study's lifetime, including across process restarts, because the cache is
//! a durable file. Infrastructure and benchmark failures are expected,
//! study-level-recoverable events; only search-space bookkeeping errors
//! propagate.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bench::BenchmarkExecutor;
use crate::broker::Broker;
use crate::error::TrialError;
use crate::metrics::MetricDef;
use crate::model::{InfraConfig, ServiceConfig, TrialRecord, TrialSpec};
use crate::pricing;
use crate::search::SearchDriver;
use crate::service::ServicePlugin;
use crate::space::{Mode, ParameterSpace};
use crate::store::ResultStore;

/// How one trial ended. Pruned trials carry their error; the study continues
/// past them.
#[derive(Debug)]
pub enum Outcome {
    Completed { value: f64, score: f64 },
    CacheHit { value: f64, score: f64 },
    Pruned { kind: &'static str, message: String },
}

pub struct Orchestrator<'a> {
    pub plugin: &'a dyn ServicePlugin,
    pub cloud: String,
    pub metric: MetricDef,
    pub store: &'a ResultStore,
    pub broker: &'a Broker,
    pub executor: &'a BenchmarkExecutor,
}

impl Orchestrator<'_> {
    /// Run one trial. `Err` means a fatal error; every expected failure mode
    /// comes back as `Ok(Outcome::Pruned)`.
    pub async fn run_trial(&self, spec: &TrialSpec) -> Result<Outcome> {
        let cache_key = spec.cache_key();
        if let Some(cached) = self.store.lookup(&cache_key) {
            if let Some(value) = cached.metrics.get(self.metric.name).copied() {
                info!(
                    metric = self.metric.name,
                    value,
                    "cache hit, skipping provisioning and benchmark"
                );
                return Ok(Outcome::CacheHit {
                    value,
                    score: self.metric.score(value),
                });
            }
            debug!(
                metric = self.metric.name,
                "cached record lacks requested metric, re-running"
            );
        }

        let trial_started = Instant::now();
        let mut timings = BTreeMap::new();

        let provision_started = Instant::now();
        let tf_vars = self.plugin.infra_tf_vars(&spec.infra);
        let endpoints = match self.broker.ensure(&spec.infra, &tf_vars).await {
            Ok(endpoints) => endpoints,
            Err(err) => {
                timings.insert(
                    "provision_s".to_string(),
                    provision_started.elapsed().as_secs_f64(),
                );
                return Ok(self.prune(spec, err, timings));
            }
        };
        timings.insert(
            "provision_s".to_string(),
            provision_started.elapsed().as_secs_f64(),
        );

        let bench = match self
            .executor
            .run(self.plugin, &endpoints, &spec.infra, &spec.config)
            .await
        {
            Ok(bench) => bench,
            Err(err) => return Ok(self.prune(spec, err, timings)),
        };
        timings.extend(bench.timings);
        timings.insert(
            "total_s".to_string(),
            trial_started.elapsed().as_secs_f64(),
        );

        let mut metrics = bench.metrics;
        self.add_cost_metrics(&spec.infra, &mut metrics);

        let Some(value) = metrics.get(self.metric.name).copied() else {
            let err = TrialError::Parse {
                message: format!(
                    "metric '{}' absent from benchmark output",
                    self.metric.name
                ),
                snippet: format!("{metrics:?}"),
            };
            return Ok(self.prune(spec, err, timings));
        };

        let record = TrialRecord {
            timestamp: Utc::now(),
            service: spec.service.clone(),
            cloud: spec.cloud.clone(),
            infra: spec.infra.clone(),
            config: spec.config.clone(),
            metrics,
            timings,
            error: None,
            error_kind: None,
        };
        // A successful result that cannot be persisted would break the
        // at-most-once guarantee on the next run; that is fatal.
        self.store.append(&record)?;

        info!(
            metric = self.metric.name,
            value,
            total_s = record.timings.get("total_s").copied().unwrap_or(0.0) as u64,
            "trial complete"
        );
        Ok(Outcome::Completed {
            value,
            score: self.metric.score(value),
        })
    }

    fn add_cost_metrics(&self, infra: &InfraConfig, metrics: &mut BTreeMap<String, f64>) {
        let cost = pricing::infra_cost(&self.cloud, infra);
        metrics.insert("cost_monthly".to_string(), cost);
        if cost > 0.0 {
            if let Some(primary) = metrics.get(self.plugin.primary_metric()).copied() {
                metrics.insert("cost_efficiency".to_string(), primary / cost);
            }
        }
    }

    /// Persist the failure (never a candidate for cache hits) and convert it
    /// into a pruned outcome.
    fn prune(
        &self,
        spec: &TrialSpec,
        err: TrialError,
        timings: BTreeMap<String, f64>,
    ) -> Outcome {
        let record = TrialRecord {
            timestamp: Utc::now(),
            service: spec.service.clone(),
            cloud: spec.cloud.clone(),
            infra: spec.infra.clone(),
            config: spec.config.clone(),
            metrics: BTreeMap::new(),
            timings,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
        };
        if let Err(append_err) = self.store.append(&record) {
            warn!(%append_err, "could not persist pruned trial");
        }
        Outcome::Pruned {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

// ─── Study loop ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct StudySummary {
    pub attempted: u64,
    pub completed: u64,
    pub cache_hits: u64,
    pub pruned: u64,
    pub interrupted: bool,
}

/// Run up to `trials` trials. Stops early on operator interrupt; pruned
/// trials count towards the budget and never halt the loop. The caller owns
/// deployment teardown — it must run however this returns.
pub async fn run_study(
    orchestrator: &Orchestrator<'_>,
    driver: &mut SearchDriver,
    space: &ParameterSpace,
    mode: Mode,
    base_infra: &InfraConfig,
    base_config: &ServiceConfig,
    trials: u64,
) -> Result<StudySummary> {
    let mut summary = StudySummary::default();

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    for number in 0..trials {
        let mut sampled = driver.sample(
            space,
            mode,
            &orchestrator.cloud,
            base_infra,
            base_config,
        )?;
        orchestrator.plugin.normalize_infra(&mut sampled.infra);

        let spec = TrialSpec {
            service: orchestrator.plugin.name().to_string(),
            cloud: orchestrator.cloud.clone(),
            infra: sampled.infra,
            config: sampled.config,
        };
        info!(
            trial = number,
            infra = %spec.infra.summary(),
            "starting trial"
        );

        let outcome = tokio::select! {
            _ = &mut interrupt => {
                info!("interrupt received, stopping study");
                summary.interrupted = true;
                break;
            }
            outcome = orchestrator.run_trial(&spec) => outcome?,
        };

        summary.attempted += 1;
        match outcome {
            Outcome::Completed { score, .. } => {
                summary.completed += 1;
                driver.report(sampled.params, score)?;
            }
            Outcome::CacheHit { score, .. } => {
                summary.cache_hits += 1;
                driver.report(sampled.params, score)?;
            }
            Outcome::Pruned { kind, message } => {
                summary.pruned += 1;
                warn!(trial = number, kind, %message, "trial pruned");
            }
        }
    }

    Ok(summary)
}
