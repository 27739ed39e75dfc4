//! Benchmark executor — applies a service config to a live deployment, waits
//! for readiness, runs the external benchmark tool, and normalizes its
//! output.
//!
//! Each step is independently fallible and short-circuits the rest; every
//! failure comes back as a typed [`TrialError`], never a panic, so the
//! orchestrator applies one retry/prune policy to all of them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::broker::Endpoints;
use crate::error::TrialError;
use crate::model::{InfraConfig, ServiceConfig};
use crate::service::ServicePlugin;
use crate::ssh::RemoteExec;

/// Metrics plus the per-phase timing breakdown of one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchResult {
    pub metrics: BTreeMap<String, f64>,
    pub timings: BTreeMap<String, f64>,
}

pub struct BenchmarkExecutor {
    remote: Arc<dyn RemoteExec>,
    command_timeout: Duration,
    ready_timeout: Duration,
    poll_interval: Duration,
    /// Benchmarks legitimately run for minutes; this bounds the tool itself.
    bench_timeout: Duration,
}

impl BenchmarkExecutor {
    pub fn new(remote: Arc<dyn RemoteExec>) -> Self {
        BenchmarkExecutor {
            remote,
            command_timeout: Duration::from_secs(60),
            ready_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(5),
            bench_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_timeouts(
        mut self,
        ready_timeout: Duration,
        poll_interval: Duration,
        bench_timeout: Duration,
    ) -> Self {
        self.ready_timeout = ready_timeout;
        self.poll_interval = poll_interval;
        self.bench_timeout = bench_timeout;
        self
    }

    pub async fn run(
        &self,
        plugin: &dyn ServicePlugin,
        endpoints: &Endpoints,
        infra: &InfraConfig,
        config: &ServiceConfig,
    ) -> Result<BenchResult, TrialError> {
        let mut timings = BTreeMap::new();

        let started = Instant::now();
        self.apply_config(plugin, endpoints, infra, config).await?;
        timings.insert("config_apply_s".to_string(), started.elapsed().as_secs_f64());

        let started = Instant::now();
        self.wait_ready(plugin, endpoints).await?;
        timings.insert("ready_wait_s".to_string(), started.elapsed().as_secs_f64());

        let started = Instant::now();
        let raw = self.run_tool(plugin, endpoints).await?;
        timings.insert("benchmark_s".to_string(), started.elapsed().as_secs_f64());

        let metrics = plugin.parse_output(&raw)?;
        Ok(BenchResult { metrics, timings })
    }

    async fn apply_config(
        &self,
        plugin: &dyn ServicePlugin,
        endpoints: &Endpoints,
        infra: &InfraConfig,
        config: &ServiceConfig,
    ) -> Result<(), TrialError> {
        for command in plugin.config_commands(endpoints, infra, config) {
            let out = self
                .remote
                .run(&endpoints.service_addr, &command, self.command_timeout)
                .await
                .map_err(|e| TrialError::ConfigApply(format!("{e:#}")))?;
            if !out.ok() {
                return Err(TrialError::ConfigApply(format!(
                    "exit {}: {}",
                    out.code,
                    snippet(&out.output)
                )));
            }
        }
        Ok(())
    }

    async fn wait_ready(
        &self,
        plugin: &dyn ServicePlugin,
        endpoints: &Endpoints,
    ) -> Result<(), TrialError> {
        let probe = plugin.ready_probe(endpoints);
        let deadline = Instant::now() + self.ready_timeout;
        let started = Instant::now();
        loop {
            match self
                .remote
                .run(&endpoints.bench_host, &probe, Duration::from_secs(20))
                .await
            {
                Ok(out) if out.ok() => {
                    info!(elapsed_s = started.elapsed().as_secs(), "service ready");
                    return Ok(());
                }
                Ok(_) => debug!(elapsed_s = started.elapsed().as_secs(), "service not ready yet"),
                Err(err) => debug!(
                    elapsed_s = started.elapsed().as_secs(),
                    %err,
                    "readiness probe failed"
                ),
            }
            if Instant::now() >= deadline {
                return Err(TrialError::NotReady(format!(
                    "no healthy response after {}s",
                    self.ready_timeout.as_secs()
                )));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn run_tool(
        &self,
        plugin: &dyn ServicePlugin,
        endpoints: &Endpoints,
    ) -> Result<String, TrialError> {
        let command = plugin.bench_command(endpoints);
        info!(host = %endpoints.bench_host, "running benchmark");
        let out = self
            .remote
            .run(&endpoints.bench_host, &command, self.bench_timeout)
            .await
            .map_err(|e| TrialError::Benchmark(format!("{e:#}")))?;
        if !out.ok() {
            return Err(TrialError::Benchmark(format!(
                "exit {}: {}",
                out.code,
                snippet(&out.output)
            )));
        }
        Ok(out.output)
    }
}

/// Locate and decode the JSON object embedded in tool output. Tools mix log
/// noise into stdout, and trailing non-JSON bytes after the object are
/// normal — only the object itself is decoded.
pub fn extract_json(raw: &str) -> Result<serde_json::Value, TrialError> {
    let start = raw.find('{').ok_or_else(|| TrialError::Parse {
        message: "no JSON object in output".to_string(),
        snippet: snippet(raw),
    })?;
    let mut de = serde_json::Deserializer::from_str(&raw[start..]);
    serde_json::Value::deserialize(&mut de).map_err(|err| TrialError::Parse {
        message: err.to_string(),
        snippet: snippet(&raw[start..]),
    })
}

fn snippet(s: &str) -> String {
    s.chars().take(200).collect()
}
