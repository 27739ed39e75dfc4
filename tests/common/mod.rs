//! Shared stubs for end-to-end tests: an in-memory provisioner and a
//! scripted remote executor standing in for terraform and ssh.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use cloudtune::broker::{Broker, Endpoints, Provisioner};
use cloudtune::model::InfraConfig;
use cloudtune::ssh::{ExecOutput, RemoteExec};

pub struct StubProvisioner {
    pub current: Mutex<Option<InfraConfig>>,
    pub apply_calls: AtomicUsize,
    pub destroy_calls: AtomicUsize,
    pub teardown_calls: AtomicUsize,
    pub fail_apply: bool,
}

impl StubProvisioner {
    pub fn new() -> Self {
        StubProvisioner {
            current: Mutex::new(None),
            apply_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            teardown_calls: AtomicUsize::new(0),
            fail_apply: false,
        }
    }

    pub fn failing() -> Self {
        StubProvisioner {
            fail_apply: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl Provisioner for StubProvisioner {
    async fn apply(&self, spec: &InfraConfig, _vars: &BTreeMap<String, String>) -> Result<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_apply {
            anyhow::bail!("cloud quota exceeded");
        }
        *self.current.lock().unwrap() = Some(spec.clone());
        Ok(())
    }

    async fn current_spec(&self) -> Result<Option<InfraConfig>> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn endpoints(&self) -> Result<Option<Endpoints>> {
        Ok(self.current.lock().unwrap().as_ref().map(|_| Endpoints {
            service_addr: "10.0.0.20".to_string(),
            bench_host: "192.0.2.10".to_string(),
        }))
    }

    async fn destroy(&self) -> Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = None;
        Ok(())
    }

    async fn teardown_all(&self) -> Result<()> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = None;
        Ok(())
    }
}

/// Remote stub: readiness probes succeed, the benchmark command returns a
/// canned payload and counts its invocations.
pub struct StubRemote {
    pub bench_output: String,
    pub bench_invocations: AtomicUsize,
}

impl StubRemote {
    pub fn new(bench_output: String) -> Self {
        StubRemote {
            bench_output,
            bench_invocations: AtomicUsize::new(0),
        }
    }

    pub fn memtier(ops_per_sec: f64) -> Self {
        Self::new(memtier_output(ops_per_sec))
    }
}

#[async_trait]
impl RemoteExec for StubRemote {
    async fn run(&self, _host: &str, command: &str, _timeout: Duration) -> Result<ExecOutput> {
        if command.contains("memtier_benchmark") || command.contains("pgbench") {
            self.bench_invocations.fetch_add(1, Ordering::SeqCst);
            return Ok(ExecOutput {
                code: 0,
                output: self.bench_output.clone(),
            });
        }
        Ok(ExecOutput {
            code: 0,
            output: "ok".to_string(),
        })
    }
}

/// memtier JSON stats wrapped in realistic ssh noise.
pub fn memtier_output(ops_per_sec: f64) -> String {
    format!(
        "Warning: Permanently added '10.0.0.20' (ED25519) to the list of known hosts.\n\
         {{\"ALL STATS\":{{\"Totals\":{{\"Ops/sec\":{ops_per_sec},\"Average Latency\":1.21,\
         \"KB/sec\":23456.7,\"Percentile Latencies\":{{\"p50.00\":1.05,\"p99.00\":2.31,\"p99.90\":4.92}}}}}}}}\n\
         Connection to 192.0.2.10 closed.\n"
    )
}

pub fn fast_broker(provisioner: Arc<dyn Provisioner>, remote: Arc<dyn RemoteExec>) -> Broker {
    Broker::new(provisioner, remote)
        .with_timeouts(Duration::from_millis(500), Duration::from_millis(10))
}
