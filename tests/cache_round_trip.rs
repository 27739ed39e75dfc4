//! End-to-end cache semantics: one benchmark per (cloud, infra, config)
//! triple, ever, including across orchestrator instances.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use cloudtune::bench::BenchmarkExecutor;
use cloudtune::broker::Broker;
use cloudtune::metrics;
use cloudtune::model::{InfraConfig, ServiceConfig, TrialSpec};
use cloudtune::service::{Redis, ServicePlugin};
use cloudtune::store::ResultStore;
use cloudtune::trial::{Orchestrator, Outcome};

use common::{fast_broker, StubProvisioner, StubRemote};

fn redis_spec() -> TrialSpec {
    let mut config = ServiceConfig::new();
    config.insert("maxmemory_policy".into(), "allkeys-lru".into());
    config.insert("io_threads".into(), 2.into());
    config.insert("persistence".into(), "none".into());
    TrialSpec {
        service: "redis".into(),
        cloud: "selectel".into(),
        infra: InfraConfig::single(4, 16, "fast", 50),
        config,
    }
}

fn executor(remote: Arc<StubRemote>) -> BenchmarkExecutor {
    BenchmarkExecutor::new(remote).with_timeouts(
        Duration::from_millis(500),
        Duration::from_millis(10),
        Duration::from_secs(5),
    )
}

fn orchestrator<'a>(
    store: &'a ResultStore,
    broker: &'a Broker,
    executor: &'a BenchmarkExecutor,
) -> Orchestrator<'a> {
    Orchestrator {
        plugin: &Redis,
        cloud: "selectel".to_string(),
        metric: *metrics::resolve(Redis.metrics(), "redis", "ops_per_sec").unwrap(),
        store,
        broker,
        executor,
    }
}

#[tokio::test]
async fn second_run_hits_cache_without_touching_infrastructure() {
    let tmp = TempDir::new().unwrap();
    let store = ResultStore::open(tmp.path().join("results.jsonl"), "ops_per_sec");

    let provisioner = Arc::new(StubProvisioner::new());
    let remote = Arc::new(StubRemote::memtier(90000.0));
    let broker = fast_broker(provisioner.clone(), remote.clone());
    let executor = executor(remote.clone());
    let orch = orchestrator(&store, &broker, &executor);

    let spec = redis_spec();

    // First run provisions, benchmarks, persists.
    let outcome = orch.run_trial(&spec).await.unwrap();
    match outcome {
        Outcome::Completed { value, .. } => assert_eq!(value, 90000.0),
        other => panic!("expected completed trial, got {other:?}"),
    }
    assert_eq!(store.count(), 1);
    let record = store.lookup(&spec.cache_key()).unwrap();
    assert_eq!(record.metrics["ops_per_sec"], 90000.0);
    assert!(record.error.is_none());
    assert_eq!(provisioner.apply_calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.bench_invocations.load(Ordering::SeqCst), 1);

    // Second run with the identical spec: same value, zero side effects.
    let outcome = orch.run_trial(&spec).await.unwrap();
    match outcome {
        Outcome::CacheHit { value, .. } => assert_eq!(value, 90000.0),
        other => panic!("expected cache hit, got {other:?}"),
    }
    assert_eq!(provisioner.apply_calls.load(Ordering::SeqCst), 1);
    assert_eq!(provisioner.destroy_calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.bench_invocations.load(Ordering::SeqCst), 1);
    assert_eq!(store.count(), 1, "cache hits append nothing");
}

#[tokio::test]
async fn cache_survives_process_restart() {
    let tmp = TempDir::new().unwrap();
    let results = tmp.path().join("results.jsonl");
    let spec = redis_spec();

    // "First process": run and persist.
    {
        let store = ResultStore::open(&results, "ops_per_sec");
        let provisioner = Arc::new(StubProvisioner::new());
        let remote = Arc::new(StubRemote::memtier(90000.0));
        let broker = fast_broker(provisioner.clone(), remote.clone());
        let executor = executor(remote);
        let orch = orchestrator(&store, &broker, &executor);
        orch.run_trial(&spec).await.unwrap();
    }

    // "Second process": fresh everything over the same cache file.
    let store = ResultStore::open(&results, "ops_per_sec");
    let provisioner = Arc::new(StubProvisioner::new());
    let remote = Arc::new(StubRemote::memtier(123456.0));
    let broker = fast_broker(provisioner.clone(), remote.clone());
    let executor = executor(remote.clone());
    let orch = orchestrator(&store, &broker, &executor);

    let outcome = orch.run_trial(&spec).await.unwrap();
    match outcome {
        Outcome::CacheHit { value, .. } => {
            assert_eq!(value, 90000.0, "cached value wins over the new stub")
        }
        other => panic!("expected cache hit, got {other:?}"),
    }
    assert_eq!(provisioner.apply_calls.load(Ordering::SeqCst), 0);
    assert_eq!(remote.bench_invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_trial_is_persisted_but_retried() {
    let tmp = TempDir::new().unwrap();
    let store = ResultStore::open(tmp.path().join("results.jsonl"), "ops_per_sec");
    let spec = redis_spec();

    // Failing cloud: trial prunes and the failure is recorded.
    {
        let provisioner = Arc::new(StubProvisioner::failing());
        let remote = Arc::new(StubRemote::memtier(90000.0));
        let broker = fast_broker(provisioner, remote.clone());
        let executor = executor(remote);
        let orch = orchestrator(&store, &broker, &executor);

        match orch.run_trial(&spec).await.unwrap() {
            Outcome::Pruned { kind, .. } => assert_eq!(kind, "provisioning"),
            other => panic!("expected pruned trial, got {other:?}"),
        }
    }
    assert_eq!(store.count(), 1);
    assert!(store.lookup(&spec.cache_key()).is_none(), "failures never hit");

    // Cloud recovered: the same spec runs for real this time.
    let provisioner = Arc::new(StubProvisioner::new());
    let remote = Arc::new(StubRemote::memtier(88000.0));
    let broker = fast_broker(provisioner.clone(), remote.clone());
    let executor = executor(remote.clone());
    let orch = orchestrator(&store, &broker, &executor);

    match orch.run_trial(&spec).await.unwrap() {
        Outcome::Completed { value, .. } => assert_eq!(value, 88000.0),
        other => panic!("expected completed trial, got {other:?}"),
    }
    assert_eq!(remote.bench_invocations.load(Ordering::SeqCst), 1);
    assert_eq!(store.count(), 2);
}

#[tokio::test]
async fn derived_cost_metrics_are_persisted() {
    let tmp = TempDir::new().unwrap();
    let store = ResultStore::open(tmp.path().join("results.jsonl"), "ops_per_sec");

    let provisioner = Arc::new(StubProvisioner::new());
    let remote = Arc::new(StubRemote::memtier(90000.0));
    let broker = fast_broker(provisioner, remote.clone());
    let executor = executor(remote);
    let orch = orchestrator(&store, &broker, &executor);

    let spec = redis_spec();
    orch.run_trial(&spec).await.unwrap();

    let record = store.lookup(&spec.cache_key()).unwrap();
    // 4*655 + 16*238 + 50*39 = 8378 ₽/month for a single node.
    assert_eq!(record.metrics["cost_monthly"], 8378.0);
    assert!((record.metrics["cost_efficiency"] - 90000.0 / 8378.0).abs() < 1e-9);
    assert!(record.timings.contains_key("provision_s"));
    assert!(record.timings.contains_key("benchmark_s"));
    assert!(record.timings.contains_key("total_s"));
}
