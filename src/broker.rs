//! Infrastructure broker — ensures a reachable deployment matching a
//! requested spec.
//!
//! Strategy is reuse-or-recreate, never adjust-in-place: most cloud volume
//! types cannot be resized live, and a half-applied resize shows up later as
//! a benchmark failure with the wrong root cause. A live deployment is reused
//! only when it is reachable *and* its actual reported spec matches the
//! request exactly; anything else is destroyed and rebuilt.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::TrialError;
use crate::model::InfraConfig;
use crate::ssh::{self, RemoteExec};

/// Connection endpoints of a live deployment: the service address itself and
/// the load-generator host the benchmark tool runs from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub service_addr: String,
    pub bench_host: String,
}

/// The declarative cloud boundary: apply a spec, read back what is actually
/// deployed, destroy. All operations are idempotent.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn apply(&self, spec: &InfraConfig, vars: &BTreeMap<String, String>) -> Result<()>;

    /// The spec the live deployment was actually created from, if any.
    async fn current_spec(&self) -> Result<Option<InfraConfig>>;

    async fn endpoints(&self) -> Result<Option<Endpoints>>;

    /// Destroy the service deployment (keeps the load-generator host).
    /// Tolerates nothing-to-destroy.
    async fn destroy(&self) -> Result<()>;

    /// Destroy everything, including the load-generator host.
    async fn teardown_all(&self) -> Result<()>;
}

pub struct Broker {
    provisioner: Arc<dyn Provisioner>,
    remote: Arc<dyn RemoteExec>,
    ready_timeout: Duration,
    poll_interval: Duration,
}

impl Broker {
    pub fn new(provisioner: Arc<dyn Provisioner>, remote: Arc<dyn RemoteExec>) -> Self {
        Broker {
            provisioner,
            remote,
            ready_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(10),
        }
    }

    pub fn with_timeouts(mut self, ready_timeout: Duration, poll_interval: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Ensure a reachable deployment matching `spec` exists and return its
    /// endpoints. Fast path does zero cloud calls.
    pub async fn ensure(
        &self,
        spec: &InfraConfig,
        vars: &BTreeMap<String, String>,
    ) -> Result<Endpoints, TrialError> {
        if let Some((actual, endpoints)) = self.live_deployment().await {
            if actual == *spec {
                info!(infra = %spec.summary(), "reusing live deployment");
                return Ok(endpoints);
            }
            info!(
                requested = %spec.summary(),
                actual = %actual.summary(),
                "spec mismatch, recreating deployment"
            );
        }

        self.provisioner
            .destroy()
            .await
            .map_err(|e| TrialError::Provisioning(format!("destroy failed: {e:#}")))?;

        info!(infra = %spec.summary(), "creating deployment");
        self.provisioner
            .apply(spec, vars)
            .await
            .map_err(|e| TrialError::Provisioning(format!("apply failed: {e:#}")))?;

        let endpoints = self
            .provisioner
            .endpoints()
            .await
            .map_err(|e| TrialError::Provisioning(format!("reading endpoints: {e:#}")))?
            .ok_or_else(|| {
                TrialError::Provisioning("deployment created but no endpoints reported".into())
            })?;

        // Recreated nodes carry fresh host keys.
        ssh::clear_known_hosts(self.remote.as_ref(), &endpoints.bench_host).await;

        self.wait_ready(&endpoints).await?;
        Ok(endpoints)
    }

    /// Tear down the whole deployment at study exit.
    pub async fn teardown(&self) -> Result<()> {
        self.provisioner.teardown_all().await
    }

    /// A live deployment with readable spec and endpoints that answers a
    /// control command. Anything less is treated as absent — an unreachable
    /// deployment is never retried in place.
    async fn live_deployment(&self) -> Option<(InfraConfig, Endpoints)> {
        let spec = match self.provisioner.current_spec().await {
            Ok(Some(spec)) => spec,
            Ok(None) => return None,
            Err(err) => {
                debug!(%err, "cannot read current deployment spec");
                return None;
            }
        };
        let endpoints = match self.provisioner.endpoints().await {
            Ok(Some(endpoints)) => endpoints,
            _ => return None,
        };
        if !ssh::reachable(self.remote.as_ref(), &endpoints.service_addr).await {
            warn!(host = %endpoints.service_addr, "deployment unreachable, treating as absent");
            return None;
        }
        Some((spec, endpoints))
    }

    /// Block until the deployment's explicit readiness marker appears, or
    /// fail the trial as a provisioning error.
    async fn wait_ready(&self, endpoints: &Endpoints) -> Result<(), TrialError> {
        let deadline = Instant::now() + self.ready_timeout;
        let started = Instant::now();
        loop {
            let probe = self
                .remote
                .run(
                    &endpoints.service_addr,
                    "test -f /root/cloud-init-ready",
                    Duration::from_secs(15),
                )
                .await;
            match probe {
                Ok(out) if out.ok() => {
                    info!(elapsed_s = started.elapsed().as_secs(), "deployment ready");
                    return Ok(());
                }
                Ok(_) => debug!(
                    elapsed_s = started.elapsed().as_secs(),
                    "readiness marker not present yet"
                ),
                Err(err) => debug!(
                    elapsed_s = started.elapsed().as_secs(),
                    %err,
                    "readiness probe failed"
                ),
            }
            if Instant::now() >= deadline {
                return Err(TrialError::Provisioning(format!(
                    "deployment not ready after {}s",
                    self.ready_timeout.as_secs()
                )));
            }
            sleep(self.poll_interval).await;
        }
    }
}
