//! Service plugins.
//!
//! One plugin per optimizable service. A plugin owns everything
//! service-shaped: the declared two-tier parameter space, the metric
//! registry, the terraform var mapping, how to apply a config to a live
//! deployment, the readiness probe, the benchmark command, and the output
//! parser. The orchestration core never branches on a service name.

mod postgres;
mod redis;

use std::collections::BTreeMap;

pub use postgres::Postgres;
pub use redis::Redis;

use crate::broker::Endpoints;
use crate::error::{SpaceError, TrialError};
use crate::metrics::MetricDef;
use crate::model::{InfraConfig, ServiceConfig};
use crate::space::ParameterSpace;

pub trait ServicePlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Metrics this service can be optimized for. The first entry whose name
    /// equals [`primary_metric`](Self::primary_metric) gates cache usability.
    fn metrics(&self) -> &'static [MetricDef];

    fn primary_metric(&self) -> &'static str;

    /// The declared search space with every parameter's tier made explicit.
    fn space(&self, cloud: &str) -> Result<ParameterSpace, SpaceError>;

    /// Baseline infrastructure used where the infra tier is held fixed.
    fn default_infra(&self, cloud: &str) -> Result<InfraConfig, SpaceError>;

    /// Baseline service config used where the config tier is held fixed.
    fn default_config(&self) -> ServiceConfig;

    /// Derive dependent infra fields after sampling (e.g. node count from
    /// topology). Default: nothing to derive.
    fn normalize_infra(&self, _infra: &mut InfraConfig) {}

    /// Terraform vars that deploy this spec.
    fn infra_tf_vars(&self, infra: &InfraConfig) -> BTreeMap<String, String>;

    /// Terraform vars that remove the service deployment while keeping the
    /// load-generator host.
    fn destroy_tf_vars(&self) -> BTreeMap<String, String>;

    /// Shell commands, run on the service host in order, that apply a config
    /// in place and reload the service.
    fn config_commands(
        &self,
        endpoints: &Endpoints,
        infra: &InfraConfig,
        config: &ServiceConfig,
    ) -> Vec<String>;

    /// Command run from the load-generator host; exit 0 means the service is
    /// ready to take traffic.
    fn ready_probe(&self, endpoints: &Endpoints) -> String;

    /// The benchmark invocation, run from the load-generator host.
    fn bench_command(&self, endpoints: &Endpoints) -> String;

    /// Normalize raw tool output into named metrics.
    fn parse_output(&self, raw: &str) -> Result<BTreeMap<String, f64>, TrialError>;
}

pub fn plugin_for(name: &str) -> Option<Box<dyn ServicePlugin>> {
    match name {
        "redis" => Some(Box::new(Redis)),
        "postgres" => Some(Box::new(Postgres)),
        _ => None,
    }
}
