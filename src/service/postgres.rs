//! PostgreSQL plugin: pgbench over the built-in TPC-B-like workload.

use std::collections::BTreeMap;

use crate::broker::Endpoints;
use crate::error::{SpaceError, TrialError};
use crate::metrics::{Direction, MetricDef};
use crate::model::{InfraConfig, ServiceConfig};
use crate::pricing;
use crate::service::ServicePlugin;
use crate::space::{ParamDef, ParameterSpace, Tier};

pub struct Postgres;

const METRICS: &[MetricDef] = &[
    MetricDef {
        name: "tps",
        description: "Transactions per second",
        direction: Direction::Maximize,
        unit: "TPS",
    },
    MetricDef {
        name: "latency_avg_ms",
        description: "Average transaction latency",
        direction: Direction::Minimize,
        unit: "ms",
    },
    MetricDef {
        name: "cost_efficiency",
        description: "Transactions per second per ₽/month",
        direction: Direction::Maximize,
        unit: "TPS/₽mo",
    },
];

const SCALE_FACTOR: u32 = 100;
const BENCH_SECONDS: u32 = 120;

impl ServicePlugin for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn metrics(&self) -> &'static [MetricDef] {
        METRICS
    }

    fn primary_metric(&self) -> &'static str {
        "tps"
    }

    fn space(&self, cloud: &str) -> Result<ParameterSpace, SpaceError> {
        pricing::pricing_for(cloud)?;
        let disk_types: &[&str] = match cloud {
            "timeweb" => &["nvme"],
            _ => &["fast"],
        };
        ParameterSpace::new(vec![
            ParamDef::strs("topology", Tier::Infra, &["single", "replica"]),
            ParamDef::ints("cpu", Tier::Infra, &[2, 4, 8, 16]),
            ParamDef::ints("ram_gb", Tier::Infra, &[4, 8, 16, 32, 64]),
            ParamDef::strs("disk_type", Tier::Infra, disk_types),
            ParamDef::ints("disk_size_gb", Tier::Infra, &[50, 100, 200]),
            ParamDef::ints("shared_buffers_pct", Tier::Config, &[15, 20, 25, 30, 35, 40]),
            ParamDef::ints("effective_cache_size_pct", Tier::Config, &[50, 60, 70, 75]),
            ParamDef::ints("work_mem_mb", Tier::Config, &[4, 16, 32, 64, 128, 256]),
            ParamDef::ints(
                "maintenance_work_mem_mb",
                Tier::Config,
                &[64, 128, 256, 512, 1024],
            ),
            ParamDef::ints("max_connections", Tier::Config, &[50, 100, 200, 500]),
            ParamDef::floats("random_page_cost", Tier::Config, &[1.1, 1.5, 2.0, 4.0]),
            ParamDef::ints("effective_io_concurrency", Tier::Config, &[1, 50, 100, 200]),
            ParamDef::ints("wal_buffers_mb", Tier::Config, &[16, 32, 64, 128]),
            ParamDef::ints("max_wal_size_gb", Tier::Config, &[1, 2, 4, 8]),
            ParamDef::floats(
                "checkpoint_completion_target",
                Tier::Config,
                &[0.5, 0.7, 0.9],
            ),
            ParamDef::ints("max_worker_processes", Tier::Config, &[2, 4, 8]),
            ParamDef::ints("max_parallel_workers_per_gather", Tier::Config, &[0, 1, 2, 4]),
        ])
    }

    fn default_infra(&self, cloud: &str) -> Result<InfraConfig, SpaceError> {
        let pricing = pricing::pricing_for(cloud)?;
        let disk_type = pricing.disk_types().next().unwrap_or("fast");
        Ok(InfraConfig::single(4, 8, disk_type, 50))
    }

    fn default_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::new();
        config.insert("shared_buffers_pct".into(), 25.into());
        config.insert("effective_cache_size_pct".into(), 70.into());
        config.insert("work_mem_mb".into(), 16.into());
        config.insert("maintenance_work_mem_mb".into(), 256.into());
        config.insert("max_connections".into(), 100.into());
        config.insert("random_page_cost".into(), 1.1.into());
        config.insert("effective_io_concurrency".into(), 100.into());
        config.insert("wal_buffers_mb".into(), 16.into());
        config.insert("max_wal_size_gb".into(), 2.into());
        config.insert("checkpoint_completion_target".into(), 0.9.into());
        config.insert("max_worker_processes".into(), 4.into());
        config.insert("max_parallel_workers_per_gather".into(), 2.into());
        config
    }

    fn normalize_infra(&self, infra: &mut InfraConfig) {
        infra.nodes = if infra.topology == "replica" { 2 } else { 1 };
    }

    fn infra_tf_vars(&self, infra: &InfraConfig) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("pg_enabled".to_string(), "true".to_string()),
            ("pg_mode".to_string(), infra.topology.clone()),
            ("pg_node_cpu".to_string(), infra.cpu.to_string()),
            ("pg_node_ram_gb".to_string(), infra.ram_gb.to_string()),
            ("pg_disk_type".to_string(), infra.disk_type.clone()),
            ("pg_disk_size_gb".to_string(), infra.disk_size_gb.to_string()),
        ])
    }

    fn destroy_tf_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("pg_enabled".to_string(), "false".to_string())])
    }

    fn config_commands(
        &self,
        _endpoints: &Endpoints,
        infra: &InfraConfig,
        config: &ServiceConfig,
    ) -> Vec<String> {
        let ram_mb = i64::from(infra.ram_gb) * 1024;
        let shared_buffers_mb = ram_mb * int_param(config, "shared_buffers_pct", 25) / 100;
        let effective_cache_mb = ram_mb * int_param(config, "effective_cache_size_pct", 70) / 100;

        let mut conf = String::new();
        conf.push_str(&format!("shared_buffers = {shared_buffers_mb}MB\n"));
        conf.push_str(&format!("effective_cache_size = {effective_cache_mb}MB\n"));
        conf.push_str(&format!(
            "work_mem = {}MB\n",
            int_param(config, "work_mem_mb", 16)
        ));
        conf.push_str(&format!(
            "maintenance_work_mem = {}MB\n",
            int_param(config, "maintenance_work_mem_mb", 256)
        ));
        conf.push_str(&format!(
            "max_connections = {}\n",
            int_param(config, "max_connections", 100)
        ));
        conf.push_str(&format!(
            "random_page_cost = {}\n",
            float_param(config, "random_page_cost", 1.1)
        ));
        conf.push_str(&format!(
            "effective_io_concurrency = {}\n",
            int_param(config, "effective_io_concurrency", 100)
        ));
        conf.push_str(&format!(
            "wal_buffers = {}MB\n",
            int_param(config, "wal_buffers_mb", 16)
        ));
        conf.push_str(&format!(
            "max_wal_size = {}GB\n",
            int_param(config, "max_wal_size_gb", 2)
        ));
        conf.push_str(&format!(
            "checkpoint_completion_target = {}\n",
            float_param(config, "checkpoint_completion_target", 0.9)
        ));
        conf.push_str(&format!(
            "max_worker_processes = {}\n",
            int_param(config, "max_worker_processes", 4)
        ));
        conf.push_str(&format!(
            "max_parallel_workers_per_gather = {}\n",
            int_param(config, "max_parallel_workers_per_gather", 2)
        ));

        vec![format!(
            "printf '%s' '{conf}' > /etc/postgresql/16/main/conf.d/tuning.conf && systemctl restart postgresql"
        )]
    }

    fn ready_probe(&self, endpoints: &Endpoints) -> String {
        format!("pg_isready -h {} -p 5432 -U postgres", endpoints.service_addr)
    }

    fn bench_command(&self, endpoints: &Endpoints) -> String {
        format!(
            "PGPASSWORD=postgres pgbench -h {addr} -U postgres -i -s {SCALE_FACTOR} bench >/dev/null 2>&1 \
             && PGPASSWORD=postgres pgbench -h {addr} -U postgres -c 50 -j 4 -T {BENCH_SECONDS} bench",
            addr = endpoints.service_addr
        )
    }

    fn parse_output(&self, raw: &str) -> Result<BTreeMap<String, f64>, TrialError> {
        let mut metrics = BTreeMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("tps = ") {
                if let Some(value) = first_float(rest) {
                    metrics.insert("tps".to_string(), value);
                }
            } else if let Some(rest) = line.strip_prefix("latency average = ") {
                if let Some(value) = first_float(rest) {
                    metrics.insert("latency_avg_ms".to_string(), value);
                }
            } else if let Some(rest) = line.strip_prefix("latency stddev = ") {
                if let Some(value) = first_float(rest) {
                    metrics.insert("latency_stddev_ms".to_string(), value);
                }
            } else if let Some(rest) =
                line.strip_prefix("number of transactions actually processed: ")
            {
                if let Some(value) = first_float(rest) {
                    metrics.insert("transactions".to_string(), value);
                }
            }
        }
        if !metrics.contains_key("tps") {
            return Err(TrialError::Parse {
                message: "no tps line in pgbench output".to_string(),
                snippet: raw.chars().take(200).collect(),
            });
        }
        Ok(metrics)
    }
}

fn int_param(config: &ServiceConfig, name: &str, default: i64) -> i64 {
    config.get(name).and_then(|v| v.as_int()).unwrap_or(default)
}

fn float_param(config: &ServiceConfig, name: &str, default: f64) -> f64 {
    config.get(name).and_then(|v| v.as_f64()).unwrap_or(default)
}

/// Leading float of a string like "8453.17 (without initial connection time)"
/// or "507190/507190".
fn first_float(s: &str) -> Option<f64> {
    let end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    s[..end].parse().ok()
}
