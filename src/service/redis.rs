//! Redis plugin: memtier_benchmark over a cache-shaped workload
//! (80% GET / 20% SET, 256-byte values).

use std::collections::BTreeMap;

use crate::bench::extract_json;
use crate::broker::Endpoints;
use crate::error::{SpaceError, TrialError};
use crate::metrics::{Direction, MetricDef};
use crate::model::{InfraConfig, ServiceConfig};
use crate::pricing;
use crate::service::ServicePlugin;
use crate::space::{ParamDef, ParameterSpace, Tier};

pub struct Redis;

const METRICS: &[MetricDef] = &[
    MetricDef {
        name: "ops_per_sec",
        description: "Total operations per second",
        direction: Direction::Maximize,
        unit: "ops/s",
    },
    MetricDef {
        name: "p99_latency_ms",
        description: "99th percentile latency",
        direction: Direction::Minimize,
        unit: "ms",
    },
    MetricDef {
        name: "cost_efficiency",
        description: "Operations per second per ₽/month",
        direction: Direction::Maximize,
        unit: "ops/₽mo",
    },
];

const BENCH_SECONDS: u32 = 60;

impl ServicePlugin for Redis {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn metrics(&self) -> &'static [MetricDef] {
        METRICS
    }

    fn primary_metric(&self) -> &'static str {
        "ops_per_sec"
    }

    fn space(&self, cloud: &str) -> Result<ParameterSpace, SpaceError> {
        pricing::pricing_for(cloud)?;
        ParameterSpace::new(vec![
            ParamDef::strs("topology", Tier::Infra, &["single", "sentinel"]),
            ParamDef::ints("cpu", Tier::Infra, &[2, 4, 8]),
            ParamDef::ints("ram_gb", Tier::Infra, &[4, 8, 16, 32]),
            ParamDef::strs(
                "maxmemory_policy",
                Tier::Config,
                &["allkeys-lru", "volatile-lru"],
            ),
            ParamDef::ints("io_threads", Tier::Config, &[1, 2, 4]),
            ParamDef::strs("persistence", Tier::Config, &["none", "rdb"]),
        ])
    }

    fn default_infra(&self, cloud: &str) -> Result<InfraConfig, SpaceError> {
        let pricing = pricing::pricing_for(cloud)?;
        let disk_type = pricing.disk_types().next().unwrap_or("fast");
        Ok(InfraConfig::single(4, 8, disk_type, 50))
    }

    fn default_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::new();
        config.insert("maxmemory_policy".into(), "allkeys-lru".into());
        config.insert("io_threads".into(), 1.into());
        config.insert("persistence".into(), "none".into());
        config
    }

    fn normalize_infra(&self, infra: &mut InfraConfig) {
        infra.nodes = if infra.topology == "sentinel" { 3 } else { 1 };
    }

    fn infra_tf_vars(&self, infra: &InfraConfig) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("redis_enabled".to_string(), "true".to_string()),
            ("redis_mode".to_string(), infra.topology.clone()),
            ("redis_node_cpu".to_string(), infra.cpu.to_string()),
            ("redis_node_ram_gb".to_string(), infra.ram_gb.to_string()),
            ("redis_disk_type".to_string(), infra.disk_type.clone()),
            (
                "redis_disk_size_gb".to_string(),
                infra.disk_size_gb.to_string(),
            ),
        ])
    }

    fn destroy_tf_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("redis_enabled".to_string(), "false".to_string())])
    }

    fn config_commands(
        &self,
        _endpoints: &Endpoints,
        infra: &InfraConfig,
        config: &ServiceConfig,
    ) -> Vec<String> {
        let policy = str_param(config, "maxmemory_policy", "allkeys-lru");
        let io_threads = int_param(config, "io_threads", 1);
        let persistence = str_param(config, "persistence", "none");

        // Leave headroom for replication buffers and forks.
        let maxmemory_mb = infra.ram_gb * 1024 * 3 / 4;

        let mut conf = String::new();
        conf.push_str(&format!("maxmemory {maxmemory_mb}mb\n"));
        conf.push_str(&format!("maxmemory-policy {policy}\n"));
        conf.push_str(&format!("io-threads {io_threads}\n"));
        if persistence == "rdb" {
            conf.push_str("save 900 1 300 10\n");
        } else {
            conf.push_str("save \"\"\n");
        }
        conf.push_str("appendonly no\n");

        vec![format!(
            "mkdir -p /etc/redis/conf.d && printf '%s' '{conf}' > /etc/redis/conf.d/tuning.conf && systemctl restart redis-server"
        )]
    }

    fn ready_probe(&self, endpoints: &Endpoints) -> String {
        format!(
            "redis-cli -h {} -p 6379 ping | grep -q PONG",
            endpoints.service_addr
        )
    }

    fn bench_command(&self, endpoints: &Endpoints) -> String {
        // 1 SET : 4 GET, random keys over a 10M keyspace. Stats go to a JSON
        // file so log noise on stdout cannot corrupt them.
        format!(
            "memtier_benchmark --server={} --port=6379 \
             --clients=50 --threads=4 --ratio=1:4 --key-pattern=R:R \
             --key-minimum=1 --key-maximum=10000000 --data-size=256 \
             --test-time={BENCH_SECONDS} --hide-histogram \
             --json-out-file=/tmp/memtier.json >/dev/null 2>&1 \
             && cat /tmp/memtier.json",
            endpoints.service_addr
        )
    }

    fn parse_output(&self, raw: &str) -> Result<BTreeMap<String, f64>, TrialError> {
        let stats = extract_json(raw)?;
        let totals = &stats["ALL STATS"]["Totals"];

        let ops = totals["Ops/sec"].as_f64().ok_or_else(|| TrialError::Parse {
            message: "missing ALL STATS.Totals.Ops/sec".to_string(),
            snippet: raw.chars().take(200).collect(),
        })?;

        let mut metrics = BTreeMap::new();
        metrics.insert("ops_per_sec".to_string(), ops);
        if let Some(avg) = totals["Average Latency"].as_f64() {
            metrics.insert("avg_latency_ms".to_string(), avg);
        }
        if let Some(kb) = totals["KB/sec"].as_f64() {
            metrics.insert("kb_per_sec".to_string(), kb);
        }
        let percentiles = &totals["Percentile Latencies"];
        for (key, name) in [
            ("p50.00", "p50_latency_ms"),
            ("p99.00", "p99_latency_ms"),
            ("p99.90", "p999_latency_ms"),
        ] {
            if let Some(value) = percentiles[key].as_f64() {
                metrics.insert(name.to_string(), value);
            }
        }
        Ok(metrics)
    }
}

fn str_param<'a>(config: &'a ServiceConfig, name: &str, default: &'a str) -> &'a str {
    config.get(name).and_then(|v| v.as_str()).unwrap_or(default)
}

fn int_param(config: &ServiceConfig, name: &str, default: i64) -> i64 {
    config.get(name).and_then(|v| v.as_int()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memtier_json_with_surrounding_noise() {
        let raw = concat!(
            "Warning: Permanently added '10.0.0.20' (ED25519) to the list of known hosts.\n",
            r#"{"ALL STATS":{"Totals":{"Ops/sec":152340.12,"Average Latency":0.82,"KB/sec":40211.3,"Percentile Latencies":{"p50.00":0.71,"p99.00":1.91,"p99.90":4.02}}}}"#,
            "\nConnection to 192.0.2.10 closed.\n",
        );
        let metrics = Redis.parse_output(raw).unwrap();
        assert_eq!(metrics["ops_per_sec"], 152340.12);
        assert_eq!(metrics["p99_latency_ms"], 1.91);
        assert_eq!(metrics["p999_latency_ms"], 4.02);
        assert_eq!(metrics["kb_per_sec"], 40211.3);
    }

    #[test]
    fn missing_totals_is_a_parse_error() {
        let err = Redis.parse_output(r#"{"ALL STATS":{}}"#).unwrap_err();
        assert!(matches!(err, TrialError::Parse { .. }));
        assert!(err.to_string().contains("Ops/sec"));
    }

    #[test]
    fn sentinel_topology_means_three_nodes() {
        let mut infra = InfraConfig::single(4, 8, "fast", 50);
        infra.topology = "sentinel".into();
        Redis.normalize_infra(&mut infra);
        assert_eq!(infra.nodes, 3);

        infra.topology = "single".into();
        Redis.normalize_infra(&mut infra);
        assert_eq!(infra.nodes, 1);
    }

    #[test]
    fn config_commands_render_the_tuning_file() {
        let mut config = ServiceConfig::new();
        config.insert("maxmemory_policy".into(), "volatile-lru".into());
        config.insert("io_threads".into(), 4.into());
        config.insert("persistence".into(), "rdb".into());
        let infra = InfraConfig::single(4, 16, "fast", 50);

        let commands = Redis.config_commands(
            &Endpoints {
                service_addr: "10.0.0.20".into(),
                bench_host: "192.0.2.10".into(),
            },
            &infra,
            &config,
        );
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("maxmemory-policy volatile-lru"));
        assert!(commands[0].contains("io-threads 4"));
        assert!(commands[0].contains("save 900 1"));
        assert!(commands[0].contains("maxmemory 12288mb"));
        assert!(commands[0].contains("systemctl restart redis-server"));
    }

    #[test]
    fn tf_vars_carry_the_full_infra_spec() {
        let mut infra = InfraConfig::single(8, 32, "fast", 50);
        infra.topology = "sentinel".into();
        let vars = Redis.infra_tf_vars(&infra);
        assert_eq!(vars["redis_enabled"], "true");
        assert_eq!(vars["redis_mode"], "sentinel");
        assert_eq!(vars["redis_node_cpu"], "8");
        assert_eq!(vars["redis_node_ram_gb"], "32");
        assert_eq!(Redis.destroy_tf_vars()["redis_enabled"], "false");
    }
}
