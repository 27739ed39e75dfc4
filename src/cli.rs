//! CLI surface and the per-service run driver.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::bench::BenchmarkExecutor;
use crate::broker::Broker;
use crate::metrics;
use crate::model::TrialRecord;
use crate::pricing;
use crate::report;
use crate::search::{RandomOracle, SearchDriver};
use crate::service::ServicePlugin;
use crate::space::Mode;
use crate::ssh::{RemoteExec, SshExec};
use crate::store::ResultStore;
use crate::study::{Study, StudyKey};
use crate::terraform::TerraformProvisioner;
use crate::trial::{self, Orchestrator};

const AFTER_HELP: &str = "\
EXAMPLES:
    # Optimize redis throughput on selectel
    cloudtune redis --cloud selectel --trials 10 --metric ops_per_sec

    # Optimize p99 latency instead
    cloudtune redis --cloud selectel --trials 10 --metric p99_latency_ms

    # Tune postgres settings on a fixed 8cpu/16gb host
    cloudtune postgres --cloud selectel --mode config --cpu 8 --ram 16

    # Search infrastructure and config jointly
    cloudtune postgres --cloud selectel --mode full --trials 30

    # Keep infrastructure after the run
    cloudtune redis --cloud selectel --no-destroy

    # Show cached results / export them as markdown
    cloudtune redis --cloud selectel --show-results
    cloudtune redis --cloud selectel --export-md";

#[derive(Parser)]
#[command(
    name = "cloudtune",
    about = "cloudtune — multi-cloud service tuning over real deployments",
    after_help = AFTER_HELP
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Optimize a redis cache (memtier_benchmark)
    Redis(RunArgs),
    /// Optimize a postgres database (pgbench)
    Postgres(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Cloud provider (selectel, timeweb)
    #[arg(long, short = 'c')]
    pub cloud: String,

    /// What varies: infrastructure, service config, or both
    #[arg(long, short = 'm', value_enum, default_value_t = Mode::Config)]
    pub mode: Mode,

    /// Metric to optimize (defaults to the service's primary metric)
    #[arg(long)]
    pub metric: Option<String>,

    /// Number of trials (successes and prunes both count)
    #[arg(long, short = 't', default_value_t = 10)]
    pub trials: u64,

    /// Fixed CPU cores for config mode
    #[arg(long, default_value_t = 4)]
    pub cpu: u32,

    /// Fixed RAM GB for config mode
    #[arg(long, default_value_t = 8)]
    pub ram: u32,

    /// Keep infrastructure after the study
    #[arg(long)]
    pub no_destroy: bool,

    /// Show cached benchmark results and exit
    #[arg(long)]
    pub show_results: bool,

    /// Export cached results to markdown and exit
    #[arg(long)]
    pub export_md: bool,

    /// Study name (default: {service}-{cloud}-{mode}-{metric})
    #[arg(long)]
    pub study_name: Option<String>,

    /// Sampler seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Directory for the result cache, study files and exports
    #[arg(long, default_value = ".", env = "CLOUDTUNE_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Terraform working directory (default: terraform/{cloud})
    #[arg(long)]
    pub terraform_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, default_value = "text")]
    pub log_format: String,
}

/// Run one optimizer invocation end-to-end. Everything prunable stays inside
/// the study loop; an `Err` here means a fatal error and a nonzero exit.
pub async fn run_service(plugin: &dyn ServicePlugin, args: &RunArgs) -> Result<()> {
    // Unknown cloud is a caller error; fail before any side effects.
    pricing::pricing_for(&args.cloud)?;

    let metric_name = args.metric.as_deref().unwrap_or(plugin.primary_metric());
    let metric = *metrics::resolve(plugin.metrics(), plugin.name(), metric_name)?;

    let results_path = args.data_dir.join("results.jsonl");
    let export_path = args.data_dir.join(format!(
        "RESULTS_{}_{}.md",
        plugin.name(),
        args.cloud.to_uppercase()
    ));

    if args.show_results {
        let records = cloud_records(&results_path, plugin, &args.cloud);
        report::show_results(
            &records,
            plugin.primary_metric(),
            &format!("{} benchmark results — {}", plugin.name(), args.cloud.to_uppercase()),
        );
        return Ok(());
    }
    if args.export_md {
        let records = cloud_records(&results_path, plugin, &args.cloud);
        if records.is_empty() {
            println!("No results for {} on {}", plugin.name(), args.cloud);
        } else {
            report::write_markdown(&records, plugin.primary_metric(), &export_path)?;
            println!("Results exported to {}", export_path.display());
        }
        return Ok(());
    }

    let space = plugin.space(&args.cloud)?;
    let mut base_infra = plugin.default_infra(&args.cloud)?;
    base_infra.cpu = args.cpu;
    base_infra.ram_gb = args.ram;
    if !args.mode.varies_infra() {
        // The fixed host must be a shape the cloud actually offers.
        pricing::validate_infra(&args.cloud, &base_infra)?;
    }
    let base_config = plugin.default_config();

    let key = StudyKey {
        service: plugin.name().to_string(),
        cloud: args.cloud.clone(),
        mode: args.mode,
        metric: metric.name.to_string(),
    };
    let study = match &args.study_name {
        Some(name) => Study::open_named(&args.data_dir, name)?,
        None => Study::open(&args.data_dir, &key)?,
    };
    let resumed = study.observations().len();
    let study_name = study.name().to_string();
    let mut driver = SearchDriver::new(Box::new(RandomOracle::seeded(args.seed)), study, &space);

    let store = ResultStore::open(&results_path, plugin.primary_metric())
        .with_export(export_path.clone());

    let terraform_dir = args
        .terraform_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("terraform/{}", args.cloud)));
    let provisioner = Arc::new(TerraformProvisioner::new(
        terraform_dir,
        plugin.destroy_tf_vars(),
    ));
    let remote: Arc<dyn RemoteExec> = Arc::new(SshExec::default());
    let broker = Broker::new(provisioner, remote.clone());
    let executor = BenchmarkExecutor::new(remote);

    info!(
        study = %study_name,
        metric = metric.name,
        direction = ?metric.direction,
        trials = args.trials,
        mode = args.mode.as_str(),
        resumed_observations = resumed,
        "starting optimization"
    );

    let orchestrator = Orchestrator {
        plugin,
        cloud: args.cloud.clone(),
        metric,
        store: &store,
        broker: &broker,
        executor: &executor,
    };

    let result = trial::run_study(
        &orchestrator,
        &mut driver,
        &space,
        args.mode,
        &base_infra,
        &base_config,
        args.trials,
    )
    .await;

    // Teardown runs no matter how the loop exited — fatal error, interrupt
    // or normal completion — unless the operator asked to keep the infra.
    if args.no_destroy {
        info!("--no-destroy set, keeping infrastructure");
    } else if let Err(err) = broker.teardown().await {
        warn!(%err, "teardown failed, resources may be left running");
    }

    let summary = result?;

    println!();
    println!("{}", "=".repeat(60));
    println!(
        "OPTIMIZATION {} ({})",
        if summary.interrupted { "INTERRUPTED" } else { "COMPLETE" },
        args.cloud.to_uppercase()
    );
    println!("{}", "=".repeat(60));
    println!(
        "Trials: {} attempted, {} completed, {} cache hits, {} pruned",
        summary.attempted, summary.completed, summary.cache_hits, summary.pruned
    );
    if let Some(best) = driver.study().best() {
        let value = match metric.direction {
            crate::metrics::Direction::Maximize => best.value,
            crate::metrics::Direction::Minimize => -best.value,
        };
        println!("Best {}: {}", metric.name, metric.format_value(value));
        let params = best
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!("Best params: {params}");
    } else {
        println!("No successful trials completed");
    }

    Ok(())
}

fn cloud_records(
    results_path: &std::path::Path,
    plugin: &dyn ServicePlugin,
    cloud: &str,
) -> Vec<TrialRecord> {
    ResultStore::open(results_path, plugin.primary_metric())
        .load()
        .into_iter()
        .filter(|r| r.cloud == cloud && r.service == plugin.name())
        .collect()
}
