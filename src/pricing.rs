//! Cloud pricing oracle.
//!
//! Pure and deterministic: resource spec in, money out. Also the home of the
//! per-cloud shape constraints (minimum RAM per vCPU tier). The search driver
//! consults these *before* offering a categorical domain to the oracle, so an
//! invalid shape is never even sampled — constraining up front instead of
//! pruning after the fact.
//!
//! Rates are monthly, in ₽, and flat per resource. Update here when provider
//! prices change.

use crate::error::SpaceError;
use crate::model::InfraConfig;

/// Pricing rates for one cloud provider.
#[derive(Debug, Clone)]
pub struct CloudPricing {
    pub name: &'static str,
    /// ₽ per vCPU per month.
    pub cpu_month: f64,
    /// ₽ per GB RAM per month.
    pub ram_gb_month: f64,
    /// (disk type, ₽ per GB per month)
    disk_month: &'static [(&'static str, f64)],
}

impl CloudPricing {
    pub fn disk_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.disk_month.iter().map(|(name, _)| *name)
    }

    pub fn disk_rate(&self, disk_type: &str) -> f64 {
        self.disk_month
            .iter()
            .find(|(name, _)| *name == disk_type)
            .map(|(_, rate)| *rate)
            .unwrap_or(0.01)
    }
}

// Standard Line pricing (ru-9 pool), derived from the provider calculator:
// 2vCPU/4GB = 2263₽, extrapolated.
static SELECTEL: CloudPricing = CloudPricing {
    name: "selectel",
    cpu_month: 655.0,
    ram_gb_month: 238.0,
    disk_month: &[
        ("fast", 39.0),
        ("universal", 18.0),
        ("universal2", 9.0),
        ("basicssd", 9.0),
        ("basic", 7.0),
    ],
};

// Derived from fixed tariffs: 1vCPU/1GB=477₽, 1vCPU/2GB=657₽, 2vCPU/2GB=882₽.
static TIMEWEB: CloudPricing = CloudPricing {
    name: "timeweb",
    cpu_month: 220.0,
    ram_gb_month: 180.0,
    disk_month: &[("nvme", 5.0), ("ssd", 4.0), ("hdd", 2.0)],
};

pub const CLOUDS: &[&str] = &["selectel", "timeweb"];

pub fn pricing_for(cloud: &str) -> Result<&'static CloudPricing, SpaceError> {
    match cloud {
        "selectel" => Ok(&SELECTEL),
        "timeweb" => Ok(&TIMEWEB),
        other => Err(SpaceError::UnknownCloud(other.to_string())),
    }
}

// ─── Shape constraints ────────────────────────────────────────────────────────

/// Minimum RAM (GB) the provider offers at a given vCPU count. Zero means
/// unconstrained.
pub fn min_ram_for(cloud: &str, cpu: u32) -> u32 {
    match cloud {
        // Selectel Standard Line tiers.
        "selectel" => match cpu {
            2 => 2,
            4 => 4,
            8 => 8,
            16 => 32,
            32 => 64,
            _ => 0,
        },
        _ => 0,
    }
}

/// Filter RAM options down to those the provider actually offers for the
/// chosen CPU count. Falls back to the full list when nothing survives, so
/// an over-strict table can never empty the search space.
pub fn filter_valid_ram(cloud: &str, cpu: u32, ram_options: &[u32]) -> Vec<u32> {
    let min = min_ram_for(cloud, cpu);
    let valid: Vec<u32> = ram_options.iter().copied().filter(|r| *r >= min).collect();
    if valid.is_empty() {
        ram_options.to_vec()
    } else {
        valid
    }
}

/// Validate operator-supplied fixed infrastructure against the cloud's
/// constraints. Used for the `config` mode `--cpu`/`--ram` pair.
pub fn validate_infra(cloud: &str, infra: &InfraConfig) -> Result<(), SpaceError> {
    pricing_for(cloud)?;
    let min = min_ram_for(cloud, infra.cpu);
    if infra.ram_gb < min {
        return Err(SpaceError::InvalidInfra {
            cloud: cloud.to_string(),
            reason: format!("{} vCPU requires at least {min}GB RAM", infra.cpu),
        });
    }
    Ok(())
}

// ─── Cost ─────────────────────────────────────────────────────────────────────

/// Disk attachment for cost purposes.
#[derive(Debug, Clone)]
pub struct DiskSpec {
    pub size_gb: u32,
    pub disk_type: String,
    pub count: u32,
}

/// Monthly cost in ₽ for `nodes` identical VMs.
pub fn vm_cost(cloud: &str, cpu: u32, ram_gb: u32, disks: &[DiskSpec], nodes: u32) -> f64 {
    let pricing = match pricing_for(cloud) {
        Ok(p) => p,
        Err(_) => return 0.0,
    };
    let cpu_cost = f64::from(cpu) * pricing.cpu_month;
    let ram_cost = f64::from(ram_gb) * pricing.ram_gb_month;
    let disk_cost: f64 = disks
        .iter()
        .map(|d| f64::from(d.size_gb) * f64::from(d.count) * pricing.disk_rate(&d.disk_type))
        .sum();
    f64::from(nodes) * (cpu_cost + ram_cost + disk_cost)
}

/// Monthly cost of a full infrastructure spec.
pub fn infra_cost(cloud: &str, infra: &InfraConfig) -> f64 {
    vm_cost(
        cloud,
        infra.cpu,
        infra.ram_gb,
        &[DiskSpec {
            size_gb: infra.disk_size_gb,
            disk_type: infra.disk_type.clone(),
            count: 1,
        }],
        infra.nodes,
    )
}
