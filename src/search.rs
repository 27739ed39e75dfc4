//! Search driver — wraps the suggestion oracle and owns the encoding of the
//! parameter space.
//!
//! The surrogate model is opaque: anything implementing [`Oracle`] can drive
//! the study. The in-tree implementation is a seeded uniform sampler; a
//! sequential-model-based sampler slots in behind the same trait without
//! touching the orchestrator.
//!
//! Encoding rule: a parameter whose valid value set depends on a sibling
//! sampled in the same trial is registered under a parent-qualified name
//! (`ram_gb@cpu16`). Persistent study storage rejects redefining a
//! categorical domain under one name, so the qualified name is a structural
//! requirement — the driver enforces it by treating a conflicting
//! registration as fatal.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SpaceError;
use crate::model::{InfraConfig, ParamValue, ServiceConfig};
use crate::pricing;
use crate::space::{Mode, ParamDef, ParameterSpace, Tier};
use crate::study::{Observation, Study};

// ─── Oracle ───────────────────────────────────────────────────────────────────

/// The opaque "suggest next value given history" strategy.
pub trait Oracle: Send {
    fn suggest(
        &mut self,
        name: &str,
        choices: &[ParamValue],
        history: &[Observation],
    ) -> ParamValue;
}

/// Uniform categorical sampler. Deterministic under a fixed seed; ignores
/// history by construction.
pub struct RandomOracle {
    rng: StdRng,
}

impl RandomOracle {
    pub fn seeded(seed: u64) -> Self {
        RandomOracle {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Oracle for RandomOracle {
    fn suggest(
        &mut self,
        _name: &str,
        choices: &[ParamValue],
        _history: &[Observation],
    ) -> ParamValue {
        choices[self.rng.gen_range(0..choices.len())].clone()
    }
}

// ─── Driver ───────────────────────────────────────────────────────────────────

/// One sampled trial: the resolved configs plus the raw parameter assignment
/// (dependent parameters under their qualified names) for study bookkeeping.
#[derive(Debug, Clone)]
pub struct Sampled {
    pub infra: InfraConfig,
    pub config: ServiceConfig,
    pub params: BTreeMap<String, ParamValue>,
}

pub struct SearchDriver {
    oracle: Box<dyn Oracle>,
    study: Study,
    /// Every domain registered so far, by (possibly qualified) name.
    registered: BTreeMap<String, Vec<ParamValue>>,
    /// Prior observations that still validate against the current space.
    history: Vec<Observation>,
}

fn base_param_name(name: &str) -> &str {
    name.split('@').next().unwrap_or(name)
}

fn observation_validates(obs: &Observation, space: &ParameterSpace) -> bool {
    obs.params.iter().all(|(name, value)| {
        space
            .get(base_param_name(name))
            .is_some_and(|def| def.choices.contains(value))
    })
}

impl SearchDriver {
    /// Build a driver over a resumed study. Observations whose parameters no
    /// longer validate against the current space are ignored as oracle
    /// history (they stay in the file).
    pub fn new(oracle: Box<dyn Oracle>, study: Study, space: &ParameterSpace) -> Self {
        let history = study
            .observations()
            .iter()
            .filter(|obs| observation_validates(obs, space))
            .cloned()
            .collect();
        SearchDriver {
            oracle,
            study,
            registered: BTreeMap::new(),
            history,
        }
    }

    pub fn study(&self) -> &Study {
        &self.study
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Ask the oracle for one value, registering the domain first. The same
    /// name must always carry the same domain for the lifetime of the study.
    fn suggest(&mut self, name: &str, choices: &[ParamValue]) -> Result<ParamValue, SpaceError> {
        match self.registered.get(name) {
            Some(known) if known != choices => {
                return Err(SpaceError::DomainConflict {
                    name: name.to_string(),
                })
            }
            Some(_) => {}
            None => {
                self.registered.insert(name.to_string(), choices.to_vec());
            }
        }
        Ok(self.oracle.suggest(name, choices, &self.history))
    }

    /// Sample one trial, honoring the active mode: tiers that do not vary
    /// are copied from the supplied base configs untouched.
    pub fn sample(
        &mut self,
        space: &ParameterSpace,
        mode: Mode,
        cloud: &str,
        base_infra: &InfraConfig,
        base_config: &ServiceConfig,
    ) -> Result<Sampled, SpaceError> {
        let mut infra = base_infra.clone();
        let mut params = BTreeMap::new();

        if mode.varies_infra() {
            self.sample_infra(space, cloud, &mut infra, &mut params)?;
        }

        let mut config = base_config.clone();
        if mode.varies_config() {
            for def in space.tier(Tier::Config) {
                let value = self.suggest(&def.name, &def.choices)?;
                config.insert(def.name.clone(), value.clone());
                params.insert(def.name.clone(), value);
            }
        }

        Ok(Sampled {
            infra,
            config,
            params,
        })
    }

    fn sample_infra(
        &mut self,
        space: &ParameterSpace,
        cloud: &str,
        infra: &mut InfraConfig,
        params: &mut BTreeMap<String, ParamValue>,
    ) -> Result<(), SpaceError> {
        // CPU first: the RAM domain depends on it.
        if let Some(def) = space.get("cpu") {
            let value = self.suggest("cpu", &def.choices)?;
            infra.cpu = int_field("cpu", &value)? as u32;
            params.insert("cpu".to_string(), value);
        }

        for def in space.tier(Tier::Infra) {
            if def.name == "cpu" || def.name == "ram_gb" {
                continue;
            }
            let value = self.suggest(&def.name, &def.choices)?;
            apply_infra_param(infra, &def.name, &value)?;
            params.insert(def.name.clone(), value);
        }

        // RAM last, under a CPU-qualified name, over the pre-filtered domain:
        // an invalid (cpu, ram) shape is structurally impossible to sample.
        if let Some(def) = space.get("ram_gb") {
            let offered = ram_domain(cloud, infra.cpu, def)?;
            let qualified = format!("ram_gb@cpu{}", infra.cpu);
            let value = self.suggest(&qualified, &offered)?;
            infra.ram_gb = int_field("ram_gb", &value)? as u32;
            params.insert(qualified, value);
        }

        Ok(())
    }

    /// Feed one completed trial back: durably recorded in the study and
    /// visible to subsequent suggestions.
    pub fn report(
        &mut self,
        params: BTreeMap<String, ParamValue>,
        score: f64,
    ) -> anyhow::Result<()> {
        self.study.record(params.clone(), score)?;
        self.history.push(Observation {
            timestamp: chrono::Utc::now(),
            params,
            value: score,
        });
        Ok(())
    }
}

fn ram_domain(cloud: &str, cpu: u32, def: &ParamDef) -> Result<Vec<ParamValue>, SpaceError> {
    let mut options = Vec::with_capacity(def.choices.len());
    for choice in &def.choices {
        options.push(int_field("ram_gb", choice)? as u32);
    }
    Ok(pricing::filter_valid_ram(cloud, cpu, &options)
        .into_iter()
        .map(|r| ParamValue::Int(i64::from(r)))
        .collect())
}

fn int_field(name: &str, value: &ParamValue) -> Result<i64, SpaceError> {
    value.as_int().ok_or(SpaceError::WrongValueType {
        name: name.to_string(),
        expected: "integer",
    })
}

fn str_field(name: &str, value: &ParamValue) -> Result<String, SpaceError> {
    value
        .as_str()
        .map(|s| s.to_string())
        .ok_or(SpaceError::WrongValueType {
            name: name.to_string(),
            expected: "string",
        })
}

/// Map a sampled infra parameter onto its `InfraConfig` field. Unknown names
/// are a misclassified-tier bug and fatal.
fn apply_infra_param(
    infra: &mut InfraConfig,
    name: &str,
    value: &ParamValue,
) -> Result<(), SpaceError> {
    match name {
        "topology" => infra.topology = str_field(name, value)?,
        "cpu" => infra.cpu = int_field(name, value)? as u32,
        "ram_gb" => infra.ram_gb = int_field(name, value)? as u32,
        "disk_type" => infra.disk_type = str_field(name, value)?,
        "disk_size_gb" => infra.disk_size_gb = int_field(name, value)? as u32,
        "nodes" => infra.nodes = int_field(name, value)? as u32,
        other => return Err(SpaceError::UnknownInfraParam(other.to_string())),
    }
    Ok(())
}
