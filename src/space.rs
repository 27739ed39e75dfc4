//! Two-tier parameter space.
//!
//! Every parameter belongs to exactly one tier. Infrastructure parameters
//! force a destroy/recreate when they change; configuration parameters are
//! applied in place. Service plugins declare the split explicitly — the
//! sampler refuses to guess, so a parameter landing in the wrong tier is a
//! startup failure rather than a silently mis-handled trial.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SpaceError;
use crate::model::ParamValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Infra,
    Config,
}

/// Which tiers vary during the study. In `config` mode the infrastructure is
/// fixed from operator flags; in `infra` mode the service config is held at
/// the plugin default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Infra,
    Config,
    Full,
}

impl Mode {
    pub fn varies_infra(self) -> bool {
        matches!(self, Mode::Infra | Mode::Full)
    }

    pub fn varies_config(self) -> bool {
        matches!(self, Mode::Config | Mode::Full)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Infra => "infra",
            Mode::Config => "config",
            Mode::Full => "full",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named categorical parameter with its declared tier and value domain.
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub tier: Tier,
    pub choices: Vec<ParamValue>,
}

impl ParamDef {
    pub fn new(name: &str, tier: Tier, choices: Vec<ParamValue>) -> Self {
        ParamDef {
            name: name.to_string(),
            tier,
            choices,
        }
    }

    pub fn ints(name: &str, tier: Tier, values: &[i64]) -> Self {
        Self::new(name, tier, values.iter().map(|v| ParamValue::Int(*v)).collect())
    }

    pub fn floats(name: &str, tier: Tier, values: &[f64]) -> Self {
        Self::new(name, tier, values.iter().map(|v| ParamValue::Float(*v)).collect())
    }

    pub fn strs(name: &str, tier: Tier, values: &[&str]) -> Self {
        Self::new(
            name,
            tier,
            values.iter().map(|v| ParamValue::Str(v.to_string())).collect(),
        )
    }
}

/// The full declared search space for one service on one cloud.
#[derive(Debug, Clone, Default)]
pub struct ParameterSpace {
    params: Vec<ParamDef>,
}

impl ParameterSpace {
    pub fn new(params: Vec<ParamDef>) -> Result<Self, SpaceError> {
        let mut space = ParameterSpace::default();
        for def in params {
            space.push(def)?;
        }
        Ok(space)
    }

    pub fn push(&mut self, def: ParamDef) -> Result<(), SpaceError> {
        if def.choices.is_empty() {
            return Err(SpaceError::EmptyDomain(def.name));
        }
        if self.params.iter().any(|p| p.name == def.name) {
            return Err(SpaceError::DuplicateParam(def.name));
        }
        self.params.push(def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ParamDef> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn tier(&self, tier: Tier) -> impl Iterator<Item = &ParamDef> {
        self.params.iter().filter(move |p| p.tier == tier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamDef> {
        self.params.iter()
    }
}
