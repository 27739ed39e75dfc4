//! Optimization metric registry types.

use serde::{Deserialize, Serialize};

use crate::error::SpaceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Maximize,
    Minimize,
}

/// One optimizable metric: where it lives in a record's metrics map, which
/// way is better, and how to print it.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub description: &'static str,
    pub direction: Direction,
    pub unit: &'static str,
}

impl MetricDef {
    /// Direction-adjusted score: the search always maximizes, so metrics
    /// that should be minimized are negated at the oracle boundary only.
    /// Persisted metric values stay raw.
    pub fn score(&self, value: f64) -> f64 {
        match self.direction {
            Direction::Maximize => value,
            Direction::Minimize => -value,
        }
    }

    pub fn format_value(&self, value: f64) -> String {
        format!("{value:.2} {}", self.unit)
    }
}

/// Look a metric up by name in a service's registry.
pub fn resolve<'a>(
    metrics: &'a [MetricDef],
    service: &str,
    name: &str,
) -> Result<&'a MetricDef, SpaceError> {
    metrics
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| SpaceError::UnknownMetric {
            service: service.to_string(),
            metric: name.to_string(),
        })
}
