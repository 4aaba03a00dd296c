use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::analysis::ImpactMetric;

/// Parameters of the behavioral and sensitivity layers, read from TOML.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Length of the continuous solve, starting at t = 0.
    #[serde(default = "default_time_span")]
    pub time_span: f64,
    /// Fixed step of the reference integrator.
    #[serde(default = "default_step")]
    pub step: f64,
    /// Fingerprint ties and behavioral comparisons within this distance count as equal.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Places whose best fingerprint distance exceeds this stay unmatched.
    #[serde(default)]
    pub max_mapping_distance: Option<f64>,
    /// Evenly spaced sample times for deletion impact.
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    #[serde(default = "default_max_reach_steps")]
    pub max_reach_steps: usize,
    /// At most this many arcs are tested for deletion, sampled at an even stride.
    #[serde(default)]
    pub max_arcs: Option<usize>,
    #[serde(default = "default_divergence_limit")]
    pub divergence_limit: f64,
    #[serde(default = "default_important_threshold")]
    pub important_threshold: f64,
    #[serde(default = "default_moderate_threshold")]
    pub moderate_threshold: f64,
    #[serde(default)]
    pub metric: ImpactMetric,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            time_span: default_time_span(),
            step: default_step(),
            tolerance: default_tolerance(),
            max_mapping_distance: None,
            sample_count: default_sample_count(),
            max_reach_steps: default_max_reach_steps(),
            max_arcs: None,
            divergence_limit: default_divergence_limit(),
            important_threshold: default_important_threshold(),
            moderate_threshold: default_moderate_threshold(),
            metric: ImpactMetric::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("config {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AnalysisConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Evenly spaced times over `[0, time_span]`, both ends included.
    pub fn sample_times(&self) -> Vec<f64> {
        let count = self.sample_count.max(2);
        (0..count)
            .map(|i| self.time_span * i as f64 / (count - 1) as f64)
            .collect()
    }
}

fn default_time_span() -> f64 {
    10.0
}

fn default_step() -> f64 {
    0.01
}

fn default_tolerance() -> f64 {
    1e-6
}

fn default_sample_count() -> usize {
    20
}

fn default_max_reach_steps() -> usize {
    1000
}

fn default_divergence_limit() -> f64 {
    1e6
}

fn default_important_threshold() -> f64 {
    1.0
}

fn default_moderate_threshold() -> f64 {
    0.1
}
