//! Pipeline configuration
//!
//! Loaded from YAML. Every section is optional, so an empty file yields
//! the defaults. A few settings can be overridden from the environment
//! (after `.env` has been loaded by the binary):
//!
//! - `PROCUREMENT_RISK_SCREENING_URL` sets `screening.base_url`
//! - `PROCUREMENT_RISK_SNAPSHOT_DIR` sets `graph.snapshot_dir`
//! - `PROCUREMENT_RISK_OUTPUT_DIR` sets `output_dir`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::graph::GraphConfig;
use crate::resolve::ResolverConfig;
use crate::risk::{PropagationConfig, UrgencyConfig};
use crate::screening::ScreeningConfig;
use crate::tables::columns::ColumnsConfig;

pub const ENV_SCREENING_URL: &str = "PROCUREMENT_RISK_SCREENING_URL";
pub const ENV_SNAPSHOT_DIR: &str = "PROCUREMENT_RISK_SNAPSHOT_DIR";
pub const ENV_OUTPUT_DIR: &str = "PROCUREMENT_RISK_OUTPUT_DIR";

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub resolver: ResolverConfig,
    pub graph: GraphConfig,
    pub propagation: PropagationConfig,
    pub urgency: UrgencyConfig,
    pub screening: ScreeningConfig,
    pub columns: ColumnsConfig,
    /// Directory receiving matches.csv, urgency.csv and metrics_report.txt
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            graph: GraphConfig::default(),
            propagation: PropagationConfig::default(),
            urgency: UrgencyConfig::default(),
            screening: ScreeningConfig::default(),
            columns: ColumnsConfig::default(),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl PipelineConfig {
    /// Load from a YAML file, apply environment overrides and validate
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        info!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    /// Parse YAML without touching the environment
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = lookup(ENV_SCREENING_URL) {
            self.screening.base_url = url;
        }
        if let Some(dir) = lookup(ENV_SNAPSHOT_DIR) {
            self.graph.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
    }

    /// Reject settings the stages cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.resolver;
        if !(0.0..=1.0).contains(&r.similarity_threshold) {
            return Err(ConfigError::invalid(
                "resolver.similarity_threshold",
                "must be within [0, 1]",
            ));
        }
        if r.workers == 0 {
            return Err(ConfigError::invalid("resolver.workers", "must be positive"));
        }
        if r.prefix_len == 0 {
            return Err(ConfigError::invalid("resolver.prefix_len", "must be positive"));
        }
        if !(0.0..=100.0).contains(&self.graph.control_threshold_pct) {
            return Err(ConfigError::invalid(
                "graph.control_threshold_pct",
                "must be within [0, 100]",
            ));
        }
        let u = &self.urgency;
        if u.gamma_low <= 0.0 || u.gamma_high <= 0.0 {
            return Err(ConfigError::invalid("urgency.gamma_low", "exponents must be positive"));
        }
        if u.value_cap <= 0.0 {
            return Err(ConfigError::invalid("urgency.value_cap", "must be positive"));
        }
        let s = &self.screening;
        if s.enabled && s.scopes.is_empty() {
            return Err(ConfigError::invalid("screening.scopes", "at least one scope is required"));
        }
        if !(0.0..=1.0).contains(&s.sanction_threshold) {
            return Err(ConfigError::invalid(
                "screening.sanction_threshold",
                "must be within [0, 1]",
            ));
        }
        if self.columns.procurement.value.is_empty() {
            return Err(ConfigError::invalid(
                "columns.procurement.value",
                "at least one value column is required",
            ));
        }
        Ok(())
    }
}
