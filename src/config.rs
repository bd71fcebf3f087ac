use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    edge_count::DEFAULT_DENSE_THRESHOLD_MULTIPLIER, noise::DEFAULT_MAX_RESAMPLE_ATTEMPTS,
    solver::SolveLimits,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConfigFormat {
    Auto,
    Toml,
    Yaml,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {format:?} config: {details}")]
    Parse {
        format: ConfigFormat,
        details: String,
    },
    #[error("configuration invalid: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct NodeDpConfig {
    #[serde(default)]
    pub edge_count: EdgeCountConfig,
    #[serde(default)]
    pub degree_distribution: DegreeDistributionConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct EdgeCountConfig {
    /// Multiple of `n ln(n) / eps` the coarse estimate must reach before the
    /// flow phase is skipped.
    #[serde(default = "default_dense_threshold_multiplier")]
    pub dense_threshold_multiplier: f64,
}

impl Default for EdgeCountConfig {
    fn default() -> Self {
        Self {
            dense_threshold_multiplier: default_dense_threshold_multiplier(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct DegreeDistributionConfig {
    #[serde(default = "default_true")]
    pub enforce_accuracy_preconditions: bool,
}

impl Default for DegreeDistributionConfig {
    fn default() -> Self {
        Self {
            enforce_accuracy_preconditions: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SolverConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_variables")]
    pub max_variables: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_branch_nodes")]
    pub max_branch_nodes: usize,
    /// Solver threads allowed to run at once, abandoned ones included.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_variables: default_max_variables(),
            tolerance: default_tolerance(),
            max_branch_nodes: default_max_branch_nodes(),
            max_workers: default_max_workers(),
        }
    }
}

impl SolverConfig {
    pub fn limits(&self) -> SolveLimits {
        SolveLimits {
            timeout: Duration::from_millis(self.timeout_ms),
            max_variables: self.max_variables,
            max_branch_nodes: self.max_branch_nodes,
            tolerance: self.tolerance,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct NoiseConfig {
    #[serde(default = "default_max_resample_attempts")]
    pub max_resample_attempts: u32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            max_resample_attempts: default_max_resample_attempts(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct BudgetConfig {
    #[serde(default = "default_session_epsilon")]
    pub session_epsilon: f64,
    #[serde(default = "default_max_releases")]
    pub max_releases_per_session: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            session_epsilon: default_session_epsilon(),
            max_releases_per_session: default_max_releases(),
        }
    }
}

const fn default_dense_threshold_multiplier() -> f64 {
    DEFAULT_DENSE_THRESHOLD_MULTIPLIER
}

const fn default_true() -> bool {
    true
}

const fn default_timeout_ms() -> u64 {
    10_000
}

const fn default_max_variables() -> usize {
    250_000
}

const fn default_tolerance() -> f64 {
    1e-6
}

const fn default_max_branch_nodes() -> usize {
    2_000
}

const fn default_max_workers() -> usize {
    1
}

const fn default_max_resample_attempts() -> u32 {
    DEFAULT_MAX_RESAMPLE_ATTEMPTS
}

const fn default_session_epsilon() -> f64 {
    10.0
}

const fn default_max_releases() -> u32 {
    1_000
}

impl NodeDpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let multiplier = self.edge_count.dense_threshold_multiplier;
        if multiplier.is_nan() || multiplier <= 0.0 {
            return Err(ConfigError::Validation(
                "dense-threshold-multiplier must be positive".into(),
            ));
        }
        if self.solver.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "solver timeout must be greater than zero".into(),
            ));
        }
        if !(self.solver.tolerance > 0.0) {
            return Err(ConfigError::Validation(
                "solver tolerance must be positive".into(),
            ));
        }
        if self.solver.max_branch_nodes == 0 || self.solver.max_workers == 0 {
            return Err(ConfigError::Validation(
                "solver branch and worker limits must be at least one".into(),
            ));
        }
        if self.noise.max_resample_attempts == 0 {
            return Err(ConfigError::Validation(
                "at least one noise draw attempt is required".into(),
            ));
        }
        if !(self.budget.session_epsilon > 0.0) {
            return Err(ConfigError::Validation(
                "session epsilon must be positive".into(),
            ));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path, format: ConfigFormat) -> Result<NodeDpConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&contents, resolve_format(path, format))
}

pub fn parse_config(contents: &str, format: ConfigFormat) -> Result<NodeDpConfig, ConfigError> {
    let config: NodeDpConfig = match format {
        ConfigFormat::Toml | ConfigFormat::Auto => {
            toml::from_str(contents).map_err(|err| ConfigError::Parse {
                format: ConfigFormat::Toml,
                details: err.to_string(),
            })
        }
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse {
            format,
            details: err.to_string(),
        }),
    }?;
    config.validate()?;
    Ok(config)
}

fn resolve_format(path: &Path, format: ConfigFormat) -> ConfigFormat {
    match format {
        ConfigFormat::Auto => match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        },
        _ => format,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = parse_config("", ConfigFormat::Toml).unwrap();
        assert_eq!(config, NodeDpConfig::default());
        assert_eq!(config.edge_count.dense_threshold_multiplier, 5.0);
    }

    #[test]
    fn parses_toml_config() {
        let contents = r#"
            [edge-count]
            dense-threshold-multiplier = 3.5

            [solver]
            timeout-ms = 250
            max-variables = 1000
            max-workers = 2

            [budget]
            session-epsilon = 2.0
        "#;
        let config = parse_config(contents, ConfigFormat::Toml).unwrap();
        assert_eq!(config.edge_count.dense_threshold_multiplier, 3.5);
        assert_eq!(config.solver.limits().timeout, Duration::from_millis(250));
        assert_eq!(config.solver.tolerance, 1e-6);
        assert_eq!(config.solver.max_workers, 2);
        assert_eq!(config.solver.limits().max_branch_nodes, 2_000);
        assert_eq!(config.budget.max_releases_per_session, 1_000);
    }

    #[test]
    fn parses_yaml_config() {
        let contents = r#"
            degree-distribution:
              enforce-accuracy-preconditions: false
            noise:
              max-resample-attempts: 4
        "#;
        let config = parse_config(contents, ConfigFormat::Yaml).unwrap();
        assert!(!config.degree_distribution.enforce_accuracy_preconditions);
        assert_eq!(config.noise.max_resample_attempts, 4);
    }

    #[test]
    fn detects_invalid_multiplier() {
        let mut config = NodeDpConfig::default();
        config.edge_count.dense_threshold_multiplier = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn resolves_format_from_extension() {
        assert_eq!(
            resolve_format(Path::new("nodedp.yml"), ConfigFormat::Auto),
            ConfigFormat::Yaml
        );
        assert_eq!(
            resolve_format(Path::new("nodedp.toml"), ConfigFormat::Auto),
            ConfigFormat::Toml
        );
    }
}
