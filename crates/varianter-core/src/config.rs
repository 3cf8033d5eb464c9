//! Configuration for the varianter.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during config loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("mux-path entries cannot be empty")]
    EmptyMuxPath,
    #[error("inject entry '{0}' needs at least key:value")]
    InvalidInject(String),
}

/// Varianter configuration, usually from `varianter.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VarianterConfig {
    /// Document references (`[using:]path`, globs allowed).
    #[serde(default)]
    pub files: Vec<String>,

    /// Relative lookup scopes (default: `["/run/*"]`).
    #[serde(rename = "mux-path", alias = "mux_path", default = "default_mux_path")]
    pub mux_path: Vec<String>,

    #[serde(
        rename = "filter-only",
        alias = "filter_only",
        alias = "mux-filter-only",
        alias = "mux_filter_only",
        default
    )]
    pub mux_filter_only: Vec<String>,

    #[serde(
        rename = "filter-out",
        alias = "filter_out",
        alias = "mux-filter-out",
        alias = "mux_filter_out",
        default
    )]
    pub mux_filter_out: Vec<String>,

    /// `[path:]key:value` entries applied after merging.
    #[serde(rename = "inject", alias = "mux-inject", alias = "mux_inject", default)]
    pub mux_inject: Vec<String>,

    /// Write the variants dump here after parsing.
    #[serde(rename = "dump-path", alias = "dump_path", default)]
    pub dump_path: Option<PathBuf>,

    /// Replay variants from this dump instead of parsing documents.
    #[serde(rename = "load-path", alias = "load_path", default)]
    pub load_path: Option<PathBuf>,
}

fn default_mux_path() -> Vec<String> {
    vec!["/run/*".to_string()]
}

impl Default for VarianterConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            mux_path: default_mux_path(),
            mux_filter_only: Vec::new(),
            mux_filter_out: Vec::new(),
            mux_inject: Vec::new(),
            dump_path: None,
            load_path: None,
        }
    }
}

/// Load configuration from a YAML file.
///
/// If the file doesn't exist, returns default configuration.
///
/// # Errors
/// Returns an error if:
/// - The file exists but cannot be read
/// - The YAML is invalid
/// - The configuration fails [`validate_config`]
pub fn load_config(path: &Path) -> Result<VarianterConfig, ConfigError> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)?
    } else {
        VarianterConfig::default()
    };

    validate_config(&config)?;
    Ok(config)
}

/// Validate the configuration.
///
/// # Errors
/// Returns an error for an empty `mux-path` entry or an inject entry with
/// fewer than two `:`-separated fields.
pub fn validate_config(config: &VarianterConfig) -> Result<(), ConfigError> {
    if config.mux_path.iter().any(String::is_empty) {
        return Err(ConfigError::EmptyMuxPath);
    }
    if let Some(entry) = config.mux_inject.iter().find(|entry| !entry.contains(':')) {
        return Err(ConfigError::InvalidInject(entry.clone()));
    }
    Ok(())
}

/// CLI override options for configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub files: Option<Vec<String>>,
    pub mux_path: Option<Vec<String>>,
    pub mux_filter_only: Option<Vec<String>>,
    pub mux_filter_out: Option<Vec<String>>,
    pub mux_inject: Option<Vec<String>>,
    pub dump_path: Option<PathBuf>,
    pub load_path: Option<PathBuf>,
}

/// Apply CLI overrides to a configuration.
#[must_use]
pub fn apply_overrides(mut config: VarianterConfig, overrides: &ConfigOverrides) -> VarianterConfig {
    if let Some(ref files) = overrides.files {
        config.files.clone_from(files);
    }
    if let Some(ref mux_path) = overrides.mux_path {
        config.mux_path.clone_from(mux_path);
    }
    if let Some(ref filter_only) = overrides.mux_filter_only {
        config.mux_filter_only.clone_from(filter_only);
    }
    if let Some(ref filter_out) = overrides.mux_filter_out {
        config.mux_filter_out.clone_from(filter_out);
    }
    if let Some(ref inject) = overrides.mux_inject {
        config.mux_inject.clone_from(inject);
    }
    if let Some(ref dump_path) = overrides.dump_path {
        config.dump_path = Some(dump_path.clone());
    }
    if let Some(ref load_path) = overrides.load_path {
        config.load_path = Some(load_path.clone());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_load_config_default_when_missing() -> TestResult {
        let dir = TempDir::new()?;
        let config = load_config(&dir.path().join("varianter.yaml"))?;
        assert_eq!(config, VarianterConfig::default());
        assert_eq!(config.mux_path, ["/run/*"]);
        Ok(())
    }

    #[test]
    fn test_load_config_from_file() -> TestResult {
        let dir = TempDir::new()?;
        let path = dir.path().join("varianter.yaml");
        let config_content = r"
files:
  - hw.yaml
  - env:os.yaml
mux-path: [/run/hw/*, /run/*]
filter-out: [/run/hw/gpu]
inject:
  - /run/hw:timeout:30
dump-path: variants.json
";
        std::fs::write(&path, config_content)?;

        let config = load_config(&path)?;
        assert_eq!(config.files, ["hw.yaml", "env:os.yaml"]);
        assert_eq!(config.mux_path, ["/run/hw/*", "/run/*"]);
        assert!(config.mux_filter_only.is_empty());
        assert_eq!(config.mux_filter_out, ["/run/hw/gpu"]);
        assert_eq!(config.mux_inject, ["/run/hw:timeout:30"]);
        assert_eq!(config.dump_path, Some(PathBuf::from("variants.json")));
        assert_eq!(config.load_path, None);
        Ok(())
    }

    #[test]
    fn test_load_config_snake_case_keys() -> TestResult {
        let dir = TempDir::new()?;
        let path = dir.path().join("varianter.yaml");
        let config_content = r"
mux_path: [/env/*]
mux_filter_only: [/run/a]
mux_filter_out: [/run/b]
mux_inject: [k:v]
dump_path: out.json
load_path: in.json
";
        std::fs::write(&path, config_content)?;

        let config = load_config(&path)?;
        assert_eq!(config.mux_path, ["/env/*"]);
        assert_eq!(config.mux_filter_only, ["/run/a"]);
        assert_eq!(config.mux_filter_out, ["/run/b"]);
        assert_eq!(config.mux_inject, ["k:v"]);
        assert_eq!(config.dump_path, Some(PathBuf::from("out.json")));
        assert_eq!(config.load_path, Some(PathBuf::from("in.json")));
        Ok(())
    }

    #[test]
    fn test_load_config_unknown_field() -> TestResult {
        let dir = TempDir::new()?;
        let path = dir.path().join("varianter.yaml");
        std::fs::write(&path, "mux_paths: [/run/*]\n")?;
        assert!(matches!(load_config(&path), Err(ConfigError::Yaml(_))));
        Ok(())
    }

    #[test]
    fn test_validate_rejects_bad_entries() {
        let config = VarianterConfig {
            mux_path: vec!["/run/*".to_string(), String::new()],
            ..Default::default()
        };
        assert!(matches!(validate_config(&config), Err(ConfigError::EmptyMuxPath)));

        let config = VarianterConfig {
            mux_inject: vec!["novalue".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidInject(entry)) if entry == "novalue"
        ));
    }

    #[test]
    fn test_apply_overrides() {
        let config = VarianterConfig {
            files: vec!["from-config.yaml".to_string()],
            ..Default::default()
        };
        let overrides = ConfigOverrides {
            mux_path: Some(vec!["/env/*".to_string()]),
            load_path: Some(PathBuf::from("dump.json")),
            ..Default::default()
        };

        let result = apply_overrides(config, &overrides);
        assert_eq!(result.mux_path, ["/env/*"]);
        assert_eq!(result.load_path, Some(PathBuf::from("dump.json")));
        // Non-overridden values should remain
        assert_eq!(result.files, ["from-config.yaml"]);
    }

    #[test]
    fn test_apply_overrides_empty() {
        let config = VarianterConfig::default();
        let result = apply_overrides(config.clone(), &ConfigOverrides::default());
        assert_eq!(result, config);
    }
}
