//! Loads the converter YAML configuration.
//!
//! Supports environment variable substitution using `${VAR}` and
//! `${VAR:-default}`. Storage settings from the environment (`S3_BUCKET`
//! or `STORE_ROOT`) take precedence over the file, and `SOURCE_ROOT`
//! overrides the record archive location.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use chunk_store::StorageConfig;
use conversion::ConversionConfig;

/// Load, expand and validate a conversion configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ConversionConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read conversion config from {:?}", path.as_ref()))?;

    let config = parse_config(&content)
        .with_context(|| format!("Invalid conversion config {:?}", path.as_ref()))?;

    info!(
        groups = ?config.groups.keys().collect::<Vec<_>>(),
        storage = %config.storage.describe(),
        source_root = %config.source_root,
        "Loaded configuration"
    );
    Ok(config)
}

/// Parse configuration text, applying environment overrides.
pub fn parse_config(content: &str) -> Result<ConversionConfig> {
    let expanded = expand_env_vars(content)?;

    let mut config: ConversionConfig =
        serde_yaml::from_str(&expanded).context("Failed to parse conversion config YAML")?;

    if let Some(storage) = StorageConfig::from_env() {
        config.storage = storage;
    }
    if let Ok(root) = std::env::var("SOURCE_ROOT") {
        if !root.is_empty() {
            config.source_root = root;
        }
    }

    anyhow::ensure!(!config.source_root.is_empty(), "source_root cannot be empty");
    config.validate()?;
    Ok(config)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand `${VAR}` and `${VAR:-default}` references.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();

        let mut expr = String::new();
        let mut depth = 1;
        while depth > 0 {
            match chars.next() {
                Some('{') => {
                    depth += 1;
                    expr.push('{');
                }
                Some('}') => {
                    depth -= 1;
                    if depth > 0 {
                        expr.push('}');
                    }
                }
                Some(c) => expr.push(c),
                None => anyhow::bail!("Unclosed variable substitution: ${{{}", expr),
            }
        }

        result.push_str(&resolve_var_expr(&expr)?);
    }

    Ok(result)
}

fn resolve_var_expr(expr: &str) -> Result<String> {
    match expr.split_once(":-") {
        Some((name, default)) => match std::env::var(name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        },
        None => std::env::var(expr.trim())
            .with_context(|| format!("Environment variable {} not set", expr.trim())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
storage:
  backend: local
  path: ${CONVERTER_TEST_STORES:-/tmp/stores}
source_root: /archive
parallelism: 2
groups:
  sfc:
    variables:
      - name: t2m
        short_name: t2m
        param_id: 167
        units: K
        grid: { type: regular_lat_lon, resolution: 45.0, bounds: { min_lon: 0.0, min_lat: -90.0, max_lon: 315.0, max_lat: 90.0 } }
    date_range: { start: 2020-01-01, end: 2020-01-02 }
"#;

    #[test]
    fn test_expand_env_vars_simple() {
        std::env::set_var("CONVERTER_TEST_VAR", "era5");
        let result = expand_env_vars("s3://${CONVERTER_TEST_VAR}/zarr").unwrap();
        assert_eq!(result, "s3://era5/zarr");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        std::env::remove_var("CONVERTER_UNSET_VAR");
        let result = expand_env_vars("level: ${CONVERTER_UNSET_VAR:-5}").unwrap();
        assert_eq!(result, "level: 5");
    }

    #[test]
    fn test_expand_env_vars_errors() {
        std::env::remove_var("CONVERTER_REQUIRED_VAR");
        assert!(expand_env_vars("${CONVERTER_REQUIRED_VAR}").is_err());
        assert!(expand_env_vars("${CONVERTER_OPEN").is_err());
        assert_eq!(expand_env_vars("cost: $5").unwrap(), "cost: $5");
    }

    #[test]
    fn test_resolve_empty_value_uses_default() {
        std::env::set_var("CONVERTER_EMPTY_VAR", "");
        assert_eq!(resolve_var_expr("CONVERTER_EMPTY_VAR:-x").unwrap(), "x");
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("converter.yaml");
        fs::write(&path, CONFIG).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.parallelism, 2);
        assert_eq!(config.groups["sfc"].variables[0].param_id, 167);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let broken = CONFIG.replace("param_id: 167", "param_id: 999999");
        let err = parse_config(&broken).unwrap_err();
        assert!(format!("{:#}", err).contains("999999"));
        assert!(load_config("/nonexistent/converter.yaml").is_err());
    }
}
