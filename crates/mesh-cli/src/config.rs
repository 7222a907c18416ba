//! Configuration loading
//!
//! A TOML file only needs the keys it changes; everything else keeps the
//! `ControllerConfig` defaults.

use std::fs;
use std::path::Path;

use mesh_core::ControllerConfig;
use tracing::info;

use crate::error::{CliError, Result};

/// Load the controller configuration from `path`, or the defaults without one
pub fn load_configuration(path: Option<&Path>) -> Result<ControllerConfig> {
    let config = match path {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            let content = fs::read_to_string(path)
                .map_err(|e| CliError::Config(format!("cannot read {}: {e}", path.display())))?;
            parse_configuration(&content)?
        }
        None => {
            info!("using default configuration");
            ControllerConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}

pub fn parse_configuration(content: &str) -> Result<ControllerConfig> {
    Ok(toml::from_str(content)?)
}

/// Effective configuration, pretty-printed
pub fn render_configuration(config: &ControllerConfig) -> Result<String> {
    Ok(serde_json::to_string_pretty(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = parse_configuration(
            r#"
            tasks_tick_ms = 100

            [settings]
            load_balancing = true
            "#,
        )
        .unwrap();
        let defaults = ControllerConfig::default();
        assert_eq!(config.tasks_tick_ms, 100);
        assert!(config.settings.load_balancing);
        assert_eq!(config.operations_tick_ms, defaults.operations_tick_ms);
        assert_eq!(config.bss_info, defaults.bss_info);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(matches!(
            parse_configuration("tasks_tick_ms = \"fast\""),
            Err(CliError::TomlParsing(_))
        ));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = load_configuration(Some(Path::new("/nonexistent/controller.toml")));
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn test_render_round_trips_through_json() {
        let rendered = render_configuration(&ControllerConfig::default()).unwrap();
        let parsed: ControllerConfig = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, ControllerConfig::default());
    }
}
