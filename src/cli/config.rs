//! CLI configuration conversion
//!
//! Layers the service configuration: TOML file (or defaults), then
//! environment variables, then command line flags.

use super::main_impl::{Cli, Command};
use crate::config::{EngineKind, ServiceConfig};
use anyhow::{Context, Result};

/// Builder for converting CLI arguments to a [`ServiceConfig`]
pub struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Convert CLI arguments to a validated service configuration
    ///
    /// # Errors
    /// - Unreadable or malformed TOML file
    /// - Invalid environment variable or flag values
    pub fn from_cli(cli: &Cli) -> Result<ServiceConfig> {
        Self::from_cli_with(cli, |key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_cli`] with an injectable environment lookup
    pub fn from_cli_with<F>(cli: &Cli, lookup: F) -> Result<ServiceConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &cli.config {
            Some(path) => ServiceConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => ServiceConfig::default(),
        };
        config
            .apply_overrides(lookup)
            .context("Invalid environment configuration")?;

        if let Command::Serve {
            bind,
            engine,
            disable_ai,
        } = &cli.command
        {
            if let Some(bind) = bind {
                config.bind_addr.clone_from(bind);
            }
            if let Some(engine) = engine {
                config.engine = engine
                    .parse::<EngineKind>()
                    .with_context(|| format!("Unknown engine '{}'", engine))?;
            }
            if *disable_ai {
                config.disable_ai = true;
            }
        }

        Self::validate_cli(&config)?;
        Ok(config)
    }

    /// Validate the merged configuration
    pub fn validate_cli(config: &ServiceConfig) -> Result<()> {
        config.validate().context("Invalid configuration")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["idphoto-backend"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = CliConfigBuilder::from_cli_with(&parse(&["serve"]), lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, ServiceConfig::default().bind_addr);
        assert!(!config.disable_ai);
    }

    #[test]
    fn test_flags_override_environment() {
        let cli = parse(&["serve", "--bind", "127.0.0.1:9100", "--engine", "none"]);
        let config =
            CliConfigBuilder::from_cli_with(&cli, lookup(&[("PORT", "7000"), ("MATTING_ENGINE", "subprocess")]))
                .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9100");
        assert_eq!(config.engine, EngineKind::None);
    }

    #[test]
    fn test_environment_applies_to_offline_commands() {
        let cli = parse(&["remove", "in.jpg"]);
        let config = CliConfigBuilder::from_cli_with(&cli, lookup(&[("DISABLE_AI", "1")])).unwrap();
        assert!(config.disable_ai);
    }

    #[test]
    fn test_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.toml");
        std::fs::write(&path, "bind_addr = \"0.0.0.0:8181\"\njpeg_quality = 80\n").unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "serve"]);
        let config = CliConfigBuilder::from_cli_with(&cli, lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8181");
        assert_eq!(config.jpeg_quality, 80);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cli = parse(&["serve", "--engine", "gpu-magic"]);
        assert!(CliConfigBuilder::from_cli_with(&cli, lookup(&[])).is_err());

        let cli = parse(&["--config", "/nonexistent/service.toml", "serve"]);
        assert!(CliConfigBuilder::from_cli_with(&cli, lookup(&[])).is_err());
    }
}
