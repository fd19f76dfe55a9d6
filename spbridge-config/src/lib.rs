//! Layered configuration loading utilities.

use std::path::Path;

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use spbridge_gateway::GatewayConfig;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            gateway: GatewayConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `SPBRIDGE_`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(false));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("SPBRIDGE")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn empty_sources_fall_back_to_defaults() {
        let config = parse("");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.gateway.gateway, "http://localhost:5000/");
        assert_eq!(config.gateway.refresh_secs, 30);
        assert!(config.gateway.login.is_none());
        assert!(!config.gateway.practice);
    }

    #[test]
    fn gateway_section_overrides_defaults() {
        let config = parse(
            r#"
            log_level = "debug"

            [gateway]
            gateway = "http://10.0.0.5:8080/"
            account = "DEMO-1"
            practice = true
            refresh_secs = 5
            "#,
        );
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.gateway.gateway, "http://10.0.0.5:8080/");
        assert_eq!(config.gateway.account, "DEMO-1");
        assert!(config.gateway.practice);
        assert_eq!(config.gateway.refresh_secs, 5);
        assert_eq!(config.gateway.environment(), "practice");
    }

    #[test]
    fn login_payload_is_free_form_json() {
        let config = parse(
            r#"
            [gateway.login]
            user = "demo"
            password = "demo"
            "#,
        );
        let login = config.gateway.login.expect("login payload");
        assert_eq!(login["user"], "demo");
        assert_eq!(login["password"], "demo");
    }
}
