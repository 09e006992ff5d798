use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

const ENV_PREFIX: &str = "HANDLER_PLUGIN_";

pub async fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file("handler-plugin.toml"))
        .merge(Json::file("handler-plugin.json"))
        .merge(Yaml::file("handler-plugin.yaml"))
        .merge(Yaml::file("handler-plugin.yml"))
        .merge(Env::prefixed(ENV_PREFIX).split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    finish(config)
}

pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    if !path.exists() {
        return Err(ConfigError::Parse(format!(
            "Configuration file not found: {}",
            path.display()
        ))
        .into());
    }

    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    finish(config)
}

fn finish(config: Config) -> Result<Config> {
    let config = apply_env_substitutions(config)?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.max_body_bytes == 0 {
        return Err(
            ConfigError::Validation("server.maxBodyBytes must be greater than 0".into()).into(),
        );
    }

    if let Some(path) = &config.server.metrics_path {
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "server.metricsPath '{path}' must start with '/'"
            ))
            .into());
        }
    }

    let mut names = HashSet::new();
    for (index, plugin) in config.plugins.iter().enumerate() {
        if plugin.name.trim().is_empty() {
            return Err(
                ConfigError::Validation(format!("Plugin #{} has an empty name", index + 1)).into(),
            );
        }
        if !names.insert(plugin.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Plugin name '{}' is used more than once",
                plugin.name
            ))
            .into());
        }
        // An empty path is a provisioning error, reported when the plugin starts.
        for (field, value) in [
            ("handshakeTimeoutMs", plugin.handshake_timeout_ms),
            ("callTimeoutMs", plugin.call_timeout_ms),
            ("stopTimeoutMs", plugin.stop_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "Plugin '{}' has {field} of 0",
                    plugin.name
                ))
                .into());
            }
        }
    }

    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    for plugin in config.plugins.iter_mut() {
        plugin.path = substitute_env_vars(&plugin.path)?;

        for values in plugin.config.values_mut() {
            for value in values.iter_mut() {
                *value = substitute_env_vars(value)?;
            }
        }
    }

    Ok(config)
}

/// Expand `${VAR}` and `${VAR:-default}` references.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::Parse(e.to_string()))?;

    for cap in re.captures_iter(input) {
        let expr = &cap[1];
        let value = match expr.split_once(":-") {
            Some((name, default)) => std::env::var(name).unwrap_or_else(|_| default.to_string()),
            None => std::env::var(expr).map_err(|_| {
                ConfigError::EnvVar(format!("Environment variable '{expr}' not found"))
            })?,
        };
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PluginEntry;
    use crate::error::PluginError;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_env_substitution() {
        std::env::set_var("HANDLER_PLUGIN_TEST_ROOT", "/srv/www");

        let result = substitute_env_vars("${HANDLER_PLUGIN_TEST_ROOT}/public").unwrap();
        assert_eq!(result, "/srv/www/public");

        let result = substitute_env_vars("${HANDLER_PLUGIN_TEST_MISSING:-dist}").unwrap();
        assert_eq!(result, "dist");

        let err = substitute_env_vars("${HANDLER_PLUGIN_TEST_MISSING}").unwrap_err();
        assert!(matches!(err, PluginError::Config(ConfigError::EnvVar(_))));

        std::env::remove_var("HANDLER_PLUGIN_TEST_ROOT");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = Config {
            plugins: vec![
                PluginEntry::new("static", "/bin/a"),
                PluginEntry::new("static", "/bin/b"),
            ],
            ..Config::default()
        };
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("used more than once"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut entry = PluginEntry::new("static", "/bin/a");
        entry.call_timeout_ms = 0;
        let config = Config {
            plugins: vec![entry],
            ..Config::default()
        };
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("callTimeoutMs"));
    }

    #[tokio::test]
    async fn test_load_yaml_with_defaults() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
server:
  listen: "127.0.0.1:9090"
  metricsPath: /__metrics
plugins:
  - name: static
    path: ./target/debug/static-plugin
    config:
      index_names: [home.html]
      pass_next: []
    callTimeoutMs: 500
"#
        )
        .unwrap();

        let config = load_from_path(file.path()).await.unwrap();
        assert_eq!(config.server.listen.port(), 9090);
        assert_eq!(config.server.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(config.server.metrics_path.as_deref(), Some("/__metrics"));

        let plugin = &config.plugins[0];
        assert_eq!(plugin.config["index_names"], vec!["home.html"]);
        assert!(plugin.config["pass_next"].is_empty());
        assert_eq!(plugin.call_timeout_ms, 500);
        assert_eq!(plugin.handshake_timeout_ms, 10_000);
        assert_eq!(plugin.handshake.magic_cookie_key, "STATIC_PLUGIN");
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let err = load_from_path("handler-plugin.ini").await.unwrap_err();
        assert!(err.to_string().contains("Unsupported config file format"));
    }
}
