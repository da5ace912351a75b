// Configuration source loading
//
// Priority order:
// 1. Environment variables (STREAMTOP_* prefix)
// 2. Config file path from STREAMTOP_CONFIG
// 3. Inline config content from STREAMTOP_CONFIG_CONTENT
// 4. Default config files (./config.toml, ./.streamtop.toml)
// 5. Built-in defaults

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::RuntimeConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

const DEFAULT_CONFIG_FILES: &[&str] = &["./config.toml", "./.streamtop.toml"];

/// Load configuration using native environment/file access.
pub fn load_config() -> Result<RuntimeConfig> {
    load_with_env(&StdEnvSource)
}

fn load_with_env<E: EnvSource>(env_source: &E) -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::default();

    if let Some(file_config) = load_from_file(env_source)? {
        config.merge(file_config);
    }

    env_overrides::apply_env_overrides(&mut config, env_source)?;
    config.validate()?;
    Ok(config)
}

fn load_from_file<E: EnvSource>(env_source: &E) -> Result<Option<RuntimeConfig>> {
    if let Some(path) = env_source.get("CONFIG") {
        return parse_file(Path::new(&path)).map(Some);
    }

    if let Some(content) = env_source.get("CONFIG_CONTENT") {
        let config: RuntimeConfig = toml::from_str(&content)
            .context("Failed to parse inline config from STREAMTOP_CONFIG_CONTENT")?;
        return Ok(Some(config));
    }

    for path in DEFAULT_CONFIG_FILES {
        let path = Path::new(path);
        if path.exists() {
            return parse_file(path).map(Some);
        }
    }

    Ok(None)
}

fn parse_file(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration from a specific file path (for CLI --config flag).
/// Returns error if file doesn't exist or can't be parsed.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let file_config = parse_file(path.as_ref())?;

    let mut config = RuntimeConfig::default();
    config.merge(file_config);

    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;

    config.validate()?;
    Ok(config)
}

struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IngestMode;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapEnv(HashMap<String, String>);

    impl MapEnv {
        fn with(mut self, key: &str, value: impl Into<String>) -> Self {
            self.0.insert(key.to_string(), value.into());
            self
        }
    }

    impl EnvSource for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    #[test]
    fn test_inline_content_then_env_override() {
        let env = MapEnv::default()
            .with(
                "CONFIG_CONTENT",
                "[window]\nlength_secs = 20\nslide_secs = 5\n[ingest]\nmode = \"listen\"\n",
            )
            .with("SLIDE_SECS", "10");

        let config = load_with_env(&env).unwrap();
        assert_eq!(config.window.length_secs, 20);
        assert_eq!(config.window.slide_secs, 10);
        assert_eq!(config.ingest.mode, IngestMode::Listen);
    }

    #[test]
    fn test_config_path_takes_precedence_over_inline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamtop.toml");
        std::fs::write(&path, "[report]\ntop_k = 4\n").unwrap();

        let env = MapEnv::default()
            .with("CONFIG", path.display().to_string())
            .with("CONFIG_CONTENT", "[report]\ntop_k = 99\n");

        let config = load_with_env(&env).unwrap();
        assert_eq!(config.report.top_k, 4);
    }

    #[test]
    fn test_missing_config_path_is_error() {
        let env = MapEnv::default().with("CONFIG", "/definitely/not/here.toml");
        let err = load_with_env(&env).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_layered_config_fails_validation() {
        let env = MapEnv::default().with("CONFIG_CONTENT", "[window]\nlength_secs = 25\n");
        assert!(load_with_env(&env).is_err());
    }

    #[test]
    fn test_load_from_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[checkpoint]\nbackend = \"memory\"\ninterval_secs = 20\n",
        )
        .unwrap();

        let config = load_from_file_path(&path).unwrap();
        assert_eq!(config.checkpoint.interval_secs, 20);
        assert!(load_from_file_path(dir.path().join("missing.toml")).is_err());
    }
}
