use super::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    // Perform environment variable substitution
    let config = substitute_env_vars(config);

    // Validate configuration
    validate_config(&config)?;

    Ok(config)
}

fn substitute_env_vars(mut config: Config) -> Config {
    for field in [
        &mut config.storage.path,
        &mut config.sandbox.image,
        &mut config.content.exercises_dir,
        &mut config.content.origins_dir,
        &mut config.content.upstreams_dir,
        &mut config.content.editor_dir,
    ] {
        if let Some(name) = field.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
            if let Ok(value) = std::env::var(name) {
                *field = value;
            }
        }
    }

    config
}

fn validate_config(config: &Config) -> Result<()> {
    if config.sandbox.image.is_empty() {
        anyhow::bail!("Sandbox image must be specified");
    }

    if config.sandbox.user.is_empty() {
        anyhow::bail!("Sandbox user must be specified");
    }

    if config.timeouts.exec_secs == 0 || config.timeouts.provision_secs == 0 {
        anyhow::bail!("Timeouts must be non-zero");
    }

    let valid_formats = ["pretty", "compact", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        anyhow::bail!("Invalid log format: {}", config.logging.format);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = Config::default();
        config.timeouts.exec_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn env_substitution_replaces_known_vars() {
        std::env::set_var("GITGYM_TEST_DB", "/tmp/test.db");
        let mut config = Config::default();
        config.storage.path = "${GITGYM_TEST_DB}".to_string();
        let config = substitute_env_vars(config);
        assert_eq!(config.storage.path, "/tmp/test.db");
    }
}
