use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::CadenceConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["cadence.toml", "cadence.yaml", "cadence.yml", "cadence.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<CadenceConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Load the config file as a generic JSON value, after env substitution.
pub fn load_config_value(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config_value(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./cadence.{toml,yaml,yml,json}` (project-local)
/// 2. `<config dir>/cadence.{toml,yaml,yml,json}` (user-global)
///
/// Returns `CadenceConfig::default()` if no config file is found or it fails
/// to load. `CADENCE_*` overrides are applied either way.
pub fn discover_and_load() -> CadenceConfig {
    let mut config = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                CadenceConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        CadenceConfig::default()
    };
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/cadence/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "cadence").map(|d| d.config_dir().to_path_buf())
}

/// Apply `CADENCE_*` environment overrides to the `[scheduler]` section.
pub fn apply_env_overrides(config: &mut CadenceConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut CadenceConfig, lookup: impl Fn(&str) -> Option<String>) {
    let scheduler = &mut config.scheduler;

    if let Some(raw) = lookup("CADENCE_ENABLED_ON_START") {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => scheduler.enabled_on_start = true,
            "0" | "false" | "no" | "off" => scheduler.enabled_on_start = false,
            other => warn!(value = other, "ignoring invalid CADENCE_ENABLED_ON_START"),
        }
    }
    if let Some(raw) = lookup("CADENCE_POLL_INTERVAL") {
        scheduler.poll_interval = raw;
    }
    if let Some(raw) = lookup("CADENCE_SHUTDOWN_GRACE") {
        scheduler.shutdown_grace = raw;
    }
    if let Some(raw) = lookup("CADENCE_HISTORY_RETRY_ATTEMPTS") {
        match raw.trim().parse() {
            Ok(n) => scheduler.history_retry_attempts = n,
            Err(e) => warn!(value = %raw, error = %e, "ignoring invalid CADENCE_HISTORY_RETRY_ATTEMPTS"),
        }
    }
    if let Some(raw) = lookup("CADENCE_HISTORY_RETRY_BACKOFF") {
        scheduler.history_retry_backoff = raw;
    }
    if let Some(raw) = lookup("CADENCE_DATABASE_URL") {
        scheduler.database_url = (!raw.trim().is_empty()).then_some(raw);
    }
}

pub(crate) fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CadenceConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

pub(crate) fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
