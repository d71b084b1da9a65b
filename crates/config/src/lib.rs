//! Configuration loading, validation and env substitution.
//!
//! Config files: `cadence.toml`, `cadence.yaml`/`cadence.yml`, or `cadence.json`.
//! Searched in `./` then the user config directory (`~/.config/cadence/` on Linux).
//!
//! Supports `${ENV_VAR}` substitution in the raw file and `CADENCE_*`
//! overrides for the `[scheduler]` section.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config,
    },
    schema::{CadenceConfig, JobConfig, SchedulerConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
