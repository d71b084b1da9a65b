//! Configuration validation engine.
//!
//! Checks a config file against the known schema, detects unknown/misspelled
//! fields, and reports semantic problems with the job list.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use cadence_common::duration::parse_duration;

use crate::{
    env_subst::substitute_env,
    loader::{find_config_file, parse_config_value},
    schema::CadenceConfig,
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "invalid-value",
    /// "trigger", "duplicate", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "jobs[2].every"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}]: {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Expected shape of the configuration.
enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Array(Box<KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Array, Leaf, Struct};

    let scheduler = Struct(HashMap::from([
        ("enabled_on_start", Leaf),
        ("poll_interval", Leaf),
        ("shutdown_grace", Leaf),
        ("history_retry_attempts", Leaf),
        ("history_retry_backoff", Leaf),
        ("database_url", Leaf),
    ]));

    let job = Struct(HashMap::from([
        ("name", Leaf),
        ("every", Leaf),
        ("cron", Leaf),
        ("tz", Leaf),
        ("active", Leaf),
        ("command", Leaf),
        ("args", Leaf),
        ("workdir", Leaf),
        ("timeout", Leaf),
    ]));

    Struct(HashMap::from([
        ("scheduler", scheduler),
        ("jobs", Array(Box::new(job))),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered one when
/// `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(content) => validate_str(&substitute_env(&content), &actual_path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate raw config text. The format is taken from `path`'s extension.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let value = match parse_config_value(raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    // 3. Types, then semantics on what parsed
    match serde_json::from_value::<CadenceConfig>(value) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Validate TOML text, for callers without a file.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    validate_str(toml_str, Path::new("cadence.toml"))
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (value, schema) {
        (serde_json::Value::Object(table), KnownKeys::Struct(fields)) => {
            let known_keys: Vec<&str> = fields.keys().copied().collect();
            for (key, child_value) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                if let Some(child_schema) = fields.get(key.as_str()) {
                    check_unknown_fields(child_value, child_schema, &path, diagnostics);
                    continue;
                }
                let message = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "unknown-field",
                    path,
                    message,
                ));
            }
        },
        (serde_json::Value::Array(items), KnownKeys::Array(item_schema)) => {
            for (i, item) in items.iter().enumerate() {
                check_unknown_fields(item, item_schema, &format!("{prefix}[{i}]"), diagnostics);
            }
        },
        // Leaf or type mismatch; type errors are reported by deserialization.
        _ => {},
    }
}

/// Semantic checks on a parsed config. Also used on the env-overridden config.
#[must_use]
pub fn validate_config(config: &CadenceConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let scheduler = &config.scheduler;

    for (field, raw) in [
        ("poll_interval", &scheduler.poll_interval),
        ("shutdown_grace", &scheduler.shutdown_grace),
        ("history_retry_backoff", &scheduler.history_retry_backoff),
    ] {
        if let Err(e) = parse_duration(raw) {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "invalid-value",
                format!("scheduler.{field}"),
                e.to_string(),
            ));
        }
    }

    if scheduler.history_retry_attempts == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "invalid-value",
            "scheduler.history_retry_attempts",
            "0 attempts is treated as 1 (no retries)",
        ));
    }

    if config.jobs.is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "invalid-value",
            "jobs",
            "no jobs configured; the scheduler will idle",
        ));
    }

    let mut seen = HashSet::new();
    for (i, job) in config.jobs.iter().enumerate() {
        let path = format!("jobs[{i}]");
        let name = job.name.trim();

        if name.is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "invalid-value",
                format!("{path}.name"),
                "job name must not be empty",
            ));
        } else if !seen.insert(name) {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "duplicate",
                format!("{path}.name"),
                format!("duplicate job name \"{name}\""),
            ));
        }

        match (&job.every, &job.cron) {
            (None, None) => diagnostics.push(Diagnostic::new(
                Severity::Error,
                "trigger",
                path.clone(),
                "one of `every` or `cron` is required",
            )),
            (Some(_), Some(_)) => diagnostics.push(Diagnostic::new(
                Severity::Error,
                "trigger",
                path.clone(),
                "`every` and `cron` are mutually exclusive",
            )),
            (Some(every), None) => {
                if let Err(e) = parse_duration(every) {
                    diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "trigger",
                        format!("{path}.every"),
                        e.to_string(),
                    ));
                }
            },
            (None, Some(cron)) => {
                if cron.trim().is_empty() {
                    diagnostics.push(Diagnostic::new(
                        Severity::Error,
                        "trigger",
                        format!("{path}.cron"),
                        "cron expression must not be empty",
                    ));
                }
            },
        }

        if let Some(tz) = &job.tz {
            if job.cron.is_none() {
                diagnostics.push(Diagnostic::new(
                    Severity::Warning,
                    "trigger",
                    format!("{path}.tz"),
                    "`tz` only applies to cron triggers and is ignored",
                ));
            } else if tz.parse::<chrono_tz::Tz>().is_err() {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "trigger",
                    format!("{path}.tz"),
                    format!("unknown timezone \"{tz}\""),
                ));
            }
        }

        if job.command.trim().is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "invalid-value",
                format!("{path}.command"),
                "command must not be empty",
            ));
        }

        if let Err(e) = job.timeout() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "invalid-value",
                format!("{path}.timeout"),
                e.to_string(),
            ));
        }

        if let Some(dir) = &job.workdir
            && !Path::new(dir).is_dir()
        {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "file-ref",
                format!("{path}.workdir"),
                format!("directory does not exist: {dir}"),
            ));
        }
    }

    diagnostics
}
