use std::path::Path;

use {
    anyhow::Result,
    cadence_config::{Diagnostic, Severity, ValidationResult, validate},
};

use crate::app;

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Validate the config and print diagnostics. Exits with status 1 on errors.
pub fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let mut result = validate::validate(path);
    if !result.has_errors() {
        result.diagnostics.extend(trigger_diagnostics(&result));
    }

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

/// Build every job's trigger to catch bad cron expressions, which the
/// schema-level validation cannot see.
fn trigger_diagnostics(result: &ValidationResult) -> Vec<Diagnostic> {
    let Some(path) = result.config_path.as_deref() else {
        return Vec::new();
    };
    let Ok(config) = cadence_config::load_config(path) else {
        return Vec::new();
    };
    config
        .jobs
        .iter()
        .enumerate()
        .filter_map(|(i, job)| {
            let err = app::trigger_spec(job)
                .and_then(|spec| spec.build().map_err(Into::into))
                .err()?;
            Some(Diagnostic::new(
                Severity::Error,
                "trigger",
                format!("jobs[{i}]"),
                format!("{err:#}"),
            ))
        })
        .collect()
}
