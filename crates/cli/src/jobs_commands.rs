use {
    anyhow::Result,
    cadence_config::CadenceConfig,
    chrono::{DateTime, Utc},
    serde_json::json,
};

use crate::app;

/// One configured job as shown by `cadence jobs`.
struct JobLine {
    id: u32,
    name: String,
    trigger: String,
    active: bool,
    next: Option<DateTime<Utc>>,
}

fn job_lines(config: &CadenceConfig, now: DateTime<Utc>) -> Result<Vec<JobLine>> {
    let registry = app::build_registry(config)?;
    Ok(registry
        .list_jobs()
        .iter()
        .map(|job| JobLine {
            id: job.id(),
            name: job.name().to_string(),
            trigger: job.trigger().describe(),
            active: job.default_active(),
            next: job
                .default_active()
                .then(|| job.trigger().next_run_after(now))
                .flatten(),
        })
        .collect())
}

pub fn list_jobs(config: &CadenceConfig, as_json: bool) -> Result<()> {
    let lines = job_lines(config, Utc::now())?;

    if as_json {
        let jobs: Vec<_> = lines
            .iter()
            .map(|l| {
                json!({
                    "jobId": l.id,
                    "displayName": l.name,
                    "trigger": l.trigger,
                    "active": l.active,
                    "nextRunTime": l.next.map(|t| t.to_rfc3339()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if lines.is_empty() {
        println!("No jobs configured.");
        return Ok(());
    }
    for l in &lines {
        let next = match (l.active, l.next) {
            (false, _) => "inactive".to_string(),
            (true, Some(t)) => t.to_rfc3339(),
            (true, None) => "never".to_string(),
        };
        println!("  {:>3}  {:<24} {:<36} {next}", l.id, l.name, l.trigger);
    }
    Ok(())
}
