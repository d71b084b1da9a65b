//! Job action that runs an external command.

use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use {
    anyhow::{Context, bail},
    cadence_scheduler::{JobActionFn, JobContext, action_fn},
    tokio::process::Command,
    tracing::debug,
};

/// Maximum bytes of stderr kept in a failure message.
const STDERR_TAIL_BYTES: usize = 2048;

/// An external command bound to a job.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Wrap the command as a scheduler action.
    pub fn into_action(self) -> JobActionFn {
        let spec = Arc::new(self);
        action_fn(move |ctx| {
            let spec = Arc::clone(&spec);
            async move { spec.run(&ctx).await }
        })
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("CADENCE_JOB_ID", ctx.job_id.to_string())
            .env("CADENCE_JOB_NAME", &ctx.name)
            .env("CADENCE_TRIGGER", ctx.trigger_type.as_str())
            .env("CADENCE_STARTED_AT", ctx.started_at.to_rfc3339())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.program))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| anyhow::anyhow!("`{}` timed out after {limit:?}", self.program))?,
            None => child.wait_with_output().await,
        }
        .with_context(|| format!("failed to wait for `{}`", self.program))?;

        debug!(
            job_id = ctx.job_id,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "command exited"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = tail(stderr.trim_end(), STDERR_TAIL_BYTES);
            match output.status.code() {
                Some(code) if tail.is_empty() => bail!("`{}` exited with status {code}", self.program),
                Some(code) => bail!("`{}` exited with status {code}: {tail}", self.program),
                None => bail!("`{}` was terminated by a signal", self.program),
            }
        }
        Ok(())
    }
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
