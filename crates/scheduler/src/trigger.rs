//! Triggers: anything that can name the next instant a job should fire.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use {
    cadence_common::duration::{format_duration, parse_duration},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::error::{Error, Result};

/// Produces the next run time of a job relative to a reference instant.
pub trait Trigger: Send + Sync + fmt::Debug {
    /// Next fire time strictly after `reference`, or `None` when the trigger is exhausted.
    fn next_run_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>>;

    /// Short human-readable description, shown in job snapshots.
    fn describe(&self) -> String;
}

/// Fixed-interval trigger, optionally anchored to an instant.
///
/// Without an anchor the next run is `reference + every`. With an anchor, runs
/// land on `anchor + k * every`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalTrigger {
    every: Duration,
    anchor: Option<DateTime<Utc>>,
}

impl IntervalTrigger {
    pub fn new(every: Duration) -> Result<Self> {
        if every.is_zero() {
            return Err(Error::invalid_trigger("interval must be > 0"));
        }
        Ok(Self {
            every,
            anchor: None,
        })
    }

    #[must_use]
    pub fn anchored_at(mut self, anchor: DateTime<Utc>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    #[must_use]
    pub fn every(&self) -> Duration {
        self.every
    }
}

impl Trigger for IntervalTrigger {
    fn next_run_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let every = chrono::Duration::from_std(self.every).ok()?;
        let Some(anchor) = self.anchor else {
            return reference.checked_add_signed(every);
        };
        if anchor > reference {
            return Some(anchor);
        }
        let every_ms = every.num_milliseconds().max(1);
        let elapsed_ms = (reference - anchor).num_milliseconds();
        let intervals = elapsed_ms / every_ms;
        anchor.checked_add_signed(chrono::Duration::milliseconds((intervals + 1) * every_ms))
    }

    fn describe(&self) -> String {
        format!("every {}", format_duration(self.every))
    }
}

/// Cron-expression trigger. Parsing is delegated to the `cron` crate.
///
/// Accepts the crate's 6/7-field syntax as well as the common 5-field form
/// (`min hour dom month dow`), which is padded with a zero seconds field.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expr: String,
    schedule: cron::Schedule,
    tz: Option<chrono_tz::Tz>,
}

impl CronTrigger {
    pub fn new(expr: &str, tz: Option<&str>) -> Result<Self> {
        let schedule = cron::Schedule::from_str(expr)
            .or_else(|_| {
                let padded = format!("0 {expr} *");
                cron::Schedule::from_str(&padded)
            })
            .map_err(|source| Error::CronParse {
                expr: expr.to_string(),
                source,
            })?;

        let tz = tz
            .map(|name| {
                name.parse::<chrono_tz::Tz>()
                    .map_err(|_| Error::unknown_timezone(name))
            })
            .transpose()?;

        Ok(Self {
            expr: expr.to_string(),
            schedule,
            tz,
        })
    }
}

impl Trigger for CronTrigger {
    fn next_run_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.tz {
            Some(tz) => self
                .schedule
                .after(&reference.with_timezone(&tz))
                .next()
                .map(|dt| dt.with_timezone(&Utc)),
            None => self.schedule.after(&reference).next(),
        }
    }

    fn describe(&self) -> String {
        match self.tz {
            Some(tz) => format!("cron '{}' ({tz})", self.expr),
            None => format!("cron '{}'", self.expr),
        }
    }
}

/// Serializable trigger definition, used by configuration and admin patches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TriggerSpec {
    /// Fixed interval, as a duration string (`"30s"`, `"5m"`, `"1h"`).
    Every { every: String },
    /// Cron expression with an optional IANA timezone.
    Cron {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

impl TriggerSpec {
    #[must_use]
    pub fn every(every: impl Into<String>) -> Self {
        Self::Every {
            every: every.into(),
        }
    }

    #[must_use]
    pub fn cron(expr: impl Into<String>) -> Self {
        Self::Cron {
            expr: expr.into(),
            tz: None,
        }
    }

    /// Validate the definition and build the runtime trigger.
    pub fn build(&self) -> Result<Arc<dyn Trigger>> {
        match self {
            Self::Every { every } => {
                let every = parse_duration(every)?;
                Ok(Arc::new(IntervalTrigger::new(every)?))
            },
            Self::Cron { expr, tz } => Ok(Arc::new(CronTrigger::new(expr, tz.as_deref())?)),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn interval_without_anchor_adds_period() {
        let t = IntervalTrigger::new(Duration::from_secs(60)).unwrap();
        let now = at("2026-02-01T00:00:00Z");
        assert_eq!(t.next_run_after(now), Some(at("2026-02-01T00:01:00Z")));
    }

    #[test]
    fn interval_with_past_anchor_lands_on_grid() {
        let t = IntervalTrigger::new(Duration::from_secs(60))
            .unwrap()
            .anchored_at(at("2026-02-01T00:00:10Z"));
        // elapsed = 120s, intervals = 2, next = anchor + 3 * 60s
        let next = t.next_run_after(at("2026-02-01T00:02:10Z")).unwrap();
        assert_eq!(next, at("2026-02-01T00:03:10Z"));
    }

    #[test]
    fn interval_with_future_anchor_returns_anchor() {
        let anchor = at("2026-02-01T05:00:00Z");
        let t = IntervalTrigger::new(Duration::from_secs(60))
            .unwrap()
            .anchored_at(anchor);
        assert_eq!(t.next_run_after(at("2026-02-01T00:00:00Z")), Some(anchor));
    }

    #[test]
    fn interval_rejects_zero() {
        assert!(IntervalTrigger::new(Duration::ZERO).is_err());
    }

    #[test]
    fn cron_five_field_expression() {
        let t = CronTrigger::new("0 9 * * *", None).unwrap();
        let next = t.next_run_after(at("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(next.format("%H:%M").to_string(), "09:00");
    }

    #[test]
    fn cron_with_timezone_converts_to_utc() {
        let t = CronTrigger::new("0 9 * * *", Some("Europe/Paris")).unwrap();
        // 9:00 Paris = 08:00 UTC in winter (CET = UTC+1)
        let next = t.next_run_after(at("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(next.format("%H:%M").to_string(), "08:00");
    }

    #[rstest]
    #[case(TriggerSpec::cron("not valid"))]
    #[case(TriggerSpec::Cron { expr: "0 9 * * *".into(), tz: Some("Mars/Olympus".into()) })]
    #[case(TriggerSpec::every("0s"))]
    #[case(TriggerSpec::every("soon"))]
    fn invalid_specs_fail_to_build(#[case] spec: TriggerSpec) {
        assert!(spec.build().is_err());
    }

    #[test]
    fn spec_builds_and_describes() {
        let t = TriggerSpec::every("5m").build().unwrap();
        assert_eq!(t.describe(), "every 5m");
        let c = TriggerSpec::cron("*/15 * * * *").build().unwrap();
        assert_eq!(c.describe(), "cron '*/15 * * * *'");
    }

    #[test]
    fn spec_json_shape() {
        let spec: TriggerSpec =
            serde_json::from_str(r#"{ "kind": "cron", "expr": "0 2 * * *", "tz": "UTC" }"#)
                .unwrap();
        assert_eq!(spec, TriggerSpec::Cron {
            expr: "0 2 * * *".into(),
            tz: Some("UTC".into()),
        });
        let v = serde_json::to_value(TriggerSpec::every("30s")).unwrap();
        assert_eq!(v["kind"], "every");
        assert_eq!(v["every"], "30s");
    }
}
