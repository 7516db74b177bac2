//! Job definitions — the core data model for scheduled sends.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use sendloop_core::error::{Result, SendloopError};
use sendloop_core::types::{Recipient, SendOutcome};

/// A persisted scheduled-send directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID (time-derived, unique within a tenant).
    pub id: String,
    /// Ordered (address, message) pairs; never empty, de-duplicated.
    pub recipients: Vec<Recipient>,
    /// The instant recurrence is computed around.
    pub anchor_at: DateTime<Utc>,
    /// Recurrence shape.
    pub repeat: RepeatPolicy,
    /// Interval multiplier for the `every-n-*` policies (≥ 1).
    #[serde(default = "default_interval_n")]
    pub interval_n: u32,
    /// Retire the job after this instant even if recurrence would continue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_until: Option<DateTime<Utc>>,
    /// Firings left; decremented after each completed firing, retires at 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_runs: Option<u32>,
    /// Case-insensitive substring that cancels the job when found in a
    /// reply from any of its recipients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_keyword: Option<String>,
    /// Daily delivery window start ("HH:MM", minute resolution).
    #[serde(default, with = "opt_hhmm", skip_serializing_if = "Option::is_none")]
    pub window_start: Option<NaiveTime>,
    /// Daily delivery window end ("HH:MM").
    #[serde(default, with = "opt_hhmm", skip_serializing_if = "Option::is_none")]
    pub window_end: Option<NaiveTime>,
    /// Pause between consecutive recipients within one firing. Unset jobs
    /// inherit the tenant's configured `default_dispatch_gap_secs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_gap_secs: Option<u64>,
    /// Per-recipient jitter bounds, uniform in [min, max] seconds.
    #[serde(default)]
    pub random_delay_min_secs: u64,
    #[serde(default)]
    pub random_delay_max_secs: u64,
    /// Next scheduled firing for interval policies; persisted so a restart
    /// resumes the same cadence instead of resetting it to "now + period".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn default_interval_n() -> u32 {
    1
}

/// Recurrence shape. Exactly one applies per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepeatPolicy {
    Once,
    Daily,
    Weekly,
    Monthly,
    #[serde(rename = "every-n-seconds")]
    EverySeconds,
    #[serde(rename = "every-n-minutes")]
    EveryMinutes,
    #[serde(rename = "every-n-hours")]
    EveryHours,
    #[serde(rename = "every-n-days")]
    EveryDays,
    #[serde(rename = "every-n-months")]
    EveryMonths,
}

impl RepeatPolicy {
    /// Absolute-cadence policies whose `next_run_at` is persisted.
    pub fn is_interval(&self) -> bool {
        matches!(
            self,
            RepeatPolicy::EverySeconds
                | RepeatPolicy::EveryMinutes
                | RepeatPolicy::EveryHours
                | RepeatPolicy::EveryDays
        )
    }

    /// Calendar recurrences (clock-time-of-day based).
    pub fn is_calendar(&self) -> bool {
        matches!(
            self,
            RepeatPolicy::Daily
                | RepeatPolicy::Weekly
                | RepeatPolicy::Monthly
                | RepeatPolicy::EveryMonths
        )
    }

    /// Whether `interval_n` is meaningful for this policy.
    pub fn uses_interval_n(&self) -> bool {
        self.is_interval() || matches!(self, RepeatPolicy::EveryMonths)
    }
}

impl std::fmt::Display for RepeatPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RepeatPolicy::Once => "once",
            RepeatPolicy::Daily => "daily",
            RepeatPolicy::Weekly => "weekly",
            RepeatPolicy::Monthly => "monthly",
            RepeatPolicy::EverySeconds => "every-n-seconds",
            RepeatPolicy::EveryMinutes => "every-n-minutes",
            RepeatPolicy::EveryHours => "every-n-hours",
            RepeatPolicy::EveryDays => "every-n-days",
            RepeatPolicy::EveryMonths => "every-n-months",
        };
        write!(f, "{s}")
    }
}

/// Explicit job lifecycle value. The engine only moves a job along the
/// transition table below; retire-vs-rearm branches are testable in
/// isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Timer set, waiting for the fire instant.
    Armed,
    /// Timer elapsed; conditions being re-validated.
    Firing,
    /// Handed to the dispatch queue, send in flight.
    Queued,
    /// Terminal; the record is gone.
    Retired,
}

impl JobState {
    /// Legal transitions. `Armed → Retired` covers explicit deletion and
    /// stop-keyword cancellation while waiting.
    pub fn can_advance(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Armed, Firing)
                | (Armed, Retired)
                | (Firing, Queued)
                | (Firing, Retired)
                | (Queued, Armed)
                | (Queued, Retired)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Armed => "armed",
            JobState::Firing => "firing",
            JobState::Queued => "queued",
            JobState::Retired => "retired",
        };
        write!(f, "{s}")
    }
}

/// Per-recipient outcomes of one firing, produced by the dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub job_id: String,
    pub outcomes: Vec<(String, SendOutcome)>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }
}

impl Job {
    /// Create a new job with defaults. Recipients are de-duplicated
    /// (same address + message), original order preserved.
    pub fn new(recipients: Vec<Recipient>, anchor_at: DateTime<Utc>, repeat: RepeatPolicy) -> Self {
        Self {
            id: job_id(),
            recipients: dedup_recipients(recipients),
            anchor_at,
            repeat,
            interval_n: 1,
            repeat_until: None,
            remaining_runs: None,
            stop_keyword: None,
            window_start: None,
            window_end: None,
            dispatch_gap_secs: None,
            random_delay_min_secs: 0,
            random_delay_max_secs: 0,
            next_run_at: None,
            created_at: Utc::now(),
        }
    }

    /// Check the invariants the engine assumes. Runs on create, update,
    /// and again on every record loaded from disk.
    pub fn validate(&self) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(SendloopError::validation("recipient list is empty"));
        }
        if self.recipients.iter().any(|r| r.address.trim().is_empty()) {
            return Err(SendloopError::validation("recipient address is empty"));
        }
        if self.repeat.uses_interval_n() && self.interval_n < 1 {
            return Err(SendloopError::validation(format!(
                "interval_n must be >= 1 for {}",
                self.repeat
            )));
        }
        if let Some(runs) = self.remaining_runs {
            if runs < 1 {
                return Err(SendloopError::validation("remaining_runs must be >= 1"));
            }
        }
        if self.random_delay_min_secs > self.random_delay_max_secs {
            return Err(SendloopError::validation(
                "random_delay_min_secs exceeds random_delay_max_secs",
            ));
        }
        if self.window_start.is_some() != self.window_end.is_some() {
            return Err(SendloopError::validation(
                "window_start and window_end must be set together",
            ));
        }
        Ok(())
    }

    /// True when a terminal condition holds right now: `repeat_until`
    /// passed or `remaining_runs` exhausted.
    pub fn is_terminal(&self, now: DateTime<Utc>) -> bool {
        if let Some(until) = self.repeat_until {
            if now > until {
                return true;
            }
        }
        matches!(self.remaining_runs, Some(0))
    }

    /// Stop-keyword match: the reply body contains the keyword
    /// (case-insensitive substring) AND the sender is one of this job's
    /// recipients.
    pub fn matches_stop_reply(&self, from_address: &str, body: &str) -> bool {
        let Some(keyword) = &self.stop_keyword else {
            return false;
        };
        if keyword.is_empty() {
            return false;
        }
        if !self.recipients.iter().any(|r| r.address == from_address) {
            return false;
        }
        body.to_lowercase().contains(&keyword.to_lowercase())
    }
}

/// Remove exact (address, message) duplicates, keeping the first occurrence.
pub fn dedup_recipients(recipients: Vec<Recipient>) -> Vec<Recipient> {
    let mut seen = std::collections::HashSet::new();
    recipients
        .into_iter()
        .filter(|r| seen.insert((r.address.clone(), r.message.clone())))
        .collect()
}

/// Time-derived job id, unique within a tenant.
pub fn job_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("job-{:x}-{:x}", t.as_secs(), t.subsec_nanos())
}

/// Serde helper: `Option<NaiveTime>` as "HH:MM".
mod opt_hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_some(&t.format("%H:%M").to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let opt: Option<String> = Option::deserialize(d)?;
        match opt {
            None => Ok(None),
            Some(s) => NaiveTime::parse_from_str(&s, "%H:%M")
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
