//! Recurring backup schedules
//!
//! Schedules are declared in TOML and read through `figment`, so any field
//! can be overridden from `PBK_SCHEDULE_*` variables. Run bookkeeping
//! (`next_run`, `last_run`, `last_status`, `last_message`, and `enabled`
//! for one-off schedules that expired) is kept in a JSON state file next to
//! it so the TOML stays hand-edited only.
//!
//! ```toml
//! [[schedules]]
//! name = "nightly-sales"
//! frequency = "daily"
//! time_of_day = "02:00:00"
//! entity_types = ["Sales Invoice"]
//! format = "sql"
//! ```

use crate::archive::ArchiveFormat;
use crate::error::{EngineError, EngineResult};
use crate::jobs::{ExportRequest, JobOrchestrator, JobStatus};
use anyhow::Context;
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Weekday};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    SpecificDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
    #[serde(default)]
    pub day_of_week: Option<Weekday>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
    #[serde(default)]
    pub specific_date: Option<NaiveDate>,
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub format: ArchiveFormat,
    #[serde(default)]
    pub include_files: bool,
    #[serde(default)]
    pub next_run: Option<NaiveDateTime>,
    #[serde(default)]
    pub last_run: Option<NaiveDateTime>,
    #[serde(default)]
    pub last_status: Option<RunStatus>,
    #[serde(default)]
    pub last_message: Option<String>,
}

impl BackupSchedule {
    pub fn new(name: impl Into<String>, frequency: Frequency, time_of_day: NaiveTime, entity_types: Vec<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            frequency,
            time_of_day,
            day_of_week: None,
            day_of_month: None,
            specific_date: None,
            entity_types,
            format: ArchiveFormat::default(),
            include_files: false,
            next_run: None,
            last_run: None,
            last_status: None,
            last_message: None,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: &str| Err(EngineError::configuration(format!("schedule '{}': {msg}", self.name)));
        match self.frequency {
            Frequency::Weekly if self.day_of_week.is_none() => return invalid("weekly schedules need day_of_week"),
            Frequency::Monthly => match self.day_of_month {
                None => return invalid("monthly schedules need day_of_month"),
                Some(day) if !(1..=31).contains(&day) => return invalid("day_of_month must be between 1 and 31"),
                Some(_) => {},
            },
            Frequency::SpecificDate if self.specific_date.is_none() => {
                return invalid("specific_date schedules need specific_date")
            },
            _ => {},
        }
        if self.entity_types.is_empty() {
            return invalid("select at least one entity type");
        }
        Ok(())
    }

    /// Recompute `next_run` relative to `now`. A one-off schedule whose
    /// date has passed disables itself.
    pub fn calculate_next_run(&mut self, now: NaiveDateTime) {
        let today = now.date();
        let at = |date: NaiveDate| date.and_time(self.time_of_day);

        self.next_run = match self.frequency {
            Frequency::SpecificDate => match self.specific_date.map(at) {
                Some(when) if when > now => Some(when),
                _ => {
                    self.enabled = false;
                    None
                },
            },
            Frequency::Daily => {
                let when = at(today);
                Some(if when <= now { when + TimeDelta::days(1) } else { when })
            },
            Frequency::Weekly => {
                let target = self.day_of_week.unwrap_or(Weekday::Mon);
                let mut days_ahead =
                    (7 + target.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
                if days_ahead == 0 && at(today) <= now {
                    days_ahead = 7;
                }
                Some(at(today) + TimeDelta::days(i64::from(days_ahead)))
            },
            Frequency::Monthly => {
                let day = self.day_of_month.unwrap_or(1);
                let first = today.with_day(1).unwrap_or(today);
                // Months without the day (the 31st in April) are skipped.
                (0..=12u32)
                    .filter_map(|offset| first.checked_add_months(Months::new(offset)))
                    .filter_map(|month| month.with_day(day))
                    .map(at)
                    .find(|when| *when > now)
            },
        };
    }

    fn run_state(&self) -> RunState {
        RunState {
            enabled: self.enabled,
            next_run: self.next_run,
            last_run: self.last_run,
            last_status: self.last_status,
            last_message: self.last_message.clone(),
        }
    }

    fn apply_state(&mut self, state: &RunState) {
        self.enabled = self.enabled && state.enabled;
        self.next_run = state.next_run;
        self.last_run = state.last_run;
        self.last_status = state.last_status;
        self.last_message = state.last_message.clone();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ScheduleFile {
    #[serde(default)]
    schedules: Vec<BackupSchedule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub enabled: bool,
    pub next_run: Option<NaiveDateTime>,
    pub last_run: Option<NaiveDateTime>,
    pub last_status: Option<RunStatus>,
    pub last_message: Option<String>,
}

/// Read schedules from `path`, with `PBK_SCHEDULE_*` overrides, and
/// validate every one of them.
pub fn load_schedules(path: impl AsRef<Path>) -> anyhow::Result<Vec<BackupSchedule>> {
    let path = path.as_ref();
    let file: ScheduleFile = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("PBK_SCHEDULE_").split("__"))
        .extract()
        .with_context(|| format!("Failed to load schedules from {}", path.display()))?;

    for schedule in &file.schedules {
        schedule.validate()?;
    }
    Ok(file.schedules)
}

/// Result of one schedule execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRun {
    pub name: String,
    pub status: RunStatus,
    pub message: String,
    pub job_id: Option<uuid::Uuid>,
}

pub struct ScheduleRunner {
    orchestrator: JobOrchestrator,
    schedules: Vec<BackupSchedule>,
    poll_interval: Duration,
}

impl ScheduleRunner {
    pub fn new(orchestrator: JobOrchestrator, schedules: Vec<BackupSchedule>) -> Self {
        Self {
            orchestrator,
            schedules,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn schedules(&self) -> &[BackupSchedule] {
        &self.schedules
    }

    /// Bookkeeping for every schedule, keyed by name.
    pub fn state(&self) -> BTreeMap<String, RunState> {
        self.schedules.iter().map(|s| (s.name.clone(), s.run_state())).collect()
    }

    pub fn apply_state(&mut self, state: &BTreeMap<String, RunState>) {
        for schedule in &mut self.schedules {
            if let Some(saved) = state.get(&schedule.name) {
                schedule.apply_state(saved);
            }
        }
    }

    pub async fn load_state(&mut self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await? {
            return Ok(());
        }
        let raw = tokio::fs::read(path).await?;
        let state: BTreeMap<String, RunState> =
            serde_json::from_slice(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
        self.apply_state(&state);
        Ok(())
    }

    pub async fn save_state(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(&self.state())?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Give every enabled schedule without a `next_run` one. Returns how
    /// many were assigned.
    pub fn assign_missing_next_runs(&mut self, now: NaiveDateTime) -> usize {
        let mut assigned = 0;
        for schedule in self.schedules.iter_mut().filter(|s| s.enabled && s.next_run.is_none()) {
            schedule.calculate_next_run(now);
            if schedule.next_run.is_some() {
                assigned += 1;
            }
        }
        if assigned > 0 {
            info!(assigned, "Assigned next run times");
        }
        assigned
    }

    /// Run every enabled schedule that is due. One failing schedule never
    /// stops the others.
    pub async fn run_due(&mut self, now: NaiveDateTime, max_wait: Duration) -> Vec<ScheduleRun> {
        let due: Vec<usize> = self
            .schedules
            .iter()
            .enumerate()
            .filter(|(_, s)| s.enabled && s.next_run.is_some_and(|next| next <= now))
            .map(|(idx, _)| idx)
            .collect();

        let mut runs = Vec::with_capacity(due.len());
        for idx in due {
            let run = self.execute(idx, now, max_wait).await;
            runs.push(run);
        }
        runs
    }

    /// Run one schedule immediately, regardless of its next run time.
    pub async fn run_now(&mut self, name: &str, now: NaiveDateTime, max_wait: Duration) -> EngineResult<ScheduleRun> {
        let idx = self
            .schedules
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| EngineError::configuration(format!("no schedule named '{name}'")))?;
        if !self.schedules[idx].enabled {
            return Err(EngineError::configuration(format!("schedule '{name}' is disabled")));
        }
        Ok(self.execute(idx, now, max_wait).await)
    }

    async fn execute(&mut self, idx: usize, now: NaiveDateTime, max_wait: Duration) -> ScheduleRun {
        let (name, request) = {
            let schedule = &self.schedules[idx];
            let mut request = ExportRequest::new(
                schedule.entity_types.clone(),
                schedule.format,
                format!("schedule:{}", schedule.name),
            );
            request.include_files = schedule.include_files;
            (schedule.name.clone(), request)
        };

        info!(schedule = %name, "Running scheduled backup");
        let (status, message, job_id) = match self.submit_and_wait(request, max_wait).await {
            Ok((job_id, message)) => (RunStatus::Success, message, Some(job_id)),
            Err((job_id, e)) => {
                error!(schedule = %name, error = %e, "Scheduled backup failed");
                (RunStatus::Failed, e, job_id)
            },
        };

        let schedule = &mut self.schedules[idx];
        schedule.last_run = Some(now);
        schedule.last_status = Some(status);
        schedule.last_message = Some(message.clone());
        schedule.calculate_next_run(now);
        if !schedule.enabled {
            warn!(schedule = %name, "One-off schedule has run and is now disabled");
        }

        ScheduleRun {
            name,
            status,
            message,
            job_id,
        }
    }

    async fn submit_and_wait(
        &self,
        request: ExportRequest,
        max_wait: Duration,
    ) -> Result<(uuid::Uuid, String), (Option<uuid::Uuid>, String)> {
        let id = self
            .orchestrator
            .submit_export(request)
            .await
            .map_err(|e| (None, e.to_string()))?;
        let job = self
            .orchestrator
            .wait_for_terminal(id, self.poll_interval, max_wait)
            .await
            .map_err(|e| (Some(id), e.to_string()))?;

        match (job.status, job.export_result()) {
            (JobStatus::Completed, Some(result)) => Ok((
                id,
                format!(
                    "Backup created: {}; entity types: {}; records: {}",
                    result.file_name, result.total_entities, result.total_records
                ),
            )),
            _ => Err((Some(id), job.error.unwrap_or_else(|| "backup job failed".to_string()))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn schedule(frequency: Frequency) -> BackupSchedule {
        BackupSchedule::new(
            "nightly",
            frequency,
            NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            vec!["Customer".into()],
        )
    }

    #[test]
    fn test_daily_rolls_to_tomorrow_once_time_passed() {
        let mut s = schedule(Frequency::Daily);
        s.calculate_next_run(at("2025-03-10 01:00:00"));
        assert_eq!(s.next_run, Some(at("2025-03-10 02:00:00")));
        s.calculate_next_run(at("2025-03-10 02:00:00"));
        assert_eq!(s.next_run, Some(at("2025-03-11 02:00:00")));
    }

    #[test]
    fn test_weekly_targets_next_weekday() {
        // 2025-03-10 is a Monday
        let mut s = schedule(Frequency::Weekly);
        s.day_of_week = Some(Weekday::Wed);
        s.calculate_next_run(at("2025-03-10 12:00:00"));
        assert_eq!(s.next_run, Some(at("2025-03-12 02:00:00")));

        s.day_of_week = Some(Weekday::Mon);
        s.calculate_next_run(at("2025-03-10 12:00:00"));
        assert_eq!(s.next_run, Some(at("2025-03-17 02:00:00")));
    }

    #[test]
    fn test_monthly_skips_short_months() {
        let mut s = schedule(Frequency::Monthly);
        s.day_of_month = Some(31);
        s.calculate_next_run(at("2025-03-31 03:00:00"));
        assert_eq!(s.next_run, Some(at("2025-05-31 02:00:00")));
    }

    #[test]
    fn test_past_specific_date_disables() {
        let mut s = schedule(Frequency::SpecificDate);
        s.specific_date = NaiveDate::from_ymd_opt(2025, 1, 1);
        s.calculate_next_run(at("2025-06-01 00:00:00"));
        assert!(!s.enabled);
        assert!(s.next_run.is_none());
    }

    #[test]
    fn test_validation_rules() {
        assert!(schedule(Frequency::Weekly).validate().unwrap_err().is_configuration());
        let mut monthly = schedule(Frequency::Monthly);
        monthly.day_of_month = Some(32);
        assert!(monthly.validate().is_err());
        let mut empty = schedule(Frequency::Daily);
        empty.entity_types.clear();
        assert!(empty.validate().is_err());
        assert!(schedule(Frequency::Daily).validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[schedules]]
name = "weekly-stock"
frequency = "weekly"
day_of_week = "Friday"
time_of_day = "23:30:00"
entity_types = ["Item", "Item Group"]
format = "csv"
"#
        )
        .unwrap();

        let schedules = load_schedules(file.path()).unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].day_of_week, Some(Weekday::Fri));
        assert_eq!(schedules[0].format, ArchiveFormat::Tabular);
        assert!(schedules[0].enabled);
    }
}
