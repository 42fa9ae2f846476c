//! `pbk schedule list` and `pbk schedule run`
//!
//! Run bookkeeping lives next to the schedule file as
//! `<file>.state.json`.

use crate::error::{CliError, Result};
use crate::session::Session;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use pbk_engine::schedule::{load_schedules, RunStatus, ScheduleRun, ScheduleRunner};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn state_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".state.json");
    PathBuf::from(name)
}

async fn runner(session: &Session, file: &Path) -> Result<ScheduleRunner> {
    let schedules = load_schedules(file).map_err(CliError::config)?;
    let mut runner = ScheduleRunner::new(session.jobs().clone(), schedules);
    runner.load_state(state_path(file)).await.map_err(CliError::config)?;
    Ok(runner)
}

fn now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub async fn run_list(session: &Session, file: &Path) -> Result<()> {
    let mut runner = runner(session, file).await?;
    runner.assign_missing_next_runs(now());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Name", "Enabled", "Frequency", "Next run", "Last run", "Last status"]);
    for s in runner.schedules() {
        table.add_row(vec![
            s.name.clone(),
            s.enabled.to_string(),
            format!("{:?}", s.frequency).to_lowercase(),
            s.next_run.map(|t| t.to_string()).unwrap_or_default(),
            s.last_run.map(|t| t.to_string()).unwrap_or_default(),
            s.last_status.map(|st| format!("{st:?}").to_lowercase()).unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn run(session: &Session, file: &Path, name: Option<&str>, max_wait: Duration) -> Result<()> {
    let mut runner = runner(session, file).await?;
    let now = now();
    runner.assign_missing_next_runs(now);

    let runs = match name {
        Some(name) => vec![runner.run_now(name, now, max_wait).await?],
        None => runner.run_due(now, max_wait).await,
    };
    runner.save_state(state_path(file)).await.map_err(CliError::config)?;

    if runs.is_empty() {
        println!("No schedules are due.");
    }
    for run in &runs {
        print_run(run);
    }
    Ok(())
}

fn print_run(run: &ScheduleRun) {
    let status = match run.status {
        RunStatus::Success => "success".green(),
        RunStatus::Failed => "failed".red(),
    };
    println!("{} [{}] {}", run.name.bold(), status, run.message);
}
