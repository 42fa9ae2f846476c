//! Follow a submitted job until it is terminal

use crate::error::{CliError, Result};
use crate::progress::create_spinner;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use pbk_engine::jobs::{EntityState, EntityStatus, Job, JobOrchestrator, JobStatus};
use std::time::Duration;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Poll the job record, mirroring its progress message on a spinner.
pub async fn follow(jobs: &JobOrchestrator, id: Uuid, label: &str) -> Result<Job> {
    let spinner = create_spinner(label);
    let job = loop {
        if let Some(job) = jobs.get_job(id).await? {
            spinner.set_message(format!("{label}: {}", job.progress_message));
            if job.status.is_terminal() {
                break job;
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    spinner.finish_and_clear();

    if let Some(statuses) = jobs.get_entity_statuses(id).await? {
        print_entity_table(&statuses);
    }
    match job.status {
        JobStatus::Completed => Ok(job),
        _ => Err(CliError::JobFailed {
            id,
            message: job.error.clone().unwrap_or_else(|| "unknown error".to_string()),
        }),
    }
}

fn print_entity_table(statuses: &[EntityStatus]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Entity type", "Status", "Records", "Error"]);

    for row in statuses {
        let status = match row.status {
            EntityState::Completed => row.status.as_str().green().to_string(),
            EntityState::Failed => row.status.as_str().red().to_string(),
            _ => row.status.as_str().yellow().to_string(),
        };
        table.add_row(vec![
            row.entity_type.clone(),
            status,
            row.record_count.to_string(),
            row.error.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
}
