//! `pbk import`

use super::export::load_rules;
use super::watch::follow;
use crate::error::Result;
use crate::session::Session;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use pbk_engine::jobs::ImportRequest;
use pbk_engine::restore::{LogStatus, RestoreLog};
use std::path::PathBuf;

pub struct ImportArgs {
    pub archive: PathBuf,
    pub select: Vec<String>,
    pub rules: Option<PathBuf>,
    pub no_files: bool,
    pub created_by: String,
}

pub async fn run(session: &Session, args: ImportArgs) -> Result<()> {
    let mut request = ImportRequest::new(args.archive, args.created_by);
    request.selected = (!args.select.is_empty()).then_some(args.select);
    request.restore_files = !args.no_files;
    request.transform = load_rules(args.rules.as_deref()).await?;

    let id = session.jobs().submit_import(request).await?;
    let job = follow(session.jobs(), id, "Restoring").await?;
    session.save().await?;

    if let Some(result) = job.import_result() {
        print_log(&result.log);
    }
    Ok(())
}

fn print_log(log: &RestoreLog) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Entity type", "Result", "Imported", "Skipped", "Failed", "Message"]);

    for entry in &log.entries {
        let status = match entry.status {
            LogStatus::Success => "success".green(),
            LogStatus::Partial => "partial".yellow(),
            LogStatus::Warning => "warning".yellow(),
            LogStatus::Error => "error".red(),
        };
        table.add_row(vec![
            entry.entity_type.clone(),
            status.to_string(),
            entry.imported.to_string(),
            entry.skipped.to_string(),
            entry.failed.to_string(),
            entry.message.clone(),
        ]);
    }
    println!("{table}");

    let summary = &log.summary;
    println!(
        "{} {} imported, {} skipped, {} failed across {} entity types",
        "Summary:".cyan().bold(),
        summary.imported,
        summary.skipped,
        summary.failed,
        summary.entity_types
    );
    if !log.cyclic.is_empty() {
        println!("{} circular dependencies: {}", "Warning:".yellow().bold(), log.cyclic.join(", "));
    }
    if let Some(files) = &log.files {
        println!(
            "{} {} restored, {} already present, {} failed",
            "Files:".cyan().bold(),
            files.restored,
            files.skipped,
            files.failed
        );
    }
}
