//! `pbk schemas export` and `pbk schemas import`

use crate::error::Result;
use crate::session::Session;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use pbk_engine::archive::ArchiveReader;
use pbk_engine::schema_transfer::{export_schemas, import_schemas, preview_schemas, SchemaImportStatus};
use std::path::Path;

pub async fn run_export(session: &Session, entity_types: &[String], output: &Path, created_by: &str) -> Result<()> {
    let export = export_schemas(session.catalog(), entity_types, output, created_by).await?;
    println!(
        "{} {} definitions written to {}",
        "Schemas:".cyan().bold(),
        export.manifest.entities.len(),
        export.path.display()
    );
    if !export.omitted.is_empty() {
        println!("  {} {}", "Omitted:".yellow().bold(), export.omitted.join(", "));
    }
    Ok(())
}

pub async fn run_import(session: &Session, archive: &Path, select: &[String], preview: bool) -> Result<()> {
    let mut reader = ArchiveReader::open(archive)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS);

    if preview {
        table.set_header(vec!["Entity type", "Module", "Custom", "Action"]);
        for row in preview_schemas(session.catalog(), &mut reader).await? {
            if !select.is_empty() && !select.contains(&row.entity_type) {
                continue;
            }
            table.add_row(vec![
                row.entity_type,
                row.module.unwrap_or_default(),
                row.custom.to_string(),
                row.action,
            ]);
        }
        println!("{table}");
        return Ok(());
    }

    let selected = (!select.is_empty()).then_some(select);
    let report = import_schemas(session.catalog(), &mut reader, selected).await?;
    session.save().await?;

    table.set_header(vec!["Entity type", "Status", "Message"]);
    for entry in &report.log {
        let status = match entry.status {
            SchemaImportStatus::Success => "success".green(),
            SchemaImportStatus::Skipped => "skipped".yellow(),
            SchemaImportStatus::Error => "error".red(),
        };
        table.add_row(vec![entry.entity_type.clone(), status.to_string(), entry.message.clone()]);
    }
    println!("{table}");
    let summary = report.summary;
    println!(
        "{} {} total, {} succeeded, {} skipped, {} failed",
        "Summary:".cyan().bold(),
        summary.total,
        summary.success,
        summary.skipped,
        summary.errors
    );
    Ok(())
}
