//! `pbk export`

use super::watch::follow;
use crate::error::Result;
use crate::progress::format_bytes;
use crate::session::Session;
use colored::Colorize;
use pbk_engine::archive::ArchiveFormat;
use pbk_engine::jobs::ExportRequest;
use pbk_engine::transform::TransformRules;
use std::path::{Path, PathBuf};

pub struct ExportArgs {
    pub entity_types: Vec<String>,
    pub format: ArchiveFormat,
    pub include_files: bool,
    pub include_dependencies: bool,
    pub rules: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub created_by: String,
}

/// Read transform rules from a JSON file, or none at all.
pub async fn load_rules(path: Option<&Path>) -> Result<TransformRules> {
    match path {
        Some(path) => {
            let raw = tokio::fs::read(path).await?;
            Ok(serde_json::from_slice(&raw)?)
        },
        None => Ok(TransformRules::default()),
    }
}

pub async fn run(session: &Session, args: ExportArgs) -> Result<()> {
    let mut request = ExportRequest::new(args.entity_types, args.format, args.created_by);
    request.include_files = args.include_files;
    request.include_dependencies = args.include_dependencies;
    request.transform = load_rules(args.rules.as_deref()).await?;

    let id = session.jobs().submit_export(request).await?;
    let job = follow(session.jobs(), id, "Exporting").await?;
    let Some(result) = job.export_result() else {
        return Ok(());
    };

    let destination = args.output.unwrap_or_else(|| PathBuf::from(&result.file_name));
    tokio::fs::copy(&result.path, &destination).await?;

    println!();
    println!("{} {}", "Archive:".cyan().bold(), destination.display());
    println!("  Format:   {}", result.format.as_str());
    println!("  Size:     {}", format_bytes(result.size_bytes));
    println!("  SHA-256:  {}", result.sha256);
    println!("  Entities: {}", result.total_entities);
    println!("  Records:  {}", result.total_records);
    if result.files_bundled > 0 {
        println!("  Files:    {}", result.files_bundled);
    }
    if !result.failed_entities.is_empty() {
        println!(
            "  {} {}",
            "Skipped:".yellow().bold(),
            result.failed_entities.join(", ")
        );
    }
    Ok(())
}
