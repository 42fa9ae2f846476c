//! `pbk inspect`

use crate::error::Result;
use colored::Colorize;
use pbk_engine::archive::parse_archive;
use std::path::Path;

pub async fn run(archive: &Path, json: bool) -> Result<()> {
    let path = archive.to_path_buf();
    let summary = tokio::task::spawn_blocking(move || parse_archive(path))
        .await
        .map_err(|e| crate::CliError::InvalidArgument(format!("archive reader panicked: {e}")))??;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let manifest = &summary.manifest;
    println!("{} {}", "Archive:".cyan().bold(), archive.display());
    println!("  Type:       {}", summary.file_type);
    println!("  Container:  {}", if summary.is_zip { "zip" } else { "plain SQL" });
    println!("  Created by: {}", manifest.created_by);
    println!("  Created at: {}", manifest.created_at);
    println!("  Engine:     {}", manifest.engine_version);
    println!();
    for entity in &summary.entities {
        println!("  {:<40} {:>10}", entity.entity_type.green(), entity.record_count);
    }
    println!();
    println!("  Total records: {}", manifest.total_records);
    if !manifest.files.is_empty() {
        println!("  Files:         {}", manifest.files.len());
    }
    Ok(())
}
