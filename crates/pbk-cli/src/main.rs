//! PBK CLI - Main entry point

use clap::Parser;
use pbk_cli::commands;
use pbk_cli::commands::export::ExportArgs;
use pbk_cli::commands::import::ImportArgs;
use pbk_cli::session::Session;
use pbk_cli::{Cli, Commands, ScheduleCommand, SchemasCommand};
use pbk_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use std::time::Duration;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable (`--json`, `graph`).
    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("pbk-cli")
        .build();
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: Cli) -> pbk_cli::Result<()> {
    // Inspection reads the archive only; no catalogue needed.
    if let Commands::Inspect { archive, json } = &cli.command {
        return commands::inspect::run(archive, *json).await;
    }

    let session = Session::open(&cli.catalog).await?;
    match cli.command {
        Commands::Deps { entity_types, json } => commands::deps::run_deps(&session, &entity_types, json).await,
        Commands::Graph { entity_types } => commands::deps::run_graph(&session, &entity_types).await,
        Commands::Order { entity_types } => commands::deps::run_order(&session, &entity_types).await,
        Commands::List { module } => commands::list::run(&session, &module).await,
        Commands::Export {
            entity_types,
            format,
            include_files,
            include_dependencies,
            rules,
            output,
            created_by,
        } => {
            let args = ExportArgs {
                entity_types,
                format,
                include_files,
                include_dependencies,
                rules,
                output,
                created_by,
            };
            commands::export::run(&session, args).await
        },
        Commands::Import {
            archive,
            select,
            rules,
            no_files,
            created_by,
        } => {
            let args = ImportArgs {
                archive,
                select,
                rules,
                no_files,
                created_by,
            };
            commands::import::run(&session, args).await
        },
        Commands::Inspect { .. } => Ok(()),
        Commands::Schemas { command } => match command {
            SchemasCommand::Export {
                entity_types,
                output,
                created_by,
            } => commands::schemas::run_export(&session, &entity_types, &output, &created_by).await,
            SchemasCommand::Import {
                archive,
                select,
                preview,
            } => commands::schemas::run_import(&session, &archive, &select, preview).await,
        },
        Commands::Schedule { command } => match command {
            ScheduleCommand::List { file } => commands::schedule::run_list(&session, &file).await,
            ScheduleCommand::Run {
                file,
                name,
                max_wait_secs,
            } => {
                commands::schedule::run(&session, &file, name.as_deref(), Duration::from_secs(max_wait_secs)).await
            },
        },
    }
}
