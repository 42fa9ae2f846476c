//! `pbk deps`, `pbk graph` and `pbk order`

use crate::error::Result;
use crate::session::Session;
use colored::Colorize;
use pbk_engine::dependencies::{graph_data, sort, summarize};

pub async fn run_deps(session: &Session, entity_types: &[String], json: bool) -> Result<()> {
    let meta = session.catalog();
    let summary = summarize(meta, entity_types, session.config().max_dependency_depth).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} {}", "Selected:".cyan().bold(), summary.selected.join(", "));
    if !summary.has_dependencies {
        println!("No dependencies outside the selection.");
        return Ok(());
    }
    for (entity_type, deps) in &summary.dependencies_by_type {
        println!("  {} -> {}", entity_type.green(), deps.join(", "));
    }
    println!();
    println!(
        "{} {} new, {} total",
        "Dependencies:".cyan().bold(),
        summary.new_dependency_count,
        summary.total_with_dependencies
    );
    Ok(())
}

pub async fn run_graph(session: &Session, entity_types: &[String]) -> Result<()> {
    let graph = graph_data(session.catalog(), entity_types, session.config().max_dependency_depth).await;
    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(())
}

pub async fn run_order(session: &Session, entity_types: &[String]) -> Result<()> {
    let outcome = sort(session.catalog(), entity_types).await;
    for (idx, entity_type) in outcome.order.iter().enumerate() {
        println!("{:>3}. {}", idx + 1, entity_type);
    }
    if outcome.has_cycle() {
        println!();
        println!(
            "{} circular dependencies between {}; their order is best-effort",
            "Warning:".yellow().bold(),
            outcome.cyclic.join(", ")
        );
    }
    Ok(())
}
