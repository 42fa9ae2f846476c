//! `pbk list`

use crate::error::Result;
use crate::session::Session;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use pbk_engine::catalog::list_entity_types;

pub async fn run(session: &Session, modules: &[String]) -> Result<()> {
    let filter = (!modules.is_empty()).then_some(modules);
    let types = list_entity_types(session.catalog(), filter).await?;

    if types.is_empty() {
        println!("No entity types found.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Module", "Entity type", "Custom", "Container"]);
    for t in &types {
        table.add_row(vec![
            t.module.clone().unwrap_or_default(),
            t.name.clone(),
            yes_no(t.custom).to_string(),
            yes_no(t.is_container).to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
