//! CLI presentation: render assemblies and cache state for the terminal.

use crate::config::ValidationError;
use crate::engine::Assembly;
use crate::error::CliError;
use crate::layer::LayerDescription;
use crate::types::Ttl;
use comfy_table::Table;
use std::time::Duration;

pub fn format_assembly_text(assembly: &Assembly) -> String {
    let mut out = String::new();
    for item in &assembly.items {
        let source = if item.source().is_empty() {
            "-"
        } else {
            item.source()
        };
        out.push_str(&format!("--- [{}] {} ---\n", item.origin_layer(), source));
        out.push_str(item.content());
        if !item.content().ends_with('\n') {
            out.push('\n');
        }
    }
    for warning in &assembly.warnings {
        out.push_str(&format!("warning: {}\n", warning));
    }
    out.push_str(&format!(
        "{} items, {} tokens",
        assembly.items.len(),
        assembly.total_tokens
    ));
    out
}

pub fn format_assembly_json(assembly: &Assembly) -> Result<String, CliError> {
    serde_json::to_string_pretty(assembly).map_err(|e| CliError::Output(e.to_string()))
}

pub fn format_cache_table(layers: &[LayerDescription]) -> String {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec![
        "Layer", "Items", "Tokens", "Age", "TTL", "Stale", "Reads", "Last Error",
    ]);
    for layer in layers {
        table.add_row(vec![
            layer.layer.to_string(),
            layer.item_count.to_string(),
            layer.token_count.to_string(),
            layer.age.map(format_duration).unwrap_or_else(|| "-".to_string()),
            format_ttl(layer.ttl),
            if layer.stale { "yes" } else { "no" }.to_string(),
            layer.access_count.to_string(),
            layer.last_error.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    table.to_string()
}

pub fn format_validation_result(result: &Result<(), Vec<ValidationError>>) -> String {
    match result {
        Ok(()) => "Configuration valid".to_string(),
        Err(errors) => {
            let mut out = format!("Configuration invalid ({} errors):", errors.len());
            for error in errors {
                out.push_str(&format!("\n  - {}", error));
            }
            out
        }
    }
}

fn format_ttl(ttl: Ttl) -> String {
    match ttl {
        Ttl::Infinite => "never".to_string(),
        Ttl::Finite(duration) => format_duration(duration),
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() > 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
