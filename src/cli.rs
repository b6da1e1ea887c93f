//! CLI domain: parse, route, and presentation only.

mod parse;
mod presentation;
mod route;

pub use parse::{AssembleArgs, Cli, Commands};
pub use presentation::{
    format_assembly_json, format_assembly_text, format_cache_table, format_validation_result,
};
pub use route::RunContext;
