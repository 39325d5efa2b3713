//! Compile command - show the LDAP filter for a query

use clap::Args;
use rolodex_connector_ldap::{QueryCompiler, SchemaCapabilities};
use serde::Serialize;

use crate::error::CliResult;

/// Arguments for the compile command
#[derive(Args)]
pub struct CompileArgs {
    /// Query expression, e.g. (contains "full_name" "jan doe")
    pub query: String,

    /// Assume the server has the evolutionPerson schema
    #[arg(long)]
    pub evolution: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct CompileOutput<'a> {
    query: &'a str,
    filter: Option<&'a str>,
}

/// Execute the compile command
pub fn execute(args: CompileArgs) -> CliResult<()> {
    let compiler = QueryCompiler::new(SchemaCapabilities {
        evolution_person: args.evolution,
        cal_entry: args.evolution,
    });
    let filter = compiler.compile_str(&args.query)?;

    if args.json {
        let output = CompileOutput {
            query: &args.query,
            filter: filter.as_deref(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        match filter {
            Some(filter) => println!("{filter}"),
            None => println!("(no constraint)"),
        }
    }
    Ok(())
}
