//! rolodex CLI - query an LDAP directory as an address book
//!
//! This CLI enables you to:
//! - Compile address book queries to LDAP filters
//! - List and search contacts
//! - Fetch a single contact by identity
//! - Show what the directory supports
//!
//! Every command also runs against a built-in sample directory (`--demo`).

use clap::{Args, Parser, Subcommand};
use rolodex_connector::types::TlsMode;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;

use error::CliResult;

/// rolodex CLI - LDAP address book
#[derive(Parser)]
#[command(name = "rolodex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    directory: DirectoryArgs,

    #[command(subcommand)]
    command: Commands,
}

/// How to reach the directory
#[derive(Args, Debug, Clone)]
pub struct DirectoryArgs {
    /// LDAP URL, e.g. ldap://ldap.example.com/ou=people,dc=example,dc=com
    #[arg(long, env = "ROLODEX_LDAP_URL", global = true)]
    pub url: Option<String>,

    /// DN to bind as
    #[arg(long, env = "ROLODEX_BIND_DN", global = true)]
    pub bind_dn: Option<String>,

    /// Password for --bind-dn
    #[arg(long, env = "ROLODEX_BIND_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// StartTLS policy: never, when_possible, always
    #[arg(long, global = true)]
    pub tls: Option<TlsMode>,

    /// Maximum entries per search (0 for the server's limit)
    #[arg(long, global = true)]
    pub size_limit: Option<u32>,

    /// Allow queries without constraints to list the whole directory
    #[arg(long, global = true)]
    pub browse: bool,

    /// Use a built-in sample directory instead of a server
    #[arg(long, global = true, conflicts_with = "url")]
    pub demo: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the LDAP filter a query compiles to
    Compile(commands::compile::CompileArgs),

    /// List contacts matching a query
    List(commands::list::ListArgs),

    /// Stream a live search
    Search(commands::search::SearchArgs),

    /// Fetch one contact by identity
    Get(commands::get::GetArgs),

    /// Show capabilities, supported fields and authentication methods
    Caps(commands::caps::CapsArgs),
}

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rolodex=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = run(cli).await;

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Commands::Compile(args) => commands::compile::execute(args),
        Commands::List(args) => commands::list::execute(&cli.directory, args).await,
        Commands::Search(args) => commands::search::execute(&cli.directory, args).await,
        Commands::Get(args) => commands::get::execute(&cli.directory, args).await,
        Commands::Caps(args) => commands::caps::execute(&cli.directory, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list_with_demo() {
        let cli = Cli::try_parse_from(["rolodex", "--demo", "list", "--ids", "(exists \"email\")"])
            .unwrap();
        assert!(cli.directory.demo);
        assert!(matches!(cli.command, Commands::List(ref args) if args.ids));
    }

    #[test]
    fn test_parse_tls_mode() {
        let cli = Cli::try_parse_from([
            "rolodex",
            "--url",
            "ldap://localhost/dc=example",
            "--tls",
            "always",
            "caps",
        ])
        .unwrap();
        assert_eq!(cli.directory.tls, Some(TlsMode::Always));
    }
}
