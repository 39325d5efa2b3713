//! List command - batch search for contacts

use clap::Args;
use rolodex_connector::error::ConnectorError;
use rolodex_connector::traits::AddressBook;
use tracing::warn;

use crate::error::CliResult;
use crate::output::record_line;
use crate::DirectoryArgs;

/// Arguments for the list command
#[derive(Args)]
pub struct ListArgs {
    /// Query expression; matches everything when omitted
    #[arg(default_value = r#"(contains "x-evolution-any-field" "")"#)]
    pub query: String,

    /// Print identities only
    #[arg(long)]
    pub ids: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the list command
pub async fn execute(directory: &DirectoryArgs, args: ListArgs) -> CliResult<()> {
    let book = super::open_book(directory).await?;

    if args.ids {
        let result = book.list_ids(&args.query).await;
        book.close().await?;
        let ids = result?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&ids)?);
        } else {
            for id in ids {
                println!("{id}");
            }
        }
        return Ok(());
    }

    let result = book.fetch_many(&args.query).await;
    book.close().await?;
    let records = match result {
        Ok(records) => records,
        // Show what arrived before the server cut the search short.
        Err(ConnectorError::SearchLimitExceeded { kind, partial }) => {
            warn!(limit = %kind, shown = partial.len(), "Search limit exceeded, results are incomplete");
            partial
        }
        Err(e) => return Err(e.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            println!("{}", record_line(record));
        }
        println!("\n{} contact(s)", records.len());
    }
    Ok(())
}
