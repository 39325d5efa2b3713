//! Get command - fetch one contact by identity

use clap::Args;
use rolodex_connector::traits::AddressBook;

use crate::error::CliResult;
use crate::output::print_record;
use crate::DirectoryArgs;

/// Arguments for the get command
#[derive(Args)]
pub struct GetArgs {
    /// Identity (distinguished name) of the contact
    pub uid: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the get command
pub async fn execute(directory: &DirectoryArgs, args: GetArgs) -> CliResult<()> {
    let book = super::open_book(directory).await?;
    let result = book.fetch_one(&args.uid).await;
    book.close().await?;
    let record = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_record(&record);
    }
    Ok(())
}
