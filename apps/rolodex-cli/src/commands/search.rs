//! Search command - stream a live search

use clap::Args;
use rolodex_connector::traits::{AddressBook, ViewEvent};
use tracing::info;

use crate::error::CliResult;
use crate::output::record_line;
use crate::DirectoryArgs;

/// Arguments for the search command
#[derive(Args)]
pub struct SearchArgs {
    /// Query expression
    pub query: String,

    /// Stop after this many results
    #[arg(long)]
    pub max: Option<u32>,
}

/// Execute the search command
pub async fn execute(directory: &DirectoryArgs, args: SearchArgs) -> CliResult<()> {
    let book = super::open_book(directory).await?;
    let (view, mut events) = book.start_view(&args.query, args.max).await?;
    info!(view = %view, "Search started");

    let mut shown = 0usize;
    let mut outcome = Ok(());
    while let Some(event) = events.recv().await {
        match event {
            ViewEvent::Status(Some(message)) => eprintln!("{message}"),
            ViewEvent::Status(None) => {}
            ViewEvent::Update(record) => {
                shown += 1;
                println!("{}", record_line(&record));
            }
            ViewEvent::Complete(result) => {
                outcome = result;
                break;
            }
        }
    }

    book.close().await?;
    outcome?;
    println!("\n{shown} contact(s)");
    Ok(())
}
