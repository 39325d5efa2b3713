//! Caps command - show what the directory supports

use clap::Args;
use rolodex_connector::traits::AddressBook;

use crate::error::CliResult;
use crate::output::print_key_value;
use crate::DirectoryArgs;

/// Arguments for the caps command
#[derive(Args)]
pub struct CapsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the caps command
pub async fn execute(directory: &DirectoryArgs, args: CapsArgs) -> CliResult<()> {
    let book = super::open_book(directory).await?;
    let result = book.capabilities().await;
    book.close().await?;
    let caps = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&caps)?);
    } else {
        println!();
        print_key_value("Capabilities", &caps.static_capabilities_string());
        print_key_value("Required fields", &caps.required_fields.join(", "));
        print_key_value("Auth methods", &caps.auth_methods.join(", "));
        print_key_value("Supported fields", &caps.supported_fields.len().to_string());
        for field in &caps.supported_fields {
            println!("    {field}");
        }
        println!();
    }
    Ok(())
}
