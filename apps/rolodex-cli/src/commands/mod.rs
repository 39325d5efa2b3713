//! CLI command implementations

pub mod caps;
pub mod compile;
pub mod get;
pub mod list;
pub mod search;

use std::sync::Arc;

use rolodex_connector::cache::MemoryCache;
use rolodex_connector::traits::AddressBook;
use rolodex_connector_ldap::client::WireEntry;
use rolodex_connector_ldap::{LdapAddressBook, LdapConfig, MemoryDirectory};
use tracing::debug;

use crate::error::{CliError, CliResult};
use crate::DirectoryArgs;

const DEMO_BASE: &str = "ou=people,dc=example,dc=com";

/// Build the configuration the directory arguments describe.
pub fn build_config(args: &DirectoryArgs) -> CliResult<LdapConfig> {
    let mut config = if args.demo {
        LdapConfig::new("demo", DEMO_BASE)
    } else {
        let url = args.url.as_deref().ok_or(CliError::NoDirectory)?;
        LdapConfig::from_url(url)?
    };

    if let Some(dn) = &args.bind_dn {
        config = config.with_credentials(dn.clone(), args.password.clone().unwrap_or_default());
    }
    if let Some(tls) = args.tls {
        config = config.with_tls(tls);
    }
    if let Some(limit) = args.size_limit {
        config = config.with_size_limit(limit);
    }
    Ok(config.with_browsing(args.browse))
}

/// Open an address book for the directory arguments.
pub async fn open_book(args: &DirectoryArgs) -> CliResult<LdapAddressBook> {
    let config = build_config(args)?;
    debug!(config = ?config, "Opening address book");

    let book = if args.demo {
        LdapAddressBook::with_connector(
            config,
            Arc::new(demo_directory()),
            Arc::new(MemoryCache::new()),
        )
    } else {
        LdapAddressBook::new(config)
    };
    book.open().await?;
    Ok(book)
}

fn demo_person(uid: &str, given: &str, family: &str, mail: &str, title: &str) -> WireEntry {
    WireEntry::new(format!("uid={uid},{DEMO_BASE}"))
        .with_text(
            "objectClass",
            &["top", "person", "organizationalPerson", "inetOrgPerson"],
        )
        .with_text("uid", &[uid])
        .with_text("cn", &[format!("{given} {family}")])
        .with_text("givenName", &[given])
        .with_text("sn", &[family])
        .with_text("mail", &[mail])
        .with_text("title", &[title])
}

/// A small directory with a few people and one list.
fn demo_directory() -> MemoryDirectory {
    let dir = MemoryDirectory::with_evolution_schema();
    dir.insert(demo_person("jdoe", "Jane", "Doe", "jane.doe@example.com", "CTO"));
    dir.insert(demo_person("jroe", "John", "Roe", "john.roe@example.com", "Engineer"));
    dir.insert(demo_person("asmith", "Alice", "Smith", "alice@example.org", "Designer"));
    dir.insert(
        WireEntry::new(format!("description=leads,{DEMO_BASE}"))
            .with_text("objectClass", &["top", "groupOfNames"])
            .with_text("cn", &["Leads"])
            .with_text("description", &["leads"])
            .with_text(
                "member",
                &[
                    format!("uid=jdoe,{DEMO_BASE}"),
                    format!("uid=asmith,{DEMO_BASE}"),
                ],
            ),
    );
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolodex_connector::types::TlsMode;

    fn args() -> DirectoryArgs {
        DirectoryArgs {
            url: None,
            bind_dn: None,
            password: None,
            tls: None,
            size_limit: None,
            browse: false,
            demo: false,
        }
    }

    #[test]
    fn test_config_needs_a_directory() {
        assert!(matches!(build_config(&args()), Err(CliError::NoDirectory)));
    }

    #[test]
    fn test_config_from_url_and_flags() {
        let config = build_config(&DirectoryArgs {
            url: Some("ldap://ldap.example.com:1389/dc=example,dc=com".to_string()),
            bind_dn: Some("cn=admin,dc=example,dc=com".to_string()),
            password: Some("secret".to_string()),
            tls: Some(TlsMode::Always),
            size_limit: Some(25),
            browse: true,
            demo: false,
        })
        .unwrap();

        assert_eq!(config.host, "ldap.example.com");
        assert_eq!(config.port, 1389);
        assert_eq!(config.base_dn, "dc=example,dc=com");
        assert_eq!(config.bind_dn.as_deref(), Some("cn=admin,dc=example,dc=com"));
        assert_eq!(config.tls, TlsMode::Always);
        assert_eq!(config.size_limit, 25);
        assert!(config.can_browse);
    }

    #[tokio::test]
    async fn test_demo_book_lists_people() {
        let book = open_book(&DirectoryArgs {
            demo: true,
            ..args()
        })
        .await
        .unwrap();

        let hits = book
            .fetch_many(r#"(endswith "email" "example.com")"#)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let leads = book
            .fetch_one(&format!("description=leads,{DEMO_BASE}"))
            .await
            .unwrap();
        assert!(leads.is_list);
        assert_eq!(leads.members()[0].name.as_deref(), Some("Jane Doe"));
        book.close().await.unwrap();
    }
}
