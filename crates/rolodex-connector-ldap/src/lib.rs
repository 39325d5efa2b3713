//! # LDAP Connector
//!
//! LDAP address book backend for rolodex.
//!
//! This crate keeps contacts and contact lists in an LDAP directory and
//! exposes them through the [`AddressBook`](rolodex_connector::traits::AddressBook)
//! contract.
//!
//! ## Features
//!
//! - One shared connection driven by an actor task
//! - Many concurrent requests multiplexed by message id
//! - StartTLS with a configurable policy, LDAPv2 bind fallback
//! - Schema discovery (`evolutionPerson`, `calEntry`)
//! - Query compilation to RFC 4515 filters
//! - Minimal-diff modifies with renames when a naming attribute changes
//! - Offline mode served from a local cache
//!
//! ## Example
//!
//! ```ignore
//! use rolodex_connector::prelude::*;
//! use rolodex_connector_ldap::{LdapAddressBook, LdapConfig};
//!
//! let config = LdapConfig::new("ldap.example.com", "ou=people,dc=example,dc=com")
//!     .with_browsing(true);
//!
//! let book = LdapAddressBook::new(config);
//! book.open().await?;
//! let hits = book.fetch_many(r#"(beginswith "family_name" "Do")"#).await?;
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod connection;
pub mod filter;
pub mod mapper;
pub mod memory;
pub mod ops;
pub mod registry;
pub mod schema;
pub mod transport;

// Re-exports
pub use backend::LdapAddressBook;
pub use config::{LdapConfig, AUTH_SIMPLE_BINDDN, AUTH_SIMPLE_EMAIL};
pub use filter::{QueryCompiler, RecordMatcher};
pub use memory::MemoryDirectory;
pub use schema::SchemaCapabilities;
pub use transport::Ldap3Connector;
