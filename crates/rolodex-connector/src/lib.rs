//! # Rolodex Connector
//!
//! Core abstractions for address books backed by a remote directory.
//!
//! This crate holds everything that does not depend on a particular
//! directory protocol: the typed record model, the portable query language,
//! the offline cache contract and the trait hosts drive.
//!
//! ## Architecture
//!
//! - [`AddressBook`](traits::AddressBook) - Host-facing contract every backend implements
//! - [`QueryNode`](query::QueryNode) - Parsed query expressions
//! - [`OfflineCache`](cache::OfflineCache) - Local mirror of directory records
//!
//! ## Example
//!
//! ```ignore
//! use rolodex_connector::prelude::*;
//!
//! let book: Box<dyn AddressBook> = make_backend(config);
//! book.open().await?;
//!
//! let jane = Record::contact()
//!     .with_text(FieldId::GivenName, "Jane")
//!     .with_text(FieldId::FamilyName, "Doe");
//! let created = book.create(jane).await?;
//!
//! let hits = book.fetch_many(r#"(contains "full_name" "jan doe")"#).await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`ids`] - Type-safe identifiers (`ViewId`)
//! - [`types`] - Enums (`BookMode`, `TlsMode`, `SearchScope`)
//! - [`error`] - Error taxonomy with transient/permanent classification
//! - [`record`] - Record model (`Record`, `FieldId`, `FieldValue`)
//! - [`query`] - Query language parser and substring helpers
//! - [`cache`] - Offline cache trait and in-memory implementation
//! - [`traits`] - Host-facing contract
//! - [`config`] - Configuration trait and shared timing settings

pub mod cache;
pub mod config;
pub mod error;
pub mod ids;
pub mod query;
pub mod record;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
///
/// ```
/// use rolodex_connector::prelude::*;
/// ```
pub mod prelude {
    // IDs
    pub use crate::ids::ViewId;

    // Types and enums
    pub use crate::types::{BookMode, SearchScope, TlsMode};

    // Error handling
    pub use crate::error::{ConnectorError, ConnectorResult, LimitKind};

    // Records
    pub use crate::record::{FieldId, FieldValue, GroupMember, PostalAddress, Record};

    // Queries
    pub use crate::query::{QueryNode, TestOp};

    // Cache
    pub use crate::cache::{MemoryCache, OfflineCache};

    // Traits
    pub use crate::traits::{
        AddressBook, Capabilities, RefreshOutcome, ViewEvent, ViewReceiver, ViewSender,
    };

    // Configuration
    pub use crate::config::{ConnectionSettings, ConnectorConfig};
}

// Re-export async_trait for backend implementors
pub use async_trait::async_trait;
