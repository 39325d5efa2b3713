//! Host-facing address book contract
//!
//! Every backend implements [`AddressBook`]. Each method resolves exactly
//! once; live searches stream [`ViewEvent`]s ending in one
//! [`ViewEvent::Complete`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ConnectorResult;
use crate::ids::ViewId;
use crate::record::Record;
use crate::types::BookMode;

/// What a backend can do, reported to hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Static capability keywords, e.g. `net`, `contact-lists`.
    pub static_capabilities: Vec<String>,

    /// Fields the server schema can store.
    pub supported_fields: Vec<String>,

    /// Fields a new record must carry.
    pub required_fields: Vec<String>,

    /// Authentication methods the server offers.
    pub auth_methods: Vec<String>,
}

impl Capabilities {
    /// Static capabilities joined the way hosts expect them.
    pub fn static_capabilities_string(&self) -> String {
        self.static_capabilities.join(",")
    }
}

/// Outcome of an explicit or automatic cache refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A full download replaced the cache contents.
    Refreshed { records: usize },
    /// The cache was fresh enough; nothing was downloaded.
    Skipped,
    /// Offline sync is disabled for this book.
    Disabled,
}

/// Incremental output of a live search.
#[derive(Debug)]
pub enum ViewEvent {
    /// Progress text for the user; `None` clears it.
    Status(Option<String>),
    /// A record matching the view query.
    Update(Record),
    /// Terminal event; nothing follows it.
    Complete(ConnectorResult<()>),
}

/// Receiving end of a live search.
pub type ViewReceiver = mpsc::UnboundedReceiver<ViewEvent>;

/// Sending end of a live search.
pub type ViewSender = mpsc::UnboundedSender<ViewEvent>;

/// The record store protocol a host drives.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Load the source: validate configuration and connect unless offline.
    async fn open(&self) -> ConnectorResult<()>;

    /// Store a new record and return it with its assigned identity.
    async fn create(&self, record: Record) -> ConnectorResult<Record>;

    /// Replace the stored fields of `record` (identified by its uid).
    async fn modify(&self, record: Record) -> ConnectorResult<Record>;

    /// Delete a record by identity, returning the removed identity.
    async fn remove(&self, uid: &str) -> ConnectorResult<String>;

    /// Fetch one record by identity.
    async fn fetch_one(&self, uid: &str) -> ConnectorResult<Record>;

    /// Fetch every record matching `query`.
    ///
    /// A server limit yields `SearchLimitExceeded` carrying the partial results.
    async fn fetch_many(&self, query: &str) -> ConnectorResult<Vec<Record>>;

    /// Identities of every record matching `query`.
    async fn list_ids(&self, query: &str) -> ConnectorResult<Vec<String>>;

    /// Start a live search; `max_results` caps the view on top of the configured limit.
    async fn start_view(
        &self,
        query: &str,
        max_results: Option<u32>,
    ) -> ConnectorResult<(ViewId, ViewReceiver)>;

    /// Stop a live search.
    async fn stop_view(&self, view: ViewId) -> ConnectorResult<()>;

    /// Bind with user credentials using one of the advertised methods.
    async fn authenticate(&self, user: &str, secret: &str, method: &str) -> ConnectorResult<()>;

    /// Report static capabilities, supported fields and auth methods.
    async fn capabilities(&self) -> ConnectorResult<Capabilities>;

    /// Download every record into the offline cache now.
    async fn refresh(&self) -> ConnectorResult<RefreshOutcome>;

    /// Abandon every request in flight.
    async fn cancel_all(&self) -> ConnectorResult<()>;

    /// Switch between online and offline operation.
    async fn set_mode(&self, mode: BookMode) -> ConnectorResult<()>;

    /// Unbind and stop the backend.
    async fn close(&self) -> ConnectorResult<()>;
}
