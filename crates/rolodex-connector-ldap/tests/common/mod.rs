//! Common test utilities for the LDAP address book tests.
//!
//! Everything runs against the in-memory directory, so no server is needed.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use rolodex_connector::cache::MemoryCache;
use rolodex_connector::error::ConnectorResult;
use rolodex_connector::record::{FieldId, Record};
use rolodex_connector::traits::{ViewEvent, ViewReceiver};
use rolodex_connector_ldap::client::WireEntry;
use rolodex_connector_ldap::memory::{Call, MemoryDirectory};
use rolodex_connector_ldap::{LdapAddressBook, LdapConfig};

pub const BASE_DN: &str = "ou=people,dc=example";

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Default configuration pointing at the in-memory directory.
pub fn config() -> LdapConfig {
    LdapConfig::new("memory", BASE_DN)
}

/// An address book wired to an in-memory directory and cache.
pub struct TestBook {
    pub book: LdapAddressBook,
    pub dir: MemoryDirectory,
    pub cache: Arc<MemoryCache>,
}

impl TestBook {
    pub fn new(dir: MemoryDirectory, config: LdapConfig) -> Self {
        init_test_logging();
        let cache = Arc::new(MemoryCache::new());
        let book = LdapAddressBook::with_connector(config, Arc::new(dir.clone()), cache.clone());
        Self { book, dir, cache }
    }

    /// Book with the standard schema and default configuration.
    pub fn standard() -> Self {
        Self::new(MemoryDirectory::new(), config())
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.dir.calls().iter().filter(|c| pred(c)).count()
    }
}

/// A person entry named by `uid` below [`BASE_DN`].
pub fn person(uid: &str, cn: &str, sn: &str) -> WireEntry {
    WireEntry::new(format!("uid={uid},{BASE_DN}"))
        .with_text(
            "objectClass",
            &["top", "person", "organizationalPerson", "inetOrgPerson"],
        )
        .with_text("uid", &[uid])
        .with_text("cn", &[cn])
        .with_text("sn", &[sn])
}

pub fn contact(full_name: &str, family_name: &str) -> Record {
    Record::contact()
        .with_text(FieldId::FullName, full_name)
        .with_text(FieldId::FamilyName, family_name)
}

/// Everything a view produced, split by kind.
#[derive(Debug)]
pub struct ViewOutput {
    pub statuses: Vec<Option<String>>,
    pub records: Vec<Record>,
    pub result: ConnectorResult<()>,
}

/// Drain a view until its completion event.
pub async fn collect_view(mut rx: ViewReceiver) -> ViewOutput {
    let mut statuses = Vec::new();
    let mut records = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("view did not complete in time")
            .expect("view channel closed without completion");
        match event {
            ViewEvent::Status(status) => statuses.push(status),
            ViewEvent::Update(record) => records.push(record),
            ViewEvent::Complete(result) => {
                return ViewOutput {
                    statuses,
                    records,
                    result,
                }
            }
        }
    }
}

/// Let the backend run a few poll ticks.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Wait until `condition` holds, panicking after five seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
