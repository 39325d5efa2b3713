//! Operation state machines
//!
//! Every logical request is an [`Operation`] that is fed the messages of its
//! current directory request and answers with a [`Step`]: keep waiting, send
//! a follow-up request, or finish. Operations never touch the connection
//! themselves; the backend issues their requests and routes completions back.

mod create;
mod fetch;
mod modify;
mod remove;
mod view;

pub use create::CreateOp;
pub use fetch::{FetchOp, FetchReply};
pub use modify::ModifyOp;
pub use remove::RemoveOp;
pub use view::ViewOp;

use chrono::{DateTime, Utc};

use rolodex_connector::cache::OfflineCache;
use rolodex_connector::error::{ConnectorError, LimitKind};
use rolodex_connector::ids::ViewId;
use rolodex_connector::record::Record;

use crate::client::{
    map_status, DirectoryClient, LdapStatus, Modification, MsgId, RequestKind, ResultCode,
    SearchRequest,
};
use crate::config::LdapConfig;
use crate::mapper::{Decoded, NewEntry};
use crate::schema::SchemaCapabilities;

/// A directory request an operation wants sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Search(SearchRequest),
    Add(NewEntry),
    Modify {
        dn: String,
        changes: Vec<Modification>,
    },
    Rename {
        dn: String,
        new_rdn: String,
    },
    Delete {
        dn: String,
    },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Search(_) => RequestKind::Search,
            Request::Add(_) => RequestKind::Add,
            Request::Modify { .. } => RequestKind::Modify,
            Request::Rename { .. } => RequestKind::Rename,
            Request::Delete { .. } => RequestKind::Delete,
        }
    }

    /// DN the request targets (the base for searches).
    pub fn target(&self) -> &str {
        match self {
            Request::Search(search) => &search.base,
            Request::Add(entry) => &entry.dn,
            Request::Modify { dn, .. } | Request::Rename { dn, .. } | Request::Delete { dn } => dn,
        }
    }

    /// Hand the request to the client. Renames keep the old RDN value.
    pub fn send(&self, client: &mut dyn DirectoryClient) -> Result<MsgId, LdapStatus> {
        match self {
            Request::Search(search) => client.search(search),
            Request::Add(entry) => client.add(&entry.dn, entry.attrs.clone()),
            Request::Modify { dn, changes } => client.modify(dn, changes.clone()),
            Request::Rename { dn, new_rdn } => client.rename(dn, new_rdn, false),
            Request::Delete { dn } => client.delete(dn),
        }
    }
}

/// A message of the operation's current request, after decoding.
#[derive(Debug)]
pub enum Event {
    Entry(Decoded),
    Done(LdapStatus),
}

/// What the backend does after feeding an operation one event.
#[derive(Debug)]
pub enum Step {
    Pending,
    Send(Request),
    Finished,
}

/// State shared with operations while they handle an event.
pub struct OpContext<'a> {
    pub cache: &'a dyn OfflineCache,
    pub caps: SchemaCapabilities,
    pub config: &'a LdapConfig,
    pub now: DateTime<Utc>,
}

/// Which limit a search status reports, if any.
pub fn limit_kind(status: &LdapStatus) -> Option<LimitKind> {
    match status.code {
        ResultCode::SIZE_LIMIT_EXCEEDED => Some(LimitKind::Size),
        ResultCode::TIME_LIMIT_EXCEEDED => Some(LimitKind::Time),
        _ => None,
    }
}

/// Error for a failed search, keeping the records received before it.
pub fn search_error(status: &LdapStatus, identifier: &str, partial: Vec<Record>) -> ConnectorError {
    match limit_kind(status) {
        Some(kind) => ConnectorError::SearchLimitExceeded { kind, partial },
        None => map_status(status, identifier),
    }
}

/// An in-flight logical request.
#[derive(Debug)]
pub enum Operation {
    Create(CreateOp),
    Modify(ModifyOp),
    Remove(RemoveOp),
    Fetch(FetchOp),
    View(ViewOp),
}

impl Operation {
    pub fn on_event(&mut self, event: Event, ctx: &OpContext<'_>) -> Step {
        match self {
            Operation::Create(op) => op.on_event(event, ctx),
            Operation::Modify(op) => op.on_event(event, ctx),
            Operation::Remove(op) => op.on_event(event, ctx),
            Operation::Fetch(op) => op.on_event(event, ctx),
            Operation::View(op) => op.on_event(event),
        }
    }

    /// Answer the caller with `error`. The operation is finished afterwards.
    pub fn fail(&mut self, error: ConnectorError) {
        match self {
            Operation::Create(op) => op.fail(error),
            Operation::Modify(op) => op.fail(error),
            Operation::Remove(op) => op.fail(error),
            Operation::Fetch(op) => op.fail(error),
            Operation::View(op) => op.fail(error),
        }
    }

    /// The live search this operation serves.
    pub fn view_id(&self) -> Option<ViewId> {
        match self {
            Operation::View(op) => Some(op.id()),
            _ => None,
        }
    }

    /// Progress text to show while the operation runs.
    pub fn status_message(&self) -> Option<String> {
        match self {
            Operation::Create(_) => Some("Adding contact to LDAP server...".to_string()),
            Operation::Modify(_) => Some("Modifying contact from LDAP server...".to_string()),
            Operation::Remove(_) => Some("Removing contact from LDAP server...".to_string()),
            Operation::Fetch(op) => op.status_message(),
            Operation::View(_) => Some("Receiving LDAP search results...".to_string()),
        }
    }

    /// Whether entries should have their list members resolved before decoding.
    pub fn wants_members(&self) -> bool {
        matches!(self, Operation::Fetch(_) | Operation::View(_))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WireAttribute;

    #[test]
    fn test_request_kind_and_target() {
        let add = Request::Add(NewEntry {
            dn: "uid=a,dc=example".to_string(),
            attrs: vec![WireAttribute::text("cn", &["A"])],
        });
        assert_eq!(add.kind(), RequestKind::Add);
        assert_eq!(add.target(), "uid=a,dc=example");

        let search = Request::Search(SearchRequest::base_object("uid=b,dc=example"));
        assert_eq!(search.kind(), RequestKind::Search);
        assert_eq!(search.target(), "uid=b,dc=example");
    }

    #[test]
    fn test_search_error_keeps_partial_results() {
        let status = LdapStatus::new(ResultCode::SIZE_LIMIT_EXCEEDED, "");
        let err = search_error(&status, "", vec![Record::contact()]);
        assert_eq!(err.partial_results().len(), 1);
        assert_eq!(err.error_code(), "SIZE_LIMIT_EXCEEDED");

        let status = LdapStatus::new(ResultCode::NO_SUCH_OBJECT, "");
        let err = search_error(&status, "uid=x", vec![]);
        assert!(matches!(err, ConnectorError::NotFound { identifier } if identifier == "uid=x"));
    }
}
