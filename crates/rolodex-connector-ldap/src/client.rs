//! Directory client abstraction
//!
//! The engine talks to the server through [`DirectoryClient`]: requests are
//! sent synchronously and return a message id, completions are collected later
//! with [`DirectoryClient::poll`]. The `ldap3` transport and the in-memory
//! directory both implement it.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use rolodex_connector::error::{ConnectorError, LimitKind};
use rolodex_connector::types::SearchScope;

/// Message id correlating completions with the request that caused them.
pub type MsgId = i32;

/// LDAP result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: Self = Self(0);
    pub const OPERATIONS_ERROR: Self = Self(1);
    pub const PROTOCOL_ERROR: Self = Self(2);
    pub const TIME_LIMIT_EXCEEDED: Self = Self(3);
    pub const SIZE_LIMIT_EXCEEDED: Self = Self(4);
    pub const STRONG_AUTH_REQUIRED: Self = Self(8);
    pub const PARTIAL_RESULTS: Self = Self(9);
    pub const CONFIDENTIALITY_REQUIRED: Self = Self(13);
    pub const TYPE_OR_VALUE_EXISTS: Self = Self(20);
    pub const NO_SUCH_OBJECT: Self = Self(32);
    pub const INVALID_CREDENTIALS: Self = Self(49);
    pub const INSUFFICIENT_ACCESS: Self = Self(50);
    pub const UNWILLING_TO_PERFORM: Self = Self(53);
    pub const OBJECT_CLASS_VIOLATION: Self = Self(65);
    pub const ALREADY_EXISTS: Self = Self(68);
    pub const SERVER_DOWN: Self = Self(81);
    pub const LOCAL_ERROR: Self = Self(82);
    pub const TIMEOUT: Self = Self(85);
    pub const CONNECT_ERROR: Self = Self(91);

    /// Name errors (`noSuchObject` and friends) occupy 0x20..=0x2f.
    pub fn is_name_error(&self) -> bool {
        (0x20..=0x2f).contains(&self.0)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result code plus diagnostic text from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapStatus {
    pub code: ResultCode,
    pub message: String,
}

impl LdapStatus {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::SUCCESS, "")
    }

    /// Status reported when the connection is gone.
    pub fn server_down(message: impl Into<String>) -> Self {
        Self::new(ResultCode::SERVER_DOWN, message)
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::SUCCESS
    }

    pub fn is_server_down(&self) -> bool {
        self.code == ResultCode::SERVER_DOWN
    }
}

impl fmt::Display for LdapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "result code {}", self.code)
        } else {
            write!(f, "result code {}: {}", self.code, self.message)
        }
    }
}

/// Map a non-success status onto the error taxonomy.
///
/// `identifier` names the entry the request targeted and ends up in
/// `NotFound`/`AlreadyExists`. Limit errors carry no partial results here;
/// search handlers attach what they accumulated.
pub fn map_status(status: &LdapStatus, identifier: &str) -> ConnectorError {
    match status.code {
        ResultCode::INVALID_CREDENTIALS => ConnectorError::AuthenticationFailed,
        ResultCode::STRONG_AUTH_REQUIRED | ResultCode::CONFIDENTIALITY_REQUIRED => {
            ConnectorError::AuthenticationRequired
        }
        ResultCode::INSUFFICIENT_ACCESS => ConnectorError::PermissionDenied {
            message: status.message.clone(),
        },
        ResultCode::NO_SUCH_OBJECT => ConnectorError::NotFound {
            identifier: identifier.to_string(),
        },
        ResultCode::ALREADY_EXISTS => ConnectorError::AlreadyExists {
            identifier: identifier.to_string(),
        },
        ResultCode::SIZE_LIMIT_EXCEEDED => ConnectorError::SearchLimitExceeded {
            kind: LimitKind::Size,
            partial: Vec::new(),
        },
        ResultCode::TIME_LIMIT_EXCEEDED => ConnectorError::SearchLimitExceeded {
            kind: LimitKind::Time,
            partial: Vec::new(),
        },
        ResultCode::SERVER_DOWN | ResultCode::CONNECT_ERROR | ResultCode::TIMEOUT => {
            ConnectorError::unavailable(status.to_string())
        }
        code => ConnectorError::ProtocolError {
            code: code.0,
            message: status.message.clone(),
        },
    }
}

/// LDAP protocol version used for binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    V2,
    #[default]
    V3,
}

/// One attribute of a wire entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireAttribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

impl WireAttribute {
    pub fn new(name: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Attribute with UTF-8 values.
    pub fn text<S: AsRef<str>>(name: impl Into<String>, values: &[S]) -> Self {
        Self::new(
            name,
            values
                .iter()
                .map(|v| v.as_ref().as_bytes().to_vec())
                .collect(),
        )
    }
}

/// Attribute name without options such as `;binary`, for comparisons.
pub fn base_attribute_name(name: &str) -> &str {
    match name.split_once(';') {
        Some((base, _)) => base,
        None => name,
    }
}

/// A directory entry as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireEntry {
    pub dn: String,
    pub attrs: Vec<WireAttribute>,
}

impl WireEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: Vec::new(),
        }
    }

    /// Add UTF-8 values to an attribute.
    #[must_use]
    pub fn with_text<S: AsRef<str>>(mut self, name: &str, values: &[S]) -> Self {
        let values = values.iter().map(|v| v.as_ref().as_bytes().to_vec()).collect();
        self.push(name, values);
        self
    }

    /// Add raw values to an attribute.
    #[must_use]
    pub fn with_values(mut self, name: &str, values: Vec<Vec<u8>>) -> Self {
        self.push(name, values);
        self
    }

    fn push(&mut self, name: &str, values: Vec<Vec<u8>>) {
        match self.attribute_mut(name) {
            Some(attr) => attr.values.extend(values),
            None => self.attrs.push(WireAttribute::new(name, values)),
        }
    }

    fn attribute_mut(&mut self, name: &str) -> Option<&mut WireAttribute> {
        let wanted = base_attribute_name(name);
        self.attrs
            .iter_mut()
            .find(|a| base_attribute_name(&a.name).eq_ignore_ascii_case(wanted))
    }

    /// Values of an attribute, matched case-insensitively and ignoring options.
    pub fn get(&self, name: &str) -> Option<&[Vec<u8>]> {
        let wanted = base_attribute_name(name);
        self.attrs
            .iter()
            .find(|a| base_attribute_name(&a.name).eq_ignore_ascii_case(wanted))
            .map(|a| a.values.as_slice())
    }

    /// Values of an attribute as text (lossy UTF-8).
    pub fn texts(&self, name: &str) -> Vec<String> {
        self.get(name)
            .unwrap_or(&[])
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }

    /// First value of an attribute as text.
    pub fn first_text(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(|values| values.first())
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// Replace or remove an attribute. Empty `values` removes it.
    pub fn set(&mut self, name: &str, values: Vec<Vec<u8>>) {
        let wanted = base_attribute_name(name).to_string();
        self.attrs
            .retain(|a| !base_attribute_name(&a.name).eq_ignore_ascii_case(&wanted));
        if !values.is_empty() {
            self.attrs.push(WireAttribute::new(name, values));
        }
    }
}

/// Kind of change applied to one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Add,
    Replace,
    Delete,
}

/// One attribute change of a modify request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub op: ChangeOp,
    pub attr: String,
    /// Empty for a delete of the whole attribute.
    pub values: Vec<Vec<u8>>,
}

impl Modification {
    pub fn new(op: ChangeOp, attr: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            op,
            attr: attr.into(),
            values,
        }
    }
}

/// Parameters of a search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
    /// Requested attributes; empty asks for all user attributes.
    pub attrs: Vec<String>,
    /// 0 means unlimited.
    pub size_limit: u32,
    /// Seconds; 0 means unlimited.
    pub time_limit: u32,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attrs: Vec::new(),
            size_limit: 0,
            time_limit: 0,
        }
    }

    /// Read one entry.
    pub fn base_object(dn: impl Into<String>) -> Self {
        Self::new(dn, SearchScope::Base, "(objectClass=*)")
    }

    #[must_use]
    pub fn with_attrs<S: AsRef<str>>(mut self, attrs: &[S]) -> Self {
        self.attrs = attrs.iter().map(|a| a.as_ref().to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_limits(mut self, size_limit: u32, time_limit: u32) -> Self {
        self.size_limit = size_limit;
        self.time_limit = time_limit;
        self
    }
}

/// Request kind a terminal completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Search,
    Add,
    Modify,
    Rename,
    Delete,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Search => "search",
            RequestKind::Add => "add",
            RequestKind::Modify => "modify",
            RequestKind::Rename => "rename",
            RequestKind::Delete => "delete",
        }
    }
}

/// A message produced by the server for an outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A search result entry; more messages follow.
    Entry(WireEntry),
    /// The terminal result of a request.
    Done { kind: RequestKind, status: LdapStatus },
}

impl Message {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Message::Done { .. })
    }
}

/// A message tagged with the id of its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: MsgId,
    pub message: Message,
}

/// Outcome of one poll for completions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    /// Nothing arrived within the timeout.
    Idle,
    Ready(Completion),
    /// The connection is gone; outstanding requests will never complete.
    Down,
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub starttls: bool,
    pub connect_timeout: Duration,
}

/// Failure to establish a connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OpenError {
    #[error("server unreachable: {0}")]
    Unreachable(String),

    #[error("TLS negotiation failed: {0}")]
    Tls(String),
}

/// Opens connections to a directory server.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn DirectoryClient>, OpenError>;
}

/// One live session with a directory server.
///
/// Send methods return immediately with the id of the request, or with a
/// status when the request could not be sent at all (server down).
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Protocol version used by subsequent binds.
    fn set_protocol_version(&mut self, version: ProtocolVersion);

    /// Simple bind; an empty dn and secret bind anonymously.
    async fn bind(&mut self, dn: &str, secret: &str) -> LdapStatus;

    /// Run a search to completion.
    async fn search_now(&mut self, request: &SearchRequest) -> (Vec<WireEntry>, LdapStatus);

    fn search(&mut self, request: &SearchRequest) -> Result<MsgId, LdapStatus>;

    fn add(&mut self, dn: &str, attrs: Vec<WireAttribute>) -> Result<MsgId, LdapStatus>;

    fn modify(&mut self, dn: &str, changes: Vec<Modification>) -> Result<MsgId, LdapStatus>;

    fn rename(&mut self, dn: &str, new_rdn: &str, delete_old_rdn: bool)
        -> Result<MsgId, LdapStatus>;

    fn delete(&mut self, dn: &str) -> Result<MsgId, LdapStatus>;

    /// Abandon an outstanding request; its completions are never delivered.
    fn abandon(&mut self, id: MsgId);

    /// Wait up to `timeout` for the next completion.
    async fn poll(&mut self, timeout: Duration) -> Poll;

    async fn unbind(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_lookup_ignores_case_and_options() {
        let entry = WireEntry::new("uid=jdoe,dc=example,dc=com")
            .with_text("CN", &["Jane Doe"])
            .with_values("userCertificate;binary", vec![vec![0x30, 0x82]]);

        assert_eq!(entry.first_text("cn").as_deref(), Some("Jane Doe"));
        assert_eq!(entry.get("usercertificate"), Some(&[vec![0x30, 0x82]][..]));
        assert!(entry.get("mail").is_none());
    }

    #[test]
    fn test_entry_set_replaces_and_removes() {
        let mut entry = WireEntry::new("cn=x").with_text("mail", &["a@example.com"]);
        entry.set("Mail", vec![b"b@example.com".to_vec()]);
        assert_eq!(entry.texts("mail"), vec!["b@example.com"]);

        entry.set("mail", Vec::new());
        assert!(entry.get("mail").is_none());
    }

    #[test]
    fn test_map_status() {
        let status = LdapStatus::new(ResultCode::INVALID_CREDENTIALS, "");
        assert!(matches!(
            map_status(&status, "x"),
            ConnectorError::AuthenticationFailed
        ));

        let status = LdapStatus::new(ResultCode::NO_SUCH_OBJECT, "gone");
        match map_status(&status, "uid=jdoe,dc=example") {
            ConnectorError::NotFound { identifier } => assert_eq!(identifier, "uid=jdoe,dc=example"),
            other => panic!("unexpected {other:?}"),
        }

        let status = LdapStatus::server_down("closed");
        assert!(map_status(&status, "x").is_transient());

        let status = LdapStatus::new(ResultCode::UNWILLING_TO_PERFORM, "no");
        assert_eq!(map_status(&status, "x").error_code(), "PROTOCOL_ERROR");

        let status = LdapStatus::new(ResultCode::SIZE_LIMIT_EXCEEDED, "");
        assert_eq!(map_status(&status, "x").error_code(), "SIZE_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_name_errors() {
        assert!(ResultCode::NO_SUCH_OBJECT.is_name_error());
        assert!(ResultCode(0x22).is_name_error());
        assert!(!ResultCode::INVALID_CREDENTIALS.is_name_error());
    }
}
