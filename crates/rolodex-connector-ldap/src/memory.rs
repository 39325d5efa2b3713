//! In-memory directory server
//!
//! A [`DirectoryConnector`] that keeps entries in a map and answers requests
//! the way an LDAP server would, with hooks to inject failures. Used by the
//! test suite and by the CLI's `--demo` mode.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rolodex_connector::query::SubstringPattern;
use rolodex_connector::types::SearchScope;

use crate::client::{
    base_attribute_name, ChangeOp, Completion, DirectoryClient, DirectoryConnector, Endpoint,
    LdapStatus, Message, Modification, MsgId, OpenError, Poll, ProtocolVersion, RequestKind,
    ResultCode, SearchRequest, WireAttribute, WireEntry,
};
use crate::mapper::dn::{leading_rdn, parent_dn};
use crate::schema::DEFAULT_SUBSCHEMA_DN;

/// Request kinds failures can be injected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirOp {
    Bind,
    Search,
    Add,
    Modify,
    Rename,
    Delete,
}

/// One request as the directory saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Bind { dn: String },
    Search { base: String, filter: String },
    Add { dn: String },
    Modify { dn: String, changes: Vec<Modification> },
    Rename { dn: String, new_rdn: String },
    Delete { dn: String },
    Abandon { id: MsgId },
    Unbind,
}

const PERSON_SCHEMA: [&str; 4] = [
    "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) \
     MAY ( userPassword $ telephoneNumber $ seeAlso $ description ) )",
    "( 2.5.6.7 NAME 'organizationalPerson' SUP person STRUCTURAL \
     MAY ( title $ x121Address $ registeredAddress $ destinationIndicator $ \
     preferredDeliveryMethod $ telexNumber $ teletexTerminalIdentifier $ \
     telephoneNumber $ internationaliSDNNumber $ facsimileTelephoneNumber $ street $ \
     postOfficeBox $ postalCode $ postalAddress $ physicalDeliveryOfficeName $ ou $ st $ l ) )",
    "( 2.16.840.1.113730.3.2.2 NAME 'inetOrgPerson' SUP organizationalPerson STRUCTURAL \
     MAY ( audio $ businessCategory $ carLicense $ departmentNumber $ displayName $ \
     employeeNumber $ employeeType $ givenName $ homePhone $ homePostalAddress $ initials $ \
     jpegPhoto $ labeledURI $ mail $ manager $ mobile $ o $ pager $ photo $ roomNumber $ \
     secretary $ uid $ userCertificate $ x500uniqueIdentifier $ preferredLanguage $ \
     userSMIMECertificate $ userPKCS12 ) )",
    "( 2.5.6.9 NAME 'groupOfNames' SUP top STRUCTURAL MUST ( member $ cn ) \
     MAY ( businessCategory $ seeAlso $ owner $ ou $ o $ description ) )",
];

const EVOLUTION_SCHEMA: [&str; 2] = [
    "( 1.3.6.1.4.1.8506.1.3.1 NAME 'evolutionPerson' SUP inetOrgPerson STRUCTURAL \
     MAY ( fileAs $ primaryPhone $ carPhone $ homeFacsimileTelephoneNumber $ otherPhone $ \
     businessRole $ managerName $ assistantName $ assistantPhone $ otherPostalAddress $ \
     mailer $ birthDate $ anniversary $ spouseName $ note $ companyPhone $ callbackPhone $ \
     otherFacsimileTelephoneNumber $ radio $ telex $ tty $ categories $ category ) )",
    "( 1.2.840.113556.1.5.87 NAME 'calEntry' SUP top AUXILIARY \
     MAY ( calCalURI $ calFBURL $ calCAPURI $ calCalAdrURI $ calOtherCalURIs $ \
     calOtherFBURLs $ calOtherCAPURIs $ calOtherCalAdrURIs $ icsCalendar ) )",
];

#[derive(Debug)]
struct DirState {
    entries: BTreeMap<String, WireEntry>,
    root_dse: WireEntry,
    subschema: Option<WireEntry>,
    accounts: HashMap<String, String>,
    anonymous_reads: bool,
    tls_supported: bool,
    v3_supported: bool,
    size_limit: Option<usize>,
    refuse_connections: u32,
    server_down: u32,
    failures: VecDeque<(DirOp, LdapStatus)>,
    hold: bool,
    generation: u64,
    opens: usize,
    calls: Vec<Call>,
}

impl DirState {
    fn take_failure(&mut self, op: DirOp) -> Option<LdapStatus> {
        let idx = self.failures.iter().position(|(o, _)| *o == op)?;
        self.failures.remove(idx).map(|(_, status)| status)
    }
}

fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(",")
        .to_ascii_lowercase()
}

/// Shared in-memory directory. Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    state: Arc<Mutex<DirState>>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    /// Directory with the standard person schema.
    pub fn new() -> Self {
        let root_dse = WireEntry::new("")
            .with_text("supportedSASLMechanisms", &["DIGEST-MD5"])
            .with_text("subschemaSubentry", &[DEFAULT_SUBSCHEMA_DN])
            .with_text("supportedExtension", &["1.3.6.1.4.1.1466.20037"]);
        let subschema = WireEntry::new(DEFAULT_SUBSCHEMA_DN).with_text("objectClasses", &PERSON_SCHEMA);

        Self {
            state: Arc::new(Mutex::new(DirState {
                entries: BTreeMap::new(),
                root_dse,
                subschema: Some(subschema),
                accounts: HashMap::new(),
                anonymous_reads: true,
                tls_supported: true,
                v3_supported: true,
                size_limit: None,
                refuse_connections: 0,
                server_down: 0,
                failures: VecDeque::new(),
                hold: false,
                generation: 0,
                opens: 0,
                calls: Vec::new(),
            })),
        }
    }

    /// Directory whose schema also defines `evolutionPerson` and `calEntry`.
    pub fn with_evolution_schema() -> Self {
        let dir = Self::new();
        dir.with_state(|s| {
            if let Some(schema) = s.subschema.as_mut() {
                schema.attrs[0]
                    .values
                    .extend(EVOLUTION_SCHEMA.iter().map(|d| d.as_bytes().to_vec()));
            }
        });
        dir
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut DirState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Store an entry, replacing any entry with the same DN.
    pub fn insert(&self, entry: WireEntry) {
        self.with_state(|s| {
            s.entries.insert(normalize_dn(&entry.dn), entry);
        });
    }

    /// Look up an entry by DN.
    pub fn entry(&self, dn: &str) -> Option<WireEntry> {
        self.with_state(|s| s.entries.get(&normalize_dn(dn)).cloned())
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.with_state(|s| s.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accept simple binds for `dn` with `secret`.
    pub fn add_account(&self, dn: &str, secret: &str) {
        self.with_state(|s| {
            s.accounts.insert(normalize_dn(dn), secret.to_string());
        });
    }

    /// Whether anonymous sessions may read the root DSE.
    pub fn set_anonymous_reads(&self, allowed: bool) {
        self.with_state(|s| s.anonymous_reads = allowed);
    }

    pub fn set_tls_supported(&self, supported: bool) {
        self.with_state(|s| s.tls_supported = supported);
    }

    /// Reject LDAPv3 binds with a protocol error.
    pub fn set_v3_supported(&self, supported: bool) {
        self.with_state(|s| s.v3_supported = supported);
    }

    /// Server-side cap on search results.
    pub fn set_size_limit(&self, limit: Option<usize>) {
        self.with_state(|s| s.size_limit = limit);
    }

    /// Remove the subschema entry.
    pub fn remove_schema(&self) {
        self.with_state(|s| s.subschema = None);
    }

    /// Fail the next `count` connection attempts.
    pub fn refuse_connections(&self, count: u32) {
        self.with_state(|s| s.refuse_connections = count);
    }

    /// Report "server down" for the next `count` requests sent, dropping
    /// every open session each time.
    pub fn fail_server_down(&self, count: u32) {
        self.with_state(|s| s.server_down = count);
    }

    /// Answer the next request of kind `op` with `status`.
    pub fn fail_next(&self, op: DirOp, status: LdapStatus) {
        self.with_state(|s| s.failures.push_back((op, status)));
    }

    /// Keep completions queued until released.
    pub fn hold_completions(&self, hold: bool) {
        self.with_state(|s| s.hold = hold);
    }

    /// Drop every open session.
    pub fn disconnect_all(&self) {
        self.with_state(|s| s.generation += 1);
    }

    /// Requests seen so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with_state(|s| s.calls.clear());
    }

    /// Number of connection attempts.
    pub fn opens(&self) -> usize {
        self.with_state(|s| s.opens)
    }
}

#[async_trait]
impl DirectoryConnector for MemoryDirectory {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn DirectoryClient>, OpenError> {
        let generation = self.with_state(|s| {
            s.opens += 1;
            s.calls.push(Call::Open);
            if s.refuse_connections > 0 {
                s.refuse_connections -= 1;
                return Err(OpenError::Unreachable(format!(
                    "connection to {} refused",
                    endpoint.url
                )));
            }
            let wants_tls = endpoint.starttls || endpoint.url.starts_with("ldaps://");
            if wants_tls && !s.tls_supported {
                return Err(OpenError::Tls("server does not support TLS".to_string()));
            }
            Ok(s.generation)
        })?;

        Ok(Box::new(MemoryClient {
            state: Arc::clone(&self.state),
            generation,
            version: ProtocolVersion::V3,
            bound_dn: None,
            next_id: 1,
            queue: VecDeque::new(),
        }))
    }
}

struct MemoryClient {
    state: Arc<Mutex<DirState>>,
    generation: u64,
    version: ProtocolVersion,
    bound_dn: Option<String>,
    next_id: MsgId,
    queue: VecDeque<Completion>,
}

impl MemoryClient {
    fn with_state<T>(&self, f: impl FnOnce(&mut DirState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn is_alive(&self) -> bool {
        self.with_state(|s| s.generation == self.generation)
    }

    /// Common prelude of every send: liveness, injected outages and failures.
    fn begin(&mut self, op: DirOp, call: Call) -> Result<(MsgId, Option<LdapStatus>), LdapStatus> {
        let generation = self.generation;
        let failure = self.with_state(|s| {
            s.calls.push(call);
            if s.generation != generation {
                return Err(LdapStatus::server_down("connection closed"));
            }
            if s.server_down > 0 {
                s.server_down -= 1;
                s.generation += 1;
                return Err(LdapStatus::server_down("server went away"));
            }
            Ok(s.take_failure(op))
        })?;
        let id = self.next_id;
        self.next_id += 1;
        Ok((id, failure))
    }

    fn finish(&mut self, id: MsgId, kind: RequestKind, status: LdapStatus) {
        self.queue.push_back(Completion {
            id,
            message: Message::Done { kind, status },
        });
    }
}

#[async_trait]
impl DirectoryClient for MemoryClient {
    fn set_protocol_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    async fn bind(&mut self, dn: &str, secret: &str) -> LdapStatus {
        let generation = self.generation;
        let version = self.version;
        let status = self.with_state(|s| {
            s.calls.push(Call::Bind { dn: dn.to_string() });
            if s.generation != generation {
                return LdapStatus::server_down("connection closed");
            }
            if let Some(status) = s.take_failure(DirOp::Bind) {
                return status;
            }
            if version == ProtocolVersion::V3 && !s.v3_supported {
                return LdapStatus::new(ResultCode::PROTOCOL_ERROR, "LDAPv3 not supported");
            }
            if dn.is_empty() {
                return LdapStatus::success();
            }
            match s.accounts.get(&normalize_dn(dn)) {
                Some(expected) if expected == secret => LdapStatus::success(),
                _ => LdapStatus::new(ResultCode::INVALID_CREDENTIALS, "invalid credentials"),
            }
        });
        if status.is_success() {
            self.bound_dn = (!dn.is_empty()).then(|| dn.to_string());
        }
        status
    }

    async fn search_now(&mut self, request: &SearchRequest) -> (Vec<WireEntry>, LdapStatus) {
        let generation = self.generation;
        let anonymous = self.bound_dn.is_none();
        self.with_state(|s| {
            s.calls.push(Call::Search {
                base: request.base.clone(),
                filter: request.filter.clone(),
            });
            if s.generation != generation {
                return (Vec::new(), LdapStatus::server_down("connection closed"));
            }
            if let Some(status) = s.take_failure(DirOp::Search) {
                return (Vec::new(), status);
            }
            run_search(s, request, anonymous)
        })
    }

    fn search(&mut self, request: &SearchRequest) -> Result<MsgId, LdapStatus> {
        let call = Call::Search {
            base: request.base.clone(),
            filter: request.filter.clone(),
        };
        let (id, failure) = self.begin(DirOp::Search, call)?;
        let anonymous = self.bound_dn.is_none();
        let (entries, status) = match failure {
            Some(status) => (Vec::new(), status),
            None => self.with_state(|s| run_search(s, request, anonymous)),
        };
        for entry in entries {
            self.queue.push_back(Completion {
                id,
                message: Message::Entry(entry),
            });
        }
        self.finish(id, RequestKind::Search, status);
        Ok(id)
    }

    fn add(&mut self, dn: &str, attrs: Vec<WireAttribute>) -> Result<MsgId, LdapStatus> {
        let (id, failure) = self.begin(DirOp::Add, Call::Add { dn: dn.to_string() })?;
        let status = failure.unwrap_or_else(|| {
            self.with_state(|s| {
                let key = normalize_dn(dn);
                if s.entries.contains_key(&key) {
                    return LdapStatus::new(ResultCode::ALREADY_EXISTS, "entry already exists");
                }
                let mut entry = WireEntry::new(dn);
                for attr in attrs {
                    entry = entry.with_values(&attr.name, attr.values);
                }
                s.entries.insert(key, entry);
                LdapStatus::success()
            })
        });
        self.finish(id, RequestKind::Add, status);
        Ok(id)
    }

    fn modify(&mut self, dn: &str, changes: Vec<Modification>) -> Result<MsgId, LdapStatus> {
        let call = Call::Modify {
            dn: dn.to_string(),
            changes: changes.clone(),
        };
        let (id, failure) = self.begin(DirOp::Modify, call)?;
        let status = failure.unwrap_or_else(|| {
            self.with_state(|s| match s.entries.get_mut(&normalize_dn(dn)) {
                Some(entry) => {
                    for change in changes {
                        apply_change(entry, change);
                    }
                    LdapStatus::success()
                }
                None => LdapStatus::new(ResultCode::NO_SUCH_OBJECT, "no such entry"),
            })
        });
        self.finish(id, RequestKind::Modify, status);
        Ok(id)
    }

    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> Result<MsgId, LdapStatus> {
        let call = Call::Rename {
            dn: dn.to_string(),
            new_rdn: new_rdn.to_string(),
        };
        let (id, failure) = self.begin(DirOp::Rename, call)?;
        let status = failure.unwrap_or_else(|| {
            self.with_state(|s| rename_entry(s, dn, new_rdn, delete_old_rdn))
        });
        self.finish(id, RequestKind::Rename, status);
        Ok(id)
    }

    fn delete(&mut self, dn: &str) -> Result<MsgId, LdapStatus> {
        let (id, failure) = self.begin(DirOp::Delete, Call::Delete { dn: dn.to_string() })?;
        let status = failure.unwrap_or_else(|| {
            self.with_state(|s| match s.entries.remove(&normalize_dn(dn)) {
                Some(_) => LdapStatus::success(),
                None => LdapStatus::new(ResultCode::NO_SUCH_OBJECT, "no such entry"),
            })
        });
        self.finish(id, RequestKind::Delete, status);
        Ok(id)
    }

    fn abandon(&mut self, id: MsgId) {
        self.with_state(|s| s.calls.push(Call::Abandon { id }));
        self.queue.retain(|c| c.id != id);
    }

    async fn poll(&mut self, _timeout: Duration) -> Poll {
        if !self.is_alive() {
            return Poll::Down;
        }
        if self.with_state(|s| s.hold) {
            return Poll::Idle;
        }
        match self.queue.pop_front() {
            Some(completion) => Poll::Ready(completion),
            None => Poll::Idle,
        }
    }

    async fn unbind(&mut self) {
        self.with_state(|s| s.calls.push(Call::Unbind));
        self.queue.clear();
    }
}

fn apply_change(entry: &mut WireEntry, change: Modification) {
    let current: Vec<Vec<u8>> = entry.get(&change.attr).map(<[_]>::to_vec).unwrap_or_default();
    let values = match change.op {
        ChangeOp::Add => {
            let mut values = current;
            for value in change.values {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
            values
        }
        ChangeOp::Replace => change.values,
        ChangeOp::Delete if change.values.is_empty() => Vec::new(),
        ChangeOp::Delete => current
            .into_iter()
            .filter(|v| !change.values.contains(v))
            .collect(),
    };
    entry.set(&change.attr, values);
}

fn rename_entry(s: &mut DirState, dn: &str, new_rdn: &str, delete_old_rdn: bool) -> LdapStatus {
    let old_key = normalize_dn(dn);
    let Some(mut entry) = s.entries.remove(&old_key) else {
        return LdapStatus::new(ResultCode::NO_SUCH_OBJECT, "no such entry");
    };

    let parent = parent_dn(dn);
    let new_dn = if parent.is_empty() {
        new_rdn.to_string()
    } else {
        format!("{new_rdn},{parent}")
    };
    let new_key = normalize_dn(&new_dn);
    if new_key != old_key && s.entries.contains_key(&new_key) {
        s.entries.insert(old_key, entry);
        return LdapStatus::new(ResultCode::ALREADY_EXISTS, "target entry exists");
    }

    if delete_old_rdn {
        if let Some((attr, value)) = leading_rdn(dn).split_once('=') {
            apply_change(
                &mut entry,
                Modification::new(ChangeOp::Delete, attr, vec![value.as_bytes().to_vec()]),
            );
        }
    }
    if let Some((attr, value)) = new_rdn.split_once('=') {
        apply_change(
            &mut entry,
            Modification::new(ChangeOp::Add, attr, vec![value.as_bytes().to_vec()]),
        );
    }

    entry.dn = new_dn;
    s.entries.insert(new_key, entry);
    LdapStatus::success()
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    let dn = normalize_dn(dn);
    let base = normalize_dn(base);
    match scope {
        SearchScope::Base => dn == base,
        SearchScope::OneLevel => parent_dn(&dn) == base,
        SearchScope::Subtree => {
            base.is_empty() || dn == base || dn.ends_with(&format!(",{base}"))
        }
    }
}

fn project(entry: &WireEntry, attrs: &[String]) -> WireEntry {
    if attrs.is_empty() || attrs.iter().any(|a| a == "*") {
        return entry.clone();
    }
    WireEntry {
        dn: entry.dn.clone(),
        attrs: entry
            .attrs
            .iter()
            .filter(|a| {
                attrs
                    .iter()
                    .any(|wanted| base_attribute_name(wanted).eq_ignore_ascii_case(base_attribute_name(&a.name)))
            })
            .cloned()
            .collect(),
    }
}

fn run_search(
    s: &DirState,
    request: &SearchRequest,
    anonymous: bool,
) -> (Vec<WireEntry>, LdapStatus) {
    let filter = match parse_filter(&request.filter) {
        Ok(filter) => filter,
        Err(e) => {
            return (
                Vec::new(),
                LdapStatus::new(ResultCode::PROTOCOL_ERROR, format!("bad filter: {e}")),
            )
        }
    };

    // Root DSE and subschema live outside the naming context.
    if request.scope == SearchScope::Base {
        if request.base.is_empty() {
            if anonymous && !s.anonymous_reads {
                return (
                    Vec::new(),
                    LdapStatus::new(ResultCode::UNWILLING_TO_PERFORM, "anonymous access denied"),
                );
            }
            return (vec![project(&s.root_dse, &request.attrs)], LdapStatus::success());
        }
        if let Some(schema) = &s.subschema {
            if normalize_dn(&schema.dn) == normalize_dn(&request.base) {
                return (vec![project(schema, &request.attrs)], LdapStatus::success());
            }
        }
        if !s.entries.contains_key(&normalize_dn(&request.base)) {
            return (
                Vec::new(),
                LdapStatus::new(ResultCode::NO_SUCH_OBJECT, "no such entry"),
            );
        }
    }

    let limit = match (request.size_limit, s.size_limit) {
        (0, None) => usize::MAX,
        (0, Some(server)) => server,
        (client, None) => client as usize,
        (client, Some(server)) => server.min(client as usize),
    };

    let mut found = Vec::new();
    for entry in s.entries.values() {
        if !in_scope(&entry.dn, &request.base, request.scope) || !filter.matches(entry) {
            continue;
        }
        if found.len() == limit {
            return (
                found,
                LdapStatus::new(ResultCode::SIZE_LIMIT_EXCEEDED, "size limit exceeded"),
            );
        }
        found.push(project(entry, &request.attrs));
    }
    (found, LdapStatus::success())
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, String),
    Substring(String, SubstringPattern),
}

impl Filter {
    fn matches(&self, entry: &WireEntry) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|c| c.matches(entry)),
            Filter::Or(children) => children.iter().any(|c| c.matches(entry)),
            Filter::Not(child) => !child.matches(entry),
            Filter::Present(attr) => entry.get(attr).is_some_and(|v| !v.is_empty()),
            Filter::Equal(attr, value) => entry
                .texts(attr)
                .iter()
                .any(|v| v.to_lowercase() == value.to_lowercase()),
            Filter::Substring(attr, pattern) => {
                entry.texts(attr).iter().any(|v| pattern.matches(v))
            }
        }
    }
}

fn parse_filter(input: &str) -> Result<Filter, String> {
    let (filter, rest) = parse_component(input.trim())?;
    if !rest.trim().is_empty() {
        return Err(format!("trailing input '{rest}'"));
    }
    Ok(filter)
}

fn parse_component(input: &str) -> Result<(Filter, &str), String> {
    let body = input
        .strip_prefix('(')
        .ok_or_else(|| format!("expected '(' at '{input}'"))?;

    match body.chars().next() {
        Some('&') | Some('|') => {
            let mut rest = &body[1..];
            let mut children = Vec::new();
            while rest.starts_with('(') {
                let (child, after) = parse_component(rest)?;
                children.push(child);
                rest = after;
            }
            let rest = rest.strip_prefix(')').ok_or("unterminated filter set")?;
            let filter = if body.starts_with('&') {
                Filter::And(children)
            } else {
                Filter::Or(children)
            };
            Ok((filter, rest))
        }
        Some('!') => {
            let (child, rest) = parse_component(&body[1..])?;
            let rest = rest.strip_prefix(')').ok_or("unterminated not")?;
            Ok((Filter::Not(Box::new(child)), rest))
        }
        _ => {
            let end = body.find(')').ok_or("unterminated item")?;
            let item = &body[..end];
            let (attr, value) = item
                .split_once('=')
                .ok_or_else(|| format!("missing '=' in '{item}'"))?;
            let attr = attr.to_string();
            let filter = if value == "*" {
                Filter::Present(attr)
            } else if value.contains('*') {
                let parts: Vec<&str> = value.split('*').collect();
                let last = parts.len() - 1;
                let pattern = SubstringPattern {
                    initial: Some(unescape(parts[0])).filter(|s| !s.is_empty()),
                    any: parts[1..last]
                        .iter()
                        .filter(|p| !p.is_empty())
                        .map(|p| unescape(p))
                        .collect(),
                    final_part: Some(unescape(parts[last])).filter(|s| !s.is_empty()),
                };
                Filter::Substring(attr, pattern)
            } else {
                Filter::Equal(attr, unescape(value))
            };
            Ok((filter, &body[end + 1..]))
        }
    }
}

fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
