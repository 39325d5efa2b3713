//! `ldap3` transport
//!
//! Each request runs on its own task against a clone of the `ldap3` handle
//! and pushes its messages into one channel, which [`DirectoryClient::poll`]
//! drains. Message ids are assigned locally; searches also record the id
//! the server knows them by so they can be abandoned there.

use async_trait::async_trait;
use ldap3::{
    LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Mod, ResultEntry, Scope, SearchEntry,
    SearchOptions,
};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use rolodex_connector::types::SearchScope;

use crate::client::{
    ChangeOp, Completion, DirectoryClient, DirectoryConnector, Endpoint, LdapStatus, Message,
    Modification, MsgId, OpenError, Poll, ProtocolVersion, RequestKind, ResultCode,
    SearchRequest, WireAttribute, WireEntry,
};

/// Opens real LDAP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ldap3Connector;

impl Ldap3Connector {
    pub fn new() -> Self {
        Self
    }
}

fn classify_open_error(err: LdapError, endpoint: &Endpoint) -> OpenError {
    let tls_requested = endpoint.starttls || endpoint.url.starts_with("ldaps://");
    match err {
        LdapError::Io { .. } | LdapError::Timeout { .. } => OpenError::Unreachable(err.to_string()),
        _ if tls_requested => OpenError::Tls(err.to_string()),
        _ => OpenError::Unreachable(err.to_string()),
    }
}

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn DirectoryClient>, OpenError> {
        debug!(url = %endpoint.url, starttls = endpoint.starttls, "Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(endpoint.connect_timeout)
            .set_starttls(endpoint.starttls);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &endpoint.url)
            .await
            .map_err(|e| classify_open_error(e, endpoint))?;

        let alive = Arc::new(AtomicBool::new(true));
        let driver_alive = Arc::clone(&alive);
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
            driver_alive.store(false, Ordering::SeqCst);
        });

        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(Ldap3Client {
            ldap,
            alive,
            version: ProtocolVersion::V3,
            next_id: 1,
            tasks: HashMap::new(),
            tx,
            rx,
        }))
    }
}

/// Sends the messages of one request.
#[derive(Clone)]
struct Sink {
    id: MsgId,
    tx: mpsc::UnboundedSender<Completion>,
    server_id: Arc<AtomicI32>,
}

impl Sink {
    fn send(&self, message: Message) {
        // The receiver lives as long as the client; a send only fails after unbind.
        let _ = self.tx.send(Completion {
            id: self.id,
            message,
        });
    }

    /// Remember the message id `ldap3` used on the wire.
    fn track(&self, server_id: i32) {
        self.server_id.store(server_id, Ordering::SeqCst);
    }
}

/// A request running on its own task.
struct InFlight {
    task: AbortHandle,
    server_id: Arc<AtomicI32>,
}

impl InFlight {
    /// Wire message id, once the request is on the wire and tracked.
    fn server_id(&self) -> Option<i32> {
        match self.server_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }
}

struct Ldap3Client {
    ldap: ldap3::Ldap,
    alive: Arc<AtomicBool>,
    version: ProtocolVersion,
    next_id: MsgId,
    tasks: HashMap<MsgId, InFlight>,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

fn status_of(result: Result<LdapResult, LdapError>) -> LdapStatus {
    match result {
        Ok(res) => LdapStatus::new(ResultCode(res.rc), res.text),
        Err(e) => LdapStatus::server_down(e.to_string()),
    }
}

fn ldap_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

fn search_options(request: &SearchRequest) -> SearchOptions {
    SearchOptions::new()
        .sizelimit(i32::try_from(request.size_limit).unwrap_or(i32::MAX))
        .timelimit(i32::try_from(request.time_limit).unwrap_or(i32::MAX))
}

fn wire_entry(entry: ResultEntry) -> WireEntry {
    let entry = SearchEntry::construct(entry);
    let mut attrs: Vec<WireAttribute> = entry
        .attrs
        .into_iter()
        .map(|(name, values)| {
            WireAttribute::new(name, values.into_iter().map(String::into_bytes).collect())
        })
        .collect();
    attrs.extend(
        entry
            .bin_attrs
            .into_iter()
            .map(|(name, values)| WireAttribute::new(name, values)),
    );
    WireEntry {
        dn: entry.dn,
        attrs,
    }
}

fn value_set(values: Vec<Vec<u8>>) -> HashSet<Vec<u8>> {
    values.into_iter().collect()
}

fn ldap_mod(change: Modification) -> Mod<Vec<u8>> {
    let attr = change.attr.into_bytes();
    let values = value_set(change.values);
    match change.op {
        ChangeOp::Add => Mod::Add(attr, values),
        ChangeOp::Replace => Mod::Replace(attr, values),
        ChangeOp::Delete => Mod::Delete(attr, values),
    }
}

impl Ldap3Client {
    fn spawn_request<F, Fut>(&mut self, kind: RequestKind, work: F) -> Result<MsgId, LdapStatus>
    where
        F: FnOnce(ldap3::Ldap, Sink) -> Fut,
        Fut: Future<Output = LdapStatus> + Send + 'static,
    {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(LdapStatus::server_down("connection closed"));
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let server_id = Arc::new(AtomicI32::new(0));
        let sink = Sink {
            id,
            tx: self.tx.clone(),
            server_id: Arc::clone(&server_id),
        };
        let work = work(self.ldap.clone(), sink.clone());
        let handle = tokio::spawn(async move {
            let status = work.await;
            sink.send(Message::Done { kind, status });
        });
        self.tasks.insert(
            id,
            InFlight {
                task: handle.abort_handle(),
                server_id,
            },
        );
        debug!(msgid = id, kind = kind.as_str(), "LDAP request sent");
        Ok(id)
    }
}

#[async_trait]
impl DirectoryClient for Ldap3Client {
    fn set_protocol_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    async fn bind(&mut self, dn: &str, secret: &str) -> LdapStatus {
        if self.version == ProtocolVersion::V2 {
            return LdapStatus::new(
                ResultCode::PROTOCOL_ERROR,
                "LDAPv2 is not supported by this transport",
            );
        }
        status_of(self.ldap.simple_bind(dn, secret).await)
    }

    async fn search_now(&mut self, request: &SearchRequest) -> (Vec<WireEntry>, LdapStatus) {
        let result = self
            .ldap
            .with_search_options(search_options(request))
            .search(
                &request.base,
                ldap_scope(request.scope),
                &request.filter,
                request.attrs.clone(),
            )
            .await;
        match result {
            Ok(ldap3::SearchResult(entries, res)) => (
                entries
                    .into_iter()
                    .filter(|e| !e.is_ref() && !e.is_intermediate())
                    .map(wire_entry)
                    .collect(),
                LdapStatus::new(ResultCode(res.rc), res.text),
            ),
            Err(e) => (Vec::new(), LdapStatus::server_down(e.to_string())),
        }
    }

    fn search(&mut self, request: &SearchRequest) -> Result<MsgId, LdapStatus> {
        let request = request.clone();
        self.spawn_request(RequestKind::Search, move |mut ldap, sink| async move {
            let stream = ldap
                .with_search_options(search_options(&request))
                .streaming_search(
                    &request.base,
                    ldap_scope(request.scope),
                    &request.filter,
                    request.attrs.clone(),
                )
                .await;
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(e) => return LdapStatus::server_down(e.to_string()),
            };
            sink.track(stream.ldap_handle().last_id());
            loop {
                match stream.next().await {
                    Ok(Some(entry)) if entry.is_ref() || entry.is_intermediate() => continue,
                    Ok(Some(entry)) => sink.send(Message::Entry(wire_entry(entry))),
                    Ok(None) => break,
                    Err(e) => return LdapStatus::server_down(e.to_string()),
                }
            }
            let res = stream.finish().await;
            LdapStatus::new(ResultCode(res.rc), res.text)
        })
    }

    fn add(&mut self, dn: &str, attrs: Vec<WireAttribute>) -> Result<MsgId, LdapStatus> {
        let dn = dn.to_string();
        let attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = attrs
            .into_iter()
            .map(|a| (a.name.into_bytes(), value_set(a.values)))
            .collect();
        self.spawn_request(RequestKind::Add, move |mut ldap, _| async move {
            status_of(ldap.add(&dn, attrs).await)
        })
    }

    fn modify(&mut self, dn: &str, changes: Vec<Modification>) -> Result<MsgId, LdapStatus> {
        let dn = dn.to_string();
        let mods: Vec<Mod<Vec<u8>>> = changes.into_iter().map(ldap_mod).collect();
        self.spawn_request(RequestKind::Modify, move |mut ldap, _| async move {
            status_of(ldap.modify(&dn, mods).await)
        })
    }

    fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> Result<MsgId, LdapStatus> {
        let dn = dn.to_string();
        let new_rdn = new_rdn.to_string();
        self.spawn_request(RequestKind::Rename, move |mut ldap, _| async move {
            status_of(ldap.modifydn(&dn, &new_rdn, delete_old_rdn, None).await)
        })
    }

    fn delete(&mut self, dn: &str) -> Result<MsgId, LdapStatus> {
        let dn = dn.to_string();
        self.spawn_request(RequestKind::Delete, move |mut ldap, _| async move {
            status_of(ldap.delete(&dn).await)
        })
    }

    fn abandon(&mut self, id: MsgId) {
        let Some(in_flight) = self.tasks.remove(&id) else {
            return;
        };
        in_flight.task.abort();

        // Only searches are tracked on the wire; the other requests complete in
        // one round trip and are just dropped locally.
        if let Some(server_id) = in_flight.server_id() {
            let mut ldap = self.ldap.clone();
            tokio::spawn(async move {
                if let Err(e) = ldap.abandon(server_id).await {
                    debug!(msgid = server_id, error = %e, "LDAP abandon failed");
                }
            });
        }
        debug!(msgid = id, server_msgid = ?in_flight.server_id(), "LDAP request abandoned");
    }

    async fn poll(&mut self, timeout: Duration) -> Poll {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let completion = match self.rx.try_recv() {
                Ok(completion) => completion,
                Err(_) if !self.alive.load(Ordering::SeqCst) => return Poll::Down,
                Err(_) => match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                    Ok(Some(completion)) => completion,
                    Ok(None) => return Poll::Down,
                    Err(_) => return Poll::Idle,
                },
            };

            if !self.tasks.contains_key(&completion.id) {
                debug!(msgid = completion.id, "Dropping message for abandoned request");
                continue;
            }
            if completion.message.is_terminal() {
                self.tasks.remove(&completion.id);
            }
            return Poll::Ready(completion);
        }
    }

    async fn unbind(&mut self) {
        for (_, in_flight) in self.tasks.drain() {
            in_flight.task.abort();
        }
        if let Err(e) = self.ldap.unbind().await {
            debug!(error = %e, "LDAP unbind failed");
        }
    }
}
