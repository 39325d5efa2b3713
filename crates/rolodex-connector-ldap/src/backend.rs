//! LDAP address book
//!
//! [`LdapAddressBook`] is a thin handle; the connection, the operation
//! registry and the schema facts belong to one actor task. Calls travel to
//! the actor over a command channel and wait on a one-shot reply, so the
//! actor can run member lookups and reconnects as ordinary sequential awaits.
//!
//! While at least one operation is in flight the actor polls the connection
//! on a fixed interval and dispatches one completion per tick.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use rolodex_connector::cache::{MemoryCache, OfflineCache};
use rolodex_connector::config::ConnectorConfig;
use rolodex_connector::error::{ConnectorError, ConnectorResult};
use rolodex_connector::ids::ViewId;
use rolodex_connector::query::QueryNode;
use rolodex_connector::record::{FieldId, GroupMember, Record};
use rolodex_connector::traits::{
    AddressBook, Capabilities, RefreshOutcome, ViewEvent, ViewReceiver,
};
use rolodex_connector::types::BookMode;

use crate::client::{Completion, DirectoryConnector, Message, Poll, SearchRequest, WireEntry};
use crate::config::{LdapConfig, AUTH_SIMPLE_BINDDN, AUTH_SIMPLE_EMAIL};
use crate::connection::ConnectionManager;
use crate::filter::{wrap_base, QueryCompiler, RecordMatcher, BROWSE_FILTER};
use crate::mapper::{self, MemberInfo};
use crate::ops::{
    CreateOp, Event, FetchOp, FetchReply, ModifyOp, OpContext, Operation, RemoveOp, Request,
    Step, ViewOp,
};
use crate::registry::{OpKey, Registry, Responder, ViewSink};
use crate::transport::Ldap3Connector;

/// Filter for searches without any constraint.
const ALL_ENTRIES: &str = "(objectClass=*)";

const COMMAND_BUFFER: usize = 64;

enum Command {
    Open(Responder<()>),
    Create {
        record: Record,
        reply: Responder<Record>,
    },
    Modify {
        record: Record,
        reply: Responder<Record>,
    },
    Remove {
        uid: String,
        reply: Responder<String>,
    },
    FetchOne {
        uid: String,
        reply: Responder<Record>,
    },
    FetchMany {
        query: String,
        reply: Responder<Vec<Record>>,
    },
    ListIds {
        query: String,
        reply: Responder<Vec<String>>,
    },
    StartView {
        id: ViewId,
        query: String,
        max_results: Option<u32>,
        sink: ViewSink,
        reply: Responder<()>,
    },
    StopView {
        id: ViewId,
        reply: Responder<()>,
    },
    Authenticate {
        user: String,
        secret: String,
        method: String,
        reply: Responder<()>,
    },
    Capabilities(Responder<Capabilities>),
    Refresh(Responder<RefreshOutcome>),
    CancelAll(Responder<()>),
    SetMode {
        mode: BookMode,
        reply: Responder<()>,
    },
    Close(Responder<()>),
}

fn closed() -> ConnectorError {
    ConnectorError::internal("address book has been closed")
}

/// Address book backed by an LDAP directory.
#[derive(Debug, Clone)]
pub struct LdapAddressBook {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Open(_) => "open",
            Command::Create { .. } => "create",
            Command::Modify { .. } => "modify",
            Command::Remove { .. } => "remove",
            Command::FetchOne { .. } => "fetch_one",
            Command::FetchMany { .. } => "fetch_many",
            Command::ListIds { .. } => "list_ids",
            Command::StartView { .. } => "start_view",
            Command::StopView { .. } => "stop_view",
            Command::Authenticate { .. } => "authenticate",
            Command::Capabilities(_) => "capabilities",
            Command::Refresh(_) => "refresh",
            Command::CancelAll(_) => "cancel_all",
            Command::SetMode { .. } => "set_mode",
            Command::Close(_) => "close",
        };
        f.write_str(name)
    }
}

impl LdapAddressBook {
    /// Address book talking to a real server through `ldap3`, with an
    /// in-memory offline cache. Must be called inside a Tokio runtime.
    pub fn new(config: LdapConfig) -> Self {
        Self::with_connector(
            config,
            Arc::new(Ldap3Connector::new()),
            Arc::new(MemoryCache::new()),
        )
    }

    /// Address book using the given directory connector and offline cache.
    pub fn with_connector(
        config: LdapConfig,
        connector: Arc<dyn DirectoryConnector>,
        cache: Arc<dyn OfflineCache>,
    ) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = Actor {
            conn: ConnectionManager::new(config.clone(), connector),
            config,
            cache,
            ops: Registry::new(),
            views: Vec::new(),
            status_owner: None,
            mode: BookMode::Remote,
        };
        tokio::spawn(actor.run(rx));
        Self { commands }
    }

    async fn request<T, F>(&self, make: F) -> ConnectorResult<T>
    where
        T: Send,
        F: FnOnce(Responder<T>) -> Command + Send,
    {
        let (reply, rx) = Responder::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| ConnectorError::Cancelled)?
    }
}

#[async_trait]
impl AddressBook for LdapAddressBook {
    async fn open(&self) -> ConnectorResult<()> {
        self.request(Command::Open).await
    }

    async fn create(&self, record: Record) -> ConnectorResult<Record> {
        self.request(|reply| Command::Create { record, reply }).await
    }

    async fn modify(&self, record: Record) -> ConnectorResult<Record> {
        self.request(|reply| Command::Modify { record, reply }).await
    }

    async fn remove(&self, uid: &str) -> ConnectorResult<String> {
        let uid = uid.to_string();
        self.request(|reply| Command::Remove { uid, reply }).await
    }

    async fn fetch_one(&self, uid: &str) -> ConnectorResult<Record> {
        let uid = uid.to_string();
        self.request(|reply| Command::FetchOne { uid, reply }).await
    }

    async fn fetch_many(&self, query: &str) -> ConnectorResult<Vec<Record>> {
        let query = query.to_string();
        self.request(|reply| Command::FetchMany { query, reply }).await
    }

    async fn list_ids(&self, query: &str) -> ConnectorResult<Vec<String>> {
        let query = query.to_string();
        self.request(|reply| Command::ListIds { query, reply }).await
    }

    async fn start_view(
        &self,
        query: &str,
        max_results: Option<u32>,
    ) -> ConnectorResult<(ViewId, ViewReceiver)> {
        let id = ViewId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let query = query.to_string();
        self.request(|reply| Command::StartView {
            id,
            query,
            max_results,
            sink: ViewSink::new(tx),
            reply,
        })
        .await?;
        Ok((id, rx))
    }

    async fn stop_view(&self, view: ViewId) -> ConnectorResult<()> {
        self.request(|reply| Command::StopView { id: view, reply }).await
    }

    async fn authenticate(&self, user: &str, secret: &str, method: &str) -> ConnectorResult<()> {
        let (user, secret, method) = (user.to_string(), secret.to_string(), method.to_string());
        self.request(|reply| Command::Authenticate {
            user,
            secret,
            method,
            reply,
        })
        .await
    }

    async fn capabilities(&self) -> ConnectorResult<Capabilities> {
        self.request(Command::Capabilities).await
    }

    async fn refresh(&self) -> ConnectorResult<RefreshOutcome> {
        self.request(Command::Refresh).await
    }

    async fn cancel_all(&self) -> ConnectorResult<()> {
        self.request(Command::CancelAll).await
    }

    async fn set_mode(&self, mode: BookMode) -> ConnectorResult<()> {
        self.request(|reply| Command::SetMode { mode, reply }).await
    }

    async fn close(&self) -> ConnectorResult<()> {
        match self.request(Command::Close).await {
            Err(ConnectorError::Internal { .. } | ConnectorError::Cancelled)
                if self.commands.is_closed() =>
            {
                Ok(())
            }
            result => result,
        }
    }
}

/// Owner of the connection and every in-flight operation.
struct Actor {
    config: LdapConfig,
    conn: ConnectionManager,
    cache: Arc<dyn OfflineCache>,
    ops: Registry<Operation>,
    /// Live views in the order they were started.
    views: Vec<(ViewId, OpKey)>,
    /// Operation whose progress text the first view currently shows.
    status_owner: Option<OpKey>,
    mode: BookMode,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut tick = interval(self.config.connection.poll_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close(reply)) => {
                        self.shutdown().await;
                        reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                _ = tick.tick(), if !self.ops.is_empty() => self.poll_once().await,
            }
        }
        debug!(host = %self.config.host, "Address book stopped");
    }

    async fn handle(&mut self, command: Command) {
        debug!(command = ?command, mode = %self.mode, "Handling command");
        match command {
            Command::Open(reply) => reply.send(self.open().await),
            Command::Create { record, reply } => self.create(record, reply).await,
            Command::Modify { record, reply } => self.modify(record, reply).await,
            Command::Remove { uid, reply } => self.remove(uid, reply).await,
            Command::FetchOne { uid, reply } => self.fetch_one(uid, reply).await,
            Command::FetchMany { query, reply } => {
                self.fetch(&query, FetchReply::Many(reply)).await;
            }
            Command::ListIds { query, reply } => {
                self.fetch(&query, FetchReply::Ids(reply)).await;
            }
            Command::StartView {
                id,
                query,
                max_results,
                sink,
                reply,
            } => reply.send(self.start_view(id, &query, max_results, sink).await),
            Command::StopView { id, reply } => {
                self.stop_view(id);
                reply.send(Ok(()));
            }
            Command::Authenticate {
                user,
                secret,
                method,
                reply,
            } => reply.send(self.authenticate(&user, &secret, &method).await),
            Command::Capabilities(reply) => reply.send(Ok(self.capabilities())),
            Command::Refresh(reply) => self.refresh(reply).await,
            Command::CancelAll(reply) => {
                self.cancel_all();
                reply.send(Ok(()));
            }
            Command::SetMode { mode, reply } => reply.send(self.set_mode(mode).await),
            Command::Close(reply) => reply.send(Ok(())),
        }
    }

    fn ctx(&self) -> OpContext<'_> {
        OpContext {
            cache: self.cache.as_ref(),
            caps: self.conn.capabilities(),
            config: &self.config,
            now: Utc::now(),
        }
    }

    fn ensure_online(&self) -> ConnectorResult<()> {
        match self.mode {
            BookMode::Remote => Ok(()),
            BookMode::Local => Err(ConnectorError::RepositoryOffline),
        }
    }

    /// Offline reads need the cache to mirror the server.
    fn ensure_cache_readable(&self) -> ConnectorResult<()> {
        if self.config.offline_sync {
            Ok(())
        } else {
            Err(ConnectorError::RepositoryOffline)
        }
    }

    async fn ensure_connected(&mut self) -> ConnectorResult<()> {
        if self.conn.is_connected() {
            return Ok(());
        }
        let epoch = self.conn.epoch();
        let result = self.conn.connect().await;
        self.fail_stale(epoch, None);
        result
    }

    fn time_limit(&self) -> u32 {
        u32::try_from(self.config.connection.search_timeout_secs).unwrap_or(u32::MAX)
    }

    #[instrument(skip(self), fields(host = %self.config.host))]
    async fn open(&mut self) -> ConnectorResult<()> {
        self.config.validate()?;

        if self.mode == BookMode::Local {
            return self.ensure_cache_readable();
        }
        if self.config.requires_auth()
            && self.config.auth_method.as_deref() != Some(AUTH_SIMPLE_EMAIL)
        {
            debug!("Authentication required, waiting for credentials");
            return Ok(());
        }

        self.ensure_connected().await?;
        self.auto_refresh().await;
        Ok(())
    }

    // Operation lifecycle

    /// Issue the first request of `op` and track it.
    async fn start(&mut self, mut op: Operation, request: Request) {
        let epoch = self.conn.epoch();
        let issued = self.conn.issue(&request).await;
        self.fail_stale(epoch, None);

        let msgid = match issued {
            Ok(msgid) => msgid,
            Err(e) => {
                op.fail(e);
                return;
            }
        };
        let view = op.view_id();
        match self.ops.register(msgid, op) {
            Ok(key) => {
                if let Some(id) = view {
                    self.views.push((id, key));
                }
                self.publish_status(key);
            }
            Err(e) => {
                warn!(msgid = msgid, error = %e, "Could not track request, abandoning it");
                self.conn.abandon(msgid);
            }
        }
    }

    async fn poll_once(&mut self) {
        match self.conn.poll(self.config.connection.poll_receive_timeout()).await {
            Poll::Idle => {}
            Poll::Ready(completion) => self.dispatch(completion).await,
            Poll::Down => self.connection_lost().await,
        }
    }

    async fn dispatch(&mut self, completion: Completion) {
        let Some(key) = self.ops.key_of(completion.id) else {
            warn!(msgid = completion.id, "Dropping completion for unknown request");
            return;
        };

        let event = match completion.message {
            Message::Entry(entry) => {
                let wants_members = self.ops.get(key).is_some_and(Operation::wants_members);
                let members = if wants_members && mapper::is_group_entry(&entry) {
                    self.resolve_members(&entry, key).await
                } else {
                    MemberInfo::new()
                };
                Event::Entry(mapper::decode(&entry, &members))
            }
            Message::Done { status, .. } => Event::Done(status),
        };

        let ctx = OpContext {
            cache: self.cache.as_ref(),
            caps: self.conn.capabilities(),
            config: &self.config,
            now: Utc::now(),
        };
        let Some(op) = self.ops.get_mut(key) else {
            return;
        };
        let step = op.on_event(event, &ctx);
        let refreshing = matches!(op, Operation::Fetch(fetch) if fetch.is_refresh());

        match step {
            Step::Pending => {
                if refreshing {
                    self.publish_status(key);
                }
            }
            Step::Send(request) => self.send_follow_up(key, request).await,
            Step::Finished => {
                self.ops.finish(key);
                self.forget(key);
            }
        }
    }

    async fn send_follow_up(&mut self, key: OpKey, request: Request) {
        let epoch = self.conn.epoch();
        let issued = self.conn.issue(&request).await;
        self.fail_stale(epoch, Some(key));

        let result = match issued {
            Ok(msgid) => {
                let tracked = self.ops.retrack(key, msgid);
                if tracked.is_err() {
                    self.conn.abandon(msgid);
                }
                tracked
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            if let Some(mut op) = self.ops.finish(key) {
                op.fail(e);
            }
            self.forget(key);
        }
    }

    /// Look up names and emails of a list's members.
    async fn resolve_members(&mut self, entry: &WireEntry, key: OpKey) -> MemberInfo {
        let mut members = MemberInfo::new();
        for dn in mapper::member_dns(entry) {
            let request = SearchRequest::base_object(dn.clone()).with_attrs(&["cn", "mail"]);
            let epoch = self.conn.epoch();
            let result = self.conn.search_now(&request).await;
            self.fail_stale(epoch, Some(key));

            match result {
                Ok((found, status)) if status.is_success() => {
                    if let Some(member) = found.first() {
                        members.insert(
                            dn.to_ascii_lowercase(),
                            GroupMember {
                                dn: Some(dn.clone()),
                                name: member.first_text("cn"),
                                email: member.first_text("mail"),
                            },
                        );
                    }
                }
                Ok((_, status)) => {
                    debug!(member = %dn, code = %status.code, "List member not resolved");
                }
                Err(e) => {
                    warn!(member = %dn, error = %e, "List member lookup failed");
                }
            }
        }
        members
    }

    /// The session died under every outstanding request.
    async fn connection_lost(&mut self) {
        warn!(outstanding = self.ops.len(), "Connection to LDAP server lost");
        if let Err(e) = self.conn.connect().await {
            warn!(error = %e, "Reconnect after connection loss failed");
        }
        self.fail_all(
            || ConnectorError::unavailable("connection to the LDAP server was lost"),
            None,
        );
    }

    /// Fail requests of a session that was replaced while `keep` was being served.
    fn fail_stale(&mut self, epoch: u64, keep: Option<OpKey>) {
        if self.conn.epoch() != epoch && !self.ops.is_empty() {
            self.fail_all(
                || ConnectorError::unavailable("connection to the LDAP server was reset"),
                keep,
            );
        }
    }

    fn fail_all(&mut self, error: impl Fn() -> ConnectorError, keep: Option<OpKey>) {
        let keys: Vec<OpKey> = self
            .ops
            .iter()
            .map(|(key, _)| key)
            .filter(|key| Some(*key) != keep)
            .collect();
        for key in keys {
            if let Some(mut op) = self.ops.finish(key) {
                op.fail(error());
            }
            self.forget(key);
        }
    }

    fn cancel_key(&mut self, key: OpKey) {
        if let Some(msgid) = self.ops.msgid(key) {
            self.conn.abandon(msgid);
        }
        if let Some(mut op) = self.ops.finish(key) {
            op.fail(ConnectorError::Cancelled);
        }
        self.forget(key);
    }

    fn cancel_all(&mut self) {
        let keys: Vec<OpKey> = self.ops.iter().map(|(key, _)| key).collect();
        if !keys.is_empty() {
            info!(count = keys.len(), "Cancelling outstanding requests");
        }
        for key in keys {
            self.cancel_key(key);
        }
    }

    /// Drop bookkeeping for a finished operation.
    fn forget(&mut self, key: OpKey) {
        self.views.retain(|(_, k)| *k != key);
        self.clear_status(key);
    }

    // Status messages

    fn first_view(&self) -> Option<&ViewOp> {
        self.views.iter().find_map(|(_, key)| match self.ops.get(*key) {
            Some(Operation::View(view)) => Some(view),
            _ => None,
        })
    }

    fn publish_status(&mut self, key: OpKey) {
        let Some(message) = self.ops.get(key).and_then(Operation::status_message) else {
            return;
        };
        let shown = match self.first_view() {
            Some(view) => {
                view.status(Some(message));
                true
            }
            None => false,
        };
        if shown {
            self.status_owner = Some(key);
        }
    }

    fn clear_status(&mut self, key: OpKey) {
        if self.status_owner != Some(key) {
            return;
        }
        self.status_owner = None;
        if let Some(view) = self.first_view() {
            view.status(None);
        }
    }

    // Commands

    #[instrument(skip(self, record, reply))]
    async fn create(&mut self, record: Record, reply: Responder<Record>) {
        if let Err(e) = self.ensure_online() {
            return reply.send(Err(e));
        }
        if let Err(e) = mapper::check_structure(&record) {
            return reply.send(Err(e));
        }
        if let Err(e) = self.ensure_connected().await {
            return reply.send(Err(e));
        }
        let started = CreateOp::start(record, &self.ctx());
        match started {
            Ok((op, request)) => {
                debug!(dn = %op.dn(), "Creating entry");
                self.start(Operation::Create(op.with_reply(reply)), request).await;
            }
            Err(e) => reply.send(Err(e)),
        }
    }

    #[instrument(skip(self, record, reply), fields(uid = ?record.uid))]
    async fn modify(&mut self, record: Record, reply: Responder<Record>) {
        if let Err(e) = self.ensure_online() {
            return reply.send(Err(e));
        }
        match ModifyOp::start(record) {
            Ok((op, request)) => {
                self.start(Operation::Modify(op.with_reply(reply)), request).await;
            }
            Err(e) => reply.send(Err(e)),
        }
    }

    #[instrument(skip(self, reply))]
    async fn remove(&mut self, uid: String, reply: Responder<String>) {
        if let Err(e) = self.ensure_online() {
            return reply.send(Err(e));
        }
        let (op, request) = RemoveOp::start(&uid, reply);
        self.start(Operation::Remove(op), request).await;
    }

    #[instrument(skip(self, reply))]
    async fn fetch_one(&mut self, uid: String, reply: Responder<Record>) {
        if self.mode == BookMode::Local {
            let result = self.ensure_cache_readable().and_then(|()| {
                self.cache
                    .get(&uid)
                    .ok_or(ConnectorError::NotFound { identifier: uid.clone() })
            });
            return reply.send(result);
        }

        let request = Request::Search(SearchRequest::base_object(uid.clone()));
        let op = FetchOp::new(FetchReply::One { uid, reply });
        self.start(Operation::Fetch(op), request).await;
    }

    /// Batch search for [`FetchReply::Many`] and [`FetchReply::Ids`].
    async fn fetch(&mut self, query: &str, reply: FetchReply) {
        if self.mode == BookMode::Local {
            let records = self.ensure_cache_readable().and_then(|()| self.query_cache(query));
            match reply {
                FetchReply::Many(reply) => reply.send(records),
                FetchReply::Ids(reply) => reply.send(
                    records.map(|records| records.into_iter().filter_map(|r| r.uid).collect()),
                ),
                other => fail_fetch(other, ConnectorError::internal("unexpected offline fetch")),
            }
            return;
        }

        match self.search_request(query).await {
            Ok(search) => {
                let search = search.with_limits(self.config.size_limit, self.time_limit());
                self.start(Operation::Fetch(FetchOp::new(reply)), Request::Search(search))
                    .await;
            }
            Err(e) => fail_fetch(reply, e),
        }
    }

    /// Subtree search for `query`, with the base filter applied.
    async fn search_request(&mut self, query: &str) -> ConnectorResult<SearchRequest> {
        let node = QueryNode::parse(query)?;
        self.ensure_connected().await?;
        let compiled = QueryCompiler::new(self.conn.capabilities()).compile(&node);
        let filter = wrap_base(compiled, self.config.effective_base_filter())
            .unwrap_or_else(|| ALL_ENTRIES.to_string());
        Ok(SearchRequest::new(
            self.config.base_dn.clone(),
            self.config.scope,
            filter,
        ))
    }

    fn query_cache(&self, query: &str) -> ConnectorResult<Vec<Record>> {
        let matcher = RecordMatcher::parse(query, self.conn.capabilities())?;
        Ok(self.cache.query(&|record| matcher.matches(record)))
    }

    #[instrument(skip(self, sink), fields(view = %id))]
    async fn start_view(
        &mut self,
        id: ViewId,
        query: &str,
        max_results: Option<u32>,
        sink: ViewSink,
    ) -> ConnectorResult<()> {
        if self.mode == BookMode::Local {
            let records = self.ensure_cache_readable().and_then(|()| self.query_cache(query));
            match records {
                Ok(records) => {
                    let limit = max_results.map_or(usize::MAX, |m| m as usize);
                    for record in records.into_iter().take(limit) {
                        sink.send(ViewEvent::Update(record));
                    }
                    sink.complete(Ok(()));
                }
                Err(ConnectorError::InvalidQuery { message }) => {
                    return Err(ConnectorError::InvalidQuery { message });
                }
                Err(e) => sink.complete(Err(e)),
            }
            return Ok(());
        }

        let node = QueryNode::parse(query)?;
        self.ensure_connected().await?;
        let compiled = QueryCompiler::new(self.conn.capabilities()).compile(&node);
        let filter = match compiled {
            Some(filter) => filter,
            None if self.config.can_browse => BROWSE_FILTER.to_string(),
            None => {
                debug!("Query has no constraint and browsing is disabled");
                sink.complete(Ok(()));
                return Ok(());
            }
        };
        let filter = wrap_base(Some(filter), self.config.effective_base_filter())
            .unwrap_or_else(|| BROWSE_FILTER.to_string());

        let size_limit = match (max_results, self.config.size_limit) {
            (Some(max), 0) => max,
            (Some(max), configured) => max.min(configured),
            (None, configured) => configured,
        };
        let search = SearchRequest::new(self.config.base_dn.clone(), self.config.scope, filter)
            .with_limits(size_limit, self.time_limit());

        let op = ViewOp::new(id, sink, self.config.can_browse);
        self.start(Operation::View(op), Request::Search(search)).await;
        Ok(())
    }

    fn stop_view(&mut self, id: ViewId) {
        match self.views.iter().find(|(view, _)| *view == id) {
            Some(&(_, key)) => {
                debug!(view = %id, "Stopping view");
                self.cancel_key(key);
            }
            None => debug!(view = %id, "Stop requested for a view that is not running"),
        }
    }

    #[instrument(skip(self, secret))]
    async fn authenticate(&mut self, user: &str, secret: &str, method: &str) -> ConnectorResult<()> {
        let by_email = match method {
            AUTH_SIMPLE_BINDDN => false,
            AUTH_SIMPLE_EMAIL => true,
            other => {
                return Err(ConnectorError::UnsupportedAuthMethod {
                    method: other.to_string(),
                })
            }
        };
        if self.mode == BookMode::Local {
            debug!("Offline, accepting credentials without a bind");
            return Ok(());
        }

        let epoch = self.conn.epoch();
        let result = self.conn.authenticate(user, secret, by_email).await;
        self.fail_stale(epoch, None);
        result?;

        self.auto_refresh().await;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        let mut static_capabilities: Vec<String> = ["net", "anon-access", "contact-lists"]
            .iter()
            .map(ToString::to_string)
            .collect();
        if self.config.can_browse {
            static_capabilities.push("do-initial-query".to_string());
        }

        Capabilities {
            static_capabilities,
            supported_fields: self.conn.schema().supported_fields(),
            required_fields: [FieldId::FileAs, FieldId::FullName, FieldId::FamilyName]
                .iter()
                .map(|f| f.as_str().to_string())
                .collect(),
            auth_methods: self.conn.root_dse().auth_methods(),
        }
    }

    // Offline cache

    async fn refresh(&mut self, reply: Responder<RefreshOutcome>) {
        if !self.config.offline_sync {
            return reply.send(Ok(RefreshOutcome::Disabled));
        }
        if let Err(e) = self.ensure_online() {
            return reply.send(Err(e));
        }
        self.start_refresh(Some(reply)).await;
    }

    /// Why an automatic refresh should not run now, if it should not.
    fn refresh_not_due(&self) -> Option<RefreshOutcome> {
        if !self.config.offline_sync || self.mode == BookMode::Local {
            return Some(RefreshOutcome::Disabled);
        }
        let running = self
            .ops
            .iter()
            .any(|(_, op)| matches!(op, Operation::Fetch(fetch) if fetch.is_refresh()));
        let fresh = self.cache.is_populated()
            && self.cache.last_refresh().is_some_and(|at| {
                Utc::now() - at < self.config.connection.cache_refresh_interval()
            });
        (running || fresh).then_some(RefreshOutcome::Skipped)
    }

    async fn auto_refresh(&mut self) {
        match self.refresh_not_due() {
            Some(outcome) => debug!(outcome = ?outcome, "Automatic cache refresh not started"),
            None => self.start_refresh(None).await,
        }
    }

    async fn start_refresh(&mut self, reply: Option<Responder<RefreshOutcome>>) {
        if let Err(e) = self.ensure_connected().await {
            if let Some(reply) = reply {
                reply.send(Err(e));
            } else {
                warn!(error = %e, "Cache refresh skipped, server unavailable");
            }
            return;
        }

        info!(base = %self.config.base_dn, "Refreshing offline cache");
        let filter = wrap_base(None, self.config.effective_base_filter())
            .unwrap_or_else(|| ALL_ENTRIES.to_string());
        let search = SearchRequest::new(self.config.base_dn.clone(), self.config.scope, filter)
            .with_limits(0, 0);
        let op = FetchOp::new(FetchReply::Refresh(reply));
        self.start(Operation::Fetch(op), Request::Search(search)).await;
    }

    // Mode and lifetime

    async fn set_mode(&mut self, mode: BookMode) -> ConnectorResult<()> {
        if mode == self.mode {
            return Ok(());
        }
        info!(from = %self.mode, to = %mode, "Switching address book mode");
        self.cancel_all();
        self.mode = mode;

        match mode {
            BookMode::Local => {
                self.conn.disconnect().await;
                Ok(())
            }
            BookMode::Remote => {
                if self.config.requires_auth()
                    && self.config.auth_method.as_deref() != Some(AUTH_SIMPLE_EMAIL)
                {
                    return Ok(());
                }
                self.ensure_connected().await?;
                self.auto_refresh().await;
                Ok(())
            }
        }
    }

    async fn shutdown(&mut self) {
        self.cancel_all();
        self.conn.disconnect().await;
    }
}

fn fail_fetch(reply: FetchReply, error: ConnectorError) {
    match reply {
        FetchReply::One { reply, .. } => reply.send(Err(error)),
        FetchReply::Many(reply) => reply.send(Err(error)),
        FetchReply::Ids(reply) => reply.send(Err(error)),
        FetchReply::Refresh(Some(reply)) => reply.send(Err(error)),
        FetchReply::Refresh(None) => warn!(error = %error, "Cache refresh failed"),
    }
}
