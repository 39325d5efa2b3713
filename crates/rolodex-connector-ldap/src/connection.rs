//! Connection manager
//!
//! Owns the single directory session: opening it with the configured TLS
//! policy, binding (falling back to LDAPv2 on a protocol mismatch), probing
//! the root DSE and schema, and transparently reconnecting once when a
//! request finds the server gone.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use rolodex_connector::error::{ConnectorError, ConnectorResult};
use rolodex_connector::types::TlsMode;

use crate::client::{
    map_status, DirectoryClient, DirectoryConnector, Endpoint, LdapStatus, MsgId, OpenError, Poll,
    ProtocolVersion, ResultCode, SearchRequest, WireEntry,
};
use crate::config::LdapConfig;
use crate::filter::escape_filter_value;
use crate::ops::Request;
use crate::schema::{RootDse, SchemaCapabilities, SchemaInfo, ROOT_DSE_ATTRS};

/// Identity used for binds.
#[derive(Clone, Default)]
pub struct Credentials {
    pub dn: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(dn: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            secret: secret.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.dn.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("dn", &self.dn)
            .field("secret", &"***REDACTED***")
            .finish()
    }
}

/// The shared session and what it learned about the server.
pub struct ConnectionManager {
    config: LdapConfig,
    connector: Arc<dyn DirectoryConnector>,
    client: Option<Box<dyn DirectoryClient>>,
    credentials: Credentials,
    root_dse: RootDse,
    schema: SchemaInfo,
    /// Bumped whenever a session is torn down.
    epoch: u64,
}

impl ConnectionManager {
    pub fn new(config: LdapConfig, connector: Arc<dyn DirectoryConnector>) -> Self {
        let credentials = match (&config.bind_dn, &config.bind_password) {
            (Some(dn), password) => Credentials::new(dn.clone(), password.clone().unwrap_or_default()),
            (None, _) => Credentials::default(),
        };
        Self {
            config,
            connector,
            client: None,
            credentials,
            root_dse: RootDse::default(),
            schema: SchemaInfo::default(),
            epoch: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Whether the session is bound with non-anonymous credentials.
    pub fn is_authenticated(&self) -> bool {
        self.client.is_some() && !self.credentials.is_anonymous()
    }

    /// Changes whenever outstanding requests of the previous session were lost.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn capabilities(&self) -> SchemaCapabilities {
        self.schema.capabilities
    }

    pub fn schema(&self) -> &SchemaInfo {
        &self.schema
    }

    pub fn root_dse(&self) -> &RootDse {
        &self.root_dse
    }

    fn endpoint(&self, starttls: bool) -> Endpoint {
        Endpoint {
            url: self.config.url(),
            starttls,
            connect_timeout: self.config.connection.connection_timeout(),
        }
    }

    /// Open the transport according to the TLS policy.
    async fn open(&self) -> ConnectorResult<Box<dyn DirectoryClient>> {
        let starttls = self.config.wants_starttls();
        match self.connector.open(&self.endpoint(starttls)).await {
            Ok(client) => Ok(client),
            Err(OpenError::Tls(message)) if starttls && self.config.tls == TlsMode::WhenPossible => {
                warn!(
                    target: "security",
                    host = %self.config.host,
                    error = %message,
                    "StartTLS unavailable, continuing without encryption"
                );
                self.connector
                    .open(&self.endpoint(false))
                    .await
                    .map_err(open_error)
            }
            Err(e) => Err(open_error(e)),
        }
    }

    /// Establish a new session and probe the server.
    #[instrument(skip(self), fields(host = %self.config.host))]
    pub async fn connect(&mut self) -> ConnectorResult<()> {
        self.drop_client().await;

        let mut client = self.open().await?;
        let credentials = self.credentials.clone();
        bind(client.as_mut(), &credentials).await?;

        self.root_dse = probe_root_dse(client.as_mut()).await?;
        self.schema = probe_schema(client.as_mut(), &self.root_dse).await;
        self.client = Some(client);

        info!(
            host = %self.config.host,
            bind_dn = %credentials.dn,
            evolution_person = self.schema.capabilities.evolution_person,
            cal_entry = self.schema.capabilities.cal_entry,
            "LDAP connection established"
        );
        Ok(())
    }

    /// Reconnect and rebind when `status` says the server went away.
    ///
    /// Returns whether the caller should retry its request.
    pub async fn reconnect_if_down(&mut self, status: &LdapStatus) -> bool {
        if !status.is_server_down() {
            return false;
        }
        warn!(error = %status, "LDAP server down, reconnecting");
        match self.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Reconnect failed");
                false
            }
        }
    }

    /// Send `request`, reconnecting and resending once if the server is down.
    pub async fn issue(&mut self, request: &Request) -> ConnectorResult<MsgId> {
        if self.client.is_none() {
            self.connect().await?;
        }

        let mut retried = false;
        loop {
            let client = self
                .client
                .as_deref_mut()
                .ok_or_else(|| ConnectorError::unavailable("not connected"))?;
            match request.send(client) {
                Ok(id) => {
                    debug!(msgid = id, kind = request.kind().as_str(), dn = %request.target(), "Request issued");
                    return Ok(id);
                }
                Err(status) if status.is_server_down() && !retried => {
                    retried = true;
                    if !self.reconnect_if_down(&status).await {
                        return Err(map_status(&status, request.target()));
                    }
                }
                Err(status) => {
                    if status.is_server_down() {
                        self.drop_client().await;
                    }
                    return Err(map_status(&status, request.target()));
                }
            }
        }
    }

    /// Run a search to completion, reconnecting once if the server is down.
    pub async fn search_now(
        &mut self,
        request: &SearchRequest,
    ) -> ConnectorResult<(Vec<WireEntry>, LdapStatus)> {
        if self.client.is_none() {
            self.connect().await?;
        }

        let mut retried = false;
        loop {
            let client = self
                .client
                .as_deref_mut()
                .ok_or_else(|| ConnectorError::unavailable("not connected"))?;
            let (entries, status) = client.search_now(request).await;
            if status.is_server_down() {
                if !retried && self.reconnect_if_down(&status).await {
                    retried = true;
                    continue;
                }
                return Err(map_status(&status, &request.base));
            }
            return Ok((entries, status));
        }
    }

    /// Bind as a user, resolving an email address to a DN first when asked.
    #[instrument(skip(self, secret))]
    pub async fn authenticate(&mut self, user: &str, secret: &str, by_email: bool) -> ConnectorResult<()> {
        if self.client.is_none() {
            self.connect().await?;
        }

        let dn = if by_email {
            self.lookup_dn_by_email(user).await?
        } else {
            user.to_string()
        };
        let credentials = Credentials::new(dn, secret);

        let client = self
            .client
            .as_deref_mut()
            .ok_or_else(|| ConnectorError::unavailable("not connected"))?;
        match bind(client, &credentials).await {
            Err(ConnectorError::ConnectionUnavailable { .. }) => {
                // Reconnect with the new identity.
                let previous = std::mem::replace(&mut self.credentials, credentials);
                if let Err(e) = self.connect().await {
                    self.credentials = previous;
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
            Ok(()) => {
                self.credentials = credentials;
                let client = self
                    .client
                    .as_deref_mut()
                    .ok_or_else(|| ConnectorError::unavailable("not connected"))?;
                self.schema = probe_schema(client, &self.root_dse).await;
            }
        }

        info!(bind_dn = %self.credentials.dn, "Authenticated");
        Ok(())
    }

    async fn lookup_dn_by_email(&mut self, email: &str) -> ConnectorResult<String> {
        let filter = format!("(mail={})", escape_filter_value(email));
        let request = SearchRequest::new(self.config.base_dn.clone(), self.config.scope, filter)
            .with_attrs(&["1.1"])
            .with_limits(1, 0);
        let (entries, status) = self.search_now(&request).await?;
        if !status.is_success() && status.code != ResultCode::SIZE_LIMIT_EXCEEDED {
            return Err(map_status(&status, email));
        }
        entries
            .into_iter()
            .next()
            .map(|e| e.dn)
            .ok_or(ConnectorError::AuthenticationFailed)
    }

    /// Wait for the next completion of the current session.
    pub async fn poll(&mut self, timeout: Duration) -> Poll {
        match self.client.as_deref_mut() {
            Some(client) => client.poll(timeout).await,
            None => Poll::Down,
        }
    }

    pub fn abandon(&mut self, id: MsgId) {
        if let Some(client) = self.client.as_deref_mut() {
            client.abandon(id);
        }
    }

    async fn drop_client(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.unbind().await;
            self.epoch += 1;
        }
    }

    /// Unbind and forget the session; credentials stay for the next connect.
    pub async fn disconnect(&mut self) {
        if self.client.is_some() {
            debug!(host = %self.config.host, "Disconnecting from LDAP server");
        }
        self.drop_client().await;
    }
}

fn open_error(err: OpenError) -> ConnectorError {
    match err {
        OpenError::Tls(message) => ConnectorError::TlsUnavailable { message },
        other => ConnectorError::unavailable_with_source("LDAP server unreachable", other),
    }
}

/// Bind, retrying with LDAPv2 when the server rejects the v3 bind.
async fn bind(client: &mut dyn DirectoryClient, credentials: &Credentials) -> ConnectorResult<()> {
    client.set_protocol_version(ProtocolVersion::V3);
    let mut status = client.bind(&credentials.dn, &credentials.secret).await;
    if status.code == ResultCode::PROTOCOL_ERROR {
        debug!("LDAPv3 bind rejected, retrying with LDAPv2");
        client.set_protocol_version(ProtocolVersion::V2);
        status = client.bind(&credentials.dn, &credentials.secret).await;
    }

    match status.code {
        ResultCode::SUCCESS => Ok(()),
        ResultCode::INSUFFICIENT_ACCESS => {
            debug!(bind_dn = %credentials.dn, "Bind reported insufficient access, continuing");
            Ok(())
        }
        _ => Err(map_status(&status, &credentials.dn)),
    }
}

async fn probe_root_dse(client: &mut dyn DirectoryClient) -> ConnectorResult<RootDse> {
    let request = SearchRequest::base_object("").with_attrs(&ROOT_DSE_ATTRS);
    let (entries, status) = client.search_now(&request).await;

    match status.code {
        ResultCode::SUCCESS | ResultCode::PARTIAL_RESULTS => {}
        code if code.is_name_error() => {}
        ResultCode::UNWILLING_TO_PERFORM => return Err(ConnectorError::AuthenticationRequired),
        _ => return Err(map_status(&status, "")),
    }

    Ok(entries.first().map(RootDse::from_entry).unwrap_or_default())
}

async fn probe_schema(client: &mut dyn DirectoryClient, root_dse: &RootDse) -> SchemaInfo {
    let request = SearchRequest::base_object(root_dse.subschema_dn())
        .with_attrs(&["objectClasses"]);
    let (entries, status) = client.search_now(&request).await;
    match entries.first() {
        Some(entry) if status.is_success() => SchemaInfo::from_subschema(entry),
        _ => {
            debug!(status = %status, "Schema unavailable, assuming the core person schema");
            SchemaInfo::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WireAttribute;
    use crate::memory::{Call, DirOp, MemoryDirectory};

    fn manager(dir: &MemoryDirectory, config: LdapConfig) -> ConnectionManager {
        ConnectionManager::new(config, Arc::new(dir.clone()))
    }

    fn config() -> LdapConfig {
        LdapConfig::new("memory", "ou=people,dc=example")
    }

    fn binds(dir: &MemoryDirectory) -> usize {
        dir.calls()
            .iter()
            .filter(|c| matches!(c, Call::Bind { .. }))
            .count()
    }

    #[test]
    fn test_manager_futures_can_move_across_threads() {
        fn assert_send<T: Send>(_: &T) {}
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}

        assert_send_sync::<dyn DirectoryClient>();
        assert_send_sync::<ConnectionManager>();

        let dir = MemoryDirectory::new();
        let mut conn = manager(&dir, config());
        let connect = conn.connect();
        assert_send(&connect);
    }

    #[tokio::test]
    async fn test_connect_probes_schema() {
        let dir = MemoryDirectory::with_evolution_schema();
        let mut conn = manager(&dir, config());
        conn.connect().await.unwrap();

        assert!(conn.is_connected());
        assert!(!conn.is_authenticated());
        assert!(conn.capabilities().evolution_person);
        assert!(conn.capabilities().cal_entry);
        assert_eq!(
            conn.root_dse().auth_methods(),
            vec!["ldap/simple-binddn", "ldap/simple-email", "sasl/DIGEST-MD5"]
        );
    }

    #[tokio::test]
    async fn test_starttls_fallback_when_possible() {
        let dir = MemoryDirectory::new();
        dir.set_tls_supported(false);
        let mut conn = manager(&dir, config());
        conn.connect().await.unwrap();
        assert_eq!(dir.opens(), 2);
    }

    #[tokio::test]
    async fn test_tls_required_is_fatal() {
        let dir = MemoryDirectory::new();
        dir.set_tls_supported(false);
        let mut conn = manager(&dir, config().with_tls(TlsMode::Always));
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, ConnectorError::TlsUnavailable { .. }));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let dir = MemoryDirectory::new();
        dir.refuse_connections(1);
        let mut conn = manager(&dir, config());
        let err = conn.connect().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_v2_fallback() {
        let dir = MemoryDirectory::new();
        dir.set_v3_supported(false);
        let mut conn = manager(&dir, config());
        conn.connect().await.unwrap();
        assert_eq!(binds(&dir), 2);
    }

    #[tokio::test]
    async fn test_invalid_credentials() {
        let dir = MemoryDirectory::new();
        dir.add_account("cn=admin,dc=example", "secret");
        let mut conn = manager(&dir, config().with_credentials("cn=admin,dc=example", "wrong"));
        assert!(matches!(
            conn.connect().await,
            Err(ConnectorError::AuthenticationFailed)
        ));

        let mut conn = manager(&dir, config().with_credentials("cn=admin,dc=example", "secret"));
        conn.connect().await.unwrap();
        assert!(conn.is_authenticated());
    }

    #[tokio::test]
    async fn test_anonymous_reads_refused() {
        let dir = MemoryDirectory::new();
        dir.set_anonymous_reads(false);
        let mut conn = manager(&dir, config());
        assert!(matches!(
            conn.connect().await,
            Err(ConnectorError::AuthenticationRequired)
        ));
    }

    #[tokio::test]
    async fn test_insufficient_access_bind_counts_as_bound() {
        let dir = MemoryDirectory::new();
        dir.fail_next(DirOp::Bind, LdapStatus::new(ResultCode::INSUFFICIENT_ACCESS, ""));
        let mut conn = manager(&dir, config());
        conn.connect().await.unwrap();
    }

    #[tokio::test]
    async fn test_issue_retries_once_after_server_down() {
        let dir = MemoryDirectory::new();
        let mut conn = manager(&dir, config());
        conn.connect().await.unwrap();
        dir.clear_calls();

        let epoch = conn.epoch();
        dir.fail_server_down(1);
        let request = Request::Delete {
            dn: "uid=a,ou=people,dc=example".to_string(),
        };
        conn.issue(&request).await.unwrap();
        assert_eq!(conn.epoch(), epoch + 1);

        let calls = dir.calls();
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Open)).count(), 1);
        assert_eq!(binds(&dir), 1);
        assert_eq!(
            calls.iter().filter(|c| matches!(c, Call::Delete { .. })).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_second_server_down_is_surfaced() {
        let dir = MemoryDirectory::new();
        let mut conn = manager(&dir, config());
        conn.connect().await.unwrap();

        dir.fail_server_down(2);
        let request = Request::Add(crate::mapper::NewEntry {
            dn: "uid=a,ou=people,dc=example".to_string(),
            attrs: vec![WireAttribute::text("cn", &["A"])],
        });
        let err = conn.issue(&request).await.unwrap_err();
        assert!(matches!(err, ConnectorError::ConnectionUnavailable { .. }));
        assert_eq!(dir.opens(), 2);
    }

    #[tokio::test]
    async fn test_authenticate_by_email() {
        let dir = MemoryDirectory::new();
        dir.insert(
            WireEntry::new("uid=jdoe,ou=people,dc=example")
                .with_text("objectClass", &["inetOrgPerson"])
                .with_text("mail", &["jane@example.com"]),
        );
        dir.add_account("uid=jdoe,ou=people,dc=example", "pw");
        let mut conn = manager(&dir, config());

        conn.authenticate("jane@example.com", "pw", true).await.unwrap();
        assert!(conn.is_authenticated());

        assert!(matches!(
            conn.authenticate("nobody@example.com", "pw", true).await,
            Err(ConnectorError::AuthenticationFailed)
        ));
        assert!(matches!(
            conn.authenticate("uid=jdoe,ou=people,dc=example", "bad", false).await,
            Err(ConnectorError::AuthenticationFailed)
        ));
    }
}
