//! LDAP address book configuration
//!
//! Configuration types for a directory-backed address book, including the
//! `ldap://host:port/base??scope?filter` URL form hosts usually store.

use serde::{Deserialize, Serialize};
use tracing::warn;

use rolodex_connector::config::{ConnectionSettings, ConnectorConfig};
use rolodex_connector::error::{ConnectorError, ConnectorResult};
use rolodex_connector::types::{SearchScope, TlsMode};

/// Bind by distinguished name.
pub const AUTH_SIMPLE_BINDDN: &str = "ldap/simple-binddn";

/// Bind by email address, resolved to a distinguished name first.
pub const AUTH_SIMPLE_EMAIL: &str = "ldap/simple-email";

/// Configuration for an LDAP address book.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// LDAP server hostname or IP address.
    pub host: String,

    /// LDAP server port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Use SSL/TLS from the first byte (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// StartTLS policy on plain connections.
    #[serde(default)]
    pub tls: TlsMode,

    /// Base DN records live under (e.g., "ou=people,dc=example,dc=com").
    #[serde(default)]
    pub base_dn: String,

    /// Search scope below the base DN.
    #[serde(default)]
    pub scope: SearchScope,

    /// Extra filter ANDed with every query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_filter: Option<String>,

    /// Bind DN used instead of an anonymous bind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_dn: Option<String>,

    /// Bind password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Authentication method hosts must use; `None` allows anonymous access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,

    /// Maximum entries per search (0 means no client-side limit).
    #[serde(default = "default_size_limit")]
    pub size_limit: u32,

    /// Whether a view may list the directory without a query.
    #[serde(default)]
    pub can_browse: bool,

    /// Whether to keep an offline copy of every record.
    #[serde(default)]
    pub offline_sync: bool,

    /// Connection and poll loop timing.
    #[serde(default)]
    pub connection: ConnectionSettings,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("tls", &self.tls)
            .field("base_dn", &self.base_dn)
            .field("scope", &self.scope)
            .field("base_filter", &self.base_filter)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("auth_method", &self.auth_method)
            .field("size_limit", &self.size_limit)
            .field("can_browse", &self.can_browse)
            .field("offline_sync", &self.offline_sync)
            .field("connection", &self.connection)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_ldaps_port() -> u16 {
    636
}

fn default_size_limit() -> u32 {
    100
}

impl LdapConfig {
    /// Create a new LDAP config with required fields.
    pub fn new(host: impl Into<String>, base_dn: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_ldap_port(),
            use_ssl: false,
            tls: TlsMode::default(),
            base_dn: base_dn.into(),
            scope: SearchScope::default(),
            base_filter: None,
            bind_dn: None,
            bind_password: None,
            auth_method: None,
            size_limit: default_size_limit(),
            can_browse: false,
            offline_sync: false,
            connection: ConnectionSettings::default(),
        }
    }

    /// Parse an LDAP URL (`ldap[s]://host[:port]/base[?attrs[?scope[?filter]]]`).
    pub fn from_url(url: &str) -> ConnectorResult<Self> {
        let (use_ssl, rest) = if let Some(rest) = url.strip_prefix("ldaps://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("ldap://") {
            (false, rest)
        } else {
            return Err(ConnectorError::invalid_config(format!(
                "unsupported LDAP URL scheme: {url}"
            )));
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ConnectorError::invalid_config(format!("invalid port in LDAP URL: {port}"))
                })?;
                (host.to_string(), port)
            }
            None => (
                authority.to_string(),
                if use_ssl {
                    default_ldaps_port()
                } else {
                    default_ldap_port()
                },
            ),
        };

        let mut parts = path.splitn(4, '?');
        let base_dn = percent_decode(parts.next().unwrap_or(""))?;
        let _attrs = parts.next();
        let scope = match parts.next() {
            Some(s) if !s.is_empty() => s
                .parse::<SearchScope>()
                .map_err(|e| ConnectorError::invalid_config(e.to_string()))?,
            _ => SearchScope::default(),
        };
        let base_filter = match parts.next() {
            Some(f) if !f.is_empty() => Some(percent_decode(f)?),
            _ => None,
        };

        let mut config = Self::new(host, base_dn);
        config.port = port;
        config.use_ssl = use_ssl;
        config.scope = scope;
        config.base_filter = base_filter;
        Ok(config)
    }

    /// Set bind credentials.
    #[must_use]
    pub fn with_credentials(mut self, dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.bind_dn = Some(dn.into());
        self.bind_password = Some(password.into());
        self
    }

    /// Enable SSL (LDAPS).
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = default_ldaps_port();
        self
    }

    /// Set the StartTLS policy.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    /// Set the per-search size limit.
    #[must_use]
    pub fn with_size_limit(mut self, limit: u32) -> Self {
        self.size_limit = limit;
        self
    }

    /// Set an extra base filter.
    #[must_use]
    pub fn with_base_filter(mut self, filter: impl Into<String>) -> Self {
        self.base_filter = Some(filter.into());
        self
    }

    /// Require hosts to authenticate with `method`.
    #[must_use]
    pub fn with_auth_method(mut self, method: impl Into<String>) -> Self {
        self.auth_method = Some(method.into());
        self
    }

    /// Allow views without a query.
    #[must_use]
    pub fn with_browsing(mut self, can_browse: bool) -> Self {
        self.can_browse = can_browse;
        self
    }

    /// Keep an offline copy of every record.
    #[must_use]
    pub fn with_offline_sync(mut self, offline_sync: bool) -> Self {
        self.offline_sync = offline_sync;
        self
    }

    /// Replace the timing settings.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connection = connection;
        self
    }

    /// Get the LDAP URL.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Whether hosts must authenticate before the book is usable.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        matches!(self.auth_method.as_deref(), Some(method) if method != "none")
    }

    /// The base filter, unless it is absent or matches everything.
    #[must_use]
    pub fn effective_base_filter(&self) -> Option<&str> {
        self.base_filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty() && !f.eq_ignore_ascii_case("(objectClass=*)"))
    }

    /// Whether StartTLS should be attempted on this connection.
    #[must_use]
    pub fn wants_starttls(&self) -> bool {
        !self.use_ssl && self.tls != TlsMode::Never
    }

    /// Warn about settings that send credentials in the clear.
    fn validate_security(&self) {
        if !self.use_ssl && self.tls == TlsMode::Never && self.bind_password.is_some() {
            warn!(
                target: "security",
                host = %self.host,
                "LDAP bind password will be sent without encryption"
            );
        }
    }
}

impl ConnectorConfig for LdapConfig {
    fn validate(&self) -> ConnectorResult<()> {
        if self.host.is_empty() {
            return Err(ConnectorError::invalid_config("host is required"));
        }

        if let Some(filter) = &self.base_filter {
            let filter = filter.trim();
            if !filter.is_empty() && !(filter.starts_with('(') && filter.ends_with(')')) {
                return Err(ConnectorError::invalid_config(format!(
                    "base filter must be parenthesized: {filter}"
                )));
            }
        }

        if self.bind_password.is_some() && self.bind_dn.is_none() {
            return Err(ConnectorError::invalid_config(
                "bind_password is set without bind_dn",
            ));
        }

        self.connection.validate()?;
        self.validate_security();
        Ok(())
    }

    fn get_credentials(&self) -> Vec<(&'static str, String)> {
        match &self.bind_password {
            Some(password) => vec![("bind_password", password.clone())],
            None => vec![],
        }
    }

    fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.bind_password.is_some() {
            config.bind_password = Some("***REDACTED***".to_string());
        }
        config
    }
}

fn percent_decode(input: &str) -> ConnectorResult<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3).ok_or_else(|| {
                ConnectorError::invalid_config(format!("truncated escape in LDAP URL: {input}"))
            })?;
            let byte = u8::from_str_radix(hex, 16).map_err(|_| {
                ConnectorError::invalid_config(format!("invalid escape in LDAP URL: {input}"))
            })?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|e| ConnectorError::invalid_config(format!("LDAP URL is not UTF-8: {e}")))
}
