//! Connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::{capabilities, charset};

/// SSL negotiation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP only
    #[default]
    Disable,
    /// TLS when the server offers it, plain otherwise
    Preferred,
    /// TLS or fail
    Required,
    /// TLS with server certificate verification against a CA
    VerifyCa,
    /// TLS with certificate and hostname verification
    VerifyIdentity,
}

impl SslMode {
    pub const fn should_try_ssl(self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    pub const fn is_required(self) -> bool {
        matches!(
            self,
            SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity
        )
    }
}

/// Certificate material for TLS connections.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// CA bundle used to verify the server certificate
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// Private key matching `client_cert_path`
    pub client_key_path: Option<PathBuf>,
    /// Override the SNI / verification hostname
    pub server_name: Option<String>,
    /// Accept any server certificate. Only for test setups.
    pub danger_skip_verify: bool,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.danger_skip_verify = skip;
        self
    }
}

/// Connection parameters, built fluently:
///
/// ```rust
/// use mysql_wire::MySqlConfig;
///
/// let config = MySqlConfig::new()
///     .host("db.example.com")
///     .user("app")
///     .password("hunter2")
///     .database("inventory");
/// assert_eq!(config.port, 3306);
/// ```
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Schema to select at connect time
    pub database: Option<String>,
    pub charset: u8,
    pub connect_timeout: Duration,
    pub ssl_mode: SslMode,
    pub tls: TlsConfig,
    /// Advertised to the server in the handshake response
    pub max_packet_size: u32,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            charset: charset::DEFAULT_CHARSET,
            connect_timeout: Duration::from_secs(30),
            ssl_mode: SslMode::default(),
            tls: TlsConfig::default(),
            max_packet_size: 64 * 1024 * 1024,
        }
    }
}

impl MySqlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn charset(mut self, charset: u8) -> Self {
        self.charset = charset;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    /// `host:port` for the TCP dial.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Capability flags to advertise, derived from the configuration.
    pub fn capability_flags(&self) -> u32 {
        let mut flags = capabilities::DEFAULT_CLIENT_FLAGS;

        if self.database.is_some() {
            flags |= capabilities::CLIENT_CONNECT_WITH_DB;
        }
        if self.ssl_mode.should_try_ssl() {
            flags |= capabilities::CLIENT_SSL;
        }

        flags
    }
}
