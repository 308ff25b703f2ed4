//! Connection strings
//!
//! A DSN packs a whole [`ConnectionConfig`] into one line:
//!
//! ```text
//! [user[:pass]@][network[(host[:port])]]/tlsmode[?ServerName=value&SkipVerify=bool]
//! ```
//!
//! The last `/` separates the address part from the TLS mode, so passwords
//! and unix socket paths may contain `/` themselves.

use std::{
    borrow::Cow,
    error::Error as StdError,
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use url::form_urlencoded;

const SERVER_NAME_PARAM: &str = "ServerName";
const SKIP_VERIFY_PARAM: &str = "SkipVerify";

/// Transport used to reach the server
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Network {
    /// TCP over IPv4 or IPv6
    #[default]
    Tcp,
    /// TCP over IPv4 only
    Tcp4,
    /// TCP over IPv6 only
    Tcp6,
    /// Unix domain socket, the host is the socket path
    Unix,
}

impl Network {
    /// Parses a network name, case-insensitively
    ///
    /// Unknown names map to [`Network::Tcp`].
    pub fn from_name(name: &str) -> Network {
        match name.to_ascii_lowercase().as_str() {
            "tcp4" => Network::Tcp4,
            "tcp6" => Network::Tcp6,
            "unix" => Network::Unix,
            _ => Network::Tcp,
        }
    }

    /// Canonical lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Unix => "unix",
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the session is secured
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum TlsMode {
    /// Plaintext session
    #[default]
    None,
    /// Plaintext connection upgraded with `STARTTLS` before anything else
    /// is exchanged
    ///
    /// The upgrade is mandatory: a server which does not offer `STARTTLS`
    /// fails the connection.
    StartTls,
    /// TLS handshake performed as part of the dial
    Tls,
}

impl TlsMode {
    /// Parses a TLS mode, case-insensitively
    ///
    /// Anything other than `tls` and `starttls` maps to [`TlsMode::None`].
    pub fn from_name(name: &str) -> TlsMode {
        match name.to_ascii_lowercase().as_str() {
            "tls" => TlsMode::Tls,
            "starttls" => TlsMode::StartTls,
            _ => TlsMode::None,
        }
    }

    /// Canonical lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            TlsMode::None => "none",
            TlsMode::StartTls => "starttls",
            TlsMode::Tls => "tls",
        }
    }
}

impl Display for TlsMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned while parsing a DSN or building a configuration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DsnError {
    /// The address is opened with `(` but not closed
    InvalidNetwork,
    /// No separator between address and TLS mode
    InvalidHost,
    /// The address is closed with `)` somewhere else than right before
    /// the TLS mode
    InvalidDsn,
    /// The user contains `:`, or a password is set without a user
    InvalidUser,
    /// The host and port would read back differently from a DSN
    InvalidAddress,
}

impl Display for DsnError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DsnError::InvalidNetwork => "invalid network: unbalanced parenthesis in address",
            DsnError::InvalidHost => "invalid host: missing '/' before the tls mode",
            DsnError::InvalidDsn => "invalid dsn: address must end right before the tls mode",
            DsnError::InvalidUser => "invalid user: must not contain ':' and is required with a password",
            DsnError::InvalidAddress => "invalid address: host and port can't be written as a dsn",
        })
    }
}

impl StdError for DsnError {}

/// Everything needed to open a session with one SMTP server
///
/// Built with [`ConnectionConfig::builder`] or parsed from a DSN with
/// [`str::parse`], and serialized back to a canonical DSN with
/// [`Display`].
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    user: String,
    pass: String,
    network: Network,
    tls_mode: TlsMode,
    tls_skip_verify: bool,
    tls_server_name: String,
}

impl ConnectionConfig {
    /// Creates an empty builder
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Creates a builder starting from this configuration
    pub fn to_builder(&self) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: self.clone(),
        }
    }

    /// Parses a DSN
    pub fn parse(dsn: &str) -> Result<ConnectionConfig, DsnError> {
        parse(dsn)
    }

    /// Canonical DSN for this configuration
    pub fn to_dsn(&self) -> String {
        self.to_string()
    }

    /// Host name, IP address or unix socket path
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, `0` when none was given
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn pass(&self) -> &str {
        &self.pass
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn tls_mode(&self) -> TlsMode {
        self.tls_mode
    }

    /// Whether certificate verification is disabled
    ///
    /// Never applied on [`Network::Unix`].
    pub fn tls_skip_verify(&self) -> bool {
        self.tls_skip_verify
    }

    /// Name checked against the server certificate, empty for the default
    ///
    /// Never applied on [`Network::Unix`].
    pub fn tls_server_name(&self) -> &str {
        &self.tls_server_name
    }

    /// Address handed to the dialer
    ///
    /// The host alone when no port is set (and always for unix sockets),
    /// `host:port` otherwise. IPv6 literals are bracketed.
    pub fn address(&self) -> String {
        if self.port == 0 || self.network == Network::Unix {
            self.host.clone()
        } else if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Whether the session authenticates, that is a user or a password is
    /// set
    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty() || !self.pass.is_empty()
    }
}

impl Debug for ConnectionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &if self.pass.is_empty() { "" } else { "<redacted>" })
            .field("network", &self.network)
            .field("tls_mode", &self.tls_mode)
            .field("tls_skip_verify", &self.tls_skip_verify)
            .field("tls_server_name", &self.tls_server_name)
            .finish()
    }
}

impl Display for ConnectionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if !self.user.is_empty() {
            f.write_str(&self.user)?;
            if !self.pass.is_empty() {
                write!(f, ":{}", self.pass)?;
            }
            f.write_str("@")?;
        }

        f.write_str(self.network.as_str())?;

        if !self.host.is_empty() {
            f.write_str("(")?;
            if self.port > 0 && self.host.contains(':') && !self.host.starts_with('[') {
                write!(f, "[{}]", self.host)?;
            } else {
                f.write_str(&self.host)?;
            }
            if self.port > 0 {
                write!(f, ":{}", self.port)?;
            }
            f.write_str(")")?;
        }

        write!(f, "/{}", self.tls_mode)?;

        // keys in sorted order
        let mut query = form_urlencoded::Serializer::new(String::new());
        if !self.tls_server_name.is_empty() {
            query.append_pair(SERVER_NAME_PARAM, &self.tls_server_name);
        }
        if self.tls_skip_verify {
            query.append_pair(SKIP_VERIFY_PARAM, "true");
        }
        let query = query.finish();
        if !query.is_empty() {
            write!(f, "?{query}")?;
        }

        Ok(())
    }
}

impl FromStr for ConnectionConfig {
    type Err = DsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Host name, IP address or unix socket path
    pub fn host<T: Into<String>>(mut self, host: T) -> Self {
        self.config.host = host.into();
        self
    }

    /// Port, `0` to let the dialer pick the default one
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn user<T: Into<String>>(mut self, user: T) -> Self {
        self.config.user = user.into();
        self
    }

    pub fn pass<T: Into<String>>(mut self, pass: T) -> Self {
        self.config.pass = pass.into();
        self
    }

    pub fn network(mut self, network: Network) -> Self {
        self.config.network = network;
        self
    }

    pub fn tls_mode(mut self, tls_mode: TlsMode) -> Self {
        self.config.tls_mode = tls_mode;
        self
    }

    /// Disable certificate verification
    ///
    /// # Warning
    ///
    /// Any certificate is trusted, which opens the session to
    /// man-in-the-middle attacks.
    pub fn tls_skip_verify(mut self, skip: bool) -> Self {
        self.config.tls_skip_verify = skip;
        self
    }

    pub fn tls_server_name<T: Into<String>>(mut self, server_name: T) -> Self {
        self.config.tls_server_name = server_name.into();
        self
    }

    /// Checks the configuration can be written as a DSN and read back
    pub fn build(self) -> Result<ConnectionConfig, DsnError> {
        let config = self.config;

        if config.user.contains(':') || (config.user.is_empty() && !config.pass.is_empty()) {
            return Err(DsnError::InvalidUser);
        }

        let host = config.host.as_str();
        let readable = if config.port == 0 {
            // `relay:25` would read back as a port
            !split_host_port(host).is_some_and(|(_, port)| port > 0)
        } else {
            !host.is_empty() && !host.contains(['[', ']'])
        };
        if !readable || host.contains('@') {
            return Err(DsnError::InvalidAddress);
        }

        Ok(config)
    }
}

fn parse(dsn: &str) -> Result<ConnectionConfig, DsnError> {
    let dsn = with_separator(dsn);
    let slash = match dsn.rfind('/') {
        Some(slash) => slash,
        None if dsn.is_empty() => return Ok(ConnectionConfig::default()),
        None => return Err(DsnError::InvalidHost),
    };
    let (address, settings) = (&dsn[..slash], &dsn[slash + 1..]);

    let mut builder = ConnectionConfig::builder();

    if !address.is_empty() {
        let endpoint = match address.rfind('@') {
            Some(at) => {
                let user_info = &address[..at];
                builder = match user_info.split_once(':') {
                    Some((user, pass)) => builder.user(user).pass(pass),
                    None => builder.user(user_info),
                };
                &address[at + 1..]
            }
            None => address,
        };

        let network = match endpoint.find('(') {
            Some(open) => {
                let enclosed = &endpoint[open + 1..];
                let Some(host_port) = enclosed.strip_suffix(')') else {
                    return Err(if enclosed.contains(')') {
                        DsnError::InvalidDsn
                    } else {
                        DsnError::InvalidNetwork
                    });
                };

                let (host, port) = match split_host_port(host_port) {
                    Some((host, port)) if port > 0 => (host, port),
                    _ => (host_port, 0),
                };
                builder = builder.host(host).port(port);

                &endpoint[..open]
            }
            None => endpoint,
        };
        builder = builder.network(Network::from_name(network));
    }

    let (tls_mode, query) = match settings.split_once('?') {
        Some((tls_mode, query)) => (tls_mode, Some(query)),
        None => (settings, None),
    };

    if let Some(query) = query {
        let mut server_name = None;
        let mut skip_verify = None;
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                SERVER_NAME_PARAM if server_name.is_none() => server_name = Some(value),
                SKIP_VERIFY_PARAM if skip_verify.is_none() => skip_verify = Some(value),
                _ => {}
            }
        }

        if let Some(server_name) = server_name.filter(|name| !name.is_empty()) {
            builder = builder.tls_server_name(server_name.into_owned());
        }
        if let Some(skip) = skip_verify.as_deref().and_then(parse_bool) {
            builder = builder.tls_skip_verify(skip);
        }
    }

    builder.tls_mode(TlsMode::from_name(tls_mode)).build()
}

/// Adds the implicit `/` of DSNs written without TLS mode
fn with_separator(dsn: &str) -> Cow<'_, str> {
    if dsn.contains('/') {
        return Cow::Borrowed(dsn);
    }

    match dsn.rfind('?') {
        Some(query) => Cow::Owned(format!("{}/{}", &dsn[..query], &dsn[query..])),
        None => Cow::Owned(format!("{dsn}/")),
    }
}

/// Splits `host:port` or `[host]:port`
///
/// Returns `None` when the port is missing, not a number or the host is
/// ambiguous.
fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = if let Some(bracketed) = address.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']')?;
        (host, rest.strip_prefix(':')?)
    } else {
        let (host, port) = address.rsplit_once(':')?;
        if host.contains(':') {
            return None;
        }
        (host, port)
    };

    port.parse().ok().map(|port| (host, port))
}

/// Boolean literals accepted for `SkipVerify`
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
