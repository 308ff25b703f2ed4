//! TLS settings shared by the sessions of a client
//!
//! A [`TlsConfig`] is a template. Each connection derives its own copy with
//! [`TlsConfig::for_connection`], which layers the `ServerName` and
//! `SkipVerify` settings of the [`ConnectionConfig`] on top of it.

use std::fmt::{self, Debug};

#[cfg(feature = "native-tls")]
use native_tls::{Protocol, TlsConnector};

use crate::dsn::{ConnectionConfig, Network};
#[cfg(feature = "native-tls")]
use crate::error::{self, Error};

/// TLS protocol versions
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub enum TlsVersion {
    /// Legacy servers only
    Tlsv10,
    /// Legacy servers only
    Tlsv11,
    Tlsv12,
    /// Only usable as the maximum with `native-tls`
    Tlsv13,
}

/// A trusted root certificate, see [`TlsConfig::add_root_certificate`]
#[cfg(feature = "native-tls")]
#[cfg_attr(docsrs, doc(cfg(feature = "native-tls")))]
#[derive(Clone)]
pub struct Certificate(native_tls::Certificate);

#[cfg(feature = "native-tls")]
impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self, Error> {
        native_tls::Certificate::from_der(der)
            .map(Certificate)
            .map_err(error::tls)
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
        native_tls::Certificate::from_pem(pem)
            .map(Certificate)
            .map_err(error::tls)
    }
}

#[cfg(feature = "native-tls")]
impl Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate").finish_non_exhaustive()
    }
}

/// Base TLS configuration of a client
///
/// By default the system roots are trusted, certificates and host names
/// are verified and TLS 1.2 is the oldest version accepted.
#[derive(Clone)]
pub struct TlsConfig {
    /// Name checked against the certificate instead of the host
    server_name: Option<String>,
    system_roots: bool,
    #[cfg(feature = "native-tls")]
    extra_roots: Vec<Certificate>,
    accept_invalid_certs: bool,
    accept_invalid_hostnames: bool,
    min_version: TlsVersion,
    max_version: Option<TlsVersion>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            server_name: None,
            system_roots: true,
            #[cfg(feature = "native-tls")]
            extra_roots: Vec::new(),
            accept_invalid_certs: false,
            accept_invalid_hostnames: false,
            min_version: TlsVersion::Tlsv12,
            max_version: None,
        }
    }
}

impl Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("TlsConfig");
        builder
            .field("server_name", &self.server_name)
            .field("system_roots", &self.system_roots);
        #[cfg(feature = "native-tls")]
        builder.field("extra_roots", &self.extra_roots.len());
        builder
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("accept_invalid_hostnames", &self.accept_invalid_hostnames)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .finish()
    }
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name expected in the server certificate, the dialed host by default
    pub fn server_name<T: Into<String>>(mut self, server_name: T) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Trust only the certificates added with
    /// [`add_root_certificate`](Self::add_root_certificate)
    pub fn without_system_roots(mut self) -> Self {
        self.system_roots = false;
        self
    }

    /// Trust `cert` in addition to the system roots, for a private CA or a
    /// self-signed server
    #[cfg(feature = "native-tls")]
    #[cfg_attr(docsrs, doc(cfg(feature = "native-tls")))]
    pub fn add_root_certificate(mut self, cert: Certificate) -> Self {
        self.extra_roots.push(cert);
        self
    }

    /// Accept any certificate, the same as `SkipVerify=true` in a DSN
    ///
    /// # Warning
    ///
    /// Expired, self-signed and foreign certificates all pass, so anyone on
    /// the path can read the session.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Accept a valid certificate issued for another name
    ///
    /// # Warning
    ///
    /// Any site holding a valid certificate can impersonate the server.
    pub fn accept_invalid_hostnames(mut self, accept: bool) -> Self {
        self.accept_invalid_hostnames = accept;
        self
    }

    /// Oldest version accepted, TLS 1.2 by default
    pub fn min_tls_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    /// Newest version offered, the newest the backend knows by default
    pub fn max_tls_version(mut self, version: TlsVersion) -> Self {
        self.max_version = Some(version);
        self
    }

    pub fn get_server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn accepts_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }

    pub fn accepts_invalid_hostnames(&self) -> bool {
        self.accept_invalid_hostnames
    }

    /// The copy used to connect to the server of `config`
    ///
    /// Its server name and verification flag override the template, except
    /// on unix sockets where the template is used as is.
    pub(crate) fn for_connection(&self, config: &ConnectionConfig) -> TlsConfig {
        let mut tls_config = self.clone();
        if config.network() == Network::Unix {
            return tls_config;
        }

        if !config.tls_server_name().is_empty() {
            tls_config.server_name = Some(config.tls_server_name().to_owned());
        }
        if config.tls_skip_verify() {
            tls_config.accept_invalid_certs = true;
        }
        tls_config
    }

    /// The name the server certificate is checked against
    pub fn domain<'a>(&'a self, host: &'a str) -> &'a str {
        self.server_name.as_deref().unwrap_or(host)
    }

    /// Builds the native-tls connector for one handshake
    #[cfg(feature = "native-tls")]
    pub(crate) fn connector(&self) -> Result<TlsConnector, Error> {
        fn protocol(version: TlsVersion) -> Option<Protocol> {
            match version {
                TlsVersion::Tlsv10 => Some(Protocol::Tlsv10),
                TlsVersion::Tlsv11 => Some(Protocol::Tlsv11),
                TlsVersion::Tlsv12 => Some(Protocol::Tlsv12),
                TlsVersion::Tlsv13 => None,
            }
        }

        if self.max_version.is_some_and(|max| max < self.min_version) {
            return Err(error::tls("max tls version is lower than min tls version"));
        }
        let min = protocol(self.min_version)
            .ok_or_else(|| error::tls("native-tls can't require TLS 1.3"))?;

        let mut builder = TlsConnector::builder();
        builder
            .disable_built_in_roots(!self.system_roots)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .danger_accept_invalid_hostnames(self.accept_invalid_hostnames)
            .min_protocol_version(Some(min))
            .max_protocol_version(self.max_version.and_then(protocol));
        for cert in &self.extra_roots {
            builder.add_root_certificate(cert.0.clone());
        }

        builder.build().map_err(error::tls)
    }
}
