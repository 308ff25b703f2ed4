//! Opens ready-to-use sessions

use std::{net::IpAddr, time::Duration};

use super::{Dialer, SmtpConnection, TlsConfig};
use crate::{
    authentication::PREFERRED_MECHANISMS,
    context::Context,
    dsn::{ConnectionConfig, Network, TlsMode},
    error::{self, Error, Kind},
    extension::ClientId,
};

/// Settings of the client shared by all its sessions
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionOptions {
    /// Name used in `EHLO`
    pub(crate) hello_name: ClientId,
    /// Read and write timeout of the socket
    pub(crate) timeout: Option<Duration>,
}

/// Dials the server described by `config` and brings the session to the
/// point where a transaction can start
///
/// The TLS template is never modified, the connection uses the copy made by
/// [`TlsConfig::for_connection`]. A failure after the dial closes the
/// partial session before returning.
pub(crate) fn obtain(
    ctx: &Context,
    config: &ConnectionConfig,
    tls_template: &TlsConfig,
    options: &SessionOptions,
    dialer: &dyn Dialer,
) -> Result<SmtpConnection, Error> {
    let address = config.address();
    let tls_config = tls_template.for_connection(config);
    let implicit_tls = config.tls_mode() == TlsMode::Tls;

    ctx.check()?;
    // the socket timeout bounds the dial too, whatever the context
    let dial_ctx = match options.timeout {
        Some(timeout) => ctx.with_timeout(timeout),
        None => ctx.clone(),
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(
        "dialing {} over {} (tls: {})",
        address,
        config.network(),
        config.tls_mode()
    );
    let stream = dialer
        .dial(
            &dial_ctx,
            config.network(),
            &address,
            implicit_tls.then_some(&tls_config),
        )
        .map_err(|err| {
            if implicit_tls {
                error::tls(err)
            } else {
                error::dial(err)
            }
        })?;

    let mut conn = SmtpConnection::new(stream, address, options.timeout)
        .map_err(|err| err.during(Kind::Dial))?;

    conn.greet(&options.hello_name)
        .map_err(|err| err.during(Kind::Greeting))?;

    if config.tls_mode() == TlsMode::StartTls {
        let domain = tls_config.domain(config.host());
        conn.starttls(dialer, &tls_config, domain, &options.hello_name)
            .map_err(|err| err.during(Kind::Tls))?;
    }

    if config.has_credentials() {
        authenticate(&mut conn, config)?;
    }

    Ok(conn)
}

fn authenticate(conn: &mut SmtpConnection, config: &ConnectionConfig) -> Result<(), Error> {
    // credentials only travel in clear to the local machine
    if !conn.is_encrypted() && !is_local(config) {
        return Err(error::auth(format!(
            "refusing to authenticate to {} over an unencrypted connection",
            conn.server_name()
        )));
    }
    if !conn.server_info().supports_auth() {
        return Err(error::auth("AUTH is not supported on this server"));
    }

    conn.auth(PREFERRED_MECHANISMS, config.user(), config.pass())
        .map_err(|err| err.during(Kind::Auth))?;

    #[cfg(feature = "tracing")]
    tracing::debug!("authenticated as {}", config.user());
    Ok(())
}

fn is_local(config: &ConnectionConfig) -> bool {
    let host = config.host();
    config.network() == Network::Unix
        || host.eq_ignore_ascii_case("localhost")
        || host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}
