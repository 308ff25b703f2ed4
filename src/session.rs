//! The client handed to applications

use std::{
    fmt::{self, Debug},
    io::Read,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use crate::{
    client::{
        manager::{self, SessionOptions},
        transaction, Dialer, SmtpConnection, TcpDialer, TlsConfig,
    },
    context::Context,
    dsn::ConnectionConfig,
    envelope::Envelope,
    error::{Error, Kind},
    extension::ClientId,
    response::Response,
};

/// Default socket timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Synchronously send emails using the SMTP protocol
///
/// Each [`send`](SmtpClient::send) and [`check`](SmtpClient::check) runs on
/// its own session, which is closed before the call returns, on success and
/// on failure alike. Calls on one client are serialized, clones share the
/// configuration but not the session and can be used in parallel.
pub struct SmtpClient {
    config: Arc<ConnectionConfig>,
    tls: Arc<TlsConfig>,
    options: Arc<SessionOptions>,
    dialer: Arc<dyn Dialer>,
    slot: HandleSlot,
}

impl SmtpClient {
    /// Creates a client from a DSN
    ///
    /// `tls` is the template every encrypted connection starts from, the
    /// default one when `None`.
    ///
    /// ```rust
    /// use postern::SmtpClient;
    ///
    /// let client = SmtpClient::new("tcp(localhost:2525)/", None)?;
    /// assert_eq!(client.dsn(), "tcp(localhost:2525)/none");
    /// # Ok::<(), postern::Error>(())
    /// ```
    pub fn new(dsn: &str, tls: Option<TlsConfig>) -> Result<SmtpClient, Error> {
        let config = ConnectionConfig::parse(dsn)?;
        Ok(SmtpClient::builder(config)
            .tls(tls.unwrap_or_default())
            .build())
    }

    /// Creates a new client builder
    pub fn builder(config: ConnectionConfig) -> SmtpClientBuilder {
        SmtpClientBuilder::new(config)
    }

    /// Sends `payload` from `from` to every address of `to`
    ///
    /// The addresses are checked before anything is dialed. The payload is
    /// the raw message, headers included, and is dot-stuffed on the way.
    /// `ctx` bounds the dial, the session itself is bounded by the socket
    /// timeout.
    pub fn send<T: AsRef<str>>(
        &self,
        ctx: &Context,
        from: &str,
        to: &[T],
        payload: &mut dyn Read,
    ) -> Result<Response, Error> {
        let envelope = Envelope::new(from, to.iter().map(|address| address.as_ref().to_owned()))?;
        self.send_envelope(ctx, &envelope, payload)
    }

    /// Sends `payload` to the recipients of `envelope`
    pub fn send_envelope(
        &self,
        ctx: &Context,
        envelope: &Envelope,
        payload: &mut dyn Read,
    ) -> Result<Response, Error> {
        envelope.validate()?;

        let mut lease = self.lease(ctx)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "sending mail from <{}> to {} recipient(s)",
            envelope.from(),
            envelope.to().len()
        );
        transaction::execute(&mut lease.conn, envelope, payload)
    }

    /// Opens a session and sends `NOOP`
    pub fn check(&self, ctx: &Context) -> Result<(), Error> {
        let mut lease = self.lease(ctx)?;
        lease.conn.noop().map_err(|err| err.during(Kind::Check))?;
        Ok(())
    }

    /// Opens a session now and keeps it for the next call
    ///
    /// The following [`send`](SmtpClient::send) or
    /// [`check`](SmtpClient::check) uses it instead of dialing, then closes
    /// it as usual. Does nothing if a session is already waiting.
    pub fn connect(&self, ctx: &Context) -> Result<(), Error> {
        let slot = self.slot.lock();
        if slot.is_some() {
            return Ok(());
        }
        self.open(ctx, slot)?.park();
        Ok(())
    }

    /// Closes the waiting session, if any
    ///
    /// Closing an idle client does nothing.
    pub fn close(&self) {
        if let Some(mut conn) = self.slot.lock().take() {
            conn.close();
        }
    }

    /// Whether a session opened by [`connect`](SmtpClient::connect) is
    /// waiting
    pub fn is_connected(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// The canonical DSN of the configuration
    pub fn dsn(&self) -> String {
        self.config.to_dsn()
    }

    /// The configuration the client dials with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Takes the waiting session or opens a new one
    fn lease(&self, ctx: &Context) -> Result<Lease<'_>, Error> {
        let mut slot = self.slot.lock();
        let parked = slot.take();
        match parked {
            Some(conn) => Ok(Lease { conn, slot }),
            None => self.open(ctx, slot),
        }
    }

    fn open<'a>(
        &self,
        ctx: &Context,
        slot: MutexGuard<'a, Option<SmtpConnection>>,
    ) -> Result<Lease<'a>, Error> {
        let conn = manager::obtain(
            ctx,
            &self.config,
            &self.tls,
            &self.options,
            self.dialer.as_ref(),
        )?;
        Ok(Lease { conn, slot })
    }
}

impl Clone for SmtpClient {
    fn clone(&self) -> Self {
        SmtpClient {
            config: Arc::clone(&self.config),
            tls: Arc::clone(&self.tls),
            options: Arc::clone(&self.options),
            dialer: Arc::clone(&self.dialer),
            slot: HandleSlot::default(),
        }
    }
}

impl Debug for SmtpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpClient")
            .field("config", &self.config)
            .field("tls", &self.tls)
            .field("options", &self.options)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Where a session waits between [`SmtpClient::connect`] and its use
///
/// A poisoned lock is taken over as is: the slot only ever holds a whole
/// connection or nothing.
#[derive(Default)]
struct HandleSlot {
    conn: Mutex<Option<SmtpConnection>>,
}

impl HandleSlot {
    fn lock(&self) -> MutexGuard<'_, Option<SmtpConnection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked out session
///
/// Holds the slot lock for as long as it lives. Dropping it closes the
/// session, [`park`](Lease::park) puts it back instead.
struct Lease<'a> {
    // dropped first, so the session is closed while the lock is held
    conn: SmtpConnection,
    slot: MutexGuard<'a, Option<SmtpConnection>>,
}

impl Lease<'_> {
    fn park(self) {
        let Lease { conn, mut slot } = self;
        *slot = Some(conn);
    }
}

/// Contains client configuration.
/// Instances of this struct can be created using functions of [`SmtpClient`].
#[derive(Clone)]
pub struct SmtpClientBuilder {
    config: ConnectionConfig,
    tls: TlsConfig,
    options: SessionOptions,
    dialer: Arc<dyn Dialer>,
}

impl SmtpClientBuilder {
    fn new(config: ConnectionConfig) -> Self {
        SmtpClientBuilder {
            config,
            tls: TlsConfig::default(),
            options: SessionOptions {
                hello_name: ClientId::default(),
                timeout: Some(DEFAULT_TIMEOUT),
            },
            dialer: Arc::new(TcpDialer),
        }
    }

    /// Set the TLS template
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set the name used during EHLO
    pub fn hello_name(mut self, name: ClientId) -> Self {
        self.options.hello_name = name;
        self
    }

    /// Set the timeout duration of the socket reads and writes
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Set the way connections are opened
    pub fn dialer<D: Dialer + 'static>(mut self, dialer: D) -> Self {
        self.dialer = Arc::new(dialer);
        self
    }

    /// Build the client
    pub fn build(self) -> SmtpClient {
        SmtpClient {
            config: Arc::new(self.config),
            tls: Arc::new(self.tls),
            options: Arc::new(self.options),
            dialer: self.dialer,
            slot: HandleSlot::default(),
        }
    }
}

impl Debug for SmtpClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpClientBuilder")
            .field("config", &self.config)
            .field("tls", &self.tls)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
