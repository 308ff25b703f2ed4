use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::Shutdown,
    time::Duration,
};

#[cfg(feature = "tracing")]
use super::escape_crlf;
use super::{ClientCodec, Dialer, NetworkStream, TlsConfig};
use crate::{
    authentication::{self, Mechanism},
    commands::Command,
    error::{self, Error, Kind},
    extension::{ClientId, ServerInfo},
    response::{parse_response, Response},
};

/// Size of the chunks read from the message payload
const CHUNK_SIZE: usize = 8 * 1024;

/// Challenges answered before giving up on a server that keeps asking
const MAX_CHALLENGES: usize = 10;

/// One SMTP session over an open transport
#[derive(Debug)]
pub(crate) struct SmtpConnection {
    /// Stream between client and server
    stream: BufReader<NetworkStream>,
    /// Address the connection was dialed to
    server_name: String,
    /// Whether QUIT has been sent
    sent_quit: bool,
    /// Whether the stream can't be used for commands anymore
    broken: bool,
    /// Whether the session was closed
    closed: bool,
    /// Information about the server
    server_info: ServerInfo,
}

impl SmtpConnection {
    /// Wraps a freshly dialed stream
    ///
    /// Nothing is exchanged yet, see [`SmtpConnection::greet`].
    pub(crate) fn new(
        stream: NetworkStream,
        server_name: String,
        timeout: Option<Duration>,
    ) -> Result<SmtpConnection, Error> {
        let mut conn = SmtpConnection {
            stream: BufReader::new(stream),
            server_name,
            sent_quit: false,
            broken: false,
            closed: false,
            server_info: ServerInfo::default(),
        };
        conn.set_timeout(timeout).map_err(error::network)?;
        Ok(conn)
    }

    /// Get information about the server
    pub(crate) fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// The address this connection was dialed to
    pub(crate) fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Reads the banner and introduces the client
    ///
    /// Servers refusing `EHLO` are greeted with `HELO`.
    pub(crate) fn greet(&mut self, hello_name: &ClientId) -> Result<(), Error> {
        let banner = self.read_response()?;
        if !banner.has_code(220) {
            return Err(error::code(banner.code(), Some(banner.text())));
        }

        match self.ehlo(hello_name) {
            Ok(()) => {}
            Err(err) if err.status().is_some() && !self.broken => {
                #[cfg(feature = "tracing")]
                tracing::debug!("EHLO refused ({}), falling back to HELO", err);
                self.helo(hello_name)?;
            }
            Err(err) => return Err(err),
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("server {}", self.server_info);
        Ok(())
    }

    /// Upgrades the session with `STARTTLS`
    ///
    /// The server must advertise the extension.
    pub(crate) fn starttls(
        &mut self,
        dialer: &dyn Dialer,
        tls_config: &TlsConfig,
        domain: &str,
        hello_name: &ClientId,
    ) -> Result<(), Error> {
        if !self.server_info.supports_starttls() {
            return Err(error::tls("STARTTLS is not supported on this server"));
        }

        self.command(Command::StartTls)?;
        if let Err(err) = dialer.upgrade(self.stream.get_mut(), tls_config, domain) {
            self.broken = true;
            return Err(error::tls(err));
        }
        #[cfg(feature = "tracing")]
        tracing::debug!("connection encrypted");

        // Send EHLO again
        self.ehlo(hello_name)
    }

    /// Send EHLO and update server info
    fn ehlo(&mut self, hello_name: &ClientId) -> Result<(), Error> {
        let response = self.command(Command::Ehlo(hello_name))?;
        self.server_info = ServerInfo::from_ehlo(&response);
        Ok(())
    }

    fn helo(&mut self, hello_name: &ClientId) -> Result<(), Error> {
        let response = self.command(Command::Helo(hello_name))?;
        self.server_info = ServerInfo::from_helo(&response);
        Ok(())
    }

    /// Authenticates with the first mechanism of `preferred` the server
    /// offers, answering its challenges
    pub(crate) fn auth(
        &mut self,
        preferred: &[Mechanism],
        user: &str,
        pass: &str,
    ) -> Result<Response, Error> {
        let mechanism = self
            .server_info
            .mechanism(preferred)
            .ok_or_else(|| error::auth("no compatible authentication mechanism was found"))?;

        let initial = mechanism.initial_response(user, pass);
        let mut response = self.command(Command::Auth {
            mechanism,
            initial: initial.as_deref(),
        })?;

        let mut challenges = 0;
        while response.has_code(334) {
            if challenges == MAX_CHALLENGES {
                return Err(error::auth("unexpected number of challenges"));
            }
            challenges += 1;

            let challenge = authentication::challenge(&response)?;
            let answer = mechanism.answer(&challenge, user, pass)?;
            response = self.command(Command::AuthAnswer(&answer))?;
        }

        Ok(response)
    }

    /// Checks the server is still there
    pub(crate) fn noop(&mut self) -> Result<Response, Error> {
        self.command(Command::Noop)
    }

    /// Aborts the current mail transaction, keeping the session open
    pub(crate) fn rset(&mut self) -> Result<Response, Error> {
        self.command(Command::Rset)
    }

    pub(crate) fn quit(&mut self) -> Result<Response, Error> {
        self.sent_quit = true;
        self.command(Command::Quit)
    }

    /// Ends the session
    ///
    /// Sends `QUIT` unless the stream is broken, then shuts the socket down.
    /// Failures are only logged. Closing twice does nothing.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if !self.sent_quit && !self.broken {
            if let Err(_err) = self.quit() {
                #[cfg(feature = "tracing")]
                tracing::warn!("QUIT failed on {}: {}", self.server_name, _err);
            }
        }

        if let Err(_err) = self.stream.get_ref().shutdown(Shutdown::Both) {
            #[cfg(feature = "tracing")]
            tracing::warn!("shutdown failed on {}: {}", self.server_name, _err);
        }
        self.broken = true;

        #[cfg(feature = "tracing")]
        tracing::debug!("connection to {} closed", self.server_name);
    }

    /// Tells if the underlying stream is currently encrypted
    pub(crate) fn is_encrypted(&self) -> bool {
        self.stream.get_ref().is_encrypted()
    }

    /// Set timeout
    pub(crate) fn set_timeout(&mut self, duration: Option<Duration>) -> io::Result<()> {
        self.stream.get_mut().set_read_timeout(duration)?;
        self.stream.get_mut().set_write_timeout(duration)
    }

    /// Streams the message content and reads the end-of-data reply
    ///
    /// A failing payload is an [`io`](Error::is_io) error, a failing socket a
    /// [`write`](Error::is_write) one. Both leave the connection broken, as
    /// the server is still waiting for the end of the data.
    pub(crate) fn message(&mut self, payload: &mut dyn Read) -> Result<Response, Error> {
        let mut codec = ClientCodec::new();
        let mut chunk = vec![0; CHUNK_SIZE];
        let mut out_buf = Vec::with_capacity(CHUNK_SIZE + CHUNK_SIZE / 8);
        #[cfg(feature = "tracing")]
        let mut written = 0;

        loop {
            let read = match payload.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.broken = true;
                    return Err(error::io(err));
                }
            };

            out_buf.clear();
            codec.encode(&chunk[..read], &mut out_buf);
            self.write_all(&out_buf).map_err(error::write)?;
            #[cfg(feature = "tracing")]
            {
                written += out_buf.len();
            }
        }
        self.write_all(codec.terminator()).map_err(error::write)?;

        #[cfg(feature = "tracing")]
        tracing::debug!("Wrote: {} bytes of message", written);

        self.read_response()
    }

    /// Sends an SMTP command
    pub(crate) fn command(&mut self, command: Command<'_>) -> Result<Response, Error> {
        let line = command.to_string();
        self.write_all(line.as_bytes()).map_err(error::network)?;

        #[cfg(feature = "tracing")]
        {
            if command.is_secret() {
                tracing::debug!("Wrote: <credentials redacted>");
            } else {
                tracing::debug!("Wrote: {}", escape_crlf(&line));
            }
        }
        self.read_response()
    }

    /// Writes bytes to the server
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let written = self
            .stream
            .get_mut()
            .write_all(bytes)
            .and_then(|()| self.stream.get_mut().flush());
        if written.is_err() {
            self.broken = true;
        }
        written
    }

    /// Gets the SMTP response
    ///
    /// Negative replies are returned as errors carrying their code.
    pub(crate) fn read_response(&mut self) -> Result<Response, Error> {
        let mut buffer = String::with_capacity(100);

        loop {
            let read = match self.stream.read_line(&mut buffer) {
                Ok(read) => read,
                Err(err) => {
                    self.broken = true;
                    return Err(error::network(err));
                }
            };
            if read == 0 {
                break;
            }

            #[cfg(feature = "tracing")]
            tracing::debug!("<< {}", escape_crlf(&buffer));
            match parse_response(&buffer) {
                Ok((_remaining, response)) => {
                    return if response.is_positive() {
                        Ok(response)
                    } else {
                        Err(error::code(
                            response.code(),
                            Some(response.text()),
                        ))
                    };
                }
                Err(nom::Err::Incomplete(_)) => { /* read more */ }
                Err(nom::Err::Failure(e) | nom::Err::Error(e)) => {
                    self.broken = true;
                    return Err(error::response(e.to_string()));
                }
            }
        }

        self.broken = true;
        Err(error::response("incomplete response"))
    }

    /// Classifies the error of a failed step and aborts the transaction
    ///
    /// `RSET` is only attempted while the session is still usable.
    pub(crate) fn reject(&mut self, err: Error, step: Kind) -> Error {
        if !self.broken {
            if let Err(_reset_err) = self.rset() {
                #[cfg(feature = "tracing")]
                tracing::debug!("RSET failed: {}", _reset_err);
            }
        }
        err.during(step)
    }
}

impl Drop for SmtpConnection {
    fn drop(&mut self) {
        self.close();
    }
}
