//! Error and result type for SMTP clients

use std::{error::Error as StdError, fmt};

use crate::{
    dsn::DsnError,
    response::Code,
    BoxError,
};

// Inspired by https://github.com/seanmonstar/reqwest/blob/a8566383168c0ef06c21f38cbc9213af6ff6db31/src/error.rs

/// The Errors that may occur when talking to an SMTP server
///
/// Each error has exactly one kind, checked with the `is_*` methods. Errors
/// raised while a given step of the session was running carry the
/// underlying protocol or network error as their [`source`](StdError::source).
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    code: Option<Code>,
    source: Option<BoxError>,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                code: None,
                source: source.map(Into::into),
            }),
        }
    }

    /// Classifies a protocol or network error as the failure of a session step
    ///
    /// The reply code, if any, is kept. Errors already bound to a step are
    /// returned unchanged.
    pub(crate) fn during(self, kind: Kind) -> Error {
        if !matches!(
            self.inner.kind,
            Kind::Reply | Kind::Response | Kind::Network
        ) {
            return self;
        }

        let code = self.inner.code;
        Error {
            inner: Box::new(Inner {
                kind,
                code,
                source: Some(Box::new(self)),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn kind(&self) -> Kind {
        self.inner.kind
    }

    /// Returns true if the connection string or configuration is invalid
    pub fn is_config(&self) -> bool {
        matches!(self.inner.kind, Kind::Config)
    }

    /// Returns true if the transport connection could not be established
    pub fn is_dial(&self) -> bool {
        matches!(self.inner.kind, Kind::Dial)
    }

    /// Returns true if the server refused to open the session
    pub fn is_greeting(&self) -> bool {
        matches!(self.inner.kind, Kind::Greeting)
    }

    /// Returns true if the TLS handshake or the `STARTTLS` upgrade failed
    pub fn is_tls(&self) -> bool {
        matches!(self.inner.kind, Kind::Tls)
    }

    /// Returns true if authentication failed
    pub fn is_auth(&self) -> bool {
        matches!(self.inner.kind, Kind::Auth)
    }

    /// Returns true if an address contained a line break
    pub fn is_line_injection(&self) -> bool {
        matches!(self.inner.kind, Kind::LineInjection)
    }

    /// Returns true if the envelope can't be sent as is
    pub fn is_invalid_envelope(&self) -> bool {
        matches!(self.inner.kind, Kind::InvalidEnvelope)
    }

    /// Returns true if `MAIL FROM` failed
    pub fn is_mail_rejected(&self) -> bool {
        matches!(self.inner.kind, Kind::MailRejected)
    }

    /// Returns true if one of the `RCPT TO` failed
    pub fn is_recipient_rejected(&self) -> bool {
        matches!(self.inner.kind, Kind::RecipientRejected)
    }

    /// Returns true if `DATA` or the end of the message was rejected
    pub fn is_data_rejected(&self) -> bool {
        matches!(self.inner.kind, Kind::DataRejected)
    }

    /// Returns true if writing the message to the server failed
    pub fn is_write(&self) -> bool {
        matches!(self.inner.kind, Kind::Write)
    }

    /// Returns true if reading the message payload failed
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// Returns true if the server did not answer `NOOP` positively
    pub fn is_check(&self) -> bool {
        matches!(self.inner.kind, Kind::Check)
    }

    /// Returns true if the error is a transient SMTP error
    pub fn is_transient(&self) -> bool {
        self.inner.code.is_some_and(Code::is_transient)
    }

    /// Returns true if the error is a permanent SMTP error
    pub fn is_permanent(&self) -> bool {
        self.inner.code.is_some_and(Code::is_permanent)
    }

    /// Returns true if the error is caused by a timeout
    pub fn is_timeout(&self) -> bool {
        let mut source = self.source();

        while let Some(err) = source {
            if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
                return io_err.kind() == std::io::ErrorKind::TimedOut;
            }

            source = err.source();
        }

        false
    }

    /// Returns the status code, if the error was generated from a response.
    pub fn status(&self) -> Option<Code> {
        self.inner.code
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Kind {
    /// Malformed connection string
    Config,
    /// Transport connection failure
    Dial,
    /// Banner or `EHLO`/`HELO` refused
    Greeting,
    /// TLS error
    Tls,
    /// Authentication error
    Auth,
    /// CR or LF in an address
    LineInjection,
    /// Envelope not sendable
    InvalidEnvelope,
    /// `MAIL FROM` step failed
    MailRejected,
    /// `RCPT TO` step failed
    RecipientRejected,
    /// `DATA` step failed
    DataRejected,
    /// Writing the message failed
    Write,
    /// Reading the payload failed
    Io,
    /// `NOOP` failed
    Check,
    /// Negative SMTP reply
    ///
    /// [RFC 5321, section 4.2.1](https://tools.ietf.org/html/rfc5321#section-4.2.1)
    Reply,
    /// Error parsing a response
    Response,
    /// Underlying network i/o error
    Network,
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("postern::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref code) = self.inner.code {
            builder.field("code", code);
        }

        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.kind {
            Kind::Config => f.write_str("invalid configuration")?,
            Kind::Dial => f.write_str("dial failed")?,
            Kind::Greeting => f.write_str("session refused")?,
            Kind::Tls => f.write_str("tls negotiation failed")?,
            Kind::Auth => f.write_str("authentication failed")?,
            Kind::LineInjection => f.write_str("line break in address")?,
            Kind::InvalidEnvelope => f.write_str("invalid envelope")?,
            Kind::MailRejected => f.write_str("sender rejected")?,
            Kind::RecipientRejected => f.write_str("recipient rejected")?,
            Kind::DataRejected => f.write_str("message rejected")?,
            Kind::Write => f.write_str("writing message failed")?,
            Kind::Io => f.write_str("reading message failed")?,
            Kind::Check => f.write_str("connection check failed")?,
            Kind::Network => f.write_str("network error")?,
            Kind::Response => f.write_str("response error")?,
            Kind::Reply => match self.inner.code {
                Some(code) if code.is_transient() => {
                    write!(f, "transient error ({code})")?;
                }
                Some(ref code) => write!(f, "permanent error ({code})")?,
                None => f.write_str("negative reply")?,
            },
        };

        if let Some(ref e) = self.inner.source {
            write!(f, ": {e}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| {
            let r: &(dyn std::error::Error + 'static) = &**e;
            r
        })
    }
}

impl From<DsnError> for Error {
    fn from(err: DsnError) -> Self {
        config(err)
    }
}

pub(crate) fn code(c: Code, s: Option<String>) -> Error {
    let mut err = Error::new(Kind::Reply, s);
    err.inner.code = Some(c);
    err
}

pub(crate) fn response<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Response, Some(e))
}

pub(crate) fn network<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Network, Some(e))
}

pub(crate) fn config<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Config, Some(e))
}

pub(crate) fn dial<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Dial, Some(e))
}

pub(crate) fn tls<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Tls, Some(e))
}

pub(crate) fn auth<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Auth, Some(e))
}

pub(crate) fn line_injection<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::LineInjection, Some(e))
}

pub(crate) fn invalid_envelope<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::InvalidEnvelope, Some(e))
}

pub(crate) fn write<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Write, Some(e))
}

pub(crate) fn io<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Io, Some(e))
}

#[cfg(test)]
mod test {
    use std::io;

    use super::*;

    fn mailbox_unavailable() -> Error {
        code(Code::new(550), Some("mailbox unavailable".to_owned()))
    }

    #[test]
    fn during_keeps_code_and_source() {
        let err = mailbox_unavailable().during(Kind::RecipientRejected);

        assert!(err.is_recipient_rejected());
        assert!(err.is_permanent());
        assert!(!err.is_transient());
        assert_eq!(err.status().map(u16::from), Some(550));
        assert_eq!(
            err.to_string(),
            "recipient rejected: permanent error (550): mailbox unavailable"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn during_same_kind_is_identity() {
        let err = tls("handshake").during(Kind::Tls);
        assert!(err.is_tls());
        assert_eq!(err.to_string(), "tls negotiation failed: handshake");
    }

    #[test]
    fn during_keeps_step_kind() {
        let err = write("broken pipe").during(Kind::DataRejected);
        assert!(err.is_write());
        assert!(err.source().is_some());
    }

    #[test]
    fn timeout_is_found_in_chain() {
        let err = network(io::Error::new(io::ErrorKind::TimedOut, "slow")).during(Kind::Dial);
        assert!(err.is_dial());
        assert!(err.is_timeout());
        assert!(!dial("refused").is_timeout());
    }

    #[test]
    fn dsn_error_is_config() {
        let err = Error::from(DsnError::InvalidNetwork);
        assert!(err.is_config());
        assert_eq!(err.status(), None);
    }
}
