//! Command lines sent to the server

use std::fmt::{self, Display, Formatter};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{authentication::Mechanism, extension::ClientId};

/// One command, displayed as the line to write including its CRLF
///
/// Addresses are written as given, they must have been checked for line
/// breaks beforehand.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub(crate) enum Command<'a> {
    Ehlo(&'a ClientId),
    Helo(&'a ClientId),
    StartTls,
    /// `AUTH` with the unencoded initial response, if the mechanism has one
    Auth {
        mechanism: Mechanism,
        initial: Option<&'a str>,
    },
    /// Unencoded answer to a challenge
    AuthAnswer(&'a str),
    /// An empty sender is the null reverse-path `<>`
    Mail {
        from: &'a str,
        eight_bit_mime: bool,
        smtp_utf8: bool,
    },
    Rcpt(&'a str),
    Data,
    Rset,
    Noop,
    Quit,
}

impl Command<'_> {
    /// Whether the line carries credentials and must stay out of the logs
    pub(crate) fn is_secret(&self) -> bool {
        matches!(self, Command::Auth { .. } | Command::AuthAnswer(_))
    }
}

impl Display for Command<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            Command::Ehlo(client_id) => write!(f, "EHLO {client_id}")?,
            Command::Helo(client_id) => write!(f, "HELO {client_id}")?,
            Command::StartTls => f.write_str("STARTTLS")?,
            Command::Auth {
                mechanism,
                initial: Some(initial),
            } => write!(f, "AUTH {mechanism} {}", STANDARD.encode(initial))?,
            Command::Auth {
                mechanism,
                initial: None,
            } => write!(f, "AUTH {mechanism}")?,
            Command::AuthAnswer(answer) => f.write_str(&STANDARD.encode(answer))?,
            Command::Mail {
                from,
                eight_bit_mime,
                smtp_utf8,
            } => {
                write!(f, "MAIL FROM:<{from}>")?;
                if eight_bit_mime {
                    f.write_str(" BODY=8BITMIME")?;
                }
                if smtp_utf8 {
                    f.write_str(" SMTPUTF8")?;
                }
            }
            Command::Rcpt(to) => write!(f, "RCPT TO:<{to}>")?,
            Command::Data => f.write_str("DATA")?,
            Command::Rset => f.write_str("RSET")?,
            Command::Noop => f.write_str("NOOP")?,
            Command::Quit => f.write_str("QUIT")?,
        }
        f.write_str("\r\n")
    }
}
