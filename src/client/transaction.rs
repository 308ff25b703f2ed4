//! One mail transaction on a ready session

use std::io::Read;

use super::SmtpConnection;
use crate::{
    commands::Command,
    envelope::Envelope,
    error::{self, Error, Kind},
    response::Response,
};

/// Runs `MAIL`, one `RCPT` per recipient and `DATA`, then streams `payload`
///
/// The first step refused by the server ends the transaction with `RSET`
/// and an error naming that step, nothing after it is sent. The session
/// itself is left open for the caller to close.
pub(crate) fn execute(
    conn: &mut SmtpConnection,
    envelope: &Envelope,
    payload: &mut dyn Read,
) -> Result<Response, Error> {
    envelope.validate()?;

    // 8BITMIME (RFC 6152) is announced whenever the server offers it,
    // SMTPUTF8 (RFC 6531) only for addresses that need it
    let server_info = conn.server_info();
    let eight_bit_mime = server_info.supports_8bitmime();
    let smtp_utf8 = envelope.has_non_ascii_addresses();
    if smtp_utf8 && !server_info.supports_smtputf8() {
        return Err(error::invalid_envelope(
            "envelope contains non-ascii addresses but the server does not support SMTPUTF8",
        ));
    }

    conn.command(Command::Mail {
        from: envelope.from(),
        eight_bit_mime,
        smtp_utf8,
    })
    .map_err(|err| conn.reject(err, Kind::MailRejected))?;

    for to in envelope.to() {
        conn.command(Command::Rcpt(to))
            .map_err(|err| conn.reject(err, Kind::RecipientRejected))?;
    }

    let response = conn
        .command(Command::Data)
        .map_err(|err| conn.reject(err, Kind::DataRejected))?;
    if !response.has_code(354) {
        let err = error::code(response.code(), Some(response.text()));
        return Err(conn.reject(err, Kind::DataRejected));
    }

    conn.message(payload)
        .map_err(|err| conn.reject(err, Kind::DataRejected))
}

#[cfg(test)]
mod test {
    use std::io::{self, Cursor};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{client::mock::MockStream, extension::ClientId};

    const GREETING: &str = "220 mx ready\r\n";

    fn session(ehlo: &str, replies: &str) -> (SmtpConnection, MockStream) {
        let mock = MockStream::with_replies(&format!("{GREETING}{ehlo}{replies}"));
        let mut conn =
            SmtpConnection::new(mock.network_stream(), "mx:25".to_owned(), None).unwrap();
        conn.greet(&ClientId::Domain("client".to_owned())).unwrap();
        (conn, mock)
    }

    fn envelope(to: &[&str]) -> Envelope {
        Envelope::new("a@example.com", to.iter().copied()).unwrap()
    }

    /// What was written after the EHLO
    fn transaction(mock: &MockStream) -> String {
        mock.written()
            .trim_start_matches("EHLO client\r\n")
            .to_owned()
    }

    #[test]
    fn commands_in_order() {
        let (mut conn, mock) = session(
            "250 mx\r\n",
            "250 ok\r\n250 ok\r\n250 ok\r\n354 go\r\n250 queued\r\n",
        );
        let response = execute(
            &mut conn,
            &envelope(&["r1@example.org", "r2@example.org"]),
            &mut Cursor::new(b"Subject: hi\r\n\r\n.\r\n".to_vec()),
        )
        .unwrap();

        assert!(response.has_code(250));
        assert_eq!(
            transaction(&mock),
            "MAIL FROM:<a@example.com>\r\n\
             RCPT TO:<r1@example.org>\r\n\
             RCPT TO:<r2@example.org>\r\n\
             DATA\r\n\
             Subject: hi\r\n\r\n..\r\n.\r\n"
        );
    }

    #[test]
    fn eight_bit_mime_when_advertised() {
        let (mut conn, mock) = session(
            "250-mx\r\n250 8BITMIME\r\n",
            "250 ok\r\n250 ok\r\n354 go\r\n250 queued\r\n",
        );
        execute(&mut conn, &envelope(&["r1@example.org"]), &mut io::empty()).unwrap();

        assert!(transaction(&mock).starts_with("MAIL FROM:<a@example.com> BODY=8BITMIME\r\n"));
    }

    #[test]
    fn first_rejected_recipient_stops_transaction() {
        let (mut conn, mock) = session(
            "250 mx\r\n",
            "250 ok\r\n550 no such user\r\n250 reset\r\n",
        );
        let err = execute(
            &mut conn,
            &envelope(&["r1@example.org", "r2@example.org"]),
            &mut io::empty(),
        )
        .unwrap_err();

        assert!(err.is_recipient_rejected());
        assert_eq!(err.status().map(u16::from), Some(550));
        assert_eq!(
            transaction(&mock),
            "MAIL FROM:<a@example.com>\r\nRCPT TO:<r1@example.org>\r\nRSET\r\n"
        );
    }

    #[test]
    fn rejected_sender() {
        let (mut conn, _mock) = session("250 mx\r\n", "451 try later\r\n250 reset\r\n");
        let err = execute(&mut conn, &envelope(&["r@example.org"]), &mut io::empty())
            .unwrap_err();

        assert!(err.is_mail_rejected());
        assert!(err.is_transient());
    }

    #[test]
    fn rejected_message() {
        let (mut conn, _mock) = session(
            "250 mx\r\n",
            "250 ok\r\n250 ok\r\n354 go\r\n554 spam\r\n250 reset\r\n",
        );
        let err = execute(
            &mut conn,
            &envelope(&["r@example.org"]),
            &mut Cursor::new(b"buy now".to_vec()),
        )
        .unwrap_err();

        assert!(err.is_data_rejected());
        assert!(err.is_permanent());
    }

    #[test]
    fn data_must_be_accepted_with_354() {
        let (mut conn, mock) = session(
            "250 mx\r\n",
            "250 ok\r\n250 ok\r\n250 what\r\n250 reset\r\n",
        );
        let err = execute(
            &mut conn,
            &envelope(&["r@example.org"]),
            &mut Cursor::new(b"body".to_vec()),
        )
        .unwrap_err();

        assert!(err.is_data_rejected());
        assert!(!mock.written().contains("body"));
    }

    #[test]
    fn non_ascii_requires_smtputf8() {
        let (mut conn, mock) = session("250 mx\r\n", "");
        let utf8 = Envelope::new("a@example.com", ["jörg@exämple.de"]).unwrap();
        let err = execute(&mut conn, &utf8, &mut io::empty()).unwrap_err();

        assert!(err.is_invalid_envelope());
        assert_eq!(transaction(&mock), "");
    }

    #[test]
    fn non_ascii_with_smtputf8() {
        let (mut conn, mock) = session(
            "250-mx\r\n250 SMTPUTF8\r\n",
            "250 ok\r\n250 ok\r\n354 go\r\n250 queued\r\n",
        );
        let utf8 = Envelope::new("a@example.com", ["jörg@exämple.de"]).unwrap();
        execute(&mut conn, &utf8, &mut io::empty()).unwrap();

        assert!(transaction(&mock).starts_with("MAIL FROM:<a@example.com> SMTPUTF8\r\n"));
    }
}
