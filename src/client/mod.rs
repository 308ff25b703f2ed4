//! SMTP client
//!
//! The client is split like a session: [`net`] opens the transport,
//! `connection` speaks the protocol over it, `manager` turns a
//! [`ConnectionConfig`](crate::ConnectionConfig) into a ready connection
//! and `transaction` runs one mail transaction on it.

pub(crate) use self::connection::SmtpConnection;
pub use self::{
    net::{Dialer, NetworkStream, Stream, TcpDialer},
    tls::{TlsConfig, TlsVersion},
};
#[cfg(feature = "native-tls")]
pub use self::tls::Certificate;

mod connection;
pub(crate) mod manager;
#[cfg(test)]
pub(crate) mod mock;
pub mod net;
mod tls;
pub(crate) mod transaction;

/// The codec used for transparency
///
/// Doubles every `.` starting a line of the message, as defined in
/// [RFC 5321, section 4.5.2](https://tools.ietf.org/html/rfc5321#section-4.5.2).
/// The codec keeps its state between frames, so the message can be encoded
/// in chunks.
#[derive(Clone, Copy, Debug)]
pub struct ClientCodec {
    escape_count: u8,
}

impl Default for ClientCodec {
    fn default() -> Self {
        // the message starts right after the CRLF of the DATA reply
        ClientCodec { escape_count: 2 }
    }
}

impl ClientCodec {
    /// Creates a new client codec
    pub fn new() -> Self {
        ClientCodec::default()
    }

    /// Adds transparency
    pub fn encode(&mut self, frame: &[u8], buf: &mut Vec<u8>) {
        let mut start = 0;
        for (idx, byte) in frame.iter().enumerate() {
            self.escape_count = match (self.escape_count, *byte) {
                (2, b'.') => 3,
                (_, b'\r') => 1,
                (1, b'\n') => 2,
                _ => 0,
            };
            if self.escape_count == 3 {
                self.escape_count = 0;
                buf.extend_from_slice(&frame[start..idx]);
                buf.push(b'.');
                start = idx;
            }
        }
        buf.extend_from_slice(&frame[start..]);
    }

    /// The end-of-data sequence to send after the last frame
    ///
    /// The final CRLF of the message is reused when there is one.
    pub fn terminator(&self) -> &'static [u8] {
        if self.escape_count == 2 {
            b".\r\n"
        } else {
            b"\r\n.\r\n"
        }
    }
}

/// Returns the string replacing all the CRLF with "\<CRLF\>"
///
/// Used for debug displays
#[cfg(feature = "tracing")]
pub(crate) fn escape_crlf(string: &str) -> String {
    string.replace("\r\n", "<CRLF>")
}
