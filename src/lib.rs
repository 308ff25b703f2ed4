//! Synchronous SMTP client driven by a compact connection string.
//!
//! The client follows [RFC 5321](https://tools.ietf.org/html/rfc5321) for the
//! mail transaction and supports:
//!
//! * STARTTLS ([RFC 3207](https://tools.ietf.org/html/rfc3207)) and implicit TLS
//!   ([RFC 8314](https://tools.ietf.org/html/rfc8314))
//! * AUTH PLAIN and LOGIN ([RFC 4954](https://tools.ietf.org/html/rfc4954))
//! * 8BITMIME ([RFC 6152](https://tools.ietf.org/html/rfc6152))
//! * SMTPUTF8 ([RFC 6531](https://tools.ietf.org/html/rfc6531))
//!
//! A connection is described by a DSN:
//!
//! ```text
//! [user[:pass]@][network[(host[:port])]]/tlsmode[?ServerName=value&SkipVerify=bool]
//! ```
//!
//! where `network` is one of `tcp`, `tcp4`, `tcp6` or `unix` and `tlsmode` is
//! `tls`, `starttls` or anything else for a plaintext session.
//!
//! ```rust,no_run
//! use postern::{Context, SmtpClient};
//!
//! let client = SmtpClient::new(
//!     "alice:secret@tcp(mail.example.com:587)/starttls",
//!     None,
//! )?;
//!
//! let message = b"Subject: hello\r\n\r\nBe happy!\r\n";
//! client.send(
//!     &Context::background(),
//!     "alice@example.com",
//!     &["bob@example.org"],
//!     &mut &message[..],
//! )?;
//! # Ok::<(), postern::Error>(())
//! ```
//!
//! Every call to [`SmtpClient::send`] or [`SmtpClient::check`] opens its own
//! session and closes it before returning, whatever the outcome.

#![doc(html_root_url = "https://docs.rs/postern/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]
#![deny(
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    rust_2018_idioms,
    clippy::string_add,
    clippy::string_add_assign,
    clippy::clone_on_ref_ptr,
    clippy::verbose_file_reads,
    clippy::unnecessary_self_imports,
    clippy::string_to_string,
    clippy::mem_forget,
    clippy::cast_lossless,
    clippy::inefficient_to_string,
    clippy::inline_always,
    clippy::linkedlist,
    clippy::macro_use_imports,
    clippy::manual_assert,
    clippy::unnecessary_join,
    clippy::wildcard_imports,
    clippy::str_to_string,
    clippy::empty_structs_with_brackets,
    clippy::zero_sized_map_values,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::unnecessary_wraps,
    clippy::doc_markdown,
    clippy::explicit_iter_loop,
    clippy::redundant_closure_for_method_calls,
    // Rust 1.86: clippy::unnecessary_semicolon,
)]

pub mod authentication;
pub mod client;
mod commands;
mod context;
pub mod dsn;
pub mod envelope;
pub mod error;
pub mod extension;
pub mod response;
mod session;

pub use crate::{
    client::{Dialer, NetworkStream, TcpDialer, TlsConfig},
    context::{CancelHandle, Context},
    dsn::{ConnectionConfig, ConnectionConfigBuilder, DsnError, Network, TlsMode},
    envelope::Envelope,
    error::Error,
    session::{SmtpClient, SmtpClientBuilder},
};

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Default smtp port
pub const SMTP_PORT: u16 = 25;
/// Default submission port
pub const SUBMISSION_PORT: u16 = 587;
/// Default submission over TLS port
///
/// Defined in [RFC8314](https://tools.ietf.org/html/rfc8314)
pub const SUBMISSIONS_PORT: u16 = 465;
