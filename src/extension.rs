//! What the client says in `EHLO` and what the server answers

use std::{
    fmt::{self, Display, Formatter},
    net::{Ipv4Addr, Ipv6Addr},
};

use crate::{authentication::Mechanism, response::Response};

/// Client identifier, the parameter to `EHLO`
#[derive(PartialEq, Eq, Clone, Debug)]
#[non_exhaustive]
pub enum ClientId {
    /// A fully-qualified domain name
    Domain(String),
    /// An IPv4 address literal
    Ipv4(Ipv4Addr),
    /// An IPv6 address literal
    Ipv6(Ipv6Addr),
}

const LOCALHOST_CLIENT: ClientId = ClientId::Ipv4(Ipv4Addr::LOCALHOST);

impl Default for ClientId {
    /// The host name of this machine, or `[127.0.0.1]` when it has none
    /// (RFC 5321, section 4.1.4)
    fn default() -> Self {
        #[cfg(feature = "hostname")]
        {
            hostname::get()
                .ok()
                .and_then(|name| name.into_string().ok())
                .filter(|name| !name.is_empty())
                .map_or(LOCALHOST_CLIENT, ClientId::Domain)
        }
        #[cfg(not(feature = "hostname"))]
        LOCALHOST_CLIENT
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ClientId::Domain(domain) => f.write_str(domain),
            ClientId::Ipv4(ip) => write!(f, "[{ip}]"),
            ClientId::Ipv6(ip) => write!(f, "[IPv6:{ip}]"),
        }
    }
}

/// The part of a server's `EHLO` reply the client acts on
///
/// Only the extensions used by a transaction are kept: `8BITMIME`,
/// `SMTPUTF8`, `STARTTLS` and the `AUTH` mechanisms the client implements.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct ServerInfo {
    /// First word of the reply
    name: String,
    eight_bit_mime: bool,
    smtp_utf8: bool,
    starttls: bool,
    /// Known mechanisms, in advertised order
    mechanisms: Vec<Mechanism>,
}

impl ServerInfo {
    /// Reads the extensions listed after the first line of an `EHLO` reply
    pub fn from_ehlo(response: &Response) -> ServerInfo {
        let mut info = ServerInfo::from_helo(response);

        for line in response.lines().skip(1) {
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };

            match keyword.to_ascii_uppercase().as_str() {
                "8BITMIME" => info.eight_bit_mime = true,
                "SMTPUTF8" => info.smtp_utf8 = true,
                "STARTTLS" => info.starttls = true,
                "AUTH" => {
                    for mechanism in words.filter_map(Mechanism::from_name) {
                        if !info.mechanisms.contains(&mechanism) {
                            info.mechanisms.push(mechanism);
                        }
                    }
                }
                _ => {}
            }
        }

        info
    }

    /// A `HELO` reply only names the server
    pub fn from_helo(response: &Response) -> ServerInfo {
        let name = response
            .first_line()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or_default();
        ServerInfo {
            name: name.to_owned(),
            ..ServerInfo::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports_8bitmime(&self) -> bool {
        self.eight_bit_mime
    }

    pub fn supports_smtputf8(&self) -> bool {
        self.smtp_utf8
    }

    pub fn supports_starttls(&self) -> bool {
        self.starttls
    }

    /// Whether `AUTH` was advertised with at least one known mechanism
    pub fn supports_auth(&self) -> bool {
        !self.mechanisms.is_empty()
    }

    /// The first of `preferred` the server offers
    pub fn mechanism(&self, preferred: &[Mechanism]) -> Option<Mechanism> {
        preferred
            .iter()
            .copied()
            .find(|mechanism| self.mechanisms.contains(mechanism))
    }
}

impl Display for ServerInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut extensions = Vec::new();
        if self.eight_bit_mime {
            extensions.push("8BITMIME".to_owned());
        }
        if self.smtp_utf8 {
            extensions.push("SMTPUTF8".to_owned());
        }
        if self.starttls {
            extensions.push("STARTTLS".to_owned());
        }
        if !self.mechanisms.is_empty() {
            let mechanisms: Vec<_> = self
                .mechanisms
                .iter()
                .copied()
                .map(Mechanism::as_str)
                .collect();
            extensions.push(format!("AUTH {}", mechanisms.join(" ")));
        }

        if extensions.is_empty() {
            write!(f, "{} (no extensions)", self.name)
        } else {
            write!(f, "{} ({})", self.name, extensions.join(", "))
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn client_id_literals() {
        assert_eq!(ClientId::Domain("mx.local".to_owned()).to_string(), "mx.local");
        assert_eq!(LOCALHOST_CLIENT.to_string(), "[127.0.0.1]");
        assert_eq!(ClientId::Ipv6(Ipv6Addr::LOCALHOST).to_string(), "[IPv6:::1]");
    }

    #[test]
    fn ehlo_extensions() {
        let info = ServerInfo::from_ehlo(&Response::new(
            250,
            &[
                "mx.example.com hello",
                "8BITMIME",
                "SIZE 42",
                "auth login CRAM-MD5 Plain",
                "AUTH=LOGIN",
            ],
        ));

        assert_eq!(info.name(), "mx.example.com");
        assert!(info.supports_8bitmime());
        assert!(!info.supports_smtputf8());
        assert!(!info.supports_starttls());
        assert!(info.supports_auth());
        assert_eq!(
            info.mechanism(&[Mechanism::Plain, Mechanism::Login]),
            Some(Mechanism::Plain)
        );
        assert_eq!(info.to_string(), "mx.example.com (8BITMIME, AUTH LOGIN PLAIN)");
    }

    #[test]
    fn greeting_line_is_not_a_keyword() {
        let info = ServerInfo::from_ehlo(&Response::new(250, &["STARTTLS ready", "SMTPUTF8"]));

        assert_eq!(info.name(), "STARTTLS");
        assert!(!info.supports_starttls());
        assert!(info.supports_smtputf8());
    }

    #[test]
    fn unknown_mechanisms_only() {
        let info = ServerInfo::from_ehlo(&Response::new(250, &["mx", "AUTH CRAM-MD5 XOAUTH2"]));
        assert!(!info.supports_auth());
        assert_eq!(info.mechanism(&[Mechanism::Plain]), None);
    }

    #[test]
    fn helo_has_no_extensions() {
        let info = ServerInfo::from_helo(&Response::new(250, &["relay.local hi"]));
        assert_eq!(info.to_string(), "relay.local (no extensions)");
    }
}
