//! SASL mechanisms used by `AUTH`
//!
//! The identity and secret come straight from the
//! [`ConnectionConfig`](crate::ConnectionConfig) user and password.

use std::fmt::{self, Display, Formatter};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{
    error::{self, Error},
    response::Response,
};

/// Mechanisms tried in order of preference
///
/// LOGIN last as it is deprecated.
pub(crate) const PREFERRED_MECHANISMS: &[Mechanism] = &[Mechanism::Plain, Mechanism::Login];

/// Authentication mechanisms
#[derive(PartialEq, Eq, Copy, Clone, Hash, Debug)]
pub enum Mechanism {
    /// [RFC 4616](https://tools.ietf.org/html/rfc4616), everything in the
    /// initial response
    Plain,
    /// Username and password each answer a challenge
    ///
    /// Obsolete, still the only choice on some providers.
    Login,
}

impl Mechanism {
    /// Parses a mechanism advertised after `AUTH`, case-insensitively
    pub(crate) fn from_name(name: &str) -> Option<Mechanism> {
        [Mechanism::Plain, Mechanism::Login]
            .into_iter()
            .find(|mechanism| mechanism.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
        }
    }

    /// What goes on the `AUTH` line itself, before encoding
    pub(crate) fn initial_response(self, user: &str, pass: &str) -> Option<String> {
        match self {
            Mechanism::Plain => Some(format!("\u{0}{user}\u{0}{pass}")),
            Mechanism::Login => None,
        }
    }

    /// Answer to a decoded `334` challenge
    pub(crate) fn answer(self, challenge: &str, user: &str, pass: &str) -> Result<String, Error> {
        if self == Mechanism::Plain {
            return Err(error::auth("PLAIN does not expect a challenge"));
        }

        match challenge.trim_end_matches(':').to_ascii_lowercase().as_str() {
            "username" | "user name" => Ok(user.to_owned()),
            "password" => Ok(pass.to_owned()),
            _ => Err(error::auth(format!(
                "unrecognized LOGIN challenge {challenge:?}"
            ))),
        }
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decodes the challenge carried by a `334` reply
pub(crate) fn challenge(response: &Response) -> Result<String, Error> {
    if !response.has_code(334) {
        return Err(error::response("expecting a challenge"));
    }

    let encoded = response
        .first_line()
        .and_then(|line| line.split_whitespace().next())
        .unwrap_or_default();
    let decoded = STANDARD.decode(encoded).map_err(error::response)?;
    String::from_utf8(decoded).map_err(error::response)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_sends_everything_at_once() {
        assert_eq!(
            Mechanism::Plain.initial_response("alice", "wonderland").as_deref(),
            Some("\u{0}alice\u{0}wonderland")
        );
        assert!(Mechanism::Plain
            .answer("Username:", "alice", "wonderland")
            .unwrap_err()
            .is_auth());
    }

    #[test]
    fn login_answers_challenges() {
        let login = Mechanism::Login;
        assert_eq!(login.initial_response("alice", "wonderland"), None);
        assert_eq!(login.answer("Username:", "alice", "wonderland").unwrap(), "alice");
        assert_eq!(login.answer("User Name", "alice", "wonderland").unwrap(), "alice");
        assert_eq!(login.answer("Password:", "alice", "wonderland").unwrap(), "wonderland");
        assert!(login.answer("Realm", "alice", "wonderland").is_err());
    }

    #[test]
    fn mechanism_names() {
        assert_eq!(Mechanism::from_name("plain"), Some(Mechanism::Plain));
        assert_eq!(Mechanism::from_name("LOGIN"), Some(Mechanism::Login));
        assert_eq!(Mechanism::from_name("CRAM-MD5"), None);
    }

    #[test]
    fn decode_challenge() {
        // "Username:"
        let response = Response::new(334, &["VXNlcm5hbWU6"]);
        assert_eq!(challenge(&response).unwrap(), "Username:");

        assert!(challenge(&Response::new(235, &["ok"])).is_err());
        assert!(challenge(&Response::new(334, &["not base64!"])).is_err());
    }
}
