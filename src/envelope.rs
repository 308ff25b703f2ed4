use crate::error::{self, Error};

/// Simple email envelope representation
///
/// Addresses are taken verbatim, only line breaks are refused as they would
/// let an address smuggle extra commands into the session.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Envelope {
    /// The envelope recipients' addresses
    ///
    /// This can not be empty.
    forward_path: Vec<String>,
    /// The envelope sender address, empty for the null reverse-path
    reverse_path: String,
}

impl Envelope {
    /// Creates a new envelope
    ///
    /// # Examples
    ///
    /// ```
    /// use postern::Envelope;
    ///
    /// let envelope = Envelope::new("from@example.com", ["to@example.com"])?;
    /// assert_eq!(envelope.from(), "from@example.com");
    ///
    /// let injected = Envelope::new("from@example.com\r\nRCPT TO:<x@y>", ["to@example.com"]);
    /// assert!(injected.unwrap_err().is_line_injection());
    /// # Ok::<(), postern::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// If an address contains CR or LF, or if `to` has no elements in it.
    pub fn new<F, I, T>(from: F, to: I) -> Result<Envelope, Error>
    where
        F: Into<String>,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let envelope = Envelope {
            forward_path: to.into_iter().map(Into::into).collect(),
            reverse_path: from.into(),
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Checks the envelope can be written on the wire as is
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if let Some(address) = self.addresses().find(|address| has_line_break(address)) {
            return Err(error::line_injection(format!(
                "address {address:?} contains a line break"
            )));
        }
        if self.forward_path.is_empty() {
            return Err(error::invalid_envelope("missing destination address"));
        }
        Ok(())
    }

    /// Gets the destination addresses of the envelope.
    pub fn to(&self) -> &[String] {
        self.forward_path.as_slice()
    }

    /// Gets the sender of the envelope.
    pub fn from(&self) -> &str {
        &self.reverse_path
    }

    /// Check if any of the addresses in the envelope contains non-ascii chars
    pub fn has_non_ascii_addresses(&self) -> bool {
        self.addresses().any(|address| !address.is_ascii())
    }

    fn addresses(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.reverse_path.as_str())
            .chain(self.forward_path.iter().map(String::as_str))
    }
}

fn has_line_break(address: &str) -> bool {
    address.contains(['\r', '\n'])
}
