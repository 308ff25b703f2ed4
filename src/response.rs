//! Server replies

use std::fmt::{self, Display, Formatter};

use nom::{
    branch::alt,
    bytes::streaming::{tag, take, take_until},
    character::streaming::char,
    combinator::{map_res, peek, value, verify},
    IResult, Parser,
};

/// A three digit reply code, from `200` to `599`
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone, Debug)]
pub struct Code(u16);

impl Code {
    #[cfg(test)]
    pub(crate) const fn new(code: u16) -> Code {
        Code(code)
    }

    /// `2yz` or `3yz`
    pub fn is_positive(self) -> bool {
        self.0 < 400
    }

    /// `4yz`, the same command may succeed later
    pub fn is_transient(self) -> bool {
        (400..500).contains(&self.0)
    }

    /// `5yz`
    pub fn is_permanent(self) -> bool {
        self.0 >= 500
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Code> for u16 {
    fn from(code: Code) -> Self {
        code.0
    }
}

/// A complete reply: its code and the text of every line
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Response {
    code: Code,
    lines: Vec<String>,
}

impl Response {
    #[cfg(test)]
    pub(crate) fn new(code: u16, lines: &[&str]) -> Response {
        Response {
            code: Code(code),
            lines: lines.iter().map(|line| (*line).to_owned()).collect(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn has_code(&self, code: u16) -> bool {
        self.code.0 == code
    }

    pub fn is_positive(&self) -> bool {
        self.code.is_positive()
    }

    /// Text of each line, without code and separator
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn first_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    /// All lines joined with a space
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

/// One reply line: its code, whether another line follows, and its text
fn reply_line(i: &str) -> IResult<&str, (Code, bool, &str)> {
    let (i, code) = map_res(
        verify(take(3usize), |digits: &str| {
            digits.bytes().all(|b| b.is_ascii_digit())
                && matches!(digits.as_bytes().first(), Some(b'2'..=b'5'))
        }),
        |digits: &str| digits.parse().map(Code),
    )
    .parse(i)?;
    let (i, more) = alt((
        value(true, char('-')),
        value(false, char(' ')),
        value(false, peek(tag("\r\n"))),
    ))
    .parse(i)?;
    let (i, text) = take_until("\r\n").parse(i)?;
    let (i, _) = tag("\r\n").parse(i)?;

    Ok((i, (code, more, text)))
}

/// Parses one reply, possibly spanning several lines
///
/// Returns `Incomplete` until the last line (`code SP text CRLF`, or a
/// bare `code CRLF`) has been received. Every line must carry the same code.
pub(crate) fn parse_response(mut i: &str) -> IResult<&str, Response> {
    let mut lines = Vec::new();
    let mut first_code = None;

    loop {
        let (rest, (code, more, text)) = reply_line(i)?;
        if first_code.is_some_and(|first| first != code) {
            return Err(nom::Err::Failure(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Verify,
            )));
        }
        first_code = Some(code);
        lines.push(text.to_owned());
        i = rest;

        if !more {
            return Ok((i, Response { code, lines }));
        }
    }
}
