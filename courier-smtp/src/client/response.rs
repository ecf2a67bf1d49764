//! SMTP reply parsing.

use std::fmt::{self, Display};

use super::error::{ClientError, Result};

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    /// Text of each line, without the code and separator
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    #[must_use]
    pub const fn is_positive_completion(&self) -> bool {
        self.code / 100 == 2
    }

    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code / 100 == 3
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.code / 100, 4 | 5)
    }

    /// Accepts the reply if its first digit is `class`.
    ///
    /// # Errors
    ///
    /// Error replies become [`ClientError::Rejected`], anything else of the
    /// wrong class is [`ClientError::UnexpectedResponse`].
    pub fn expect(self, class: u16) -> Result<Self> {
        if self.code / 100 == class {
            Ok(self)
        } else if self.is_error() {
            Err(ClientError::Rejected {
                code: self.code,
                lines: self.lines,
            })
        } else {
            Err(ClientError::UnexpectedResponse {
                code: self.code,
                message: self.lines.join(" "),
            })
        }
    }

    /// Parses one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` when
    /// the buffer does not yet hold the final line.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Parse`] for malformed lines, or lines of one
    /// reply carrying different codes.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            consumed += end + 1;

            let line = std::str::from_utf8(raw)?;
            let (line_code, is_last, text) = parse_line(line)?;

            match code {
                None => code = Some(line_code),
                Some(code) if code != line_code => {
                    return Err(ClientError::Parse(format!(
                        "Status code mismatch in multi-line reply: expected {code}, got {line_code}"
                    )));
                }
                Some(_) => {}
            }

            lines.push(text.to_string());

            if is_last {
                return Ok(Some((Self::new(line_code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" | "))
    }
}

fn parse_line(line: &str) -> Result<(u16, bool, &str)> {
    let code = line
        .get(..3)
        .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (200..600).contains(code))
        .ok_or_else(|| ClientError::Parse(format!("Invalid reply line: '{line}'")))?;

    match line.as_bytes().get(3) {
        None => Ok((code, true, "")),
        Some(b' ') => Ok((code, true, &line[4..])),
        Some(b'-') => Ok((code, false, &line[4..])),
        Some(other) => Err(ClientError::Parse(format!(
            "Invalid separator character: '{}'",
            char::from(*other)
        ))),
    }
}
