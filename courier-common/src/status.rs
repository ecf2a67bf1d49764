//! Mail system status codes
//!
//! A [`Status`] pairs a basic SMTP reply code with an RFC 3463 enhanced code.
//! Replies from remote servers that carry no enhanced code keep just the
//! basic code, and [`Status::enhanced_code`] approximates the enhanced class
//! from the reply's first digit.

use std::{
    borrow::Cow,
    fmt::{self, Display},
    net::IpAddr,
    str::FromStr,
    sync::Arc,
};

/// RFC 3463 `class.subject.detail` code, e.g. `5.1.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnhancedCode {
    pub class: u8,
    pub subject: u16,
    pub detail: u16,
}

impl EnhancedCode {
    #[must_use]
    pub const fn new(class: u8, subject: u16, detail: u16) -> Self {
        Self {
            class,
            subject,
            detail,
        }
    }

    /// Reads an enhanced code from the start of a reply line. The code must be
    /// followed by a space, and the rest of the line is returned alongside it.
    #[must_use]
    pub fn parse_prefix(line: &str) -> Option<(Self, &str)> {
        let (candidate, rest) = line.split_once(' ')?;
        candidate.parse().ok().map(|code| (code, rest))
    }
}

impl FromStr for EnhancedCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn number(part: &str) -> Option<u16> {
            let valid = (1..=3).contains(&part.len())
                && part.bytes().all(|b| b.is_ascii_digit())
                && (part == "0" || !part.starts_with('0'));
            valid.then(|| part.parse().ok()).flatten()
        }

        let mut parts = s.split('.');
        let class = match parts.next() {
            Some("2") => 2,
            Some("4") => 4,
            Some("5") => 5,
            _ => return Err(()),
        };
        let subject = parts.next().and_then(number).ok_or(())?;
        let detail = parts.next().and_then(number).ok_or(())?;

        if parts.next().is_some() {
            return Err(());
        }

        Ok(Self::new(class, subject, detail))
    }
}

impl Display for EnhancedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// The outcome of an operation as reported to, or received from, another
/// mail system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: u16,
    enhanced: Option<EnhancedCode>,
    message: Cow<'static, str>,
}

impl Status {
    pub const TRANSIENT_SYSTEM_NOT_ACCEPTING: Self = Self::constant(
        421,
        EnhancedCode::new(4, 3, 2),
        "System not accepting network messages",
    );
    pub const TRANSIENT_DIRECTORY_SERVER_FAILURE: Self =
        Self::constant(450, EnhancedCode::new(4, 4, 3), "Directory server failure");
    pub const NO_ANSWER_FROM_HOST: Self = Self::constant(
        450,
        EnhancedCode::new(4, 4, 0),
        "No answer from host or bad connection",
    );
    pub const TRANSIENT_LOCAL_ERROR_IN_PROCESSING: Self =
        Self::constant(451, EnhancedCode::new(4, 3, 0), "Local error in processing");
    pub const TOO_MANY_CONNECTIONS: Self = Self::constant(
        451,
        EnhancedCode::new(4, 4, 5),
        "Too much connections to the destination system",
    );
    pub const BAD_DESTINATION_SYSTEM_ADDRESS: Self = Self::constant(
        550,
        EnhancedCode::new(5, 1, 2),
        "Bad destination system address",
    );
    pub const PERMANENT_UNABLE_TO_ROUTE: Self =
        Self::constant(550, EnhancedCode::new(5, 4, 4), "Unable to route");
    pub const BAD_DESTINATION_MAILBOX_ADDRESS_SYNTAX: Self = Self::constant(
        553,
        EnhancedCode::new(5, 1, 3),
        "Bad destination mailbox address syntax",
    );
    pub const PERMANENT_INTERNAL_ERROR: Self =
        Self::constant(554, EnhancedCode::new(5, 3, 0), "Internal error");
    pub const INCORRECT_CONFIGURATION: Self = Self::constant(
        554,
        EnhancedCode::new(5, 3, 5),
        "System incorrectly configured",
    );

    const fn constant(code: u16, enhanced: EnhancedCode, message: &'static str) -> Self {
        Self {
            code,
            enhanced: Some(enhanced),
            message: Cow::Borrowed(message),
        }
    }

    /// A status whose enhanced code is known.
    #[must_use]
    pub fn enhanced(code: u16, enhanced: EnhancedCode, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced: Some(enhanced),
            message: Cow::Owned(message.into()),
        }
    }

    /// A status carrying only a basic RFC 821 reply code.
    #[must_use]
    pub fn basic(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced: None,
            message: Cow::Owned(message.into()),
        }
    }

    /// Builds a status from a remote server's reply.
    ///
    /// When the first line starts with an enhanced code, every line is
    /// expected to carry the same code, and it is stripped from the message.
    /// If any line disagrees, the enhanced information is dropped and the
    /// reply is kept verbatim as a basic status.
    #[must_use]
    pub fn from_reply<S: AsRef<str>>(code: u16, lines: &[S]) -> Self {
        let verbatim = || {
            lines
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join("\n")
        };

        let Some((enhanced, _)) = lines
            .first()
            .and_then(|line| EnhancedCode::parse_prefix(line.as_ref()))
        else {
            return Self::basic(code, verbatim());
        };

        let stripped: Option<Vec<&str>> = lines
            .iter()
            .map(|line| match EnhancedCode::parse_prefix(line.as_ref()) {
                Some((other, rest)) if other == enhanced => Some(rest.trim()),
                _ => None,
            })
            .collect();

        match stripped {
            Some(message) => Self::enhanced(code, enhanced, message.join("\n")),
            None => Self::basic(code, verbatim()),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Cow::Owned(message.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// The enhanced code, approximated as `X.0.0` for basic statuses
    #[must_use]
    pub fn enhanced_code(&self) -> EnhancedCode {
        self.enhanced.unwrap_or_else(|| {
            let class = match self.code / 100 {
                2 => 2,
                4 => 4,
                _ => 5,
            };
            EnhancedCode::new(class, 0, 0)
        })
    }

    /// `true` if the enhanced code came from the reply itself rather than
    /// being approximated
    #[must_use]
    pub const fn has_enhanced_code(&self) -> bool {
        self.enhanced.is_some()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Transient (4xx) failures are worth retrying, anything else isn't.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.code / 100 == 4
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.code / 100 == 5
    }

    /// Text suitable for a DSN `Diagnostic-Code: smtp; ...` field
    #[must_use]
    pub fn diagnostic_code(&self) -> String {
        match self.enhanced {
            Some(enhanced) => format!("{} {enhanced} {}", self.code, self.message),
            None => format!("{} {}", self.code, self.message),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.code,
            self.enhanced_code(),
            self.message
        )
    }
}

/// Identity of a remote mail server that was, or was going to be, contacted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteMta {
    host: Arc<str>,
    address: Option<IpAddr>,
}

impl RemoteMta {
    #[must_use]
    pub fn new(host: impl Into<Arc<str>>, address: Option<IpAddr>) -> Self {
        Self {
            host: host.into(),
            address,
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn address(&self) -> Option<IpAddr> {
        self.address
    }
}

impl Display for RemoteMta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(address) => write!(f, "{} ({address})", self.host),
            None => f.write_str(&self.host),
        }
    }
}
