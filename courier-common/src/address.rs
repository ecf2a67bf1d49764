//! Envelope addresses as RFC 5321 defines them
//!
//! ```text
//! Reverse-path    = Path / "<>"
//! Mailbox         = Local-part "@" ( Domain / address-literal )
//! Local-part      = Dot-string / Quoted-string
//! Domain          = sub-domain *("." sub-domain)
//! address-literal = "[" ( IPv4-address-literal / IPv6-address-literal ) "]"
//! ```
//!
//! The inbound side hands over envelopes that were already validated, so
//! parsing here accepts bare mailboxes (`jane@example.com`) as well as
//! bracketed paths (`<jane@example.com>`).

use std::{
    fmt::{self, Display},
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
    sync::Arc,
};

use thiserror::Error;

use crate::Domain;

const MAX_LOCAL_PART: usize = 64;
const MAX_DOMAIN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,

    #[error("Missing '@' separator in mailbox")]
    MissingAtSign,

    #[error("Local-part exceeds 64 octets")]
    LocalPartTooLong,

    #[error("Domain exceeds 255 octets")]
    DomainTooLong,

    #[error("Invalid local-part: {0}")]
    InvalidLocalPart(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid address literal: {0}")]
    InvalidAddressLiteral(String),
}

/// The part of a mailbox after the `@`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemotePart {
    Domain(Domain),
    Literal(IpAddr),
}

impl RemotePart {
    /// The form used in SMTP commands, e.g. `example.com` or `[192.0.2.1]`
    #[must_use]
    pub fn smtp_text(&self) -> String {
        self.to_string()
    }
}

impl Display for RemotePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(domain) => write!(f, "{domain}"),
            Self::Literal(IpAddr::V4(address)) => write!(f, "[{address}]"),
            Self::Literal(IpAddr::V6(address)) => write!(f, "[IPv6:{address}]"),
        }
    }
}

impl FromStr for RemotePart {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.len() > MAX_DOMAIN {
            return Err(AddressError::DomainTooLong);
        }

        if input.starts_with('[') {
            parse_address_literal(input).map(Self::Literal)
        } else {
            parse_domain(input).map(Self::Domain)
        }
    }
}

/// Parses a host name, checking the label syntax of RFC 5321 `Domain`.
impl FromStr for Domain {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.len() > MAX_DOMAIN {
            return Err(AddressError::DomainTooLong);
        }

        parse_domain(input)
    }
}

/// A `local-part@remote-part` mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mailbox {
    local_part: Arc<str>,
    remote_part: RemotePart,
}

impl Mailbox {
    #[must_use]
    pub fn new(local_part: impl Into<Arc<str>>, remote_part: RemotePart) -> Self {
        Self {
            local_part: local_part.into(),
            remote_part,
        }
    }

    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    #[must_use]
    pub const fn remote_part(&self) -> &RemotePart {
        &self.remote_part
    }

    #[must_use]
    pub fn smtp_text(&self) -> String {
        self.to_string()
    }
}

impl Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.remote_part)
    }
}

impl FromStr for Mailbox {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = strip_brackets(input.trim());
        if input.is_empty() {
            return Err(AddressError::Empty);
        }

        let at = find_unquoted_at(input)?;
        let (local_part, remote_part) = (&input[..at], &input[at + 1..]);

        if local_part.len() > MAX_LOCAL_PART {
            return Err(AddressError::LocalPartTooLong);
        }
        validate_local_part(local_part)?;

        Ok(Self::new(local_part, remote_part.parse()?))
    }
}

/// A forward-path as it appears in `RCPT TO`.
///
/// The special, domain-less `Postmaster` address of RFC 5321 section 4.5.1
/// is kept apart from ordinary mailboxes: it must resolve to a local account
/// and never reaches remote delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    Postmaster,
    Mailbox(Mailbox),
}

impl Recipient {
    #[must_use]
    pub const fn is_global_postmaster(&self) -> bool {
        matches!(self, Self::Postmaster)
    }

    #[must_use]
    pub const fn mailbox(&self) -> Option<&Mailbox> {
        match self {
            Self::Postmaster => None,
            Self::Mailbox(mailbox) => Some(mailbox),
        }
    }

    #[must_use]
    pub const fn remote_part(&self) -> Option<&RemotePart> {
        match self {
            Self::Postmaster => None,
            Self::Mailbox(mailbox) => Some(mailbox.remote_part()),
        }
    }

    #[must_use]
    pub fn smtp_text(&self) -> String {
        self.to_string()
    }
}

impl Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postmaster => f.write_str("Postmaster"),
            Self::Mailbox(mailbox) => write!(f, "{mailbox}"),
        }
    }
}

impl FromStr for Recipient {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = strip_brackets(input.trim());
        if trimmed.eq_ignore_ascii_case("postmaster") {
            return Ok(Self::Postmaster);
        }

        trimmed.parse().map(Self::Mailbox)
    }
}

impl From<Mailbox> for Recipient {
    fn from(mailbox: Mailbox) -> Self {
        Self::Mailbox(mailbox)
    }
}

/// The `MAIL FROM` address. `Null` marks a notification that must never
/// itself be bounced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ReversePath {
    #[default]
    Null,
    Mailbox(Mailbox),
}

impl ReversePath {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn mailbox(&self) -> Option<&Mailbox> {
        match self {
            Self::Null => None,
            Self::Mailbox(mailbox) => Some(mailbox),
        }
    }

    /// Text placed between the angle brackets of `MAIL FROM:<...>`
    #[must_use]
    pub fn smtp_text(&self) -> String {
        self.mailbox().map(Mailbox::smtp_text).unwrap_or_default()
    }
}

impl Display for ReversePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.smtp_text())
    }
}

impl FromStr for ReversePath {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = strip_brackets(input.trim());
        if trimmed.is_empty() {
            return Ok(Self::Null);
        }

        trimmed.parse().map(Self::Mailbox)
    }
}

impl From<Mailbox> for ReversePath {
    fn from(mailbox: Mailbox) -> Self {
        Self::Mailbox(mailbox)
    }
}

fn strip_brackets(input: &str) -> &str {
    input
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(input)
}

/// Position of the first '@' outside a quoted string
fn find_unquoted_at(input: &str) -> Result<usize, AddressError> {
    let mut in_quotes = false;
    let mut prev_was_backslash = false;

    for (i, ch) in input.char_indices() {
        match ch {
            '"' if !prev_was_backslash => in_quotes = !in_quotes,
            '@' if !in_quotes => return Ok(i),
            _ => {}
        }

        prev_was_backslash = ch == '\\' && !prev_was_backslash;
    }

    Err(AddressError::MissingAtSign)
}

const fn is_atext(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
}

fn validate_local_part(input: &str) -> Result<(), AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLocalPart("Empty local-part".into()));
    }

    if let Some(content) = input.strip_prefix('"') {
        let content = content
            .strip_suffix('"')
            .ok_or_else(|| AddressError::InvalidLocalPart("Unclosed quoted string".into()))?;

        let mut chars = content.chars();
        while let Some(ch) = chars.next() {
            let valid = if ch == '\\' {
                chars.next().is_some_and(|next| next == ' ' || next.is_ascii_graphic())
            } else {
                ch == ' ' || (ch.is_ascii_graphic() && ch != '"' && ch != '\\')
            };

            if !valid {
                return Err(AddressError::InvalidLocalPart(format!(
                    "Invalid quoted string: {input}"
                )));
            }
        }

        return Ok(());
    }

    if input.split('.').any(|atom| atom.is_empty()) {
        return Err(AddressError::InvalidLocalPart(format!(
            "Empty atom in dot-string: {input}"
        )));
    }

    if let Some(ch) = input.chars().find(|&ch| ch != '.' && !is_atext(ch)) {
        return Err(AddressError::InvalidLocalPart(format!(
            "Invalid character '{ch}' in atom"
        )));
    }

    Ok(())
}

fn parse_domain(input: &str) -> Result<Domain, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidDomain("Empty domain".into()));
    }

    for label in input.split('.') {
        let valid = !label.is_empty()
            && label.starts_with(|c: char| c.is_ascii_alphanumeric())
            && label.ends_with(|c: char| c.is_ascii_alphanumeric())
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');

        if !valid {
            return Err(AddressError::InvalidDomain(input.to_string()));
        }
    }

    Ok(Domain::new(input))
}

fn parse_address_literal(input: &str) -> Result<IpAddr, AddressError> {
    let content = input
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| AddressError::InvalidAddressLiteral(input.to_string()))?;

    let prefix = content.get(..5);
    if prefix.is_some_and(|p| p.eq_ignore_ascii_case("IPv6:")) {
        return content[5..]
            .parse::<Ipv6Addr>()
            .map(IpAddr::V6)
            .map_err(|_| AddressError::InvalidAddressLiteral(input.to_string()));
    }

    content
        .parse::<Ipv4Addr>()
        .map(IpAddr::V4)
        .map_err(|_| AddressError::InvalidAddressLiteral(input.to_string()))
}
