/*
 * vFilter mail filtering relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use crate::{Error, ParseArgsError};
use vfilter_common::ClientInfo;

/// max size of a received command line, CRLF excluded
pub const MAX_LINE_SIZE: usize = 1024;

/// Buffer received from the client after the verb.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct UnparsedArgs(pub Vec<u8>);

impl UnparsedArgs {
    fn as_str(&self) -> Result<&str, ParseArgsError> {
        Ok(std::str::from_utf8(&self.0)?.trim())
    }
}

/// A verb and its raw arguments.
pub type Command<Verb, Args> = (Verb, Args);

/// Command of the SMTP subset spoken with the peers, matched on the first
/// four letters, case insensitive.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::EnumVariantNames,
)]
#[non_exhaustive]
pub enum Verb {
    /// Identify the client.
    #[strum(serialize = "HELO")]
    Helo,
    /// Identify the client and request the extensions.
    #[strum(serialize = "EHLO")]
    Ehlo,
    /// Start a transaction with the reverse path.
    #[strum(serialize = "MAIL")]
    MailFrom,
    /// Add a forward path to the transaction.
    #[strum(serialize = "RCPT")]
    RcptTo,
    /// Start the transfer of the content.
    #[strum(serialize = "DATA")]
    Data,
    /// Close the session.
    #[strum(serialize = "QUIT")]
    Quit,
    /// Abort the current transaction.
    #[strum(serialize = "RSET")]
    Rset,
    /// Do nothing.
    #[strum(serialize = "NOOP")]
    Noop,
    /// Metadata of the original client, sent by a trusted front-end.
    /// <http://www.postfix.org/XFORWARD_README.html>
    #[strum(serialize = "XFOR")]
    XForward,
    /// Any other buffer received while expecting a command is considered an
    /// unknown.
    Unknown,
}

/// Split a command line (CRLF excluded) into its verb and arguments.
///
/// # Errors
///
/// * the line is longer than [`MAX_LINE_SIZE`]
#[allow(clippy::expect_used)]
pub fn parse_command_line(line: &[u8]) -> Result<Command<Verb, UnparsedArgs>, Error> {
    if line.len() > MAX_LINE_SIZE {
        return Err(Error::buffer_too_long(MAX_LINE_SIZE, line.len()));
    }

    let args = memchr::memchr(b' ', line).map_or_else(Vec::new, |pos| line[pos + 1..].to_vec());

    Ok(<Verb as strum::VariantNames>::VARIANTS
        .iter()
        .find(|i| line.len() >= i.len() && line[..i.len()].eq_ignore_ascii_case(i.as_bytes()))
        .map_or_else(
            || (Verb::Unknown, UnparsedArgs(line.to_vec())),
            |verb| (verb.parse().expect("verb found above"), UnparsedArgs(args)),
        ))
}

/// Address of a `MAIL FROM:` or `RCPT TO:` argument: what is between the
/// first `<` and the next `>`, or else what follows the first `:`.
///
/// # Errors
///
/// * there is neither a `<` nor a `:`
/// * a `<` is not closed
pub fn extract_address(args: &str) -> Result<String, ParseArgsError> {
    if let Some(start) = args.find('<') {
        #[allow(clippy::string_slice)]
        let rest = &args[start + 1..];
        let end = rest.find('>').ok_or(ParseArgsError::InvalidArgs)?;
        #[allow(clippy::string_slice)]
        return Ok(rest[..end].trim().to_owned());
    }
    if let Some(colon) = args.find(':') {
        #[allow(clippy::string_slice)]
        let value = args[colon + 1..].split_whitespace().next().unwrap_or_default();
        return Ok(value.to_owned());
    }
    Err(ParseArgsError::MissingAddress)
}

/// Information received from the client at the HELO / EHLO command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct HeloArgs {
    /// Name of the client.
    pub client_name: String,
}

impl TryFrom<UnparsedArgs> for HeloArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        match value.as_str()? {
            "" => Err(ParseArgsError::InvalidArgs),
            name => Ok(Self {
                client_name: name.to_owned(),
            }),
        }
    }
}

/// Information received from the client at the MAIL FROM command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct MailFromArgs {
    /// Sender address, empty for the null sender.
    pub reverse_path: String,
}

impl TryFrom<UnparsedArgs> for MailFromArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        Ok(Self {
            reverse_path: extract_address(value.as_str()?)?,
        })
    }
}

/// Information received from the client at the RCPT TO command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RcptToArgs {
    /// Recipient address.
    pub forward_path: String,
}

impl TryFrom<UnparsedArgs> for RcptToArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        match extract_address(value.as_str()?)? {
            forward_path if forward_path.is_empty() => Err(ParseArgsError::MissingAddress),
            forward_path => Ok(Self { forward_path }),
        }
    }
}

/// Value of an XFORWARD attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XForwardValue {
    /// `[UNAVAILABLE]`
    Unavailable,
    /// Actual value.
    Value(String),
}

impl From<&str> for XForwardValue {
    #[inline]
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("[UNAVAILABLE]") {
            Self::Unavailable
        } else {
            Self::Value(value.to_owned())
        }
    }
}

/// Information received at the XFORWARD command. Attributes other than
/// `NAME`, `ADDR` and `HELO` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct XForwardArgs {
    /// Reverse DNS name of the original client.
    pub name: Option<XForwardValue>,
    /// IP address of the original client.
    pub addr: Option<XForwardValue>,
    /// HELO name of the original client.
    pub helo: Option<XForwardValue>,
}

impl XForwardArgs {
    /// Merge the attributes into `info`.
    ///
    /// An unavailable name becomes `unknown`, an unavailable address or helo
    /// leaves the current value in place.
    #[inline]
    pub fn apply(&self, info: &mut ClientInfo) {
        match &self.name {
            Some(XForwardValue::Value(name)) => info.rdns = Some(name.clone()),
            Some(XForwardValue::Unavailable) => info.rdns = Some("unknown".to_owned()),
            None => (),
        }
        if let Some(XForwardValue::Value(addr)) = &self.addr {
            info.addr = Some(addr.clone());
        }
        if let Some(XForwardValue::Value(helo)) = &self.helo {
            info.helo = Some(helo.clone());
        }
    }
}

impl TryFrom<UnparsedArgs> for XForwardArgs {
    type Error = ParseArgsError;

    #[inline]
    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let mut out = Self::default();
        for attribute in value.as_str()?.split_whitespace() {
            let (key, value) = attribute
                .split_once('=')
                .ok_or(ParseArgsError::InvalidArgs)?;
            let slot = match key.to_ascii_uppercase().as_str() {
                "NAME" => &mut out.name,
                "ADDR" => &mut out.addr,
                "HELO" => &mut out.helo,
                _ => continue,
            };
            *slot = Some(value.into());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest::rstest]
    #[case(b"HELO client.example.com", Verb::Helo, b"client.example.com")]
    #[case(b"ehlo client", Verb::Ehlo, b"client")]
    #[case(b"MAIL FROM:<a@b.c>", Verb::MailFrom, b"FROM:<a@b.c>")]
    #[case(b"rcpt to:<a@b.c>", Verb::RcptTo, b"to:<a@b.c>")]
    #[case(b"DATA", Verb::Data, b"")]
    #[case(b"Quit", Verb::Quit, b"")]
    #[case(b"RSET", Verb::Rset, b"")]
    #[case(b"NOOP", Verb::Noop, b"")]
    #[case(b"XFORWARD NAME=spike.porcupine.org", Verb::XForward, b"NAME=spike.porcupine.org")]
    fn verbs(#[case] line: &[u8], #[case] verb: Verb, #[case] args: &[u8]) {
        assert_eq!(
            parse_command_line(line).unwrap(),
            (verb, UnparsedArgs(args.to_vec()))
        );
    }

    #[test]
    fn unknown() {
        assert_eq!(
            parse_command_line(b"VRFY root").unwrap(),
            (Verb::Unknown, UnparsedArgs(b"VRFY root".to_vec()))
        );
    }

    #[test]
    fn too_long() {
        let line = [b"HELO ".to_vec(), vec![b'a'; MAX_LINE_SIZE]].concat();
        assert!(parse_command_line(&line).unwrap_err().is_too_long());
    }

    #[rstest::rstest]
    #[case("FROM:<john@doe.com>", Ok("john@doe.com"))]
    #[case("FROM:<john@doe.com> SIZE=1000", Ok("john@doe.com"))]
    #[case("FROM:<>", Ok(""))]
    #[case("FROM: john@doe.com", Ok("john@doe.com"))]
    #[case("FROM:john@doe.com BODY=8BITMIME", Ok("john@doe.com"))]
    #[case("FROM <john@doe.com", Err(ParseArgsError::InvalidArgs))]
    #[case("john@doe.com", Err(ParseArgsError::MissingAddress))]
    fn address(#[case] args: &str, #[case] expected: Result<&str, ParseArgsError>) {
        assert_eq!(extract_address(args), expected.map(str::to_owned));
    }

    #[test]
    fn empty_recipient() {
        assert_eq!(
            RcptToArgs::try_from(UnparsedArgs(b"TO:<>".to_vec())),
            Err(ParseArgsError::MissingAddress)
        );
    }

    #[test]
    fn helo_needs_a_name() {
        assert_eq!(
            HeloArgs::try_from(UnparsedArgs(b"  ".to_vec())),
            Err(ParseArgsError::InvalidArgs)
        );
    }

    #[test]
    fn xforward() {
        let args = XForwardArgs::try_from(UnparsedArgs(
            b"name=[UNAVAILABLE] ADDR=168.100.189.2 HELO=[UNAVAILABLE] PROTO=ESMTP".to_vec(),
        ))
        .unwrap();

        let mut info = ClientInfo {
            helo: Some("front.example.com".to_owned()),
            addr: None,
            rdns: None,
        };
        args.apply(&mut info);

        assert_eq!(
            info,
            ClientInfo {
                helo: Some("front.example.com".to_owned()),
                addr: Some("168.100.189.2".to_owned()),
                rdns: Some("unknown".to_owned()),
            }
        );
    }

    #[test]
    fn xforward_needs_pairs() {
        assert_eq!(
            XForwardArgs::try_from(UnparsedArgs(b"NAME".to_vec())),
            Err(ParseArgsError::InvalidArgs)
        );
    }
}
