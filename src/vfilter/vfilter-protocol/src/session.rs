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

use crate::{
    command::{HeloArgs, MailFromArgs, RcptToArgs, XForwardArgs},
    ParseArgsError, UnparsedArgs, Verb,
};
use vfilter_common::{ClientInfo, Reply, ValidationStrategy};

/// Step of the SMTP transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Stage {
    /// Connected, no greeting received.
    Init,
    /// HELO / EHLO received.
    Helo,
    /// MAIL FROM accepted.
    Mail,
    /// At least one RCPT TO accepted.
    Rcpt,
    /// Receiving the content.
    Data,
}

/// A command checked against the current state of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// HELO (`extended == false`) or EHLO.
    Helo {
        /// name given by the client
        client_name: String,
        /// EHLO
        extended: bool,
    },
    /// Sender of a new transaction.
    MailFrom(String),
    /// One more recipient.
    RcptTo(String),
    /// The client wants to send the content.
    Data,
    /// Abort the transaction.
    Rset,
    ///
    Noop,
    ///
    Quit,
    /// Client metadata from a trusted front-end.
    XForward(XForwardArgs),
    /// The command is not allowed at this stage.
    BadSequence(Verb),
    /// The arguments of the command are malformed.
    SyntaxError(Verb, ParseArgsError),
    /// The command is not understood.
    Unknown(Vec<u8>),
}

impl Event {
    /// Standard reply of a local SMTP server to this event.
    #[must_use]
    pub fn default_reply(&self, hostname: &str) -> Reply {
        match self {
            Self::Helo { .. } => Reply::new(250, hostname),
            Self::MailFrom(_) | Self::RcptTo(_) | Self::Rset | Self::Noop | Self::XForward(_) => {
                Reply::new(250, "Ok")
            }
            Self::Data => Reply::new(354, "Enter data, end with <CRLF>.<CRLF>"),
            Self::Quit => Reply::new(221, format!("{hostname} Service closing transmission channel")),
            Self::BadSequence(_) => Reply::new(503, "Bad command sequence"),
            Self::SyntaxError(_, e) => Reply::new(501, format!("Syntax error in parameters: {e}")),
            Self::Unknown(_) => Reply::new(500, "Command not recognized"),
        }
    }
}

/// State of one connection: which commands are allowed, and the envelope
/// being built.
///
/// [`Session::classify`] checks a command without changing anything,
/// [`Session::commit`] applies it once the dialect accepted it.
#[derive(Debug, Clone)]
pub struct Session {
    stage: Stage,
    helo: Option<String>,
    from: Option<String>,
    recipients: Vec<String>,
    client_info: ClientInfo,
    address_check: Option<ValidationStrategy>,
    accept_xforward: bool,
}

impl Default for Session {
    #[inline]
    fn default() -> Self {
        Self::new(None, false)
    }
}

impl Session {
    /// Create a session in the [`Stage::Init`] stage.
    ///
    /// With `address_check`, addresses of MAIL and RCPT are validated when
    /// the command is received. XFORWARD is an unknown command unless
    /// `accept_xforward` is set.
    #[must_use]
    #[inline]
    pub fn new(address_check: Option<ValidationStrategy>, accept_xforward: bool) -> Self {
        Self {
            stage: Stage::Init,
            helo: None,
            from: None,
            recipients: vec![],
            client_info: ClientInfo::default(),
            address_check,
            accept_xforward,
        }
    }

    /// Current stage.
    #[must_use]
    #[inline]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Name given at HELO / EHLO.
    #[must_use]
    #[inline]
    pub fn helo(&self) -> Option<&str> {
        self.helo.as_deref()
    }

    /// Sender of the current transaction, empty for the null sender.
    #[must_use]
    #[inline]
    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    /// Recipients of the current transaction.
    #[must_use]
    #[inline]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Client metadata collected on the connection.
    #[must_use]
    #[inline]
    pub const fn client_info(&self) -> &ClientInfo {
        &self.client_info
    }

    /// Mutable client metadata, filled by the acceptor.
    #[inline]
    pub fn client_info_mut(&mut self) -> &mut ClientInfo {
        &mut self.client_info
    }

    fn check_address(&self, verb: Verb, address: String) -> Result<String, Event> {
        match self.address_check {
            Some(strategy) if !(address.is_empty() && verb == Verb::MailFrom) => {
                if strategy.validate(&address).is_ok() {
                    Ok(address)
                } else {
                    Err(Event::SyntaxError(
                        verb,
                        ParseArgsError::InvalidMailAddress { mail: address },
                    ))
                }
            }
            _ => Ok(address),
        }
    }

    /// Check a command against the current stage.
    #[must_use]
    pub fn classify(&self, verb: Verb, args: UnparsedArgs) -> Event {
        macro_rules! parse {
            ($args_output:ty) => {
                match <$args_output>::try_from(args) {
                    Ok(parsed) => parsed,
                    Err(e) => return Event::SyntaxError(verb, e),
                }
            };
        }

        match (verb, self.stage) {
            (Verb::Helo | Verb::Ehlo, _) => Event::Helo {
                client_name: parse!(HeloArgs).client_name,
                extended: verb == Verb::Ehlo,
            },
            (Verb::Rset, _) => Event::Rset,
            (Verb::Noop, _) => Event::Noop,
            (Verb::Quit, _) => Event::Quit,
            (Verb::XForward, _) if self.accept_xforward => Event::XForward(parse!(XForwardArgs)),
            (Verb::MailFrom, Stage::Helo) => {
                let address = parse!(MailFromArgs).reverse_path;
                self.check_address(verb, address)
                    .map_or_else(|e| e, Event::MailFrom)
            }
            (Verb::RcptTo, Stage::Mail | Stage::Rcpt) => {
                let address = parse!(RcptToArgs).forward_path;
                self.check_address(verb, address)
                    .map_or_else(|e| e, Event::RcptTo)
            }
            (Verb::Data, Stage::Rcpt) => Event::Data,
            (Verb::Unknown | Verb::XForward, _) => Event::Unknown(args.0),
            (otherwise, _) => Event::BadSequence(otherwise),
        }
    }

    /// Apply an accepted event.
    pub fn commit(&mut self, event: &Event) {
        match event {
            Event::Helo { client_name, .. } => {
                self.reset_transaction();
                self.helo = Some(client_name.clone());
                self.stage = Stage::Helo;
            }
            Event::Rset => {
                self.reset_transaction();
                self.helo = None;
                self.stage = Stage::Init;
            }
            Event::MailFrom(from) => {
                self.from = Some(from.clone());
                self.stage = Stage::Mail;
            }
            Event::RcptTo(rcpt) => {
                self.recipients.push(rcpt.clone());
                self.stage = Stage::Rcpt;
            }
            Event::Data => self.stage = Stage::Data,
            Event::XForward(args) => args.apply(&mut self.client_info),
            Event::Noop
            | Event::Quit
            | Event::BadSequence(_)
            | Event::SyntaxError(..)
            | Event::Unknown(_) => (),
        }
    }

    /// End of the DATA block: the envelope is cleared and a new transaction
    /// can start, the greeting is kept.
    #[inline]
    pub fn end_transaction(&mut self) {
        self.reset_transaction();
        self.stage = if self.helo.is_some() {
            Stage::Helo
        } else {
            Stage::Init
        };
    }

    fn reset_transaction(&mut self) {
        self.from = None;
        self.recipients.clear();
    }
}
