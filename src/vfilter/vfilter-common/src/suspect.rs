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

use crate::{Address, AddressError, Spool, Tags, ValidationStrategy};

/// Unique identifier of a message, random and rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde_with::SerializeDisplay)]
pub struct SuspectId(uuid::Uuid);

impl SuspectId {
    /// Generate a new identifier.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SuspectId {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SuspectId {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Metadata of the client which originally submitted the message.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ClientInfo {
    /// HELO / EHLO name.
    pub helo: Option<String>,
    /// IP address.
    pub addr: Option<String>,
    /// Reverse DNS name, `unknown` when the front-end could not resolve it.
    pub rdns: Option<String>,
}

/// Failure to build a suspect.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The envelope sender is malformed.
    #[error("invalid sender: {0}")]
    InvalidSender(#[source] AddressError),
    /// One of the envelope recipients is malformed.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(#[source] AddressError),
    /// The envelope has no recipient.
    #[error("a message needs at least one recipient")]
    NoRecipient,
    /// The spool cannot be accessed.
    #[error("spool is not accessible: {0}")]
    Io(#[from] std::io::Error),
}

/// One message going through the filters.
#[derive(Debug)]
pub struct Suspect {
    id: SuspectId,
    from: Option<Address>,
    to: Vec<Address>,
    size: u64,
    timestamp: time::OffsetDateTime,
    spool: Spool,
    modified: Option<Vec<u8>>,
    staged_headers: Vec<(String, String)>,
    client_info: Option<ClientInfo>,
    debug: bool,
    tags: Tags,
}

impl Suspect {
    /// Build a suspect from a spooled message.
    ///
    /// An empty `from` is the null sender of bounces.
    ///
    /// # Errors
    ///
    /// * an address is not valid with `strategy`
    /// * `to` is empty
    /// * the spool cannot be read
    pub async fn new(
        id: SuspectId,
        from: &str,
        to: &[String],
        spool: Spool,
        strategy: ValidationStrategy,
    ) -> Result<Self, Error> {
        let from = if from.is_empty() {
            None
        } else {
            Some(Address::parse_with(from, strategy).map_err(Error::InvalidSender)?)
        };

        if to.is_empty() {
            return Err(Error::NoRecipient);
        }
        let to = to
            .iter()
            .map(|rcpt| Address::parse_with(rcpt, strategy))
            .collect::<Result<Vec<_>, _>>()
            .map_err(Error::InvalidRecipient)?;

        let size = spool.len().await?;

        Ok(Self {
            id,
            from,
            to,
            size,
            timestamp: time::OffsetDateTime::now_utc(),
            spool,
            modified: None,
            staged_headers: vec![],
            client_info: None,
            debug: false,
            tags: Tags::default(),
        })
    }

    /// Identifier of the message.
    #[must_use]
    #[inline]
    pub const fn id(&self) -> &SuspectId {
        &self.id
    }

    /// Envelope sender, `None` for the null sender.
    #[must_use]
    #[inline]
    pub const fn from(&self) -> Option<&Address> {
        self.from.as_ref()
    }

    /// Envelope sender as it goes on the wire, empty for the null sender.
    #[must_use]
    #[inline]
    pub fn from_address(&self) -> &str {
        self.from.as_ref().map_or("", Address::full)
    }

    /// Envelope recipients, in reception order.
    #[must_use]
    #[inline]
    pub fn to(&self) -> &[Address] {
        &self.to
    }

    /// Size in bytes of the spooled message.
    #[must_use]
    #[inline]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Instant the suspect was created.
    #[must_use]
    #[inline]
    pub const fn timestamp(&self) -> time::OffsetDateTime {
        self.timestamp
    }

    /// Path of the original message on disk.
    #[must_use]
    #[inline]
    pub fn spool_path(&self) -> &std::path::Path {
        self.spool.path()
    }

    /// Tags written by the plugins.
    #[must_use]
    #[inline]
    pub const fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Mutable access to the tags.
    #[inline]
    pub fn tags_mut(&mut self) -> &mut Tags {
        &mut self.tags
    }

    /// Client metadata, if known.
    #[must_use]
    #[inline]
    pub const fn client_info(&self) -> Option<&ClientInfo> {
        self.client_info.as_ref()
    }

    /// Attach client metadata.
    #[inline]
    pub fn set_client_info(&mut self, info: ClientInfo) {
        self.client_info = Some(info);
    }

    /// Enable the debug output of the plugins.
    #[inline]
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Record a debug line, ignored unless debugging is enabled.
    #[inline]
    pub fn debug(&mut self, message: impl Into<String>) {
        if self.debug {
            self.tags.debug.push(message.into());
        }
    }

    /// Has a plugin replaced the content ?
    #[must_use]
    #[inline]
    pub const fn is_modified(&self) -> bool {
        self.modified.is_some()
    }

    /// Replace the content of the message.
    #[inline]
    pub fn set_source(&mut self, source: Vec<u8>) {
        self.modified = Some(source);
    }

    /// Bytes received from the peer, untouched.
    ///
    /// # Errors
    ///
    /// * the spool cannot be read
    pub async fn original_source(&self) -> std::io::Result<Vec<u8>> {
        self.spool.read().await
    }

    /// Current content: the replaced one if any, the original otherwise.
    ///
    /// # Errors
    ///
    /// * the spool cannot be read
    pub async fn source(&self) -> std::io::Result<std::borrow::Cow<'_, [u8]>> {
        match &self.modified {
            Some(modified) => Ok(std::borrow::Cow::Borrowed(modified)),
            None => self.spool.read().await.map(std::borrow::Cow::Owned),
        }
    }

    /// Header fields of the current content, unfolded.
    ///
    /// # Errors
    ///
    /// * the spool cannot be read
    pub async fn headers(&self) -> std::io::Result<Vec<(String, String)>> {
        Ok(parse_headers(&self.source().await?))
    }

    /// Add a header to the message.
    ///
    /// Staged headers (`immediate == false`) are only written when the message
    /// is rebuilt for re-injection, and a second add of the same name replaces
    /// the value. Immediate headers are written on top of the content at each
    /// call, which marks the message as modified.
    ///
    /// # Errors
    ///
    /// * the spool cannot be read (immediate only)
    pub async fn add_header(
        &mut self,
        name: &str,
        value: &str,
        immediate: bool,
    ) -> std::io::Result<()> {
        if immediate {
            let mut source = format_header(name, value).into_bytes();
            source.extend_from_slice(&self.source().await?);
            self.modified = Some(source);
            return Ok(());
        }

        if let Some(staged) = self.staged_headers.iter_mut().find(|(n, _)| n == name) {
            staged.1 = value.to_owned();
        } else {
            self.staged_headers.push((name.to_owned(), value.to_owned()));
        }
        Ok(())
    }

    /// Headers waiting to be written on re-injection, in staging order.
    #[must_use]
    #[inline]
    pub fn staged_headers(&self) -> &[(String, String)] {
        &self.staged_headers
    }

    /// Bytes to re-inject: staged headers followed by the current content,
    /// left byte for byte as it is.
    ///
    /// # Errors
    ///
    /// * the spool cannot be read
    pub async fn build_message_source(&self) -> std::io::Result<Vec<u8>> {
        let source = self.source().await?;
        let mut out = Vec::with_capacity(source.len() + 80 * self.staged_headers.len());
        for (name, value) in &self.staged_headers {
            out.extend_from_slice(format_header(name, value).as_bytes());
        }
        out.extend_from_slice(&source);
        Ok(out)
    }
}

/// `Name: value\r\n`, non-ascii values as a RFC 2047 encoded-word.
#[must_use]
pub fn format_header(name: &str, value: &str) -> String {
    use base64::Engine;

    if value.is_ascii() {
        format!("{name}: {value}\r\n")
    } else {
        format!(
            "{name}: =?utf-8?b?{}?=\r\n",
            base64::engine::general_purpose::STANDARD.encode(value)
        )
    }
}

/// Header fields of a raw message, stops at the first empty line.
#[must_use]
pub fn parse_headers(source: &[u8]) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = vec![];

    for line in source.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }
        let line = String::from_utf8_lossy(line);

        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }
    }
    headers
}
