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

use tokio::io::AsyncWriteExt;
use vfilter_common::Reply;

/// Double the dot starting a line, `None` when the data has no such line.
#[must_use]
pub fn apply_dot_stuffing(data: &[u8]) -> Option<Vec<u8>> {
    if !data.starts_with(b".") && memchr::memmem::find(data, b"\r\n.").is_none() {
        return None;
    }

    let mut stuffed = Vec::with_capacity(data.len() + 16);
    if data.starts_with(b".") {
        stuffed.push(b'.');
    }
    let mut last_idx = 0;
    for i in memchr::memmem::find_iter(data, b"\r\n.") {
        stuffed.extend_from_slice(&data[last_idx..i + 2]);
        stuffed.push(b'.');
        last_idx = i + 2;
    }
    stuffed.extend_from_slice(&data[last_idx..]);
    Some(stuffed)
}

/// Sink for sending replies and commands to a peer.
pub struct Writer<W: tokio::io::AsyncWrite + Unpin + Send> {
    inner: W,
}

impl<W: tokio::io::AsyncWrite + Unpin + Send> AsMut<W> for Writer<W> {
    #[inline]
    fn as_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: tokio::io::AsyncWrite + Unpin + Send> Writer<W> {
    /// Create a new instance
    #[inline]
    #[must_use]
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Consume the instance and return the underlying writer.
    #[inline]
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Send the buffer to the peer.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    #[inline]
    pub async fn write_all(&mut self, buffer: &str) -> std::io::Result<()> {
        tracing::trace!(">> {:?}", buffer);
        self.write_all_bytes(buffer.as_bytes()).await
    }

    /// Send the buffer to the peer.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    #[inline]
    pub async fn write_all_bytes(&mut self, buffer: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(buffer).await?;
        self.inner.flush().await
    }

    /// Send a reply, using the continuation grammar for multi-line replies.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    #[inline]
    pub async fn send_reply(&mut self, reply: &Reply) -> std::io::Result<()> {
        self.write_all(&reply.to_string()).await
    }

    /// Send a command line, CRLF is appended.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    #[inline]
    pub async fn send_command(&mut self, command: &str) -> std::io::Result<()> {
        self.write_all(&format!("{command}\r\n")).await
    }

    /// Send the content of a message, dot-stuffed and terminated.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    pub async fn send_data_block(&mut self, data: &[u8]) -> std::io::Result<()> {
        let stuffed = apply_dot_stuffing(data);
        let data = stuffed.as_deref().unwrap_or(data);

        let marker: &[u8] = if data.is_empty() || data.ends_with(b"\r\n") {
            b".\r\n"
        } else {
            b"\r\n.\r\n"
        };
        tracing::trace!(">> {} bytes of data", data.len());
        self.inner.write_all(data).await?;
        self.inner.write_all(marker).await?;
        self.inner.flush().await
    }

    /// Close the writing side.
    ///
    /// # Errors
    ///
    /// * [`std::io::Error`] produced by the underlying writer
    #[inline]
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }
}
