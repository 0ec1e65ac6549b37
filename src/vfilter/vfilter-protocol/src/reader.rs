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
    command::{parse_command_line, Command, MAX_LINE_SIZE},
    DataError, Error, UnparsedArgs, Verb,
};
use bytes::Buf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use vfilter_common::Reply;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    LineStart,
    Dot,
    DotCr,
    Text,
    Cr,
}

/// Incremental decoder of a DATA block: removes the stuffed dots and stops
/// on the `<CRLF>.<CRLF>` terminator, whatever the chunking of the input.
#[derive(Debug)]
pub struct DataDecoder {
    state: State,
}

impl Default for DataDecoder {
    #[inline]
    fn default() -> Self {
        // the block starts right after "DATA\r\n"
        Self {
            state: State::LineStart,
        }
    }
}

impl DataDecoder {
    /// Decode `input` into `out`.
    ///
    /// Returns the number of bytes consumed, and `true` if the terminator
    /// was reached (the bytes after it are left untouched).
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> (usize, bool) {
        for (idx, byte) in input.iter().copied().enumerate() {
            self.state = match (self.state, byte) {
                (State::LineStart, b'.') => State::Dot,
                (State::Dot, b'\r') => State::DotCr,
                (State::DotCr, b'\n') => return (idx + 1, true),
                (State::DotCr, _) => {
                    out.push(b'\r');
                    out.push(byte);
                    if byte == b'\r' {
                        State::Cr
                    } else {
                        State::Text
                    }
                }
                (State::LineStart | State::Dot | State::Text | State::Cr, b'\r') => {
                    out.push(byte);
                    State::Cr
                }
                (State::Cr, b'\n') => {
                    out.push(byte);
                    State::LineStart
                }
                (State::LineStart | State::Dot | State::Text | State::Cr, _) => {
                    out.push(byte);
                    State::Text
                }
            };
        }
        (input.len(), false)
    }
}

/// Stream of bytes received from a peer.
pub struct Reader<R: tokio::io::AsyncRead + Unpin + Send> {
    inner: R,
    additional_reserve: usize,
    buffer: bytes::BytesMut,
}

impl<R: tokio::io::AsyncRead + Unpin + Send> Reader<R> {
    /// Create a new stream.
    #[must_use]
    #[inline]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            additional_reserve: 1024,
            buffer: bytes::BytesMut::with_capacity(1024),
        }
    }

    /// Consume the instance and return the underlying reader.
    #[must_use]
    #[inline]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn fill(&mut self) -> std::io::Result<usize> {
        self.buffer.reserve(self.additional_reserve);
        self.inner.read_buf(&mut self.buffer).await
    }

    /// Read a line, CRLF excluded. `None` if the peer closed the connection
    /// between two lines.
    ///
    /// A line longer than `max_size` is read until its end and discarded.
    ///
    /// # Errors
    ///
    /// * the peer closed the connection in the middle of a line
    /// * the line is longer than `max_size`
    /// * [`std::io::Error`] produced by the underlying reader
    pub async fn read_line(&mut self, max_size: Option<usize>) -> Result<Option<Vec<u8>>, Error> {
        let mut searched = 0;
        let mut dropped = 0;

        loop {
            if let Some(pos) = memchr::memmem::find(&self.buffer[searched..], b"\r\n") {
                let pos = searched + pos;
                let line = self.buffer.split_to(pos + 2);

                if let Some(max_size) = max_size {
                    if dropped != 0 || pos > max_size {
                        return Err(Error::buffer_too_long(max_size, dropped + pos));
                    }
                }
                return Ok(Some(line[..pos].to_vec()));
            }

            if let Some(max_size) = max_size {
                if self.buffer.len() > max_size + 1 {
                    let keep_cr = self.buffer.last() == Some(&b'\r');
                    dropped += self.buffer.len() - usize::from(keep_cr);
                    self.buffer.clear();
                    if keep_cr {
                        self.buffer.extend_from_slice(b"\r");
                    }
                }
            }
            searched = self.buffer.len().saturating_sub(1);

            if self.fill().await? == 0 {
                return if self.buffer.is_empty() && dropped == 0 {
                    Ok(None)
                } else {
                    Err(Error::unexpected_eof())
                };
            }
        }
    }

    /// Read and split the next command. `None` if the peer closed the connection.
    ///
    /// # Errors
    ///
    /// * see [`Reader::read_line`]
    pub async fn read_command(&mut self) -> Result<Option<Command<Verb, UnparsedArgs>>, Error> {
        match self.read_line(Some(MAX_LINE_SIZE)).await? {
            Some(line) => {
                tracing::trace!("<< {:?}", String::from_utf8_lossy(&line));
                parse_command_line(&line).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Read a DATA block into `sink`, dot-unstuffed and without the terminator.
    ///
    /// The content is written as it arrives. Once `size_limit` is exceeded
    /// the rest of the block is read and dropped.
    ///
    /// # Errors
    ///
    /// * [`DataError::CouldNotWrite`] the sink failed
    /// * [`DataError::TooLarge`] the block exceeded the limit
    /// * [`DataError::Transport`] the peer failed or left
    pub async fn read_data_block<W>(
        &mut self,
        sink: &mut W,
        size_limit: Option<usize>,
    ) -> Result<usize, DataError>
    where
        W: tokio::io::AsyncWrite + Unpin + Send,
    {
        let mut decoder = DataDecoder::default();
        let mut out = Vec::with_capacity(self.additional_reserve);
        let mut size = 0;
        let mut too_large = false;

        loop {
            let (consumed, done) = decoder.decode(&self.buffer, &mut out);
            self.buffer.advance(consumed);

            size += out.len();
            if size_limit.map_or(false, |limit| size > limit) {
                too_large = true;
            }
            if !too_large {
                sink.write_all(&out)
                    .await
                    .map_err(DataError::CouldNotWrite)?;
            }
            out.clear();

            if done {
                sink.flush().await.map_err(DataError::CouldNotWrite)?;
                return match size_limit {
                    Some(limit) if too_large => Err(DataError::TooLarge { limit, got: size }),
                    _ => Ok(size),
                };
            }

            if self.fill().await.map_err(Error::from)? == 0 {
                return Err(Error::unexpected_eof().into());
            }
        }
    }

    /// Copy everything up to the end of the stream into `sink`.
    ///
    /// # Errors
    ///
    /// * [`DataError::CouldNotWrite`] the sink failed
    /// * [`DataError::TooLarge`] the stream exceeded the limit
    /// * [`DataError::Transport`] the peer failed
    pub async fn read_to_end<W>(
        &mut self,
        sink: &mut W,
        size_limit: Option<usize>,
    ) -> Result<usize, DataError>
    where
        W: tokio::io::AsyncWrite + Unpin + Send,
    {
        let mut size = 0;
        loop {
            size += self.buffer.len();
            if size_limit.map_or(true, |limit| size <= limit) {
                sink.write_all(&self.buffer)
                    .await
                    .map_err(DataError::CouldNotWrite)?;
            }
            self.buffer.clear();

            if self.fill().await.map_err(Error::from)? == 0 {
                sink.flush().await.map_err(DataError::CouldNotWrite)?;
                return match size_limit {
                    Some(limit) if size > limit => Err(DataError::TooLarge { limit, got: size }),
                    _ => Ok(size),
                };
            }
        }
    }

    /// Read exactly `size` bytes. `None` if the peer closed the connection
    /// before sending anything.
    ///
    /// # Errors
    ///
    /// * the peer closed the connection after a partial read
    /// * [`std::io::Error`] produced by the underlying reader
    pub async fn read_exact(&mut self, size: usize) -> Result<Option<Vec<u8>>, Error> {
        while self.buffer.len() < size {
            if self.fill().await? == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(Error::unexpected_eof())
                };
            }
        }
        Ok(Some(self.buffer.split_to(size).to_vec()))
    }

    /// Read a reply, possibly spread on several lines.
    ///
    /// # Errors
    ///
    /// * the peer closed the connection before the final line
    /// * the reply is malformed
    pub async fn read_reply(&mut self) -> Result<Reply, Error> {
        let mut raw = Vec::with_capacity(MAX_LINE_SIZE);
        loop {
            let line = self
                .read_line(None)
                .await?
                .ok_or_else(Error::unexpected_eof)?;

            raw.extend_from_slice(&line);
            raw.extend_from_slice(b"\r\n");
            if line.get(3) != Some(&b'-') {
                break;
            }
        }

        let raw = std::str::from_utf8(&raw)?;
        tracing::trace!("<< {:?}", raw);
        raw.parse::<Reply>()
            .map_err(|e| Error::invalid_data(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_chunked(input: &[u8], chunk: usize) -> (Vec<u8>, usize) {
        let mut decoder = DataDecoder::default();
        let mut out = vec![];
        let mut offset = 0;
        for part in input.chunks(chunk) {
            let (consumed, done) = decoder.decode(part, &mut out);
            offset += consumed;
            if done {
                return (out, offset);
            }
        }
        panic!("no terminator found");
    }

    #[rstest::rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(5)]
    #[case(1024)]
    fn terminator_across_chunks(#[case] chunk: usize) {
        let input = b"Subject: a\r\n\r\nline\r\n..dot\r\n.\r\nQUIT\r\n";
        let (out, consumed) = decode_chunked(input, chunk);
        assert_eq!(out, b"Subject: a\r\n\r\nline\r\n.dot\r\n".to_vec());
        assert_eq!(&input[consumed..], b"QUIT\r\n");
    }

    #[test]
    fn empty_block() {
        let (out, consumed) = decode_chunked(b".\r\n", 1024);
        assert!(out.is_empty());
        assert_eq!(consumed, 3);
    }

    #[test]
    fn lone_dots_are_not_terminators() {
        let (out, _) = decode_chunked(b"a.\r\n.x\r\n. \r\n.\rb\r\n.\r\n", 1024);
        assert_eq!(out, b"a.\r\nx\r\n \r\n\rb\r\n".to_vec());
    }

    #[tokio::test]
    async fn lines() {
        let mut reader = Reader::new(std::io::Cursor::new(b"HELO a\r\nNOOP\r\n".to_vec()));
        assert_eq!(reader.read_line(None).await.unwrap(), Some(b"HELO a".to_vec()));
        assert_eq!(reader.read_line(None).await.unwrap(), Some(b"NOOP".to_vec()));
        assert_eq!(reader.read_line(None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn disconnect_in_the_middle_of_a_line() {
        let mut reader = Reader::new(std::io::Cursor::new(b"HELO a".to_vec()));
        assert_eq!(
            reader.read_line(None).await.unwrap_err().kind(),
            crate::ErrorKind::UnexpectedEof
        );
    }

    #[tokio::test]
    async fn long_line_is_skipped() {
        let input = [vec![b'a'; 3000], b"\r\nNOOP\r\n".to_vec()].concat();
        let mut reader = Reader::new(std::io::Cursor::new(input));

        assert!(reader.read_command().await.unwrap_err().is_too_long());
        assert_eq!(
            reader.read_command().await.unwrap(),
            Some((Verb::Noop, UnparsedArgs(vec![])))
        );
    }

    #[tokio::test]
    async fn data_block_then_command() {
        let mut reader = Reader::new(std::io::Cursor::new(
            b"Subject: a\r\n\r\n..hidden\r\n.\r\nQUIT\r\n".to_vec(),
        ));
        let mut sink = Vec::<u8>::new();

        assert_eq!(reader.read_data_block(&mut sink, None).await.unwrap(), 23);
        assert_eq!(sink, b"Subject: a\r\n\r\n.hidden\r\n".to_vec());
        assert_eq!(
            reader.read_command().await.unwrap(),
            Some((Verb::Quit, UnparsedArgs(vec![])))
        );
    }

    #[tokio::test]
    async fn data_block_too_large() {
        let mut reader = Reader::new(std::io::Cursor::new(
            b"0123456789\r\n0123456789\r\n.\r\nQUIT\r\n".to_vec(),
        ));
        let mut sink = Vec::<u8>::new();

        assert!(matches!(
            reader.read_data_block(&mut sink, Some(10)).await,
            Err(DataError::TooLarge { limit: 10, got: 24 })
        ));
        assert!(sink.is_empty());
        assert_eq!(
            reader.read_command().await.unwrap(),
            Some((Verb::Quit, UnparsedArgs(vec![])))
        );
    }

    #[tokio::test]
    async fn data_block_unterminated() {
        let mut reader = Reader::new(std::io::Cursor::new(b"body\r\n".to_vec()));
        assert!(matches!(
            reader.read_data_block(&mut Vec::<u8>::new(), None).await,
            Err(DataError::Transport(_))
        ));
    }

    struct BrokenSink;

    impl tokio::io::AsyncWrite for BrokenSink {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
            _: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn spool_failure_is_distinct() {
        let mut reader = Reader::new(std::io::Cursor::new(b"body\r\n.\r\n".to_vec()));
        assert!(matches!(
            reader.read_data_block(&mut BrokenSink, None).await,
            Err(DataError::CouldNotWrite(_))
        ));
    }

    #[tokio::test]
    async fn multi_line_reply() {
        let mut reader = Reader::new(std::io::Cursor::new(
            b"250-mx.example.com\r\n250-SIZE 1000\r\n250 HELP\r\n220 next\r\n".to_vec(),
        ));
        let reply = reader.read_reply().await.unwrap();
        assert_eq!(reply.lines(), ["mx.example.com", "SIZE 1000", "HELP"]);
        assert_eq!(reader.read_reply().await.unwrap().code().value(), 220);
    }

    #[tokio::test]
    async fn to_end() {
        let mut reader = Reader::new(std::io::Cursor::new(b"raw\r\n.\r\nbytes".to_vec()));
        let mut sink = Vec::<u8>::new();
        assert_eq!(reader.read_to_end(&mut sink, None).await.unwrap(), 13);
        assert_eq!(sink, b"raw\r\n.\r\nbytes".to_vec());
    }

    #[tokio::test]
    async fn exact() {
        let mut reader = Reader::new(std::io::Cursor::new(b"\x00\x00\x00\x01Q".to_vec()));
        assert_eq!(reader.read_exact(4).await.unwrap(), Some(vec![0, 0, 0, 1]));
        assert_eq!(reader.read_exact(1).await.unwrap(), Some(b"Q".to_vec()));
        assert_eq!(reader.read_exact(4).await.unwrap(), None);
    }
}
