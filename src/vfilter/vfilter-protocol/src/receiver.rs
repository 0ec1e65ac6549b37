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
    reader::Reader,
    session::{Event, Session},
    writer::Writer,
    DataError, Error,
};
use vfilter_common::Reply;

enum HandshakeOutcome {
    Quit,
}

/// An handle to send event from the [`ReceiverHandler`] to the [`Receiver`].
#[allow(clippy::module_name_repetitions)]
#[derive(Default)]
pub struct ReceiverContext {
    outcome: Option<HandshakeOutcome>,
}

impl ReceiverContext {
    /// Make the [`Receiver`] close the connection once the current reply is sent.
    #[inline]
    pub fn deny(&mut self) {
        self.outcome = Some(HandshakeOutcome::Quit);
    }

    fn is_closing(&self) -> bool {
        matches!(self.outcome, Some(HandshakeOutcome::Quit))
    }
}

/// Behavior of a dialect of the SMTP family, driven by a [`Receiver`].
#[async_trait::async_trait]
pub trait ReceiverHandler {
    /// Where the content of a message is written.
    type Spool: tokio::io::AsyncWrite + Unpin + Send;

    /// Greeting of the connection.
    async fn on_accept(&mut self, ctx: &mut ReceiverContext) -> Reply;

    /// Reply to a command. The session is updated with the event only if the
    /// reply is positive.
    async fn on_event(
        &mut self,
        ctx: &mut ReceiverContext,
        session: &Session,
        event: &Event,
    ) -> Reply;

    /// DATA was received in the right stage, open the spool. An error
    /// reply refuses the command.
    async fn on_data(
        &mut self,
        ctx: &mut ReceiverContext,
        session: &Session,
    ) -> Result<Self::Spool, Reply>;

    /// The content was received, or failed to be.
    async fn on_message(
        &mut self,
        ctx: &mut ReceiverContext,
        session: &Session,
        spool: Self::Spool,
        received: Result<usize, DataError>,
    ) -> Reply;

    /// A command line exceeded the maximum size.
    async fn on_line_too_long(&mut self, _: &mut ReceiverContext) -> Reply {
        Reply::new(500, "Line too long")
    }

    /// The connection is about to be closed.
    async fn on_close(&mut self) {}
}

/// Drives one connection of the SMTP family: reads the commands, checks them
/// against the [`Session`], and delegates the replies to a [`ReceiverHandler`].
pub struct Receiver<R: tokio::io::AsyncRead + Unpin + Send, W: tokio::io::AsyncWrite + Unpin + Send> {
    stream: Reader<R>,
    sink: Writer<W>,
    session: Session,
    context: ReceiverContext,
    command_timeout: std::time::Duration,
    message_size_max: Option<usize>,
}

impl Receiver<tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf> {
    /// Create a new [`Receiver`] from a TCP/IP stream.
    #[must_use]
    #[inline]
    pub fn from_tcp(
        tcp_stream: tokio::net::TcpStream,
        session: Session,
        command_timeout: std::time::Duration,
        message_size_max: Option<usize>,
    ) -> Self {
        let (read, write) = tcp_stream.into_split();
        Self::new(read, write, session, command_timeout, message_size_max)
    }
}

impl<R: tokio::io::AsyncRead + Unpin + Send, W: tokio::io::AsyncWrite + Unpin + Send> Receiver<R, W> {
    /// Create a new [`Receiver`].
    #[must_use]
    #[inline]
    pub fn new(
        read: R,
        write: W,
        session: Session,
        command_timeout: std::time::Duration,
        message_size_max: Option<usize>,
    ) -> Self {
        Self {
            stream: Reader::new(read),
            sink: Writer::new(write),
            session,
            context: ReceiverContext::default(),
            command_timeout,
            message_size_max,
        }
    }

    /// Serve the connection until the peer quits or leaves.
    ///
    /// # Errors
    ///
    /// * the connection failed
    pub async fn run<H: ReceiverHandler + Send>(mut self, handler: &mut H) -> Result<(), Error> {
        let result = self.serve(handler).await;
        handler.on_close().await;
        if let Err(e) = self.sink.shutdown().await {
            tracing::debug!(%e, "Connection already closed.");
        }
        result
    }

    async fn serve<H: ReceiverHandler + Send>(&mut self, handler: &mut H) -> Result<(), Error> {
        let greeting = handler.on_accept(&mut self.context).await;
        self.sink.send_reply(&greeting).await?;
        if self.context.is_closing() {
            return Ok(());
        }

        loop {
            let command =
                match tokio::time::timeout(self.command_timeout, self.stream.read_command()).await {
                    Ok(Ok(Some(command))) => command,
                    Ok(Ok(None)) => {
                        tracing::debug!("Client closed the connection.");
                        return Ok(());
                    }
                    Ok(Err(e)) if e.is_too_long() => {
                        let reply = handler.on_line_too_long(&mut self.context).await;
                        self.sink.send_reply(&reply).await?;
                        continue;
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_elapsed) => {
                        tracing::warn!(
                            "Closing after {} without receiving a command",
                            humantime::format_duration(self.command_timeout)
                        );
                        self.sink
                            .send_reply(&Reply::new(451, "Timeout - closing connection"))
                            .await?;
                        return Ok(());
                    }
                };

            let (verb, args) = command;
            let event = self.session.classify(verb, args);
            tracing::trace!(stage = %self.session.stage(), ?event);

            if event == Event::Data {
                self.handle_data(handler).await?;
            } else {
                let reply = handler
                    .on_event(&mut self.context, &self.session, &event)
                    .await;
                if reply.code().is_positive() {
                    self.session.commit(&event);
                }
                self.sink.send_reply(&reply).await?;

                if event == Event::Quit {
                    return Ok(());
                }
            }

            if self.context.is_closing() {
                return Ok(());
            }
        }
    }

    async fn handle_data<H: ReceiverHandler + Send>(&mut self, handler: &mut H) -> Result<(), Error> {
        let mut spool = match handler.on_data(&mut self.context, &self.session).await {
            Ok(spool) => spool,
            Err(reply) => {
                self.sink.send_reply(&reply).await?;
                return Ok(());
            }
        };
        self.session.commit(&Event::Data);
        self.sink
            .send_reply(&Event::Data.default_reply(""))
            .await?;

        let received = self
            .stream
            .read_data_block(&mut spool, self.message_size_max)
            .await;
        let broken = matches!(received, Err(DataError::Transport(_)));
        if let Err(e) = &received {
            tracing::warn!(%e, "Message not received completely.");
        }

        let reply = handler
            .on_message(&mut self.context, &self.session, spool, received)
            .await;
        self.session.end_transaction();

        if broken {
            self.context.deny();
            return Ok(());
        }
        self.sink.send_reply(&reply).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncReadExt;

    #[derive(Default)]
    struct Recorder {
        messages: Vec<(String, Vec<String>, Vec<u8>)>,
    }

    #[async_trait::async_trait]
    impl ReceiverHandler for Recorder {
        type Spool = Vec<u8>;

        async fn on_accept(&mut self, _: &mut ReceiverContext) -> Reply {
            Reply::new(220, "test Service ready")
        }

        async fn on_event(&mut self, _: &mut ReceiverContext, _: &Session, event: &Event) -> Reply {
            event.default_reply("test")
        }

        async fn on_data(&mut self, _: &mut ReceiverContext, _: &Session) -> Result<Vec<u8>, Reply> {
            Ok(vec![])
        }

        async fn on_message(
            &mut self,
            _: &mut ReceiverContext,
            session: &Session,
            spool: Vec<u8>,
            received: Result<usize, DataError>,
        ) -> Reply {
            match received {
                Ok(_) => {
                    self.messages.push((
                        session.from().unwrap_or_default().to_owned(),
                        session.recipients().to_vec(),
                        spool,
                    ));
                    Reply::new(250, "Ok: queued")
                }
                Err(DataError::TooLarge { .. }) => Reply::new(552, "Too large"),
                Err(_) => Reply::new(451, "Local error"),
            }
        }
    }

    async fn exchange(input: &str, size_max: Option<usize>) -> (String, Recorder) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        tokio::io::AsyncWriteExt::write_all(&mut client_write, input.as_bytes())
            .await
            .unwrap();

        let mut handler = Recorder::default();
        Receiver::new(
            server_read,
            server_write,
            Session::default(),
            std::time::Duration::from_secs(5),
            size_max,
        )
        .run(&mut handler)
        .await
        .unwrap();

        let mut output = String::new();
        client_read.read_to_string(&mut output).await.unwrap();
        (output, handler)
    }

    #[tokio::test]
    async fn one_message() {
        let (output, handler) = exchange(
            &[
                "HELO a\r\n",
                "MAIL FROM:<s@x.com>\r\n",
                "RCPT TO:<r@y.com>\r\n",
                "DATA\r\n",
                "Subject: test\r\n\r\nhello\r\n.\r\n",
                "QUIT\r\n",
            ]
            .concat(),
            None,
        )
        .await;

        assert_eq!(
            output,
            [
                "220 test Service ready\r\n",
                "250 test\r\n",
                "250 Ok\r\n",
                "250 Ok\r\n",
                "354 Enter data, end with <CRLF>.<CRLF>\r\n",
                "250 Ok: queued\r\n",
                "221 test Service closing transmission channel\r\n",
            ]
            .concat()
        );
        assert_eq!(
            handler.messages,
            [(
                "s@x.com".to_owned(),
                vec!["r@y.com".to_owned()],
                b"Subject: test\r\n\r\nhello\r\n".to_vec()
            )]
        );
    }

    #[tokio::test]
    async fn rcpt_before_mail() {
        let (output, handler) = exchange(
            "HELO a\r\nRCPT TO:<r@y.com>\r\nDATA\r\nQUIT\r\n",
            None,
        )
        .await;

        assert_eq!(
            output,
            [
                "220 test Service ready\r\n",
                "250 test\r\n",
                "503 Bad command sequence\r\n",
                "503 Bad command sequence\r\n",
                "221 test Service closing transmission channel\r\n",
            ]
            .concat()
        );
        assert!(handler.messages.is_empty());
    }

    #[tokio::test]
    async fn two_transactions() {
        let transaction = "MAIL FROM:<s@x.com>\r\nRCPT TO:<r@y.com>\r\nDATA\r\nbody\r\n.\r\n";
        let (_, handler) = exchange(
            &["EHLO a\r\n", transaction, transaction, "QUIT\r\n"].concat(),
            None,
        )
        .await;
        assert_eq!(handler.messages.len(), 2);
    }

    #[tokio::test]
    async fn message_too_large() {
        let (output, handler) = exchange(
            "HELO a\r\nMAIL FROM:<>\r\nRCPT TO:<r@y.com>\r\nDATA\r\n0123456789\r\n.\r\nQUIT\r\n",
            Some(5),
        )
        .await;
        assert!(output.contains("552 Too large\r\n"));
        assert!(output.ends_with("221 test Service closing transmission channel\r\n"));
        assert!(handler.messages.is_empty());
    }

    #[tokio::test]
    async fn peer_leaves() {
        let (output, handler) = exchange("HELO a\r\n", None).await;
        assert_eq!(output, "220 test Service ready\r\n250 test\r\n");
        assert!(handler.messages.is_empty());
    }

    #[tokio::test]
    async fn line_too_long_keeps_session() {
        let long = format!("HELO {}\r\n", "a".repeat(2000));
        let (output, _) = exchange(&[long.as_str(), "NOOP\r\n", "QUIT\r\n"].concat(), None).await;
        assert_eq!(
            output,
            [
                "220 test Service ready\r\n",
                "500 Line too long\r\n",
                "250 Ok\r\n",
                "221 test Service closing transmission channel\r\n",
            ]
            .concat()
        );
    }
}
