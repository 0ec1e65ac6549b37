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

//! Client side of SMTP, used to hand the messages back to the downstream
//! server.

use vfilter_common::Reply;
use vfilter_protocol::{Reader, Writer};

/// Failure to hand a message to the downstream server.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ForwardError {
    /// The downstream server cannot be reached.
    #[error("cannot connect to '{addr}': {source}")]
    Connect {
        ///
        addr: std::net::SocketAddr,
        ///
        source: std::io::Error,
    },
    /// The downstream server took too long to answer.
    #[error("no answer to {step} after {duration:?}")]
    Timeout {
        /// command waiting for a reply
        step: String,
        ///
        duration: std::time::Duration,
    },
    /// The downstream server answered with an error.
    #[error("{step} refused: {}", .reply.text())]
    Refused {
        /// command refused
        step: String,
        /// reply of the downstream server
        reply: Reply,
    },
    /// The connection to the downstream server was closed earlier.
    #[error("connection to the downstream server is closed")]
    Closed,
    /// The connection failed.
    #[error(transparent)]
    Protocol(#[from] vfilter_protocol::Error),
}

impl From<std::io::Error> for ForwardError {
    #[inline]
    fn from(value: std::io::Error) -> Self {
        Self::Protocol(value.into())
    }
}

fn step_of(command: &str) -> String {
    command
        .split(|c: char| c == ':' || c.is_ascii_whitespace())
        .next()
        .unwrap_or(command)
        .to_ascii_uppercase()
}

/// A connection to a SMTP server.
pub struct SmtpClient {
    reader: Reader<tokio::net::tcp::OwnedReadHalf>,
    writer: Writer<tokio::net::tcp::OwnedWriteHalf>,
    timeout: std::time::Duration,
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SmtpClient {
    /// Open a connection and read the greeting. Each step of the
    /// conversation is bound by `timeout`.
    ///
    /// # Errors
    ///
    /// * the server cannot be reached
    /// * the greeting is not positive
    #[tracing::instrument(skip(timeout), err)]
    pub async fn connect(
        addr: std::net::SocketAddr,
        timeout: std::time::Duration,
    ) -> Result<(Self, Reply), ForwardError> {
        let stream = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr))
            .await
            .map_err(|_elapsed| ForwardError::Timeout {
                step: "connect".to_owned(),
                duration: timeout,
            })?
            .map_err(|source| ForwardError::Connect { addr, source })?;

        let (read, write) = stream.into_split();
        let mut client = Self {
            reader: Reader::new(read),
            writer: Writer::new(write),
            timeout,
        };

        let banner = client.read_reply("banner").await?;
        if !banner.code().is_positive() {
            return Err(ForwardError::Refused {
                step: "connect".to_owned(),
                reply: banner,
            });
        }
        Ok((client, banner))
    }

    async fn read_reply(&mut self, step: &str) -> Result<Reply, ForwardError> {
        tokio::time::timeout(self.timeout, self.reader.read_reply())
            .await
            .map_err(|_elapsed| ForwardError::Timeout {
                step: step.to_owned(),
                duration: self.timeout,
            })?
            .map_err(ForwardError::from)
    }

    /// Send a command and return the reply, whatever its code.
    ///
    /// # Errors
    ///
    /// * the connection failed or timed out
    pub async fn command(&mut self, command: &str) -> Result<Reply, ForwardError> {
        let step = step_of(command);
        tokio::time::timeout(self.timeout, self.writer.send_command(command))
            .await
            .map_err(|_elapsed| ForwardError::Timeout {
                step: step.clone(),
                duration: self.timeout,
            })??;
        self.read_reply(&step).await
    }

    /// Send a command, a reply which is not positive is an error.
    ///
    /// # Errors
    ///
    /// * see [`SmtpClient::command`]
    /// * the reply is not positive
    pub async fn expect(&mut self, command: &str) -> Result<Reply, ForwardError> {
        let reply = self.command(command).await?;
        if reply.code().is_positive() {
            Ok(reply)
        } else {
            Err(ForwardError::Refused {
                step: step_of(command),
                reply,
            })
        }
    }

    /// Greet the server with EHLO, or HELO if EHLO is not supported.
    ///
    /// # Errors
    ///
    /// * see [`SmtpClient::expect`]
    pub async fn hello(&mut self, name: &str) -> Result<Reply, ForwardError> {
        let reply = self.command(&format!("EHLO {name}")).await?;
        if reply.code().is_permanent() {
            tracing::debug!("EHLO not supported, falling back to HELO.");
            return self.expect(&format!("HELO {name}")).await;
        }
        if reply.code().is_positive() {
            Ok(reply)
        } else {
            Err(ForwardError::Refused {
                step: "EHLO".to_owned(),
                reply,
            })
        }
    }

    /// Send the content of a message once the envelope was accepted, and
    /// return the final reply.
    ///
    /// # Errors
    ///
    /// * DATA is refused
    /// * the content is refused
    pub async fn data(&mut self, content: &[u8]) -> Result<Reply, ForwardError> {
        self.expect("DATA").await?;

        tokio::time::timeout(self.timeout, self.writer.send_data_block(content))
            .await
            .map_err(|_elapsed| ForwardError::Timeout {
                step: "message content".to_owned(),
                duration: self.timeout,
            })??;

        let reply = self.read_reply("end of data").await?;
        if reply.code().is_positive() {
            Ok(reply)
        } else {
            Err(ForwardError::Refused {
                step: "end of data".to_owned(),
                reply,
            })
        }
    }

    /// Send a whole transaction: envelope then content.
    ///
    /// # Errors
    ///
    /// * a step of the transaction is refused
    pub async fn send_message(
        &mut self,
        from: &str,
        to: &[String],
        content: &[u8],
    ) -> Result<Reply, ForwardError> {
        self.expect(&format!("MAIL FROM:<{from}>")).await?;
        for rcpt in to {
            self.expect(&format!("RCPT TO:<{rcpt}>")).await?;
        }
        self.data(content).await
    }

    /// Say goodbye and close the connection, errors are only logged.
    pub async fn quit(mut self) {
        if let Err(e) = self.command("QUIT").await {
            tracing::debug!(%e, "QUIT not acknowledged.");
        }
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!(%e, "Connection already closed.");
        }
    }
}

/// Re-inject a message to `downstream` in a transaction of its own, and
/// return the final reply of the server.
///
/// # Errors
///
/// * see [`ForwardError`]
#[tracing::instrument(skip(helo, timeout, to, content), fields(size = content.len()), err)]
pub async fn forward(
    downstream: std::net::SocketAddr,
    helo: &str,
    timeout: std::time::Duration,
    from: &str,
    to: &[String],
    content: &[u8],
) -> Result<Reply, ForwardError> {
    let (mut client, _banner) = SmtpClient::connect(downstream, timeout).await?;

    let reply = match client.hello(helo).await {
        Ok(_) => client.send_message(from, to, content).await,
        Err(e) => Err(e),
    };
    client.quit().await;

    if let Ok(reply) = &reply {
        tracing::debug!(reply = %reply.text(), "Message handed to the downstream server.");
    }
    reply
}
