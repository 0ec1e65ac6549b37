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

//! Sendmail milter protocol: the MTA sends the message piece by piece and
//! asks for a verdict at the end of the body.

use super::{client_info, open_spool, ProtocolHandler};
use crate::{controller::Controller, forward::ForwardError};
use tokio::io::AsyncWriteExt;
use vfilter_common::{suspect::parse_headers, Action, ClientInfo, Spool, Suspect, SuspectId};
use vfilter_protocol::{
    milter::{Command, Response},
    Reader, Writer,
};

struct Message {
    id: SuspectId,
    spool: Spool,
    writer: tokio::io::BufWriter<tokio::fs::File>,
    size: usize,
    broken: bool,
}

/// Handler of a connection of the `milter` dialect.
pub struct Milter {
    controller: Controller,
    client_info: ClientInfo,
    from: Option<String>,
    recipients: Vec<String>,
    message: Option<Message>,
}

fn unbracket(arg: &str) -> String {
    arg.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_owned()
}

fn split_body(source: &[u8]) -> &[u8] {
    source
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map_or(&source[source.len()..], |pos| &source[pos + 4..])
}

/// Headers present in `modified` and not in `original`, as many times as
/// they were added.
fn added_headers(original: &[u8], modified: &[u8]) -> Vec<(String, String)> {
    let mut remaining = parse_headers(original);
    parse_headers(modified)
        .into_iter()
        .filter(|header| {
            remaining
                .iter()
                .position(|h| h == header)
                .map(|pos| remaining.remove(pos))
                .is_none()
        })
        .collect()
}

impl Milter {
    ///
    #[must_use]
    pub fn new(controller: Controller) -> Self {
        Self {
            controller,
            client_info: ClientInfo::default(),
            from: None,
            recipients: vec![],
            message: None,
        }
    }

    /// Serve the connection until the MTA quits.
    ///
    /// # Errors
    ///
    /// * the connection failed
    /// * a packet is malformed
    pub async fn serve(mut self, stream: tokio::net::TcpStream) -> Result<(), vfilter_protocol::Error> {
        let peer = stream.peer_addr()?;
        let (read, write) = stream.into_split();
        let (mut reader, mut writer) = (Reader::new(read), Writer::new(write));
        let timeout = self.controller.config().main.command_timeout;

        loop {
            let command = tokio::time::timeout(timeout, Command::read(&mut reader))
                .await
                .map_err(|_elapsed| {
                    vfilter_protocol::Error::timeout(timeout, "waiting for a milter command")
                })??;
            let Some(command) = command else {
                tracing::debug!("MTA closed the connection.");
                break;
            };

            let Some(responses) = self.on_command(command, peer).await else {
                break;
            };
            for response in responses {
                tracing::trace!(?response, ">> milter");
                writer.write_all_bytes(&response.encode()).await?;
            }
        }

        if let Err(e) = writer.shutdown().await {
            tracing::debug!(%e, "Connection already closed.");
        }
        Ok(())
    }

    fn reset_message(&mut self) {
        self.from = None;
        self.recipients.clear();
        self.message = None;
    }

    async fn write(&mut self, bytes: &[u8]) -> Vec<Response> {
        if self.message.is_none() {
            match open_spool(&self.controller.config().main.spool_dir).await {
                Ok((id, spool, writer)) => {
                    self.message = Some(Message {
                        id,
                        spool,
                        writer,
                        size: 0,
                        broken: false,
                    });
                }
                Err(e) => {
                    tracing::error!(%e, "Could not create the spool file.");
                    return vec![Response::TempFail];
                }
            }
        }
        let limit = self.controller.config().main.max_message_size;
        let Some(message) = &mut self.message else {
            return vec![Response::TempFail];
        };

        message.size += bytes.len();
        if message.broken || (limit != 0 && message.size > limit) {
            return vec![Response::Continue];
        }
        if let Err(e) = message.writer.write_all(bytes).await {
            tracing::error!(%e, "Could not write the spool file.");
            message.broken = true;
            return vec![Response::TempFail];
        }
        vec![Response::Continue]
    }

    /// Responses to a command, `None` to close the connection.
    async fn on_command(&mut self, command: Command, peer: std::net::SocketAddr) -> Option<Vec<Response>> {
        tracing::trace!(?command, "<< milter");
        let responses = match command {
            Command::OptNeg {
                version, actions, ..
            } => vec![Response::negotiate(version, actions)],
            Command::Macro { .. } => vec![],
            Command::Connect {
                hostname, address, ..
            } => {
                self.client_info.rdns = Some(hostname);
                self.client_info.addr = address;
                vec![Response::Continue]
            }
            Command::Helo(helo) => {
                self.client_info.helo = Some(helo);
                vec![Response::Continue]
            }
            Command::Mail(args) => {
                self.reset_message();
                self.from = args.first().map(|from| unbracket(from));
                vec![Response::Continue]
            }
            Command::Rcpt(args) => {
                if let Some(rcpt) = args.first() {
                    self.recipients.push(unbracket(rcpt));
                }
                vec![Response::Continue]
            }
            Command::Data | Command::Unknown(_) => vec![Response::Continue],
            Command::Header { name, value } => {
                let separator = if value.starts_with(char::is_whitespace) { "" } else { " " };
                self.write(format!("{name}:{separator}{value}\r\n").as_bytes())
                    .await
            }
            Command::EndOfHeaders => self.write(b"\r\n").await,
            Command::Body(chunk) => self.write(&chunk).await,
            Command::EndOfBody => self.end_of_body(peer).await,
            Command::Abort => {
                self.reset_message();
                vec![]
            }
            Command::Quit => return None,
            Command::QuitNewConnection => {
                self.reset_message();
                self.client_info = ClientInfo::default();
                vec![]
            }
        };
        Some(responses)
    }

    async fn end_of_body(&mut self, peer: std::net::SocketAddr) -> Vec<Response> {
        if self.message.is_none() {
            // no header nor body: an empty message
            let empty = self.write(b"").await;
            if empty != [Response::Continue] {
                return empty;
            }
        }
        let Some(Message {
            id,
            spool,
            mut writer,
            size,
            broken,
        }) = self.message.take()
        else {
            return vec![Response::TempFail];
        };

        if broken {
            return vec![Response::TempFail];
        }
        let limit = self.controller.config().main.max_message_size;
        if limit != 0 && size > limit {
            tracing::info!(limit, got = size, "Message refused, too large.");
            return vec![Response::ReplyCode(
                "552 5.3.4 Message size exceeds fixed maximum message size".to_owned(),
            )];
        }
        if let Err(e) = writer.shutdown().await {
            tracing::error!(%e, "Could not write the spool file.");
            return vec![Response::TempFail];
        }
        drop(writer);

        let from = self.from.take().unwrap_or_default();
        let recipients = std::mem::take(&mut self.recipients);
        let mut suspect = match Suspect::new(
            id,
            &from,
            &recipients,
            spool,
            self.controller.config().main.address_validation,
        )
        .await
        {
            Ok(suspect) => suspect,
            Err(e) => {
                tracing::warn!(%e, "Message refused.");
                return vec![Response::ReplyCode(format!("554 5.5.0 Transaction failed: {e}"))];
            }
        };
        suspect.set_client_info(client_info(&self.client_info, None, peer));

        let controller = self.controller.clone();
        controller.dispose(self, suspect).await
    }
}

#[async_trait::async_trait]
impl ProtocolHandler for Milter {
    type Outcome = Vec<Response>;

    async fn commit(
        &mut self,
        suspect: &Suspect,
        action: Action,
        _: Option<&str>,
    ) -> Result<Vec<Response>, ForwardError> {
        let mut responses = suspect
            .staged_headers()
            .iter()
            .map(|(name, value)| Response::AddHeader {
                name: name.clone(),
                value: value.clone(),
            })
            .collect::<Vec<_>>();

        if suspect.is_modified() {
            let original = suspect.original_source().await?;
            let modified = suspect.source().await?;
            responses.extend(
                added_headers(&original, &modified)
                    .into_iter()
                    .map(|(name, value)| Response::AddHeader { name, value }),
            );

            let body = split_body(&modified);
            if body != split_body(&original) {
                responses.extend(Response::replace_body(body));
            }
        }

        responses.push(if action == Action::Accept {
            Response::Accept
        } else {
            Response::Continue
        });
        Ok(responses)
    }

    async fn defer(&mut self, _: &Suspect, message: Option<&str>) -> Vec<Response> {
        vec![message.map_or(Response::TempFail, |message| {
            Response::ReplyCode(format!("451 4.7.1 {message}"))
        })]
    }

    async fn reject(&mut self, _: &Suspect, message: Option<&str>) -> Vec<Response> {
        vec![message.map_or(Response::Reject, |message| {
            Response::ReplyCode(format!("550 5.7.1 {message}"))
        })]
    }

    async fn discard(&mut self, _: &Suspect) -> Vec<Response> {
        vec![Response::Discard]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn addresses() {
        assert_eq!(unbracket("<s@x.com>"), "s@x.com");
        assert_eq!(unbracket("<>"), "");
        assert_eq!(unbracket("r@y.com"), "r@y.com");
    }

    #[test]
    fn body() {
        assert_eq!(split_body(b"Subject: a\r\n\r\nbody\r\n"), b"body\r\n");
        assert_eq!(split_body(b"Subject: a\r\n"), b"");
    }

    #[test]
    fn headers_added_in_place() {
        let original = b"Subject: a\r\nX-Seen: 1\r\n\r\nbody\r\n";
        let modified = b"X-Seen: 1\r\nX-Seen: 1\r\nSubject: a\r\nX-Seen: 1\r\n\r\nbody\r\n";
        assert_eq!(
            added_headers(original, modified),
            [
                ("X-Seen".to_owned(), "1".to_owned()),
                ("X-Seen".to_owned(), "1".to_owned())
            ]
        );
    }
}
