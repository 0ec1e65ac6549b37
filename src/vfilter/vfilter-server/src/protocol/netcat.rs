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

//! Raw bytes until the peer closes its side, the verdict is written back
//! as a line of text. Nothing is forwarded.

use super::{client_info, open_spool, ProtocolHandler};
use crate::{controller::Controller, forward::ForwardError};
use tokio::io::AsyncWriteExt;
use vfilter_common::{Action, ClientInfo, Suspect};
use vfilter_protocol::{DataError, Reader, Writer};

fn verdict_line(action: Action, message: Option<&str>) -> String {
    format!("{action}: {}\n", message.unwrap_or_default())
}

/// Handler of a connection of the `netcat` dialect.
pub struct Netcat {
    controller: Controller,
    peer: std::net::SocketAddr,
}

impl Netcat {
    ///
    #[must_use]
    pub const fn new(controller: Controller, peer: std::net::SocketAddr) -> Self {
        Self { controller, peer }
    }

    /// Read the message, scan it and write the verdict.
    ///
    /// # Errors
    ///
    /// * the connection failed
    pub async fn serve(mut self, stream: tokio::net::TcpStream) -> Result<(), vfilter_protocol::Error> {
        let (read, write) = stream.into_split();
        let (mut reader, mut writer) = (Reader::new(read), Writer::new(write));

        let line = self.receive(&mut reader).await?;
        writer.write_all(&line).await?;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(%e, "Connection already closed.");
        }
        Ok(())
    }

    async fn receive(
        &mut self,
        reader: &mut Reader<tokio::net::tcp::OwnedReadHalf>,
    ) -> Result<String, vfilter_protocol::Error> {
        let main = &self.controller.config().main;
        let (id, spool, mut file) = match open_spool(&main.spool_dir).await {
            Ok(spool) => spool,
            Err(e) => {
                tracing::error!(%e, "Could not create the spool file.");
                return Ok(verdict_line(Action::Defer, Some("local error in processing")));
            }
        };

        let timeout = main.command_timeout;
        let limit = (main.max_message_size != 0).then_some(main.max_message_size);
        let received = tokio::time::timeout(timeout, reader.read_to_end(&mut file, limit))
            .await
            .map_err(|_elapsed| vfilter_protocol::Error::timeout(timeout, "waiting for the message"))?;

        match received {
            Ok(size) => tracing::debug!(size, "Message received."),
            Err(DataError::TooLarge { limit, got }) => {
                tracing::info!(limit, got, "Message refused, too large.");
                return Ok(verdict_line(
                    Action::Reject,
                    Some("Message size exceeds fixed maximum message size"),
                ));
            }
            Err(DataError::CouldNotWrite(e)) => {
                tracing::error!(%e, "Could not write the spool file.");
                return Ok(verdict_line(Action::Defer, Some("local error in processing")));
            }
            Err(DataError::Transport(e)) => return Err(e),
            Err(e) => {
                tracing::error!(%e, "Message not received.");
                return Ok(verdict_line(Action::Defer, Some("local error in processing")));
            }
        }
        if let Err(e) = file.shutdown().await {
            tracing::error!(%e, "Could not write the spool file.");
            return Ok(verdict_line(Action::Defer, Some("local error in processing")));
        }
        drop(file);

        let mut suspect = match Suspect::new(
            id,
            "",
            &[self.controller.config().netcat.default_recipient.clone()],
            spool,
            main.address_validation,
        )
        .await
        {
            Ok(suspect) => suspect,
            Err(e) => {
                tracing::warn!(%e, "Message refused.");
                return Ok(verdict_line(Action::Defer, Some(&e.to_string())));
            }
        };
        suspect.set_client_info(client_info(&ClientInfo::default(), None, self.peer));

        let controller = self.controller.clone();
        Ok(controller.dispose(self, suspect).await)
    }
}

#[async_trait::async_trait]
impl ProtocolHandler for Netcat {
    type Outcome = String;

    async fn commit(
        &mut self,
        _: &Suspect,
        action: Action,
        message: Option<&str>,
    ) -> Result<String, ForwardError> {
        Ok(verdict_line(action, message))
    }

    async fn defer(&mut self, _: &Suspect, message: Option<&str>) -> String {
        verdict_line(Action::Defer, message)
    }

    async fn reject(&mut self, _: &Suspect, message: Option<&str>) -> String {
        verdict_line(Action::Reject, message)
    }

    async fn discard(&mut self, _: &Suspect) -> String {
        verdict_line(Action::Delete, None)
    }
}
