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

//! After-queue filter: the message is received locally, scanned, then
//! re-injected in a transaction of its own.

use super::{
    client_info, defer_reply, discard_reply, local_error, open_spool, reject_reply, too_large,
    ProtocolHandler,
};
use crate::{
    controller::Controller,
    forward::{forward, ForwardError},
};
use tokio::io::AsyncWriteExt;
use vfilter_common::{Action, Address, Reply, Spool, Suspect, SuspectId};
use vfilter_protocol::{DataError, Event, Receiver, ReceiverContext, ReceiverHandler, Session};

/// Handler of a connection of the `smtp` dialect.
pub struct Smtp {
    controller: Controller,
    downstream: std::net::SocketAddr,
    peer: std::net::SocketAddr,
    current: Option<(SuspectId, Spool)>,
}

impl Smtp {
    ///
    #[must_use]
    pub const fn new(
        controller: Controller,
        downstream: std::net::SocketAddr,
        peer: std::net::SocketAddr,
    ) -> Self {
        Self {
            controller,
            downstream,
            peer,
            current: None,
        }
    }

    /// Serve the connection until the client quits.
    ///
    /// # Errors
    ///
    /// * the connection failed
    pub async fn serve(mut self, stream: tokio::net::TcpStream) -> Result<(), vfilter_protocol::Error> {
        let main = &self.controller.config().main;
        let receiver = Receiver::from_tcp(
            stream,
            Session::new(None, false),
            main.command_timeout,
            (main.max_message_size != 0).then_some(main.max_message_size),
        );
        receiver.run(&mut self).await
    }

    fn hostname(&self) -> &str {
        &self.controller.config().main.hostname
    }
}

#[async_trait::async_trait]
impl ReceiverHandler for Smtp {
    type Spool = tokio::io::BufWriter<tokio::fs::File>;

    async fn on_accept(&mut self, _: &mut ReceiverContext) -> Reply {
        Reply::new(220, format!("{} ESMTP vFilter", self.hostname()))
    }

    async fn on_event(&mut self, _: &mut ReceiverContext, _: &Session, event: &Event) -> Reply {
        event.default_reply(self.hostname())
    }

    async fn on_data(
        &mut self,
        _: &mut ReceiverContext,
        _: &Session,
    ) -> Result<Self::Spool, Reply> {
        match open_spool(&self.controller.config().main.spool_dir).await {
            Ok((id, spool, writer)) => {
                self.current = Some((id, spool));
                Ok(writer)
            }
            Err(e) => {
                tracing::error!(%e, "Could not create the spool file.");
                Err(local_error())
            }
        }
    }

    async fn on_message(
        &mut self,
        ctx: &mut ReceiverContext,
        session: &Session,
        mut spool: Self::Spool,
        received: Result<usize, DataError>,
    ) -> Reply {
        let Some((id, file)) = self.current.take() else {
            return local_error();
        };
        if let Err(e) = spool.shutdown().await {
            tracing::error!(%e, "Could not write the spool file.");
            return local_error();
        }
        drop(spool);

        match received {
            Ok(_) => (),
            Err(DataError::TooLarge { limit, got }) => {
                tracing::info!(limit, got, "Message refused, too large.");
                return too_large();
            }
            Err(DataError::CouldNotWrite(e)) => {
                tracing::error!(%e, "Could not write the spool file.");
                ctx.deny();
                return Reply::new(421, format!("{} Local error, closing connection", self.hostname()));
            }
            Err(_transport) => return local_error(),
        }

        let mut suspect = match Suspect::new(
            id,
            session.from().unwrap_or_default(),
            session.recipients(),
            file,
            self.controller.config().main.address_validation,
        )
        .await
        {
            Ok(suspect) => suspect,
            Err(e) => {
                tracing::warn!(%e, "Message refused.");
                return Reply::new(554, format!("Transaction failed: {e}"));
            }
        };
        suspect.set_client_info(client_info(session.client_info(), session.helo(), self.peer));

        let controller = self.controller.clone();
        controller.dispose(self, suspect).await
    }
}

#[async_trait::async_trait]
impl ProtocolHandler for Smtp {
    type Outcome = Reply;

    async fn commit(
        &mut self,
        suspect: &Suspect,
        _: Action,
        _: Option<&str>,
    ) -> Result<Reply, ForwardError> {
        let main = &self.controller.config().main;
        let content = suspect.build_message_source().await?;
        let to = suspect
            .to()
            .iter()
            .map(|rcpt| Address::full(rcpt).to_owned())
            .collect::<Vec<_>>();

        forward(
            self.downstream,
            &main.outgoing_helo,
            main.forward_timeout,
            suspect.from_address(),
            &to,
            &content,
        )
        .await
    }

    async fn defer(&mut self, _: &Suspect, message: Option<&str>) -> Reply {
        defer_reply(message)
    }

    async fn reject(&mut self, _: &Suspect, message: Option<&str>) -> Reply {
        reject_reply(message)
    }

    async fn discard(&mut self, _: &Suspect) -> Reply {
        discard_reply()
    }
}
