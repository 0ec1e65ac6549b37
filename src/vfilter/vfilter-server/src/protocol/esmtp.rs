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

//! Before-queue filter: the envelope is relayed live to the downstream
//! server, the content is only sent once it passed the filters.

use super::{
    client_info, defer_reply, discard_reply, local_error, not_available, open_spool,
    reject_reply, too_large, ProtocolHandler,
};
use crate::{
    controller::Controller,
    forward::{ForwardError, SmtpClient},
};
use tokio::io::AsyncWriteExt;
use vfilter_common::{Action, ClientInfo, Reply, Spool, Suspect, SuspectId, ValidationStrategy};
use vfilter_protocol::{
    DataError, Event, Receiver, ReceiverContext, ReceiverHandler, Session, XForwardArgs,
    XForwardValue,
};

/// Extensions of the downstream server this relay cannot pass through.
const HIDDEN_EXTENSIONS: &[&str] = &["PIPELINING", "CHUNKING", "BINARYMIME", "STARTTLS", "SMTPUTF8"];

fn hide_extensions(reply: Reply) -> Reply {
    if reply.lines().len() < 2 {
        return reply;
    }
    let lines = reply
        .lines()
        .iter()
        .enumerate()
        .filter(|(idx, line)| {
            *idx == 0
                || !line
                    .split_whitespace()
                    .next()
                    .map_or(false, |keyword| {
                        HIDDEN_EXTENSIONS
                            .iter()
                            .any(|hidden| hidden.eq_ignore_ascii_case(keyword))
                    })
        })
        .map(|(_, line)| line.as_str())
        .collect::<Vec<_>>();
    Reply::with_code(reply.code(), lines.join("\n"))
}

fn xforward_command(args: &XForwardArgs) -> String {
    let mut command = "XFORWARD".to_owned();
    for (key, value) in [("NAME", &args.name), ("ADDR", &args.addr), ("HELO", &args.helo)] {
        match value {
            Some(XForwardValue::Value(value)) => command.push_str(&format!(" {key}={value}")),
            Some(XForwardValue::Unavailable) => command.push_str(&format!(" {key}=[UNAVAILABLE]")),
            None => (),
        }
    }
    command
}

/// XFORWARD sent again to a new downstream connection, an `unknown` name
/// goes back to the `[UNAVAILABLE]` it was received as.
fn xforward_replay(info: &ClientInfo) -> Option<String> {
    let value = |v: &Option<String>| v.clone().map(XForwardValue::Value);
    let mut args = XForwardArgs::default();
    args.name = info.rdns.as_deref().map(|name| match name {
        "unknown" => XForwardValue::Unavailable,
        name => XForwardValue::Value(name.to_owned()),
    });
    args.addr = value(&info.addr);
    args.helo = value(&info.helo);

    (args != XForwardArgs::default()).then(|| xforward_command(&args))
}

/// Handler of a connection of the `esmtp` dialect.
pub struct Esmtp {
    controller: Controller,
    downstream: std::net::SocketAddr,
    peer: std::net::SocketAddr,
    client: Option<SmtpClient>,
    forwarded_rcpt: usize,
    current: Option<(SuspectId, Spool)>,
}

impl Esmtp {
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
            client: None,
            forwarded_rcpt: 0,
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
            Session::new(Some(ValidationStrategy::Simple), true),
            main.command_timeout,
            (main.max_message_size != 0).then_some(main.max_message_size),
        );
        receiver.run(&mut self).await
    }

    fn hostname(&self) -> &str {
        &self.controller.config().main.hostname
    }

    async fn connect(&self) -> Result<(SmtpClient, Reply), ForwardError> {
        SmtpClient::connect(self.downstream, self.controller.config().main.forward_timeout).await
    }

    /// The connection to the downstream server, opened again with the
    /// greeting and the client metadata if a previous transaction closed it.
    async fn client(&mut self, session: &Session) -> Result<&mut SmtpClient, ForwardError> {
        let client = match self.client.take() {
            Some(client) => client,
            None => {
                tracing::debug!("Reconnecting to the downstream server.");
                let (mut client, _banner) = self.connect().await?;
                if let Some(helo) = session.helo() {
                    client.hello(helo).await?;
                }
                if let Some(xforward) = xforward_replay(session.client_info()) {
                    client.expect(&xforward).await?;
                }
                self.forwarded_rcpt = 0;
                client
            }
        };
        Ok(self.client.insert(client))
    }

    async fn relay(&mut self, ctx: &mut ReceiverContext, session: &Session, command: &str) -> Reply {
        let client = match self.client(session).await {
            Ok(client) => client,
            Err(e) => return self.unavailable(ctx, &e),
        };
        match client.command(command).await {
            Ok(reply) => reply,
            Err(e) => {
                self.client = None;
                self.unavailable(ctx, &e)
            }
        }
    }

    fn unavailable(&self, ctx: &mut ReceiverContext, error: &ForwardError) -> Reply {
        tracing::warn!(%error, "Downstream server unavailable, closing.");
        ctx.deny();
        not_available(self.hostname())
    }

    async fn close_downstream(&mut self) {
        self.forwarded_rcpt = 0;
        if let Some(client) = self.client.take() {
            client.quit().await;
        }
    }

    /// The transaction failed locally, the downstream one is cancelled.
    async fn reset_downstream(&mut self) {
        self.forwarded_rcpt = 0;
        if let Some(client) = &mut self.client {
            if let Err(e) = client.command("RSET").await {
                tracing::debug!(%e, "RSET not acknowledged.");
                self.client = None;
            }
        }
    }
}

#[async_trait::async_trait]
impl ReceiverHandler for Esmtp {
    type Spool = tokio::io::BufWriter<tokio::fs::File>;

    async fn on_accept(&mut self, ctx: &mut ReceiverContext) -> Reply {
        match self.connect().await {
            Ok((client, banner)) => {
                self.client = Some(client);
                banner
            }
            Err(e) => self.unavailable(ctx, &e),
        }
    }

    async fn on_event(&mut self, ctx: &mut ReceiverContext, session: &Session, event: &Event) -> Reply {
        match event {
            Event::Helo {
                client_name,
                extended,
            } => {
                let verb = if *extended { "EHLO" } else { "HELO" };
                let reply = self.relay(ctx, session, &format!("{verb} {client_name}")).await;
                if reply.code().is_positive() {
                    self.forwarded_rcpt = 0;
                }
                hide_extensions(reply)
            }
            Event::MailFrom(from) => self.relay(ctx, session, &format!("MAIL FROM:<{from}>")).await,
            Event::RcptTo(rcpt) => {
                if self.forwarded_rcpt > 0
                    && self.controller.config().esmtp.ignore_multiple_recipients
                {
                    tracing::debug!(%rcpt, "Recipient not forwarded.");
                    return event.default_reply(self.hostname());
                }
                let reply = self.relay(ctx, session, &format!("RCPT TO:<{rcpt}>")).await;
                if reply.code().is_positive() {
                    self.forwarded_rcpt += 1;
                }
                reply
            }
            Event::Rset => {
                let reply = self.relay(ctx, session, "RSET").await;
                if reply.code().is_positive() {
                    self.forwarded_rcpt = 0;
                }
                reply
            }
            Event::Noop => self.relay(ctx, session, "NOOP").await,
            Event::XForward(args) => self.relay(ctx, session, &xforward_command(args)).await,
            Event::Quit => {
                self.close_downstream().await;
                event.default_reply(self.hostname())
            }
            Event::Data
            | Event::BadSequence(_)
            | Event::SyntaxError(..)
            | Event::Unknown(_) => event.default_reply(self.hostname()),
        }
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
                self.reset_downstream().await;
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
            self.reset_downstream().await;
            return local_error();
        }
        drop(spool);

        match received {
            Ok(_) => (),
            Err(DataError::TooLarge { limit, got }) => {
                tracing::info!(limit, got, "Message refused, too large.");
                self.reset_downstream().await;
                return too_large();
            }
            Err(DataError::CouldNotWrite(e)) => {
                tracing::error!(%e, "Could not write the spool file.");
                self.close_downstream().await;
                ctx.deny();
                return Reply::new(421, format!("{} Local error, closing connection", self.hostname()));
            }
            Err(_transport) => {
                self.close_downstream().await;
                return local_error();
            }
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
                self.reset_downstream().await;
                return Reply::new(554, format!("Transaction failed: {e}"));
            }
        };
        suspect.set_client_info(client_info(session.client_info(), session.helo(), self.peer));

        let controller = self.controller.clone();
        controller.dispose(self, suspect).await
    }

    async fn on_close(&mut self) {
        self.close_downstream().await;
    }
}

#[async_trait::async_trait]
impl ProtocolHandler for Esmtp {
    type Outcome = Reply;

    async fn commit(
        &mut self,
        suspect: &Suspect,
        _: Action,
        _: Option<&str>,
    ) -> Result<Reply, ForwardError> {
        let content = suspect.build_message_source().await?;
        let client = self.client.as_mut().ok_or(ForwardError::Closed)?;
        let reply = client.data(&content).await;
        self.forwarded_rcpt = 0;
        reply
    }

    async fn defer(&mut self, _: &Suspect, message: Option<&str>) -> Reply {
        self.close_downstream().await;
        defer_reply(message)
    }

    async fn reject(&mut self, _: &Suspect, message: Option<&str>) -> Reply {
        self.close_downstream().await;
        reject_reply(message)
    }

    async fn discard(&mut self, _: &Suspect) -> Reply {
        self.close_downstream().await;
        discard_reply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extensions() {
        let reply = Reply::new(250, "mx.example.com\nPIPELINING\nSIZE 10240000\nXFORWARD NAME ADDR HELO\nstarttls");
        assert_eq!(
            hide_extensions(reply).to_string(),
            "250-mx.example.com\r\n250-SIZE 10240000\r\n250 XFORWARD NAME ADDR HELO\r\n"
        );
        assert_eq!(
            hide_extensions(Reply::new(250, "mx.example.com")),
            Reply::new(250, "mx.example.com")
        );
    }

    #[test]
    fn xforward() {
        let mut args = XForwardArgs::default();
        args.name = Some(XForwardValue::Unavailable);
        args.addr = Some(XForwardValue::Value("192.0.2.1".to_owned()));
        assert_eq!(
            xforward_command(&args),
            "XFORWARD NAME=[UNAVAILABLE] ADDR=192.0.2.1"
        );

        assert_eq!(xforward_replay(&ClientInfo::default()), None);
        assert_eq!(
            xforward_replay(&ClientInfo {
                helo: Some("client".to_owned()),
                addr: Some("192.0.2.1".to_owned()),
                rdns: Some("unknown".to_owned()),
            })
            .as_deref(),
            Some("XFORWARD NAME=[UNAVAILABLE] ADDR=192.0.2.1 HELO=client")
        );
        assert_eq!(
            xforward_replay(&ClientInfo {
                rdns: Some("mx.example.com".to_owned()),
                ..ClientInfo::default()
            })
            .as_deref(),
            Some("XFORWARD NAME=mx.example.com")
        );
    }
}
