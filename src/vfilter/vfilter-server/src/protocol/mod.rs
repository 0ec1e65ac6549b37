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

use crate::forward::ForwardError;
use vfilter_common::{Action, ClientInfo, Reply, Suspect};

mod esmtp;
mod milter;
mod netcat;
mod smtp;

pub use esmtp::Esmtp;
pub use milter::Milter;
pub use netcat::Netcat;
pub use smtp::Smtp;

/// How a dialect tells its peer what became of a scanned message.
#[async_trait::async_trait]
pub trait ProtocolHandler: Send {
    /// What is sent back to the peer.
    type Outcome: Send;

    /// The message passed the filters ([`Action::Dunno`] or
    /// [`Action::Accept`]): hand it over.
    ///
    /// # Errors
    ///
    /// * the downstream server did not take the message, it is deferred
    async fn commit(
        &mut self,
        suspect: &Suspect,
        action: Action,
        message: Option<&str>,
    ) -> Result<Self::Outcome, ForwardError>;

    /// Ask the peer to try again later.
    async fn defer(&mut self, suspect: &Suspect, message: Option<&str>) -> Self::Outcome;

    /// Refuse the message.
    async fn reject(&mut self, suspect: &Suspect, message: Option<&str>) -> Self::Outcome;

    /// Acknowledge the message and drop it.
    async fn discard(&mut self, suspect: &Suspect) -> Self::Outcome;
}

pub(crate) fn defer_reply(message: Option<&str>) -> Reply {
    Reply::new(
        451,
        message.unwrap_or("Requested action aborted: try again later"),
    )
}

pub(crate) fn reject_reply(message: Option<&str>) -> Reply {
    Reply::new(550, message.unwrap_or("Requested action not taken: message refused"))
}

pub(crate) fn discard_reply() -> Reply {
    Reply::new(250, "OK")
}

pub(crate) fn not_available(hostname: &str) -> Reply {
    Reply::new(
        421,
        format!("{hostname} Service not available, closing transmission channel"),
    )
}

pub(crate) fn local_error() -> Reply {
    Reply::new(451, "Requested action aborted: local error in processing")
}

pub(crate) fn too_large() -> Reply {
    Reply::new(552, "Message size exceeds fixed maximum message size")
}

/// What the front-end told about the client, completed with what is known
/// of the connection.
pub(crate) fn client_info(
    known: &ClientInfo,
    helo: Option<&str>,
    peer: std::net::SocketAddr,
) -> ClientInfo {
    let mut info = known.clone();
    if info.helo.is_none() {
        info.helo = helo.map(str::to_owned);
    }
    if info.addr.is_none() {
        info.addr = Some(peer.ip().to_string());
    }
    info
}

/// Open a fresh spool file in `directory`.
pub(crate) async fn open_spool(
    directory: &std::path::Path,
) -> std::io::Result<(
    vfilter_common::SuspectId,
    vfilter_common::Spool,
    tokio::io::BufWriter<tokio::fs::File>,
)> {
    let id = vfilter_common::SuspectId::new();
    let spool = vfilter_common::Spool::new(directory, &id);
    let file = tokio::fs::File::create(spool.path()).await?;
    Ok((id, spool, tokio::io::BufWriter::new(file)))
}
