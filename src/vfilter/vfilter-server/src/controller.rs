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
    executor::Worker,
    protocol::{Esmtp, Milter, Netcat, ProtocolHandler, Smtp},
};
use vfilter_common::{Action, Suspect};
use vfilter_config::{Config, FieldListener, Protocol};
use vfilter_pipeline::{BuildError, CrashStore, Pipeline, Registry, Services, StatsKeeper};

/// An accepted connection waiting for a worker.
#[derive(Debug)]
pub struct Connection {
    ///
    pub stream: tokio::net::TcpStream,
    /// Address of the client.
    pub peer: std::net::SocketAddr,
    /// Listener which accepted the connection.
    pub listener: FieldListener,
}

/// Owner of the objects shared by the connections: configuration,
/// pipeline and counters.
#[derive(Debug, Clone)]
pub struct Controller {
    config: std::sync::Arc<Config>,
    pipeline: std::sync::Arc<Pipeline>,
    stats: std::sync::Arc<StatsKeeper>,
}

impl Controller {
    ///
    #[must_use]
    pub fn new(
        config: std::sync::Arc<Config>,
        pipeline: std::sync::Arc<Pipeline>,
        stats: std::sync::Arc<StatsKeeper>,
    ) -> Self {
        Self {
            config,
            pipeline,
            stats,
        }
    }

    /// Build the pipeline described by the configuration, returns the
    /// warnings about the plugin options.
    ///
    /// # Errors
    ///
    /// * see [`Pipeline::from_config`]
    pub fn build(
        config: std::sync::Arc<Config>,
        registry: &Registry,
    ) -> Result<(Self, Vec<String>), BuildError> {
        let services = Services {
            stats: std::sync::Arc::default(),
            header_prefix: config.main.prepend_header_prefix.clone(),
        };
        let (pipeline, warnings) = Pipeline::from_config(
            &config,
            registry,
            &services,
            std::sync::Arc::new(CrashStore::default()),
        )?;
        Ok((
            Self::new(config, std::sync::Arc::new(pipeline), services.stats),
            warnings,
        ))
    }

    ///
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    ///
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    ///
    #[must_use]
    pub fn stats(&self) -> &StatsKeeper {
        &self.stats
    }

    ///
    #[must_use]
    pub fn crash_store(&self) -> &CrashStore {
        self.pipeline.crash_store()
    }

    /// Scan the message and let `handler` act on the verdict, then run the
    /// appenders with the action actually taken.
    ///
    /// A message which cannot be handed over is deferred.
    pub async fn dispose<H: ProtocolHandler>(&self, handler: &mut H, mut suspect: Suspect) -> H::Outcome {
        let verdict = self.pipeline.scan(&mut suspect).await;
        let mut message = verdict.message.clone();

        let (action, outcome) = match verdict.action {
            Action::Dunno | Action::Accept => {
                match handler
                    .commit(&suspect, verdict.action, verdict.message.as_deref())
                    .await
                {
                    Ok(outcome) => (verdict.action, outcome),
                    Err(error) => {
                        tracing::warn!(suspect = %suspect.id(), %error, "Message could not be handed over, deferred.");
                        message = Some(error.to_string());
                        (Action::Defer, handler.defer(&suspect, None).await)
                    }
                }
            }
            Action::Defer => (
                Action::Defer,
                handler.defer(&suspect, verdict.message.as_deref()).await,
            ),
            Action::Reject => (
                Action::Reject,
                handler.reject(&suspect, verdict.message.as_deref()).await,
            ),
            Action::Delete => (Action::Delete, handler.discard(&suspect).await),
        };

        self.pipeline.append(&suspect, action).await;

        let tags = suspect.tags();
        tracing::info!(
            id = %suspect.id(),
            from = suspect.from_address(),
            to = %suspect
                .to()
                .iter()
                .map(vfilter_common::Address::full)
                .collect::<Vec<_>>()
                .join(","),
            size = suspect.size(),
            spam = tags.is_spam(),
            virus = tags.is_virus(),
            blocked = tags.is_blocked(),
            modified = suspect.is_modified(),
            %action,
            message = message.as_deref().unwrap_or_default(),
            scantimes = %tags.scantimes_summary(),
            "Message disposed."
        );

        outcome
    }

    /// Serve a connection with the dialect of its listener, until the peer
    /// leaves.
    #[tracing::instrument(name = "connection", skip_all, fields(
        uuid = %uuid::Uuid::new_v4().simple(),
        client = %connection.peer,
        protocol = %connection.listener.protocol,
    ))]
    pub async fn serve(&self, connection: Connection) {
        let Connection {
            stream,
            peer,
            listener,
        } = connection;
        tracing::info!("Connection accepted.");

        let downstream = match (listener.protocol.needs_downstream(), listener.downstream) {
            (true, None) => {
                tracing::error!("No downstream server configured, connection dropped.");
                return;
            }
            (_, downstream) => downstream,
        };

        let result = match (listener.protocol, downstream) {
            (Protocol::Smtp, Some(downstream)) => {
                Smtp::new(self.clone(), downstream, peer).serve(stream).await
            }
            (Protocol::Esmtp, Some(downstream)) => {
                Esmtp::new(self.clone(), downstream, peer).serve(stream).await
            }
            (Protocol::Milter, _) => Milter::new(self.clone()).serve(stream).await,
            (Protocol::Netcat, _) => Netcat::new(self.clone(), peer).serve(stream).await,
            (Protocol::Smtp | Protocol::Esmtp, None) => return,
        };

        match result {
            Ok(()) => tracing::info!("Connection closed."),
            Err(error) => tracing::warn!(%error, "Connection closed on error."),
        }
    }

    /// Tell the peer of a connection which will not be served to come back
    /// later.
    pub async fn turn_away(&self, connection: Connection) {
        let Connection {
            mut stream,
            peer,
            listener,
        } = connection;

        let refusal = match listener.protocol {
            Protocol::Smtp | Protocol::Esmtp => format!(
                "421 {} Service not available, try again later\r\n",
                self.config.main.hostname
            )
            .into_bytes(),
            Protocol::Milter => vfilter_protocol::milter::Response::TempFail.encode(),
            Protocol::Netcat => b"DEFER: Service not available, try again later\n".to_vec(),
        };

        tracing::info!(client = %peer, "Connection refused, shutting down.");
        if let Err(e) = tokio::io::AsyncWriteExt::write_all(&mut stream, &refusal).await {
            tracing::debug!(%e, "Refusal not delivered.");
        }
        if let Err(e) = tokio::io::AsyncWriteExt::shutdown(&mut stream).await {
            tracing::debug!(%e, "Connection already closed.");
        }
    }
}

#[async_trait::async_trait]
impl Worker<Connection> for Controller {
    async fn handle(&self, connection: Connection) {
        self.serve(connection).await;
    }

    async fn refuse(&self, connection: Connection) {
        self.turn_away(connection).await;
    }
}
