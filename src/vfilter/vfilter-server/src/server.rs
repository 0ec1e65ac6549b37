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
    controller::{Connection, Controller},
    executor::Executor,
};
use anyhow::Context;
use vfilter_config::FieldListener;

/// TCP/IP server: one listener per configured entry, the accepted
/// connections are handed to the worker pool.
pub struct Server {
    controller: Controller,
    listeners: Vec<(FieldListener, tokio::net::TcpListener)>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listeners", &self.local_addrs())
            .finish_non_exhaustive()
    }
}

/// Create a `TCPListener` ready to be listened to
///
/// # Errors
///
/// * failed to bind to the socket address
/// * failed to set the listener to non blocking
pub fn socket_bind_anyhow<A: std::net::ToSocketAddrs + std::fmt::Debug>(
    addr: A,
) -> anyhow::Result<std::net::TcpListener> {
    let socket = std::net::TcpListener::bind(&addr)
        .with_context(|| format!("Failed to bind socket on addr: '{addr:?}'"))?;

    socket
        .set_nonblocking(true)
        .with_context(|| format!("Failed to set non-blocking socket on addr: '{addr:?}'"))?;

    Ok(socket)
}

type ListenerStreamItem = std::io::Result<(tokio::net::TcpStream, std::net::SocketAddr)>;

fn listener_to_stream(
    listener: &tokio::net::TcpListener,
) -> impl tokio_stream::Stream<Item = ListenerStreamItem> + '_ {
    async_stream::try_stream! {
        loop {
            yield listener.accept().await?;
        }
    }
}

impl Server {
    /// Create the spool directory and bind the listeners. A listener which
    /// cannot be bound is skipped.
    ///
    /// Must be called from a tokio runtime.
    ///
    /// # Errors
    ///
    /// * `spool_dir` does not exist and failed to be created
    /// * listeners are configured and none of them could be bound
    pub fn new(controller: Controller) -> anyhow::Result<Self> {
        let config = controller.config();
        if !config.main.spool_dir.exists() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .create(&config.main.spool_dir)
                .with_context(|| {
                    format!(
                        "Failed to create the spool directory '{}'",
                        config.main.spool_dir.display()
                    )
                })?;
        }

        let mut listeners = vec![];
        for listener in &config.listeners {
            let bound = socket_bind_anyhow(listener.bind).and_then(|socket| {
                tokio::net::TcpListener::from_std(socket)
                    .context("Failed to register the socket in the runtime")
            });
            match bound {
                Ok(socket) => listeners.push((listener.clone(), socket)),
                Err(error) => tracing::error!(
                    protocol = %listener.protocol,
                    bind = %listener.bind,
                    error = %format!("{error:#}"),
                    "Listener not started."
                ),
            }
        }

        if listeners.is_empty() && !config.listeners.is_empty() {
            anyhow::bail!("None of the {} listeners could be started", config.listeners.len());
        }

        Ok(Self {
            controller,
            listeners,
        })
    }

    /// Addresses actually bound, by dialect.
    #[must_use]
    pub fn local_addrs(&self) -> Vec<(vfilter_config::Protocol, std::net::SocketAddr)> {
        self.listeners
            .iter()
            .filter_map(|(field, listener)| Some((field.protocol, listener.local_addr().ok()?)))
            .collect()
    }

    /// Main loop of the relay: accept the connections until `shutdown`
    /// completes, then stop the workers.
    ///
    /// # Errors
    ///
    /// * the control channel could not be started
    #[tracing::instrument(skip_all)]
    pub async fn listen(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send,
    ) -> anyhow::Result<()> {
        let Self {
            controller,
            listeners,
        } = self;
        let config = controller.config();

        let executor = std::sync::Arc::new(Executor::start(
            std::sync::Arc::new(controller.clone()),
            &config.performance,
        ));

        let control = match &config.control.socket {
            Some(path) => {
                let control = tokio::spawn(crate::control::serve(
                    path.clone(),
                    controller.clone(),
                    executor.clone(),
                ));
                Some((path.clone(), control))
            }
            None => None,
        };

        let mut map = tokio_stream::StreamMap::new();
        for (field, listener) in &listeners {
            let accept = listener_to_stream(listener);
            let transform =
                tokio_stream::StreamExt::map(accept, move |client| (field.clone(), client));

            map.insert(
                listener
                    .local_addr()
                    .context("Failed to retrieve the local address of a listener")?,
                Box::pin(transform),
            );
        }

        tracing::info!(
            interfaces = ?map.keys().collect::<Vec<_>>(),
            "Listening for clients.",
        );

        tokio::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested.");
                    break;
                }
                accepted = tokio_stream::StreamExt::next(&mut map) => accepted,
            };

            match accepted {
                Some((_, (listener, Ok((stream, peer))))) => {
                    executor
                        .submit(Connection {
                            stream,
                            peer,
                            listener,
                        })
                        .await;
                }
                Some((server_addr, (_, Err(error)))) => {
                    tracing::warn!(%server_addr, %error, "Failed to accept a connection.");
                }
                None => break,
            }
        }

        drop(map);
        if let Some((path, control)) = control {
            control.abort();
            match control.await {
                Ok(Err(error)) => tracing::error!(error = %format!("{error:#}"), "Control channel failed."),
                Ok(Ok(())) | Err(_) => (),
            }
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(%e, "Control socket already removed.");
            }
        }
        executor.shutdown().await;
        tracing::info!("Server stopped.");
        Ok(())
    }
}
