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

//! A relay running in the test runtime, and the clients talking to it.

use vfilter_common::Reply;
use vfilter_config::{Config, Protocol};
use vfilter_pipeline::Registry;
use vfilter_protocol::{Reader, Writer};
use vfilter_server::{Controller, Server};

/// A running relay, stopped by [`Relay::stop`].
pub struct Relay {
    addrs: Vec<(Protocol, std::net::SocketAddr)>,
    controller: Controller,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl Relay {
    /// Start a relay with the builtin plugins.
    pub async fn start(config: Config) -> Self {
        Self::with_registry(config, &Registry::with_builtins()).await
    }

    /// Start a relay whose plugins are taken from `registry`.
    pub async fn with_registry(config: Config, registry: &Registry) -> Self {
        let (controller, warnings) =
            Controller::build(std::sync::Arc::new(config), registry).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");

        let server = Server::new(controller.clone()).unwrap();
        let addrs = server.local_addrs();

        let (shutdown, signal) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.listen(async move {
            // a dropped sender stops the relay as well
            let _ = signal.await;
        }));

        Self {
            addrs,
            controller,
            shutdown,
            handle,
        }
    }

    /// Address of the first listener speaking `protocol`.
    #[must_use]
    pub fn addr(&self, protocol: Protocol) -> std::net::SocketAddr {
        self.addrs
            .iter()
            .find(|(p, _)| *p == protocol)
            .map(|(_, addr)| *addr)
            .unwrap_or_else(|| panic!("no {protocol} listener"))
    }

    ///
    #[must_use]
    pub const fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Ask the relay to stop and wait for the workers.
    pub async fn stop(self) {
        let Self {
            shutdown, handle, ..
        } = self;
        shutdown.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(10), handle)
            .await
            .expect("relay did not stop in time")
            .unwrap()
            .unwrap();
    }
}

/// A SMTP client sending raw lines.
pub struct Client {
    reader: Reader<tokio::net::tcp::OwnedReadHalf>,
    writer: Writer<tokio::net::tcp::OwnedWriteHalf>,
}

impl Client {
    /// Connect and read the greeting.
    pub async fn connect(addr: std::net::SocketAddr) -> (Self, Reply) {
        let (read, write) = tokio::net::TcpStream::connect(addr).await.unwrap().into_split();
        let mut client = Self {
            reader: Reader::new(read),
            writer: Writer::new(write),
        };
        let greeting = client.reply().await;
        (client, greeting)
    }

    /// Write `input` as is, and read one reply.
    pub async fn send(&mut self, input: &str) -> Reply {
        self.writer.write_all(input).await.unwrap();
        self.reply().await
    }

    ///
    pub async fn reply(&mut self) -> Reply {
        tokio::time::timeout(std::time::Duration::from_secs(10), self.reader.read_reply())
            .await
            .expect("no reply in time")
            .unwrap()
    }

    /// `true` once the relay closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(std::time::Duration::from_secs(5), self.reader.read_line(None))
                .await,
            Ok(Ok(None) | Err(_))
        )
    }
}

/// A milter packet as sent on the wire.
#[must_use]
pub fn packet(code: u8, data: &[u8]) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation)]
    let mut out = ((data.len() + 1) as u32).to_be_bytes().to_vec();
    out.push(code);
    out.extend_from_slice(data);
    out
}

/// The MTA side of the milter protocol.
pub struct MilterClient {
    reader: Reader<tokio::net::tcp::OwnedReadHalf>,
    writer: Writer<tokio::net::tcp::OwnedWriteHalf>,
}

impl MilterClient {
    /// Connect and negotiate the options.
    pub async fn connect(addr: std::net::SocketAddr) -> Self {
        let (read, write) = tokio::net::TcpStream::connect(addr).await.unwrap().into_split();
        let mut client = Self {
            reader: Reader::new(read),
            writer: Writer::new(write),
        };

        client
            .send(b'O', &[0, 0, 0, 6, 0, 0, 0x01, 0xff, 0, 0x1f, 0xff, 0xff])
            .await;
        let (code, data) = client.response().await;
        assert_eq!(code, b'O');
        assert_eq!(data, [0, 0, 0, 6, 0, 0, 0, 0x03, 0, 0, 0, 0]);
        client
    }

    /// Send a packet which expects no response.
    pub async fn send(&mut self, code: u8, data: &[u8]) {
        self.writer.write_all_bytes(&packet(code, data)).await.unwrap();
    }

    /// Send a packet and read the `Continue` response.
    pub async fn step(&mut self, code: u8, data: &[u8]) {
        self.send(code, data).await;
        assert_eq!(self.response().await, (b'c', vec![]), "after '{}'", char::from(code));
    }

    /// Read one response packet.
    pub async fn response(&mut self) -> (u8, Vec<u8>) {
        let read = async {
            let length = self.reader.read_exact(4).await.unwrap().unwrap();
            let length = u32::from_be_bytes([length[0], length[1], length[2], length[3]]);
            let packet = self
                .reader
                .read_exact(length as usize)
                .await
                .unwrap()
                .unwrap();
            (packet[0], packet[1..].to_vec())
        };
        tokio::time::timeout(std::time::Duration::from_secs(10), read)
            .await
            .expect("no milter response in time")
    }

    /// Send the end of the body and read every response up to the verdict.
    pub async fn end_of_body(&mut self) -> Vec<(u8, Vec<u8>)> {
        self.send(b'E', &[]).await;
        let mut responses = vec![];
        loop {
            let response = self.response().await;
            let verdict = matches!(response.0, b'a' | b'c' | b'r' | b't' | b'd' | b'y');
            responses.push(response);
            if verdict {
                return responses;
            }
        }
    }

    /// Play the envelope and the content of a message up to the verdict.
    pub async fn message(
        &mut self,
        from: &str,
        to: &[&str],
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Vec<(u8, Vec<u8>)> {
        self.step(b'C', b"client.example.com\x004\x00\x19192.0.2.1\x00")
            .await;
        self.step(b'H', b"client.example.com\x00").await;
        self.step(b'M', format!("<{from}>\0").as_bytes()).await;
        for rcpt in to {
            self.step(b'R', format!("<{rcpt}>\0").as_bytes()).await;
        }
        for (name, value) in headers {
            self.step(b'L', format!("{name}\0{value}\0").as_bytes()).await;
        }
        self.step(b'N', &[]).await;
        if !body.is_empty() {
            self.step(b'B', body).await;
        }
        self.end_of_body().await
    }

    /// Leave.
    pub async fn quit(mut self) {
        self.send(b'Q', &[]).await;
        assert!(!matches!(self.reader.read_exact(4).await, Ok(Some(_))));
    }
}
