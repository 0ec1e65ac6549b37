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

//! A downstream server recording what the relay re-injects.

use vfilter_protocol::{Reader, Writer};

/// What a [`FakeMta`] received on one connection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Received {
    /// Command lines, without the CRLF.
    pub commands: Vec<String>,
    /// Message contents, dot-unstuffed.
    pub messages: Vec<Vec<u8>>,
}

/// Reply of the server to each command line.
pub type Answer = fn(&str) -> &'static str;

/// Accept every transaction.
#[must_use]
pub fn accept_all(command: &str) -> &'static str {
    match command.split(' ').next().unwrap_or_default() {
        "EHLO" => "250-fake.downstream\r\n250-PIPELINING\r\n250-XFORWARD NAME ADDR HELO\r\n250 8BITMIME",
        "HELO" => "250 fake.downstream",
        "DATA" => "354 End data with <CR><LF>.<CR><LF>",
        "QUIT" => "221 2.0.0 Bye",
        _ => "250 2.1.0 Ok",
    }
}

/// Refuse every recipient.
#[must_use]
pub fn refuse_recipients(command: &str) -> &'static str {
    if command.starts_with("RCPT") {
        "550 5.1.1 Recipient address rejected: User unknown"
    } else {
        accept_all(command)
    }
}

/// An address on which nothing listens.
#[must_use]
pub fn unreachable() -> std::net::SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .unwrap()
}

async fn session(stream: tokio::net::TcpStream, answer: Answer) -> Received {
    let (read, write) = stream.into_split();
    let (mut reader, mut writer) = (Reader::new(read), Writer::new(write));
    let mut received = Received::default();

    if writer.write_all("220 fake.downstream ESMTP\r\n").await.is_err() {
        return received;
    }
    while let Ok(Some(line)) = reader.read_line(None).await {
        let line = String::from_utf8_lossy(&line).into_owned();
        let reply = answer(&line);
        received.commands.push(line.clone());
        if writer.write_all(&format!("{reply}\r\n")).await.is_err() {
            break;
        }

        if line == "DATA" && reply.starts_with('3') {
            let mut message = vec![];
            if reader.read_data_block(&mut message, None).await.is_err() {
                break;
            }
            received.messages.push(message);
            if writer
                .write_all("250 2.0.0 Ok: queued as 1234\r\n")
                .await
                .is_err()
            {
                break;
            }
        } else if line == "QUIT" {
            break;
        }
    }
    received
}

/// A downstream server accepting any number of connections.
pub struct FakeMta {
    addr: std::net::SocketAddr,
    connections: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    sessions: std::sync::Arc<std::sync::Mutex<Vec<Received>>>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeMta {
    /// Listen on an ephemeral loopback port, `answer` gives the reply to
    /// each command.
    pub async fn start(answer: Answer) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sessions = std::sync::Arc::new(std::sync::Mutex::new(vec![]));

        let task = tokio::spawn({
            let (connections, sessions) = (connections.clone(), sessions.clone());
            async move {
                while let Ok((stream, peer)) = listener.accept().await {
                    tracing::debug!(%peer, "Fake downstream accepted a connection.");
                    connections.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    let sessions = sessions.clone();
                    tokio::spawn(async move {
                        let received = session(stream, answer).await;
                        sessions.lock().unwrap().push(received);
                    });
                }
            }
        });

        Self {
            addr,
            connections,
            sessions,
            task,
        }
    }

    ///
    #[must_use]
    pub const fn addr(&self) -> std::net::SocketAddr {
        self.addr
    }

    /// Connections accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Wait until `count` connections are closed, and return what they
    /// received.
    pub async fn sessions(&self, count: usize) -> Vec<Received> {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                {
                    let sessions = self.sessions.lock().unwrap();
                    if sessions.len() >= count {
                        return sessions.clone();
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{count} downstream sessions expected"))
    }
}

impl Drop for FakeMta {
    fn drop(&mut self) {
        self.task.abort();
    }
}
