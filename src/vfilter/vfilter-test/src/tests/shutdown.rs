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
    config::{local_test, with_listener},
    fake_mta::{accept_all, FakeMta},
    relay::{Client, Relay},
};
use vfilter_config::Protocol;

#[test_log::test(tokio::test)]
async fn listeners_are_closed_on_shutdown() {
    let workdir = tempfile::tempdir().unwrap();
    let mta = FakeMta::start(accept_all).await;

    let mut config = local_test(workdir.path());
    with_listener(&mut config, Protocol::Smtp, Some(mta.addr()));
    with_listener(&mut config, Protocol::Netcat, None);
    let relay = Relay::start(config).await;
    let (smtp, netcat) = (relay.addr(Protocol::Smtp), relay.addr(Protocol::Netcat));

    let (mut client, _) = Client::connect(smtp).await;
    client.send("QUIT\r\n").await;
    assert!(client.is_closed().await);

    relay.stop().await;

    assert!(tokio::net::TcpStream::connect(smtp).await.is_err());
    assert!(tokio::net::TcpStream::connect(netcat).await.is_err());
}

#[test_log::test(tokio::test)]
async fn unbindable_listener_is_skipped() {
    let workdir = tempfile::tempdir().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();

    let mut config = local_test(workdir.path());
    with_listener(&mut config, Protocol::Netcat, None);
    config.listeners.push(vfilter_config::FieldListener {
        protocol: Protocol::Milter,
        bind: taken.local_addr().unwrap(),
        downstream: None,
    });
    let relay = Relay::start(config).await;

    assert_eq!(
        super::netcat::verdict(relay.addr(Protocol::Netcat), b"Subject: hi\r\n\r\n").await,
        "DUNNO: \n"
    );

    relay.stop().await;
}
