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
    config::{local_test, with_listener, with_rules},
    fake_mta::{accept_all, refuse_recipients, unreachable, FakeMta, Received},
    relay::{Client, Relay},
};
use pretty_assertions::assert_eq;
use vfilter_config::Protocol;

async fn play(client: &mut Client, exchange: &[(&str, &str)]) {
    for (command, expected) in exchange {
        assert_eq!(
            client.send(command).await.to_string(),
            *expected,
            "after {command:?}"
        );
    }
}

#[test_log::test(tokio::test)]
async fn downstream_replies_are_relayed() {
    let workdir = tempfile::tempdir().unwrap();
    let mta = FakeMta::start(refuse_recipients).await;

    let mut config = local_test(workdir.path());
    with_listener(&mut config, Protocol::Esmtp, Some(mta.addr()));
    let relay = Relay::start(config).await;

    let (mut client, _) = Client::connect(relay.addr(Protocol::Esmtp)).await;
    play(
        &mut client,
        &[
            ("HELO client.example.com\r\n", "250 fake.downstream\r\n"),
            ("MAIL FROM:<s@x.com>\r\n", "250 2.1.0 Ok\r\n"),
            (
                "RCPT TO:<r@y.com>\r\n",
                "550 5.1.1 Recipient address rejected: User unknown\r\n",
            ),
            ("DATA\r\n", "503 Bad command sequence\r\n"),
            ("NOOP\r\n", "250 2.1.0 Ok\r\n"),
            (
                "QUIT\r\n",
                "221 testserver.com Service closing transmission channel\r\n",
            ),
        ],
    )
    .await;

    assert_eq!(
        mta.sessions(1).await[0].commands,
        [
            "HELO client.example.com",
            "MAIL FROM:<s@x.com>",
            "RCPT TO:<r@y.com>",
            "NOOP",
            "QUIT"
        ]
    );

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn invalid_address_is_not_relayed() {
    let workdir = tempfile::tempdir().unwrap();
    let mta = FakeMta::start(accept_all).await;

    let mut config = local_test(workdir.path());
    with_listener(&mut config, Protocol::Esmtp, Some(mta.addr()));
    let relay = Relay::start(config).await;

    let (mut client, _) = Client::connect(relay.addr(Protocol::Esmtp)).await;
    client.send("HELO client.example.com\r\n").await;
    client.send("MAIL FROM:<s@x.com>\r\n").await;
    let reply = client.send("RCPT TO:<no-domain>\r\n").await;
    assert!(reply.code().is_error(), "{reply}");
    client.send("QUIT\r\n").await;

    assert!(!mta.sessions(1).await[0]
        .commands
        .iter()
        .any(|command| command.starts_with("RCPT")));

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn downstream_reopened_after_a_rejection() {
    let workdir = tempfile::tempdir().unwrap();
    let mta = FakeMta::start(accept_all).await;

    let mut config = local_test(workdir.path());
    with_listener(&mut config, Protocol::Esmtp, Some(mta.addr()));
    with_rules(
        &mut config,
        workdir.path(),
        &["Subject\tspam\treject\tspam detected"],
    );
    let relay = Relay::start(config).await;

    let (mut client, _) = Client::connect(relay.addr(Protocol::Esmtp)).await;
    play(
        &mut client,
        &[
            (
                "EHLO client.example.com\r\n",
                "250-fake.downstream\r\n250-XFORWARD NAME ADDR HELO\r\n250 8BITMIME\r\n",
            ),
            (
                "XFORWARD NAME=mx.example.com ADDR=192.0.2.1\r\n",
                "250 2.1.0 Ok\r\n",
            ),
            ("MAIL FROM:<s@x.com>\r\n", "250 2.1.0 Ok\r\n"),
            ("RCPT TO:<r@y.com>\r\n", "250 2.1.0 Ok\r\n"),
            ("DATA\r\n", "354 Enter data, end with <CRLF>.<CRLF>\r\n"),
            (
                "Subject: cheap spam\r\n\r\nhi\r\n.\r\n",
                "550 spam detected\r\n",
            ),
            ("MAIL FROM:<s@x.com>\r\n", "250 2.1.0 Ok\r\n"),
            ("RCPT TO:<r@y.com>\r\n", "250 2.1.0 Ok\r\n"),
            ("DATA\r\n", "354 Enter data, end with <CRLF>.<CRLF>\r\n"),
            (
                "Subject: hello\r\n\r\nhi\r\n.\r\n",
                "250 2.0.0 Ok: queued as 1234\r\n",
            ),
            (
                "QUIT\r\n",
                "221 testserver.com Service closing transmission channel\r\n",
            ),
        ],
    )
    .await;

    let sessions = mta.sessions(2).await;
    assert_eq!(
        sessions[0],
        Received {
            commands: [
                "EHLO client.example.com",
                "XFORWARD NAME=mx.example.com ADDR=192.0.2.1",
                "MAIL FROM:<s@x.com>",
                "RCPT TO:<r@y.com>",
                "QUIT",
            ]
            .map(str::to_owned)
            .to_vec(),
            messages: vec![],
        }
    );
    assert_eq!(
        sessions[1],
        Received {
            commands: [
                "EHLO client.example.com",
                "XFORWARD NAME=mx.example.com ADDR=192.0.2.1",
                "MAIL FROM:<s@x.com>",
                "RCPT TO:<r@y.com>",
                "DATA",
                "QUIT",
            ]
            .map(str::to_owned)
            .to_vec(),
            messages: vec![b"Subject: hello\r\n\r\nhi\r\n".to_vec()],
        }
    );

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn unreachable_downstream_closes_the_connection() {
    let workdir = tempfile::tempdir().unwrap();

    let mut config = local_test(workdir.path());
    with_listener(&mut config, Protocol::Esmtp, Some(unreachable()));
    let relay = Relay::start(config).await;

    let (mut client, greeting) = Client::connect(relay.addr(Protocol::Esmtp)).await;
    assert_eq!(
        greeting.to_string(),
        "421 testserver.com Service not available, closing transmission channel\r\n"
    );
    assert!(client.is_closed().await);

    relay.stop().await;
}
