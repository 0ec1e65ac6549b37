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
    fake_mta::{accept_all, unreachable, FakeMta, Received},
    relay::{Client, Relay},
    run_test,
};
use pretty_assertions::assert_eq;
use vfilter_config::Protocol;

/// Send one message with the smtp dialect, returns the reply to the end of
/// the data.
async fn send_one(relay: &Relay, subject: &str) -> String {
    let (mut client, _) = Client::connect(relay.addr(Protocol::Smtp)).await;
    for command in [
        "HELO client.example.com\r\n",
        "MAIL FROM:<s@x.com>\r\n",
        "RCPT TO:<r@y.com>\r\n",
        "DATA\r\n",
    ] {
        assert!(client.send(command).await.code().is_positive());
    }
    let reply = client
        .send(&format!("Subject: {subject}\r\n\r\nhi\r\n.\r\n"))
        .await;
    client.send("QUIT\r\n").await;
    reply.to_string()
}

run_test! {
    fn scenario_a_unmodified_message_is_forwarded,
    input = [
        "HELO client.example.com\r\n",
        "MAIL FROM:<s@x.com>\r\n",
        "RCPT TO:<r@y.com>\r\n",
        "DATA\r\n",
        "Subject: hello\r\n\r\nhi\r\n.\r\n",
        "QUIT\r\n",
    ],
    expected = [
        "220 testserver.com ESMTP vFilter\r\n",
        "250 testserver.com\r\n",
        "250 Ok\r\n",
        "250 Ok\r\n",
        "354 Enter data, end with <CRLF>.<CRLF>\r\n",
        "250 2.0.0 Ok: queued as 1234\r\n",
        "221 testserver.com Service closing transmission channel\r\n",
    ],
    received = |sessions| {
        assert_eq!(
            sessions,
            [Received {
                commands: [
                    "EHLO testserver.com",
                    "MAIL FROM:<s@x.com>",
                    "RCPT TO:<r@y.com>",
                    "DATA",
                    "QUIT",
                ]
                .map(str::to_owned)
                .to_vec(),
                messages: vec![b"Subject: hello\r\n\r\nhi\r\n".to_vec()],
            }]
        );
    }
}

#[test_log::test(tokio::test)]
async fn scenario_b_rejected_message_is_not_forwarded() {
    let workdir = tempfile::tempdir().unwrap();
    let mta = FakeMta::start(accept_all).await;

    let mut config = local_test(workdir.path());
    with_listener(&mut config, Protocol::Smtp, Some(mta.addr()));
    with_rules(
        &mut config,
        workdir.path(),
        &["Subject\tspam\treject\tspam detected"],
    );
    let relay = Relay::start(config).await;

    assert_eq!(send_one(&relay, "cheap spam").await, "550 spam detected\r\n");
    assert_eq!(mta.connections(), 0);

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn scenario_c_deleted_message_goes_to_trash() {
    let workdir = tempfile::tempdir().unwrap();
    let mta = FakeMta::start(accept_all).await;
    let trash_dir = workdir.path().join("trash");

    let mut config = local_test(workdir.path());
    config.main.trash_dir = Some(trash_dir.clone());
    with_listener(&mut config, Protocol::Smtp, Some(mta.addr()));
    with_rules(
        &mut config,
        workdir.path(),
        &["Subject\tattachment\tdelete\tblocked attachment"],
    );
    let relay = Relay::start(config).await;

    assert_eq!(send_one(&relay, "see attachment").await, "250 OK\r\n");
    assert_eq!(mta.connections(), 0);

    let archived = std::fs::read_dir(&trash_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.file_name().unwrap() != "trash.log")
        .collect::<Vec<_>>();
    assert_eq!(archived.len(), 1);
    assert_eq!(
        std::fs::read(&archived[0]).unwrap(),
        b"Subject: see attachment\r\n\r\nhi\r\n"
    );

    let log = std::fs::read_to_string(trash_dir.join("trash.log")).unwrap();
    assert!(log.contains("\ts@x.com\tr@y.com\trules\t"), "{log}");

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn scenario_d_unreachable_downstream_defers() {
    let workdir = tempfile::tempdir().unwrap();

    let mut config = local_test(workdir.path());
    with_listener(&mut config, Protocol::Smtp, Some(unreachable()));
    let relay = Relay::start(config).await;

    assert_eq!(
        send_one(&relay, "hello").await,
        "451 Requested action aborted: try again later\r\n"
    );

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn scenario_e_only_the_first_recipient_is_forwarded() {
    let workdir = tempfile::tempdir().unwrap();
    let mta = FakeMta::start(accept_all).await;

    let mut config = local_test(workdir.path());
    config.esmtp.ignore_multiple_recipients = true;
    with_listener(&mut config, Protocol::Esmtp, Some(mta.addr()));
    let relay = Relay::start(config).await;

    let (mut client, greeting) = Client::connect(relay.addr(Protocol::Esmtp)).await;
    assert_eq!(greeting.to_string(), "220 fake.downstream ESMTP\r\n");

    let exchange = [
        (
            "EHLO client.example.com\r\n",
            "250-fake.downstream\r\n250-XFORWARD NAME ADDR HELO\r\n250 8BITMIME\r\n",
        ),
        ("MAIL FROM:<s@x.com>\r\n", "250 2.1.0 Ok\r\n"),
        ("RCPT TO:<r@y.com>\r\n", "250 2.1.0 Ok\r\n"),
        ("RCPT TO:<t@y.com>\r\n", "250 Ok\r\n"),
        ("DATA\r\n", "354 Enter data, end with <CRLF>.<CRLF>\r\n"),
        (
            "Subject: hello\r\n\r\nhi\r\n.\r\n",
            "250 2.0.0 Ok: queued as 1234\r\n",
        ),
        (
            "QUIT\r\n",
            "221 testserver.com Service closing transmission channel\r\n",
        ),
    ];
    for (command, expected) in exchange {
        assert_eq!(client.send(command).await.to_string(), expected, "after {command:?}");
    }

    assert_eq!(
        mta.sessions(1).await,
        [Received {
            commands: [
                "EHLO client.example.com",
                "MAIL FROM:<s@x.com>",
                "RCPT TO:<r@y.com>",
                "DATA",
                "QUIT",
            ]
            .map(str::to_owned)
            .to_vec(),
            messages: vec![b"Subject: hello\r\n\r\nhi\r\n".to_vec()],
        }]
    );

    relay.stop().await;
}
