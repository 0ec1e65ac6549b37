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
    relay::{MilterClient, Relay},
};
use pretty_assertions::assert_eq;
use vfilter_config::Protocol;
use vfilter_protocol::milter::Response;

async fn relay(
    configure: impl FnOnce(&mut vfilter_config::Config, &std::path::Path),
) -> (Relay, tempfile::TempDir) {
    let workdir = tempfile::tempdir().unwrap();
    let mut config = local_test(workdir.path());
    with_listener(&mut config, Protocol::Milter, None);
    configure(&mut config, workdir.path());
    (Relay::start(config).await, workdir)
}

#[test_log::test(tokio::test)]
async fn clean_message_continues() {
    let (relay, _workdir) = relay(|_, _| ()).await;

    let mut client = MilterClient::connect(relay.addr(Protocol::Milter)).await;
    client.send(b'D', b"Cj\0mx.example.com\0").await;
    let verdict = client
        .message("s@x.com", &["r@y.com"], &[("Subject", "hello")], b"hi\r\n")
        .await;
    assert_eq!(verdict, [Response::Continue.payload()]);
    client.quit().await;

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn staged_headers_are_added() {
    let (relay, _workdir) = relay(|config, _| {
        config.main.scanners.push("spam_header".to_owned());
    })
    .await;

    let mut client = MilterClient::connect(relay.addr(Protocol::Milter)).await;
    let verdict = client
        .message("s@x.com", &["r@y.com"], &[("Subject", "hello")], b"hi\r\n")
        .await;
    assert_eq!(
        verdict,
        [
            Response::AddHeader {
                name: "X-Vfilter-Spamstatus".to_owned(),
                value: "NO".to_owned(),
            }
            .payload(),
            Response::AddHeader {
                name: "X-Vfilter-Virus".to_owned(),
                value: "NO".to_owned(),
            }
            .payload(),
            Response::Continue.payload(),
        ]
    );
    client.quit().await;

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn rejection_carries_the_message() {
    let (relay, _workdir) = relay(|config, workdir| {
        with_rules(config, workdir, &["Subject\tspam\treject\tspam detected"]);
    })
    .await;

    let mut client = MilterClient::connect(relay.addr(Protocol::Milter)).await;
    let verdict = client
        .message("s@x.com", &["r@y.com"], &[("Subject", "cheap spam")], b"hi\r\n")
        .await;
    assert_eq!(
        verdict,
        [Response::ReplyCode("550 5.7.1 spam detected".to_owned()).payload()]
    );

    // the next message on the same connection starts from a clean envelope
    let verdict = client
        .message("s@x.com", &["r@y.com"], &[("Subject", "hello")], b"hi\r\n")
        .await;
    assert_eq!(verdict, [Response::Continue.payload()]);
    client.quit().await;

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn deletion_discards() {
    let (relay, _workdir) = relay(|config, workdir| {
        with_rules(
            config,
            workdir,
            &["envelope_to\t^trap@\tdelete\tspam trap"],
        );
    })
    .await;

    let mut client = MilterClient::connect(relay.addr(Protocol::Milter)).await;
    let verdict = client
        .message("s@x.com", &["trap@y.com"], &[("Subject", "hello")], b"hi\r\n")
        .await;
    assert_eq!(verdict, [Response::Discard.payload()]);
    client.quit().await;

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn aborted_message_is_forgotten() {
    let (relay, _workdir) = relay(|config, workdir| {
        with_rules(config, workdir, &["Subject\tspam\treject\tspam detected"]);
    })
    .await;

    let mut client = MilterClient::connect(relay.addr(Protocol::Milter)).await;
    client.step(b'M', b"<s@x.com>\0").await;
    client.step(b'R', b"<r@y.com>\0").await;
    client.step(b'L', b"Subject\0cheap spam\0").await;
    client.send(b'A', &[]).await;

    let verdict = client
        .message("s@x.com", &["r@y.com"], &[("Subject", "hello")], b"hi\r\n")
        .await;
    assert_eq!(verdict, [Response::Continue.payload()]);
    client.quit().await;

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn too_large() {
    let (relay, _workdir) = relay(|config, _| config.main.max_message_size = 64).await;

    let mut client = MilterClient::connect(relay.addr(Protocol::Milter)).await;
    let verdict = client
        .message(
            "s@x.com",
            &["r@y.com"],
            &[("Subject", "hello")],
            "X".repeat(100).as_bytes(),
        )
        .await;
    assert_eq!(
        verdict,
        [Response::ReplyCode(
            "552 5.3.4 Message size exceeds fixed maximum message size".to_owned()
        )
        .payload()]
    );
    client.quit().await;

    relay.stop().await;
}
