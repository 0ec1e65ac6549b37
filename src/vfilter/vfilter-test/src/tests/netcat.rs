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
    relay::Relay,
};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use vfilter_config::Protocol;

/// Send `message`, close the writing side and read the verdict line.
pub async fn verdict(addr: std::net::SocketAddr, message: &[u8]) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(message).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut answer = String::new();
    tokio::time::timeout(
        std::time::Duration::from_secs(10),
        stream.read_to_string(&mut answer),
    )
    .await
    .unwrap()
    .unwrap();
    answer
}

#[rstest::rstest]
#[case::clean(b"Subject: hello\r\n\r\nhi\r\n", "DUNNO: \n")]
#[case::spam(b"Subject: cheap spam\r\n\r\nhi\r\n", "REJECT: spam detected\n")]
#[case::for_the_trap(b"Subject: hello\r\nX-Trap: 1\r\n\r\nhi\r\n", "DELETE: \n")]
#[case::empty(b"", "DUNNO: \n")]
#[test_log::test(tokio::test)]
async fn verdicts(#[case] message: &[u8], #[case] expected: &str) {
    let workdir = tempfile::tempdir().unwrap();
    let mut config = local_test(workdir.path());
    with_listener(&mut config, Protocol::Netcat, None);
    with_rules(
        &mut config,
        workdir.path(),
        &[
            "Subject\tspam\treject\tspam detected",
            "X-Trap\t.\tdelete\ttrapped",
        ],
    );
    let relay = Relay::start(config).await;

    assert_eq!(verdict(relay.addr(Protocol::Netcat), message).await, expected);

    relay.stop().await;
}

#[test_log::test(tokio::test)]
async fn too_large() {
    let workdir = tempfile::tempdir().unwrap();
    let mut config = local_test(workdir.path());
    config.main.max_message_size = 10;
    with_listener(&mut config, Protocol::Netcat, None);
    let relay = Relay::start(config).await;

    assert_eq!(
        verdict(
            relay.addr(Protocol::Netcat),
            b"Subject: hello\r\n\r\nhi\r\n"
        )
        .await,
        "REJECT: Message size exceeds fixed maximum message size\n"
    );

    relay.stop().await;
}
