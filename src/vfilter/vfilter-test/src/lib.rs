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

//! End-to-end tests of the relay: the server is started on loopback
//! sockets, in front of a fake downstream MTA.

#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod fake_mta;
pub mod relay;

#[cfg(test)]
mod tests;

/// Play a SMTP conversation with a relay listening with the `smtp` dialect
/// in front of a [`fake_mta::FakeMta`] accepting everything.
///
/// `expected` starts with the greeting, then one reply per `input`.
/// `configure` can change the configuration before the relay starts.
#[macro_export]
macro_rules! run_test {
    (
        fn $name:ident,
        input = [ $( $input:expr ),* $(,)? ],
        expected = [ $( $expected:expr ),* $(,)? ]
        $(, configure = $configure:expr )?
        $(, received = $received:expr )?
        $(,)?
    ) => {
        #[test_log::test(tokio::test)]
        async fn $name() {
            let workdir = tempfile::tempdir().unwrap();
            let mta = $crate::fake_mta::FakeMta::start($crate::fake_mta::accept_all).await;

            #[allow(unused_mut)]
            let mut config = $crate::config::local_test(workdir.path());
            $crate::config::with_listener(
                &mut config,
                vfilter_config::Protocol::Smtp,
                Some(mta.addr()),
            );
            $( ($configure)(&mut config); )?

            let relay = $crate::relay::Relay::start(config).await;
            let (mut client, greeting) =
                $crate::relay::Client::connect(relay.addr(vfilter_config::Protocol::Smtp)).await;

            let input: Vec<String> = vec![ $( $input.to_string() ),* ];
            let expected: Vec<String> = vec![ $( $expected.to_string() ),* ];
            assert_eq!(input.len() + 1, expected.len(), "one reply per input, and the greeting");

            pretty_assertions::assert_eq!(greeting.to_string(), expected[0]);
            for (command, expected) in input.iter().zip(&expected[1..]) {
                let reply = client.send(command).await;
                pretty_assertions::assert_eq!(reply.to_string(), *expected, "after {command:?}");
            }
            drop(client);

            $(
                let check: fn(Vec<$crate::fake_mta::Received>) = $received;
                check(mta.sessions(1).await);
            )?

            relay.stop().await;
        }
    };
}
