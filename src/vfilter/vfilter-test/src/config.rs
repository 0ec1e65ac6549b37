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

//! Configurations used by the tests.

use vfilter_config::{Config, FieldListener, PluginSection, Protocol};

/// Defaults with small timeouts and a worker pool, spool and logs under
/// `workdir`. No listener.
#[must_use]
pub fn local_test(workdir: &std::path::Path) -> Config {
    let mut config = Config::default();

    config.main.hostname = "testserver.com".to_owned();
    config.main.outgoing_helo = "testserver.com".to_owned();
    config.main.spool_dir = workdir.join("spool");
    config.main.forward_timeout = std::time::Duration::from_secs(5);
    config.main.command_timeout = std::time::Duration::from_secs(5);

    config.performance.min_workers = 2;
    config.performance.max_workers = 4;
    config.performance.scale_interval = std::time::Duration::from_millis(100);

    config.logs.filename = workdir.join("vfilter.log");
    config
}

/// Listen on an ephemeral loopback port with `protocol`.
pub fn with_listener(
    config: &mut Config,
    protocol: Protocol,
    downstream: Option<std::net::SocketAddr>,
) {
    config.listeners.push(FieldListener {
        protocol,
        bind: std::net::SocketAddr::from(([127, 0, 0, 1], 0)),
        downstream,
    });
}

/// Write a `header_match` rule file under `workdir` and configure it as the
/// `rules` scanner.
pub fn with_rules(config: &mut Config, workdir: &std::path::Path, rules: &[&str]) {
    let filename = workdir.join("rules.tsv");
    std::fs::write(&filename, rules.join("\n")).unwrap();

    config.main.scanners.push("rules".to_owned());
    config.plugin.insert(
        "rules".to_owned(),
        PluginSection {
            plugin: Some("header_match".to_owned()),
            options: serde_json::json!({ "filename": filename })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        },
    );
}
