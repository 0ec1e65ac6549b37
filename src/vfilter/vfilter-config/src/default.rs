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
    field::{
        FieldControl, FieldEsmtp, FieldLogs, FieldMain, FieldNetcat, FieldPerformance,
    },
    Config,
};

impl Default for Config {
    fn default() -> Self {
        Self {
            main: FieldMain::default(),
            listeners: vec![],
            esmtp: FieldEsmtp::default(),
            netcat: FieldNetcat::default(),
            performance: FieldPerformance::default(),
            control: FieldControl::default(),
            logs: FieldLogs::default(),
            plugin: std::collections::BTreeMap::default(),
            path: None,
        }
    }
}

impl Default for FieldMain {
    fn default() -> Self {
        Self {
            hostname: Self::hostname(),
            spool_dir: Self::default_spool_dir(),
            trash_dir: None,
            max_message_size: Self::default_max_message_size(),
            address_validation: vfilter_common::ValidationStrategy::default(),
            outgoing_helo: Self::hostname(),
            forward_timeout: Self::default_forward_timeout(),
            command_timeout: Self::default_command_timeout(),
            prepend_header_prefix: Self::default_prepend_header_prefix(),
            scanners: vec![],
            prependers: vec![],
            appenders: vec![],
        }
    }
}

impl FieldMain {
    pub(crate) fn hostname() -> String {
        hostname::get().map_or_else(
            |_| "localhost".to_owned(),
            |name| name.to_string_lossy().to_string(),
        )
    }

    pub(crate) fn default_spool_dir() -> std::path::PathBuf {
        "/var/spool/vfilter".into()
    }

    pub(crate) const fn default_max_message_size() -> usize {
        20 * 1024 * 1024
    }

    pub(crate) const fn default_forward_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(30)
    }

    pub(crate) const fn default_command_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(300)
    }

    pub(crate) fn default_prepend_header_prefix() -> String {
        "X-Vfilter-".to_owned()
    }
}

impl Default for FieldNetcat {
    fn default() -> Self {
        Self {
            default_recipient: Self::default_recipient(),
        }
    }
}

impl FieldNetcat {
    pub(crate) fn default_recipient() -> String {
        "root@localhost".to_owned()
    }
}

impl Default for FieldPerformance {
    fn default() -> Self {
        Self {
            min_workers: Self::default_min_workers(),
            max_workers: Self::default_max_workers(),
            backlog: Self::default_backlog(),
            scale_interval: Self::default_scale_interval(),
        }
    }
}

impl FieldPerformance {
    pub(crate) const fn default_min_workers() -> usize {
        2
    }

    pub(crate) const fn default_max_workers() -> usize {
        16
    }

    pub(crate) const fn default_backlog() -> usize {
        64
    }

    pub(crate) const fn default_scale_interval() -> std::time::Duration {
        std::time::Duration::from_secs(1)
    }
}

impl Default for FieldLogs {
    fn default() -> Self {
        Self {
            filename: Self::default_filename(),
            level: Self::default_level(),
        }
    }
}

impl FieldLogs {
    pub(crate) fn default_filename() -> std::path::PathBuf {
        "/var/log/vfilter/vfilter.log".into()
    }

    pub(crate) fn default_level() -> Vec<tracing_subscriber::filter::Directive> {
        vec!["warn".parse().expect("hardcoded value is valid")]
    }
}
