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

use vfilter_common::ValidationStrategy;

/// Dialect spoken on a listener.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumVariantNames,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// After-queue filter: the message is received locally, then re-injected.
    Smtp,
    /// Before-queue filter: the envelope is relayed live to the downstream.
    Esmtp,
    /// Sendmail milter protocol, version 6.
    Milter,
    /// Raw bytes until the peer closes, the verdict is written back.
    Netcat,
}

impl Protocol {
    /// Does the dialect re-inject the messages to a downstream server.
    #[must_use]
    pub const fn needs_downstream(self) -> bool {
        matches!(self, Self::Smtp | Self::Esmtp)
    }
}

/// `[main]`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMain {
    /// Name used in the greeting and the replies.
    #[serde(default = "FieldMain::hostname")]
    pub hostname: String,
    /// Where the messages are written while they are scanned.
    #[serde(default = "FieldMain::default_spool_dir")]
    pub spool_dir: std::path::PathBuf,
    /// Where deleted messages are archived, nothing is kept if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trash_dir: Option<std::path::PathBuf>,
    /// In bytes, `0` means unlimited.
    #[serde(default = "FieldMain::default_max_message_size")]
    pub max_message_size: usize,
    /// How envelope addresses are checked.
    #[serde(default)]
    pub address_validation: ValidationStrategy,
    /// Name sent in the EHLO to the downstream server.
    #[serde(default = "FieldMain::hostname")]
    pub outgoing_helo: String,
    /// Timeout of each step of the re-injection.
    #[serde(with = "humantime_serde", default = "FieldMain::default_forward_timeout")]
    pub forward_timeout: std::time::Duration,
    /// Delay before a silent client is disconnected.
    #[serde(with = "humantime_serde", default = "FieldMain::default_command_timeout")]
    pub command_timeout: std::time::Duration,
    /// Prefix of the headers written by the built-in plugins.
    #[serde(default = "FieldMain::default_prepend_header_prefix")]
    pub prepend_header_prefix: String,
    /// Sections of the scanners, in execution order.
    #[serde(default)]
    pub scanners: Vec<String>,
    /// Sections of the prependers, in execution order.
    #[serde(default)]
    pub prependers: Vec<String>,
    /// Sections of the appenders, in execution order.
    #[serde(default)]
    pub appenders: Vec<String>,
}

/// `[[listeners]]`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldListener {
    ///
    pub protocol: Protocol,
    ///
    pub bind: std::net::SocketAddr,
    /// Where the messages are re-injected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downstream: Option<std::net::SocketAddr>,
}

/// `[esmtp]`
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldEsmtp {
    /// Forward only the first recipient to the downstream server.
    #[serde(default)]
    pub ignore_multiple_recipients: bool,
}

/// `[netcat]`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldNetcat {
    /// Recipient of the messages, the dialect has no envelope.
    #[serde(default = "FieldNetcat::default_recipient")]
    pub default_recipient: String,
}

/// `[performance]`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldPerformance {
    ///
    #[serde(default = "FieldPerformance::default_min_workers")]
    pub min_workers: usize,
    ///
    #[serde(default = "FieldPerformance::default_max_workers")]
    pub max_workers: usize,
    /// Connections accepted but not handled yet.
    #[serde(default = "FieldPerformance::default_backlog")]
    pub backlog: usize,
    /// Period of the worker count adjustment.
    #[serde(with = "humantime_serde", default = "FieldPerformance::default_scale_interval")]
    pub scale_interval: std::time::Duration,
}

/// `[control]`
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldControl {
    /// Path of the unix socket, the control channel is disabled if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<std::path::PathBuf>,
}

/// `[logs]`
#[serde_with::serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldLogs {
    ///
    #[serde(default = "FieldLogs::default_filename")]
    pub filename: std::path::PathBuf,
    /// Filtering directives, `"warn"` or `"vfilter_server=debug"`.
    #[serde_as(as = "Vec<serde_with::DisplayFromStr>")]
    #[serde(default = "FieldLogs::default_level")]
    pub level: Vec<tracing_subscriber::filter::Directive>,
}

impl PartialEq for FieldLogs {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename
            && self.level.iter().map(ToString::to_string).eq(other
                .level
                .iter()
                .map(ToString::to_string))
    }
}

impl Eq for FieldLogs {}

/// `[plugin.<section>]`: options of one plugin instance.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PluginSection {
    /// Identifier in the registry, the name of the section if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    /// Every other key of the section.
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}
