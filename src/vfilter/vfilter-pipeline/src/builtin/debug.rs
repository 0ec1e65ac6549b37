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

use crate::plugin::{OptionSpec, Plugin, PluginError, PluginOptions, ScanResult, Scanner};
use vfilter_common::{Suspect, TagValue};

pub const SCHEMA: &[OptionSpec] = &[OptionSpec {
    name: "message",
    default: Some(""),
    description: "line added to the debug output",
}];

#[derive(serde::Deserialize)]
struct Params {
    #[serde(default)]
    message: String,
}

/// Record what the pipeline knows about the message. Never decides.
pub struct DebugTrace {
    section: String,
    message: String,
}

impl DebugTrace {
    /// # Errors
    ///
    /// * `message` is not a string
    pub fn new(options: &PluginOptions) -> Result<Self, PluginError> {
        let Params { message } = options.parse()?;
        Ok(Self {
            section: options.section().to_owned(),
            message,
        })
    }
}

#[async_trait::async_trait]
impl Plugin for DebugTrace {
    fn section(&self) -> &str {
        &self.section
    }
}

#[async_trait::async_trait]
impl Scanner for DebugTrace {
    async fn examine(&self, suspect: &mut Suspect) -> Result<ScanResult, PluginError> {
        let summary = format!(
            "{}: from=<{}> to={} size={} modified={} decisions={:?}",
            self.section,
            suspect.from_address(),
            suspect
                .to()
                .iter()
                .map(|rcpt| format!("<{}>", rcpt.full()))
                .collect::<Vec<_>>()
                .join(","),
            suspect.size(),
            suspect.is_modified(),
            suspect.tags().decisions,
        );
        tracing::debug!(suspect = %suspect.id(), "{summary}");

        suspect
            .tags_mut()
            .extra
            .insert(self.section.clone(), TagValue::from(true));
        suspect.debug(summary);
        if !self.message.is_empty() {
            suspect.debug(format!("{}: {}", self.section, self.message));
        }
        Ok(ScanResult::dunno())
    }
}
