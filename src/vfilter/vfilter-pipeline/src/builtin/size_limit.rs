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
use vfilter_common::{Action, Suspect};

pub const SCHEMA: &[OptionSpec] = &[
    OptionSpec {
        name: "max_size",
        default: None,
        description: "largest accepted message, in bytes",
    },
    OptionSpec {
        name: "action",
        default: Some("REJECT"),
        description: "action on larger messages",
    },
    OptionSpec {
        name: "message",
        default: Some("Message size exceeds fixed maximum message size"),
        description: "reply text",
    },
];

#[derive(serde::Deserialize)]
struct Params {
    max_size: u64,
    #[serde(default = "Params::default_action")]
    action: Action,
    #[serde(default = "Params::default_message")]
    message: String,
}

impl Params {
    const fn default_action() -> Action {
        Action::Reject
    }

    fn default_message() -> String {
        "Message size exceeds fixed maximum message size".to_owned()
    }
}

/// Decide on messages larger than `max_size`.
pub struct SizeLimit {
    section: String,
    params: Params,
}

impl SizeLimit {
    /// # Errors
    ///
    /// * `max_size` is missing or not a number
    pub fn new(options: &PluginOptions) -> Result<Self, PluginError> {
        Ok(Self {
            section: options.section().to_owned(),
            params: options.parse()?,
        })
    }
}

#[async_trait::async_trait]
impl Plugin for SizeLimit {
    fn section(&self) -> &str {
        &self.section
    }
}

#[async_trait::async_trait]
impl Scanner for SizeLimit {
    async fn examine(&self, suspect: &mut Suspect) -> Result<ScanResult, PluginError> {
        Ok(if suspect.size() > self.params.max_size {
            ScanResult::new(self.params.action, self.params.message.clone())
        } else {
            ScanResult::dunno()
        })
    }
}
