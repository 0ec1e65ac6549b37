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
use vfilter_common::{Action, Suspect, Tags};

pub const SCHEMA: &[OptionSpec] = &[
    OptionSpec {
        name: "tag",
        default: None,
        description: "one of virus, spam, highspam, blocked",
    },
    OptionSpec {
        name: "action",
        default: None,
        description: "action when the tag is set",
    },
    OptionSpec {
        name: "message",
        default: Some(""),
        description: "reply text",
    },
];

#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
enum Tag {
    Virus,
    Spam,
    Highspam,
    Blocked,
}

impl Tag {
    fn is_set(self, tags: &Tags) -> bool {
        match self {
            Self::Virus => tags.is_virus(),
            Self::Spam => tags.is_spam(),
            Self::Highspam => tags.is_highspam(),
            Self::Blocked => tags.is_blocked(),
        }
    }
}

#[derive(serde::Deserialize)]
struct Params {
    tag: Tag,
    action: Action,
    #[serde(default)]
    message: String,
}

/// Turn a verdict tag written by a previous scanner into an action.
pub struct ActionOverride {
    section: String,
    params: Params,
}

impl ActionOverride {
    /// # Errors
    ///
    /// * `tag` or `action` is missing or unknown
    pub fn new(options: &PluginOptions) -> Result<Self, PluginError> {
        Ok(Self {
            section: options.section().to_owned(),
            params: options.parse()?,
        })
    }
}

#[async_trait::async_trait]
impl Plugin for ActionOverride {
    fn section(&self) -> &str {
        &self.section
    }
}

#[async_trait::async_trait]
impl Scanner for ActionOverride {
    async fn examine(&self, suspect: &mut Suspect) -> Result<ScanResult, PluginError> {
        Ok(if self.params.tag.is_set(suspect.tags()) {
            ScanResult::new(self.params.action, self.params.message.clone())
        } else {
            ScanResult::dunno()
        })
    }
}
