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

use crate::plugin::{OptionSpec, Plugin, PluginError, PluginOptions, Prepender, Scanner};
use vfilter_common::Suspect;

pub const SCHEMA: &[OptionSpec] = &[
    OptionSpec {
        name: "domains",
        default: None,
        description: "recipient domains the scanners are skipped for",
    },
    OptionSpec {
        name: "skip",
        default: None,
        description: "sections of the skipped scanners",
    },
];

#[derive(serde::Deserialize)]
struct Params {
    domains: Vec<String>,
    skip: Vec<String>,
}

/// Remove scanners for messages whose recipients all belong to `domains`.
pub struct PluginSkipper {
    section: String,
    params: Params,
}

impl PluginSkipper {
    /// # Errors
    ///
    /// * `domains` or `skip` is missing or not a list of strings
    pub fn new(options: &PluginOptions) -> Result<Self, PluginError> {
        Ok(Self {
            section: options.section().to_owned(),
            params: options.parse()?,
        })
    }
}

#[async_trait::async_trait]
impl Plugin for PluginSkipper {
    fn section(&self) -> &str {
        &self.section
    }
}

#[async_trait::async_trait]
impl Prepender for PluginSkipper {
    async fn adjust(
        &self,
        suspect: &Suspect,
        scanners: &[std::sync::Arc<dyn Scanner>],
    ) -> Result<Option<Vec<std::sync::Arc<dyn Scanner>>>, PluginError> {
        let all_listed = suspect.to().iter().all(|rcpt| {
            self.params
                .domains
                .iter()
                .any(|domain| domain.eq_ignore_ascii_case(rcpt.domain()))
        });
        if !all_listed {
            return Ok(None);
        }

        Ok(Some(
            scanners
                .iter()
                .filter(|scanner| !self.params.skip.iter().any(|s| s == scanner.section()))
                .cloned()
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builtin::{
            tests::{options, suspect},
            SizeLimit,
        },
    };
    use pretty_assertions::assert_eq;

    fn sections(scanners: &[std::sync::Arc<dyn Scanner>]) -> Vec<&str> {
        scanners.iter().map(|s| s.section()).collect()
    }

    #[tokio::test]
    async fn skip_for_listed_domains() {
        let dir = tempfile::tempdir().unwrap();
        let skipper = PluginSkipper::new(&options(
            "skipper",
            serde_json::json!({ "domains": ["internal.org"], "skip": ["size"] }),
        ))
        .unwrap();
        let scanners: Vec<std::sync::Arc<dyn Scanner>> = ["size", "other"]
            .into_iter()
            .map(|section| {
                std::sync::Arc::new(
                    SizeLimit::new(&options(section, serde_json::json!({ "max_size": 1 }))).unwrap(),
                ) as std::sync::Arc<dyn Scanner>
            })
            .collect();

        let internal = suspect(dir.path(), &["a@internal.org", "b@INTERNAL.org"], "\r\n").await;
        let adjusted = skipper.adjust(&internal, &scanners).await.unwrap().unwrap();
        assert_eq!(sections(&adjusted), ["other"]);

        let mixed = suspect(dir.path(), &["a@internal.org", "b@example.com"], "\r\n").await;
        assert!(skipper.adjust(&mixed, &scanners).await.unwrap().is_none());
    }
}
