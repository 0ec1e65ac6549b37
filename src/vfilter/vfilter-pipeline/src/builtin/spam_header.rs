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
use vfilter_common::Suspect;

pub const SCHEMA: &[OptionSpec] = &[
    OptionSpec {
        name: "spam_header",
        default: Some("Spamstatus"),
        description: "name of the spam header, after the prefix",
    },
    OptionSpec {
        name: "virus_header",
        default: Some("Virus"),
        description: "name of the virus header, after the prefix",
    },
];

#[derive(serde::Deserialize)]
struct Params {
    #[serde(default = "Params::default_spam_header")]
    spam_header: String,
    #[serde(default = "Params::default_virus_header")]
    virus_header: String,
}

impl Params {
    fn default_spam_header() -> String {
        "Spamstatus".to_owned()
    }

    fn default_virus_header() -> String {
        "Virus".to_owned()
    }
}

/// Stage `<prefix>Spamstatus: YES|NO` and `<prefix>Virus: YES|NO` from the
/// verdicts of the previous scanners. Never decides.
pub struct SpamHeader {
    section: String,
    spam_header: String,
    virus_header: String,
}

impl SpamHeader {
    /// # Errors
    ///
    /// * a header name is not a string
    pub fn new(options: &PluginOptions, prefix: &str) -> Result<Self, PluginError> {
        let params = options.parse::<Params>()?;
        Ok(Self {
            section: options.section().to_owned(),
            spam_header: format!("{prefix}{}", params.spam_header),
            virus_header: format!("{prefix}{}", params.virus_header),
        })
    }
}

#[async_trait::async_trait]
impl Plugin for SpamHeader {
    fn section(&self) -> &str {
        &self.section
    }
}

#[async_trait::async_trait]
impl Scanner for SpamHeader {
    async fn examine(&self, suspect: &mut Suspect) -> Result<ScanResult, PluginError> {
        let yes_no = |value| if value { "YES" } else { "NO" };
        let spam = yes_no(suspect.tags().is_spam());
        let virus = yes_no(suspect.tags().is_virus());

        suspect.add_header(&self.spam_header, spam, false).await?;
        suspect.add_header(&self.virus_header, virus, false).await?;
        Ok(ScanResult::dunno())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::tests::{options, suspect};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn staged() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = SpamHeader::new(&options("headers", serde_json::json!({})), "X-Vfilter-").unwrap();

        let mut message = suspect(dir.path(), &["r@y.com"], "Subject: a\r\n\r\nhi\r\n").await;
        message.tags_mut().spam.insert("rspamd".to_owned(), true);
        assert_eq!(scanner.examine(&mut message).await.unwrap(), ScanResult::dunno());
        assert_eq!(
            message.staged_headers(),
            [
                ("X-Vfilter-Spamstatus".to_owned(), "YES".to_owned()),
                ("X-Vfilter-Virus".to_owned(), "NO".to_owned()),
            ]
        );
        assert!(!message.is_modified());

        message.tags_mut().spam.insert("rspamd".to_owned(), false);
        scanner.examine(&mut message).await.unwrap();
        assert_eq!(message.staged_headers()[0].1, "NO");
        assert_eq!(message.staged_headers().len(), 2);
    }
}
