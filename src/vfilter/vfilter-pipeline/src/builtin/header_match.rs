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

use crate::plugin::{LintReport, OptionSpec, Plugin, PluginError, PluginOptions, ScanResult, Scanner};
use vfilter_common::{Action, Suspect};

pub const SCHEMA: &[OptionSpec] = &[OptionSpec {
    name: "filename",
    default: None,
    description: "rules file, one `header<TAB>regex<TAB>action<TAB>message` per line",
}];

#[derive(serde::Deserialize)]
struct Params {
    filename: std::path::PathBuf,
}

/// One line of the rules file.
#[derive(Debug)]
struct Rule {
    header: String,
    regex: regex::Regex,
    action: Action,
    message: String,
}

impl Rule {
    /// `envelope_from` and `envelope_to` match the envelope instead of a header.
    fn values<'a>(&self, suspect: &'a Suspect, headers: &'a [(String, String)]) -> Vec<&'a str> {
        match self.header.as_str() {
            "envelope_from" => vec![suspect.from_address()],
            "envelope_to" => suspect.to().iter().map(vfilter_common::Address::full).collect(),
            name => headers
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
                .collect(),
        }
    }
}

fn parse_rules(filename: &std::path::Path, content: &str) -> Result<Vec<Rule>, PluginError> {
    let mut rules = vec![];
    for (number, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let invalid = |reason: String| {
            PluginError::Failed(format!("{}:{}: {reason}", filename.display(), number + 1))
        };

        let mut fields = line.splitn(4, '\t');
        let (Some(header), Some(regex), Some(action)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(invalid("expected at least 3 tab separated fields".to_owned()));
        };
        rules.push(Rule {
            header: header.trim().to_owned(),
            regex: regex::Regex::new(regex).map_err(|e| invalid(e.to_string()))?,
            action: action
                .trim()
                .parse()
                .map_err(|_| invalid(format!("unknown action '{action}'")))?,
            message: fields.next().unwrap_or_default().trim().to_owned(),
        });
    }
    Ok(rules)
}

#[derive(Default, Clone)]
struct Loaded {
    modified: Option<std::time::SystemTime>,
    rules: std::sync::Arc<Vec<Rule>>,
}

/// Decide with the first rule whose regular expression matches a header.
///
/// The rules are compiled once, and compiled again when the file changes.
/// One caller at a time reloads them, the others keep the previous set
/// until the new one is swapped in. A file that does not compile leaves the
/// previous set in place.
pub struct HeaderMatch {
    section: String,
    filename: std::path::PathBuf,
    loaded: tokio::sync::RwLock<Loaded>,
    reload: tokio::sync::Mutex<()>,
}

impl HeaderMatch {
    /// # Errors
    ///
    /// * `filename` is missing
    pub fn new(options: &PluginOptions) -> Result<Self, PluginError> {
        let Params { filename } = options.parse()?;
        Ok(Self {
            section: options.section().to_owned(),
            filename,
            loaded: tokio::sync::RwLock::default(),
            reload: tokio::sync::Mutex::default(),
        })
    }

    async fn compile(&self) -> Result<Vec<Rule>, PluginError> {
        let content = tokio::fs::read_to_string(&self.filename).await?;
        parse_rules(&self.filename, &content)
    }

    async fn rules(&self) -> Result<std::sync::Arc<Vec<Rule>>, PluginError> {
        let modified = tokio::fs::metadata(&self.filename).await?.modified()?;

        let current = self.loaded.read().await.clone();
        if current.modified == Some(modified) {
            return Ok(current.rules);
        }

        let _guard = match self.reload.try_lock() {
            Ok(guard) => guard,
            // nothing to fall back on before the first load
            Err(_) if current.modified.is_none() => self.reload.lock().await,
            Err(_) => return Ok(current.rules),
        };

        let current = self.loaded.read().await.clone();
        if current.modified == Some(modified) {
            return Ok(current.rules);
        }

        match self.compile().await {
            Ok(rules) => {
                tracing::info!(
                    section = %self.section,
                    count = rules.len(),
                    "Rules reloaded."
                );
                let rules = std::sync::Arc::new(rules);
                *self.loaded.write().await = Loaded {
                    modified: Some(modified),
                    rules: rules.clone(),
                };
                Ok(rules)
            }
            Err(e) if current.modified.is_none() => Err(e),
            Err(e) => {
                tracing::error!(
                    section = %self.section,
                    %e,
                    "Rules not reloaded, keeping the previous ones."
                );
                self.loaded.write().await.modified = Some(modified);
                Ok(current.rules)
            }
        }
    }
}

#[async_trait::async_trait]
impl Plugin for HeaderMatch {
    fn section(&self) -> &str {
        &self.section
    }

    async fn lint(&self) -> LintReport {
        match self.compile().await {
            Ok(rules) => LintReport {
                passed: true,
                messages: vec![format!(
                    "{} rules loaded from {}",
                    rules.len(),
                    self.filename.display()
                )],
            },
            Err(e) => LintReport::failed(e.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl Scanner for HeaderMatch {
    async fn examine(&self, suspect: &mut Suspect) -> Result<ScanResult, PluginError> {
        let rules = self.rules().await?;
        let headers = suspect.headers().await?;

        let matched = rules.iter().find(|rule| {
            rule.values(suspect, &headers)
                .iter()
                .any(|value| rule.regex.is_match(value.trim()))
        });

        Ok(match matched {
            Some(rule) => {
                suspect.debug(format!(
                    "{}: rule '{}' on {} matched",
                    self.section,
                    rule.regex.as_str(),
                    rule.header
                ));
                ScanResult::new(rule.action, rule.message.clone())
            }
            None => ScanResult::dunno(),
        })
    }
}
