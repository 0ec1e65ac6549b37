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

use vfilter_common::{Action, Suspect};

/// Failure of a plugin, the plugin is skipped for the message.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// A required option is absent from the section.
    #[error("missing required option '{0}'")]
    MissingOption(String),
    /// An option has an unusable value.
    #[error("invalid option '{option}': {reason}")]
    InvalidOption {
        /// name of the option
        option: String,
        /// what is wrong with it
        reason: String,
    },
    /// Access to a file or a socket failed.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The plugin panicked.
    #[error("panicked: {0}")]
    Panic(String),
    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

/// Verdict of a scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    ///
    pub action: Action,
    /// Text sent to the client with the reply.
    pub message: Option<String>,
}

impl ScanResult {
    /// No opinion, the next scanner decides.
    #[must_use]
    pub const fn dunno() -> Self {
        Self {
            action: Action::Dunno,
            message: None,
        }
    }

    ///
    #[must_use]
    pub fn new(action: Action, message: impl Into<String>) -> Self {
        Self {
            action,
            message: Some(message.into()),
        }
    }
}

/// An option understood by a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    ///
    pub name: &'static str,
    /// `None` if the option is required.
    pub default: Option<&'static str>,
    ///
    pub description: &'static str,
}

/// Result of the self-test of a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintReport {
    ///
    pub passed: bool,
    /// Diagnostics, for the operator.
    pub messages: Vec<String>,
}

impl LintReport {
    /// Passed, nothing to say.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            passed: true,
            messages: vec![],
        }
    }

    /// Failed with `message`.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            messages: vec![message.into()],
        }
    }
}

/// What every plugin exposes, whatever its phase.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Name of the configuration section of this instance.
    fn section(&self) -> &str;

    /// Check the plugin can work: files readable, services reachable.
    async fn lint(&self) -> LintReport {
        LintReport::ok()
    }
}

/// Inspects the message and may decide its fate.
#[async_trait::async_trait]
pub trait Scanner: Plugin {
    /// Examine the suspect. Any action but [`Action::Dunno`] stops the scan.
    async fn examine(&self, suspect: &mut Suspect) -> Result<ScanResult, PluginError>;
}

/// Runs before the scanners, and may change which scanners run.
#[async_trait::async_trait]
pub trait Prepender: Plugin {
    /// Return a new list of scanners, or `None` to keep `scanners`.
    async fn adjust(
        &self,
        suspect: &Suspect,
        scanners: &[std::sync::Arc<dyn Scanner>],
    ) -> Result<Option<Vec<std::sync::Arc<dyn Scanner>>>, PluginError>;
}

/// Runs once the message was disposed of, unless it was deferred.
#[async_trait::async_trait]
pub trait Appender: Plugin {
    ///
    async fn process(&self, suspect: &Suspect, action: Action) -> Result<(), PluginError>;
}

/// Options of a plugin section, checked against the schema of the plugin.
#[derive(Debug, Clone, Default)]
pub struct PluginOptions {
    section: String,
    values: serde_json::Map<String, serde_json::Value>,
}

impl PluginOptions {
    ///
    #[must_use]
    pub fn new(
        section: impl Into<String>,
        values: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            section: section.into(),
            values,
        }
    }

    /// Name of the section.
    #[must_use]
    pub fn section(&self) -> &str {
        &self.section
    }

    /// Raw value of an option.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name)
    }

    /// Check the options against `schema`. Unknown options are returned as
    /// warnings.
    ///
    /// # Errors
    ///
    /// * a required option is missing
    pub fn check(&self, schema: &[OptionSpec]) -> Result<Vec<String>, PluginError> {
        if let Some(missing) = schema
            .iter()
            .find(|spec| spec.default.is_none() && !self.values.contains_key(spec.name))
        {
            return Err(PluginError::MissingOption(missing.name.to_owned()));
        }

        Ok(self
            .values
            .keys()
            .filter(|key| !schema.iter().any(|spec| spec.name == key.as_str()))
            .map(|key| format!("unknown option '{key}' in section '{}'", self.section))
            .collect())
    }

    /// Deserialize the options into the parameters of a plugin.
    ///
    /// # Errors
    ///
    /// * an option has the wrong type
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, PluginError> {
        serde_json::from_value(serde_json::Value::Object(self.values.clone())).map_err(|e| {
            PluginError::InvalidOption {
                option: self.section.clone(),
                reason: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SCHEMA: &[OptionSpec] = &[
        OptionSpec {
            name: "filename",
            default: None,
            description: "rules file",
        },
        OptionSpec {
            name: "verbose",
            default: Some("false"),
            description: "",
        },
    ];

    fn options(value: serde_json::Value) -> PluginOptions {
        match value {
            serde_json::Value::Object(map) => PluginOptions::new("rules", map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn check() {
        assert_eq!(
            options(serde_json::json!({ "filename": "/tmp/x" }))
                .check(SCHEMA)
                .unwrap(),
            Vec::<String>::new()
        );
        assert_eq!(
            options(serde_json::json!({ "filename": "/tmp/x", "colour": "red" }))
                .check(SCHEMA)
                .unwrap(),
            vec!["unknown option 'colour' in section 'rules'".to_owned()]
        );
        assert!(matches!(
            options(serde_json::json!({ "verbose": true })).check(SCHEMA),
            Err(PluginError::MissingOption(name)) if name == "filename"
        ));
    }

    #[test]
    fn parse() {
        #[derive(serde::Deserialize)]
        struct Params {
            filename: String,
            #[serde(default)]
            verbose: bool,
        }

        let params = options(serde_json::json!({ "filename": "/tmp/x" }))
            .parse::<Params>()
            .unwrap();
        assert_eq!(params.filename, "/tmp/x");
        assert!(!params.verbose);

        assert!(options(serde_json::json!({ "filename": 1 }))
            .parse::<Params>()
            .is_err());
    }
}
