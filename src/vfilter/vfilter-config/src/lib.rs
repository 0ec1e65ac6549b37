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

//! vFilter configuration
//!
//! The configuration is a TOML file, every field has a default value and
//! errors name the path of the offending option.

#![doc(html_no_source)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::multiple_crate_versions)]

mod default;
mod field;

pub use field::{
    FieldControl, FieldEsmtp, FieldListener, FieldLogs, FieldMain, FieldNetcat,
    FieldPerformance, PluginSection, Protocol,
};

/// Error produced while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file cannot be read.
    #[error("cannot read '{}': {source}", .path.display())]
    Io {
        /// path of the file
        path: std::path::PathBuf,
        /// underlying error
        source: std::io::Error,
    },
    /// The file is not a valid configuration.
    #[error("invalid value at '{path}': {message}")]
    Parse {
        /// path of the option, `main.max_message_size`
        path: String,
        /// what went wrong
        message: String,
    },
    /// The values are well formed but not consistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration of the relay.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    ///
    #[serde(default)]
    pub main: FieldMain,
    /// One listener per (protocol, address) pair.
    #[serde(default)]
    pub listeners: Vec<FieldListener>,
    ///
    #[serde(default)]
    pub esmtp: FieldEsmtp,
    ///
    #[serde(default)]
    pub netcat: FieldNetcat,
    ///
    #[serde(default)]
    pub performance: FieldPerformance,
    ///
    #[serde(default)]
    pub control: FieldControl,
    ///
    #[serde(default)]
    pub logs: FieldLogs,
    /// Options of the plugins, by section name.
    #[serde(default)]
    pub plugin: std::collections::BTreeMap<String, PluginSection>,
    /// Where the configuration was loaded from.
    #[serde(skip)]
    pub path: Option<std::path::PathBuf>,
}

impl Config {
    /// Parse and check a configuration.
    ///
    /// # Errors
    ///
    /// * the input is not valid TOML
    /// * an option has an invalid value or is unknown
    /// * see [`Config::validate`]
    pub fn from_toml(input: &str) -> Result<Self, Error> {
        let deserializer = toml::Deserializer::new(input);
        let config: Self =
            serde_path_to_error::deserialize(deserializer).map_err(|error| Error::Parse {
                path: error.path().to_string(),
                message: error.inner().message().to_owned(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and check the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// * see [`Config::from_toml`]
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&input)?;
        config.path = Some(path.to_path_buf());
        tracing::debug!(path = %path.display(), "Configuration loaded.");
        Ok(config)
    }

    /// Check the consistency of the values.
    ///
    /// # Errors
    ///
    /// * a re-injecting listener has no downstream
    /// * the worker bounds are empty or reversed
    /// * a section is listed twice in the pipeline
    pub fn validate(&self) -> Result<(), Error> {
        for listener in &self.listeners {
            if listener.protocol.needs_downstream() && listener.downstream.is_none() {
                return Err(Error::Invalid(format!(
                    "listener {} ({}) requires a downstream",
                    listener.bind, listener.protocol
                )));
            }
        }

        let performance = &self.performance;
        if performance.min_workers == 0 || performance.max_workers < performance.min_workers {
            return Err(Error::Invalid(format!(
                "workers bounds {}..={} are invalid",
                performance.min_workers, performance.max_workers
            )));
        }
        if performance.backlog == 0 {
            return Err(Error::Invalid("backlog must be positive".to_owned()));
        }

        let mut seen = std::collections::HashSet::new();
        for section in self
            .main
            .prependers
            .iter()
            .chain(&self.main.scanners)
            .chain(&self.main.appenders)
        {
            if !seen.insert(section) {
                return Err(Error::Invalid(format!(
                    "plugin section '{section}' is listed twice"
                )));
            }
        }

        Ok(())
    }

    /// Registry identifier of the plugin configured in `section`.
    #[must_use]
    pub fn plugin_id<'a>(&'a self, section: &'a str) -> &'a str {
        self.plugin
            .get(section)
            .and_then(|s| s.plugin.as_deref())
            .unwrap_or(section)
    }

    /// Options of the plugin configured in `section`, empty if the section is missing.
    #[must_use]
    pub fn plugin_options(&self, section: &str) -> serde_json::Map<String, serde_json::Value> {
        self.plugin
            .get(section)
            .map(|s| s.options.clone())
            .unwrap_or_default()
    }

    /// The configuration as it is used, defaults included.
    ///
    /// # Errors
    ///
    /// * a value cannot be represented in TOML
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vfilter_common::ValidationStrategy;

    const FULL: &str = r#"
[main]
hostname = "filter.example.com"
spool_dir = "/tmp/spool"
trash_dir = "/tmp/trash"
max_message_size = 1024
address_validation = "rfc"
forward_timeout = "10s"
prepend_header_prefix = "X-Test-"
prependers = ["skip"]
scanners = ["rules", "size"]
appenders = ["stats"]

[[listeners]]
protocol = "smtp"
bind = "127.0.0.1:10025"
downstream = "127.0.0.1:10026"

[[listeners]]
protocol = "milter"
bind = "127.0.0.1:10027"

[esmtp]
ignore_multiple_recipients = true

[performance]
min_workers = 1
max_workers = 4
scale_interval = "500ms"

[logs]
level = ["info", "vfilter_server=trace"]

[plugin.rules]
plugin = "header_match"
filename = "/etc/vfilter/rules.txt"

[plugin.size]
plugin = "size_limit"
max_size = 512
"#;

    #[test]
    fn full() {
        let config = Config::from_toml(FULL).unwrap();

        assert_eq!(config.main.hostname, "filter.example.com");
        assert_eq!(config.main.max_message_size, 1024);
        assert_eq!(config.main.address_validation, ValidationStrategy::Rfc);
        assert_eq!(config.main.forward_timeout, std::time::Duration::from_secs(10));
        assert_eq!(config.main.scanners, ["rules", "size"]);
        assert_eq!(config.listeners.len(), 2);
        assert_eq!(config.listeners[1].protocol, Protocol::Milter);
        assert!(config.esmtp.ignore_multiple_recipients);
        assert_eq!(
            config.performance.scale_interval,
            std::time::Duration::from_millis(500)
        );
        assert_eq!(config.performance.backlog, 64);
        assert_eq!(config.logs.level.len(), 2);

        assert_eq!(config.plugin_id("rules"), "header_match");
        assert_eq!(config.plugin_id("stats"), "stats");
        assert_eq!(
            config.plugin_options("size").get("max_size"),
            Some(&serde_json::json!(512))
        );
        assert!(config.plugin_options("stats").is_empty());
    }

    #[test]
    fn defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.main.prepend_header_prefix, "X-Vfilter-");
        assert_eq!(config.main.max_message_size, 20 * 1024 * 1024);
        assert_eq!(config.netcat.default_recipient, "root@localhost");
    }

    #[test]
    fn error_names_the_option() {
        let error = Config::from_toml("[main]\nmax_message_size = \"big\"\n").unwrap_err();
        match error {
            Error::Parse { path, .. } => assert_eq!(path, "main.max_message_size"),
            otherwise => panic!("unexpected error: {otherwise}"),
        }

        let error = Config::from_toml("[main]\nfoo = 1\n").unwrap_err();
        assert!(matches!(error, Error::Parse { .. }));
    }

    #[test]
    fn downstream_required() {
        let error = Config::from_toml(
            "[[listeners]]\nprotocol = \"esmtp\"\nbind = \"127.0.0.1:10025\"\n",
        )
        .unwrap_err();
        assert!(matches!(error, Error::Invalid(_)));

        Config::from_toml("[[listeners]]\nprotocol = \"netcat\"\nbind = \"127.0.0.1:10025\"\n")
            .unwrap();
    }

    #[test]
    fn worker_bounds() {
        assert!(Config::from_toml("[performance]\nmin_workers = 8\nmax_workers = 2\n").is_err());
        assert!(Config::from_toml("[performance]\nmin_workers = 0\n").is_err());
        assert!(Config::from_toml("[performance]\nbacklog = 0\n").is_err());
    }

    #[test]
    fn section_listed_twice() {
        assert!(Config::from_toml("[main]\nscanners = [\"a\", \"b\", \"a\"]\n").is_err());
    }

    #[test]
    fn from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, FULL.as_bytes()).unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.path.as_deref(), Some(file.path()));

        assert!(matches!(
            Config::from_path("/does/not/exist.toml"),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn show_then_load() {
        let config = Config::from_toml(FULL).unwrap();
        let shown = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&shown).unwrap(), config);
    }
}
