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
    plugin::{Appender, OptionSpec, PluginError, PluginOptions, Prepender, Scanner},
    StatsKeeper,
};

/// Phase a plugin takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PluginKind {
    ///
    Prepender,
    ///
    Scanner,
    ///
    Appender,
}

/// A plugin built from its configuration section.
#[derive(Clone)]
pub enum PluginInstance {
    ///
    Prepender(std::sync::Arc<dyn Prepender>),
    ///
    Scanner(std::sync::Arc<dyn Scanner>),
    ///
    Appender(std::sync::Arc<dyn Appender>),
}

impl PluginInstance {
    ///
    #[must_use]
    pub const fn kind(&self) -> PluginKind {
        match self {
            Self::Prepender(_) => PluginKind::Prepender,
            Self::Scanner(_) => PluginKind::Scanner,
            Self::Appender(_) => PluginKind::Appender,
        }
    }
}

/// Shared objects handed to the plugins when they are built.
#[derive(Debug, Clone)]
pub struct Services {
    /// Counters exposed on the control channel.
    pub stats: std::sync::Arc<StatsKeeper>,
    /// Prefix of the headers written by the plugins.
    pub header_prefix: String,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            stats: std::sync::Arc::default(),
            header_prefix: "X-Vfilter-".to_owned(),
        }
    }
}

/// Build a plugin from the options of its section.
pub type Factory =
    Box<dyn Fn(&PluginOptions, &Services) -> Result<PluginInstance, PluginError> + Send + Sync>;

/// Failure to build a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// No plugin is registered under this identifier.
    #[error("section '{section}': unknown plugin '{id}'")]
    UnknownPlugin {
        ///
        section: String,
        ///
        id: String,
    },
    /// The plugin is listed in the wrong phase.
    #[error("section '{section}': the plugin is a {got}, listed as a {expected}")]
    WrongKind {
        ///
        section: String,
        ///
        expected: PluginKind,
        ///
        got: PluginKind,
    },
    /// The plugin refused its options.
    #[error("section '{section}': {source}")]
    Plugin {
        ///
        section: String,
        ///
        source: PluginError,
    },
}

struct Entry {
    schema: &'static [OptionSpec],
    description: &'static str,
    factory: Factory,
}

/// Known plugins, by identifier.
#[derive(Default)]
pub struct Registry {
    entries: std::collections::BTreeMap<String, Entry>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

impl Registry {
    /// A registry with the plugins shipped with vFilter.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        crate::builtin::register_all(&mut registry);
        registry
    }

    /// Register a plugin, replacing any plugin with the same identifier.
    pub fn register<F>(
        &mut self,
        id: impl Into<String>,
        description: &'static str,
        schema: &'static [OptionSpec],
        factory: F,
    ) where
        F: Fn(&PluginOptions, &Services) -> Result<PluginInstance, PluginError>
            + Send
            + Sync
            + 'static,
    {
        self.entries.insert(
            id.into(),
            Entry {
                schema,
                description,
                factory: Box::new(factory),
            },
        );
    }

    /// Identifiers and descriptions of the registered plugins.
    pub fn plugins(&self) -> impl Iterator<Item = (&str, &'static str)> + '_ {
        self.entries
            .iter()
            .map(|(id, entry)| (id.as_str(), entry.description))
    }

    /// Options understood by a plugin.
    #[must_use]
    pub fn schema(&self, id: &str) -> Option<&'static [OptionSpec]> {
        self.entries.get(id).map(|entry| entry.schema)
    }

    /// Build the plugin `id` for a section, returns the warnings about
    /// its options.
    ///
    /// # Errors
    ///
    /// * `id` is not registered
    /// * a required option is missing, or the plugin refuses its options
    pub fn build(
        &self,
        id: &str,
        options: &PluginOptions,
        services: &Services,
    ) -> Result<(PluginInstance, Vec<String>), BuildError> {
        let entry = self.entries.get(id).ok_or_else(|| BuildError::UnknownPlugin {
            section: options.section().to_owned(),
            id: id.to_owned(),
        })?;
        let plugin_error = |source| BuildError::Plugin {
            section: options.section().to_owned(),
            source,
        };

        let warnings = options.check(entry.schema).map_err(plugin_error)?;
        for warning in &warnings {
            tracing::warn!(plugin = id, "{warning}");
        }
        let instance = (entry.factory)(options, services).map_err(plugin_error)?;
        Ok((instance, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn options(section: &str, value: serde_json::Value) -> PluginOptions {
        match value {
            serde_json::Value::Object(map) => PluginOptions::new(section, map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn builtins() {
        let registry = Registry::with_builtins();
        let ids = registry.plugins().map(|(id, _)| id).collect::<Vec<_>>();
        assert_eq!(
            ids,
            [
                "action_override",
                "debug",
                "header_match",
                "plugin_skipper",
                "size_limit",
                "spam_header",
                "stats"
            ]
        );
    }

    #[test]
    fn unknown_plugin() {
        let registry = Registry::with_builtins();
        assert!(matches!(
            registry.build("clamav", &options("av", serde_json::json!({})), &Services::default()),
            Err(BuildError::UnknownPlugin { section, id }) if section == "av" && id == "clamav"
        ));
    }

    #[test]
    fn missing_option() {
        let registry = Registry::with_builtins();
        assert!(matches!(
            registry.build("size_limit", &options("size", serde_json::json!({})), &Services::default()),
            Err(BuildError::Plugin { source: PluginError::MissingOption(name), .. }) if name == "max_size"
        ));
    }

    #[test]
    fn unknown_option_warns() {
        let registry = Registry::with_builtins();
        let (instance, warnings) = registry
            .build(
                "size_limit",
                &options("size", serde_json::json!({ "max_size": 10, "colour": "red" })),
                &Services::default(),
            )
            .unwrap();
        assert_eq!(instance.kind(), PluginKind::Scanner);
        assert_eq!(warnings.len(), 1);
    }
}
