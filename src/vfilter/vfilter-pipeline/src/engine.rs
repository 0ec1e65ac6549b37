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
    crash_store::Phase,
    plugin::{Appender, LintReport, Plugin, PluginError, PluginOptions, Prepender, Scanner},
    registry::{BuildError, PluginInstance, PluginKind, Registry, Services},
    CrashStore, Trash,
};
use futures_util::FutureExt;
use vfilter_common::{Action, Suspect};
use vfilter_config::Config;

/// Outcome of the scan of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    ///
    pub action: Action,
    /// Text of the reply, given by the deciding scanner.
    pub message: Option<String>,
    /// Section of the deciding scanner, `None` if nobody decided.
    pub section: Option<String>,
}

impl Verdict {
    /// No scanner decided.
    #[must_use]
    pub const fn dunno() -> Self {
        Self {
            action: Action::Dunno,
            message: None,
            section: None,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

/// The plugins of the configuration, run in order on each message:
/// prependers, scanners until one decides, then appenders.
pub struct Pipeline {
    prependers: Vec<std::sync::Arc<dyn Prepender>>,
    scanners: Vec<std::sync::Arc<dyn Scanner>>,
    appenders: Vec<std::sync::Arc<dyn Appender>>,
    crash_store: std::sync::Arc<CrashStore>,
    trash: Option<std::sync::Arc<Trash>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn sections<T: Plugin + ?Sized>(plugins: &[std::sync::Arc<T>]) -> Vec<&str> {
            plugins.iter().map(|p| p.section()).collect()
        }

        f.debug_struct("Pipeline")
            .field("prependers", &sections(&self.prependers))
            .field("scanners", &sections(&self.scanners))
            .field("appenders", &sections(&self.appenders))
            .field("trash", &self.trash)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// An empty pipeline: every message is [`Action::Dunno`].
    #[must_use]
    pub fn new(crash_store: std::sync::Arc<CrashStore>) -> Self {
        Self {
            prependers: vec![],
            scanners: vec![],
            appenders: vec![],
            crash_store,
            trash: None,
        }
    }

    ///
    #[must_use]
    pub fn with_prepender(mut self, prepender: std::sync::Arc<dyn Prepender>) -> Self {
        self.prependers.push(prepender);
        self
    }

    ///
    #[must_use]
    pub fn with_scanner(mut self, scanner: std::sync::Arc<dyn Scanner>) -> Self {
        self.scanners.push(scanner);
        self
    }

    ///
    #[must_use]
    pub fn with_appender(mut self, appender: std::sync::Arc<dyn Appender>) -> Self {
        self.appenders.push(appender);
        self
    }

    /// Archive the deleted messages in `trash`.
    #[must_use]
    pub fn with_trash(mut self, trash: std::sync::Arc<Trash>) -> Self {
        self.trash = Some(trash);
        self
    }

    /// Build the plugins listed in `[main]`, returns the warnings about
    /// their options.
    ///
    /// # Errors
    ///
    /// * see [`Registry::build`]
    /// * a plugin is listed in the wrong phase
    pub fn from_config(
        config: &Config,
        registry: &Registry,
        services: &Services,
        crash_store: std::sync::Arc<CrashStore>,
    ) -> Result<(Self, Vec<String>), BuildError> {
        let mut pipeline = Self::new(crash_store);
        let mut warnings = vec![];

        let phases = [
            (PluginKind::Prepender, &config.main.prependers),
            (PluginKind::Scanner, &config.main.scanners),
            (PluginKind::Appender, &config.main.appenders),
        ];
        for (expected, sections) in phases {
            for section in sections {
                let options = PluginOptions::new(section.clone(), config.plugin_options(section));
                let (instance, mut plugin_warnings) =
                    registry.build(config.plugin_id(section), &options, services)?;
                warnings.append(&mut plugin_warnings);

                pipeline = match (expected, instance) {
                    (PluginKind::Prepender, PluginInstance::Prepender(p)) => pipeline.with_prepender(p),
                    (PluginKind::Scanner, PluginInstance::Scanner(s)) => pipeline.with_scanner(s),
                    (PluginKind::Appender, PluginInstance::Appender(a)) => pipeline.with_appender(a),
                    (expected, instance) => {
                        return Err(BuildError::WrongKind {
                            section: section.clone(),
                            expected,
                            got: instance.kind(),
                        })
                    }
                };
            }
        }

        if let Some(trash_dir) = &config.main.trash_dir {
            pipeline = pipeline.with_trash(std::sync::Arc::new(Trash::new(trash_dir)));
        }

        Ok((pipeline, warnings))
    }

    /// Failures of the plugins.
    #[must_use]
    pub const fn crash_store(&self) -> &std::sync::Arc<CrashStore> {
        &self.crash_store
    }

    /// Sections of the scanners, in order.
    #[must_use]
    pub fn scanner_sections(&self) -> Vec<&str> {
        self.scanners.iter().map(|s| s.section()).collect()
    }

    /// Run `call`, a failure or a panic is recorded and yields `None`.
    async fn guarded<T>(
        &self,
        section: &str,
        phase: Phase,
        suspect: &str,
        call: impl std::future::Future<Output = Result<T, PluginError>> + Send,
    ) -> Option<T> {
        let result = std::panic::AssertUnwindSafe(call)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(PluginError::Panic(panic_message(payload.as_ref()))));

        match result {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::error!(section, %phase, %error, "Plugin failed, skipped.");
                self.crash_store.record(section, phase, suspect, &error);
                None
            }
        }
    }

    /// Run the prependers then the scanners on `suspect`.
    ///
    /// The first scanner returning something else than [`Action::Dunno`]
    /// decides, and the following ones are not run. A deleted message is
    /// archived in the trash, if any.
    #[tracing::instrument(name = "scan", skip_all, fields(suspect = %suspect.id()))]
    pub async fn scan(&self, suspect: &mut Suspect) -> Verdict {
        let id = suspect.id().to_string();

        let mut scanners = self.scanners.clone();
        for prepender in &self.prependers {
            let start = std::time::Instant::now();
            let adjusted = self
                .guarded(
                    prepender.section(),
                    Phase::Prepend,
                    &id,
                    prepender.adjust(suspect, &scanners),
                )
                .await;
            suspect
                .tags_mut()
                .record_scantime(prepender.section(), start.elapsed());

            if let Some(Some(adjusted)) = adjusted {
                let contains = |list: &[std::sync::Arc<dyn Scanner>], section: &str| {
                    list.iter().any(|s| s.section() == section)
                };
                let added = adjusted
                    .iter()
                    .map(|s| s.section())
                    .filter(|section| !contains(&scanners, section))
                    .collect::<Vec<_>>();
                let removed = scanners
                    .iter()
                    .map(|s| s.section())
                    .filter(|section| !contains(&adjusted, section))
                    .collect::<Vec<_>>();
                if !added.is_empty() || !removed.is_empty() {
                    tracing::info!(
                        prepender = prepender.section(),
                        ?added,
                        ?removed,
                        "Scanners adjusted."
                    );
                }
                scanners = adjusted;
            }
        }

        for scanner in &scanners {
            let start = std::time::Instant::now();
            let result = self
                .guarded(scanner.section(), Phase::Scan, &id, scanner.examine(suspect))
                .await;
            suspect
                .tags_mut()
                .record_scantime(scanner.section(), start.elapsed());

            let Some(result) = result else {
                continue;
            };
            suspect
                .tags_mut()
                .record_decision(scanner.section(), result.action);
            tracing::debug!(section = scanner.section(), action = %result.action);

            if result.action.is_decisive() {
                if result.action == Action::Delete {
                    if let Some(trash) = &self.trash {
                        if let Err(e) = trash.archive(suspect, scanner.section()).await {
                            tracing::error!(%e, "Could not archive the message.");
                        }
                    }
                }
                return Verdict {
                    action: result.action,
                    message: result.message,
                    section: Some(scanner.section().to_owned()),
                };
            }
        }

        Verdict::dunno()
    }

    /// Run the appenders with the final action, nothing is run for a
    /// deferred message.
    #[tracing::instrument(name = "append", skip_all, fields(suspect = %suspect.id(), %action))]
    pub async fn append(&self, suspect: &Suspect, action: Action) {
        if action == Action::Defer {
            tracing::debug!("Message deferred, appenders skipped.");
            return;
        }

        let id = suspect.id().to_string();
        for appender in &self.appenders {
            self.guarded(
                appender.section(),
                Phase::Append,
                &id,
                appender.process(suspect, action),
            )
            .await;
        }
    }

    /// Self-test of every plugin, in execution order.
    pub async fn lint(&self) -> Vec<(String, LintReport)> {
        async fn lint_one<T: Plugin + ?Sized>(plugin: &T) -> (String, LintReport) {
            let report = std::panic::AssertUnwindSafe(plugin.lint())
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| LintReport::failed(panic_message(payload.as_ref())));
            (plugin.section().to_owned(), report)
        }

        let mut reports = vec![];
        for prepender in &self.prependers {
            reports.push(lint_one(prepender.as_ref()).await);
        }
        for scanner in &self.scanners {
            reports.push(lint_one(scanner.as_ref()).await);
        }
        for appender in &self.appenders {
            reports.push(lint_one(appender.as_ref()).await);
        }
        reports
    }
}
