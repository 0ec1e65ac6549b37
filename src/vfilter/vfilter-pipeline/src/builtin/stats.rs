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
    plugin::{Appender, OptionSpec, Plugin, PluginError, PluginOptions},
    StatsKeeper,
};
use vfilter_common::{Action, Suspect};

pub const SCHEMA: &[OptionSpec] = &[];

/// Feed the shared [`StatsKeeper`].
pub struct Stats {
    section: String,
    keeper: std::sync::Arc<StatsKeeper>,
}

impl Stats {
    ///
    #[must_use]
    pub fn new(options: &PluginOptions, keeper: std::sync::Arc<StatsKeeper>) -> Self {
        Self {
            section: options.section().to_owned(),
            keeper,
        }
    }
}

#[async_trait::async_trait]
impl Plugin for Stats {
    fn section(&self) -> &str {
        &self.section
    }
}

#[async_trait::async_trait]
impl Appender for Stats {
    async fn process(&self, suspect: &Suspect, action: Action) -> Result<(), PluginError> {
        self.keeper.record_action(action);
        for (section, elapsed) in &suspect.tags().scantimes {
            self.keeper.record_scantime(section, *elapsed);
        }
        Ok(())
    }
}
