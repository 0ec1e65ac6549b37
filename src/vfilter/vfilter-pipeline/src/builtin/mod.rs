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

//! Plugins shipped with vFilter.

mod action_override;
mod debug;
mod header_match;
mod plugin_skipper;
mod size_limit;
mod spam_header;
mod stats;

pub use action_override::ActionOverride;
pub use debug::DebugTrace;
pub use header_match::HeaderMatch;
pub use plugin_skipper::PluginSkipper;
pub use size_limit::SizeLimit;
pub use spam_header::SpamHeader;
pub use stats::Stats;

use crate::{registry::PluginInstance, Registry};

/// Register every builtin under its identifier.
pub fn register_all(registry: &mut Registry) {
    registry.register(
        "header_match",
        "decide with regular expressions on the headers",
        header_match::SCHEMA,
        |options, _| {
            Ok(PluginInstance::Scanner(std::sync::Arc::new(
                HeaderMatch::new(options)?,
            )))
        },
    );
    registry.register(
        "size_limit",
        "decide on messages above a size",
        size_limit::SCHEMA,
        |options, _| Ok(PluginInstance::Scanner(std::sync::Arc::new(SizeLimit::new(options)?))),
    );
    registry.register(
        "plugin_skipper",
        "skip scanners for some recipient domains",
        plugin_skipper::SCHEMA,
        |options, _| {
            Ok(PluginInstance::Prepender(std::sync::Arc::new(
                PluginSkipper::new(options)?,
            )))
        },
    );
    registry.register(
        "action_override",
        "decide when a tag was set by a previous scanner",
        action_override::SCHEMA,
        |options, _| {
            Ok(PluginInstance::Scanner(std::sync::Arc::new(
                ActionOverride::new(options)?,
            )))
        },
    );
    registry.register(
        "spam_header",
        "write the spam and virus status in headers",
        spam_header::SCHEMA,
        |options, services| {
            Ok(PluginInstance::Scanner(std::sync::Arc::new(SpamHeader::new(
                options,
                &services.header_prefix,
            )?)))
        },
    );
    registry.register(
        "stats",
        "count the disposed messages",
        stats::SCHEMA,
        |options, services| {
            Ok(PluginInstance::Appender(std::sync::Arc::new(Stats::new(
                options,
                services.stats.clone(),
            ))))
        },
    );
    registry.register(
        "debug",
        "record what the pipeline sees",
        debug::SCHEMA,
        |options, _| Ok(PluginInstance::Scanner(std::sync::Arc::new(DebugTrace::new(options)?))),
    );
}
