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

//! vFilter pipeline: the plugins and their execution on a message
//!
//! Prependers adjust the list of scanners, scanners run in order until one
//! decides, appenders run once the message was disposed of.

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
#![allow(clippy::module_name_repetitions)]

mod crash_store;
mod engine;
mod plugin;
mod registry;
mod stats;
mod trash;

pub mod builtin;

pub use crash_store::{CrashEntry, CrashStore, Phase};
pub use engine::{Pipeline, Verdict};
pub use plugin::{
    Appender, LintReport, OptionSpec, Plugin, PluginError, PluginOptions, Prepender, ScanResult,
    Scanner,
};
pub use registry::{BuildError, Factory, PluginInstance, PluginKind, Registry, Services};
pub use stats::{StatsKeeper, StatsSnapshot};
pub use trash::Trash;

pub use async_trait::async_trait;
