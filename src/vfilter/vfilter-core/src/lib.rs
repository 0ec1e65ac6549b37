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

//! vFilter executable

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::multiple_crate_versions)]

mod args;

pub use args::{Args, Commands, Timeout};

use anyhow::Context;
use vfilter_config::Config;

#[cfg(debug_assertions)]
macro_rules! get_fmt {
    () => {
        tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_ansi(false)
    };
}

#[cfg(not(debug_assertions))]
macro_rules! get_fmt {
    () => {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_thread_ids(false)
            .with_target(false)
            .with_ansi(false)
    };
}

macro_rules! file_writer {
    ($filename:expr) => {{
        let filename: &std::path::Path = $filename;
        let writer_backend = if let (Some(directory), Some(file_name)) = (
            filename.parent(),
            filename.file_name().and_then(std::ffi::OsStr::to_str),
        ) {
            std::fs::create_dir_all(directory).with_context(|| {
                format!("cannot create the log directory '{}'", directory.display())
            })?;
            tracing_appender::rolling::never(directory, file_name)
        } else {
            anyhow::bail!(
                "filepath at '{}' does not have a parent or is not valid",
                filename.display()
            )
        };

        get_fmt!().with_writer(writer_backend)
    }};
}

/// Initialize the tracing subsystem.
///
/// # Errors
///
/// * the log file cannot be created
/// * a global subscriber is already installed
pub fn init_logs(args: &Args, config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let subscriber = tracing_subscriber::registry()
        .with({
            let mut e = tracing_subscriber::EnvFilter::default();
            for i in &config.logs.level {
                e = e.add_directive(i.clone());
            }
            e
        })
        .with(file_writer!(&config.logs.filename));

    if args.stdout {
        subscriber
            .with(get_fmt!().with_writer(std::io::stdout).with_ansi(true))
            .try_init()
    } else {
        subscriber.try_init()
    }?;

    tracing::info!(
        filename = ?config.logs.filename,
        stdout = args.stdout,
        "vFilter logs initialized."
    );

    Ok(())
}

/// Load the configuration named on the command line, or the default one.
///
/// # Errors
///
/// * see [`Config::from_path`]
pub fn load_config(args: &Args) -> anyhow::Result<Config> {
    args.config.as_ref().map_or_else(
        || Ok(Config::default()),
        |path| {
            Config::from_path(path)
                .with_context(|| format!("Cannot load the configuration '{}'", path.display()))
        },
    )
}

/// Line by line difference between the default configuration and `config`,
/// in TOML. Removed lines start with `-`, added ones with `+`.
///
/// # Errors
///
/// * a configuration cannot be serialized
pub fn config_diff(config: &Config) -> anyhow::Result<String> {
    let loaded = config.to_toml()?;
    let default = Config::default().to_toml()?;

    let mut out = String::new();
    for line in diff::lines(&default, &loaded) {
        let (sign, text) = match line {
            diff::Result::Left(left) => ('-', left),
            diff::Result::Both(same, _) => (' ', same),
            diff::Result::Right(right) => ('+', right),
        };
        out.push(sign);
        out.push_str(text);
        out.push('\n');
    }
    Ok(out)
}

/// Build the pipeline described by `config` and run the self-test of every
/// plugin, the report is written on `output`.
///
/// Returns `false` if the pipeline cannot be built or a plugin failed.
///
/// # Errors
///
/// * `output` cannot be written
pub async fn lint(config: Config, output: &mut impl std::io::Write) -> anyhow::Result<bool> {
    let (controller, warnings) = match vfilter_server::Controller::build(
        std::sync::Arc::new(config),
        &vfilter_pipeline::Registry::with_builtins(),
    ) {
        Ok(built) => built,
        Err(error) => {
            writeln!(output, "[FAIL] {error}")?;
            return Ok(false);
        }
    };

    for warning in &warnings {
        writeln!(output, "[WARN] {warning}")?;
    }

    let mut passed = true;
    for (section, report) in controller.pipeline().lint().await {
        passed &= report.passed;
        writeln!(
            output,
            "[{}] {section}",
            if report.passed { " OK " } else { "FAIL" }
        )?;
        for message in &report.messages {
            writeln!(output, "       {message}")?;
        }
    }
    Ok(passed)
}
