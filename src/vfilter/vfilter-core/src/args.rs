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

/// Wrapper around [`std::time::Duration`] to parse it with [`humantime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(pub std::time::Duration);

impl std::str::FromStr for Timeout {
    type Err = humantime::DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        humantime::parse_duration(s).map(Timeout)
    }
}

/// Command line of the relay.
#[derive(Debug, Default, Clone, PartialEq, Eq, clap::Parser)]
#[command(about, version, author)]
pub struct Args {
    /// Path of the TOML configuration file, the defaults are used if omitted.
    #[arg(short, long)]
    pub config: Option<std::path::PathBuf>,

    /// Run an action instead of the relay.
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Also write the logs on the standard output.
    #[arg(short, long)]
    pub stdout: bool,

    /// Stop the relay after this duration (ex: "30s", "1h 5m").
    #[arg(short, long)]
    pub timeout: Option<Timeout>,
}

/// Actions run instead of the relay.
#[derive(Debug, Clone, PartialEq, Eq, clap::Subcommand)]
pub enum Commands {
    /// Print the loaded configuration, defaults included.
    ConfigShow,
    /// Print the difference between the loaded configuration and the default one.
    ConfigDiff,
    /// Build the pipeline and run the self-test of every plugin.
    Lint,
}
