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

//! Unix socket answering one command per connection with a JSON document.

use crate::{
    controller::{Connection, Controller},
    executor::{Executor, ExecutorStatus},
};
use anyhow::Context;
use vfilter_protocol::{Reader, Writer};

/// Commands understood on the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ControlCommand {
    ///
    Stats,
    ///
    Uptime,
    ///
    ExceptionList,
    ///
    WorkerList,
    ///
    Help,
}

impl ControlCommand {
    const fn description(self) -> &'static str {
        match self {
            Self::Stats => "number of messages per final action and mean scan times",
            Self::Uptime => "time since the start of the relay",
            Self::ExceptionList => "last plugin failures",
            Self::WorkerList => "state of the worker pool",
            Self::Help => "this list",
        }
    }
}

/// Answer to a command line.
#[must_use]
pub fn answer(line: &str, controller: &Controller, workers: ExecutorStatus) -> serde_json::Value {
    let Ok(command) = line.trim().parse::<ControlCommand>() else {
        return serde_json::json!({ "error": format!("unknown command '{}'", line.trim()) });
    };

    let result = match command {
        ControlCommand::Stats => serde_json::to_value(controller.stats().snapshot()),
        ControlCommand::Uptime => {
            let uptime = controller.stats().uptime();
            Ok(serde_json::json!({
                "seconds": uptime.as_secs(),
                "uptime": humantime::format_duration(std::time::Duration::from_secs(uptime.as_secs())).to_string(),
            }))
        }
        ControlCommand::ExceptionList => serde_json::to_value(controller.crash_store().entries()),
        ControlCommand::WorkerList => serde_json::to_value(workers),
        ControlCommand::Help => Ok(<ControlCommand as strum::IntoEnumIterator>::iter()
            .map(|command| (command.to_string(), command.description().into()))
            .collect::<serde_json::Map<_, _>>()
            .into()),
    };

    result.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
}

async fn handle(
    stream: tokio::net::UnixStream,
    controller: &Controller,
    executor: &Executor<Connection, Controller>,
) -> Result<(), vfilter_protocol::Error> {
    let (read, write) = stream.into_split();
    let (mut reader, mut writer) = (Reader::new(read), Writer::new(write));

    let Some(line) = reader.read_line(Some(1024)).await? else {
        return Ok(());
    };
    let line = String::from_utf8_lossy(&line);
    tracing::debug!(command = %line, "Control command.");

    let answer = answer(&line, controller, executor.status());
    writer.write_all(&format!("{answer}\n")).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Accept the connections on the control socket at `path`, the file is
/// replaced if it exists.
///
/// # Errors
///
/// * the socket cannot be bound
/// * accepting a connection failed
#[tracing::instrument(name = "control", skip_all, fields(path = %path.display()))]
pub async fn serve(
    path: std::path::PathBuf,
    controller: Controller,
    executor: std::sync::Arc<Executor<Connection, Controller>>,
) -> anyhow::Result<()> {
    if path.exists() {
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove the old control socket '{}'", path.display()))?;
    }
    let listener = tokio::net::UnixListener::bind(&path)
        .with_context(|| format!("Failed to bind the control socket '{}'", path.display()))?;
    tracing::info!("Control channel listening.");

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("Failed to accept on the control socket")?;
        let (controller, executor) = (controller.clone(), executor.clone());
        tokio::spawn(async move {
            if let Err(e) = handle(stream, &controller, &executor).await {
                tracing::debug!(%e, "Control connection failed.");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vfilter_pipeline::{CrashStore, Phase, Pipeline};

    fn controller() -> Controller {
        let crash_store = std::sync::Arc::new(CrashStore::default());
        crash_store.record("antivirus", Phase::Scan, "1234", &"connection refused");
        Controller::new(
            std::sync::Arc::default(),
            std::sync::Arc::new(Pipeline::new(crash_store)),
            std::sync::Arc::default(),
        )
    }

    fn workers() -> ExecutorStatus {
        ExecutorStatus {
            workers: 2,
            idle: 1,
            queued: 0,
            min_workers: 2,
            max_workers: 16,
        }
    }

    #[test]
    fn commands() {
        let controller = controller();
        controller.stats().record_action(vfilter_common::Action::Reject);

        let stats = answer("stats", &controller, workers());
        assert_eq!(stats["total"], 1);
        assert_eq!(stats["actions"]["REJECT"], 1);

        let exceptions = answer("EXCEPTIONLIST\r", &controller, workers());
        assert_eq!(exceptions[0]["section"], "antivirus");
        assert_eq!(exceptions[0]["phase"], "scan");
        assert_eq!(exceptions[0]["error"], "connection refused");

        assert_eq!(answer("workerlist", &controller, workers())["workers"], 2);
        assert!(answer("uptime", &controller, workers())["seconds"].is_u64());
        assert_eq!(
            answer("help", &controller, workers())
                .as_object()
                .unwrap()
                .keys()
                .collect::<Vec<_>>(),
            ["exceptionlist", "help", "stats", "uptime", "workerlist"]
        );
        assert_eq!(
            answer("reload", &controller, workers()),
            serde_json::json!({ "error": "unknown command 'reload'" })
        );
    }

    #[tokio::test]
    async fn over_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let controller = controller();
        let executor = std::sync::Arc::new(Executor::start(
            std::sync::Arc::new(controller.clone()),
            &vfilter_config::FieldPerformance::default(),
        ));

        let server = tokio::spawn(serve(path.clone(), controller, executor.clone()));
        while !path.exists() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut stream, b"workerlist\r\n")
            .await
            .unwrap();
        let mut output = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut output)
            .await
            .unwrap();

        let status: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(status["min_workers"], 2);

        server.abort();
        executor.shutdown().await;
    }
}
