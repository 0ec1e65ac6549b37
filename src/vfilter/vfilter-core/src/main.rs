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

use vfilter::{config_diff, init_logs, lint, load_config, Args, Commands};

use anyhow::Context;
use clap::Parser;

fn main() {
    if let Err(err) = try_main() {
        eprintln!("ERROR: {err}");
        tracing::error!("ERROR: {err}");
        err.chain().skip(1).for_each(|cause| eprintln!("because: {cause}"));
        std::process::exit(1);
    }
}

/// Completes on SIGINT, SIGTERM or when `timeout` elapses.
async fn shutdown_signal(timeout: Option<std::time::Duration>) {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "Cannot listen for SIGTERM.");
                std::future::pending::<()>().await;
            }
        }
    };
    let timeout = async {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                tracing::warn!(%error, "Cannot listen for SIGINT.");
            }
            tracing::info!("SIGINT received.");
        }
        () = terminate => tracing::info!("SIGTERM received."),
        () = timeout => tracing::info!("Timeout reached."),
    }
}

fn try_main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let runtime = || {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("vfilter-worker")
            .build()
            .context("Cannot start the runtime")
    };

    match &args.command {
        Some(Commands::ConfigShow) => {
            println!("{}", config.to_toml()?);
            return Ok(());
        }
        Some(Commands::ConfigDiff) => {
            print!("{}", config_diff(&config)?);
            return Ok(());
        }
        Some(Commands::Lint) => {
            let passed = runtime()?.block_on(lint(config, &mut std::io::stdout()))?;
            anyhow::ensure!(passed, "the pipeline did not pass the self-test");
            return Ok(());
        }
        None => {}
    }

    init_logs(&args, &config)?;

    let timeout = args.timeout.map(|t| t.0);
    runtime()?.block_on(async move {
        let (controller, warnings) = vfilter_server::Controller::build(
            std::sync::Arc::new(config),
            &vfilter_pipeline::Registry::with_builtins(),
        )?;
        for warning in warnings {
            tracing::warn!("{warning}");
        }

        vfilter_server::Server::new(controller)?
            .listen(shutdown_signal(timeout))
            .await
    })?;

    tracing::info!("vFilter stopped.");
    Ok(())
}
