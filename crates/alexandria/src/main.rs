// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;
use std::sync::Arc;

use alexandria_intake::{create_object_store, BlobCommitter, IntakeConfig, IntakeServer};
use anyhow::Context;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match IntakeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("alexandria: {e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);
    let subscriber = match EnvFilter::try_new(env_filter) {
        Ok(filter) => tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_level(true)
            .with_thread_names(false)
            .with_thread_ids(false)
            .with_line_number(false)
            .with_file(false)
            .with_target(true)
            .finish(),
        Err(e) => {
            eprintln!("alexandria: could not parse log level in configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("alexandria: setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: IntakeConfig) -> anyhow::Result<()> {
    let store = create_object_store(&config.storage).context("can't set up blob storage")?;
    info!(backend = config.storage.backend_name(), "blob storage ready");

    let mut committer = BlobCommitter::new(store);
    if !config.storage.supports_attributes() {
        committer = committer.without_content_type();
    }

    let intake = IntakeServer::new(config, Arc::new(committer))
        .start()
        .await
        .context("can't start intake server")?;

    wait_for_shutdown_signal().await?;

    intake
        .shutdown()
        .await
        .context("intake did not shut down cleanly")
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("can't install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("can't listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    info!("Received shutdown signal");
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("can't listen for ctrl-c")?;
    info!("Received shutdown signal");
    Ok(())
}
