// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::accumulator::BatchAccumulator;
use crate::committer::Commit;
use crate::config::IntakeConfig;
use crate::error::ServerError;
use crate::intake::{self, IntakeService};

/// Builds one accumulator per configured category and serves uploads for
/// them.
pub struct IntakeServer {
    config: IntakeConfig,
    committer: Arc<dyn Commit>,
}

impl IntakeServer {
    pub fn new(config: IntakeConfig, committer: Arc<dyn Commit>) -> Self {
        Self { config, committer }
    }

    /// Binds the configured address and starts serving.
    pub async fn start(self) -> Result<RunningIntake, ServerError> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.start_with_listener(listener)
    }

    /// Starts serving on an already bound listener.
    pub fn start_with_listener(self, listener: TcpListener) -> Result<RunningIntake, ServerError> {
        let addr = self.config.bind_addr;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let mut accumulators = Vec::with_capacity(self.config.categories.len());
        let mut lanes = JoinSet::new();
        let mut timers = Vec::with_capacity(self.config.categories.len());
        for category in self.config.categories.iter() {
            let (accumulator, lane) =
                BatchAccumulator::new(category, self.config.batch.clone(), self.committer.clone());
            lanes.spawn(lane.run());
            timers.push(tokio::spawn(accumulator.clone().run_release_timer()));
            accumulators.push(accumulator);
        }

        let service = Arc::new(IntakeService::new(
            accumulators.iter().cloned(),
            self.config.max_body_bytes,
        ));
        let cancel = CancellationToken::new();
        let server = tokio::spawn(intake::serve(
            listener,
            service,
            cancel.clone(),
            self.config.shutdown_grace,
        ));

        info!(
            addr = %local_addr,
            categories = accumulators.len(),
            "alexandria intake listening"
        );

        Ok(RunningIntake {
            local_addr,
            cancel,
            server,
            accumulators,
            lanes,
            timers,
            grace: self.config.shutdown_grace,
        })
    }
}

/// A started intake. Dropping it leaves the tasks running; call
/// [`RunningIntake::shutdown`] to flush pending batches.
pub struct RunningIntake {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    server: JoinHandle<Result<(), std::io::Error>>,
    accumulators: Vec<Arc<BatchAccumulator>>,
    lanes: JoinSet<()>,
    timers: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl RunningIntake {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn accumulator(&self, category: &str) -> Option<&Arc<BatchAccumulator>> {
        self.accumulators
            .iter()
            .find(|accumulator| accumulator.category() == category)
    }

    /// Stops accepting uploads, seals every open batch and waits for the
    /// queued commits. Whatever is still uncommitted when the grace period
    /// runs out is dropped.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        info!("Shutting down alexandria intake");
        let deadline = Instant::now() + self.grace;

        self.cancel.cancel();
        match self.server.await {
            Ok(Ok(())) => debug!("Intake server stopped"),
            Ok(Err(e)) => error!("Intake server error: {e}"),
            Err(e) => error!("Intake server task failed: {e}"),
        }

        for accumulator in &self.accumulators {
            accumulator.close();
        }
        for timer in self.timers {
            if let Err(e) = timer.await {
                error!("Release timer task failed: {e}");
            }
        }

        let lanes = &mut self.lanes;
        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(finished) = lanes.join_next().await {
                if let Err(e) = finished {
                    error!("Commit lane task failed: {e}");
                }
            }
        })
        .await;

        if drained.is_err() {
            let pending: usize = self
                .accumulators
                .iter()
                .map(|accumulator| accumulator.pending_bytes())
                .sum();
            error!(pending, "Shutdown grace period exceeded, dropping pending batches");
            self.lanes.shutdown().await;
            return Err(ServerError::ShutdownTimeout);
        }

        info!("alexandria intake stopped");
        Ok(())
    }
}
