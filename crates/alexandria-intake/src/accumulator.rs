// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-category batching in front of blob storage.
//!
//! Entries accumulate in an open [`Batch`] until it is older than the delay
//! threshold or larger than the byte threshold. Sealed batches are queued on
//! a [`CommitLane`], a single task that commits them one at a time in seal
//! order. Every buffered byte holds a permit on a per-category semaphore;
//! permits are returned only after the batch holding them has been committed
//! (or failed to), which is what pushes back on uploaders.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, Notify, Semaphore, TryAcquireError};
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};

use crate::committer::Commit;
use crate::entry::{Batch, LogEntry};
use crate::error::AccumulatorError;

pub const DEFAULT_DELAY_THRESHOLD: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_BYTE_THRESHOLD: usize = 32 * 1024 * 1024;
pub const DEFAULT_BUFFERED_BYTE_LIMIT: usize = 64 * 1024 * 1024;
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// A batch older than this is released
    pub delay_threshold: Duration,
    /// A batch larger than this is released
    pub byte_threshold: usize,
    /// Ceiling on bytes held by open and queued batches of one category
    pub buffered_byte_limit: usize,
    /// Deadline of a single commit
    pub commit_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay_threshold: DEFAULT_DELAY_THRESHOLD,
            byte_threshold: DEFAULT_BYTE_THRESHOLD,
            buffered_byte_limit: DEFAULT_BUFFERED_BYTE_LIMIT,
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
        }
    }
}

struct State {
    open: Batch,
    /// None once closed
    lane: Option<mpsc::UnboundedSender<Batch>>,
}

pub struct BatchAccumulator {
    category: String,
    config: BatchConfig,
    state: Mutex<State>,
    capacity: Arc<Semaphore>,
    opened: Notify,
}

impl BatchAccumulator {
    /// Creates the accumulator for `category` along with the lane that
    /// commits its batches. The caller spawns [`CommitLane::run`] and, when
    /// batches should also release on age alone,
    /// [`BatchAccumulator::run_release_timer`].
    pub fn new(
        category: impl Into<String>,
        mut config: BatchConfig,
        committer: Arc<dyn Commit>,
    ) -> (Arc<Self>, CommitLane) {
        let category = category.into();
        config.buffered_byte_limit = config.buffered_byte_limit.min(u32::MAX as usize);
        let (tx, rx) = mpsc::unbounded_channel();
        let capacity = Arc::new(Semaphore::new(config.buffered_byte_limit));

        let lane = CommitLane {
            category: category.clone(),
            receiver: rx,
            committer,
            capacity: capacity.clone(),
            commit_timeout: config.commit_timeout,
        };
        let accumulator = Arc::new(Self {
            state: Mutex::new(State {
                open: Batch::new(category.as_str()),
                lane: Some(tx),
            }),
            category,
            config,
            capacity,
            opened: Notify::new(),
        });
        (accumulator, lane)
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Appends `entry`, which serializes to `size` bytes, to the open batch.
    ///
    /// Waits while the category's buffered bytes are at the ceiling. Fails
    /// with [`AccumulatorError::Closed`] once [`BatchAccumulator::close`]
    /// has been called, including for adds that were waiting at the time.
    pub async fn add(&self, entry: LogEntry, size: usize) -> Result<(), AccumulatorError> {
        let permits = self.permits_for(size);

        match self.capacity.try_acquire_many(permits) {
            Ok(reserved) => reserved.forget(),
            Err(TryAcquireError::Closed) => return Err(self.closed()),
            Err(TryAcquireError::NoPermits) => {
                debug!(
                    kind = %self.category,
                    pending = self.pending_bytes(),
                    "buffered byte limit reached, waiting for a commit"
                );
                // The open batch may be holding the capacity this add needs.
                self.flush();
                self.capacity
                    .acquire_many(permits)
                    .await
                    .map_err(|_| self.closed())?
                    .forget();
            }
        }

        let mut state = self.lock();
        if state.lane.is_none() {
            // Closed after the permits were taken.
            self.capacity.add_permits(permits as usize);
            return Err(self.closed());
        }
        let first = state.open.is_empty();
        state.open.push(entry, size, permits);
        if first {
            self.opened.notify_one();
        }
        if self.should_release(&state.open) {
            self.seal(&mut state);
        }
        Ok(())
    }

    /// Seals the open batch regardless of thresholds. No-op when it is empty.
    pub fn flush(&self) {
        let mut state = self.lock();
        self.seal(&mut state);
    }

    /// Seals the open batch and stops accepting entries. The lane exits once
    /// every queued batch has been committed.
    pub fn close(&self) {
        let mut state = self.lock();
        self.seal(&mut state);
        state.lane = None;
        drop(state);

        self.capacity.close();
        self.opened.notify_one();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().lane.is_none()
    }

    /// Bytes held by open and queued batches. An entry larger than the
    /// ceiling counts as the ceiling.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.config
            .buffered_byte_limit
            .saturating_sub(self.capacity.available_permits())
    }

    /// Number of entries in the open batch.
    #[must_use]
    pub fn open_len(&self) -> usize {
        self.lock().open.len()
    }

    /// Releases the open batch once its delay elapses even if no further
    /// entries arrive. Returns after [`BatchAccumulator::close`].
    pub async fn run_release_timer(self: Arc<Self>) {
        loop {
            let deadline = {
                let state = self.lock();
                if state.lane.is_none() {
                    return;
                }
                state
                    .open
                    .opened_at
                    .map(|opened_at| opened_at + self.config.delay_threshold)
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = time::sleep_until(deadline) => self.release_if_due(),
                        () = self.opened.notified() => {}
                    }
                }
                None => self.opened.notified().await,
            }
        }
    }

    fn release_if_due(&self) {
        let mut state = self.lock();
        let due = state
            .open
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() >= self.config.delay_threshold);
        if due {
            debug!(kind = %self.category, "batch delay elapsed");
            self.seal(&mut state);
        }
    }

    fn should_release(&self, batch: &Batch) -> bool {
        if batch.byte_size > self.config.byte_threshold {
            return true;
        }
        batch
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() > self.config.delay_threshold)
    }

    fn seal(&self, state: &mut State) {
        let Some(lane) = state.lane.as_ref() else {
            return;
        };
        if state.open.is_empty() {
            return;
        }

        let batch = std::mem::replace(&mut state.open, Batch::new(self.category.as_str()));
        debug!(
            kind = %self.category,
            items = batch.len(),
            size = batch.byte_size,
            "sealed batch"
        );
        if let Err(mpsc::error::SendError(batch)) = lane.send(batch) {
            warn!(
                kind = %self.category,
                items = batch.len(),
                "commit lane is gone, dropping batch"
            );
            self.capacity.add_permits(batch.reserved as usize);
        }
    }

    fn permits_for(&self, size: usize) -> u32 {
        let clamped = size.min(self.config.buffered_byte_limit);
        u32::try_from(clamped).unwrap_or(u32::MAX)
    }

    fn closed(&self) -> AccumulatorError {
        AccumulatorError::Closed(self.category.clone())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Nothing under the lock awaits or panics, so a poisoned state is intact.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Commits the batches of one category strictly one at a time.
pub struct CommitLane {
    category: String,
    receiver: mpsc::UnboundedReceiver<Batch>,
    committer: Arc<dyn Commit>,
    capacity: Arc<Semaphore>,
    commit_timeout: Duration,
}

impl CommitLane {
    pub async fn run(mut self) {
        while let Some(batch) = self.receiver.recv().await {
            let reserved = batch.reserved as usize;
            let items = batch.len();
            let started = Instant::now();

            match time::timeout(self.commit_timeout, self.committer.commit(batch)).await {
                Ok(Ok(receipt)) => {
                    debug!(
                        kind = %self.category,
                        key = %receipt.key,
                        elapsed = ?started.elapsed(),
                        "commit finished"
                    );
                }
                Ok(Err(e)) => {
                    error!(kind = %self.category, items, "can't commit batch: {e}");
                }
                Err(_) => {
                    error!(
                        kind = %self.category,
                        items,
                        "can't commit batch: timed out after {:?}",
                        self.commit_timeout
                    );
                }
            }

            self.capacity.add_permits(reserved);
        }
        debug!(kind = %self.category, "commit lane drained");
    }
}
