// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pass-through writer that keeps a copy of recent output for the archive.
//!
//! [`WriterWrapper`] sits in front of the real sink (stderr, a file, ...).
//! Every write is copied into a [`RingBuffer`] and then forwarded untouched.
//! The paired [`Flusher`] runs on the tokio runtime, drains the buffer on a
//! fixed interval and ships the drained bytes with a single `PUT` to
//! `{base_url}/upload/{category}/{stream_id}`.
//!
//! Shipping is best effort: a failed submission is logged and its chunks are
//! discarded. Nothing on this path can fail or slow down the caller's write
//! beyond one memory copy.
//!
//! ```rust,ignore
//! let config = WriterConfig::from_env("techaro.anubis", "instance-1")?;
//! let (writer, flusher) = WriterWrapper::new(config, std::io::stderr());
//! let handle = writer.handle();
//! let flush_task = tokio::spawn(flusher.run());
//!
//! tracing_subscriber::fmt()
//!     .with_writer(std::sync::Mutex::new(writer))
//!     .init();
//!
//! // on shutdown
//! handle.close();
//! flush_task.await?;
//! ```

use std::io::{self, Write};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::{StatusCode, Url};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::WriterConfig;
use crate::error::SubmitError;
use crate::ring_buffer::RingBuffer;

/// Shortest interval the flusher ticks at. Shorter configured intervals are
/// raised to this.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Builds with this feature never buffer or ship, whatever the configuration.
const SUBMISSION_COMPILED_OUT: bool = cfg!(feature = "limited-supportability");

#[derive(Debug)]
struct Shared {
    ring_buffer: Option<RingBuffer>,
    base_url: RwLock<String>,
    category: String,
    stream_id: String,
    cancel_token: CancellationToken,
}

impl Shared {
    fn buffer(&self, data: &[u8]) {
        if self.cancel_token.is_cancelled() {
            return;
        }
        if let Some(ring_buffer) = &self.ring_buffer {
            ring_buffer.add(data);
        }
    }

    fn base_url(&self) -> String {
        self.base_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_base_url(&self, base_url: String) {
        *self
            .base_url
            .write()
            .unwrap_or_else(PoisonError::into_inner) = base_url;
    }
}

/// Cloneable control handle for a [`WriterWrapper`] and its [`Flusher`].
#[derive(Debug, Clone)]
pub struct WriterHandle {
    shared: Arc<Shared>,
}

impl WriterHandle {
    /// Changes the archive the next flush ships to.
    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.shared.set_base_url(base_url.into());
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        self.shared.base_url()
    }

    /// Stops buffering and asks the flusher to ship what is left and exit.
    pub fn close(&self) {
        self.shared.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.cancel_token.is_cancelled()
    }
}

/// `io::Write` adapter that buffers every write for the archive and forwards
/// it to `next`.
#[derive(Debug)]
pub struct WriterWrapper<W> {
    next: W,
    shared: Arc<Shared>,
}

impl<W: Write> WriterWrapper<W> {
    /// Wraps `next`. The returned [`Flusher`] must be spawned for buffered
    /// output to reach the archive.
    pub fn new(config: WriterConfig, next: W) -> (Self, Flusher) {
        let ring_buffer = if config.enabled && !SUBMISSION_COMPILED_OUT {
            info!(
                kind = %config.category,
                log_id = %config.stream_id,
                target = %config.base_url,
                "starting up logs to alexandria"
            );
            Some(RingBuffer::new(config.ring_buffer_size))
        } else if SUBMISSION_COMPILED_OUT {
            info!(
                "Logging to Alexandria has been disabled at build time. Your ability to receive support is limited."
            );
            None
        } else {
            info!(
                "Logging to Alexandria has been disabled by ALEXANDRIA_LOG_SUBMISSION. Your ability to receive support is limited."
            );
            None
        };

        let shared = Arc::new(Shared {
            ring_buffer,
            base_url: RwLock::new(config.base_url),
            category: config.category,
            stream_id: config.stream_id,
            cancel_token: CancellationToken::new(),
        });

        let flusher = Flusher::new(Arc::clone(&shared), config.flush_interval);

        (WriterWrapper { next, shared }, flusher)
    }

    #[must_use]
    pub fn handle(&self) -> WriterHandle {
        WriterHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.shared.set_base_url(base_url.into());
    }

    /// Same as [`WriterHandle::close`].
    pub fn close(&self) {
        self.shared.cancel_token.cancel();
    }

    pub fn get_ref(&self) -> &W {
        &self.next
    }

    pub fn into_inner(self) -> W {
        self.next
    }
}

impl<W: Write> Write for WriterWrapper<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.shared.buffer(buf);
        self.next.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.next.flush()
    }
}

/// Background task shipping the buffered chunks of one [`WriterWrapper`].
#[derive(Debug)]
pub struct Flusher {
    shared: Arc<Shared>,
    client: reqwest::Client,
    flush_interval: Duration,
}

impl Flusher {
    fn new(shared: Arc<Shared>, flush_interval: Duration) -> Self {
        let client = reqwest::Client::builder().build().unwrap_or_else(|e| {
            error!("Unable to build alexandria HTTP client: {e}, falling back to defaults");
            reqwest::Client::new()
        });
        Flusher {
            shared,
            client,
            flush_interval: flush_interval.max(MIN_FLUSH_INTERVAL),
        }
    }

    /// Flushes on every interval tick until the writer is closed, then
    /// flushes one last time and returns.
    pub async fn run(self) {
        if self.shared.ring_buffer.is_none() {
            debug!("alexandria submission disabled, flusher not started");
            return;
        }

        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                biased;
                () = self.shared.cancel_token.cancelled() => {
                    let _ = self.flush().await;
                    debug!("alexandria flusher stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let _ = self.flush().await;
                }
            }
        }
    }

    /// Drains the buffer and ships its contents in one request.
    ///
    /// Returns the number of chunks submitted, `Ok(0)` when nothing was
    /// buffered (no request is made). Failures are logged here and the
    /// drained chunks are dropped.
    pub async fn flush(&self) -> Result<usize, SubmitError> {
        let Some(ring_buffer) = &self.shared.ring_buffer else {
            return Ok(0);
        };

        let lines = ring_buffer.drain();
        if lines.is_empty() {
            return Ok(0);
        }

        let n_lines = lines.len();
        match self.submit(lines).await {
            Ok(()) => {
                debug!("Shipped {n_lines} buffered log chunks to alexandria");
                Ok(n_lines)
            }
            Err(e) => {
                error!(chunks = n_lines, "{e}");
                Err(e)
            }
        }
    }

    async fn submit(&self, lines: Vec<Vec<u8>>) -> Result<(), SubmitError> {
        let url = upload_url(
            &self.shared.base_url(),
            &self.shared.category,
            &self.shared.stream_id,
        )?;
        let body = lines.concat();

        let resp = self
            .client
            .put(url)
            .timeout(self.flush_interval)
            .body(body)
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => Ok(()),
            got => Err(SubmitError::Status { got }),
        }
    }
}

fn upload_url(base_url: &str, category: &str, stream_id: &str) -> Result<Url, SubmitError> {
    let invalid = |reason: String| SubmitError::Url {
        url: base_url.to_string(),
        reason,
    };

    let mut url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| invalid("URL cannot be a base".to_string()))?
        .pop_if_empty()
        .extend(["upload", category, stream_id]);
    Ok(url)
}
