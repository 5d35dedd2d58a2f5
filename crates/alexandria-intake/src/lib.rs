// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod category;
pub mod committer;
pub mod config;
pub mod entry;
pub mod error;
pub mod http_utils;
pub mod intake;
pub mod services;
pub mod storage;

pub use accumulator::{BatchAccumulator, BatchConfig, CommitLane};
pub use category::CategoryRegistry;
pub use committer::{BlobCommitter, Commit, CommitReceipt};
pub use config::IntakeConfig;
pub use entry::{Batch, LogEntry};
pub use error::{AccumulatorError, CommitError, ConfigError, ServerError, StorageError};
pub use intake::IntakeService;
pub use services::{IntakeServer, RunningIntake};
pub use storage::{create_object_store, StorageConfig};
