// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer side of Alexandria: keep logging cheap and local, ship recent
//! output to the archive in the background.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod error;
pub mod ring_buffer;
pub mod writer;

pub use config::WriterConfig;
pub use error::{ConfigError, SubmitError};
pub use ring_buffer::RingBuffer;
pub use writer::{Flusher, WriterHandle, WriterWrapper};
