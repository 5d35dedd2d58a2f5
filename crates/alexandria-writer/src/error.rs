// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors returned by [`crate::WriterConfig`] validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Why a flush failed to deliver its chunks. The chunks are dropped either way.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid archive URL '{url}': {reason}")]
    Url { url: String, reason: String },

    #[error("can't perform request to alexandria: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("wrong alexandria response code: got {got}, want {}", StatusCode::OK)]
    Status { got: StatusCode },
}
