// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors raised by the message store service.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open the message store: {0}")]
    Open(rusqlite::Error),

    #[error("failed to write to the message store: {0}")]
    Write(rusqlite::Error),

    #[error("failed to read from the message store: {0}")]
    Read(rusqlite::Error),

    #[error("message store service is not running")]
    ServiceUnavailable,
}

/// Errors raised while shipping a batch to the collector.
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    #[error("failed to prepare the upload payload: {0}")]
    Payload(String),

    #[error("upload rejected by the collector (status {0:?}): {1}")]
    Destination(Option<StatusCode>, String),
}

/// Errors raised by the update supervisor once a new revision was detected.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("update action failed: {0}")]
    ActionFailed(String),

    #[error("failed to launch the replacement process: {0}")]
    RestartFailed(String),
}

/// Errors raised while constructing a component from its configuration.
#[derive(Debug, thiserror::Error)]
pub enum CreationError {
    #[error("failed to read TLS material from {path}: {source}")]
    TlsRead {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid TLS material: {0}")]
    TlsParse(reqwest::Error),

    #[error("failed to build the HTTP client: {0}")]
    Client(reqwest::Error),
}

/// Errors raised while reading the agent configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
