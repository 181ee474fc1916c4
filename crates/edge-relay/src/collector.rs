// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for the remote collector.
//!
//! One batch upload is a single form-encoded POST carrying the buffered
//! messages as a JSON array plus a JSON description of the local hub. The
//! channel is mutually authenticated with a client certificate when TLS
//! material is configured.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{CollectorConfig, TlsConfig};
use crate::error::{CreationError, ShippingError};
use crate::store::PendingMessage;

/// Static description of the local hub sent along with every batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubInfo {
    pub hub_ip: String,
    pub hub_port: u16,
}

pub struct CollectorApi {
    client: reqwest::Client,
    url: String,
    account_id: String,
    write_token: String,
}

impl CollectorApi {
    pub fn new(config: &CollectorConfig) -> Result<CollectorApi, CreationError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(tls) = &config.tls {
            builder = configure_tls(builder, tls)?;
            warn!("Server certificate validation is disabled for the collector channel");
        }
        let client = builder.build().map_err(CreationError::Client)?;

        Ok(CollectorApi {
            client,
            url: config.url.clone(),
            account_id: config.account_id.clone(),
            write_token: config.write_token.clone(),
        })
    }

    /// Upload one batch. The store is never touched here; the caller decides
    /// what to do with the batch based on the result.
    pub async fn ship_batch(
        &self,
        batch: &[PendingMessage],
        hub_info: &HubInfo,
    ) -> Result<(), ShippingError> {
        let messages =
            serde_json::to_string(batch).map_err(|e| ShippingError::Payload(e.to_string()))?;
        let hub =
            serde_json::to_string(hub_info).map_err(|e| ShippingError::Payload(e.to_string()))?;

        debug!("Shipping {} messages to the collector", batch.len());

        let response = self
            .client
            .post(&self.url)
            .query(&[
                ("account", self.account_id.as_str()),
                ("token", self.write_token.as_str()),
            ])
            .form(&[("messages", messages.as_str()), ("hubInfo", hub.as_str())])
            .send()
            .await
            .map_err(|e| ShippingError::Destination(e.status(), e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ShippingError::Destination(Some(status), body))
        }
    }
}

fn configure_tls(
    builder: reqwest::ClientBuilder,
    tls: &TlsConfig,
) -> Result<reqwest::ClientBuilder, CreationError> {
    let read = |path: &std::path::Path| {
        std::fs::read(path).map_err(|source| CreationError::TlsRead {
            path: path.display().to_string(),
            source,
        })
    };

    // reqwest expects the client certificate and key in one PEM bundle.
    let mut identity_pem = read(&tls.cert_path)?;
    identity_pem.extend_from_slice(&read(&tls.key_path)?);
    let identity =
        reqwest::Identity::from_pem(&identity_pem).map_err(CreationError::TlsParse)?;
    let ca = reqwest::Certificate::from_pem(&read(&tls.ca_path)?)
        .map_err(CreationError::TlsParse)?;

    Ok(builder
        .use_rustls_tls()
        .identity(identity)
        .add_root_certificate(ca)
        .danger_accept_invalid_certs(true))
}
