// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scheduled batch upload of the durable buffer.

use tracing::{debug, error};

use crate::collector::{CollectorApi, HubInfo};
use crate::store::StoreHandle;

/// Result of one flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered; no upload was attempted.
    Empty,
    /// The batch was uploaded and cleared from the store.
    Flushed(usize),
    /// The upload failed; the batch stays buffered for the next cycle.
    Retained(usize),
    /// The store could not be read; the cycle was abandoned.
    Aborted,
}

pub struct Flusher {
    store: StoreHandle,
    api: CollectorApi,
    hub_info: HubInfo,
}

impl Flusher {
    pub fn new(store: StoreHandle, api: CollectorApi, hub_info: HubInfo) -> Flusher {
        Flusher {
            store,
            api,
            hub_info,
        }
    }

    /// Run one flush cycle: snapshot the buffer, upload it, then clear
    /// exactly the uploaded ids.
    pub async fn flush(&self) -> FlushOutcome {
        let pending = match self.store.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Failed to read pending messages, abandoning this cycle: {e}");
                return FlushOutcome::Aborted;
            }
        };

        if pending.is_empty() {
            debug!("No pending messages to flush");
            return FlushOutcome::Empty;
        }

        // Only the ids captured here are eligible for deletion. Messages
        // appended while the upload is in flight keep their place in the
        // store.
        let batch_ids: Vec<i64> = pending.iter().map(|m| m.id).collect();
        let count = batch_ids.len();

        match self.api.ship_batch(&pending, &self.hub_info).await {
            Ok(()) => {
                if let Err(e) = self.store.delete_by_ids(batch_ids).await {
                    error!("Uploaded {count} messages but failed to clear them, they will be re-sent: {e}");
                    return FlushOutcome::Retained(count);
                }
                debug!("Flushed and cleared {count} messages");
                FlushOutcome::Flushed(count)
            }
            Err(e) => {
                error!("Failed to upload a batch of {count} messages, retaining for the next cycle: {e}");
                FlushOutcome::Retained(count)
            }
        }
    }
}
